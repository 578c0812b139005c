// SPDX-License-Identifier: Apache-2.0

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use queryhub::config::ServiceConfig;
use queryhub_core::{BackendKind, DataSourceRef, EngineError, ExecutionMode};
use queryhub::federation::QueryRequest;
use queryhub::observability::init_tracing;
use queryhub::resource::ResourceRequest;
use queryhub::QueryService;

#[derive(Parser, Debug)]
#[command(name = "queryhub")]
#[command(about = "QueryHub - fan a multi-query request out to Loki and Prometheus", long_about = None)]
struct Args {
    /// Service configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute a request file and print the response map as JSON
    Query {
        /// Request file (JSON)
        #[arg(short, long)]
        request: PathBuf,

        /// Run queries one at a time, in request order
        #[arg(long)]
        sequential: bool,

        /// Override the configured concurrency limit
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Forward a metadata request to a Loki datasource
    Resource {
        /// Datasource uid
        #[arg(short, long)]
        datasource: String,

        /// Path relative to the Loki API, e.g. "labels?start=0"
        #[arg(short, long)]
        url: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match ServiceConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_dir.as_deref());

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &ServiceConfig) -> Result<(), EngineError> {
    let service = QueryService::from_config(config)?;

    match command {
        Command::Query {
            request,
            sequential,
            concurrency,
        } => {
            let mut request = read_request(&request)?;
            if sequential {
                request.mode = Some(ExecutionMode::Sequential);
            } else if let Some(limit) = concurrency {
                request.mode = Some(ExecutionMode::Concurrent { limit });
            }

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, cancelling outstanding queries");
                    on_signal.cancel();
                }
            });

            let responses = service.execute(request, cancel).await?;
            let json = serde_json::to_string_pretty(&responses)
                .map_err(|e| EngineError::backend(format!("Failed to encode response: {e}")))?;
            println!("{json}");
        }
        Command::Resource { datasource, url } => {
            let datasource = DataSourceRef::new(datasource, BackendKind::LOKI);
            let response = service
                .call_resource(&datasource, &ResourceRequest::get(url))
                .await?;
            for (name, value) in &response.headers {
                eprintln!("{name}: {value}");
            }
            eprintln!("status: {}", response.status);
            println!("{}", String::from_utf8_lossy(&response.body));
        }
    }
    Ok(())
}

fn read_request(path: &Path) -> Result<QueryRequest, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        EngineError::config(format!("Failed to read request {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        EngineError::config(format!("Failed to parse request {}: {}", path.display(), e))
    })
}
