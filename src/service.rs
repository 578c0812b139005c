// SPDX-License-Identifier: Apache-2.0

//! Query service: the request-level entry point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use queryhub_core::{
    BackendKind, DataSourceRef, EngineError, EngineResult, ExecutionMode, InstanceResolver,
    QueryResult, ResponseMap, ResponseOptions,
};

use crate::backends::BackendRegistry;
use crate::config::ServiceConfig;
use crate::federation::{parse_request, partition, validate, Dispatcher, DispatchOptions, QueryRequest};
use crate::metrics::{QueryMetrics, QueryMetricsSnapshot};
use crate::resolver::StaticInstanceResolver;
use crate::resource::{self, ResourceRequest, ResourceResponse};

pub struct QueryService {
    registry: Arc<BackendRegistry>,
    resolver: Arc<dyn InstanceResolver>,
    metrics: Arc<QueryMetrics>,
    dispatcher: Dispatcher,
    mode: ExecutionMode,
    response: ResponseOptions,
    timeout: Option<Duration>,
}

impl QueryService {
    /// Creates a service with default request settings
    pub fn new(registry: Arc<BackendRegistry>, resolver: Arc<dyn InstanceResolver>) -> Self {
        let metrics = Arc::new(QueryMetrics::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&resolver),
            Arc::clone(&metrics),
        );
        Self {
            registry,
            resolver,
            metrics,
            dispatcher,
            mode: ExecutionMode::default(),
            response: ResponseOptions::default(),
            timeout: None,
        }
    }

    /// Builds the default backends and an HTTP resolver over the configured datasources
    pub fn from_config(config: &ServiceConfig) -> EngineResult<Self> {
        config.validate()?;
        let resolver = StaticInstanceResolver::from_config(config)?;
        let service = Self::new(Arc::new(BackendRegistry::with_defaults()), Arc::new(resolver));
        Ok(service.with_defaults_from(config))
    }

    /// Takes request defaults (mode, output shape, deadline) from `config`
    pub fn with_defaults_from(mut self, config: &ServiceConfig) -> Self {
        self.mode = config.execution_mode();
        self.response = config.response_options();
        self.timeout = config.dispatch_timeout();
        self
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> QueryMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Runs a multi-query request.
    ///
    /// Duplicate identifiers and hint mismatches reject the whole request;
    /// every other failure is reported under the query that caused it.
    #[instrument(skip_all, fields(request_id = %Uuid::new_v4(), queries = request.queries.len()))]
    pub async fn execute(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> EngineResult<ResponseMap> {
        let start = Instant::now();

        let parsed = parse_request(&request.queries, &self.registry);
        let partitioned = partition(parsed);
        if let Err(err) = validate(&partitioned, request.hints.as_ref()) {
            warn!(stage = "prepareRequest", error = %err, "Request rejected");
            return Err(err);
        }

        let (queries, rejected) = partitioned.into_parts();
        let options = DispatchOptions {
            mode: request.mode.unwrap_or(self.mode),
            response: request.options.unwrap_or(self.response),
            timeout: self.timeout,
        };
        let mut responses = self.dispatcher.dispatch(queries, &options, &cancel).await?;

        for reject in rejected {
            let result = QueryResult::failure(reject.error);
            self.metrics.record_result(&result);
            if responses.insert(reject.ref_id.clone(), result).is_some() {
                return Err(EngineError::invariant(format!(
                    "query '{}' produced more than one result",
                    reject.ref_id
                )));
            }
        }

        info!(
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            results = responses.len(),
            succeeded = responses.success_count(),
            "Request finished"
        );
        Ok(responses)
    }

    /// Forwards an allow-listed metadata request to a Loki datasource.
    #[instrument(skip(self, request), fields(uid = %datasource.uid))]
    pub async fn call_resource(
        &self,
        datasource: &DataSourceRef,
        request: &ResourceRequest,
    ) -> EngineResult<ResourceResponse> {
        resource::resource_path(request)?;
        let instance = self.resolver.resolve(datasource).await?;
        if instance.kind.as_str() != BackendKind::LOKI {
            return Err(EngineError::invalid_resource(format!(
                "datasource '{}' does not support resource calls",
                instance.uid
            )));
        }
        resource::call_resource(request, instance.client.as_ref()).await
    }
}
