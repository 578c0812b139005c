// SPDX-License-Identifier: Apache-2.0

//! Service configuration
//!
//! Loaded from an optional JSON file, then overridden by `QUERYHUB_*`
//! environment variables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use queryhub_core::{
    BackendKind, EngineError, EngineResult, ExecutionMode, ResponseOptions,
    DEFAULT_CONCURRENCY_LIMIT,
};

const ENV_PREFIX: &str = "QUERYHUB_";

/// One configured backend instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub uid: String,
    pub kind: BackendKind,
    pub url: String,
    /// Instance can return structured metadata (Loki 3+)
    #[serde(default)]
    pub structured_metadata: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub concurrency_limit: usize,
    pub run_in_parallel: bool,
    pub metric_dataplane: bool,
    pub logs_dataplane: bool,
    /// Deadline for a whole dispatch batch
    pub dispatch_timeout_ms: Option<u64>,
    /// Maximum backend response body (0 = unlimited)
    pub response_limit_bytes: u64,
    /// Ask Loki for structured metadata where the instance supports it
    pub request_structured_metadata: bool,
    /// Rolling log file directory; stdout when unset
    pub log_dir: Option<PathBuf>,
    pub datasources: Vec<DataSourceConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            run_in_parallel: true,
            metric_dataplane: true,
            logs_dataplane: true,
            dispatch_timeout_ms: None,
            response_limit_bytes: 0,
            request_structured_metadata: false,
            log_dir: None,
            datasources: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Loads the file (when given), applies the process environment and validates.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No config file given, using defaults");
                Self::default()
            }
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            EngineError::config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;
        info!("Loaded service configuration from {:?}", path);
        Ok(config)
    }

    /// Applies `QUERYHUB_*` overrides from the given variables.
    pub fn apply_env<I>(&mut self, vars: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name {
                "CONCURRENCY_LIMIT" => self.concurrency_limit = parse_env(&key, &value)?,
                "RUN_IN_PARALLEL" => self.run_in_parallel = parse_bool(&key, &value)?,
                "METRIC_DATAPLANE" => self.metric_dataplane = parse_bool(&key, &value)?,
                "LOGS_DATAPLANE" => self.logs_dataplane = parse_bool(&key, &value)?,
                "DISPATCH_TIMEOUT_MS" => {
                    self.dispatch_timeout_ms = match value.trim() {
                        "" => None,
                        _ => Some(parse_env(&key, &value)?),
                    }
                }
                "RESPONSE_LIMIT_BYTES" => self.response_limit_bytes = parse_env(&key, &value)?,
                "STRUCTURED_METADATA" => {
                    self.request_structured_metadata = parse_bool(&key, &value)?
                }
                "LOG_DIR" => self.log_dir = Some(PathBuf::from(value)),
                _ => debug!(variable = %key, "Ignoring unknown configuration variable"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.concurrency_limit == 0 {
            return Err(EngineError::config("concurrency_limit must be at least 1"));
        }

        let mut uids = HashSet::new();
        for ds in &self.datasources {
            if ds.uid.is_empty() {
                return Err(EngineError::config("datasource uid must not be empty"));
            }
            if !uids.insert(ds.uid.as_str()) {
                return Err(EngineError::config(format!("duplicate datasource uid '{}'", ds.uid)));
            }
            if ds.kind.as_str() != BackendKind::LOKI && ds.kind.as_str() != BackendKind::PROMETHEUS {
                return Err(EngineError::config(format!(
                    "datasource '{}' has unsupported kind '{}'",
                    ds.uid, ds.kind
                )));
            }
            Url::parse(&ds.url).map_err(|e| {
                EngineError::config(format!("datasource '{}' has invalid url: {}", ds.uid, e))
            })?;
        }
        Ok(())
    }

    pub fn execution_mode(&self) -> ExecutionMode {
        if self.run_in_parallel {
            ExecutionMode::Concurrent {
                limit: self.concurrency_limit,
            }
        } else {
            ExecutionMode::Sequential
        }
    }

    pub fn response_options(&self) -> ResponseOptions {
        ResponseOptions {
            metric_dataplane: self.metric_dataplane,
            logs_dataplane: self.logs_dataplane,
        }
    }

    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::config(format!("invalid value '{value}' for {key}")))
}

fn parse_bool(key: &str, value: &str) -> EngineResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EngineError::config(format!("invalid boolean '{value}' for {key}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.execution_mode(), ExecutionMode::Concurrent { limit: 10 });
        assert_eq!(config.response_options(), ResponseOptions::default());
        assert_eq!(config.dispatch_timeout(), None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn loads_file_with_partial_fields() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"concurrency_limit": 4,
                "datasources": [{{"uid": "loki-1", "kind": "loki", "url": "http://loki:3100"}}]}}"#
        )
        .unwrap();

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.concurrency_limit, 4);
        assert!(config.run_in_parallel);
        assert_eq!(config.datasources.len(), 1);
        assert_eq!(config.datasources[0].kind, BackendKind::loki());
        assert!(!config.datasources[0].structured_metadata);
    }

    #[test]
    fn unreadable_or_invalid_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ServiceConfig::from_file(&dir.path().join("missing.json")),
            Err(EngineError::Config { .. })
        ));

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(ServiceConfig::from_file(&path), Err(EngineError::Config { .. })));
    }

    #[test]
    fn env_overrides() {
        let mut config = ServiceConfig::default();
        config
            .apply_env(vars(&[
                ("QUERYHUB_RUN_IN_PARALLEL", "false"),
                ("QUERYHUB_METRIC_DATAPLANE", "0"),
                ("QUERYHUB_DISPATCH_TIMEOUT_MS", "2500"),
                ("QUERYHUB_RESPONSE_LIMIT_BYTES", "1024"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();

        assert_eq!(config.execution_mode(), ExecutionMode::Sequential);
        assert!(!config.response_options().metric_dataplane);
        assert_eq!(config.dispatch_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(config.response_limit_bytes, 1024);
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        let mut config = ServiceConfig::default();
        assert!(config
            .apply_env(vars(&[("QUERYHUB_CONCURRENCY_LIMIT", "many")]))
            .is_err());
        assert!(config
            .apply_env(vars(&[("QUERYHUB_LOGS_DATAPLANE", "maybe")]))
            .is_err());
    }

    #[test]
    fn validation() {
        let mut config = ServiceConfig {
            concurrency_limit: 0,
            ..ServiceConfig::default()
        };
        assert!(config.validate().is_err());

        config.concurrency_limit = 2;
        config.datasources = vec![DataSourceConfig {
            uid: "es".to_string(),
            kind: BackendKind::new("elasticsearch"),
            url: "http://es:9200".to_string(),
            structured_metadata: false,
        }];
        assert!(config.validate().is_err());

        config.datasources = vec![
            DataSourceConfig {
                uid: "a".to_string(),
                kind: BackendKind::loki(),
                url: "http://loki:3100".to_string(),
                structured_metadata: true,
            },
            DataSourceConfig {
                uid: "a".to_string(),
                kind: BackendKind::prometheus(),
                url: "http://prom:9090".to_string(),
                structured_metadata: false,
            },
        ];
        assert!(config.validate().is_err());

        config.datasources[1].uid = "b".to_string();
        assert!(config.validate().is_ok());

        config.datasources[1].url = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
