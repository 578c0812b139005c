// SPDX-License-Identifier: Apache-2.0

//! Datasource resolution from static configuration.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use queryhub_core::{DataSourceInstance, DataSourceRef, EngineError, EngineResult, InstanceResolver};

use crate::backends::http::HttpBackendClient;
use crate::config::ServiceConfig;

/// Resolver over a fixed set of instances
#[derive(Debug, Default)]
pub struct StaticInstanceResolver {
    instances: HashMap<String, DataSourceInstance>,
}

impl StaticInstanceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one HTTP client per configured datasource
    pub fn from_config(config: &ServiceConfig) -> EngineResult<Self> {
        let mut resolver = Self::new();
        for ds in &config.datasources {
            let structured_metadata = ds.structured_metadata && config.request_structured_metadata;
            let client = HttpBackendClient::new(ds.kind.clone(), &ds.url)?
                .with_response_limit(config.response_limit_bytes)
                .with_structured_metadata(structured_metadata);

            resolver.insert(DataSourceInstance {
                uid: ds.uid.clone(),
                kind: ds.kind.clone(),
                url: ds.url.clone(),
                client: Arc::new(client),
                structured_metadata,
            });
        }
        Ok(resolver)
    }

    /// Adds an instance, replacing any previous one with the same uid
    pub fn insert(&mut self, instance: DataSourceInstance) {
        self.instances.insert(instance.uid.clone(), instance);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[async_trait]
impl InstanceResolver for StaticInstanceResolver {
    async fn resolve(&self, datasource: &DataSourceRef) -> EngineResult<DataSourceInstance> {
        let instance = self
            .instances
            .get(&datasource.uid)
            .ok_or_else(|| EngineError::datasource_not_found(datasource.uid.clone()))?;

        if instance.kind != datasource.kind {
            return Err(EngineError::backend(format!(
                "datasource '{}' is a {} instance, not {}",
                datasource.uid, instance.kind, datasource.kind
            )));
        }
        Ok(instance.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSourceConfig;
    use queryhub_core::BackendKind;

    fn config() -> ServiceConfig {
        ServiceConfig {
            request_structured_metadata: true,
            datasources: vec![
                DataSourceConfig {
                    uid: "loki-1".to_string(),
                    kind: BackendKind::loki(),
                    url: "http://loki:3100".to_string(),
                    structured_metadata: true,
                },
                DataSourceConfig {
                    uid: "prom-1".to_string(),
                    kind: BackendKind::prometheus(),
                    url: "http://prom:9090".to_string(),
                    structured_metadata: false,
                },
            ],
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn resolves_configured_instances() {
        let resolver = StaticInstanceResolver::from_config(&config()).unwrap();
        assert_eq!(resolver.len(), 2);

        let loki = resolver
            .resolve(&DataSourceRef::new("loki-1", "loki"))
            .await
            .unwrap();
        assert_eq!(loki.url, "http://loki:3100");
        assert!(loki.structured_metadata);
    }

    #[tokio::test]
    async fn unknown_uid_is_not_found() {
        let resolver = StaticInstanceResolver::from_config(&config()).unwrap();
        let err = resolver
            .resolve(&DataSourceRef::new("nope", "loki"))
            .await
            .unwrap_err();
        assert_eq!(err, EngineError::datasource_not_found("nope"));
    }

    #[tokio::test]
    async fn kind_mismatch_is_rejected() {
        let resolver = StaticInstanceResolver::from_config(&config()).unwrap();
        assert!(resolver
            .resolve(&DataSourceRef::new("prom-1", "loki"))
            .await
            .is_err());
    }
}
