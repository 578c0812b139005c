// SPDX-License-Identifier: Apache-2.0

//! Collaborator interfaces consumed by the federation core
//!
//! Transport, settings resolution and credential handling live behind these
//! traits. Implementations are shared read-only across dispatch workers and
//! must be safe for concurrent use.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{EngineError, EngineResult};
use crate::frame::Frame;
use crate::types::{BackendKind, DataSourceRef, ResponseOptions, StructuredQuery};

/// Raw response of a passthrough call
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    /// Value of the backend's `Content-Encoding` header, if any
    pub encoding: Option<String>,
    pub body: Bytes,
}

/// Transport-level client for one backend instance
///
/// Retries and timeouts are the implementation's concern.
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Executes a structured query and returns frames in the backend's native shape
    async fn query(&self, query: &StructuredQuery) -> EngineResult<Vec<Frame>>;

    /// Issues a read-only GET against `path` (relative to the instance base URL)
    async fn raw_get(&self, path: &str) -> EngineResult<RawResponse> {
        Err(EngineError::invalid_resource(format!(
            "resource calls are not supported for '{path}'"
        )))
    }
}

/// Rewrites presentation metadata of native frames into the requested output convention
pub trait ResponseAdjuster: Send + Sync {
    fn adjust(
        &self,
        frame: &mut Frame,
        query: &StructuredQuery,
        options: &ResponseOptions,
    ) -> EngineResult<()>;
}

/// A resolved backend instance
#[derive(Clone)]
pub struct DataSourceInstance {
    pub uid: String,
    pub kind: BackendKind,
    pub url: String,
    pub client: Arc<dyn BackendClient>,
    /// Whether the instance can return structured metadata (Loki 3+)
    pub structured_metadata: bool,
}

impl std::fmt::Debug for DataSourceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceInstance")
            .field("uid", &self.uid)
            .field("kind", &self.kind)
            .field("url", &self.url)
            .field("structured_metadata", &self.structured_metadata)
            .finish_non_exhaustive()
    }
}

/// Resolves datasource references into client handles
///
/// Caching is the implementation's concern; the core calls this once per query.
#[async_trait]
pub trait InstanceResolver: Send + Sync {
    async fn resolve(&self, datasource: &DataSourceRef) -> EngineResult<DataSourceInstance>;
}
