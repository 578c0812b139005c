// SPDX-License-Identifier: Apache-2.0

//! Backend integrations
//!
//! One [`QueryBackend`] per backend kind. Each knows how to decode its query
//! payload and how to adjust its native frames; execution itself follows the
//! shared executor contract in [`crate::federation::executor`].

pub mod http;
pub mod legend;
pub mod loki;
pub mod prometheus;
pub mod registry;
pub mod step;
pub mod wire;

use async_trait::async_trait;

use queryhub_core::{
    BackendClient, BackendKind, EngineResult, QueryModel, QueryResult, RawSubQuery,
    ResponseAdjuster, ResponseOptions, StructuredQuery,
};

use crate::federation::executor::execute_query;

pub use registry::BackendRegistry;

/// Capability interface implemented once per backend kind
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Returns the kind this backend handles (e.g., "loki", "prometheus")
    fn kind(&self) -> BackendKind;

    /// Decodes the opaque payload of a sub-query into typed parameters
    ///
    /// Any decode failure must be reported as `EngineError::MalformedQuery`.
    fn parse(&self, raw: &RawSubQuery) -> EngineResult<QueryModel>;

    /// Returns the adjuster for this backend's native frames
    fn adjuster(&self) -> &dyn ResponseAdjuster;

    /// Runs one query against `client` and adjusts the response
    async fn execute(
        &self,
        query: &StructuredQuery,
        client: &dyn BackendClient,
        options: &ResponseOptions,
    ) -> QueryResult {
        execute_query(query, client, self.adjuster(), options).await
    }
}
