// SPDX-License-Identifier: Apache-2.0

//! Types for the federation pipeline.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use queryhub_core::{
    BackendKind, EngineError, ExecutionMode, RawSubQuery, RefId, ResponseOptions,
    StructuredQuery,
};

/// Incoming multi-query request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub queries: Vec<RawSubQuery>,
    /// Output convention (service default when absent)
    #[serde(default)]
    pub options: Option<ResponseOptions>,
    /// Scheduling mode (service default when absent)
    #[serde(default)]
    pub mode: Option<ExecutionMode>,
    /// Declared backends to cross-check; skipped when absent
    #[serde(default)]
    pub hints: Option<ValidationHints>,
}

impl QueryRequest {
    pub fn new(queries: Vec<RawSubQuery>) -> Self {
        Self {
            queries,
            options: None,
            mode: None,
            hints: None,
        }
    }
}

/// Backends the caller declares a request to touch (e.g. from request headers)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidationHints {
    /// Datasource instance uids; entries may be comma-separated lists
    pub datasource_uids: Vec<String>,
    /// Backend kinds (plugin ids); entries may be comma-separated lists
    pub plugin_ids: Vec<String>,
    /// Value of the `expression` flag for requests containing expressions
    pub expression: Option<String>,
}

/// A sub-query whose payload could not be decoded
#[derive(Debug, Clone)]
pub struct RejectedQuery {
    pub ref_id: RefId,
    pub error: EngineError,
}

/// Structured queries grouped by backend kind
///
/// Every parsed query sits in exactly one bucket. Bucket order is the kind's
/// sort order; order within a bucket is request order.
#[derive(Debug, Clone, Default)]
pub struct PartitionedRequest {
    pub buckets: BTreeMap<BackendKind, Vec<StructuredQuery>>,
    /// Distinct backend kinds in use
    pub kinds: BTreeSet<BackendKind>,
    /// Distinct datasource instances in use
    pub datasource_uids: BTreeSet<String>,
    pub has_expression: bool,
    /// Queries that failed to parse, kept for per-query reporting
    pub rejected: Vec<RejectedQuery>,
}

impl PartitionedRequest {
    /// Number of parsed queries across all buckets
    pub fn query_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn bucket(&self, kind: &BackendKind) -> Option<&[StructuredQuery]> {
        self.buckets.get(kind).map(Vec::as_slice)
    }

    /// Iterates over every identifier, parsed and rejected
    pub fn ref_ids(&self) -> impl Iterator<Item = &RefId> {
        self.buckets
            .values()
            .flatten()
            .map(|q| &q.ref_id)
            .chain(self.rejected.iter().map(|r| &r.ref_id))
    }

    /// Flattens the buckets into one ordered sequence, returning the rejects alongside
    pub fn into_parts(self) -> (Vec<StructuredQuery>, Vec<RejectedQuery>) {
        let queries = self.buckets.into_values().flatten().collect();
        (queries, self.rejected)
    }
}

/// Per-dispatch settings
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    pub mode: ExecutionMode,
    pub response: ResponseOptions,
    /// Deadline for the whole batch, measured from dispatch start
    pub timeout: Option<Duration>,
}
