// SPDX-License-Identifier: Apache-2.0

//! Universal data types for the QueryHub federation core
//!
//! A request arrives as a list of [`RawSubQuery`] envelopes, is decoded into
//! [`StructuredQuery`] values, and leaves as a [`ResponseMap`] holding exactly
//! one [`QueryResult`] per input identifier.

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::frame::Frame;
use crate::model::QueryModel;

/// Identifier of a sub-query within one request (e.g. "A", "B")
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefId(pub String);

impl RefId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RefId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Discriminator selecting the executor/adjuster implementation for a query
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendKind(pub String);

impl BackendKind {
    pub const LOKI: &'static str = "loki";
    pub const PROMETHEUS: &'static str = "prometheus";
    /// Synthetic kind for server-side expressions (not a real backend)
    pub const EXPRESSION: &'static str = "__expr__";

    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn loki() -> Self {
        Self::new(Self::LOKI)
    }

    pub fn prometheus() -> Self {
        Self::new(Self::PROMETHEUS)
    }

    pub fn expression() -> Self {
        Self::new(Self::EXPRESSION)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_expression(&self) -> bool {
        self.0 == Self::EXPRESSION
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackendKind {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Reference to the datasource a sub-query is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataSourceRef {
    pub uid: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
}

impl DataSourceRef {
    pub fn new(uid: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            kind: BackendKind::new(kind),
        }
    }

    pub fn is_expression(&self) -> bool {
        self.kind.is_expression() || self.uid == BackendKind::EXPRESSION
    }
}

/// Absolute time range of a sub-query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn duration(&self) -> Duration {
        self.to - self.from
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }
}

/// Backend-agnostic envelope of one sub-query as received at ingress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSubQuery {
    pub ref_id: RefId,
    pub datasource: DataSourceRef,
    pub time_range: TimeRange,
    /// Opaque, backend-specific query payload
    pub payload: Box<RawValue>,
    #[serde(default)]
    pub max_data_points: Option<u64>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

/// Parsed sub-query bound to one backend kind
#[derive(Debug, Clone)]
pub struct StructuredQuery {
    pub ref_id: RefId,
    pub datasource: DataSourceRef,
    pub time_range: TimeRange,
    pub model: QueryModel,
}

impl StructuredQuery {
    pub fn kind(&self) -> &BackendKind {
        &self.datasource.kind
    }
}

/// Output-shape options applied by response adjusters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseOptions {
    /// Use the dataplane convention for metric frames (legacy shape otherwise)
    pub metric_dataplane: bool,
    /// Use the dataplane convention for log frames (legacy shape otherwise)
    pub logs_dataplane: bool,
}

impl Default for ResponseOptions {
    fn default() -> Self {
        Self {
            metric_dataplane: true,
            logs_dataplane: true,
        }
    }
}

/// Default upper bound on concurrently executing backend calls
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

/// How the dispatch engine schedules sub-queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ExecutionMode {
    /// At most `limit` backend calls in flight
    Concurrent { limit: usize },
    /// One query at a time, in request order
    Sequential,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Concurrent {
            limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

/// Category of a per-query failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MalformedQuery,
    BackendFailure,
    Cancelled,
}

/// Failure descriptor embedded in a response entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl QueryFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Outcome of one sub-query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum QueryResult {
    Success { frames: Vec<Frame> },
    Failure { error: QueryFailure },
}

impl QueryResult {
    pub fn success(frames: Vec<Frame>) -> Self {
        Self::Success { frames }
    }

    pub fn failure(error: impl Into<QueryFailure>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error.kind),
        }
    }

    pub fn frames(&self) -> Option<&[Frame]> {
        match self {
            Self::Success { frames } => Some(frames),
            Self::Failure { .. } => None,
        }
    }
}

/// Per-request result map, keyed by query identifier
///
/// Ordered so two runs over the same input serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponseMap(BTreeMap<RefId, QueryResult>);

impl ResponseMap {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a result, returning the previous entry for the same id (if any)
    pub fn insert(&mut self, ref_id: RefId, result: QueryResult) -> Option<QueryResult> {
        self.0.insert(ref_id, result)
    }

    pub fn get(&self, ref_id: &str) -> Option<&QueryResult> {
        self.0.get(&RefId::from(ref_id))
    }

    pub fn contains(&self, ref_id: &RefId) -> bool {
        self.0.contains_key(ref_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, RefId, QueryResult> {
        self.0.iter()
    }

    pub fn success_count(&self) -> usize {
        self.0.values().filter(|r| r.is_success()).count()
    }

    pub fn failure_count(&self, kind: FailureKind) -> usize {
        self.0
            .values()
            .filter(|r| r.failure_kind() == Some(kind))
            .count()
    }
}

impl IntoIterator for ResponseMap {
    type Item = (RefId, QueryResult);
    type IntoIter = btree_map::IntoIter<RefId, QueryResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
