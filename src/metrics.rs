// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-memory query metrics.
//!
//! One [`QueryMetrics`] handle is shared by the service and its dispatcher;
//! there is no process-wide registry.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use queryhub_core::{FailureKind, QueryResult};

#[derive(Debug, Default)]
pub struct QueryMetrics {
    queries: AtomicU64,
    succeeded: AtomicU64,
    malformed: AtomicU64,
    backend_failures: AtomicU64,
    cancelled: AtomicU64,
    dispatches: AtomicU64,
    dispatch_total_ms: AtomicU64,
    dispatch_max_ms: AtomicU64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one per-query outcome.
    pub fn record_result(&self, result: &QueryResult) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let counter = match result.failure_kind() {
            None => &self.succeeded,
            Some(FailureKind::MalformedQuery) => &self.malformed,
            Some(FailureKind::BackendFailure) => &self.backend_failures,
            Some(FailureKind::Cancelled) => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts one finished dispatch batch.
    pub fn record_dispatch(&self, duration_ms: f64) {
        let duration_ms = duration_ms.max(0.0) as u64;
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.dispatch_total_ms
            .fetch_add(duration_ms, Ordering::Relaxed);

        let mut current = self.dispatch_max_ms.load(Ordering::Relaxed);
        while duration_ms > current {
            match self.dispatch_max_ms.compare_exchange(
                current,
                duration_ms,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(next) => current = next,
            }
        }
    }

    pub fn snapshot(&self) -> QueryMetricsSnapshot {
        let dispatches = self.dispatches.load(Ordering::Relaxed);
        let total_ms = self.dispatch_total_ms.load(Ordering::Relaxed);
        let max_ms = self.dispatch_max_ms.load(Ordering::Relaxed);

        QueryMetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            backend_failures: self.backend_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            dispatches,
            avg_dispatch_ms: (dispatches > 0).then(|| total_ms as f64 / dispatches as f64),
            max_dispatch_ms: (max_ms > 0).then_some(max_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetricsSnapshot {
    pub queries: u64,
    pub succeeded: u64,
    pub malformed: u64,
    pub backend_failures: u64,
    pub cancelled: u64,
    pub dispatches: u64,
    pub avg_dispatch_ms: Option<f64>,
    pub max_dispatch_ms: Option<u64>,
}
