// SPDX-License-Identifier: Apache-2.0

//! Federation dispatch manager.
//!
//! Runs a batch of structured queries against their backends, either with a
//! bounded number of calls in flight or strictly one at a time, and collects
//! exactly one result per query identifier.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use queryhub_core::{
    EngineError, EngineResult, ExecutionMode, FailureKind, InstanceResolver, QueryFailure,
    QueryResult, RefId, ResponseMap, ResponseOptions, StructuredQuery,
};

use crate::backends::BackendRegistry;
use crate::metrics::QueryMetrics;

use super::types::DispatchOptions;

const CANCELLED_REASON: &str = "request cancelled";
const DEADLINE_REASON: &str = "dispatch deadline exceeded";

/// Cancellation observed by workers: the caller's token plus an optional deadline
#[derive(Clone)]
struct CancelSignal {
    token: CancellationToken,
    deadline: Option<tokio::time::Instant>,
}

impl CancelSignal {
    /// Reason to stop, if cancellation has already been requested
    fn reason(&self) -> Option<&'static str> {
        if self.token.is_cancelled() {
            Some(CANCELLED_REASON)
        } else if self
            .deadline
            .is_some_and(|deadline| tokio::time::Instant::now() >= deadline)
        {
            Some(DEADLINE_REASON)
        } else {
            None
        }
    }

    /// Resolves once cancellation is requested
    async fn fired(&self) -> &'static str {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => CANCELLED_REASON,
                _ = tokio::time::sleep_until(deadline) => DEADLINE_REASON,
            },
            None => {
                self.token.cancelled().await;
                CANCELLED_REASON
            }
        }
    }
}

fn cancelled(reason: &str) -> QueryResult {
    QueryResult::failure(QueryFailure::new(FailureKind::Cancelled, reason))
}

/// Dispatches structured queries to their backends
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    resolver: Arc<dyn InstanceResolver>,
    metrics: Arc<QueryMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<BackendRegistry>,
        resolver: Arc<dyn InstanceResolver>,
        metrics: Arc<QueryMetrics>,
    ) -> Self {
        Self {
            registry,
            resolver,
            metrics,
        }
    }

    /// Executes every query and returns one result per identifier.
    ///
    /// Per-query failures are embedded in the map. Only a broken internal
    /// invariant (a lost or doubled result, a panicked worker) fails the batch.
    #[instrument(skip_all, fields(queries = queries.len(), mode = ?options.mode))]
    pub async fn dispatch(
        &self,
        queries: Vec<StructuredQuery>,
        options: &DispatchOptions,
        cancel: &CancellationToken,
    ) -> EngineResult<ResponseMap> {
        let start = Instant::now();
        let expected: Vec<RefId> = queries.iter().map(|q| q.ref_id.clone()).collect();
        let signal = CancelSignal {
            token: cancel.clone(),
            deadline: options
                .timeout
                .map(|timeout| tokio::time::Instant::now() + timeout),
        };
        let results = Arc::new(Mutex::new(ResponseMap::new()));

        match options.mode {
            ExecutionMode::Sequential => {
                self.run_sequential(queries, options.response, &signal, &results)
                    .await?
            }
            ExecutionMode::Concurrent { limit } => {
                self.run_concurrent(queries, limit.max(1), options.response, &signal, &results)
                    .await?
            }
        }

        let map = match Arc::try_unwrap(results) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().clone(),
        };
        if map.len() != expected.len() || expected.iter().any(|id| !map.contains(id)) {
            return Err(EngineError::invariant(format!(
                "expected {} results, collected {}",
                expected.len(),
                map.len()
            )));
        }

        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_dispatch(duration_ms);
        info!(
            duration_ms,
            succeeded = map.success_count(),
            cancelled = map.failure_count(FailureKind::Cancelled),
            failed = map.failure_count(FailureKind::BackendFailure),
            "Dispatch finished"
        );
        Ok(map)
    }

    async fn run_sequential(
        &self,
        queries: Vec<StructuredQuery>,
        response: ResponseOptions,
        signal: &CancelSignal,
        results: &Mutex<ResponseMap>,
    ) -> EngineResult<()> {
        for query in queries {
            let ref_id = query.ref_id.clone();
            let result = self.run_one(query, response, signal).await;
            self.record(results, ref_id, result)?;
        }
        Ok(())
    }

    async fn run_concurrent(
        &self,
        queries: Vec<StructuredQuery>,
        limit: usize,
        response: ResponseOptions,
        signal: &CancelSignal,
        results: &Arc<Mutex<ResponseMap>>,
    ) -> EngineResult<()> {
        let permits = Arc::new(Semaphore::new(limit));
        let mut workers = JoinSet::new();

        for query in queries {
            let worker = self.clone();
            let permits = Arc::clone(&permits);
            let signal = signal.clone();
            let results = Arc::clone(results);

            workers.spawn(async move {
                let ref_id = query.ref_id.clone();
                let result = tokio::select! {
                    biased;
                    permit = permits.acquire_owned() => {
                        let _permit = permit.map_err(|_| {
                            EngineError::invariant("worker pool closed while dispatching")
                        })?;
                        worker.run_one(query, response, &signal).await
                    }
                    reason = signal.fired() => cancelled(reason),
                };
                worker.record(&results, ref_id, result)
            });
        }

        // Dropping the set on early return aborts the remaining workers
        while let Some(joined) = workers.join_next().await {
            joined.map_err(|e| EngineError::invariant(format!("dispatch worker failed: {e}")))??;
        }
        Ok(())
    }

    /// Runs one query unless cancellation wins first
    async fn run_one(
        &self,
        query: StructuredQuery,
        response: ResponseOptions,
        signal: &CancelSignal,
    ) -> QueryResult {
        if let Some(reason) = signal.reason() {
            return cancelled(reason);
        }
        // a call that has already completed keeps its result
        tokio::select! {
            biased;
            result = self.execute(&query, response) => result,
            reason = signal.fired() => cancelled(reason),
        }
    }

    async fn execute(&self, query: &StructuredQuery, response: ResponseOptions) -> QueryResult {
        let kind = query.kind();
        let Some(backend) = self.registry.get(kind) else {
            return QueryResult::failure(EngineError::backend(format!(
                "no backend registered for kind '{kind}'"
            )));
        };

        let instance = match self.resolver.resolve(&query.datasource).await {
            Ok(instance) => instance,
            Err(err) => {
                debug!(ref_id = %query.ref_id, error = %err, "Datasource resolution failed");
                return QueryResult::failure(QueryFailure::new(
                    FailureKind::BackendFailure,
                    err.to_string(),
                ));
            }
        };

        backend
            .execute(query, instance.client.as_ref(), &response)
            .await
    }

    fn record(&self, results: &Mutex<ResponseMap>, ref_id: RefId, result: QueryResult) -> EngineResult<()> {
        self.metrics.record_result(&result);
        let previous = results.lock().insert(ref_id.clone(), result);
        if previous.is_some() {
            return Err(EngineError::invariant(format!(
                "query '{ref_id}' produced more than one result"
            )));
        }
        Ok(())
    }
}
