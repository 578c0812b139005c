// SPDX-License-Identifier: Apache-2.0

//! Per-query execution: backend call followed by frame adjustment.

use std::time::Instant;

use tracing::{debug, instrument, warn};

use queryhub_core::{
    BackendClient, EngineResult, FailureKind, Frame, QueryFailure, QueryResult,
    ResponseAdjuster, ResponseOptions, StructuredQuery,
};

/// Runs one structured query against a backend instance.
///
/// Never fails the batch: every error becomes this query's result.
#[instrument(skip_all, fields(ref_id = %query.ref_id, kind = %query.kind()))]
pub async fn execute_query(
    query: &StructuredQuery,
    client: &dyn BackendClient,
    adjuster: &dyn ResponseAdjuster,
    options: &ResponseOptions,
) -> QueryResult {
    match run_query(query, client, adjuster, options).await {
        Ok(frames) => QueryResult::success(frames),
        Err(err) => {
            let mut failure = QueryFailure::from(err);
            if failure.kind == FailureKind::MalformedQuery {
                failure.kind = FailureKind::BackendFailure;
            }
            QueryResult::failure(failure)
        }
    }
}

async fn run_query(
    query: &StructuredQuery,
    client: &dyn BackendClient,
    adjuster: &dyn ResponseAdjuster,
    options: &ResponseOptions,
) -> EngineResult<Vec<Frame>> {
    let start = Instant::now();
    let mut frames = client.query(query).await.map_err(|err| {
        warn!(stage = "databaseRequest", error = %err, "Backend request failed");
        err
    })?;
    debug!(
        stage = "databaseRequest",
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        frames = frames.len(),
        "Backend request finished"
    );

    let start = Instant::now();
    for frame in frames.iter_mut() {
        adjuster.adjust(frame, query, options).map_err(|err| {
            warn!(stage = "parseResponse", error = %err, "Failed to adjust response");
            err
        })?;
    }
    debug!(
        stage = "parseResponse",
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Response adjusted"
    );
    Ok(frames)
}
