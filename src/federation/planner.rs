// SPDX-License-Identifier: Apache-2.0

//! Federation planner.
//!
//! Groups parsed queries by backend kind and checks request-level
//! invariants before anything is dispatched.

use std::collections::HashSet;

use tracing::debug;

use queryhub_core::{EngineError, EngineResult, RefId};

use super::parser::ParsedQueries;
use super::types::{PartitionedRequest, ValidationHints};

/// Groups parsed queries by backend kind.
pub fn partition(parsed: ParsedQueries) -> PartitionedRequest {
    let mut request = PartitionedRequest {
        rejected: parsed.rejected,
        ..PartitionedRequest::default()
    };

    for query in parsed.queries {
        let kind = query.kind().clone();
        if kind.is_expression() {
            request.has_expression = true;
        } else {
            request.datasource_uids.insert(query.datasource.uid.clone());
        }
        request.kinds.insert(kind.clone());
        request.buckets.entry(kind).or_default().push(query);
    }

    debug!(
        buckets = request.buckets.len(),
        queries = request.query_count(),
        rejected = request.rejected.len(),
        "Partitioned request"
    );
    request
}

/// Checks request-level invariants.
///
/// Identifiers must be unique across all buckets, including queries that
/// failed to parse. Hints are only cross-checked when the caller supplies them.
pub fn validate(request: &PartitionedRequest, hints: Option<&ValidationHints>) -> EngineResult<()> {
    let mut seen: HashSet<&RefId> = HashSet::new();
    for ref_id in request.ref_ids() {
        if !seen.insert(ref_id) {
            return Err(EngineError::duplicate_ref_id(ref_id.as_str()));
        }
    }

    match hints {
        Some(hints) => validate_hints(request, hints),
        None => Ok(()),
    }
}

fn validate_hints(request: &PartitionedRequest, hints: &ValidationHints) -> EngineResult<()> {
    if request.has_expression {
        return match hints.expression.as_deref().map(str::trim) {
            None | Some("") | Some("true") => Ok(()),
            Some(other) => Err(EngineError::parameter_mismatch(format!(
                "request contains expression queries but expression hint is '{other}'"
            ))),
        };
    }

    let uids = split_hint_values(&hints.datasource_uids);
    if !uids.is_empty() {
        if uids.len() != request.datasource_uids.len() {
            return Err(EngineError::parameter_mismatch(format!(
                "expected {} datasource uids, request uses {}",
                uids.len(),
                request.datasource_uids.len()
            )));
        }
        if let Some(missing) = uids.iter().find(|uid| !request.datasource_uids.contains(*uid)) {
            return Err(EngineError::parameter_mismatch(format!(
                "datasource '{missing}' is not used by the request"
            )));
        }
    }

    let plugins = split_hint_values(&hints.plugin_ids);
    if !plugins.is_empty() {
        if plugins.len() != request.kinds.len() {
            return Err(EngineError::parameter_mismatch(format!(
                "expected {} backend kinds, request uses {}",
                plugins.len(),
                request.kinds.len()
            )));
        }
        if let Some(missing) = plugins
            .iter()
            .find(|id| !request.kinds.iter().any(|kind| kind.as_str() == id.as_str()))
        {
            return Err(EngineError::parameter_mismatch(format!(
                "backend kind '{missing}' is not used by the request"
            )));
        }
    }

    Ok(())
}

/// Splits comma-separated hint entries into trimmed, non-empty values.
pub fn split_hint_values(entries: &[String]) -> Vec<String> {
    entries
        .iter()
        .flat_map(|entry| entry.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
