// SPDX-License-Identifier: Apache-2.0

//! Federation query parser.
//!
//! Decodes each raw sub-query independently against the schema of its
//! declared backend kind. A payload that fails to decode rejects only that
//! query; its siblings are parsed regardless.

use serde::Deserialize;
use tracing::debug;

use queryhub_core::{
    BackendKind, DataSourceRef, EngineError, EngineResult, ExpressionQuery, QueryModel,
    RawSubQuery, StructuredQuery,
};

use crate::backends::BackendRegistry;

use super::types::RejectedQuery;

/// Outcome of parsing a whole request
#[derive(Debug, Default)]
pub struct ParsedQueries {
    pub queries: Vec<StructuredQuery>,
    pub rejected: Vec<RejectedQuery>,
}

/// JSON payload of a server-side expression
#[derive(Debug, Deserialize)]
struct ExpressionModel {
    #[serde(rename = "type")]
    expression_type: String,
    #[serde(default)]
    expression: Option<String>,
}

/// Parses a single raw sub-query into a structured query.
pub fn parse_query(raw: &RawSubQuery, registry: &BackendRegistry) -> EngineResult<StructuredQuery> {
    let ref_id = raw.ref_id.as_str();
    if ref_id.is_empty() {
        return Err(EngineError::malformed(ref_id, "query has no refId"));
    }
    if !raw.time_range.is_valid() {
        return Err(EngineError::malformed(
            ref_id,
            "time range ends before it starts",
        ));
    }

    let (datasource, model) = if raw.datasource.is_expression() {
        let datasource = DataSourceRef {
            uid: raw.datasource.uid.clone(),
            kind: BackendKind::expression(),
        };
        (datasource, parse_expression(raw)?)
    } else {
        let backend = registry.get(&raw.datasource.kind).ok_or_else(|| {
            EngineError::malformed(
                ref_id,
                format!("unknown backend kind '{}'", raw.datasource.kind),
            )
        })?;
        (raw.datasource.clone(), backend.parse(raw)?)
    };

    Ok(StructuredQuery {
        ref_id: raw.ref_id.clone(),
        datasource,
        time_range: raw.time_range,
        model,
    })
}

/// Parses every sub-query of a request, keeping failures per identifier.
pub fn parse_request(raws: &[RawSubQuery], registry: &BackendRegistry) -> ParsedQueries {
    let mut parsed = ParsedQueries::default();
    for raw in raws {
        match parse_query(raw, registry) {
            Ok(query) => parsed.queries.push(query),
            Err(error) => {
                debug!(ref_id = %raw.ref_id, error = %error, "Rejected malformed query");
                parsed.rejected.push(RejectedQuery {
                    ref_id: raw.ref_id.clone(),
                    error,
                });
            }
        }
    }
    parsed
}

fn parse_expression(raw: &RawSubQuery) -> EngineResult<QueryModel> {
    let model: ExpressionModel = serde_json::from_str(raw.payload.get())
        .map_err(|e| EngineError::malformed(raw.ref_id.as_str(), e.to_string()))?;

    if model.expression_type.is_empty() {
        return Err(EngineError::malformed(
            raw.ref_id.as_str(),
            "expression type is empty",
        ));
    }

    Ok(QueryModel::Expression(ExpressionQuery {
        expression_type: model.expression_type,
        expression: model.expression,
    }))
}
