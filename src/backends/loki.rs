// SPDX-License-Identifier: Apache-2.0

//! Loki backend: query decoding and frame adjustment.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use queryhub_core::{
    BackendKind, Direction, EngineError, EngineResult, Field, FieldValues, Frame, FrameType,
    LokiQuery, QueryModel, RangeKind, RawSubQuery, ResponseAdjuster, ResponseOptions,
    StructuredQuery,
};

use super::legend::format_name;
use super::step::{calculate_step, format_duration, parse_duration};
use super::QueryBackend;

/// Lines returned by a log query when the payload does not say
pub const DEFAULT_MAX_LINES: u64 = 1000;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LokiQueryType {
    Range,
    Instant,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LokiDirection {
    Forward,
    Backward,
    /// Sharded scan; results are still merged newest first
    Scan,
}

/// JSON payload of a Loki sub-query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LokiQueryModel {
    expr: String,
    #[serde(default)]
    query_type: Option<LokiQueryType>,
    #[serde(default)]
    direction: Option<LokiDirection>,
    #[serde(default)]
    max_lines: Option<u64>,
    #[serde(default)]
    step: Option<String>,
    #[serde(default)]
    legend_format: Option<String>,
    #[serde(default)]
    supporting_query_type: Option<String>,
}

#[derive(Debug, Default)]
pub struct LokiBackend {
    adjuster: LokiAdjuster,
}

impl LokiBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryBackend for LokiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::loki()
    }

    fn parse(&self, raw: &RawSubQuery) -> EngineResult<QueryModel> {
        let model: LokiQueryModel = serde_json::from_str(raw.payload.get())
            .map_err(|e| EngineError::malformed(raw.ref_id.as_str(), e.to_string()))?;

        if model.expr.trim().is_empty() {
            return Err(EngineError::malformed(raw.ref_id.as_str(), "expr is empty"));
        }

        let explicit_step = match model.step.as_deref().filter(|s| !s.is_empty()) {
            Some(step) => Some(parse_duration(step).ok_or_else(|| {
                EngineError::malformed(raw.ref_id.as_str(), format!("invalid step '{step}'"))
            })?),
            None => None,
        };

        let range = match model.query_type {
            Some(LokiQueryType::Instant) => RangeKind::Instant,
            _ => RangeKind::Range,
        };
        let direction = match model.direction {
            Some(LokiDirection::Forward) => Direction::Forward,
            _ => Direction::Backward,
        };

        Ok(QueryModel::Loki(LokiQuery {
            expr: model.expr,
            range,
            direction,
            max_lines: model.max_lines.filter(|n| *n > 0).unwrap_or(DEFAULT_MAX_LINES),
            step: calculate_step(
                explicit_step,
                &raw.time_range,
                raw.max_data_points,
                raw.interval_ms,
            ),
            legend_format: model.legend_format,
            supporting_query_type: model.supporting_query_type,
        }))
    }

    fn adjuster(&self) -> &dyn ResponseAdjuster {
        &self.adjuster
    }
}

/// Adjusts Loki's native metric and log frames
#[derive(Debug, Default)]
pub struct LokiAdjuster;

impl ResponseAdjuster for LokiAdjuster {
    fn adjust(
        &self,
        frame: &mut Frame,
        query: &StructuredQuery,
        options: &ResponseOptions,
    ) -> EngineResult<()> {
        let QueryModel::Loki(loki) = &query.model else {
            return Err(EngineError::backend(format!(
                "query '{}' is not a Loki query",
                query.ref_id
            )));
        };

        if frame.fields.is_empty() {
            return Ok(());
        }
        if frame.field("Line").is_some() {
            return adjust_logs_frame(frame, loki, options.logs_dataplane);
        }
        if frame.fields.len() == 2 && frame.value_field().is_some() {
            return adjust_metric_frame(frame, loki, !options.metric_dataplane);
        }
        Err(EngineError::backend(format!(
            "invalid field length in frame: {}",
            frame.fields.len()
        )))
    }
}

fn executed_query_string(query: &LokiQuery) -> String {
    match query.range {
        RangeKind::Range => format!("Expr: {}\nStep: {}", query.expr, format_duration(query.step)),
        RangeKind::Instant => format!("Expr: {}", query.expr),
    }
}

fn adjust_metric_frame(frame: &mut Frame, query: &LokiQuery, set_frame_name: bool) -> EngineResult<()> {
    let labels = frame
        .value_field()
        .map(|f| f.labels.clone())
        .unwrap_or_default();
    let name = format_name(&labels, query.legend_format.as_deref(), &query.expr);

    frame.name = set_frame_name.then(|| name.clone());

    let meta = frame.meta_mut();
    meta.custom = None;
    meta.executed_query_string = Some(executed_query_string(query));
    if !set_frame_name {
        meta.frame_type = Some(match query.range {
            RangeKind::Range => FrameType::TimeSeriesMulti,
            RangeKind::Instant => FrameType::NumericMulti,
        });
        meta.type_version = Some([0, 1]);
    }

    if query.range == RangeKind::Range {
        if let Some(time) = frame.time_field_mut() {
            time.config_mut().interval = Some(query.step.as_millis() as f64);
        }
    }
    if let Some(value) = frame.value_field_mut() {
        value.config_mut().display_name_from_ds = Some(name);
    }
    Ok(())
}

fn adjust_logs_frame(frame: &mut Frame, query: &LokiQuery, dataplane: bool) -> EngineResult<()> {
    let ids = line_ids(frame)?;
    frame.fields.push(Field::string("id", ids));

    let meta = frame.meta_mut();
    meta.executed_query_string = Some(format!("Expr: {}", query.expr));

    if dataplane {
        frame.name = None;
        for field in frame.fields.iter_mut() {
            match field.name.as_str() {
                "Time" => field.name = "timestamp".to_string(),
                "Line" => field.name = "body".to_string(),
                _ => {}
            }
        }
        let meta = frame.meta_mut();
        meta.frame_type = Some(FrameType::LogLines);
        meta.type_version = Some([0, 0]);
        meta.custom = None;
    } else {
        frame.meta_mut().custom = Some(json!({ "frameType": "LabeledTimeValues" }));
    }
    Ok(())
}

/// Builds a stable id per log line: `<tsNs>_<digest>`, with `_<n>` appended
/// to repeats of the same line at the same instant.
fn line_ids(frame: &Frame) -> EngineResult<Vec<String>> {
    let (Some(ts_field), Some(line_field)) = (frame.field("tsNs"), frame.field("Line")) else {
        return Err(EngineError::backend("log frame is missing tsNs or Line"));
    };
    let (FieldValues::String(ts_values), FieldValues::String(lines)) =
        (&ts_field.values, &line_field.values)
    else {
        return Err(EngineError::backend("log frame has unexpected field types"));
    };
    let labels = match frame.field("labels").map(|f| &f.values) {
        Some(FieldValues::Json(values)) => Some(values),
        _ => None,
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut ids = Vec::with_capacity(lines.len());
    for (i, (ts, line)) in ts_values.iter().zip(lines.iter()).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(line.as_bytes());
        hasher.update(b"_");
        if let Some(label) = labels.and_then(|l| l.get(i)) {
            hasher.update(label.to_string().as_bytes());
        }
        let digest = hex::encode(&hasher.finalize()[..4]);
        let base = format!("{ts}_{digest}");

        let count = seen.entry(base.clone()).or_insert(0);
        let id = if *count == 0 {
            base
        } else {
            format!("{base}_{count}")
        };
        *count += 1;
        ids.push(id);
    }
    Ok(ids)
}
