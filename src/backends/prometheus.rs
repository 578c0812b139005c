// SPDX-License-Identifier: Apache-2.0

//! Prometheus backend: query decoding and frame adjustment.

use async_trait::async_trait;
use serde::Deserialize;

use queryhub_core::{
    BackendKind, EngineError, EngineResult, Frame, FrameType, PrometheusQuery, QueryModel,
    RangeKind, RawSubQuery, ResponseAdjuster, ResponseOptions, StructuredQuery,
};

use super::legend::{format_name, is_explicit};
use super::step::{calculate_step, format_duration, parse_duration};
use super::QueryBackend;

/// JSON payload of a Prometheus sub-query
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrometheusQueryModel {
    expr: String,
    #[serde(default)]
    range: Option<bool>,
    #[serde(default)]
    instant: Option<bool>,
    #[serde(default)]
    interval: Option<String>,
    #[serde(default)]
    legend_format: Option<String>,
    #[serde(default)]
    exemplar: Option<bool>,
}

#[derive(Debug, Default)]
pub struct PrometheusBackend {
    adjuster: PrometheusAdjuster,
}

impl PrometheusBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueryBackend for PrometheusBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::prometheus()
    }

    fn parse(&self, raw: &RawSubQuery) -> EngineResult<QueryModel> {
        let model: PrometheusQueryModel = serde_json::from_str(raw.payload.get())
            .map_err(|e| EngineError::malformed(raw.ref_id.as_str(), e.to_string()))?;

        if model.expr.trim().is_empty() {
            return Err(EngineError::malformed(raw.ref_id.as_str(), "expr is empty"));
        }

        let explicit_step = match model.interval.as_deref().filter(|s| !s.is_empty()) {
            Some(interval) => Some(parse_duration(interval).ok_or_else(|| {
                EngineError::malformed(
                    raw.ref_id.as_str(),
                    format!("invalid interval '{interval}'"),
                )
            })?),
            None => None,
        };

        // range wins when both are set; neither set means range
        let range = match (model.range.unwrap_or(false), model.instant.unwrap_or(false)) {
            (false, true) => RangeKind::Instant,
            _ => RangeKind::Range,
        };

        Ok(QueryModel::Prometheus(PrometheusQuery {
            expr: model.expr,
            range,
            step: calculate_step(
                explicit_step,
                &raw.time_range,
                raw.max_data_points,
                raw.interval_ms,
            ),
            legend_format: model.legend_format,
            exemplar: model.exemplar.unwrap_or(false),
        }))
    }

    fn adjuster(&self) -> &dyn ResponseAdjuster {
        &self.adjuster
    }
}

/// Adjusts Prometheus's native series frames
#[derive(Debug, Default)]
pub struct PrometheusAdjuster;

impl ResponseAdjuster for PrometheusAdjuster {
    fn adjust(
        &self,
        frame: &mut Frame,
        query: &StructuredQuery,
        options: &ResponseOptions,
    ) -> EngineResult<()> {
        let QueryModel::Prometheus(prom) = &query.model else {
            return Err(EngineError::backend(format!(
                "query '{}' is not a Prometheus query",
                query.ref_id
            )));
        };

        if frame.fields.is_empty() {
            return Ok(());
        }
        let labels = frame
            .value_field()
            .map(|f| f.labels.clone())
            .ok_or_else(|| EngineError::backend("series frame has no value field"))?;

        let legend = prom.legend_format.as_deref();
        let name = format_name(&labels, legend, &prom.expr);

        let meta = frame.meta_mut();
        meta.executed_query_string = Some(format!(
            "Expr: {}\nStep: {}",
            prom.expr,
            format_duration(prom.step)
        ));

        if options.metric_dataplane {
            meta.frame_type = Some(match prom.range {
                RangeKind::Range => FrameType::TimeSeriesMulti,
                RangeKind::Instant => FrameType::NumericMulti,
            });
            meta.type_version = Some([0, 1]);
            frame.name = None;
            if is_explicit(legend) {
                if let Some(value) = frame.value_field_mut() {
                    value.config_mut().display_name_from_ds = Some(name);
                }
            }
        } else {
            frame.name = Some(name.clone());
            if let Some(value) = frame.value_field_mut() {
                value.config_mut().display_name_from_ds = Some(name);
            }
        }

        if prom.range == RangeKind::Range {
            if let Some(time) = frame.time_field_mut() {
                time.config_mut().interval = Some(prom.step.as_millis() as f64);
            }
        }
        Ok(())
    }
}
