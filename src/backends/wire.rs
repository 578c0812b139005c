// SPDX-License-Identifier: Apache-2.0

//! Decoding of the Prometheus-style HTTP API envelope into native frames.
//!
//! Both Loki and Prometheus answer with
//! `{"status": "...", "data": {"resultType": "...", "result": ...}}`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use queryhub_core::{Direction, EngineError, EngineResult, Field, Frame, Labels};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiData {
    result_type: String,
    #[serde(default)]
    result: JsonValue,
}

#[derive(Debug, Deserialize)]
struct MatrixSeries {
    #[serde(default)]
    metric: Labels,
    values: Vec<(f64, String)>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: Labels,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct LogStream {
    #[serde(default)]
    stream: Labels,
    values: Vec<Vec<JsonValue>>,
}

/// Extracts the error message of a failed API call, if the body carries one.
pub fn error_message(body: &[u8]) -> Option<String> {
    let envelope: ApiEnvelope = serde_json::from_slice(body).ok()?;
    match (envelope.error_type, envelope.error) {
        (Some(kind), Some(msg)) => Some(format!("{kind}: {msg}")),
        (None, Some(msg)) => Some(msg),
        _ => None,
    }
}

/// Decodes an API response body into frames in the backend-native shape.
///
/// Log streams are merged into a single frame ordered by `direction`.
pub fn decode_response(body: &[u8], direction: Direction) -> EngineResult<Vec<Frame>> {
    let envelope: ApiEnvelope = serde_json::from_slice(body)
        .map_err(|e| EngineError::backend(format!("failed to decode response: {e}")))?;

    if envelope.status != "success" {
        let message = envelope
            .error
            .unwrap_or_else(|| format!("backend returned status '{}'", envelope.status));
        return Err(EngineError::backend(message));
    }

    let data = envelope
        .data
        .ok_or_else(|| EngineError::backend("response has no data"))?;

    match data.result_type.as_str() {
        "matrix" => {
            let series: Vec<MatrixSeries> = decode_result(data.result)?;
            series.into_iter().map(matrix_frame).collect()
        }
        "vector" => {
            let samples: Vec<VectorSample> = decode_result(data.result)?;
            samples
                .into_iter()
                .map(|s| sample_frame(s.metric, s.value))
                .collect()
        }
        "scalar" => {
            let sample: (f64, String) = decode_result(data.result)?;
            Ok(vec![sample_frame(Labels::new(), sample)?])
        }
        "streams" => {
            let streams: Vec<LogStream> = decode_result(data.result)?;
            Ok(vec![streams_frame(streams, direction)?])
        }
        other => Err(EngineError::backend(format!(
            "unsupported result type '{other}'"
        ))),
    }
}

fn decode_result<T: for<'de> Deserialize<'de>>(result: JsonValue) -> EngineResult<T> {
    serde_json::from_value(result)
        .map_err(|e| EngineError::backend(format!("failed to decode result: {e}")))
}

fn parse_sample_value(raw: &str) -> EngineResult<f64> {
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse::<f64>()
            .map_err(|_| EngineError::backend(format!("invalid sample value '{raw}'"))),
    }
}

fn seconds_to_time(ts: f64) -> EngineResult<DateTime<Utc>> {
    let millis = (ts * 1000.0).round();
    if !millis.is_finite() || millis < i64::MIN as f64 || millis >= i64::MAX as f64 {
        return Err(EngineError::backend(format!("invalid timestamp '{ts}'")));
    }
    DateTime::from_timestamp_millis(millis as i64)
        .ok_or_else(|| EngineError::backend(format!("timestamp out of range: {ts}")))
}

fn matrix_frame(series: MatrixSeries) -> EngineResult<Frame> {
    let mut times = Vec::with_capacity(series.values.len());
    let mut values = Vec::with_capacity(series.values.len());
    for (ts, raw) in &series.values {
        times.push(seconds_to_time(*ts)?);
        values.push(parse_sample_value(raw)?);
    }

    Ok(Frame::new(vec![
        Field::time("Time", times),
        Field::float("Value", values).with_labels(series.metric),
    ]))
}

fn sample_frame(labels: Labels, (ts, raw): (f64, String)) -> EngineResult<Frame> {
    Ok(Frame::new(vec![
        Field::time("Time", vec![seconds_to_time(ts)?]),
        Field::float("Value", vec![parse_sample_value(&raw)?]).with_labels(labels),
    ]))
}

struct LogRow {
    ts_ns: i64,
    line: String,
    labels: JsonValue,
}

fn streams_frame(streams: Vec<LogStream>, direction: Direction) -> EngineResult<Frame> {
    let mut rows = Vec::new();
    for stream in streams {
        for entry in stream.values {
            rows.push(log_row(&stream.stream, entry)?);
        }
    }

    // stable sort keeps stream order for identical timestamps
    match direction {
        Direction::Forward => rows.sort_by_key(|r| r.ts_ns),
        Direction::Backward => rows.sort_by_key(|r| std::cmp::Reverse(r.ts_ns)),
    }

    let mut labels = Vec::with_capacity(rows.len());
    let mut times = Vec::with_capacity(rows.len());
    let mut lines = Vec::with_capacity(rows.len());
    let mut ts_ns = Vec::with_capacity(rows.len());
    for row in rows {
        labels.push(row.labels);
        times.push(DateTime::from_timestamp_nanos(row.ts_ns));
        lines.push(row.line);
        ts_ns.push(row.ts_ns.to_string());
    }

    Ok(Frame::new(vec![
        Field::json("labels", labels),
        Field::time("Time", times),
        Field::string("Line", lines),
        Field::string("tsNs", ts_ns),
    ]))
}

/// One `[ts, line]` or `[ts, line, {structured metadata}]` entry.
fn log_row(stream_labels: &Labels, entry: Vec<JsonValue>) -> EngineResult<LogRow> {
    let mut parts = entry.into_iter();
    let ts_ns = parts
        .next()
        .and_then(|v| v.as_str().and_then(|s| s.parse::<i64>().ok()))
        .ok_or_else(|| EngineError::backend("log entry has an invalid timestamp"))?;
    let line = match parts.next() {
        Some(JsonValue::String(line)) => line,
        _ => return Err(EngineError::backend("log entry has no line")),
    };

    let mut labels = json!(stream_labels);
    if let (Some(JsonValue::Object(extra)), Some(obj)) = (parts.next(), labels.as_object_mut()) {
        for (key, value) in flatten_metadata(extra) {
            obj.insert(key, value);
        }
    }

    Ok(LogRow { ts_ns, line, labels })
}

/// Structured metadata arrives either flat or categorized
/// (`{"structuredMetadata": {...}, "parsed": {...}}`).
fn flatten_metadata(extra: serde_json::Map<String, JsonValue>) -> Vec<(String, JsonValue)> {
    let mut out = Vec::new();
    for (key, value) in extra {
        match value {
            JsonValue::Object(nested) => out.extend(nested),
            other => out.push((key, other)),
        }
    }
    out
}
