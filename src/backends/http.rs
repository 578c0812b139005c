// SPDX-License-Identifier: Apache-2.0

//! HTTP client for Loki and Prometheus query APIs.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::header::CONTENT_ENCODING;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, instrument};
use url::Url;

use queryhub_core::{
    BackendClient, BackendKind, Direction, EngineError, EngineResult, Frame, QueryModel,
    RangeKind, RawResponse, StructuredQuery,
};

use super::wire::{decode_response, error_message};

/// Header asking Loki 3+ to return structured metadata separately from stream labels
const LOKI_ENCODING_FLAGS_HEADER: &str = "X-Loki-Response-Encoding-Flags";
const LOKI_CATEGORIZE_LABELS: &str = "categorize-labels";

/// Longest body excerpt quoted in an error message
const ERROR_BODY_EXCERPT: usize = 256;

/// Client for one Loki or Prometheus instance
#[derive(Debug, Clone)]
pub struct HttpBackendClient {
    client: Client,
    base_url: String,
    kind: BackendKind,
    /// Maximum body size in bytes (0 = unlimited)
    response_limit_bytes: u64,
    structured_metadata: bool,
}

impl HttpBackendClient {
    pub fn new(kind: BackendKind, base_url: &str) -> EngineResult<Self> {
        Url::parse(base_url)
            .map_err(|e| EngineError::config(format!("invalid URL '{base_url}': {e}")))?;

        Ok(Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            kind,
            response_limit_bytes: 0,
            structured_metadata: false,
        })
    }

    /// Uses a preconfigured transport (timeouts, proxies, TLS)
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_response_limit(mut self, limit_bytes: u64) -> Self {
        self.response_limit_bytes = limit_bytes;
        self
    }

    pub fn with_structured_metadata(mut self, enabled: bool) -> Self {
        self.structured_metadata = enabled;
        self
    }

    pub fn kind(&self) -> &BackendKind {
        &self.kind
    }

    fn endpoint(&self, path: &str) -> EngineResult<Url> {
        let raw = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        Url::parse(&raw).map_err(|e| EngineError::backend(format!("invalid URL '{raw}': {e}")))
    }

    /// Builds the request URL for a structured query.
    fn query_url(&self, query: &StructuredQuery) -> EngineResult<(Url, Direction)> {
        let range = &query.time_range;
        match &query.model {
            QueryModel::Loki(loki) => {
                let limit = loki.max_lines.to_string();
                let direction = loki.direction.as_str();
                let (path, params) = match loki.range {
                    RangeKind::Range => (
                        "loki/api/v1/query_range",
                        vec![
                            ("query", loki.expr.clone()),
                            ("start", unix_nanos(range.from)?),
                            ("end", unix_nanos(range.to)?),
                            ("step", seconds(loki.step.as_secs_f64())),
                            ("limit", limit),
                            ("direction", direction.to_string()),
                        ],
                    ),
                    RangeKind::Instant => (
                        "loki/api/v1/query",
                        vec![
                            ("query", loki.expr.clone()),
                            ("time", unix_nanos(range.to)?),
                            ("limit", limit),
                            ("direction", direction.to_string()),
                        ],
                    ),
                };
                let mut url = self.endpoint(path)?;
                url.query_pairs_mut().extend_pairs(params);
                Ok((url, loki.direction))
            }
            QueryModel::Prometheus(prom) => {
                let (path, params) = match prom.range {
                    RangeKind::Range => (
                        "api/v1/query_range",
                        vec![
                            ("query", prom.expr.clone()),
                            ("start", unix_seconds(range.from)),
                            ("end", unix_seconds(range.to)),
                            ("step", seconds(prom.step.as_secs_f64())),
                        ],
                    ),
                    RangeKind::Instant => (
                        "api/v1/query",
                        vec![("query", prom.expr.clone()), ("time", unix_seconds(range.to))],
                    ),
                };
                let mut url = self.endpoint(path)?;
                url.query_pairs_mut().extend_pairs(params);
                Ok((url, Direction::Forward))
            }
            QueryModel::Expression(_) => Err(EngineError::backend(format!(
                "expression query '{}' cannot be sent to {}",
                query.ref_id, self.kind
            ))),
        }
    }

    async fn get(&self, url: Url, categorize_labels: bool) -> EngineResult<(StatusCode, Option<String>, Bytes)> {
        let mut request = self.client.get(url.clone());
        if categorize_labels {
            request = request.header(LOKI_ENCODING_FLAGS_HEADER, LOKI_CATEGORIZE_LABELS);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::connection_failed(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let encoding = response
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_body(response, self.response_limit_bytes).await?;
        Ok((status, encoding, body))
    }
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    #[instrument(skip(self, query), fields(ref_id = %query.ref_id))]
    async fn query(&self, query: &StructuredQuery) -> EngineResult<Vec<Frame>> {
        let (url, direction) = self.query_url(query)?;
        let categorize = self.structured_metadata && self.kind.as_str() == BackendKind::LOKI;

        let (status, _, body) = self.get(url, categorize).await?;
        debug!(kind = %self.kind, status = status.as_u16(), bytes = body.len(), "Backend responded");

        if !status.is_success() {
            let message = error_message(&body).unwrap_or_else(|| body_excerpt(&body));
            return Err(EngineError::backend(format!("{status}: {message}")));
        }
        decode_response(&body, direction)
    }

    #[instrument(skip(self))]
    async fn raw_get(&self, path: &str) -> EngineResult<RawResponse> {
        let url = self.endpoint(path)?;
        let (status, encoding, body) = self.get(url, false).await?;
        Ok(RawResponse {
            status: status.as_u16(),
            encoding,
            body,
        })
    }
}

/// Reads a body, failing once it grows past `limit` bytes (0 = unlimited).
async fn read_body(response: Response, limit: u64) -> EngineResult<Bytes> {
    if limit == 0 || response.status() == StatusCode::SWITCHING_PROTOCOLS {
        return response
            .bytes()
            .await
            .map_err(|e| EngineError::connection_failed(format!("failed to read body: {e}")));
    }
    if response.content_length().is_some_and(|len| len > limit) {
        return Err(EngineError::ResponseTooLarge { limit_bytes: limit });
    }

    let mut body = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk =
            chunk.map_err(|e| EngineError::connection_failed(format!("failed to read body: {e}")))?;
        if (body.len() + chunk.len()) as u64 > limit {
            return Err(EngineError::ResponseTooLarge { limit_bytes: limit });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let trimmed = text.trim();
    match trimmed.char_indices().nth(ERROR_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn unix_nanos(time: DateTime<Utc>) -> EngineResult<String> {
    time.timestamp_nanos_opt()
        .map(|ns| ns.to_string())
        .ok_or_else(|| EngineError::backend(format!("timestamp {time} cannot be expressed in nanoseconds")))
}

fn unix_seconds(time: DateTime<Utc>) -> String {
    seconds(time.timestamp_millis() as f64 / 1000.0)
}

fn seconds(value: f64) -> String {
    format!("{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use queryhub_core::{DataSourceRef, LokiQuery, PrometheusQuery, RefId, TimeRange};
    use std::time::Duration;

    fn time_range() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap(),
        )
    }

    fn query(model: QueryModel, kind: &str) -> StructuredQuery {
        StructuredQuery {
            ref_id: RefId::from("A"),
            datasource: DataSourceRef::new("ds", kind),
            time_range: time_range(),
            model,
        }
    }

    #[test]
    fn builds_loki_range_url() {
        let client = HttpBackendClient::new(BackendKind::loki(), "http://loki:3100/").unwrap();
        let q = query(
            QueryModel::Loki(LokiQuery {
                expr: "{app=\"api\"}".to_string(),
                range: RangeKind::Range,
                direction: Direction::Backward,
                max_lines: 100,
                step: Duration::from_secs(15),
                legend_format: None,
                supporting_query_type: None,
            }),
            "loki",
        );

        let (url, direction) = client.query_url(&q).unwrap();
        assert_eq!(url.path(), "/loki/api/v1/query_range");
        assert_eq!(direction, Direction::Backward);
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("start".into(), "1704067200000000000".into())));
        assert!(pairs.contains(&("step".into(), "15".into())));
        assert!(pairs.contains(&("limit".into(), "100".into())));
        assert!(pairs.contains(&("direction".into(), "backward".into())));
    }

    #[test]
    fn builds_prometheus_instant_url() {
        let client = HttpBackendClient::new(BackendKind::prometheus(), "http://prom:9090").unwrap();
        let q = query(
            QueryModel::Prometheus(PrometheusQuery {
                expr: "up".to_string(),
                range: RangeKind::Instant,
                step: Duration::from_secs(15),
                legend_format: None,
                exemplar: false,
            }),
            "prometheus",
        );

        let (url, _) = client.query_url(&q).unwrap();
        assert_eq!(url.path(), "/api/v1/query");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("query".to_string(), "up".to_string()),
                ("time".to_string(), "1704070800".to_string()),
            ]
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = HttpBackendClient::new(BackendKind::loki(), "not a url").unwrap_err();
        assert!(matches!(err, EngineError::Config { .. }));
    }

    #[test]
    fn long_bodies_are_truncated_in_errors() {
        let body = "x".repeat(1000);
        let excerpt = body_excerpt(body.as_bytes());
        assert_eq!(excerpt.len(), ERROR_BODY_EXCERPT + 3);
    }
}
