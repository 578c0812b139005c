use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use queryhub::backends::{BackendRegistry, QueryBackend};
use queryhub::config::ServiceConfig;
use queryhub_core::{
    BackendClient, BackendKind, DataSourceInstance, DataSourceRef, EngineError, EngineResult,
    ExecutionMode, FailureKind, Field, Frame, InstanceResolver, Labels, PrometheusQuery,
    QueryModel, QueryResult, RangeKind, RawSubQuery, ResponseAdjuster, ResponseOptions,
    StructuredQuery,
};
use queryhub::federation::{parse_request, partition, QueryRequest, ValidationHints};
use queryhub::QueryService;

/// Deterministic backend client that counts its calls
#[derive(Default)]
struct FakeClient {
    calls: AtomicUsize,
    completed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    fail_all: bool,
    fail_ref: Option<&'static str>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl FakeClient {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendClient for FakeClient {
    async fn query(&self, query: &StructuredQuery) -> EngineResult<Vec<Frame>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, token)) = &self.cancel_after {
            if done == *after {
                token.cancel();
            }
        }

        if self.fail_all || self.fail_ref == Some(query.ref_id.as_str()) {
            return Err(EngineError::backend("upstream returned 500"));
        }
        Ok(vec![Frame::new(vec![
            Field::time("Time", vec![Utc.timestamp_opt(1_700_000_000, 0).unwrap()]),
            Field::float("Value", vec![1.0]).with_labels(Labels::from([(
                "ref".to_string(),
                query.ref_id.to_string(),
            )])),
        ])])
    }
}

/// Maps datasource uids to fake clients
#[derive(Default)]
struct FakeResolver {
    clients: HashMap<String, Arc<FakeClient>>,
}

impl FakeResolver {
    fn with(mut self, uid: &str, client: Arc<FakeClient>) -> Self {
        self.clients.insert(uid.to_string(), client);
        self
    }
}

#[async_trait]
impl InstanceResolver for FakeResolver {
    async fn resolve(&self, datasource: &DataSourceRef) -> EngineResult<DataSourceInstance> {
        let client = self
            .clients
            .get(&datasource.uid)
            .ok_or_else(|| EngineError::datasource_not_found(datasource.uid.clone()))?;
        Ok(DataSourceInstance {
            uid: datasource.uid.clone(),
            kind: datasource.kind.clone(),
            url: format!("http://{}", datasource.uid),
            client: client.clone(),
            structured_metadata: false,
        })
    }
}

struct PassThrough;

impl ResponseAdjuster for PassThrough {
    fn adjust(&self, _: &mut Frame, _: &StructuredQuery, _: &ResponseOptions) -> EngineResult<()> {
        Ok(())
    }
}

/// Minimal backend kind used to exercise registry dispatch
struct FakeBackend {
    kind: &'static str,
}

#[derive(Deserialize)]
struct FakePayload {
    expr: String,
}

#[async_trait]
impl QueryBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::new(self.kind)
    }

    fn parse(&self, raw: &RawSubQuery) -> EngineResult<QueryModel> {
        let payload: FakePayload = serde_json::from_str(raw.payload.get())
            .map_err(|e| EngineError::malformed(raw.ref_id.as_str(), e.to_string()))?;
        Ok(QueryModel::Prometheus(PrometheusQuery {
            expr: payload.expr,
            range: RangeKind::Range,
            step: Duration::from_secs(15),
            legend_format: None,
            exemplar: false,
        }))
    }

    fn adjuster(&self) -> &dyn ResponseAdjuster {
        &PassThrough
    }
}

fn sub_query(ref_id: &str, uid: &str, kind: &str, payload: serde_json::Value) -> RawSubQuery {
    let raw = json!({
        "refId": ref_id,
        "datasource": {"uid": uid, "type": kind},
        "timeRange": {"from": "2024-01-01T00:00:00Z", "to": "2024-01-01T01:00:00Z"},
        "payload": payload,
    });
    serde_json::from_str(&raw.to_string()).unwrap()
}

fn prom(ref_id: &str) -> RawSubQuery {
    sub_query(ref_id, "prom-1", "prometheus", json!({"expr": "up"}))
}

fn request(ids: &[&str], mode: ExecutionMode) -> QueryRequest {
    let mut request = QueryRequest::new(ids.iter().map(|id| prom(id)).collect());
    request.mode = Some(mode);
    request
}

fn service(client: Arc<FakeClient>) -> QueryService {
    QueryService::new(
        Arc::new(BackendRegistry::with_defaults()),
        Arc::new(FakeResolver::default().with("prom-1", client)),
    )
}

const MODES: [ExecutionMode; 2] = [
    ExecutionMode::Sequential,
    ExecutionMode::Concurrent { limit: 4 },
];

const TEN: [&str; 10] = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];

#[tokio::test]
async fn one_entry_per_distinct_query() {
    for mode in MODES {
        let client = Arc::new(FakeClient::default());
        let map = service(client.clone())
            .execute(request(&TEN, mode), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(map.len(), 10);
        for id in TEN {
            assert!(map.get(id).unwrap().is_success(), "{id} should succeed");
        }
        assert_eq!(client.calls(), 10);
    }
}

#[tokio::test]
async fn duplicate_identifier_rejects_request_without_backend_calls() {
    for mode in MODES {
        let client = Arc::new(FakeClient::default());
        let err = service(client.clone())
            .execute(request(&["A", "B", "A"], mode), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, EngineError::duplicate_ref_id("A"));
        assert_eq!(client.calls(), 0);
    }
}

#[tokio::test]
async fn responses_are_identical_across_runs_and_modes() {
    let mut encoded = Vec::new();
    for mode in MODES {
        for _ in 0..2 {
            let map = service(Arc::new(FakeClient::default()))
                .execute(request(&TEN, mode), CancellationToken::new())
                .await
                .unwrap();
            encoded.push(serde_json::to_string(&map).unwrap());
        }
    }
    assert!(encoded.windows(2).all(|pair| pair[0] == pair[1]));
}

#[tokio::test]
async fn one_failing_call_only_fails_its_own_query() {
    let mut outcomes = Vec::new();
    for mode in MODES {
        let client = Arc::new(FakeClient {
            fail_ref: Some("C"),
            ..FakeClient::default()
        });
        let map = service(client)
            .execute(request(&["A", "B", "C", "D"], mode), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(map.success_count(), 3);
        assert_eq!(map.failure_count(FailureKind::BackendFailure), 1);
        assert_eq!(map.get("C").unwrap().failure_kind(), Some(FailureKind::BackendFailure));

        let kinds: Vec<(String, Option<FailureKind>)> = map
            .iter()
            .map(|(id, result)| (id.to_string(), result.failure_kind()))
            .collect();
        outcomes.push(kinds);
    }
    assert_eq!(outcomes[0], outcomes[1]);
}

#[tokio::test]
async fn malformed_payload_is_reported_alongside_successes() {
    let client = Arc::new(FakeClient::default());
    let request = QueryRequest::new(vec![
        prom("A"),
        sub_query("B", "prom-1", "prometheus", json!({"expr": ["not", "a", "string"]})),
    ]);
    let map = service(client.clone())
        .execute(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.len(), 2);
    assert!(map.get("A").unwrap().is_success());
    assert_eq!(map.get("B").unwrap().failure_kind(), Some(FailureKind::MalformedQuery));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn overflowing_step_fails_only_its_own_query() {
    let client = Arc::new(FakeClient::default());
    let request = QueryRequest::new(vec![
        prom("A"),
        sub_query("B", "prom-1", "prometheus", json!({"expr": "up", "interval": "1e30"})),
        sub_query(
            "C",
            "prom-1",
            "prometheus",
            json!({"expr": "up", "interval": "18446744073709551615s1s"}),
        ),
    ]);
    let map = service(client.clone())
        .execute(request, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.len(), 3);
    assert!(map.get("A").unwrap().is_success());
    assert_eq!(map.get("B").unwrap().failure_kind(), Some(FailureKind::MalformedQuery));
    assert_eq!(map.get("C").unwrap().failure_kind(), Some(FailureKind::MalformedQuery));
    assert_eq!(client.calls(), 1);
}

#[tokio::test]
async fn hint_mismatch_rejects_request_without_backend_calls() {
    let client = Arc::new(FakeClient::default());
    let mut request = QueryRequest::new(vec![prom("A"), prom("B")]);
    request.hints = Some(ValidationHints {
        plugin_ids: vec!["loki".to_string()],
        ..ValidationHints::default()
    });

    let err = service(client.clone())
        .execute(request, CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::QueryParameterMismatch { .. }), "{err:?}");
    assert_eq!(client.calls(), 0);
}

#[test]
fn partition_groups_by_kind_in_request_order() {
    let registry = BackendRegistry::with_defaults();
    let raws = vec![
        sub_query("A1", "loki-1", "loki", json!({"expr": "{app=\"a\"}"})),
        sub_query("B1", "prom-1", "prometheus", json!({"expr": "up"})),
        sub_query("A2", "loki-2", "loki", json!({"expr": "{app=\"b\"}"})),
    ];
    let partitioned = partition(parse_request(&raws, &registry));

    let loki: Vec<&str> = partitioned
        .bucket(&BackendKind::loki())
        .unwrap()
        .iter()
        .map(|q| q.ref_id.as_str())
        .collect();
    assert_eq!(loki, vec!["A1", "A2"]);

    let prometheus = partitioned.bucket(&BackendKind::prometheus()).unwrap();
    assert_eq!(prometheus.len(), 1);
    assert_eq!(prometheus[0].ref_id.as_str(), "B1");
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_bounds_calls_in_flight() {
    let delay = Duration::from_millis(100);
    let client = Arc::new(FakeClient {
        delay,
        ..FakeClient::default()
    });

    let start = tokio::time::Instant::now();
    let map = service(client.clone())
        .execute(
            request(&TEN, ExecutionMode::Concurrent { limit: 2 }),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert_eq!(map.success_count(), 10);
    assert_eq!(client.max_in_flight.load(Ordering::SeqCst), 2);
    assert!(elapsed >= delay * 5, "finished too early: {elapsed:?}");
    assert!(elapsed < delay * 6, "finished too late: {elapsed:?}");
}

#[tokio::test]
async fn cancellation_after_three_completions_cancels_the_rest() {
    for mode in [ExecutionMode::Sequential, ExecutionMode::Concurrent { limit: 1 }] {
        let cancel = CancellationToken::new();
        let client = Arc::new(FakeClient {
            cancel_after: Some((3, cancel.clone())),
            ..FakeClient::default()
        });

        let map = service(client.clone())
            .execute(request(&TEN, mode), cancel)
            .await
            .unwrap();

        assert_eq!(map.len(), 10);
        assert_eq!(map.success_count(), 3);
        assert_eq!(map.failure_count(FailureKind::Cancelled), 7);
        assert_eq!(client.calls(), 3);
    }
}

#[tokio::test]
async fn failing_backend_kind_is_isolated_from_succeeding_one() {
    let mut registry = BackendRegistry::new();
    registry.register(Arc::new(FakeBackend { kind: "x" }));
    registry.register(Arc::new(FakeBackend { kind: "y" }));

    let resolver = FakeResolver::default()
        .with("x-1", Arc::new(FakeClient::default()))
        .with(
            "y-1",
            Arc::new(FakeClient {
                fail_all: true,
                ..FakeClient::default()
            }),
        );
    let service = QueryService::new(Arc::new(registry), Arc::new(resolver));

    let request = QueryRequest::new(vec![
        sub_query("A", "x-1", "x", json!({"expr": "sum"})),
        sub_query("B", "y-1", "y", json!({"expr": "sum"})),
    ]);
    let map = service.execute(request, CancellationToken::new()).await.unwrap();

    assert_eq!(map.len(), 2);
    let frames = map.get("A").unwrap().frames().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(map.get("B").unwrap().failure_kind(), Some(FailureKind::BackendFailure));
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_calls_are_in_flight() {
    let client = Arc::new(FakeClient {
        delay: Duration::from_millis(100),
        ..FakeClient::default()
    });
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let map = service(client.clone())
        .execute(request(&TEN, ExecutionMode::Concurrent { limit: 4 }), cancel)
        .await
        .unwrap();

    assert_eq!(map.len(), 10);
    assert_eq!(map.success_count(), 4);
    assert_eq!(map.failure_count(FailureKind::Cancelled), 6);
    // the second wave of four was started and then abandoned
    assert_eq!(client.calls(), 8);
    for id in ["E", "F", "G", "H", "I", "J"] {
        assert_eq!(map.get(id).unwrap().failure_kind(), Some(FailureKind::Cancelled), "{id}");
    }
}

#[tokio::test(start_paused = true)]
async fn dispatch_deadline_cancels_unfinished_queries() {
    let client = Arc::new(FakeClient {
        delay: Duration::from_millis(100),
        ..FakeClient::default()
    });
    let service = service(client.clone()).with_defaults_from(&ServiceConfig {
        concurrency_limit: 2,
        dispatch_timeout_ms: Some(150),
        ..ServiceConfig::default()
    });

    let map = service
        .execute(QueryRequest::new(TEN.iter().map(|id| prom(id)).collect()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(map.len(), 10);
    assert_eq!(map.success_count(), 2);
    assert_eq!(map.failure_count(FailureKind::Cancelled), 8);
    for id in ["C", "D", "E", "F", "G", "H", "I", "J"] {
        match map.get(id).unwrap() {
            QueryResult::Failure { error } => {
                assert_eq!(error.kind, FailureKind::Cancelled);
                assert_eq!(error.message, "dispatch deadline exceeded");
            }
            other => panic!("{id}: expected a cancellation, got {other:?}"),
        }
    }
}
