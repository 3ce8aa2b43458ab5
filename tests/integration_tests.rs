//! Integration tests using mock HTTP server
//!
//! Tests the full end-to-end flow: settings → HTTP pages → upserted records and checkpoints

use cursor_harvest::database::DuckDbStore;
use cursor_harvest::decode::{PageDecoder, RecordKey, RecordMapper};
use cursor_harvest::engine::{HarvestConfig, HarvestStatus, Harvester};
use cursor_harvest::http::{
    Credentials, HttpClientConfig, HttpPageFetcher, RateLimiter, RateLimiterConfig,
    RetryController, RetryPolicy,
};
use cursor_harvest::sink::{MemoryRecordSink, RecordSink};
use cursor_harvest::state::{CheckpointStore, JsonFileCheckpointStore};
use cursor_harvest::types::BackoffType;
use cursor_harvest::{FetchError, HarvestSettings};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ============================================================================
// Helpers
// ============================================================================

fn person(id: &str, org: &str) -> serde_json::Value {
    json!({"personId": id, "name": format!("Person {id}"), "currentOrg": {"orgId": org}})
}

fn page(ids: &[&str], org: &str, next: Option<&str>) -> ResponseTemplate {
    let items: Vec<_> = ids.iter().map(|id| person(id, org)).collect();
    ResponseTemplate::new(200).set_body_json(json!({"items": items, "next_cursor": next}))
}

/// Mount org-1: three pages of two people, cursors null -> c1 -> c2 -> null
async fn mount_org1(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param_is_missing("after"))
        .respond_with(page(&["p1", "p2"], "org-1", Some("c1")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c1"))
        .respond_with(page(&["p3", "p4"], "org-1", Some("c2")))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c2"))
        .respond_with(page(&["p5", "p6"], "org-1", None))
        .mount(server)
        .await;
}

fn mapper() -> RecordMapper {
    RecordMapper::new("personId")
}

fn fetcher(server: &MockServer) -> HttpPageFetcher {
    let config = HttpClientConfig::builder()
        .base_url(server.uri())
        .credentials(Credentials::bearer("test-token"))
        .timeout(Duration::from_secs(5))
        .build();
    HttpPageFetcher::new(config, PageDecoder::new(), mapper()).unwrap()
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new().with_max_attempts(max_attempts).with_backoff(
        BackoffType::Constant,
        Duration::from_millis(5),
        Duration::from_millis(5),
    )
}

fn harvester(
    server: &MockServer,
    checkpoints: Arc<dyn CheckpointStore>,
    sink: Arc<dyn RecordSink>,
    policy: RetryPolicy,
) -> Harvester {
    let limiter = RateLimiter::new(&RateLimiterConfig::new(Duration::from_millis(1)));
    let retry = RetryController::new(Arc::new(fetcher(server)), limiter, policy);
    Harvester::new(retry, checkpoints, sink)
}

fn requests_with_cursor(requests: &[Request], cursor: &str) -> usize {
    requests
        .iter()
        .filter(|r| r.url.query_pairs().any(|(k, v)| k == "after" && v == cursor))
        .count()
}

// ============================================================================
// End-to-End Harvests
// ============================================================================

#[tokio::test]
async fn test_full_harvest_into_duckdb() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("Authorization", "Bearer test-token"))
        .and(path("/collection/org-1/items"))
        .and(query_param_is_missing("after"))
        .respond_with(page(&["p1", "p2"], "org-1", Some("c1")))
        .expect(1)
        .mount(&server)
        .await;
    mount_org1(&server).await;

    let dir = TempDir::new().unwrap();
    let store = Arc::new(DuckDbStore::open(dir.path().join("harvest.duckdb")).unwrap());
    let harvester = harvester(&server, store.clone(), store.clone(), RetryPolicy::new());

    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, HarvestStatus::Completed);
    assert_eq!(report.stats.pages_fetched, 3);
    assert_eq!(report.stats.records_inserted, 6);
    assert_eq!(store.count(Some("org-1")).await.unwrap(), 6);

    let checkpoint = store.load("org-1").await.unwrap();
    assert!(checkpoint.is_complete);

    let stored = store
        .get(&RecordKey::new("p3", "org-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payload["name"], "Person p3");

    // Completed collections short-circuit without touching the network
    let before = server.received_requests().await.unwrap().len();
    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, HarvestStatus::AlreadyComplete);
    assert_eq!(server.received_requests().await.unwrap().len(), before);
}

#[tokio::test]
async fn test_interrupted_harvest_resumes_from_checkpoint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param_is_missing("after"))
        .respond_with(page(&["p1", "p2"], "org-1", Some("c1")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c1"))
        .respond_with(page(&["p3", "p4"], "org-1", Some("c2")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c2"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("harvest.duckdb");

    {
        let store = Arc::new(DuckDbStore::open(&db).unwrap());
        let harvester = harvester(&server, store.clone(), store.clone(), fast_policy(2));
        let err = harvester
            .harvest("org-1", &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.collection_id(), Some("org-1"));
        assert!(matches!(
            err.fetch_error(),
            Some(FetchError::RetriesExhausted { attempts: 2, .. })
        ));
        assert_eq!(store.count(None).await.unwrap(), 4);
    }

    // Upstream recovers; a new process picks up at c2
    server.reset().await;
    mount_org1(&server).await;

    let store = Arc::new(DuckDbStore::open(&db).unwrap());
    assert_eq!(
        store.load("org-1").await.unwrap().cursor.as_deref(),
        Some("c2")
    );
    let harvester = harvester(&server, store.clone(), store.clone(), fast_policy(2));
    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, HarvestStatus::Completed);
    assert_eq!(report.stats.pages_fetched, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests_with_cursor(&requests, "c2"), 1);
    assert_eq!(store.count(None).await.unwrap(), 6);
}

#[tokio::test]
async fn test_rate_limited_page_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mount_org1(&server).await;

    let sink = Arc::new(MemoryRecordSink::new());
    let checkpoints = Arc::new(cursor_harvest::state::MemoryCheckpointStore::new());
    let harvester = harvester(&server, checkpoints.clone(), sink.clone(), fast_policy(5));

    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.pages_fetched, 3);
    assert_eq!(sink.count(None).await.unwrap(), 6);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_with_cursor(&requests, "c1"), 3);
    assert_eq!(requests_with_cursor(&requests, "c2"), 1);
}

#[tokio::test]
async fn test_auth_failure_stops_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token expired"))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(DuckDbStore::in_memory().unwrap());
    let harvester = harvester(&server, store.clone(), store.clone(), fast_policy(5));

    let err = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err.fetch_error(),
        Some(FetchError::FatalAuth { status: 401, .. })
    ));
    assert!(!err.is_payment_required());

    let checkpoint = store.load("org-1").await.unwrap();
    assert!(checkpoint.is_fresh());
    assert_eq!(store.count(None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_payment_required_mid_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c1"))
        .respond_with(ResponseTemplate::new(402).set_body_string("subscription lapsed"))
        .mount(&server)
        .await;
    mount_org1(&server).await;

    let store = Arc::new(DuckDbStore::in_memory().unwrap());
    let harvester = harvester(&server, store.clone(), store.clone(), fast_policy(5));

    let err = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_payment_required());
    assert_eq!(
        store.load("org-1").await.unwrap().cursor.as_deref(),
        Some("c1")
    );
    assert_eq!(store.count(None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_json_file_checkpoints_survive_restart() {
    let server = MockServer::start().await;
    mount_org1(&server).await;

    let dir = TempDir::new().unwrap();
    let checkpoint_file = dir.path().join("checkpoints.json");
    let sink = Arc::new(MemoryRecordSink::new());

    {
        let checkpoints = Arc::new(JsonFileCheckpointStore::open(&checkpoint_file).await.unwrap());
        let harvester = harvester(&server, checkpoints, sink.clone(), RetryPolicy::new())
            .with_config(HarvestConfig::new().with_max_pages(1));
        assert!(harvester
            .harvest("org-1", &CancellationToken::new())
            .await
            .is_err());
    }

    let checkpoints = Arc::new(JsonFileCheckpointStore::open(&checkpoint_file).await.unwrap());
    assert_eq!(
        checkpoints.load("org-1").await.unwrap().cursor.as_deref(),
        Some("c1")
    );

    let harvester = harvester(&server, checkpoints.clone(), sink.clone(), RetryPolicy::new());
    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.pages_fetched, 2);
    assert_eq!(sink.count(None).await.unwrap(), 6);
    assert!(checkpoints.load("org-1").await.unwrap().is_complete);
}

#[tokio::test]
async fn test_harvest_all_collections_into_one_database() {
    let server = MockServer::start().await;
    mount_org1(&server).await;
    Mock::given(method("GET"))
        .and(path("/collection/org-2/items"))
        .respond_with(page(&["p1", "q1"], "org-2", None))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collection/gone/items"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let store = Arc::new(DuckDbStore::in_memory().unwrap());
    let harvester = harvester(&server, store.clone(), store.clone(), fast_policy(3))
        .with_config(HarvestConfig::new().with_concurrency(3));

    let outcomes = harvester
        .harvest_all(["org-1", "org-2", "gone"], &CancellationToken::new())
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_ok());
    let err = outcomes[2].result.as_ref().unwrap_err();
    assert!(matches!(
        err.fetch_error(),
        Some(FetchError::FatalNotFound { .. })
    ));

    // p1 exists in both collections as two distinct rows
    assert_eq!(store.count(Some("org-1")).await.unwrap(), 6);
    assert_eq!(store.count(Some("org-2")).await.unwrap(), 2);
    assert_eq!(store.count(None).await.unwrap(), 8);
}

// ============================================================================
// Settings-Driven Harvests
// ============================================================================

#[tokio::test]
async fn test_settings_with_link_cursor_and_field_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/orgs/org-1/people"))
        .and(header("X-Api-Key", "secret"))
        .and(query_param("limit", "2"))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"people": [person("p1", "org-1"), {"name": "no key"}]},
            "links": {"next": "/v2/orgs/org-1/people?limit=2&cursor=abc"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v2/orgs/org-1/people"))
        .and(query_param("cursor", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"people": [person("p2", "org-1")]},
            "links": {"next": null}
        })))
        .mount(&server)
        .await;

    let yaml = format!(
        r"
api:
  base_url: {}/v2
  path_template: /orgs/{{id}}/people
  cursor_param: cursor
  page_size_param: limit
  page_size: 2
auth:
  header: X-Api-Key
  scheme: raw
  token: secret
rate_limit:
  interval_ms: 1
response:
  items_path: data.people
  next_cursor_path: links.next
  next_cursor_format: link
  cursor_param: cursor
records:
  key_field: personId
  fields:
    - column: name
    - column: org_id
      path: currentOrg.orgId
",
        server.uri()
    );
    let settings = HarvestSettings::from_yaml_str(&yaml).unwrap();

    let fetcher = HttpPageFetcher::new(
        settings.http_client_config(None),
        settings.page_decoder(),
        settings.record_mapper(),
    )
    .unwrap();
    let retry = RetryController::new(
        Arc::new(fetcher),
        RateLimiter::new(&settings.rate_limiter_config()),
        settings.retry_policy(),
    );
    let store = Arc::new(DuckDbStore::in_memory().unwrap());
    let harvester = Harvester::new(retry, store.clone(), store.clone())
        .with_config(settings.harvest_config());

    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.pages_fetched, 2);
    assert_eq!(report.stats.records_skipped, 1);

    let records = store.records("org-1").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].field("name"), Some(&json!("Person p1")));
    assert_eq!(records[0].field("org_id"), Some(&json!("org-1")));

    let checkpoint = store.load("org-1").await.unwrap();
    assert!(checkpoint.is_complete);
    assert_eq!(checkpoint.cursor.as_deref(), Some("abc"));
}

#[tokio::test]
async fn test_empty_next_link_completes_collection() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param_is_missing("after"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [person("p1", "org-1")],
            "paging": {"_links": {"next": "/collection/org-1/items?after=c1"}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/collection/org-1/items"))
        .and(query_param("after", "c1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [person("p2", "org-1")],
            "paging": {"_links": {"next": ""}}
        })))
        .mount(&server)
        .await;

    let decoder = PageDecoder::new()
        .with_next_cursor_path("paging._links.next")
        .with_link_cursor("after");
    let config = HttpClientConfig::builder().base_url(server.uri()).build();
    let fetcher = HttpPageFetcher::new(config, decoder, mapper()).unwrap();
    let retry = RetryController::new(
        Arc::new(fetcher),
        RateLimiter::new(&RateLimiterConfig::new(Duration::from_millis(1))),
        fast_policy(1),
    );
    let store = Arc::new(DuckDbStore::in_memory().unwrap());
    let harvester = Harvester::new(retry, store.clone(), store.clone());

    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, HarvestStatus::Completed);
    assert_eq!(report.stats.pages_fetched, 2);

    let checkpoint = store.load("org-1").await.unwrap();
    assert!(checkpoint.is_complete);
    assert_eq!(checkpoint.cursor.as_deref(), Some("c1"));
    assert_eq!(store.count(Some("org-1")).await.unwrap(), 2);

    // A finished collection is not fetched again
    let requests_before = server.received_requests().await.unwrap().len();
    let report = harvester
        .harvest("org-1", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.status, HarvestStatus::AlreadyComplete);
    assert_eq!(
        server.received_requests().await.unwrap().len(),
        requests_before
    );
}
