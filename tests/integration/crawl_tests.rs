//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and test
//! the full crawl cycle end-to-end: seeding, fetching, classification,
//! retries, discovery, signing and the records file.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use sumi_trawl::config::{load_config_from_str, Config};
use sumi_trawl::crawler::{crawl, Coordinator, DropReason};
use sumi_trawl::frontier::{Frontier, MemoryStore, QueuePolicy, SharedFrontier};
use sumi_trawl::signing::sign;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Match, Mock, MockServer, Request, ResponseTemplate};

/// Builds a validated config writing to `dir`, with fast retries
fn test_config(dir: &TempDir, body: &str) -> Config {
    let records = dir.path().join("records.jsonl");
    load_config_from_str(&format!(
        r#"
{}

[output]
records-path = "{}"
"#,
        body,
        records.display()
    ))
    .expect("test config should be valid")
}

/// Reads the `target` field of every record line, sorted
fn record_targets(path: &Path) -> Vec<String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut targets: Vec<String> = content
        .lines()
        .map(|line| {
            let value: serde_json::Value =
                serde_json::from_str(line).expect("each line is one JSON record");
            value["target"].as_str().unwrap().to_string()
        })
        .collect();
    targets.sort();
    targets
}

fn records_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("records.jsonl")
}

fn ok_body() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(r#"{"code":0,"data":{"title":"ok"}}"#)
}

#[tokio::test]
async fn test_range_crawl_with_missing_item() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/item/3"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+$"))
        .respond_with(ok_body())
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 1
backoff-ms = 10
max-backoff-ms = 20

[seed]
range = {{ start = 1, end = 5 }}

[target]
url-template = "{}/item/{{}}"
"#,
            mock_server.uri()
        ),
    );

    let report = crawl(config, CancellationToken::new())
        .await
        .expect("crawl should succeed");

    assert_eq!(record_targets(&records_path(&dir)), vec!["1", "2", "4", "5"]);
    assert_eq!(report.seeded, 5);
    assert_eq!(report.records_written, 4);
    assert_eq!(report.dropped(DropReason::NotFound), 1);
    assert_eq!(report.total_dropped(), 1);
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_rate_limited_target_is_retried_once() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    // First answer is 429, every later one succeeds
    Mock::given(method("GET"))
        .and(path("/item/7"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/7"))
        .respond_with(ok_body())
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 2
backoff-ms = 10
max-backoff-ms = 20

[seed]
range = {{ start = 7, end = 7 }}

[target]
url-template = "{}/item/{{}}"
"#,
            mock_server.uri()
        ),
    );

    let report = crawl(config, CancellationToken::new()).await.unwrap();

    assert_eq!(record_targets(&records_path(&dir)), vec!["7"]);
    assert_eq!(report.attempts, 2);
    assert_eq!(report.retries, 1);
    assert_eq!(report.dropped(DropReason::RateLimited), 0);
}

#[tokio::test]
async fn test_service_codes_drive_classification() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":-404}"#))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":-412}"#))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/3"))
        .respond_with(ok_body())
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 3
max-retries = 2
backoff-ms = 5
max-backoff-ms = 10

[seed]
range = {{ start = 1, end = 3 }}

[target]
url-template = "{}/item/{{}}"

[classify]
code-pointer = "/code"
not-found-codes = [-404]
rate-limited-codes = [-412]

[extract]
record-pointer = "/data"
"#,
            mock_server.uri()
        ),
    );

    let report = crawl(config, CancellationToken::new()).await.unwrap();

    assert_eq!(record_targets(&records_path(&dir)), vec!["3"]);
    assert_eq!(report.dropped(DropReason::NotFound), 1);
    assert_eq!(report.dropped(DropReason::RateLimited), 1);
    // 1 + (1 + 2 retries) + 1
    assert_eq!(report.attempts, 5);

    let line = std::fs::read_to_string(records_path(&dir)).unwrap();
    let record: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(record["data"]["title"], "ok");
}

#[tokio::test]
async fn test_discovered_targets_are_fetched_once() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/list"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(r#"{"items":[{"id":1},{"id":2},{"id":1}]}"#),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    // The items point at each other; neither may be fetched twice
    Mock::given(method("GET"))
        .and(path("/item/1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items":[{"id":2}]}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/item/2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"items":[{"id":1}]}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 4

[seed]
urls = ["{base}/list"]

[target]
url-template = "{base}/item/{{}}"

[extract]
discover-pointer = "/items"
discover-item-pointer = "/id"
"#,
            base = mock_server.uri()
        ),
    );

    let report = crawl(config, CancellationToken::new()).await.unwrap();

    let list_url = format!("{}/list", mock_server.uri());
    assert_eq!(record_targets(&records_path(&dir)), vec!["1", "2", list_url.as_str()]);
    assert_eq!(report.seeded, 1);
    assert_eq!(report.discovered, 2);
    assert_eq!(report.successes, 3);
}

/// Accepts a request only if its `w_rid` matches the rest of its query
struct ValidSignature {
    img_key: String,
    sub_key: String,
}

impl Match for ValidSignature {
    fn matches(&self, request: &Request) -> bool {
        let mut params: BTreeMap<String, String> =
            request.url.query_pairs().into_owned().collect();

        let (Some(w_rid), Some(wts)) = (params.remove("w_rid"), params.remove("wts")) else {
            return false;
        };
        let Ok(wts) = wts.parse::<i64>() else {
            return false;
        };

        match sign(&params, &self.img_key, &self.sub_key, wts) {
            Ok(signed) => signed.w_rid == w_rid,
            Err(_) => false,
        }
    }
}

#[tokio::test]
async fn test_signed_requests_carry_valid_signature() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let img_key = "ab".repeat(16);
    let sub_key = "cd".repeat(16);

    Mock::given(method("GET"))
        .and(path("/x/reply"))
        .and(ValidSignature {
            img_key: img_key.clone(),
            sub_key: sub_key.clone(),
        })
        .respond_with(ok_body())
        .expect(2)
        .mount(&mock_server)
        .await;

    // Anything unsigned or mis-signed is rejected by the service
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":-352}"#))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 2
backoff-ms = 5
max-backoff-ms = 10

[seed]
range = {{ start = 1, end = 2 }}

[target]
url-template = "{}/x/reply"
id-param = "oid"
sign = true

[target.params]
type = "1"

[classify]
code-pointer = "/code"
auth-codes = [-352]

[signing]
img-key = "{}"
sub-key = "{}"
refresh-interval-secs = 0
"#,
            mock_server.uri(),
            img_key,
            sub_key
        ),
    );

    let report = crawl(config, CancellationToken::new()).await.unwrap();

    assert_eq!(record_targets(&records_path(&dir)), vec!["1", "2"]);
    assert_eq!(report.dropped(DropReason::AuthRejected), 0);
}

/// Navigation response announcing `img_key` and `sub_key`
fn nav_body(img_key: &str, sub_key: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_string(format!(
        r#"{{"code":0,"data":{{"wbi_img":{{
            "img_url":"https://i0.hdslb.com/bfs/wbi/{}.png",
            "sub_url":"https://i0.hdslb.com/bfs/wbi/{}.png"}}}}}}"#,
        img_key, sub_key
    ))
}

#[tokio::test]
async fn test_rejected_signature_reloads_keys_from_nav() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let fresh_img = "7cd084941338484aae1ad9425b84077c";
    let fresh_sub = "4932caff0ff746eab6f01bf08b70ac45";

    // The first load hands out keys the service has already rotated away
    Mock::given(method("GET"))
        .and(path("/x/web-interface/nav"))
        .respond_with(nav_body(&"ab".repeat(16), &"cd".repeat(16)))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/nav"))
        .respond_with(nav_body(fresh_img, fresh_sub))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/x/reply"))
        .and(ValidSignature {
            img_key: fresh_img.to_string(),
            sub_key: fresh_sub.to_string(),
        })
        .respond_with(ok_body())
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/x/reply"))
        .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"code":-352}"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 1
max-retries = 1
backoff-ms = 5
max-backoff-ms = 10

[seed]
range = {{ start = 7, end = 7 }}

[target]
url-template = "{uri}/x/reply"
id-param = "oid"
sign = true

[classify]
code-pointer = "/code"
auth-codes = [-352]

[signing]
nav-url = "{uri}/x/web-interface/nav"
refresh-interval-secs = 0
auth-failure-threshold = 1
"#,
            uri = mock_server.uri()
        ),
    );

    let report = crawl(config, CancellationToken::new()).await.unwrap();

    assert_eq!(record_targets(&records_path(&dir)), vec!["7"]);
    assert_eq!(report.retries, 1);
    assert_eq!(report.dropped(DropReason::AuthRejected), 0);
}

#[tokio::test]
async fn test_shared_frontier_runs_until_cancelled() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+$"))
        .respond_with(ok_body())
        .mount(&mock_server)
        .await;

    let config = test_config(
        &dir,
        &format!(
            r#"
[crawler]
concurrency = 2

[seed]
range = {{ start = 1, end = 3 }}

[target]
url-template = "{}/item/{{}}"

[frontier]
mode = "shared"
idle-poll-secs = 1
"#,
            mock_server.uri()
        ),
    );

    let frontier: Arc<dyn Frontier> = Arc::new(
        SharedFrontier::new(MemoryStore::new(), "q", "s", QueuePolicy::Fifo)
            .with_poll_timeout(Duration::from_millis(20)),
    );
    let coordinator = Coordinator::with_frontier(config, frontier.clone())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(coordinator.run(cancel.clone()));

    // A second producer pushes a target the seeder also pushes, plus a new one
    frontier.try_seed("3".into()).await.unwrap();
    frontier.try_seed("4".into()).await.unwrap();

    let path = records_path(&dir);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while record_targets(&path).len() < 4 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // The shared frontier never closes on its own
    assert!(!run.is_finished());
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("cancel should stop the run")
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(record_targets(&path), vec!["1", "2", "3", "4"]);
    assert_eq!(report.records_written, 4);
}

#[tokio::test]
async fn test_records_are_appended_across_runs() {
    let mock_server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ok_body())
        .mount(&mock_server)
        .await;

    let body = format!(
        r#"
[crawler]
concurrency = 2

[seed]
range = {{ start = 1, end = 2 }}

[target]
url-template = "{}/item/{{}}"
"#,
        mock_server.uri()
    );

    crawl(test_config(&dir, &body), CancellationToken::new())
        .await
        .unwrap();
    crawl(test_config(&dir, &body), CancellationToken::new())
        .await
        .unwrap();

    // Each run has its own seen-set; the file is never truncated
    assert_eq!(record_targets(&records_path(&dir)), vec!["1", "1", "2", "2"]);
}
