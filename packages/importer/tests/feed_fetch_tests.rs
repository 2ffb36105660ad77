//! Real `FeedFetcher` against a wiremock feed server.

mod common;

use common::*;
use importer_core::common::ReasonCode;
use importer_core::domains::feeds::fetcher::USER_AGENT;
use importer_core::domains::feeds::{FeedFetcher, FeedSource};
use importer_core::domains::imports::models::RunStatus;
use importer_core::domains::imports::SweepReport;
use importer_core::kernel::{BaseFeedFetcher, BaseRunLock, TestDependencies, SWEEP_LOCK_KEY};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher(timeout: Duration) -> Arc<FeedFetcher> {
    Arc::new(FeedFetcher::new(timeout).unwrap())
}

fn source(server: &MockServer) -> FeedSource {
    FeedSource::new(format!("{}/feed.xml", server.uri()), SOURCE_NAME)
}

#[tokio::test]
async fn sends_identity_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .and(header("user-agent", USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string(numbered_rss_feed(1)))
        .expect(1)
        .mount(&server)
        .await;

    let body = assert_ok!(fetcher(Duration::from_secs(5)).fetch(&source(&server).url).await);
    assert!(body.contains("<rss"));

    let requests = server.received_requests().await.unwrap();
    let accept = requests[0].headers.get("accept").unwrap().to_str().unwrap();
    assert!(accept.contains("application/rss+xml"));
    assert!(accept.contains("application/atom+xml"));
}

#[tokio::test]
async fn non_success_status_is_an_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = fetcher(Duration::from_secs(5))
        .fetch(&source(&server).url)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::HttpError);
    assert_eq!(err.status_code(), 502);
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn empty_body_is_an_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("   "))
        .mount(&server)
        .await;

    let err = fetcher(Duration::from_secs(5))
        .fetch(&source(&server).url)
        .await
        .unwrap_err();
    assert_eq!(err.reason_code(), ReasonCode::HttpError);
}

#[tokio::test]
async fn timeout_fails_the_run_immediately() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(numbered_rss_feed(3))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let harness = TestHarness::new(
        TestDependencies::new().fetcher(fetcher(Duration::from_millis(200))),
    );

    let summary = harness.enqueue(&source(&server)).await;
    assert_eq!(summary.status, Some(RunStatus::Failed));
    assert!(harness.deps.queue.is_empty());

    let run = harness.run(summary.run_id.unwrap()).await;
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.batch_meta.total_batches, 0);
    assert_eq!(run.failures.0.len(), 1);
    assert_eq!(run.failures.0[0].reason_code, ReasonCode::HttpError);
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn held_lock_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(numbered_rss_feed(1)))
        .expect(0)
        .mount(&server)
        .await;

    let deps = TestDependencies::new().fetcher(fetcher(Duration::from_secs(5)));
    assert_ok!(deps.lock.acquire(SWEEP_LOCK_KEY, Duration::from_secs(60)).await);
    let harness = TestHarness::new(deps);

    let report = harness.pipeline.run_sweep(&[source(&server)]).await.unwrap();
    assert!(matches!(report, SweepReport::Skipped));
    assert_eq!(harness.deps.run_store.count().await, 0);
}

#[tokio::test]
async fn served_feed_imports_end_to_end() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(numbered_rss_feed(4)),
        )
        .mount(&server)
        .await;

    let harness = TestHarness::new(
        TestDependencies::new().fetcher(fetcher(Duration::from_secs(5))),
    );

    let run = harness.import(&source(&server)).await;
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.total_fetched, 4);
    assert_eq!(run.new_jobs, 4);
    assert!(run.failures.0.is_empty());
}
