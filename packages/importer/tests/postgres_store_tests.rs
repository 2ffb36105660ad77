//! Run store, job store and batch queue against a real Postgres.

mod common;

use common::*;
use futures::future::join_all;
use importer_core::common::ReasonCode;
use importer_core::domains::imports::models::{
    BatchOutcome, FailureSample, NewImportRun, PostgresRunStore, RunStatus,
};
use importer_core::domains::imports::RunTracker;
use importer_core::domains::jobs::models::{Job, JobUpsert, PostgresJobStore};
use importer_core::kernel::queue::{BatchQueue, ErrorKind, PostgresBatchQueue, LEASE_EXHAUSTED};
use importer_core::kernel::{BaseJobStore, BaseRunStore, StreamHub};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use test_context::test_context;
use uuid::Uuid;

const BATCHES: i64 = 16;

fn outcome(index: i64, failed: i64) -> BatchOutcome {
    BatchOutcome {
        batch_index: index,
        imported: 10 - failed,
        new_count: 10 - failed,
        failed_count: failed,
        failure_samples: (0..failed)
            .map(|i| FailureSample::new(ReasonCode::ValidationError, format!("item {} invalid", i)))
            .collect(),
        ..Default::default()
    }
}

async fn running_run(store: &PostgresRunStore, total_batches: i64) -> Uuid {
    let run = store
        .insert(&NewImportRun {
            source_url: SOURCE_URL.to_string(),
            source_name: SOURCE_NAME.to_string(),
            batch_size: 10,
            concurrency: total_batches,
        })
        .await
        .unwrap();
    store
        .record_fetch_outcome(run.id, total_batches * 10, total_batches, 0, &[], 50)
        .await
        .unwrap()
        .unwrap();
    run.id
}

fn upsert(dedupe_key: &str, title: &str) -> JobUpsert {
    JobUpsert {
        dedupe_key: dedupe_key.to_string(),
        source_url: SOURCE_URL.to_string(),
        source_name: SOURCE_NAME.to_string(),
        external_id: Some(dedupe_key.to_string()),
        job_url: format!("https://jobs.example.com/{}", dedupe_key),
        title: title.to_string(),
        company: Some("Acme".to_string()),
        location: None,
        description: None,
        categories: vec!["Engineering".to_string()],
        job_type: None,
        region: None,
        published_at: None,
    }
}

async fn batch_row(pool: &PgPool, id: Uuid) -> (String, i32, Option<String>) {
    sqlx::query_as("SELECT status::text, attempt, error_message FROM import_batch_jobs WHERE id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[test_context(ContainerHarness)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_batch_outcomes_finalize_exactly_once(ctx: &ContainerHarness) {
    let store = Arc::new(PostgresRunStore::new(ctx.db_pool.clone()));
    let run_id = running_run(&store, BATCHES).await;

    let tasks = (0..BATCHES).map(|index| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .apply_batch_outcome(run_id, &outcome(index, 0), 50)
                .await
                .unwrap();
            store.try_finalize(run_id, false).await.unwrap().is_some()
        })
    });

    let winners = join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .filter(|won| *won)
        .count();
    assert_eq!(winners, 1);

    let run = store.find(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.batch_meta.processed_batches, BATCHES);
    assert_eq!(run.new_jobs, BATCHES * 10);
    assert_eq!(run.total_imported, BATCHES * 10);
    assert!(run.finished_at.is_some());
}

#[test_context(ContainerHarness)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tracker_outcomes_with_failures_end_partial(ctx: &ContainerHarness) {
    let store = Arc::new(PostgresRunStore::new(ctx.db_pool.clone()));
    let run_id = running_run(&store, BATCHES).await;
    let tracker = Arc::new(RunTracker::new(store.clone(), StreamHub::new(), 5));

    let tasks = (0..BATCHES).map(|index| {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            let failed = if index % 4 == 0 { 3 } else { 0 };
            tracker
                .record_batch_outcome(run_id, &outcome(index, failed))
                .await
                .unwrap()
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let run = tracker.find(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Partial);
    assert_eq!(run.failed_jobs, 4 * 3);
    assert_eq!(run.new_jobs, BATCHES * 10 - 4 * 3);
    assert_eq!(run.batch_meta.processed_batches, BATCHES);
}

#[test_context(ContainerHarness)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failure_samples_stay_capped_under_concurrent_appends(ctx: &ContainerHarness) {
    let store = Arc::new(PostgresRunStore::new(ctx.db_pool.clone()));
    let run_id = running_run(&store, 20).await;

    let tasks = (0..20).map(|index| {
        let store = store.clone();
        tokio::spawn(async move {
            store
                .apply_batch_outcome(run_id, &outcome(index, 3), 5)
                .await
                .unwrap()
        })
    });
    for result in join_all(tasks).await {
        result.unwrap();
    }

    let run = store.find(run_id).await.unwrap().unwrap();
    assert_eq!(run.failed_jobs, 60);
    assert_eq!(run.failures.0.len(), 5);
}

#[test_context(ContainerHarness)]
#[tokio::test]
async fn redelivered_batch_counts_once(ctx: &ContainerHarness) {
    let store = PostgresRunStore::new(ctx.db_pool.clone());
    let run_id = running_run(&store, 2).await;

    store.apply_batch_outcome(run_id, &outcome(0, 0), 50).await.unwrap();
    let run = store
        .apply_batch_outcome(run_id, &outcome(0, 0), 50)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(run.batch_meta.processed_batches, 1);
    assert_eq!(run.new_jobs, 20);
    assert!(store.try_finalize(run_id, false).await.unwrap().is_none());
    assert_eq!(
        store.find(run_id).await.unwrap().unwrap().status,
        RunStatus::Running
    );
}

#[test_context(ContainerHarness)]
#[tokio::test]
async fn fetch_failure_applies_only_to_running_runs(ctx: &ContainerHarness) {
    let store = PostgresRunStore::new(ctx.db_pool.clone());
    let run = store
        .insert(&NewImportRun {
            source_url: SOURCE_URL.to_string(),
            source_name: SOURCE_NAME.to_string(),
            batch_size: 10,
            concurrency: 1,
        })
        .await
        .unwrap();
    let sample = FailureSample::new(ReasonCode::HttpError, "HTTP 503");

    let failed = store.fail(run.id, &sample, 50).await.unwrap().unwrap();
    assert_eq!(failed.status, RunStatus::Failed);
    assert_eq!(failed.failed_jobs, 1);
    assert_eq!(failed.failures.0[0].reason_code, ReasonCode::HttpError);

    assert!(store.fail(run.id, &sample, 50).await.unwrap().is_none());
    assert_eq!(store.find(run.id).await.unwrap().unwrap().failed_jobs, 1);
}

#[test_context(ContainerHarness)]
#[tokio::test]
async fn upsert_is_idempotent_and_keeps_created_at(ctx: &ContainerHarness) {
    let store = PostgresJobStore::new(ctx.db_pool.clone());
    let key = format!("job-{}", Uuid::new_v4());

    assert!(store.existing_keys(&[key.clone()]).await.unwrap().is_empty());
    store.bulk_upsert(&[upsert(&key, "Engineer")]).await.unwrap();
    let first = Job::find_by_dedupe_key(&key, &ctx.db_pool).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    store
        .bulk_upsert(&[upsert(&key, "Senior Engineer")])
        .await
        .unwrap();
    let second = Job::find_by_dedupe_key(&key, &ctx.db_pool).await.unwrap().unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
    assert_eq!(second.title, "Senior Engineer");
    assert_eq!(second.categories.0, vec!["Engineering"]);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE dedupe_key = $1")
        .bind(&key)
        .fetch_one(&ctx.db_pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    assert!(store.existing_keys(&[key.clone()]).await.unwrap().contains(&key));
}

// The only test in this binary that claims from the queue; claims are not
// scoped to a run.
#[test_context(ContainerHarness)]
#[tokio::test]
async fn queue_dead_letters_exhausted_batches(ctx: &ContainerHarness) {
    let runs = PostgresRunStore::new(ctx.db_pool.clone());
    let run_id = running_run(&runs, 2).await;
    let queue = PostgresBatchQueue::new(ctx.db_pool.clone(), 2).with_lease_duration(0);

    let stalled = queue.enqueue(run_id, json!({"batchIndex": 0})).await.unwrap();
    let mut deliveries = 0;
    for _ in 0..5 {
        deliveries += queue
            .claim("w", 10)
            .await
            .unwrap()
            .iter()
            .filter(|b| b.id == stalled)
            .count();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(deliveries, 2);
    let (status, attempt, error) = batch_row(&ctx.db_pool, stalled).await;
    assert_eq!(status, "dead_letter");
    assert_eq!(attempt, 2);
    assert_eq!(error.as_deref(), Some(LEASE_EXHAUSTED));

    let rejected = queue.enqueue(run_id, json!({"batchIndex": 1})).await.unwrap();
    let claimed = queue.claim("w", 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, rejected);
    queue
        .mark_failed(rejected, "bad envelope", ErrorKind::NonRetryable)
        .await
        .unwrap();

    let (status, attempt, error) = batch_row(&ctx.db_pool, rejected).await;
    assert_eq!(status, "dead_letter");
    assert_eq!(attempt, 1);
    assert_eq!(error.as_deref(), Some("bad envelope"));
    assert!(queue.claim("w", 10).await.unwrap().is_empty());
}
