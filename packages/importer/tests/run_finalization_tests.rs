//! Concurrent batch outcomes must finalize a run exactly once.

use futures::future::join_all;
use importer_core::common::ReasonCode;
use importer_core::domains::imports::models::{BatchOutcome, FailureSample, NewImportRun, RunStatus};
use importer_core::domains::imports::RunTracker;
use importer_core::kernel::test_dependencies::MemoryRunStore;
use importer_core::kernel::{BaseRunStore, StreamHub};
use std::sync::Arc;

const BATCHES: i64 = 16;

fn outcome(index: i64, failed: i64) -> BatchOutcome {
    BatchOutcome {
        batch_index: index,
        imported: 10 - failed,
        new_count: 10 - failed,
        failed_count: failed,
        failure_samples: (0..failed)
            .map(|_| FailureSample::new(ReasonCode::ValidationError, "title missing"))
            .collect(),
        ..Default::default()
    }
}

async fn running_run(store: &MemoryRunStore) -> uuid::Uuid {
    let run = store
        .insert(&NewImportRun {
            source_url: "https://feeds.example.com/jobs.xml".to_string(),
            source_name: "example".to_string(),
            batch_size: 10,
            concurrency: BATCHES,
        })
        .await
        .unwrap();
    store
        .record_fetch_outcome(run.id, BATCHES * 10, BATCHES, 0, &[], 50)
        .await
        .unwrap()
        .unwrap();
    run.id
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_finalizer_wins() {
    let store = Arc::new(MemoryRunStore::new());
    let run_id = running_run(&store).await;

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
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tracker_updates_finalize_once() {
    let store = Arc::new(MemoryRunStore::new());
    let run_id = running_run(&store).await;
    let hub = StreamHub::new();
    let mut events = hub.subscribe_all();
    let tracker = Arc::new(RunTracker::new(store.clone(), hub, 5));

    // Every fourth batch drops two items
    let tasks = (0..BATCHES).rev().map(|index| {
        let tracker = tracker.clone();
        let failed = if index % 4 == 0 { 2 } else { 0 };
        tokio::spawn(async move {
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
    assert_eq!(run.batch_meta.processed_batches, BATCHES);
    assert_eq!(run.batch_meta.attempts, BATCHES);
    assert_eq!(run.failed_jobs, 8);
    assert_eq!(run.failures.0.len(), 5);
    assert!(run.finished_at.is_some());

    // Every terminal event carries the single finalization timestamp
    let mut finished_at = std::collections::HashSet::new();
    while let Ok(event) = events.try_recv() {
        if event["run"]["status"] != "running" {
            finished_at.insert(event["run"]["finishedAt"].to_string());
        }
    }
    assert_eq!(finished_at.len(), 1);
}

#[tokio::test]
async fn finalization_waits_for_every_batch() {
    let store = Arc::new(MemoryRunStore::new());
    let run_id = running_run(&store).await;

    for index in 0..BATCHES - 1 {
        store
            .apply_batch_outcome(run_id, &outcome(index, 0), 50)
            .await
            .unwrap();
        assert!(store.try_finalize(run_id, false).await.unwrap().is_none());
    }

    // A redelivery of an already processed batch does not complete the run
    store
        .apply_batch_outcome(run_id, &outcome(0, 0), 50)
        .await
        .unwrap();
    assert!(store.try_finalize(run_id, false).await.unwrap().is_none());

    store
        .apply_batch_outcome(run_id, &outcome(BATCHES - 1, 0), 50)
        .await
        .unwrap();
    let finished = store.try_finalize(run_id, false).await.unwrap().unwrap();
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.batch_meta.processed_batches, BATCHES);
    assert_eq!(finished.batch_meta.attempts, BATCHES + 1);
}
