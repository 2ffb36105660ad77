//! In-memory harness: the real pipeline, tracker and worker pool wired to
//! `TestDependencies` fakes.

use importer_core::domains::feeds::FeedSource;
use importer_core::domains::imports::models::ImportRun;
use importer_core::domains::imports::{BatchWorker, ImportPipeline, RunSummary, RunTracker, SweepReport};
use importer_core::kernel::queue::BatchWorkerPool;
use importer_core::kernel::TestDependencies;
use std::sync::Arc;
use uuid::Uuid;

use super::{SOURCE_NAME, SOURCE_URL};

pub struct TestHarness {
    pub deps: TestDependencies,
    pub tracker: Arc<RunTracker>,
    pub pipeline: ImportPipeline,
    pub workers: BatchWorkerPool,
    pub worker: BatchWorker,
}

impl TestHarness {
    pub fn new(deps: TestDependencies) -> Self {
        let import_deps = deps.deps();
        let tracker = import_deps.tracker();
        Self {
            pipeline: import_deps.pipeline(tracker.clone()),
            workers: import_deps.worker_pool(tracker.clone()),
            worker: import_deps.batch_worker(tracker.clone()),
            tracker,
            deps,
        }
    }

    pub fn source() -> FeedSource {
        FeedSource::new(SOURCE_URL, SOURCE_NAME)
    }

    /// Run the source through the sweep lock and return its summary.
    pub async fn enqueue(&self, source: &FeedSource) -> RunSummary {
        match self.pipeline.run_single(source).await.unwrap() {
            SweepReport::Completed { mut runs } => runs.remove(0),
            SweepReport::Skipped => panic!("sweep unexpectedly skipped"),
        }
    }

    /// Enqueue, then let the workers drain the queue.
    pub async fn import(&self, source: &FeedSource) -> ImportRun {
        let summary = self.enqueue(source).await;
        self.workers.drain().await.unwrap();
        self.run(summary.run_id.unwrap()).await
    }

    pub async fn run(&self, run_id: Uuid) -> ImportRun {
        self.tracker.find(run_id).await.unwrap().unwrap()
    }
}
