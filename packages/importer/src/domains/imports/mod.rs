//! Import runs: the batch pipeline, its workers and the run state machine.

pub mod batch;
pub mod batch_worker;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod run_tracker;

pub use batch::Batch;
pub use batch_worker::BatchWorker;
pub use pipeline::{ImportPipeline, RunSummary, SweepReport};
pub use run_tracker::RunTracker;
