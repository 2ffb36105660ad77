//! Kernel module - infrastructure the import domains run on.

pub mod deps;
pub mod queue;
pub mod run_lock;
pub mod scheduled_tasks;
pub mod stream_hub;
pub mod test_dependencies;
pub mod traits;

pub use deps::ImportDeps;
pub use run_lock::{MemoryRunLock, RedisRunLock, SWEEP_LOCK_KEY};
pub use stream_hub::StreamHub;
pub use test_dependencies::TestDependencies;
pub use traits::*;
