pub mod failure_sample;
pub mod import_run;
pub mod run_filter;

pub use failure_sample::*;
pub use import_run::*;
pub use run_filter::*;
