// Common test utilities
#![allow(dead_code)]

pub mod containers;
pub mod fixtures;
pub mod harness;

pub use containers::*;
pub use fixtures::*;
pub use harness::*;
