// Common types and utilities shared across the importer

pub mod error;
pub mod utils;

pub use error::{ImportError, ReasonCode};
