// Job Feed Importer - Core
//
// Ingests job postings from RSS/Atom/RDF feeds, normalizes them into canonical
// records, and upserts them through a batch queue while tracking every import
// run for observability.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::*;
