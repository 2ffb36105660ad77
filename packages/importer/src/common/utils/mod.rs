pub mod dedupe_key;

pub use dedupe_key::generate_dedupe_key;
