pub mod feed_source;

pub use feed_source::*;
