//! Feed ingestion: fetch raw feed text, parse it into items, normalize items into job candidates.

pub mod fetcher;
pub mod models;
pub mod normalizer;
pub mod parser;

pub use fetcher::FeedFetcher;
pub use models::FeedSource;
pub use normalizer::normalize;
pub use parser::{parse_feed, FeedFormat, ParsedFeed, ParsedNode, XmlNode};
