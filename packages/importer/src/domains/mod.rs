pub mod feeds;
pub mod imports;
pub mod jobs;
