// HTTP server setup (Axum + SSE)
pub mod app;
pub mod routes;

pub use app::*;
