//! HTTP API handlers for vqa-review

pub mod health;
pub mod queue;
pub mod results;
pub mod sse;

pub use health::health_routes;
pub use queue::queue_routes;
pub use results::result_routes;
pub use sse::sse_routes;
