//! HTTP API handlers for chipnote-analyzer
//!
//! Submission, progress (SSE push and JSON poll), results, health/info and
//! job diagnostics.

pub mod analyze;
pub mod debug;
pub mod health;
pub mod progress;
pub mod result;

pub use analyze::analyze_routes;
pub use debug::debug_routes;
pub use health::health_routes;
pub use progress::progress_routes;
pub use result::result_routes;
