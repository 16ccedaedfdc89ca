//! # forgor-server
//!
//! The HTTP surface of the forgor-sync coordination server. All authority
//! flows from per-record signatures checked by the validation engine; the
//! HTTP layer parses, routes, rate-limits, and persists.

pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod rate_limit;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use routes::build_router;
pub use state::AppState;
