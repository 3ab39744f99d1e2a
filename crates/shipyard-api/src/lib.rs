//! API server for Shipyard.
//!
//! Provides the HTTP REST API, the GitHub webhook receiver and a WebSocket
//! stream of pipeline events.

pub mod error;
pub mod routes;
pub mod state;
pub mod ws;

pub use state::AppState;
