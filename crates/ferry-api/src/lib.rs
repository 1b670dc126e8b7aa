//! HTTP server for ferry.
//!
//! Exposes submission intake, the worker queue surface and cancellation as a
//! JSON API, and provides the GitHub implementation of the code-host client.

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ServerConfig;
pub use state::AppState;
