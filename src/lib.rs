//! Aviary client library
//!
//! One [`ApiClient`] per process talks to the aviary backend (parrots, cages,
//! species, auth). It attaches the stored access token to every call and, on
//! 401, runs a single-flight token refresh: concurrent failures wait in a queue
//! and are replayed with the new token. When the session cannot be recovered
//! the stored credentials are purged and the session-expired hook fires.

pub mod api;
mod auth;
pub mod client;
mod database;
pub mod error;
pub mod events;
pub mod models;
pub mod stats;

pub use auth::{keys, AuthManager, TokenEncryption};
pub use client::{ApiClient, ClientConfig};
pub use database::Database;
pub use error::{ApiError, ErrorKind};
pub use events::{SessionExpired, LOGIN_ROUTE};

#[cfg(test)]
mod tests;

/// Инициализация логирования: по умолчанию info (если RUST_LOG не задан)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
