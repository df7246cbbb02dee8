//! LTI Gateway Library
//!
//! An LTI 1.x launch-authentication bridge between a Learning Management
//! System (Canvas or compatible) and a backend grading environment.
//!
//! # Features
//!
//! - **OAuth1 signature validation**: HMAC-SHA1 over the reconstructed launch
//!   URL with constant-time comparison
//! - **Replay protection**: nonce/timestamp freshness tracked in SQLite,
//!   fail-closed on malformed or stale timestamps
//! - **Identity mapping**: opaque LMS user ids resolved to stable `user-N`
//!   local account names, idempotent under concurrent first launches
//! - **Session & course tracking**: grading-callback coordinates and course
//!   enrollment per launched user
//! - **Role-derived authorization**: enumerated LTI role parsing with
//!   explicitly gated admin elevation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod launch;
pub mod oauth1;
pub mod server;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Replay window in seconds: a launch timestamp older than this is rejected.
pub const REPLAY_WINDOW_SECS: u64 = 900;

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
