//! Proctor Capture - camera and screen capture for proctored sessions.
//!
//! This is the main library crate of the capture agent. It manages the
//! lifecycle of camera and screen tracks on a hosted page, composites
//! snapshots from them, and keeps a coordinator informed over a
//! self-healing control channel.

pub mod capture;
pub mod commands;
pub mod config;
pub mod recorder;
pub mod render;
pub mod session;
pub mod utils;

pub use config::SessionConfig;
pub use session::Session;
pub use utils::error::{CaptureError, CaptureResult};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "proctor_capture=debug,proctor_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Proctor Capture v{}", env!("CARGO_PKG_VERSION"));
}
