//! stealthdriver
//!
//! Launches and controls a single Chrome/Chromium instance through a private
//! chromedriver process, with launch flags that strip the usual automation
//! markers and a randomized delay before every navigation.

pub mod browser;

pub use browser::{BrowserError, BrowserSession, SessionConfig};

/// Initialize console logging with an env-filter override.
///
/// Convenience for binaries and demos; libraries embedding this crate will
/// normally install their own subscriber instead.
pub fn init_logging() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}
