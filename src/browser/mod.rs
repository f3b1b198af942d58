//! Browser automation module
//!
//! Handles launching and controlling a Chrome/Chromium browser instance
//! behind a locally spawned WebDriver server, with randomized throttling
//! between navigations.

mod agent;
mod driver;
mod errors;
mod session;

pub use agent::resolve_user_agent;
pub use errors::BrowserError;
pub use session::{BrowserSession, SessionConfig};
