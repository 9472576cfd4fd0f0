//! Browser-boundary error classification.
//!
//! Every error raised by the browser driver is tagged exactly once, here, as
//! either fatal for the session (`SessionLost`) or something a retry can fix.
//! Downstream code branches on the variant, never on message text.

use thiserror::Error;

pub type BrowseResult<T> = Result<T, BrowseError>;

#[derive(Debug, Error)]
pub enum BrowseError {
    /// Browser, context or page is gone. Only a fresh session fixes this.
    #[error("browser session lost: {0}")]
    SessionLost(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("page interaction failed: {0}")]
    Interaction(String),

    #[error("failed to launch browser: {0}")]
    Launch(String),
}

impl BrowseError {
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, BrowseError::SessionLost(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BrowseError::Timeout(_))
    }
}

/// Phrases the driver uses when the target (tab/browser/websocket) vanished.
const SESSION_LOST_MARKERS: &[&str] = &[
    "closed",
    "target",
    "connection to the browser",
    "browser has disconnected",
    "no such session",
    "websocket",
];

/// Network failures of the visited site, not of the browser.
const NAVIGATION_MARKERS: &[&str] = &["net::err_", "navigate failed"];

const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "never came"];

/// Tag a raw `headless_chrome` error.
pub fn classify_driver_error(err: anyhow::Error) -> BrowseError {
    let message = format!("{:#}", err);
    classify_message(&message)
}

pub(crate) fn classify_message(message: &str) -> BrowseError {
    let lower = message.to_lowercase();
    if NAVIGATION_MARKERS.iter().any(|m| lower.contains(m)) {
        BrowseError::Interaction(message.to_string())
    } else if SESSION_LOST_MARKERS.iter().any(|m| lower.contains(m)) {
        BrowseError::SessionLost(message.to_string())
    } else if TIMEOUT_MARKERS.iter().any(|m| lower.contains(m)) {
        BrowseError::Timeout(message.to_string())
    } else {
        BrowseError::Interaction(message.to_string())
    }
}
