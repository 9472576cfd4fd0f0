//! Google cookie-consent interstitial handling.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::browser::BrowserPage;
use crate::config::DelayRange;
use crate::error::BrowseResult;
use crate::pacing::Pacer;
use crate::phase::tolerate;

pub const CONSENT_HOST: &str = "consent.google.com";

/// Button labels, tried in order (fr-CH first).
const ACCEPT_LABELS: &[&str] = &["Tout accepter", "Accept all", "J'accepte", "I agree"];

const ACCEPT_SELECTORS: &[&str] = &[
    "button#L2AGLb",
    "button[id*='accept']",
    "button[aria-label*='Accept']",
    "form button[type='submit']",
];

const SETTLE: DelayRange = DelayRange::new(2.0, 3.0);

fn on_consent(page: &dyn BrowserPage) -> BrowseResult<bool> {
    Ok(page.url()?.contains(CONSENT_HOST))
}

/// Non-fatal failures count as "not clicked"; session loss propagates.
fn soft(result: BrowseResult<bool>) -> BrowseResult<bool> {
    Ok(tolerate("consent control", result)?.unwrap_or(false))
}

fn click_accept(page: &dyn BrowserPage) -> BrowseResult<bool> {
    for label in ACCEPT_LABELS {
        if soft(page.click_text(label))? {
            return Ok(true);
        }
    }
    for selector in ACCEPT_SELECTORS {
        if soft(page.click(selector))? {
            return Ok(true);
        }
    }
    // Last resort: whatever the first button is.
    soft(page.click("button"))
}

/// Get past the consent page if one is showing.
///
/// Returns `Ok(false)` when still stuck after re-navigating to `return_to`
/// once; the caller gives up on the current unit.
pub fn resolve(
    page: &dyn BrowserPage,
    return_to: &str,
    timeout: Duration,
    pacer: &dyn Pacer,
) -> BrowseResult<bool> {
    if !on_consent(page)? {
        return Ok(true);
    }

    info!("consent page shown, accepting");
    if click_accept(page)? {
        pacer.human(SETTLE);
    }

    if !on_consent(page)? {
        return Ok(true);
    }

    warn!("still on consent page, navigating back");
    match page.goto(return_to, timeout) {
        Ok(()) => {}
        Err(e) if e.is_session_fatal() => return Err(e),
        Err(e) => debug!("re-navigation failed: {}", e),
    }
    pacer.human(SETTLE);
    Ok(!on_consent(page)?)
}

/// In-page cookie banner on Maps itself; best effort.
pub fn dismiss_banner(page: &dyn BrowserPage) -> BrowseResult<()> {
    for label in &ACCEPT_LABELS[..2] {
        if soft(page.click_text(label))? {
            break;
        }
    }
    Ok(())
}
