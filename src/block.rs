use tracing::warn;

use crate::browser::BrowserPage;

/// Phrases shown on Google's anti-automation interstitials.
const BLOCK_PHRASES: &[&str] = &[
    "unusual traffic",
    "automated queries",
    "captcha",
    "verify you're not a robot",
    "not a robot",
    "trafic inhabituel",
];

const BLOCK_URL_MARKERS: &[&str] = &["/sorry", "captcha"];

/// Advisory check; unreadable pages count as not blocked.
pub fn is_blocked(page: &dyn BrowserPage) -> bool {
    let url = page.url().unwrap_or_default().to_lowercase();
    if let Some(marker) = BLOCK_URL_MARKERS.iter().find(|m| url.contains(*m)) {
        warn!(%url, marker, "block page detected");
        return true;
    }

    let text = match page.visible_text() {
        Ok(text) => text.to_lowercase(),
        Err(_) => return false,
    };
    match BLOCK_PHRASES.iter().find(|p| text.contains(*p)) {
        Some(phrase) => {
            warn!(phrase, "block indicator in page text");
            true
        }
        None => false,
    }
}
