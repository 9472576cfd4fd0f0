use tracing::debug;

use crate::config::{CrawlConfig, PacingConfig, RegionProfile};
use crate::error::BrowseResult;
use crate::pacing::Pacer;

/// What every phase needs besides the page.
#[derive(Clone, Copy)]
pub struct PhaseEnv<'a> {
    pub crawl: &'a CrawlConfig,
    pub pacing: &'a PacingConfig,
    pub region: &'a RegionProfile,
    pub pacer: &'a dyn Pacer,
}

/// Keep session loss, downgrade anything else to `None` with a debug line.
pub fn tolerate<T>(what: &str, result: BrowseResult<T>) -> BrowseResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_session_fatal() => Err(e),
        Err(e) => {
            debug!("{} failed: {}", what, e);
            Ok(None)
        }
    }
}
