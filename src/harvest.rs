//! Search one work unit on Google Maps and collect lead stubs from the
//! results feed.

use std::collections::HashSet;

use tracing::{debug, info, warn};
use url::Url;

use crate::browser::{Anchor, BrowserPage};
use crate::config::DelayRange;
use crate::consent;
use crate::error::BrowseResult;
use crate::models::{Lead, WorkUnit};
use crate::phase::{tolerate, PhaseEnv};

pub const LANDING_URL: &str = "https://www.google.com";
pub const MAPS_URL: &str = "https://www.google.com/maps";
const SITE_ORIGIN: &str = "https://www.google.com";

pub const SEARCH_INPUT: &str = "#searchboxinput";
pub const RESULTS_FEED: &str = r#"div[role="feed"]"#;

/// Tried in order; the first one with any match wins.
pub const RESULT_SELECTORS: &[&str] = &[
    r#"a[href*="/maps/place/"]"#,
    ".hfpxzc",
    r#"[data-value="Directions"]"#,
    r#"div[role="article"] a"#,
];

const PLACE_PATH: &str = "/maps/place/";
const TYPING_PAUSE: DelayRange = DelayRange::new(0.5, 1.5);
const SCROLL_PAUSE: DelayRange = DelayRange::new(1.5, 2.5);

/// Harvest stubs for `unit`.
///
/// Only session loss is an error. Every other failure ends the harvest
/// early with whatever was collected so far; a results feed that never
/// appears is an empty, successful harvest.
pub fn harvest(page: &dyn BrowserPage, unit: &WorkUnit, env: &PhaseEnv) -> BrowseResult<Vec<Lead>> {
    info!("harvesting {}", unit);
    let mut leads = Vec::new();
    match collect(page, unit, env, &mut leads) {
        Ok(()) => {}
        Err(e) if e.is_session_fatal() => return Err(e),
        Err(e) => warn!(unit = %unit.id(), "harvest stopped early: {}", e),
    }
    info!("{} -> {} listings", unit, leads.len());
    Ok(leads)
}

fn collect(
    page: &dyn BrowserPage,
    unit: &WorkUnit,
    env: &PhaseEnv,
    leads: &mut Vec<Lead>,
) -> BrowseResult<()> {
    let nav_timeout = env.crawl.navigation_timeout;

    // Landing page first so the Maps hit does not look direct.
    page.goto(LANDING_URL, nav_timeout)?;
    env.pacer.human(env.pacing.action);
    page.goto(MAPS_URL, nav_timeout)?;
    env.pacer.human(env.pacing.action);

    if !consent::resolve(page, MAPS_URL, nav_timeout, env.pacer)? {
        warn!("consent page would not clear, giving up on {}", unit);
        return Ok(());
    }
    consent::dismiss_banner(page)?;

    page.fill(SEARCH_INPUT, &unit.query())?;
    env.pacer.human(TYPING_PAUSE);
    page.press_enter()?;

    if !page.wait_for(RESULTS_FEED, env.crawl.results_timeout)? {
        info!("no results feed for \"{}\"", unit.query());
        return Ok(());
    }
    env.pacer.human(env.pacing.page);

    scroll_feed(page, env)?;

    let anchors = result_anchors(page)?;
    leads.extend(stubs_from_anchors(&anchors, unit, env.crawl.max_results));
    Ok(())
}

/// Scroll until the feed stops growing or the cap is hit.
fn scroll_feed(page: &dyn BrowserPage, env: &PhaseEnv) -> BrowseResult<()> {
    let mut last_height = 0;
    let mut stale = 0;

    for i in 0..env.crawl.max_scrolls {
        if tolerate("feed scroll", page.scroll_to_end(RESULTS_FEED))?.is_none() {
            continue;
        }
        env.pacer.human(SCROLL_PAUSE);

        let height = tolerate("feed height", page.scroll_height(RESULTS_FEED))?.unwrap_or(last_height);
        if height == last_height {
            stale += 1;
            if stale >= env.crawl.stale_scroll_limit {
                debug!("feed stopped growing after {} scrolls", i + 1);
                break;
            }
        } else {
            stale = 0;
        }
        last_height = height;
    }
    Ok(())
}

fn result_anchors(page: &dyn BrowserPage) -> BrowseResult<Vec<Anchor>> {
    for selector in RESULT_SELECTORS {
        if let Some(found) = tolerate("result extraction", page.anchors(selector))? {
            if !found.is_empty() {
                debug!("{} results via {}", found.len(), selector);
                return Ok(found);
            }
        }
    }
    Ok(Vec::new())
}

/// Canonical place URL: absolute, without query or fragment.
pub fn canonical_listing_ref(href: &str) -> Option<String> {
    if !href.contains(PLACE_PATH) {
        return None;
    }
    let base = Url::parse(SITE_ORIGIN).ok()?;
    let mut url = base.join(href).ok()?;
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

fn display_name(anchor: &Anchor) -> Option<String> {
    let label = anchor.label.as_deref().map(str::trim).filter(|l| !l.is_empty());
    let name = match label {
        Some(label) => label,
        None => anchor.text.lines().map(str::trim).find(|l| !l.is_empty())?,
    };
    Some(name.to_string())
}

/// Turn rendered anchors into stubs; duplicate names or references within
/// one page are rendering artifacts and collapse to the first.
pub fn stubs_from_anchors(anchors: &[Anchor], unit: &WorkUnit, cap: usize) -> Vec<Lead> {
    let mut seen_names = HashSet::new();
    let mut seen_refs = HashSet::new();
    let mut stubs = Vec::new();

    for anchor in anchors {
        if stubs.len() >= cap {
            break;
        }
        let Some(name) = display_name(anchor) else {
            continue;
        };
        let Some(listing_ref) = anchor.href.as_deref().and_then(canonical_listing_ref) else {
            continue;
        };
        if !seen_names.insert(name.clone()) || !seen_refs.insert(listing_ref.clone()) {
            continue;
        }
        stubs.push(Lead::stub(name, listing_ref, unit));
    }
    stubs
}
