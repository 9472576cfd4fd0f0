//! Listing detail enrichment: address, phone, website, rating, reviews.
//!
//! Attributes come mostly from the rendered text of the detail view, which
//! survives Google's markup churn better than selectors; the raw HTML is
//! a second source for the phone (`tel:` links) and the website.

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info};
use url::Url;

use crate::browser::BrowserPage;
use crate::config::{DelayRange, RegionProfile};
use crate::consent;
use crate::error::{BrowseError, BrowseResult};
use crate::models::LeadDetails;
use crate::phase::{tolerate, PhaseEnv};

/// Below this many characters the detail view has probably not rendered.
const MIN_TEXT_LEN: usize = 100;
const RERENDER_PAUSE: DelayRange = DelayRange::new(3.0, 5.0);

const ADDRESS_LEN: std::ops::Range<usize> = 16..150;

/// Domains that are never a business's own website. Subdomains match too.
const NON_SITE_DOMAINS: &[&str] = &[
    "gstatic.com", "goo.gl", "facebook.com", "fb.com", "twitter.com", "x.com", "linkedin.com",
    "instagram.com", "youtube.com", "youtu.be",
];

/// Region-specific text patterns, compiled once per run.
pub struct DetailExtractor {
    street: Regex,
    postal_then_city: Regex,
    phone_patterns: Vec<Regex>,
    phone_prefix: String,
    domain: Regex,
    rating_line: Regex,
    paren_count: Regex,
    word_count: Regex,
    tel_links: Selector,
    site_button: Selector,
    http_links: Selector,
}

impl DetailExtractor {
    pub fn new(region: &RegionProfile) -> anyhow::Result<Self> {
        let streets = region
            .street_keywords
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|");
        let prefix = regex::escape(&region.phone_prefix);
        let digits = region.postal_code_digits;

        Ok(Self {
            street: Regex::new(&format!(r"\b(?:{})\b", streets))?,
            postal_then_city: Regex::new(&format!(r"\b\d{{{}}}\s+\p{{Lu}}", digits))?,
            phone_patterns: vec![
                Regex::new(&format!(r"{}\s\d{{2}}\s\d{{3}}\s\d{{2}}\s\d{{2}}", prefix))?,
                Regex::new(&format!(r"{}\s?\d{{2}}\s?\d{{3}}\s?\d{{2}}\s?\d{{2}}", prefix))?,
                Regex::new(r"\b0\d{2}\s\d{3}\s\d{2}\s\d{2}\b")?,
                Regex::new(r"\b0\d{2}\s?\d{3}\s?\d{2}\s?\d{2}\b")?,
            ],
            phone_prefix: region.phone_prefix.clone(),
            domain: Regex::new(
                r"(?i)\b((?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+(?:ch|swiss|com|net|org|fr|io|co|dev|app))\b",
            )?,
            rating_line: Regex::new(r"^([0-5][.,]\d)\s*(?:\(|$)")?,
            paren_count: Regex::new(r"\((\d[\d'’\u{a0}\u{202f} ]*)\)")?,
            word_count: Regex::new(r"(?i)(\d[\d'’\u{a0}\u{202f} ]*)\s+(?:avis|reviews|rezensionen)")?,
            tel_links: selector(r#"a[href^="tel:"]"#)?,
            site_button: selector(r#"a[data-item-id="authority"]"#)?,
            http_links: selector(r#"a[href^="http"]"#)?,
        })
    }

    pub fn extract(&self, text: &str, html: &str) -> LeadDetails {
        let document = Html::parse_document(html);
        let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

        let (rating, reviews_on_rating_line) = self.rating(&lines);
        LeadDetails {
            address: self.address(&lines),
            phone: self.phone(text).or_else(|| self.tel_link(&document)),
            website: self.site_button(&document)
                .or_else(|| self.website_in_text(&lines))
                .or_else(|| self.website_link(&document)),
            rating,
            reviews_count: reviews_on_rating_line.or_else(|| self.reviews(text)),
        }
    }

    fn address(&self, lines: &[&str]) -> Option<String> {
        lines
            .iter()
            .find(|line| {
                ADDRESS_LEN.contains(&line.chars().count())
                    && self.street.is_match(line)
                    && self.postal_then_city.is_match(line)
            })
            .map(|line| line.to_string())
    }

    fn phone(&self, text: &str) -> Option<String> {
        self.phone_patterns
            .iter()
            .find_map(|re| re.find(text))
            .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
    }

    fn tel_link(&self, document: &Html) -> Option<String> {
        document
            .select(&self.tel_links)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| href.trim_start_matches("tel:").trim().to_string())
            .find(|phone| phone.contains(&self.phone_prefix) || phone.starts_with('0'))
    }

    fn site_button(&self, document: &Html) -> Option<String> {
        document
            .select(&self.site_button)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| href.starts_with("http") && !is_non_site(href))
            .map(ToOwned::to_owned)
    }

    fn website_in_text(&self, lines: &[&str]) -> Option<String> {
        lines
            .iter()
            .filter(|line| !line.contains('@') && line.contains('.') && line.len() > 5)
            .filter_map(|line| self.domain.captures(line))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_lowercase()))
            .find(|domain| !is_non_site(domain))
            .map(|domain| format!("https://{}", domain))
    }

    fn website_link(&self, document: &Html) -> Option<String> {
        document
            .select(&self.http_links)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| !is_non_site(href))
            .map(ToOwned::to_owned)
    }

    /// Rating plus the review count when it sits on the same line ("4,8(123)").
    fn rating(&self, lines: &[&str]) -> (Option<f32>, Option<u32>) {
        for line in lines {
            let Some(caps) = self.rating_line.captures(line) else {
                continue;
            };
            let Ok(value) = caps[1].replace(',', ".").parse::<f32>() else {
                continue;
            };
            if (0.0..=5.0).contains(&value) {
                let reviews = self
                    .paren_count
                    .captures(line)
                    .and_then(|c| parse_count(&c[1]));
                return (Some(value), reviews);
            }
        }
        (None, None)
    }

    fn reviews(&self, text: &str) -> Option<u32> {
        self.word_count
            .captures(text)
            .and_then(|c| parse_count(&c[1]))
            .or_else(|| self.paren_count.captures(text).and_then(|c| parse_count(&c[1])))
    }
}

fn selector(css: &str) -> anyhow::Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("invalid selector {}: {:?}", css, e))
}

/// Accepts a full URL or a bare domain. Anything without a parseable host is rejected.
fn is_non_site(candidate: &str) -> bool {
    let parsed = if candidate.contains("://") {
        Url::parse(candidate)
    } else {
        Url::parse(&format!("https://{}", candidate))
    };
    let Some(host) = parsed.ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
        return true;
    };
    // google.com, google.ch, maps.google.co.uk ...
    host.split('.').any(|label| label == "google")
        || NON_SITE_DOMAINS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

/// "1'234" and "1 234" style counts.
fn parse_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Visit a listing and read its attributes.
///
/// Interaction failures are errors (and get retried by the caller);
/// attributes that are simply not shown come back as `None`.
pub fn enrich(
    page: &dyn BrowserPage,
    listing_ref: &str,
    extractor: &DetailExtractor,
    env: &PhaseEnv,
) -> BrowseResult<LeadDetails> {
    let timeout = env.crawl.detail_timeout;
    page.goto(listing_ref, timeout)?;
    env.pacer.human(env.pacing.page);

    if !consent::resolve(page, listing_ref, timeout, env.pacer)? {
        return Err(BrowseError::Interaction("consent page would not clear".to_string()));
    }

    let mut text = page.visible_text()?;
    if text.chars().count() < MIN_TEXT_LEN {
        debug!("detail text only {} chars, waiting for render", text.len());
        env.pacer.human(RERENDER_PAUSE);
        text = page.visible_text()?;
    }
    let html = tolerate("detail html", page.html())?.unwrap_or_default();

    let details = extractor.extract(&text, &html);
    info!("found {}/5 attributes for {}", details.found_count(), listing_ref);
    Ok(details)
}
