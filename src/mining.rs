//! Website mining: contact emails and social profiles from a business's own
//! site plus a couple of its contact/about pages.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::browser::BrowserPage;
use crate::error::BrowseResult;
use crate::mailcheck::MailDomainCheck;
use crate::models::{LeadStatus, MiningOutcome};
use crate::phase::{tolerate, PhaseEnv};

const SOCIAL_DOMAINS: &[&str] = &[
    "linkedin.com",
    "twitter.com",
    "x.com",
    "facebook.com",
    "instagram.com",
    "github.com",
    "youtube.com",
];

/// Matched against link paths and link text, lowercased.
const AUXILIARY_KEYWORDS: &[&str] = &[
    "contact", "about", "team", "equipe", "équipe", "nous", "about-us", "impressum",
];

/// Image file names that the email pattern picks up from srcset attributes.
const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif", ".svg", ".webp"];

/// Mailbox names nobody reads. Matched as whole words of the local part.
const NOISE_MAILBOXES: &[&str] = &[
    "noreply", "no-reply", "donotreply", "do-not-reply", "privacy", "legal", "test",
];

/// Tracker, site-builder and placeholder domains. Subdomains match too.
const NOISE_DOMAINS: &[&str] = &[
    "sentry.io", "sentry.wixpress.com", "sentry-next.wixpress.com", "wixpress.com", "wix.com",
    "example.com", "example.org", "test.com", "demo.com", "sample.com", "domain.com",
];

/// What one page yielded.
#[derive(Debug, Default, PartialEq)]
pub struct PageFindings {
    pub emails: Vec<String>,
    pub social_links: Vec<String>,
    /// Same-site contact/about style pages, in document order.
    pub auxiliary: Vec<String>,
}

pub struct SiteScanner {
    email: Regex,
    links: Selector,
    valid_email: Regex,
    mail_check: Option<Arc<dyn MailDomainCheck>>,
}

impl SiteScanner {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            email: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")?,
            links: Selector::parse("a[href]")
                .map_err(|e| anyhow::anyhow!("invalid link selector: {:?}", e))?,
            valid_email: Regex::new(
                r"^[a-z0-9!#$%&'*+/=?^_`{|}~-]+(?:\.[a-z0-9!#$%&'*+/=?^_`{|}~-]+)*@(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$",
            )?,
            mail_check: None,
        })
    }

    /// Without a check, only the address syntax is verified.
    pub fn set_mail_check(&mut self, check: Arc<dyn MailDomainCheck>) {
        self.mail_check = Some(check);
    }

    /// Drops malformed addresses and, with a mail check installed, those
    /// whose domain has no mail exchanger. Lookup failures keep the address.
    pub fn verify(&self, emails: Vec<String>) -> Vec<String> {
        let mut answers: HashMap<String, bool> = HashMap::new();
        emails
            .into_iter()
            .filter(|email| {
                if email.len() > 254 || !self.valid_email.is_match(email) {
                    debug!("malformed address {}", email);
                    return false;
                }
                let Some(check) = &self.mail_check else {
                    return true;
                };
                let domain = email_domain(email);
                *answers.entry(domain.to_string()).or_insert_with(|| {
                    match check.accepts_mail(domain) {
                        Ok(accepts) => {
                            if !accepts {
                                debug!("{} has no mail exchanger", domain);
                            }
                            accepts
                        }
                        Err(e) => {
                            warn!("keeping {} unverified: {:#}", email, e);
                            true
                        }
                    }
                })
            })
            .collect()
    }

    pub fn scan(&self, html: &str, base: &Url) -> PageFindings {
        let mut findings = PageFindings::default();

        let mut seen = HashSet::new();
        for m in self.email.find_iter(html) {
            let email = m.as_str().trim_end_matches('.').to_lowercase();
            if seen.insert(email.clone()) {
                findings.emails.push(email);
            }
        }

        let document = Html::parse_document(html);
        let mut seen_links = HashSet::new();
        for a in document.select(&self.links) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let Ok(mut target) = base.join(href.trim()) else {
                continue;
            };
            if !matches!(target.scheme(), "http" | "https") {
                continue;
            }
            target.set_fragment(None);
            if !seen_links.insert(target.to_string()) {
                continue;
            }

            if is_social(&target) {
                findings.social_links.push(target.to_string());
            } else if target.host_str() == base.host_str() && !same_page(&target, base) {
                let text = a.text().collect::<String>().to_lowercase();
                let path = target.path().to_lowercase();
                if AUXILIARY_KEYWORDS
                    .iter()
                    .any(|k| path.contains(k) || text.contains(k))
                {
                    findings.auxiliary.push(target.to_string());
                }
            }
        }
        findings
    }
}

fn is_social(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    SOCIAL_DOMAINS
        .iter()
        .any(|d| host == *d || host.ends_with(&format!(".{}", d)))
}

fn same_page(a: &Url, b: &Url) -> bool {
    a.path().trim_end_matches('/') == b.path().trim_end_matches('/') && a.query() == b.query()
}

fn email_domain(email: &str) -> &str {
    email.rsplit_once('@').map(|(_, d)| d).unwrap_or_default()
}

/// `word` appears in `local` delimited by the start, the end or one of `.-_+`.
fn has_word(local: &str, word: &str) -> bool {
    let boundary = |c: Option<char>| c.map_or(true, |c| matches!(c, '.' | '-' | '_' | '+'));
    local.match_indices(word).any(|(at, _)| {
        boundary(local[..at].chars().next_back()) && boundary(local[at + word.len()..].chars().next())
    })
}

pub fn is_noise_email(email: &str) -> bool {
    let lower = email.to_lowercase();
    if IMAGE_EXTENSIONS.iter().any(|ext| lower.contains(ext)) {
        return true;
    }
    let Some((local, domain)) = lower.rsplit_once('@') else {
        return true;
    };
    NOISE_MAILBOXES.iter().any(|word| has_word(local, word))
        || NOISE_DOMAINS
            .iter()
            .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

pub fn filter_emails(emails: impl IntoIterator<Item = String>) -> Vec<String> {
    emails.into_iter().filter(|e| !is_noise_email(e)).collect()
}

fn union(into: &mut Vec<String>, more: Vec<String>) {
    for value in more {
        if !into.contains(&value) {
            into.push(value);
        }
    }
}

/// Mine `website` for contacts.
///
/// No website is a normal outcome, not an error. A failing landing page
/// is returned as an error so the caller can retry it; auxiliary pages are
/// best effort.
pub fn mine(
    page: &dyn BrowserPage,
    website: Option<&str>,
    scanner: &SiteScanner,
    env: &PhaseEnv,
) -> BrowseResult<MiningOutcome> {
    let Some(website) = website else {
        return Ok(MiningOutcome::no_website());
    };
    let base = match Url::parse(website) {
        Ok(url) => url,
        Err(e) => {
            warn!("unusable website {}: {}", website, e);
            return Ok(MiningOutcome::error());
        }
    };

    let timeout = env.crawl.site_timeout;
    page.goto(base.as_str(), timeout)?;
    env.pacer.human(env.pacing.page);
    let html = page.html()?;

    // Redirects (http -> https, bare -> www) change what relative links mean.
    let landed = tolerate("site url", page.url())?
        .and_then(|u| Url::parse(&u).ok())
        .unwrap_or(base);

    let PageFindings {
        mut emails,
        mut social_links,
        auxiliary,
    } = scanner.scan(&html, &landed);

    for link in auxiliary.iter().take(env.crawl.max_auxiliary_pages) {
        debug!("visiting auxiliary page {}", link);
        if tolerate("auxiliary page", page.goto(link, timeout))?.is_none() {
            continue;
        }
        env.pacer.human(env.pacing.page);
        let Some(html) = tolerate("auxiliary html", page.html())? else {
            continue;
        };
        let Ok(at) = Url::parse(link) else {
            continue;
        };
        let more = scanner.scan(&html, &at);
        union(&mut emails, more.emails);
        union(&mut social_links, more.social_links);
    }

    let emails = scanner.verify(filter_emails(emails));
    info!(
        "📧 {}: {} emails, {} social links",
        landed.host_str().unwrap_or(website),
        emails.len(),
        social_links.len()
    );
    Ok(MiningOutcome {
        emails,
        social_links,
        status: LeadStatus::MiningSuccess,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{self, Failure, FakeDoc, FakeWeb};
    use crate::error::BrowseError;
    use crate::mailcheck::testing::StaticMailCheck;
    use crate::phase::testing::Fixture;

    const SITE: &str = "https://studiopixel.ch/";

    fn scanner() -> SiteScanner {
        SiteScanner::new().unwrap()
    }

    #[test]
    fn test_noise_filter_keeps_real_contacts() {
        let raw = "contact@example.com ceo@target.ch image.png@cdn.example.com";
        let found = scanner().scan(raw, &Url::parse(SITE).unwrap()).emails;
        assert_eq!(filter_emails(found), vec!["ceo@target.ch"]);
    }

    #[test]
    fn test_placeholder_and_boilerplate_addresses() {
        assert!(is_noise_email("noreply@pixel.ch"));
        assert!(is_noise_email("privacy@pixel.ch"));
        assert!(is_noise_email("john@demo.com"));
        assert!(is_noise_email("logo@2x.webp"));
        assert!(!is_noise_email("hello@pixel.ch"));
    }

    #[test]
    fn test_noise_words_match_whole_mailbox_names_only() {
        assert!(!is_noise_email("ceo@legalis.ch"));
        assert!(!is_noise_email("info@wixon.ch"));
        assert!(!is_noise_email("contest@pixel.ch"));
        assert!(is_noise_email("legal.team@pixel.ch"));
        assert!(is_noise_email("no-reply@pixel.ch"));
        assert!(is_noise_email("privacy.office@pixel.ch"));
        assert!(is_noise_email("owner@site.wix.com"));
        assert!(is_noise_email("abc123@o4501.sentry.io"));
        assert!(is_noise_email("abc123@sentry.wixpress.com"));
    }

    #[test]
    fn test_verify_rejects_malformed_addresses() {
        let emails = vec![
            "hello@pixel.ch".to_string(),
            "a..b@pixel.ch".to_string(),
            ".hello@pixel.ch".to_string(),
            "hello@-pixel.ch".to_string(),
            "hello@pixel.c".to_string(),
        ];
        assert_eq!(scanner().verify(emails), vec!["hello@pixel.ch"]);
    }

    #[test]
    fn test_verify_drops_domains_without_mail_exchanger() {
        let check = Arc::new(StaticMailCheck::new(&[("pixel.ch", true), ("gone.ch", false)]));
        let mut scanner = scanner();
        scanner.set_mail_check(check.clone());

        let emails = vec![
            "hello@pixel.ch".to_string(),
            "old@gone.ch".to_string(),
            "jobs@pixel.ch".to_string(),
        ];
        assert_eq!(scanner.verify(emails), vec!["hello@pixel.ch", "jobs@pixel.ch"]);
        assert_eq!(check.lookup_count(), 2);
    }

    #[test]
    fn test_verify_keeps_addresses_when_lookup_fails() {
        let mut scanner = scanner();
        scanner.set_mail_check(Arc::new(StaticMailCheck::new(&[])));
        let emails = vec!["hello@unresolved.ch".to_string()];
        assert_eq!(scanner.verify(emails), vec!["hello@unresolved.ch"]);
    }

    #[test]
    fn test_scan_finds_socials_and_contact_pages() {
        let html = r##"<html><body>
            <a href="/">Accueil</a>
            <a href="#top">Haut</a>
            <a href="/contact">Écrivez-nous</a>
            <a href="/services">Services</a>
            <a href="/agence">Notre équipe</a>
            <a href="https://ch.linkedin.com/company/studiopixel">LinkedIn</a>
            <a href="https://www.instagram.com/studiopixel/">Instagram</a>
            <a href="https://partner.ch/contact">Partenaire</a>
            <a href="mailto:hello@studiopixel.ch">hello@studiopixel.ch</a>
        </body></html>"##;
        let findings = scanner().scan(html, &Url::parse(SITE).unwrap());
        assert_eq!(findings.emails, vec!["hello@studiopixel.ch"]);
        assert_eq!(
            findings.social_links,
            vec![
                "https://ch.linkedin.com/company/studiopixel",
                "https://www.instagram.com/studiopixel/"
            ]
        );
        assert_eq!(
            findings.auxiliary,
            vec!["https://studiopixel.ch/contact", "https://studiopixel.ch/agence"]
        );
    }

    #[test]
    fn test_no_website_is_a_no_op() {
        let web = FakeWeb::new();
        let page = fake::page(&web);
        let fixture = Fixture::new();

        let outcome = mine(page.as_ref(), None, &scanner(), &fixture.env()).unwrap();
        assert_eq!(outcome, MiningOutcome::no_website());
        assert!(web.visits().is_empty());
    }

    #[test]
    fn test_mines_site_and_auxiliary_pages() {
        let web = FakeWeb::new();
        web.serve(
            SITE,
            FakeDoc::html(
                r#"<a href="/contact">Contact</a><a href="/about">À propos</a>
                   <a href="/team">Team</a><p>info@studiopixel.ch</p>"#,
            ),
        );
        web.serve(
            "https://studiopixel.ch/contact",
            FakeDoc::html(
                r#"<p>ceo@studiopixel.ch info@studiopixel.ch noreply@studiopixel.ch</p>
                   <a href="https://www.linkedin.com/company/studiopixel">in</a>"#,
            ),
        );
        web.serve("https://studiopixel.ch/about", FakeDoc::failing(Failure::Timeout));
        let page = fake::page(&web);
        let fixture = Fixture::new();

        let outcome = mine(page.as_ref(), Some(SITE), &scanner(), &fixture.env()).unwrap();
        assert_eq!(outcome.status, LeadStatus::MiningSuccess);
        assert_eq!(outcome.emails, vec!["info@studiopixel.ch", "ceo@studiopixel.ch"]);
        assert_eq!(
            outcome.social_links,
            vec!["https://www.linkedin.com/company/studiopixel"]
        );
        assert_eq!(web.visit_count("https://studiopixel.ch/team"), 0);
    }

    #[test]
    fn test_landing_failure_is_an_error() {
        let web = FakeWeb::new();
        web.serve(SITE, FakeDoc::failing(Failure::Interaction));
        let page = fake::page(&web);
        let fixture = Fixture::new();

        let result = mine(page.as_ref(), Some(SITE), &scanner(), &fixture.env());
        assert!(matches!(result, Err(BrowseError::Interaction(_))));
    }

    #[test]
    fn test_session_loss_on_auxiliary_page_propagates() {
        let web = FakeWeb::new();
        web.serve(SITE, FakeDoc::html(r#"<a href="/contact">Contact</a>"#));
        web.serve("https://studiopixel.ch/contact", FakeDoc::failing(Failure::KillSession));
        let page = fake::page(&web);
        let fixture = Fixture::new();

        let result = mine(page.as_ref(), Some(SITE), &scanner(), &fixture.env());
        assert!(matches!(result, Err(BrowseError::SessionLost(_))));
    }
}
