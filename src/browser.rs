//! Browser driver seam.
//!
//! The pipeline talks to `BrowserPage` / `BrowserHandle` / `Launcher` trait
//! objects. The Chrome implementations wrap `headless_chrome` and tag every
//! driver error through `error::classify_driver_error`.

use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use serde::Deserialize;

use crate::error::{classify_driver_error, BrowseError, BrowseResult};
use crate::stealth::{self, SessionProfile};

pub type PageRef = Arc<dyn BrowserPage>;

/// A link as rendered in the live DOM.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Anchor {
    pub label: Option<String>,
    #[serde(default)]
    pub text: String,
    pub href: Option<String>,
}

pub trait BrowserPage: Send + Sync {
    /// Current location. Fails once the page is gone.
    fn url(&self) -> BrowseResult<String>;
    fn goto(&self, url: &str, timeout: Duration) -> BrowseResult<()>;
    fn html(&self) -> BrowseResult<String>;
    fn visible_text(&self) -> BrowseResult<String>;
    /// `Ok(false)` when the selector never shows up within `timeout`.
    fn wait_for(&self, selector: &str, timeout: Duration) -> BrowseResult<bool>;
    /// Clicks the first match; `Ok(false)` when nothing matched.
    fn click(&self, selector: &str) -> BrowseResult<bool>;
    /// Clicks the first button whose label contains `text` (case-insensitive).
    fn click_text(&self, text: &str) -> BrowseResult<bool>;
    fn fill(&self, selector: &str, text: &str) -> BrowseResult<()>;
    fn press_enter(&self) -> BrowseResult<()>;
    fn scroll_to_end(&self, selector: &str) -> BrowseResult<()>;
    fn scroll_height(&self, selector: &str) -> BrowseResult<u64>;
    fn anchors(&self, selector: &str) -> BrowseResult<Vec<Anchor>>;
    fn apply_profile(&self, profile: &SessionProfile) -> BrowseResult<()>;
    fn close(&self) -> BrowseResult<()>;
}

pub trait BrowserHandle: Send + Sync {
    fn is_connected(&self) -> bool;
    fn pages(&self) -> BrowseResult<Vec<PageRef>>;
    fn new_page(&self) -> BrowseResult<PageRef>;
    fn close(self: Box<Self>);
}

pub trait Launcher: Send + Sync {
    fn launch(&self, profile: &SessionProfile) -> BrowseResult<Box<dyn BrowserHandle>>;
}

// ============================================================================
// headless_chrome implementation
// ============================================================================

pub struct ChromeLauncher {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(headless: bool, chrome_path: Option<PathBuf>) -> Self {
        Self { headless, chrome_path }
    }
}

impl Launcher for ChromeLauncher {
    fn launch(&self, profile: &SessionProfile) -> BrowseResult<Box<dyn BrowserHandle>> {
        let ua_arg = format!("--user-agent={}", profile.user_agent);
        let lang_arg = format!("--lang={}", profile.locale);

        let mut args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-gpu"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--window-position=0,0"),
        ];
        args.push(OsStr::new(&ua_arg));
        args.push(OsStr::new(&lang_arg));
        if self.headless {
            args.push(OsStr::new("--headless=new"));
        }

        let browser = Browser::new(LaunchOptions {
            headless: false, // new headless mode is requested via args
            window_size: Some((1920, 1080)),
            path: self.chrome_path.clone(),
            idle_browser_timeout: Duration::from_secs(600),
            args,
            ..Default::default()
        })
        .map_err(|e| BrowseError::Launch(format!("{:#}", e)))?;

        Ok(Box::new(ChromeBrowser { browser }))
    }
}

pub struct ChromeBrowser {
    browser: Browser,
}

impl BrowserHandle for ChromeBrowser {
    fn is_connected(&self) -> bool {
        self.browser.get_version().is_ok()
    }

    fn pages(&self) -> BrowseResult<Vec<PageRef>> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| BrowseError::SessionLost("tab registry poisoned".to_string()))?;
        Ok(tabs
            .iter()
            .map(|tab| Arc::new(ChromePage::new(tab.clone())) as PageRef)
            .collect())
    }

    fn new_page(&self) -> BrowseResult<PageRef> {
        let tab = self.browser.new_tab().map_err(classify_driver_error)?;
        Ok(Arc::new(ChromePage::new(tab)))
    }

    fn close(self: Box<Self>) {
        // Dropping the last handle kills the child process.
        drop(self.browser);
    }
}

pub struct ChromePage {
    tab: Arc<Tab>,
}

impl ChromePage {
    pub fn new(tab: Arc<Tab>) -> Self {
        Self { tab }
    }

    fn eval(&self, js: &str) -> BrowseResult<serde_json::Value> {
        let remote = self.tab.evaluate(js, false).map_err(classify_driver_error)?;
        Ok(remote.value.unwrap_or(serde_json::Value::Null))
    }
}

/// Quote a Rust string as a JS string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

impl BrowserPage for ChromePage {
    fn url(&self) -> BrowseResult<String> {
        // get_url() is cached on the Rust side; evaluating proves the target is alive.
        let value = self.eval("window.location.href")?;
        Ok(value
            .as_str()
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| self.tab.get_url()))
    }

    fn goto(&self, url: &str, timeout: Duration) -> BrowseResult<()> {
        self.tab.set_default_timeout(timeout);
        self.tab.navigate_to(url).map_err(classify_driver_error)?;
        self.tab.wait_until_navigated().map_err(classify_driver_error)?;
        Ok(())
    }

    fn html(&self) -> BrowseResult<String> {
        self.tab.get_content().map_err(classify_driver_error)
    }

    fn visible_text(&self) -> BrowseResult<String> {
        let value = self.eval("document.body ? document.body.innerText : ''")?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn wait_for(&self, selector: &str, timeout: Duration) -> BrowseResult<bool> {
        match self.tab.wait_for_element_with_custom_timeout(selector, timeout) {
            Ok(_) => Ok(true),
            Err(e) => {
                let err = classify_driver_error(e);
                if err.is_timeout() {
                    Ok(false)
                } else {
                    Err(err)
                }
            }
        }
    }

    fn click(&self, selector: &str) -> BrowseResult<bool> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            js_string(selector)
        );
        Ok(self.eval(&js)?.as_bool().unwrap_or(false))
    }

    fn click_text(&self, text: &str) -> BrowseResult<bool> {
        let js = format!(
            r#"(() => {{
                const wanted = {}.toLowerCase();
                const candidates = document.querySelectorAll('button, [role="button"], input[type="submit"]');
                for (const el of candidates) {{
                    const label = (el.innerText || el.value || '').trim().toLowerCase();
                    if (label.includes(wanted)) {{
                        el.click();
                        return true;
                    }}
                }}
                return false;
            }})()"#,
            js_string(text)
        );
        Ok(self.eval(&js)?.as_bool().unwrap_or(false))
    }

    fn fill(&self, selector: &str, text: &str) -> BrowseResult<()> {
        let element = self
            .tab
            .wait_for_element_with_custom_timeout(selector, Duration::from_secs(10))
            .map_err(classify_driver_error)?;
        element.click().map_err(classify_driver_error)?;
        self.eval(&format!(
            "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
            js_string(selector)
        ))?;
        self.tab.type_str(text).map_err(classify_driver_error)?;
        Ok(())
    }

    fn press_enter(&self) -> BrowseResult<()> {
        self.tab.press_key("Enter").map_err(classify_driver_error)?;
        Ok(())
    }

    fn scroll_to_end(&self, selector: &str) -> BrowseResult<()> {
        self.eval(&format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (el) el.scrollTo(0, el.scrollHeight);
            }})()"#,
            js_string(selector)
        ))?;
        Ok(())
    }

    fn scroll_height(&self, selector: &str) -> BrowseResult<u64> {
        let value = self.eval(&format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.scrollHeight : 0; }})()",
            js_string(selector)
        ))?;
        Ok(value.as_f64().map(|h| h as u64).unwrap_or(0))
    }

    fn anchors(&self, selector: &str) -> BrowseResult<Vec<Anchor>> {
        let js = format!(
            r#"(() => JSON.stringify(
                Array.from(document.querySelectorAll({})).map(el => ({{
                    label: el.getAttribute('aria-label'),
                    text: (el.innerText || '').trim(),
                    href: el.getAttribute('href'),
                }}))
            ))()"#,
            js_string(selector)
        );
        let value = self.eval(&js)?;
        let raw = value.as_str().unwrap_or("[]");
        serde_json::from_str(raw)
            .map_err(|e| BrowseError::Interaction(format!("unreadable anchor list: {}", e)))
    }

    fn apply_profile(&self, profile: &SessionProfile) -> BrowseResult<()> {
        stealth::install(&self.tab, profile).map_err(classify_driver_error)
    }

    fn close(&self) -> BrowseResult<()> {
        self.tab.close(true).map_err(classify_driver_error)?;
        Ok(())
    }
}

// ============================================================================
// Scripted fake used by the pipeline tests
// ============================================================================

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Where `press_enter` lands: this prefix followed by the typed text.
    pub const SEARCH_PREFIX: &str = "https://www.google.com/maps/search/";

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum Failure {
        Timeout,
        Interaction,
        /// Kills the whole browser.
        KillSession,
    }

    /// One scripted document.
    #[derive(Debug, Clone, Default)]
    pub struct FakeDoc {
        pub text: String,
        pub html: String,
        /// Selectors considered present.
        pub present: Vec<String>,
        pub anchors: Vec<(String, Vec<Anchor>)>,
        /// Feed height after 0, 1, 2... scrolls; the last value repeats.
        pub heights: Vec<u64>,
        /// Navigation ends up here instead.
        pub redirect: Option<String>,
        /// Clicking this selector or button label navigates to the url.
        pub clicks: Vec<(String, String)>,
        pub fail: Option<Failure>,
    }

    impl FakeDoc {
        pub fn text(text: &str) -> Self {
            Self {
                text: text.to_string(),
                ..Default::default()
            }
        }

        pub fn html(html: &str) -> Self {
            Self {
                html: html.to_string(),
                ..Default::default()
            }
        }

        pub fn failing(failure: Failure) -> Self {
            Self {
                fail: Some(failure),
                ..Default::default()
            }
        }

        pub fn with_present(mut self, selector: &str) -> Self {
            self.present.push(selector.to_string());
            self
        }

        pub fn with_anchors(mut self, selector: &str, anchors: Vec<Anchor>) -> Self {
            self.anchors.push((selector.to_string(), anchors));
            self
        }
    }

    pub fn anchor(label: &str, href: &str) -> Anchor {
        Anchor {
            label: Some(label.to_string()),
            text: label.to_string(),
            href: Some(href.to_string()),
        }
    }

    /// Shared scripted web: documents keyed by exact url.
    #[derive(Default)]
    pub struct FakeWeb {
        docs: Mutex<HashMap<String, FakeDoc>>,
        once: Mutex<HashMap<String, VecDeque<FakeDoc>>>,
        visits: Mutex<Vec<String>>,
    }

    impl FakeWeb {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn serve(&self, url: &str, doc: FakeDoc) {
            self.docs.lock().unwrap().insert(url.to_string(), doc);
        }

        /// Served on the next visit only, ahead of the permanent document.
        pub fn serve_once(&self, url: &str, doc: FakeDoc) {
            self.once
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(doc);
        }

        pub fn visits(&self) -> Vec<String> {
            self.visits.lock().unwrap().clone()
        }

        pub fn visit_count(&self, url: &str) -> usize {
            self.visits().iter().filter(|v| v.as_str() == url).count()
        }

        fn fetch(&self, url: &str) -> FakeDoc {
            self.visits.lock().unwrap().push(url.to_string());
            if let Some(doc) = self.once.lock().unwrap().get_mut(url).and_then(VecDeque::pop_front) {
                return doc;
            }
            self.docs.lock().unwrap().get(url).cloned().unwrap_or_default()
        }
    }

    pub struct FakePage {
        web: Arc<FakeWeb>,
        alive: Arc<AtomicBool>,
        closed: AtomicBool,
        url: Mutex<String>,
        doc: Mutex<FakeDoc>,
        typed: Mutex<String>,
        scrolls: AtomicUsize,
        pub profiled: AtomicBool,
    }

    impl FakePage {
        pub fn new(web: Arc<FakeWeb>, alive: Arc<AtomicBool>) -> Self {
            Self {
                web,
                alive,
                closed: AtomicBool::new(false),
                url: Mutex::new("about:blank".to_string()),
                doc: Mutex::new(FakeDoc::default()),
                typed: Mutex::new(String::new()),
                scrolls: AtomicUsize::new(0),
                profiled: AtomicBool::new(false),
            }
        }

        fn live(&self) -> BrowseResult<()> {
            if !self.alive.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
                return Err(BrowseError::SessionLost("Target closed".to_string()));
            }
            Ok(())
        }

        fn navigate(&self, url: &str) -> BrowseResult<()> {
            let mut doc = self.web.fetch(url);
            let mut landed = url.to_string();
            if let Some(target) = doc.redirect.clone() {
                doc = self.web.fetch(&target);
                landed = target;
            }
            match doc.fail {
                Some(Failure::KillSession) => {
                    self.alive.store(false, Ordering::SeqCst);
                    return Err(BrowseError::SessionLost("Target closed".to_string()));
                }
                Some(Failure::Timeout) => {
                    return Err(BrowseError::Timeout(format!("navigation to {url}")));
                }
                Some(Failure::Interaction) => {
                    return Err(BrowseError::Interaction(format!("net::ERR_FAILED {url}")));
                }
                None => {}
            }
            *self.url.lock().unwrap() = landed;
            *self.doc.lock().unwrap() = doc;
            self.scrolls.store(0, Ordering::SeqCst);
            Ok(())
        }

        pub fn scroll_count(&self) -> usize {
            self.scrolls.load(Ordering::SeqCst)
        }

        fn click_target(&self, key: &str) -> Option<String> {
            self.doc
                .lock()
                .unwrap()
                .clicks
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, target)| target.clone())
        }
    }

    impl BrowserPage for FakePage {
        fn url(&self) -> BrowseResult<String> {
            self.live()?;
            Ok(self.url.lock().unwrap().clone())
        }

        fn goto(&self, url: &str, _timeout: Duration) -> BrowseResult<()> {
            self.live()?;
            self.navigate(url)
        }

        fn html(&self) -> BrowseResult<String> {
            self.live()?;
            Ok(self.doc.lock().unwrap().html.clone())
        }

        fn visible_text(&self) -> BrowseResult<String> {
            self.live()?;
            Ok(self.doc.lock().unwrap().text.clone())
        }

        fn wait_for(&self, selector: &str, _timeout: Duration) -> BrowseResult<bool> {
            self.live()?;
            Ok(self.doc.lock().unwrap().present.iter().any(|s| s == selector))
        }

        fn click(&self, selector: &str) -> BrowseResult<bool> {
            self.live()?;
            if let Some(target) = self.click_target(selector) {
                self.navigate(&target)?;
                return Ok(true);
            }
            Ok(self.doc.lock().unwrap().present.iter().any(|s| s == selector))
        }

        fn click_text(&self, text: &str) -> BrowseResult<bool> {
            self.live()?;
            match self.click_target(text) {
                Some(target) => {
                    self.navigate(&target)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        fn fill(&self, selector: &str, text: &str) -> BrowseResult<()> {
            self.live()?;
            if !self.doc.lock().unwrap().present.iter().any(|s| s == selector) {
                return Err(BrowseError::Timeout(format!("{selector} never came")));
            }
            *self.typed.lock().unwrap() = text.to_string();
            Ok(())
        }

        fn press_enter(&self) -> BrowseResult<()> {
            self.live()?;
            let typed = self.typed.lock().unwrap().clone();
            if typed.is_empty() {
                return Ok(());
            }
            self.navigate(&format!("{SEARCH_PREFIX}{typed}"))
        }

        fn scroll_to_end(&self, _selector: &str) -> BrowseResult<()> {
            self.live()?;
            self.scrolls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn scroll_height(&self, _selector: &str) -> BrowseResult<u64> {
            self.live()?;
            let doc = self.doc.lock().unwrap();
            let idx = self.scrolls.load(Ordering::SeqCst);
            Ok(doc
                .heights
                .get(idx)
                .or_else(|| doc.heights.last())
                .copied()
                .unwrap_or(0))
        }

        fn anchors(&self, selector: &str) -> BrowseResult<Vec<Anchor>> {
            self.live()?;
            Ok(self
                .doc
                .lock()
                .unwrap()
                .anchors
                .iter()
                .find(|(s, _)| s == selector)
                .map(|(_, a)| a.clone())
                .unwrap_or_default())
        }

        fn apply_profile(&self, _profile: &SessionProfile) -> BrowseResult<()> {
            self.live()?;
            self.profiled.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn close(&self) -> BrowseResult<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    pub struct FakeBrowser {
        web: Arc<FakeWeb>,
        alive: Arc<AtomicBool>,
        pages: Mutex<Vec<Arc<FakePage>>>,
    }

    impl BrowserHandle for FakeBrowser {
        fn is_connected(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        fn pages(&self) -> BrowseResult<Vec<PageRef>> {
            if !self.is_connected() {
                return Err(BrowseError::SessionLost("browser has disconnected".to_string()));
            }
            Ok(self
                .pages
                .lock()
                .unwrap()
                .iter()
                .filter(|p| !p.closed.load(Ordering::SeqCst))
                .map(|p| p.clone() as PageRef)
                .collect())
        }

        fn new_page(&self) -> BrowseResult<PageRef> {
            if !self.is_connected() {
                return Err(BrowseError::SessionLost("browser has disconnected".to_string()));
            }
            let page = Arc::new(FakePage::new(self.web.clone(), self.alive.clone()));
            self.pages.lock().unwrap().push(page.clone());
            Ok(page)
        }

        fn close(self: Box<Self>) {
            self.alive.store(false, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    pub struct FakeLauncher {
        pub web: Arc<FakeWeb>,
        launches: AtomicUsize,
        failures_left: AtomicUsize,
        current: Mutex<Option<Arc<AtomicBool>>>,
    }

    impl FakeLauncher {
        pub fn new(web: Arc<FakeWeb>) -> Arc<Self> {
            Arc::new(Self {
                web,
                ..Default::default()
            })
        }

        pub fn launches(&self) -> usize {
            self.launches.load(Ordering::SeqCst)
        }

        /// The next `n` launches fail.
        pub fn fail_next(&self, n: usize) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        /// Simulate the running browser crashing.
        pub fn kill_current(&self) {
            if let Some(alive) = self.current.lock().unwrap().as_ref() {
                alive.store(false, Ordering::SeqCst);
            }
        }
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, _profile: &SessionProfile) -> BrowseResult<Box<dyn BrowserHandle>> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(BrowseError::Launch("chrome exited early".to_string()));
            }
            let alive = Arc::new(AtomicBool::new(true));
            *self.current.lock().unwrap() = Some(alive.clone());
            Ok(Box::new(FakeBrowser {
                web: self.web.clone(),
                alive,
                pages: Mutex::new(Vec::new()),
            }))
        }
    }

    /// A live page on its own fake browser, for phase-level tests.
    pub fn page(web: &Arc<FakeWeb>) -> Arc<FakePage> {
        Arc::new(FakePage::new(web.clone(), Arc::new(AtomicBool::new(true))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a[href*="/maps/place/"]"#), r#""a[href*=\"/maps/place/\"]""#);
    }

    #[test]
    fn test_anchor_parses_missing_fields() {
        let anchors: Vec<Anchor> =
            serde_json::from_str(r#"[{"label":null,"href":"/maps/place/x"}]"#).unwrap();
        assert_eq!(anchors[0].text, "");
        assert_eq!(anchors[0].href.as_deref(), Some("/maps/place/x"));
    }
}
