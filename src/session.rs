//! Browser session lifecycle: creation, health probing and teardown.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::browser::{BrowserHandle, Launcher, PageRef};
use crate::config::RegionProfile;
use crate::error::{BrowseError, BrowseResult};
use crate::stealth::SessionProfile;

/// One browser plus the page the pipeline is driving.
pub struct Session {
    pub browser: Box<dyn BrowserHandle>,
    pub page: Option<PageRef>,
    pub profile: SessionProfile,
}

impl Session {
    /// The active page. Only valid after a successful health check.
    pub fn page(&self) -> BrowseResult<PageRef> {
        self.page
            .clone()
            .ok_or_else(|| BrowseError::SessionLost("session has no page".to_string()))
    }

    /// Best-effort teardown; a dead browser must not block recreation.
    pub fn shutdown(self) {
        if let Some(page) = &self.page {
            if let Err(e) = page.close() {
                debug!("ignoring page close failure: {}", e);
            }
        }
        self.browser.close();
    }
}

/// Builds every session the crawler uses, so all of them share one
/// fingerprint policy.
pub struct SessionFactory {
    launcher: Arc<dyn Launcher>,
    region: RegionProfile,
}

impl SessionFactory {
    pub fn new(launcher: Arc<dyn Launcher>, region: RegionProfile) -> Self {
        Self { launcher, region }
    }

    pub fn create(&self, previous: Option<Session>) -> BrowseResult<Session> {
        if let Some(previous) = previous {
            previous.shutdown();
        }

        let profile = SessionProfile::for_region(&self.region);
        let browser = self.launcher.launch(&profile)?;
        let page = match open_page(browser.as_ref(), &profile) {
            Ok(page) => page,
            Err(e) => {
                browser.close();
                return Err(e);
            }
        };

        info!(
            timezone = %profile.timezone,
            locale = %profile.locale,
            "browser session ready"
        );
        Ok(Session {
            browser,
            page: Some(page),
            profile,
        })
    }

    /// Probe the session and repair its page handle in place.
    ///
    /// Order: browser connected, then the supplied page answers, then any
    /// other live page, then a fresh page. Any probe failure means
    /// unhealthy; nothing is propagated.
    pub fn check_health(&self, session: &mut Session) -> bool {
        if !session.browser.is_connected() {
            debug!("browser disconnected");
            return false;
        }

        if let Some(page) = &session.page {
            if page.url().is_ok() {
                return true;
            }
            debug!("page handle died, looking for a replacement");
        }

        let pages = match session.browser.pages() {
            Ok(pages) => pages,
            Err(e) => {
                debug!("page listing failed: {}", e);
                return false;
            }
        };

        if let Some(live) = pages.into_iter().find(|p| p.url().is_ok()) {
            if live.apply_profile(&session.profile).is_err() {
                return false;
            }
            session.page = Some(live);
            return true;
        }

        match open_page(session.browser.as_ref(), &session.profile) {
            Ok(page) => {
                session.page = Some(page);
                true
            }
            Err(e) => {
                warn!("could not open a replacement page: {}", e);
                false
            }
        }
    }
}

fn open_page(browser: &dyn BrowserHandle, profile: &SessionProfile) -> BrowseResult<PageRef> {
    let page = browser.new_page()?;
    page.apply_profile(profile)?;
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::fake::{FakeLauncher, FakeWeb};

    fn factory() -> (Arc<FakeLauncher>, SessionFactory) {
        let launcher = FakeLauncher::new(FakeWeb::new());
        let factory = SessionFactory::new(launcher.clone(), RegionProfile::default());
        (launcher, factory)
    }

    #[test]
    fn test_create_returns_profiled_page() {
        let (launcher, factory) = factory();
        let mut session = factory.create(None).unwrap();
        assert_eq!(launcher.launches(), 1);
        assert_eq!(session.profile.timezone, "Europe/Zurich");
        assert!(factory.check_health(&mut session));
    }

    #[test]
    fn test_dead_browser_is_unhealthy() {
        let (launcher, factory) = factory();
        let mut session = factory.create(None).unwrap();
        launcher.kill_current();
        assert!(!factory.check_health(&mut session));
    }

    #[test]
    fn test_closed_page_is_replaced() {
        let (_launcher, factory) = factory();
        let mut session = factory.create(None).unwrap();
        let original = session.page().unwrap();
        original.close().unwrap();

        assert!(factory.check_health(&mut session));
        let replacement = session.page().unwrap();
        assert!(!Arc::ptr_eq(&original, &replacement));
        assert!(replacement.url().is_ok());
    }

    #[test]
    fn test_recreate_closes_previous_browser() {
        let (launcher, factory) = factory();
        let first = factory.create(None).unwrap();
        let old_page = first.page().unwrap();
        let _second = factory.create(Some(first)).unwrap();
        assert_eq!(launcher.launches(), 2);
        assert!(old_page.url().is_err());
    }

    #[test]
    fn test_launch_failure_surfaces() {
        let (launcher, factory) = factory();
        launcher.fail_next(1);
        assert!(matches!(factory.create(None), Err(BrowseError::Launch(_))));
        assert!(factory.create(None).is_ok());
    }
}
