//! Session fingerprint: user agent rotation, locale/timezone emulation and
//! the init script that hides automation markers.

use std::sync::Arc;

use headless_chrome::protocol::cdp::Emulation::{SetLocaleOverride, SetTimezoneOverride};
use headless_chrome::protocol::cdp::Page::AddScriptToEvaluateOnNewDocument;
use headless_chrome::Tab;
use once_cell::sync::Lazy;
use rand::seq::SliceRandom;

use crate::config::RegionProfile;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
    ]
});

/// What one browser session looks like from the outside. Fixed for the
/// lifetime of the session; a recreated session draws a new user agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionProfile {
    pub user_agent: String,
    pub locale: String,
    pub languages: Vec<String>,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl SessionProfile {
    pub fn for_region(region: &RegionProfile) -> Self {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        Self {
            user_agent: user_agent.to_string(),
            locale: region.locale.clone(),
            languages: region.languages.clone(),
            timezone: region.timezone.clone(),
            latitude: region.latitude,
            longitude: region.longitude,
        }
    }

    /// `fr-CH,fr;q=0.9,en;q=0.8` style header value.
    pub fn accept_language(&self) -> String {
        self.languages
            .iter()
            .enumerate()
            .map(|(i, lang)| {
                if i == 0 {
                    lang.clone()
                } else {
                    let q = (10 - i.min(9)) as f32 / 10.0;
                    format!("{};q={:.1}", lang, q)
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Script evaluated before any page script on every new document.
pub fn stealth_script(profile: &SessionProfile) -> String {
    let languages = serde_json::to_string(&profile.languages).unwrap_or_else(|_| "[]".to_string());

    let mut script = String::from(
        r#"
        Object.defineProperty(navigator, 'webdriver', { get: () => undefined });

        Object.defineProperty(navigator, 'hardwareConcurrency', {
            get: () => 4 + Math.floor(Math.random() * 3) * 2,
        });

        window.chrome = window.chrome || {
            runtime: {
                connect: function() {
                    return {
                        onMessage: { addListener: function() {}, removeListener: function() {} },
                        postMessage: function() {},
                        disconnect: function() {}
                    };
                },
                sendMessage: function() {},
            },
            csi: function() {},
            loadTimes: function() { return {}; },
        };

        const originalQuery = window.navigator.permissions.query;
        window.navigator.permissions.query = (parameters) => (
            parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : parameters.name === 'geolocation'
                    ? Promise.resolve({ state: 'granted' })
                    : originalQuery(parameters)
        );

        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const pdf = {
                    description: "Portable Document Format",
                    filename: "internal-pdf-viewer",
                    length: 1,
                    name: "Chrome PDF Plugin"
                };
                const p = [pdf, pdf, pdf, pdf, pdf];
                Object.setPrototypeOf(p, PluginArray.prototype);
                return p;
            }
        });

        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function(parameter) {
            if (parameter === 37445) return 'Intel Inc.';
            if (parameter === 37446) return 'Intel Iris OpenGL Engine';
            return getParameter.apply(this, [parameter]);
        };
        "#,
    );

    script.push_str(&format!(
        r#"
        Object.defineProperty(navigator, 'languages', {{ get: () => {languages} }});

        (() => {{
            const position = {{
                coords: {{
                    latitude: {lat},
                    longitude: {lon},
                    accuracy: 30,
                    altitude: null,
                    altitudeAccuracy: null,
                    heading: null,
                    speed: null,
                }},
                timestamp: Date.now(),
            }};
            if (navigator.geolocation) {{
                navigator.geolocation.getCurrentPosition = (ok) => setTimeout(() => ok(position), 20);
                navigator.geolocation.watchPosition = (ok) => {{ setTimeout(() => ok(position), 20); return 1; }};
            }}
        }})();
        "#,
        languages = languages,
        lat = profile.latitude,
        lon = profile.longitude,
    ));

    script
}

/// Apply the whole profile to a tab: init script, UA + Accept-Language,
/// timezone and locale.
pub fn install(tab: &Arc<Tab>, profile: &SessionProfile) -> anyhow::Result<()> {
    tab.call_method(AddScriptToEvaluateOnNewDocument {
        source: stealth_script(profile),
        world_name: None,
        include_command_line_api: None,
        run_immediately: None,
    })?;

    let accept_language = profile.accept_language();
    tab.set_user_agent(&profile.user_agent, Some(accept_language.as_str()), None)?;

    tab.call_method(SetTimezoneOverride {
        timezone_id: profile.timezone.clone(),
    })?;

    tab.call_method(SetLocaleOverride {
        locale: Some(profile.locale.clone()),
    })?;

    Ok(())
}
