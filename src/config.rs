//! Typed configuration loaded from the environment (and `.env`).
//!
//! Every setting has a default tuned for the Suisse-romande workload, so an
//! empty environment runs the full crawl. Malformed values are errors rather
//! than silently falling back.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::models::UNIT_ID_SEPARATOR;

const DEFAULT_CITIES: &[&str] = &[
    "Neuchâtel", "La Chaux-de-Fonds", "Le Locle", "Val-de-Ruz",
    "Val-de-Travers", "Fleurier", "Cernier", "Peseux", "Colombier",
    "Marin-Epagnier", "Saint-Blaise", "Boudry", "Cressier",
    "Yverdon-les-Bains", "Pontarlier", "Morteau", "Besançon",
    "Genève", "Lausanne", "Fribourg", "Sion", "Nyon", "Renens",
    "Meyrin", "Plan-les-Ouates", "Martigny", "Vevey", "Montreux",
    "Delémont", "Porrentruy",
];

const DEFAULT_KEYWORDS: &[&str] = &[
    "Agence Web", "Développement logiciel", "Conception de sites web",
    "Création site internet", "Agence digitale", "Web design",
    "Développeur web", "Intégrateur web", "UX Designer",
    "Full Stack", "Frontend developer", "Backend developer",
    "App development", "Mobile app", "Application mobile",
    "E-commerce", "Site e-commerce", "Boutique en ligne",
    "Éditeur de logiciels", "Software development", "SaaS company",
    "Startup tech", "Tech startup", "Scale-up",
    "Cybersécurité", "Sécurité informatique", "Consultant IT",
    "Consultant informatique", "Services informatiques entreprises",
    "Cloud provider", "DevOps", "Infrastructure IT",
    "SEO", "Référencement web", "Marketing digital",
    "Social media management", "Community manager",
    "Data science", "Intelligence artificielle", "Machine Learning",
    "Big Data", "Data analyst",
];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub crawl: CrawlConfig,
    pub retry: RetryConfig,
    pub pacing: PacingConfig,
    pub region: RegionProfile,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        Ok(Config {
            server: ServerConfig::from_env()?,
            auth: AuthConfig::from_env(),
            storage: StorageConfig::from_env(),
            crawl: CrawlConfig::from_env()?,
            retry: RetryConfig::from_env()?,
            pacing: PacingConfig::from_env()?,
            region: RegionProfile::from_env()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Server / auth
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: env_opt("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_parse("PORT", 5000)?,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl AuthConfig {
    fn from_env() -> Self {
        Self {
            username: env_opt("WEB_USERNAME").unwrap_or_else(|| "admin".to_string()),
            password: env_opt("WEB_PASSWORD").unwrap_or_else(|| "changeme123".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub checkpoint_path: PathBuf,
    pub intermediate_path: PathBuf,
    pub output_path: PathBuf,
    pub database_url: String,
}

impl StorageConfig {
    fn from_env() -> Self {
        Self {
            checkpoint_path: env_path("CHECKPOINT_FILE", "checkpoint.json"),
            intermediate_path: env_path("INTERMEDIATE_FILE", "intermediate_data.csv"),
            output_path: env_path("OUTPUT_FILE", "base_tech_suisse.csv"),
            database_url: env_opt("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://companies.db".to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Crawl
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub locations: Vec<String>,
    pub keywords: Vec<String>,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    /// Upper bound on scrolls of the results feed.
    pub max_scrolls: u32,
    /// Consecutive non-growing scrolls that mean end of list.
    pub stale_scroll_limit: u32,
    pub max_results: usize,
    pub max_auxiliary_pages: usize,
    pub navigation_timeout: Duration,
    pub results_timeout: Duration,
    pub detail_timeout: Duration,
    pub site_timeout: Duration,
    pub block_cooldown: Duration,
    pub recreate_cooldown: Duration,
    /// MX-check mined email domains before keeping them.
    pub verify_email_domains: bool,
}

impl CrawlConfig {
    fn from_env() -> anyhow::Result<Self> {
        let locations = env_list("CITIES", DEFAULT_CITIES);
        let keywords = env_list("KEYWORDS", DEFAULT_KEYWORDS);
        check_unit_names("CITIES", &locations)?;
        check_unit_names("KEYWORDS", &keywords)?;
        Ok(Self {
            locations,
            keywords,
            headless: env_parse("HEADLESS", true)?,
            chrome_path: env_opt("CHROME_PATH").map(PathBuf::from),
            max_scrolls: env_parse("MAX_SCROLLS", 25)?,
            stale_scroll_limit: env_parse("STALE_SCROLL_LIMIT", 3)?,
            max_results: env_parse("MAX_RESULTS", 120)?,
            max_auxiliary_pages: env_parse("MAX_AUXILIARY_PAGES", 2)?,
            navigation_timeout: env_secs("NAVIGATION_TIMEOUT_SECS", 90)?,
            results_timeout: env_secs("RESULTS_TIMEOUT_SECS", 30)?,
            detail_timeout: env_secs("DETAIL_TIMEOUT_SECS", 30)?,
            site_timeout: env_secs("SITE_TIMEOUT_SECS", 25)?,
            block_cooldown: env_secs("BLOCK_COOLDOWN_SECS", 60)?,
            recreate_cooldown: env_secs("RECREATE_COOLDOWN_SECS", 30)?,
            verify_email_domains: env_parse("VERIFY_EMAIL_DOMAINS", true)?,
        })
    }
}

/// Unit ids join location and keyword with `UNIT_ID_SEPARATOR`, so neither
/// side may contain it or two units could share a checkpoint entry.
fn check_unit_names(key: &str, names: &[String]) -> anyhow::Result<()> {
    match names.iter().find(|n| n.contains(UNIT_ID_SEPARATOR)) {
        Some(bad) => anyhow::bail!(
            "Invalid value for env var {key}: {bad:?} contains '{UNIT_ID_SEPARATOR}'"
        ),
        None => Ok(()),
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            locations: DEFAULT_CITIES.iter().map(|s| s.to_string()).collect(),
            keywords: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            headless: true,
            chrome_path: None,
            max_scrolls: 25,
            stale_scroll_limit: 3,
            max_results: 120,
            max_auxiliary_pages: 2,
            navigation_timeout: Duration::from_secs(90),
            results_timeout: Duration::from_secs(30),
            detail_timeout: Duration::from_secs(30),
            site_timeout: Duration::from_secs(25),
            block_cooldown: Duration::from_secs(60),
            recreate_cooldown: Duration::from_secs(30),
            verify_email_domains: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enrich_attempts: u32,
    pub enrich_delay: Duration,
    pub mining_attempts: u32,
    pub mining_delay: Duration,
    pub backoff_factor: f64,
}

impl RetryConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            enrich_attempts: env_parse("ENRICH_MAX_ATTEMPTS", 2)?,
            enrich_delay: env_secs("ENRICH_RETRY_DELAY_SECS", 3)?,
            mining_attempts: env_parse("MINING_MAX_ATTEMPTS", 2)?,
            mining_delay: env_secs("MINING_RETRY_DELAY_SECS", 5)?,
            backoff_factor: env_parse("RETRY_BACKOFF_FACTOR", 1.5)?,
        })
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enrich_attempts: 2,
            enrich_delay: Duration::from_secs(3),
            mining_attempts: 2,
            mining_delay: Duration::from_secs(5),
            backoff_factor: 1.5,
        }
    }
}

// ---------------------------------------------------------------------------
// Human pacing
// ---------------------------------------------------------------------------

/// Inclusive-exclusive bounds, in seconds, for randomized waits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub const fn new(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }
}

#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Between interactions on one page.
    pub action: DelayRange,
    /// Between two detail pages.
    pub page: DelayRange,
    /// Between two work units.
    pub unit: DelayRange,
}

impl PacingConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            action: DelayRange::new(env_parse("MIN_DELAY", 2.0)?, env_parse("MAX_DELAY", 5.0)?),
            page: DelayRange::new(
                env_parse("MIN_PAGE_DELAY", 1.0)?,
                env_parse("MAX_PAGE_DELAY", 3.0)?,
            ),
            unit: DelayRange::new(env_parse("MIN_UNIT_DELAY", 3.0)?, env_parse("MAX_UNIT_DELAY", 6.0)?),
        })
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            action: DelayRange::new(2.0, 5.0),
            page: DelayRange::new(1.0, 3.0),
            unit: DelayRange::new(3.0, 6.0),
        }
    }
}

// ---------------------------------------------------------------------------
// Region profile
// ---------------------------------------------------------------------------

/// Locale, fingerprint and text-pattern settings for the target region.
#[derive(Debug, Clone)]
pub struct RegionProfile {
    pub locale: String,
    pub languages: Vec<String>,
    pub timezone: String,
    pub latitude: f64,
    pub longitude: f64,
    pub street_keywords: Vec<String>,
    pub postal_code_digits: usize,
    pub phone_prefix: String,
    pub country_names: Vec<String>,
}

impl RegionProfile {
    fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            locale: env_opt("LOCALE").unwrap_or(defaults.locale),
            languages: env_opt("LANGUAGES")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.languages),
            timezone: env_opt("TIMEZONE").unwrap_or(defaults.timezone),
            latitude: env_parse("GEO_LATITUDE", defaults.latitude)?,
            longitude: env_parse("GEO_LONGITUDE", defaults.longitude)?,
            street_keywords: defaults.street_keywords,
            postal_code_digits: env_parse("POSTAL_CODE_DIGITS", defaults.postal_code_digits)?,
            phone_prefix: env_opt("PHONE_PREFIX").unwrap_or(defaults.phone_prefix),
            country_names: defaults.country_names,
        })
    }
}

impl Default for RegionProfile {
    fn default() -> Self {
        Self {
            locale: "fr-CH".to_string(),
            languages: vec!["fr-CH".into(), "fr".into(), "en".into()],
            timezone: "Europe/Zurich".to_string(),
            latitude: 46.2044,
            longitude: 6.1432,
            street_keywords: ["Rue", "Avenue", "Chemin", "Route", "Place", "Boulevard", "Quai"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            postal_code_digits: 4,
            phone_prefix: "+41".to_string(),
            country_names: vec!["Suisse".into(), "Switzerland".into(), "Schweiz".into()],
        }
    }
}

// ---------------------------------------------------------------------------
// Env-reading helpers
// ---------------------------------------------------------------------------

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid value for env var {key}: {raw}")),
        None => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    Ok(Duration::from_secs(env_parse(key, default)?))
}

fn env_path(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env_opt(key).unwrap_or_else(|| default.to_string()))
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    env_opt(key)
        .map(|raw| split_list(&raw))
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
