//! The work-unit loop: location × keyword, resumable, self-healing.
//!
//! Each unit goes Pending → InProgress → Completed | Skipped. Completed and
//! Skipped units are checkpointed and never revisited; a unit that keeps
//! losing its browser is left unfinished so the next run picks it up.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::block;
use crate::browser::{BrowserPage, ChromeLauncher, Launcher, PageRef};
use crate::checkpoint::{remove_if_present, CheckpointStore};
use crate::config::{Config, CrawlConfig, DelayRange, PacingConfig, RegionProfile, RetryConfig};
use crate::control::RunHandle;
use crate::dataset::Dataset;
use crate::db::LeadSink;
use crate::enrich::{self, DetailExtractor};
use crate::error::BrowseResult;
use crate::harvest;
use crate::mailcheck::{DnsMailCheck, MailDomainCheck};
use crate::mining::{self, SiteScanner};
use crate::models::{Lead, MiningOutcome, WorkUnit};
use crate::pacing::{HumanPacer, Pacer};
use crate::phase::PhaseEnv;
use crate::retry::{with_retry, RetryPolicy};
use crate::session::{Session, SessionFactory};

/// Attempts per unit when the session keeps dying or getting blocked.
const MAX_UNIT_ATTEMPTS: u32 = 3;
const SESSION_CREATE_ATTEMPTS: u32 = 2;
const AFTER_RECREATE: DelayRange = DelayRange::new(5.0, 10.0);
const BETWEEN_SITES: DelayRange = DelayRange::new(2.0, 4.0);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub units_total: usize,
    /// Already in the checkpoint when the run started.
    pub already_done: usize,
    pub completed: usize,
    pub skipped: usize,
    /// Gave up for now, not checkpointed.
    pub unfinished: usize,
    pub leads: usize,
    pub interrupted: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units: {} resumed, {} completed, {} skipped, {} unfinished; {} leads",
            self.units_total,
            self.already_done,
            self.completed,
            self.skipped,
            self.unfinished,
            self.leads
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

enum UnitOutcome {
    Completed,
    Skipped(String),
    Unfinished,
}

enum PhaseOutcome {
    Leads(Vec<Lead>),
    Blocked,
}

pub struct Orchestrator {
    crawl: CrawlConfig,
    pacing: PacingConfig,
    region: RegionProfile,
    enrich_policy: RetryPolicy,
    mining_policy: RetryPolicy,
    checkpoint: CheckpointStore,
    intermediate_path: PathBuf,
    output_path: PathBuf,
    factory: SessionFactory,
    sink: Arc<dyn LeadSink>,
    pacer: Arc<dyn Pacer>,
    run: RunHandle,
    extractor: DetailExtractor,
    scanner: SiteScanner,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        launcher: Arc<dyn Launcher>,
        sink: Arc<dyn LeadSink>,
        run: RunHandle,
    ) -> anyhow::Result<Self> {
        let RetryConfig {
            enrich_attempts,
            enrich_delay,
            mining_attempts,
            mining_delay,
            backoff_factor,
        } = config.retry.clone();

        Ok(Self {
            crawl: config.crawl.clone(),
            pacing: config.pacing.clone(),
            region: config.region.clone(),
            enrich_policy: RetryPolicy::new(enrich_attempts, enrich_delay, backoff_factor),
            mining_policy: RetryPolicy::new(mining_attempts, mining_delay, backoff_factor),
            checkpoint: CheckpointStore::new(&config.storage.checkpoint_path),
            intermediate_path: config.storage.intermediate_path.clone(),
            output_path: config.storage.output_path.clone(),
            factory: SessionFactory::new(launcher, config.region.clone()),
            sink,
            pacer: Arc::new(HumanPacer::new(config.pacing.clone())),
            run,
            extractor: DetailExtractor::new(&config.region)?,
            scanner: SiteScanner::new()?,
        })
    }

    pub fn with_pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn with_mail_check(mut self, check: Arc<dyn MailDomainCheck>) -> Self {
        self.scanner.set_mail_check(check);
        self
    }

    fn env(&self) -> PhaseEnv<'_> {
        PhaseEnv {
            crawl: &self.crawl,
            pacing: &self.pacing,
            region: &self.region,
            pacer: self.pacer.as_ref(),
        }
    }

    pub fn run(&self) -> anyhow::Result<RunReport> {
        let units = WorkUnit::cross_product(&self.crawl.locations, &self.crawl.keywords);
        let checkpoint = self.checkpoint.load();
        let mut completed = checkpoint.completed_combinations.clone();

        let mut dataset = match Dataset::load_csv(&self.intermediate_path) {
            Ok(dataset) => dataset,
            Err(e) => {
                warn!("could not reload {}: {:#}", self.intermediate_path.display(), e);
                Dataset::new()
            }
        };

        let mut report = RunReport {
            units_total: units.len(),
            already_done: units.iter().filter(|u| checkpoint.is_completed(u)).count(),
            ..Default::default()
        };
        info!(
            "🚀 {} work units ({} locations × {} keywords), {} already done",
            report.units_total,
            self.crawl.locations.len(),
            self.crawl.keywords.len(),
            report.already_done
        );
        self.run.update(|s| {
            s.units_total = report.units_total;
            s.units_done = report.already_done;
            s.leads_total = dataset.len();
        });

        let mut session: Option<Session> = None;
        let mut done = report.already_done;

        for (idx, unit) in units.iter().enumerate() {
            let id = unit.id();
            if completed.contains(&id) {
                debug!("skipping completed unit {}", id);
                continue;
            }
            if self.run.stop_requested() {
                info!("🛑 stop requested, leaving {} for the next run", unit);
                report.interrupted = true;
                break;
            }

            info!(
                location = %unit.location,
                keyword = %unit.keyword,
                "▶️ unit {}/{}",
                idx + 1,
                units.len()
            );
            self.run.update(|s| s.current_unit = Some(unit.to_string()));

            match self.process_unit(&mut session, unit, &mut dataset) {
                UnitOutcome::Completed => report.completed += 1,
                UnitOutcome::Skipped(reason) => {
                    error!(unit = %id, "⏭️ skipping unit: {}", reason);
                    report.skipped += 1;
                }
                UnitOutcome::Unfinished => {
                    error!(unit = %id, "unit still failing after {} attempts, left for the next run", MAX_UNIT_ATTEMPTS);
                    report.unfinished += 1;
                    continue;
                }
            }

            completed.push(id);
            self.checkpoint.save(unit, &completed)?;
            done += 1;
            self.run.update(|s| {
                s.units_done = done;
                s.leads_total = dataset.len();
            });

            self.pacer.human(self.pacing.unit);
        }

        if let Some(session) = session.take() {
            session.shutdown();
        }
        report.leads = dataset.len();

        if report.interrupted {
            info!("progress kept in {}", self.checkpoint.path().display());
            return Ok(report);
        }

        dataset.save_csv(&self.output_path)?;
        log_coverage(&dataset);
        info!("💾 {} leads written to {}", dataset.len(), self.output_path.display());

        if report.unfinished == 0 {
            self.checkpoint.clear()?;
            remove_if_present(&self.intermediate_path)?;
        }
        Ok(report)
    }

    fn process_unit(
        &self,
        session: &mut Option<Session>,
        unit: &WorkUnit,
        dataset: &mut Dataset,
    ) -> UnitOutcome {
        for attempt in 1..=MAX_UNIT_ATTEMPTS {
            let Some(page) = self.ensure_session(session) else {
                return UnitOutcome::Skipped("browser session could not be recreated".to_string());
            };

            if block::is_blocked(page.as_ref()) {
                self.cool_down_and_discard(session);
                continue;
            }

            match self.run_phases(page.as_ref(), unit) {
                Ok(PhaseOutcome::Blocked) => self.cool_down_and_discard(session),
                Ok(PhaseOutcome::Leads(leads)) => {
                    return match self.persist(leads, dataset) {
                        Ok(()) => UnitOutcome::Completed,
                        Err(e) => UnitOutcome::Skipped(format!("{:#}", e)),
                    };
                }
                Err(e) if e.is_session_fatal() => {
                    warn!(attempt, "💥 session lost during {}: {}", unit, e);
                    if let Some(dead) = session.take() {
                        dead.shutdown();
                    }
                }
                Err(e) => return UnitOutcome::Skipped(e.to_string()),
            }
        }
        UnitOutcome::Unfinished
    }

    /// Healthy page from the current session, recreating it when needed.
    /// `None` after two failed recreations in a row.
    fn ensure_session(&self, slot: &mut Option<Session>) -> Option<PageRef> {
        if let Some(session) = slot.as_mut() {
            if self.factory.check_health(session) {
                return session.page().ok();
            }
            warn!("browser session unhealthy, recreating");
        }

        for attempt in 1..=SESSION_CREATE_ATTEMPTS {
            match self.factory.create(slot.take()) {
                Ok(session) => {
                    self.pacer.human(AFTER_RECREATE);
                    let page = session.page().ok();
                    *slot = Some(session);
                    return page;
                }
                Err(e) => {
                    error!(attempt, "browser session creation failed: {}", e);
                    if attempt < SESSION_CREATE_ATTEMPTS {
                        self.pacer.pause(self.crawl.recreate_cooldown);
                    }
                }
            }
        }
        None
    }

    fn cool_down_and_discard(&self, slot: &mut Option<Session>) {
        warn!(
            "🚫 blocked, cooling down {}s before a fresh session",
            self.crawl.block_cooldown.as_secs()
        );
        self.pacer.pause(self.crawl.block_cooldown);
        if let Some(session) = slot.take() {
            session.shutdown();
        }
    }

    fn run_phases(&self, page: &dyn BrowserPage, unit: &WorkUnit) -> BrowseResult<PhaseOutcome> {
        let env = self.env();
        let stubs = harvest::harvest(page, unit, &env)?;
        if stubs.is_empty() {
            if block::is_blocked(page) {
                return Ok(PhaseOutcome::Blocked);
            }
            info!("no results for {}", unit);
            return Ok(PhaseOutcome::Leads(Vec::new()));
        }

        let total = stubs.len();
        let mut leads = Vec::with_capacity(total);
        for (i, mut lead) in stubs.into_iter().enumerate() {
            debug!("[{}/{}] {}", i + 1, total, lead.name);

            let details = with_retry(&self.enrich_policy, env.pacer, "enrich", || {
                enrich::enrich(page, &lead.listing_ref, &self.extractor, &env)
            });
            match details {
                Ok(details) => lead.apply_details(details),
                Err(e) if e.is_session_fatal() => return Err(e),
                Err(e) => warn!(lead = %lead.name, "enrichment gave up: {}", e),
            }
            self.pacer.human(self.pacing.page);

            let website = lead.website.clone();
            if website.is_some() {
                let outcome = with_retry(&self.mining_policy, env.pacer, "mining", || {
                    mining::mine(page, website.as_deref(), &self.scanner, &env)
                });
                match outcome {
                    Ok(outcome) => lead.apply_mining(outcome),
                    Err(e) if e.is_session_fatal() => return Err(e),
                    Err(e) => {
                        warn!(lead = %lead.name, "mining gave up: {}", e);
                        lead.apply_mining(MiningOutcome::error());
                    }
                }
                self.pacer.human(BETWEEN_SITES);
            }
            leads.push(lead);
        }
        Ok(PhaseOutcome::Leads(leads))
    }

    /// Merge into the run's dataset, snapshot it, then hand the accepted
    /// leads to the sink.
    fn persist(&self, leads: Vec<Lead>, dataset: &mut Dataset) -> anyhow::Result<()> {
        let harvested = leads.len();
        let accepted = dataset.merge_all(leads);
        dataset.save_csv(&self.intermediate_path)?;
        info!(
            "💾 {} of {} leads kept, {} in dataset",
            accepted.len(),
            harvested,
            dataset.len()
        );

        if !accepted.is_empty() {
            match self.sink.upsert_all(&accepted) {
                Ok(stored) if stored < accepted.len() => warn!(
                    "{} of {} leads stored, the rest stay in the csv snapshot",
                    stored,
                    accepted.len()
                ),
                Ok(stored) => debug!("{} leads stored", stored),
                Err(e) => error!("database upsert failed, leads kept in the csv snapshot: {:#}", e),
            }
        }
        Ok(())
    }
}

/// One full run against a real Chrome.
pub fn chrome_run(
    config: &Config,
    sink: Arc<dyn LeadSink>,
    run: RunHandle,
) -> anyhow::Result<RunReport> {
    let launcher = Arc::new(ChromeLauncher::new(
        config.crawl.headless,
        config.crawl.chrome_path.clone(),
    ));
    let mut orchestrator = Orchestrator::new(config, launcher, sink, run)?;
    if config.crawl.verify_email_domains {
        match Handle::try_current() {
            Ok(handle) => {
                orchestrator = orchestrator.with_mail_check(Arc::new(DnsMailCheck::new(handle)));
            }
            Err(e) => warn!("no runtime for MX lookups, checking email syntax only: {}", e),
        }
    }
    orchestrator.run()
}

fn log_coverage(dataset: &Dataset) {
    let leads = dataset.leads();
    let count = |f: fn(&Lead) -> bool| leads.iter().filter(|l| f(l)).count();
    info!(
        total = leads.len(),
        address = count(|l| l.address.is_some()),
        phone = count(|l| l.phone.is_some()),
        website = count(|l| l.website.is_some()),
        rating = count(|l| l.rating.is_some()),
        reviews = count(|l| l.reviews_count.is_some()),
        email = count(|l| !l.emails.is_empty()),
        "📊 coverage"
    );
}
