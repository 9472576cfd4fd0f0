//! Run lifecycle shared by the crawl thread and the control surface.

use std::sync::atomic::{AtomicBool, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::orchestrator::RunReport;

/// Cooperative cancellation, honoured between work units.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatus {
    pub running: bool,
    pub run_id: Option<String>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub current_unit: Option<String>,
    pub units_total: usize,
    pub units_done: usize,
    pub leads_total: usize,
    pub stop_requested: bool,
    /// Summary of the last finished run, or its error.
    pub last_result: Option<String>,
}

/// What a running crawl holds: the stop flag and the status it reports into.
#[derive(Debug, Clone, Default)]
pub struct RunHandle {
    stop: StopSignal,
    status: Arc<RwLock<RunStatus>>,
}

impl RunHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    pub fn request_stop(&self) {
        self.stop.request();
        self.update(|s| s.stop_requested = true);
    }

    pub fn update(&self, f: impl FnOnce(&mut RunStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    pub fn snapshot(&self) -> RunStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("a scraping run is already in progress")]
    AlreadyRunning,
    #[error("no scraping run is in progress")]
    NotRunning,
}

/// Checkpoint-derived progress, readable while idle too.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckpointProgress {
    pub last_location: Option<String>,
    pub last_keyword: Option<String>,
    pub completed: usize,
    pub timestamp: Option<String>,
}

impl From<Checkpoint> for CheckpointProgress {
    fn from(checkpoint: Checkpoint) -> Self {
        Self {
            completed: checkpoint.completed_count(),
            last_location: checkpoint.last_location,
            last_keyword: checkpoint.last_keyword,
            timestamp: checkpoint.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub run: RunStatus,
    pub checkpoint: CheckpointProgress,
}

pub struct StartedRun {
    pub run_id: String,
    pub join: JoinHandle<()>,
}

/// Starts at most one crawl at a time on the blocking pool.
pub struct RunController {
    handle: RunHandle,
    checkpoint: CheckpointStore,
}

impl RunController {
    pub fn new(checkpoint: CheckpointStore) -> Self {
        Self {
            handle: RunHandle::new(),
            checkpoint,
        }
    }

    pub fn handle(&self) -> RunHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.snapshot().running
    }

    /// Must be called from inside a tokio runtime.
    pub fn start<F>(&self, job: F) -> Result<StartedRun, ControlError>
    where
        F: FnOnce(RunHandle) -> anyhow::Result<RunReport> + Send + 'static,
    {
        let run_id = Uuid::new_v4().to_string();
        {
            let mut status = self
                .handle
                .status
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if status.running {
                return Err(ControlError::AlreadyRunning);
            }
            let last_result = status.last_result.take();
            *status = RunStatus {
                running: true,
                run_id: Some(run_id.clone()),
                started_at: Some(chrono::Local::now().to_rfc3339()),
                last_result,
                ..Default::default()
            };
        }
        self.handle.stop.reset();

        info!(%run_id, "🚀 scraping run started");
        let handle = self.handle.clone();
        let join = tokio::task::spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(handle.clone())))
                .unwrap_or_else(|_| Err(anyhow::anyhow!("crawl thread panicked")));
            let summary = match result {
                Ok(report) => {
                    info!("🏁 {}", report);
                    report.to_string()
                }
                Err(e) => {
                    error!("❌ scraping run failed: {:#}", e);
                    format!("failed: {:#}", e)
                }
            };
            handle.update(|s| {
                s.running = false;
                s.current_unit = None;
                s.finished_at = Some(chrono::Local::now().to_rfc3339());
                s.last_result = Some(summary);
            });
        });

        Ok(StartedRun { run_id, join })
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        if !self.is_running() {
            return Err(ControlError::NotRunning);
        }
        info!("🛑 stop requested, finishing the current work unit");
        self.handle.request_stop();
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            run: self.handle.snapshot(),
            checkpoint: self.checkpoint.load().into(),
        }
    }
}
