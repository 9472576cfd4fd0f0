use std::sync::Arc;

use anyhow::bail;
use sqlx::SqlitePool;
use tokio::runtime::Handle;
use tracing::{info, warn};

use leadcrawl::api::{self, AppState};
use leadcrawl::checkpoint::CheckpointStore;
use leadcrawl::config::Config;
use leadcrawl::control::RunController;
use leadcrawl::db::{self, LeadSink, SqliteSink};
use leadcrawl::logging::{self, LogTail};
use leadcrawl::orchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let logs = LogTail::default();
    logging::init(logs.clone());

    let config = Arc::new(Config::from_env()?);

    let pool = db::connect(&config.storage.database_url).await?;
    db::init_db(&pool).await?;

    let controller = RunController::new(CheckpointStore::new(&config.storage.checkpoint_path));

    match std::env::args().nth(1).as_deref() {
        None | Some("serve") => serve(config, pool, controller, logs).await,
        Some("run") => run_once(config, pool, controller).await,
        Some(other) => bail!("unknown command `{}`, expected `serve` or `run`", other),
    }
}

async fn serve(
    config: Arc<Config>,
    pool: SqlitePool,
    controller: RunController,
    logs: LogTail,
) -> anyhow::Result<()> {
    let addr = config.server.addr()?;
    let state = Arc::new(AppState {
        pool,
        config,
        controller,
        logs,
    });
    let app = api::router(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 Listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

async fn shutdown_signal(state: Arc<AppState>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ could not listen for Ctrl-C: {}", e);
        return;
    }
    if state.controller.is_running() {
        let _ = state.controller.stop();
    }
    info!("👋 shutting down");
}

/// One crawl in the foreground; Ctrl-C stops after the current work unit.
async fn run_once(
    config: Arc<Config>,
    pool: SqlitePool,
    controller: RunController,
) -> anyhow::Result<()> {
    let sink: Arc<dyn LeadSink> = Arc::new(SqliteSink::new(pool, Handle::current()));
    let started = controller.start(move |run| orchestrator::chrome_run(&config, sink, run))?;
    let mut join = started.join;

    tokio::select! {
        res = &mut join => res?,
        _ = tokio::signal::ctrl_c() => {
            let _ = controller.stop();
            join.await?;
        }
    }

    let status = controller.status();
    match status.run.last_result {
        Some(summary) if summary.starts_with("failed") => bail!(summary),
        Some(summary) => info!("✅ {}", summary),
        None => {}
    }
    Ok(())
}
