//! # SeoPilot — autonomous task orchestration server
//!
//! Wires the task pool, approval gate, cron scheduler, and HTTP gateway
//! together. All construction is explicit and happens here, once, before the
//! server starts; nothing is lazily initialized behind the API surface.
//!
//! Usage:
//!   seopilot                         # Start with ~/.seopilot/config.toml
//!   seopilot --config ./dev.toml     # Custom config file
//!   seopilot --port 9000             # Override the gateway port

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use seopilot_core::{ScheduleType, SeoPilotConfig, TaskPriority};
use seopilot_gateway::AppState;
use seopilot_pool::{
    AgentPool, ApprovalGate, HandlerRegistry, TaskQueue, TaskStore, TracingAuditLog,
    sink_from_config,
};
use seopilot_scheduler::{JobScheduler, SchedulerDb};
use tracing_subscriber::EnvFilter;

mod handlers;
mod jobs;

use handlers::{SiteProbeHandler, WebhookNotifyHandler};
use jobs::FanoutJob;

#[derive(Parser)]
#[command(name = "seopilot", version, about = "SeoPilot orchestration server")]
struct Cli {
    /// Config file path (default: ~/.seopilot/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the gateway port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "seopilot=debug,tower_http=debug"
    } else {
        "seopilot=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => SeoPilotConfig::load_from(std::path::Path::new(path))?,
        None => SeoPilotConfig::load()?,
    };
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    // Handlers first: task creation validates agent names against this table.
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("site-probe", Arc::new(SiteProbeHandler::new()));
    registry.register("webhook-notify", Arc::new(WebhookNotifyHandler::new()));

    let store = Arc::new(TaskStore::new(registry.clone()));
    let queue = Arc::new(TaskQueue::new());
    let alerts = sink_from_config(&config.alerts);
    let audit = Arc::new(TracingAuditLog);
    let pool = Arc::new(AgentPool::new(
        &config.pool,
        registry,
        store.clone(),
        queue.clone(),
        alerts,
        audit.clone(),
    ));
    pool.start();

    let gate = Arc::new(ApprovalGate::new(
        store,
        queue,
        audit,
        config.approvals.clone(),
    ));

    let db = Arc::new(SchedulerDb::open(&config.scheduler.resolved_db_path())?);
    let scheduler = Arc::new(JobScheduler::new(&config.scheduler, db)?);
    for schedule_type in [
        ScheduleType::Audit,
        ScheduleType::Content,
        ScheduleType::Technical,
        ScheduleType::Rankings,
    ] {
        scheduler.register_schedule_handler(
            schedule_type,
            Arc::new(FanoutJob::new(pool.clone(), "site-probe", TaskPriority::Medium)),
        );
    }
    scheduler.register_job(
        "audit-runner",
        "0 2 * * *",
        Arc::new(FanoutJob::new(pool.clone(), "site-probe", TaskPriority::Medium)),
    )?;
    scheduler.register_job(
        "ranking-tracker",
        "0 3 * * *",
        Arc::new(FanoutJob::new(pool.clone(), "site-probe", TaskPriority::Low)),
    )?;
    scheduler.register_job(
        "report-generator",
        "0 8 * * 1",
        Arc::new(FanoutJob::new(
            pool.clone(),
            "webhook-notify",
            TaskPriority::Low,
        )),
    )?;
    scheduler.rehydrate()?;
    scheduler.start();

    let state = AppState::new(pool.clone(), gate, scheduler.clone());
    let gateway_config = config.gateway.clone();
    tokio::select! {
        result = seopilot_gateway::serve(&gateway_config, state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    scheduler.stop().await;
    pool.stop().await;
    Ok(())
}
