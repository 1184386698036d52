//! riskgate - Real-time Risk Gatekeeper
//!
//! Streams enterprise action events through signal extraction, hybrid
//! decisioning, and action dispatch.
//!
//! # Usage
//!
//! ```bash
//! # Run the pipeline against the in-process bus with synthetic demo traffic
//! riskgate demo --events 500
//!
//! # Run the pipeline and wait for external producers (Ctrl-C to stop)
//! riskgate run
//!
//! # Force a decision mode regardless of config
//! DECISION_MODE=fast riskgate demo
//! ```
//!
//! # Environment Variables
//!
//! - `RISKGATE_CONFIG`: path to the TOML config file
//! - `BUS_*`, `CACHE_*`, `AI_*`, `THRESHOLD_*`, `FREQ_*`, `RATE_LIMIT_*`,
//!   `DECISION_MODE`: per-key overrides (environment wins over file)
//! - `AI_API_KEY`: hosted-model credential (enables the AI path)
//! - `RUST_LOG`: logging filter (default: info)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use riskgate::bus::InMemoryBus;
use riskgate::config::{self, GatekeeperConfig};
use riskgate::llm::{HttpBackend, MockBackend, RiskBackend};
use riskgate::pipeline::Pipeline;
use riskgate::types::DecisionMode;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "riskgate")]
#[command(about = "Real-time risk gatekeeper for enterprise actions")]
#[command(version)]
struct CliArgs {
    #[command(subcommand)]
    command: Option<Command>,

    /// Override the decision mode (fast, hybrid, full_ai)
    #[arg(long, global = true)]
    mode: Option<DecisionMode>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline until interrupted (Ctrl-C)
    Run,
    /// Publish synthetic events, run the pipeline to completion, and print
    /// a stats summary
    Demo {
        /// Number of synthetic events to publish
        #[arg(long, default_value = "500")]
        events: u64,

        /// Pacing between events in milliseconds (0 = flat out)
        #[arg(long, default_value = "0")]
        interval_ms: u64,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut cfg = GatekeeperConfig::load().context("loading configuration")?;
    if let Some(mode) = args.mode {
        cfg.engine.mode = mode;
    }
    config::init(cfg);

    let runtime = tokio::runtime::Runtime::new().context("starting async runtime")?;
    runtime.block_on(async move {
        match args.command.unwrap_or(Command::Run) {
            Command::Run => run_pipeline().await,
            Command::Demo { events, interval_ms } => run_demo(events, interval_ms).await,
        }
    })
}

/// Pick the model backend: hosted HTTP when configured, otherwise none
/// (rule fallbacks on the AI path).
fn select_backend(cfg: &GatekeeperConfig) -> Option<Arc<dyn RiskBackend>> {
    HttpBackend::from_config(&cfg.ai).map(|backend| Arc::new(backend) as Arc<dyn RiskBackend>)
}

/// Run the pipeline against the in-process bus until Ctrl-C.
async fn run_pipeline() -> Result<()> {
    let cfg = config::get();
    let bus: Arc<dyn riskgate::bus::MessageBus> = Arc::new(InMemoryBus::new(cfg.bus.partitions));
    let backend = select_backend(cfg);

    let pipeline = Pipeline::start(bus, cfg, backend)?;

    info!("riskgate running - press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    let stats = pipeline.shutdown().await;
    stats.log_summary();
    Ok(())
}

/// Publish synthetic traffic, let the pipeline drain it, report stats.
async fn run_demo(events: u64, interval_ms: u64) -> Result<()> {
    let cfg = config::get();
    let bus: Arc<dyn riskgate::bus::MessageBus> = Arc::new(InMemoryBus::new(cfg.bus.partitions));

    // Demo runs fully offline: the mock backend exercises the whole hybrid
    // path (queue, cache, parsing) unless a real backend is configured.
    let backend = select_backend(cfg)
        .unwrap_or_else(|| Arc::new(MockBackend) as Arc<dyn RiskBackend>);

    let pipeline = Pipeline::start(Arc::clone(&bus), cfg, Some(backend))?;

    riskgate::demo::publish_demo_events(&bus, cfg, events, Duration::from_millis(interval_ms))
        .await?;

    // Wait until every event has flowed through to dispatch (bounded).
    let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
    while pipeline.stats().dispatch.actions_executed < events {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!("Demo drain timed out before all decisions dispatched");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let stats = pipeline.shutdown().await;
    stats.log_summary();
    Ok(())
}
