//! Linesight - factory-floor video operational intelligence pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Run with the synthetic clip source and stub generators
//! cargo run --release
//!
//! # Produce 20 clips, one every 500ms, with the dispatcher outage rehearsal
//! cargo run --release -- --clips 20 --clip-interval-ms 500 --scenario dependency_outage
//! ```
//!
//! # Environment Variables
//!
//! - `LINESIGHT_CONFIG`: Path to a TOML config file (default: ./linesight.toml)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use linesight::agents::{DoerAgent, ObserverAgent, ThinkerAgent};
use linesight::ingest::{run_janitor, ClipProducer, SyntheticClipSource};
use linesight::telemetry::{HeartbeatEmitter, LogTelemetry, QueueDepthEmitter, Telemetry};
use linesight::tools::{Dispatcher, SopLookup};
use linesight::{AuditBuffer, Bus, GameDayController, PipelineConfig, RuntimeState, Watchdog};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "linesight")]
#[command(about = "Factory-floor video operational intelligence pipeline")]
#[command(version)]
struct CliArgs {
    /// Path to a TOML config file (overrides LINESIGHT_CONFIG)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// GameDay scenario to activate at startup
    /// (none | dependency_outage | slow_stage | prompt_injection)
    #[arg(long)]
    scenario: Option<String>,

    /// Number of synthetic clips to produce before shutting down
    /// (0 = run until Ctrl+C)
    #[arg(long, default_value = "0")]
    clips: u64,

    /// Milliseconds between synthetic clips
    #[arg(long, default_value = "2000")]
    clip_interval_ms: u64,
}

// ============================================================================
// Task Names for Supervisor Logging
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    Producer,
    Observer,
    Thinker,
    Doer,
    Watchdog,
    Heartbeat,
    QueueDepth,
    Janitor,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::Producer => write!(f, "Producer"),
            TaskName::Observer => write!(f, "Observer"),
            TaskName::Thinker => write!(f, "Thinker"),
            TaskName::Doer => write!(f, "Doer"),
            TaskName::Watchdog => write!(f, "Watchdog"),
            TaskName::Heartbeat => write!(f, "Heartbeat"),
            TaskName::QueueDepth => write!(f, "QueueDepth"),
            TaskName::Janitor => write!(f, "Janitor"),
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let cfg = Arc::new(match &args.config {
        Some(path) => PipelineConfig::load_from_file(std::path::Path::new(path))?,
        None => PipelineConfig::load(),
    });

    info!("Linesight - video operational intelligence pipeline");
    info!(
        camera = %cfg.ingest.camera_id,
        spool = %cfg.ingest.spool_dir.display(),
        "pipeline configured"
    );

    // Shared infrastructure, dependency-injected into every component.
    let bus = Arc::new(Bus::new());
    let audit = Arc::new(AuditBuffer::new(cfg.audit.capacity));
    let state = Arc::new(RuntimeState::new());
    let telemetry: Arc<dyn Telemetry> = Arc::new(LogTelemetry);
    let gameday = Arc::new(GameDayController::new(
        &cfg.gameday,
        Arc::clone(&audit),
        Arc::clone(&telemetry),
    ));
    if let Some(scenario) = &args.scenario {
        let active = gameday.set_scenario(scenario);
        info!(scenario = %active, "gameday scenario activated");
    }
    let dispatcher = Arc::new(Dispatcher::new());
    let sop = Arc::new(SopLookup::new(cfg.tools.sop_path.clone()));

    // Generator backends: stub mode unless generation is enabled and a real
    // backend is wired in at this seam.
    if cfg.generation.enabled {
        info!("generation.enabled is set but no backend is configured; running stubs");
    }
    let observer_gen = None;
    let thinker_gen = None;
    let doer_gen = None;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl+C received, shutting down");
        shutdown.cancel();
    });

    let mut tasks: JoinSet<TaskName> = JoinSet::new();

    // Stage agents
    let observer = Arc::new(ObserverAgent::new(
        Arc::clone(&cfg),
        Arc::clone(&bus),
        Arc::clone(&audit),
        Arc::clone(&state),
        Arc::clone(&gameday),
        Arc::clone(&telemetry),
        observer_gen,
    ));
    let observer_cancel = cancel.clone();
    tasks.spawn(async move {
        observer.run(observer_cancel).await;
        TaskName::Observer
    });

    let thinker = Arc::new(ThinkerAgent::new(
        Arc::clone(&cfg),
        Arc::clone(&bus),
        Arc::clone(&audit),
        Arc::clone(&state),
        Arc::clone(&gameday),
        Arc::clone(&telemetry),
        Arc::clone(&sop),
        thinker_gen,
    ));
    let thinker_cancel = cancel.clone();
    tasks.spawn(async move {
        thinker.run(thinker_cancel).await;
        TaskName::Thinker
    });

    let doer = Arc::new(DoerAgent::new(
        Arc::clone(&cfg),
        Arc::clone(&bus),
        Arc::clone(&audit),
        Arc::clone(&state),
        Arc::clone(&gameday),
        Arc::clone(&telemetry),
        Arc::clone(&dispatcher),
        doer_gen,
    ));
    let doer_cancel = cancel.clone();
    tasks.spawn(async move {
        doer.run(doer_cancel).await;
        TaskName::Doer
    });

    // Background tasks
    let watchdog = Arc::new(Watchdog::new(
        Arc::clone(&cfg),
        Arc::clone(&audit),
        Arc::clone(&state),
        Arc::clone(&gameday),
        Arc::clone(&telemetry),
    ));
    let watchdog_cancel = cancel.clone();
    tasks.spawn(async move {
        watchdog.run(watchdog_cancel).await;
        TaskName::Watchdog
    });

    let heartbeat = HeartbeatEmitter::new(
        Arc::clone(&telemetry),
        Duration::from_secs(cfg.telemetry.heartbeat_interval_secs),
    );
    let heartbeat_cancel = cancel.clone();
    tasks.spawn(async move {
        heartbeat.run(heartbeat_cancel).await;
        TaskName::Heartbeat
    });

    let depth = QueueDepthEmitter::new(
        Arc::clone(&bus),
        Arc::clone(&telemetry),
        Duration::from_secs(cfg.telemetry.queue_depth_interval_secs),
    );
    let depth_cancel = cancel.clone();
    tasks.spawn(async move {
        depth.run(depth_cancel).await;
        TaskName::QueueDepth
    });

    let janitor_cfg = Arc::clone(&cfg);
    let janitor_telemetry = Arc::clone(&telemetry);
    let janitor_cancel = cancel.clone();
    tasks.spawn(async move {
        run_janitor(janitor_cfg, janitor_telemetry, janitor_cancel).await;
        TaskName::Janitor
    });

    // Producer last, so consumers are already draining the bus.
    let producer = ClipProducer::new(
        Arc::clone(&cfg),
        Arc::clone(&bus),
        Arc::clone(&audit),
        Arc::clone(&state),
        Arc::clone(&gameday),
        Arc::clone(&telemetry),
    );
    let staging_dir = cfg.ingest.spool_dir.join("staging");
    let source = SyntheticClipSource::new(
        staging_dir,
        cfg.ingest.clip_seconds,
        Duration::from_millis(args.clip_interval_ms),
        cfg.ingest.min_clip_bytes,
        (args.clips > 0).then_some(args.clips),
    );
    let producer_cancel = cancel.clone();
    tasks.spawn(async move {
        producer.run(Box::new(source), producer_cancel).await;
        TaskName::Producer
    });

    // Supervisor: a finite clip run ends when the producer finishes and the
    // bus drains; everything else runs until Ctrl+C.
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(TaskName::Producer) if args.clips > 0 => {
                info!("finite clip run complete, draining pipeline");
                drain_bus(&bus).await;
                cancel.cancel();
            }
            Ok(name) => info!(task = %name, "task finished"),
            Err(e) => {
                error!(error = %e, "task panicked, shutting down");
                cancel.cancel();
            }
        }
    }

    let kpi = audit.kpi();
    info!(
        observations = kpi.observations,
        decisions = kpi.decisions,
        actions = kpi.actions,
        sent = kpi.action_sent,
        failed = kpi.action_failed,
        skipped = kpi.action_skipped,
        stop_line = kpi.stop_line,
        alerts = kpi.alert,
        stage_timeouts = kpi.stage_timeouts,
        "final KPI snapshot"
    );
    info!("linesight shutdown complete");
    Ok(())
}

/// Wait for all bus topics to empty (bounded at 30s) so a finite run flushes
/// in-flight work before cancelling the stage loops.
async fn drain_bus(bus: &Bus) {
    use linesight::Topic;
    for _ in 0..300 {
        let backlog: usize = Topic::ALL.iter().map(|t| bus.queue_depth(*t)).sum();
        if backlog == 0 {
            // One more beat so the last consumed message finishes processing.
            tokio::time::sleep(Duration::from_millis(500)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
