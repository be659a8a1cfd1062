//! SLO watchdog: detects stages that exceed their threshold while still in
//! flight, with per-key debounce to avoid alert storms.
//!
//! Every poll interval the watchdog snapshots all in-flight stage entries and
//! compares elapsed time against the configured per-stage SLO. Stages without
//! a threshold (ingestion) are ignored. A breach for a given (trace, stage)
//! key fires at most once per debounce window; a stage that stays over-SLO
//! fires again each window until it ends. The watchdog reports; it never
//! intervenes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::audit::{AuditBuffer, AuditKind};
use crate::config::PipelineConfig;
use crate::gameday::GameDayController;
use crate::telemetry::{AlertLevel, Telemetry};

use super::state::RuntimeState;

/// Remediation hints attached to every breach record.
const RUNBOOK: [&str; 3] = [
    "Check tool error-rate for dependencies",
    "Inspect generator latency and token spikes",
    "Enable degrade mode if repeated",
];

pub struct Watchdog {
    cfg: Arc<PipelineConfig>,
    audit: Arc<AuditBuffer>,
    state: Arc<RuntimeState>,
    gameday: Arc<GameDayController>,
    telemetry: Arc<dyn Telemetry>,
    /// Last firing time per (trace, stage) key, for debounce.
    fired: Mutex<HashMap<String, Instant>>,
}

impl Watchdog {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        audit: Arc<AuditBuffer>,
        state: Arc<RuntimeState>,
        gameday: Arc<GameDayController>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            cfg,
            audit,
            state,
            gameday,
            telemetry,
            fired: Mutex::new(HashMap::new()),
        }
    }

    /// Poll until cancelled. Errors observing one trace never stop the loop
    /// or prevent other traces from being checked.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = Duration::from_millis(self.cfg.watchdog.poll_interval_ms);
        let mut ticker = tokio::time::interval(interval);
        info!(
            poll_ms = self.cfg.watchdog.poll_interval_ms,
            debounce_s = self.cfg.watchdog.debounce_secs,
            "watchdog started"
        );
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(),
            }
        }
        info!("watchdog stopped");
    }

    /// One polling pass. Public so timing tests can drive the clock directly.
    pub fn tick(&self) {
        let now = Instant::now();
        let debounce = Duration::from_secs(self.cfg.watchdog.debounce_secs);
        let inflight = self.state.inflight_snapshot();

        for (key, inf) in &inflight {
            let Some(slo) = self.cfg.slo_for(inf.stage) else {
                continue;
            };
            let elapsed = now.saturating_duration_since(inf.started_at);
            if elapsed < slo {
                continue;
            }

            {
                let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(last) = fired.get(key.as_str()) {
                    if now.saturating_duration_since(*last) < debounce {
                        continue;
                    }
                }
                fired.insert(key.as_str().to_string(), now);
            }

            let elapsed_ms = elapsed.as_millis() as u64;
            let slo_ms = slo.as_millis() as u64;
            debug!(
                stage = %inf.stage,
                trace_id = %inf.trace_id,
                elapsed_ms,
                slo_ms,
                "stage SLO breach"
            );

            let payload = serde_json::json!({
                "event": "stage_timeout",
                "stage": inf.stage.as_str(),
                "trace_id": inf.trace_id,
                "clip_index": inf.clip_index,
                "elapsed_ms": elapsed_ms,
                "slo_ms": slo_ms,
                "impact": "pipeline_delay_or_missed_action",
                "runbook": RUNBOOK,
            });
            self.audit
                .add(AuditKind::StageTimeout, &inf.trace_id, self.gameday.tag_payload(payload));

            let mut tags = self.gameday.tags();
            tags.push(("stage", inf.stage.as_str().to_string()));
            self.telemetry.count("linesight.stage.timeout", 1, &tags);
            self.telemetry.event(
                &format!("SLO breach: {}", inf.stage),
                &format!(
                    "Stage {} exceeded SLO: {}ms > {}ms. trace_id={} clip_index={}",
                    inf.stage, elapsed_ms, slo_ms, inf.trace_id, inf.clip_index
                ),
                AlertLevel::Warning,
                &tags,
            );
        }

        // Drop stale debounce entries so the map stays bounded. An entry for
        // an ended stage is kept until its debounce window has also elapsed;
        // a rapid end/re-begin of the same key must not fire a second breach
        // inside the window.
        let live: std::collections::HashSet<&str> =
            inflight.iter().map(|(k, _)| k.as_str()).collect();
        self.fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|k, t| {
                live.contains(k.as_str()) || now.saturating_duration_since(*t) < debounce
            });
    }
}
