//! Pipeline configuration loaded from TOML with env override.
//!
//! Every timing knob that was previously a magic number is an operator-tunable
//! value here. Each section implements `Default` from `defaults`, so behavior
//! is unchanged when no config file is present.
//!
//! ## Loading Order
//!
//! 1. `LINESIGHT_CONFIG` environment variable (path to TOML file)
//! 2. `linesight.toml` in the current working directory
//! 3. Built-in defaults

pub mod defaults;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::types::Stage;
use defaults::*;

// ============================================================================
// Sections
// ============================================================================

/// Ingestion and spool retention settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub camera_id: String,
    pub clip_seconds: f64,
    pub spool_dir: PathBuf,
    pub clip_ttl_secs: u64,
    pub janitor_interval_secs: u64,
    pub min_clip_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            camera_id: "cam-security-1".to_string(),
            clip_seconds: CLIP_SECONDS,
            spool_dir: PathBuf::from("./tmp/clips"),
            clip_ttl_secs: CLIP_TTL_SECS,
            janitor_interval_secs: JANITOR_INTERVAL_SECS,
            min_clip_bytes: MIN_CLIP_BYTES,
        }
    }
}

/// Per-stage SLO thresholds (ms). The producer has no SLO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SloConfig {
    pub observer_ms: u64,
    pub thinker_ms: u64,
    pub doer_ms: u64,
    pub dispatcher_ms: u64,
    pub pipeline_e2e_ms: u64,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            observer_ms: SLO_OBSERVER_MS,
            thinker_ms: SLO_THINKER_MS,
            doer_ms: SLO_DOER_MS,
            dispatcher_ms: SLO_DISPATCHER_MS,
            pipeline_e2e_ms: SLO_PIPELINE_E2E_MS,
        }
    }
}

/// Watchdog polling and debounce settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_ms: u64,
    pub debounce_secs: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: WATCHDOG_POLL_INTERVAL_MS,
            debounce_secs: WATCHDOG_DEBOUNCE_SECS,
        }
    }
}

/// Audit ring-buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: AUDIT_CAPACITY,
        }
    }
}

/// Stage-specific dedup/cooldown windows (seconds).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub thinker_secs: u64,
    pub doer_secs: u64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            thinker_secs: THINKER_COOLDOWN_SECS,
            doer_secs: DOER_COOLDOWN_SECS,
        }
    }
}

/// GameDay fault-injection controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameDayConfig {
    /// Global kill switch. When false, `active()` is always false regardless
    /// of the stored scenario.
    pub enabled: bool,
    /// Scenario active at startup. Invalid names fall back to "none".
    pub scenario: String,
    /// When true, stages actually simulate the fault (not just tag telemetry).
    pub force: bool,
}

impl Default for GameDayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scenario: "none".to_string(),
            force: true,
        }
    }
}

/// Text-generation settings. `enabled = false` runs every agent in
/// deterministic stub mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub enabled: bool,
    pub observer_model: String,
    pub thinker_model: String,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            observer_model: "stub-observer".to_string(),
            thinker_model: "stub-thinker".to_string(),
            cost_per_1k_input: COST_PER_1K_INPUT,
            cost_per_1k_output: COST_PER_1K_OUTPUT,
        }
    }
}

/// External tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub sop_path: PathBuf,
    pub sop_budget_ms: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sop_path: PathBuf::from("./data/sop/assembly_sop.json"),
            sop_budget_ms: SOP_BUDGET_MS,
        }
    }
}

/// Background telemetry emitter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub heartbeat_interval_secs: u64,
    pub queue_depth_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: HEARTBEAT_INTERVAL_SECS,
            queue_depth_interval_secs: QUEUE_DEPTH_INTERVAL_SECS,
        }
    }
}

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one pipeline deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ingest: IngestConfig,
    pub slo: SloConfig,
    pub watchdog: WatchdogConfig,
    pub audit: AuditConfig,
    pub cooldown: CooldownConfig,
    pub gameday: GameDayConfig,
    pub generation: GenerationConfig,
    pub tools: ToolsConfig,
    pub telemetry: TelemetryConfig,
}

impl PipelineConfig {
    /// Load configuration using the standard search order:
    /// 1. `$LINESIGHT_CONFIG` environment variable
    /// 2. `./linesight.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("LINESIGHT_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from LINESIGHT_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from LINESIGHT_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "LINESIGHT_CONFIG points to non-existent file, falling back");
            }
        }

        let local = Path::new("linesight.toml");
        if local.exists() {
            match Self::load_from_file(local) {
                Ok(config) => {
                    info!("Loaded config from ./linesight.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse ./linesight.toml, using defaults");
                }
            }
        }

        info!("No config file found, using built-in defaults");
        Self::default()
    }

    /// Parse a TOML config file. Missing sections take their defaults.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// SLO threshold for a stage, if one is configured. Ingestion has none;
    /// the watchdog ignores it.
    pub fn slo_for(&self, stage: Stage) -> Option<Duration> {
        let ms = match stage {
            Stage::Producer => return None,
            Stage::Observer => self.slo.observer_ms,
            Stage::Thinker => self.slo.thinker_ms,
            Stage::Doer => self.slo.doer_ms,
            Stage::Dispatcher => self.slo.dispatcher_ms,
        };
        Some(Duration::from_millis(ms))
    }

    /// Bounded wait for stage consume loops.
    pub fn consume_timeout(&self) -> Duration {
        Duration::from_millis(CONSUME_TIMEOUT_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_all_stages_except_producer() {
        let cfg = PipelineConfig::default();
        assert!(cfg.slo_for(Stage::Producer).is_none());
        assert_eq!(
            cfg.slo_for(Stage::Observer),
            Some(Duration::from_millis(SLO_OBSERVER_MS))
        );
        assert_eq!(
            cfg.slo_for(Stage::Dispatcher),
            Some(Duration::from_millis(SLO_DISPATCHER_MS))
        );
    }

    #[test]
    fn partial_toml_keeps_section_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            [slo]
            observer_ms = 9000

            [gameday]
            scenario = "slow_stage"
            "#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.slo.observer_ms, 9000);
        assert_eq!(cfg.slo.thinker_ms, SLO_THINKER_MS);
        assert_eq!(cfg.gameday.scenario, "slow_stage");
        assert!(cfg.gameday.enabled);
        assert_eq!(cfg.audit.capacity, AUDIT_CAPACITY);
    }
}
