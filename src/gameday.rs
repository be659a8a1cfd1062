//! GameDay scenario controller: validated fault-injection state machine.
//!
//! Holds one globally active fault scenario from a fixed set. Every stage
//! consults the controller (never a cached copy) on every message to decide
//! whether to simulate the corresponding fault. `tags()` stamps the current
//! scenario onto all telemetry and audit records so fault-injection windows
//! are distinguishable in historical data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audit::{AuditBuffer, AuditKind};
use crate::telemetry::{Tags, Telemetry};
use std::sync::Arc;

/// The fixed valid-scenario set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    #[default]
    None,
    /// The delivery tool reports itself unavailable.
    DependencyOutage,
    /// The observer stage sleeps past its SLO on every clip.
    SlowStage,
    /// Adversarial instructions are injected into generated text.
    PromptInjection,
}

impl Scenario {
    /// Parse a scenario name, falling back to `None` on anything invalid.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "dependency_outage" => Scenario::DependencyOutage,
            "slow_stage" => Scenario::SlowStage,
            "prompt_injection" => Scenario::PromptInjection,
            _ => Scenario::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::None => "none",
            Scenario::DependencyOutage => "dependency_outage",
            Scenario::SlowStage => "slow_stage",
            Scenario::PromptInjection => "prompt_injection",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time controller status.
#[derive(Debug, Clone, Serialize)]
pub struct GameDayStatus {
    pub enabled: bool,
    pub scenario: Scenario,
    /// Unix timestamp of the last scenario activation.
    pub since_ts: u64,
    pub force: bool,
}

struct ScenarioState {
    scenario: Scenario,
    since_ts: u64,
}

/// Validated state machine selecting the active fault-injection scenario.
pub struct GameDayController {
    enabled: bool,
    force: bool,
    state: Mutex<ScenarioState>,
    audit: Arc<AuditBuffer>,
    telemetry: Arc<dyn Telemetry>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl GameDayController {
    /// Build from config. An invalid or disabled configured scenario is
    /// forced to `None`.
    pub fn new(
        cfg: &crate::config::GameDayConfig,
        audit: Arc<AuditBuffer>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let initial = if cfg.enabled {
            Scenario::parse(&cfg.scenario)
        } else {
            Scenario::None
        };
        Self {
            enabled: cfg.enabled,
            force: cfg.force,
            state: Mutex::new(ScenarioState {
                scenario: initial,
                since_ts: unix_now(),
            }),
            audit,
            telemetry,
        }
    }

    pub fn status(&self) -> GameDayStatus {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        GameDayStatus {
            enabled: self.enabled,
            scenario: state.scenario,
            since_ts: state.since_ts,
            force: self.force,
        }
    }

    /// Atomically swap the active scenario. Invalid names fall back to
    /// `None`. Records an audit event and resets the activation timestamp.
    pub fn set_scenario(&self, name: &str) -> Scenario {
        let scenario = Scenario::parse(name);
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.scenario = scenario;
            state.since_ts = unix_now();
        }
        self.audit.add(
            AuditKind::Health,
            "gameday",
            serde_json::json!({
                "event": "scenario_set",
                "scenario": scenario.as_str(),
            }),
        );
        self.telemetry.count(
            "linesight.gameday.scenario_set",
            1,
            &vec![("scenario", scenario.as_str().to_string())],
        );
        scenario
    }

    /// Equivalent to `set_scenario("none")`.
    pub fn reset(&self) {
        self.set_scenario("none");
    }

    /// Cheap read-only check used by every stage. Always false when the
    /// controller is globally disabled, regardless of the stored scenario.
    pub fn active(&self, scenario: Scenario) -> bool {
        if !self.enabled {
            return false;
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.scenario == scenario
    }

    /// Whether an active scenario should actually simulate its fault rather
    /// than only tag telemetry.
    pub fn forced(&self) -> bool {
        self.force
    }

    /// Scenario/enabled tags for every emitted telemetry and audit record.
    pub fn tags(&self) -> Tags {
        let st = self.status();
        vec![
            ("scenario", st.scenario.as_str().to_string()),
            ("gameday", st.enabled.to_string()),
        ]
    }

    /// The same tags as a JSON object, for merging into audit payloads.
    pub fn tags_json(&self) -> serde_json::Value {
        let st = self.status();
        serde_json::json!({
            "scenario": st.scenario.as_str(),
            "gameday": st.enabled,
        })
    }

    /// Stamp the scenario tags onto an audit payload object.
    pub fn tag_payload(&self, mut payload: serde_json::Value) -> serde_json::Value {
        let st = self.status();
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("scenario".into(), st.scenario.as_str().into());
            obj.insert("gameday".into(), st.enabled.into());
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameDayConfig;
    use crate::telemetry::NoopTelemetry;

    fn controller(enabled: bool, scenario: &str) -> GameDayController {
        GameDayController::new(
            &GameDayConfig {
                enabled,
                scenario: scenario.to_string(),
                force: true,
            },
            Arc::new(AuditBuffer::new(100)),
            Arc::new(NoopTelemetry),
        )
    }

    #[test]
    fn invalid_scenario_falls_back_to_none() {
        let gd = controller(true, "none");
        gd.set_scenario("not_a_real_scenario");
        assert_eq!(gd.status().scenario, Scenario::None);
    }

    #[test]
    fn set_and_reset() {
        let gd = controller(true, "none");
        gd.set_scenario("dependency_outage");
        assert!(gd.active(Scenario::DependencyOutage));
        gd.reset();
        assert_eq!(gd.status().scenario, Scenario::None);
        assert!(!gd.active(Scenario::DependencyOutage));
    }

    #[test]
    fn disabled_controller_is_never_active() {
        let gd = controller(false, "slow_stage");
        // Disabled at construction forces the stored scenario to none
        assert_eq!(gd.status().scenario, Scenario::None);
        gd.set_scenario("slow_stage");
        // Even with a stored scenario, active() is false while disabled
        assert_eq!(gd.status().scenario, Scenario::SlowStage);
        assert!(!gd.active(Scenario::SlowStage));
    }

    #[test]
    fn tags_expose_scenario_and_enabled_flag() {
        let gd = controller(true, "prompt_injection");
        let tags = gd.tags();
        assert!(tags.contains(&("scenario", "prompt_injection".to_string())));
        assert!(tags.contains(&("gameday", "true".to_string())));
    }

    #[test]
    fn scenario_parse_is_case_insensitive() {
        assert_eq!(Scenario::parse("  Slow_Stage "), Scenario::SlowStage);
        assert_eq!(Scenario::parse("DEPENDENCY_OUTAGE"), Scenario::DependencyOutage);
        assert_eq!(Scenario::parse(""), Scenario::None);
    }
}
