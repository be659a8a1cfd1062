//! Pipeline event types: ClipEvent, ObservationEvent, DecisionEvent, ActionEvent
//!
//! Every event carries a `trace_id` correlating one pipeline run end-to-end,
//! plus a `trace_ctx` used to stitch telemetry spans across stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use super::ActionPayload;

/// Generate a fresh event / trace identifier.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// ============================================================================
// Stage & Milestone Vocabulary
// ============================================================================

/// One step of the pipeline.
///
/// `Producer` has no SLO (ingestion pacing is driven by the clip source);
/// `Dispatcher` is the delivery sub-stage inside the doer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Producer,
    Observer,
    Thinker,
    Doer,
    Dispatcher,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Producer => "producer",
            Stage::Observer => "observer",
            Stage::Thinker => "thinker",
            Stage::Doer => "doer",
            Stage::Dispatcher => "dispatcher",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline milestones recorded per trace for end-to-end latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Milestone {
    Clip,
    Observation,
    Decision,
    Action,
}

// ============================================================================
// Telemetry Trace Context
// ============================================================================

/// Opaque telemetry span linkage carried across stage boundaries.
///
/// Zero means "no parent span"; the telemetry backend is best-effort and the
/// pipeline never depends on these values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    #[serde(default)]
    pub trace_id: u64,
    #[serde(default)]
    pub span_id: u64,
}

// ============================================================================
// Tri-State Signals
// ============================================================================

/// Tri-state reading of a named visual signal.
///
/// Anything that is not literally "yes" or "no" (case-insensitive) collapses
/// to `Uncertain`; model output is untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriState {
    Yes,
    No,
    Uncertain,
}

impl TriState {
    pub fn from_signal(value: Option<&serde_json::Value>) -> Self {
        match value.and_then(|v| v.as_str()) {
            Some(s) if s.trim().eq_ignore_ascii_case("yes") => TriState::Yes,
            Some(s) if s.trim().eq_ignore_ascii_case("no") => TriState::No,
            _ => TriState::Uncertain,
        }
    }

    pub fn is_yes(&self) -> bool {
        matches!(self, TriState::Yes)
    }
}

/// Named signal map attached to an observation (values are free-form; the
/// tri-state keys are read through [`TriState::from_signal`]).
pub type SignalMap = BTreeMap<String, serde_json::Value>;

/// Model metadata stamped on observation / decision events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub latency_ms: u64,
}

// ============================================================================
// Stage 1: Clip Ingestion
// ============================================================================

/// One ingested video segment, spooled to disk.
///
/// The spooled file is deleted by the retention janitor after a fixed TTL, so
/// downstream stages must tolerate a missing file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipEvent {
    pub clip_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub trace_ctx: TraceContext,
    pub camera_id: String,
    pub clip_index: u64,
    pub clip_start_ts: DateTime<Utc>,
    pub clip_end_ts: DateTime<Utc>,
    pub clip_path: PathBuf,
}

// ============================================================================
// Stage 2: Observation
// ============================================================================

/// The observer's structured read of a clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEvent {
    pub observation_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub trace_ctx: TraceContext,
    pub clip_id: String,
    pub camera_id: String,
    pub clip_index: u64,
    pub ts: DateTime<Utc>,
    pub summary: String,
    #[serde(default)]
    pub signals: SignalMap,
    #[serde(default)]
    pub model: ModelInfo,
}

impl ObservationEvent {
    /// Read a named signal as tri-state.
    pub fn tri(&self, key: &str) -> TriState {
        TriState::from_signal(self.signals.get(key))
    }
}

// ============================================================================
// Stage 3: Decision
// ============================================================================

/// Severity attached to an assessment. Lenient parse, `Medium` fallback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentSeverity {
    Low,
    #[default]
    Medium,
    High,
}

impl AssessmentSeverity {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => AssessmentSeverity::Low,
            "high" => AssessmentSeverity::High,
            _ => AssessmentSeverity::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssessmentSeverity::Low => "low",
            AssessmentSeverity::Medium => "medium",
            AssessmentSeverity::High => "high",
        }
    }
}

/// The thinker's judgement of one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub violation: bool,
    pub rule_id: String,
    pub severity: AssessmentSeverity,
    pub confidence: f64,
    pub risk: String,
}

/// Supporting evidence behind a recommended action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub id: String,
    pub text: String,
}

/// Short rationale plus the citations that ground it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rationale {
    pub short: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
}

/// The thinker's judgement for one trace, with at most one recommended action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub decision_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub trace_ctx: TraceContext,
    pub clip_id: String,
    pub observation_id: String,
    pub camera_id: String,
    pub clip_index: u64,
    pub ts: DateTime<Utc>,
    pub assessment: Assessment,
    /// At most one action; normalization truncates anything longer.
    pub recommended_actions: Vec<ActionPayload>,
    #[serde(default)]
    pub rationale: Rationale,
    #[serde(default)]
    pub evidence: serde_json::Value,
    #[serde(default)]
    pub model: ModelInfo,
}

// ============================================================================
// Stage 4: Action
// ============================================================================

/// Terminal delivery outcome for one action attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Sent,
    Skipped,
    Failed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Sent => "sent",
            ActionStatus::Skipped => "skipped",
            ActionStatus::Failed => "failed",
        }
    }
}

/// Outcome of attempting to deliver an action. Published for audit only;
/// nothing consumes the actions topic in the data path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEvent {
    pub action_id: String,
    pub trace_id: String,
    #[serde(default)]
    pub trace_ctx: TraceContext,
    pub decision_id: String,
    pub camera_id: String,
    pub ts: DateTime<Utc>,
    pub action: ActionPayload,
    pub status: ActionStatus,
    pub provider: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tri_state_is_lenient() {
        assert_eq!(TriState::from_signal(Some(&json!("yes"))), TriState::Yes);
        assert_eq!(TriState::from_signal(Some(&json!("  NO "))), TriState::No);
        assert_eq!(
            TriState::from_signal(Some(&json!("maybe"))),
            TriState::Uncertain
        );
        assert_eq!(TriState::from_signal(Some(&json!(3))), TriState::Uncertain);
        assert_eq!(TriState::from_signal(None), TriState::Uncertain);
    }

    #[test]
    fn severity_parse_falls_back_to_medium() {
        assert_eq!(AssessmentSeverity::parse("HIGH"), AssessmentSeverity::High);
        assert_eq!(AssessmentSeverity::parse("low"), AssessmentSeverity::Low);
        assert_eq!(
            AssessmentSeverity::parse("catastrophic"),
            AssessmentSeverity::Medium
        );
    }
}
