//! Pipeline stage agents and the behavioral contracts they share.
//!
//! ## Stages
//!
//! - **Observer**: clip -> structured observation (tri-state signal map)
//! - **Thinker**: observation -> decision (trigger rules, grounding, <=1 action)
//! - **Doer**: decision -> delivered action (dedup, enrichment, fallback)
//!
//! ## Shared contracts
//!
//! Every stage applies the same canonicalization ([`crate::types::ActionType`],
//! [`crate::types::Priority`]), dedup/cooldown gating ([`CooldownGate`]),
//! soft-JSON decoding with conservative fallbacks ([`extract_json_object`]),
//! and per-message error isolation; one bad message never kills a stage loop.

pub mod doer;
pub mod observer;
pub mod thinker;

pub use doer::DoerAgent;
pub use observer::ObserverAgent;
pub use thinker::ThinkerAgent;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::audit::{AuditBuffer, AuditKind};
use crate::config::PipelineConfig;
use crate::gameday::GameDayController;
use crate::llm::{estimate_cost, estimate_tokens};
use crate::telemetry::Telemetry;
use crate::types::Stage;

// ============================================================================
// Stage Error Taxonomy
// ============================================================================

/// Failure inside one stage's processing of one message.
///
/// Caught at the stage boundary, logged as an audit record, counted via a
/// failure metric; the loop continues with the next message.
#[derive(Debug, Error)]
pub enum StageError {
    /// Malformed or missing required input (e.g. an unreadable clip).
    #[error("bad input from {tool}: {reason}")]
    BadInput {
        tool: &'static str,
        reason: &'static str,
    },
    /// Anything else: dependency failures, generator errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StageError {
    pub fn error_type(&self) -> &'static str {
        match self {
            StageError::BadInput { .. } => "bad_input",
            StageError::Other(_) => "dependency",
        }
    }
}

// ============================================================================
// Dedup / Cooldown Gating
// ============================================================================

/// Suppresses repeated emissions for the same derived key within a cooldown
/// window. Admission records the new timestamp; suppression does not.
pub struct CooldownGate {
    window: Duration,
    last_emit: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an occurrence for `key` may be forwarded now.
    pub fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut last = self.last_emit.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(prev) = last.get(key) {
            if now.saturating_duration_since(*prev) < self.window {
                return false;
            }
        }
        last.insert(key.to_string(), now);
        true
    }
}

// ============================================================================
// Generator Accounting
// ============================================================================

/// Record latency, token, and cost accounting for one generator call: three
/// distributions, a call counter, and a health audit record. Token counts are
/// estimated from text length since the backend reports no usage.
#[allow(clippy::too_many_arguments)]
pub(crate) fn record_llm_call(
    audit: &AuditBuffer,
    telemetry: &dyn Telemetry,
    gameday: &GameDayController,
    cfg: &PipelineConfig,
    stage: Stage,
    trace_id: &str,
    model: &str,
    latency_ms: u64,
    input: &str,
    output: &str,
) {
    let cost = estimate_cost(
        estimate_tokens(input),
        estimate_tokens(output),
        cfg.generation.cost_per_1k_input,
        cfg.generation.cost_per_1k_output,
    );
    let mut tags = gameday.tags();
    tags.push(("stage", stage.as_str().to_string()));
    tags.push(("model", model.to_string()));
    telemetry.count("linesight.llm.calls", 1, &tags);
    telemetry.distribution("linesight.llm.latency_ms", latency_ms as f64, &tags);
    telemetry.distribution("linesight.llm.tokens", cost.total_tokens as f64, &tags);
    telemetry.distribution("linesight.llm.cost_usd", cost.total_cost, &tags);
    audit.add(
        AuditKind::Health,
        trace_id,
        gameday.tag_payload(serde_json::json!({
            "event": "llm_call",
            "stage": stage.as_str(),
            "model": model,
            "latency_ms": latency_ms,
            "tokens": cost.total_tokens,
            "cost_usd": cost.total_cost,
        })),
    );
}

/// Extract the outermost JSON object from free-form generated text.
///
/// Models wrap JSON in prose and code fences; take everything between the
/// first `{` and the last `}`.
pub fn extract_json_object(text: &str) -> Result<serde_json::Value, &'static str> {
    let start = text.find('{').ok_or("no_json")?;
    let end = text.rfind('}').ok_or("no_json")?;
    if end <= start {
        return Err("no_json");
    }
    serde_json::from_str(&text[start..=end]).map_err(|_| "json_parse_fail")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn cooldown_suppresses_within_window() {
        let gate = CooldownGate::new(Duration::from_secs(10));
        assert!(gate.admit("cam-1:panel_open_while_operating"));
        assert!(!gate.admit("cam-1:panel_open_while_operating"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!gate.admit("cam-1:panel_open_while_operating"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(gate.admit("cam-1:panel_open_while_operating"));
    }

    #[tokio::test]
    async fn cooldown_keys_are_independent() {
        let gate = CooldownGate::new(Duration::from_secs(10));
        assert!(gate.admit("cam-1:walkway_violation"));
        assert!(gate.admit("cam-2:walkway_violation"));
        assert!(gate.admit("cam-1:guard_open_while_operating"));
    }

    #[test]
    fn extracts_json_from_prose() {
        let v = extract_json_object("Here you go:\n```json\n{\"a\": 1}\n```")
            .expect("should parse");
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn reports_missing_and_malformed_json() {
        assert_eq!(extract_json_object("no braces here"), Err("no_json"));
        assert_eq!(extract_json_object("{not valid"), Err("no_json"));
        assert_eq!(extract_json_object("{not: valid}"), Err("json_parse_fail"));
    }
}
