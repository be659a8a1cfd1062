//! Thinker agent: observation -> decision.
//!
//! Deterministic trigger rules gate which observations are worth judging at
//! all; the generator only ever refines a decision the rules already allowed.
//! Grounding comes from the SOP lookup tool; a `stop_line` recommendation
//! without citations is downgraded to a P1 alert rather than trusted.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditBuffer, AuditKind};
use crate::bus::{Bus, BusMessage, Topic};
use crate::config::defaults::MAX_CITATIONS;
use crate::config::PipelineConfig;
use crate::gameday::GameDayController;
use crate::llm::prompts::THINKER_PROMPT;
use crate::llm::{GenerateRequest, TextGenerator};
use crate::runtime::RuntimeState;
use crate::telemetry::{AlertLevel, IncidentReport, Telemetry};
use crate::tools::{call_tool, SopLookup};
use crate::types::{
    new_id, normalize_actions, ActionType, Assessment, AssessmentSeverity, Citation,
    DecisionEvent, Milestone, ModelInfo, ObservationEvent, Priority, Rationale, Stage,
};

use super::{extract_json_object, CooldownGate, StageError};

/// Operator-facing message used when a line-stop lacks policy grounding.
const DEGRADED_STOP_MESSAGE: &str = "Potential high-risk event detected; policy grounding \
     unavailable - alert supervisor to verify before stopping line.";

// ============================================================================
// Trigger Rules
// ============================================================================

/// Deterministic escalation rules, highest precedence first. Exactly one rule
/// (the first match) applies per observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerRule {
    PanelOpenWhileOperating,
    GuardOpenWhileOperating,
    UnsafeProximityWhileOperating,
    RestrictedAreaEntry,
    WalkwayViolation,
}

impl TriggerRule {
    pub fn rule_id(&self) -> &'static str {
        match self {
            TriggerRule::PanelOpenWhileOperating => "panel_open_while_operating",
            TriggerRule::GuardOpenWhileOperating => "guard_open_while_operating",
            TriggerRule::UnsafeProximityWhileOperating => "unsafe_proximity_while_operating",
            TriggerRule::RestrictedAreaEntry => "restricted_area_entry",
            TriggerRule::WalkwayViolation => "walkway_violation",
        }
    }
}

/// First matching rule in precedence order, or `None` when nothing in the
/// signal map warrants a decision. Only explicit "yes" readings trigger;
/// uncertain never escalates.
pub fn evaluate_triggers(obs: &ObservationEvent) -> Option<TriggerRule> {
    let operating = obs.tri("machine_operating").is_yes();
    if operating && obs.tri("panel_open").is_yes() {
        return Some(TriggerRule::PanelOpenWhileOperating);
    }
    if operating && obs.tri("guard_open").is_yes() {
        return Some(TriggerRule::GuardOpenWhileOperating);
    }
    if operating && obs.tri("unsafe_proximity_to_machine").is_yes() {
        return Some(TriggerRule::UnsafeProximityWhileOperating);
    }
    if obs.tri("restricted_area_entry").is_yes() {
        return Some(TriggerRule::RestrictedAreaEntry);
    }
    if obs.tri("walkway_violation").is_yes() {
        return Some(TriggerRule::WalkwayViolation);
    }
    None
}

// ============================================================================
// Agent
// ============================================================================

struct ThinkOutcome {
    parse_ok: bool,
    decided: bool,
}

pub struct ThinkerAgent {
    cfg: Arc<PipelineConfig>,
    bus: Arc<Bus>,
    audit: Arc<AuditBuffer>,
    state: Arc<RuntimeState>,
    gameday: Arc<GameDayController>,
    telemetry: Arc<dyn Telemetry>,
    sop: Arc<SopLookup>,
    generator: Option<Arc<dyn TextGenerator>>,
    cooldown: CooldownGate,
}

impl ThinkerAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<PipelineConfig>,
        bus: Arc<Bus>,
        audit: Arc<AuditBuffer>,
        state: Arc<RuntimeState>,
        gameday: Arc<GameDayController>,
        telemetry: Arc<dyn Telemetry>,
        sop: Arc<SopLookup>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let cooldown = CooldownGate::new(Duration::from_secs(cfg.cooldown.thinker_secs));
        Self {
            cfg,
            bus,
            audit,
            state,
            gameday,
            telemetry,
            sop,
            generator,
            cooldown,
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("thinker started");
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => break,
                m = self.bus.consume(Topic::Observations, self.cfg.consume_timeout()) => m,
            };
            match msg {
                Some(BusMessage::Observation(obs)) => self.handle_observation(obs).await,
                Some(_) => warn!("non-observation message on observations topic"),
                None => {}
            }
        }
        info!("thinker stopped");
    }

    /// Judge one observation. Untriggered or cooled-down observations return
    /// without entering the stage at all.
    pub async fn handle_observation(&self, obs: ObservationEvent) {
        let Some(rule) = evaluate_triggers(&obs) else {
            debug!(trace_id = %obs.trace_id, "no trigger rule matched");
            return;
        };

        let dedup_key = format!("{}:{}", obs.camera_id, rule.rule_id());
        if !self.cooldown.admit(&dedup_key) {
            debug!(key = %dedup_key, "observation suppressed by cooldown");
            let mut tags = self.gameday.tags();
            tags.push(("rule", rule.rule_id().to_string()));
            self.telemetry.count("linesight.decision.deduped", 1, &tags);
            return;
        }

        let key = self
            .state
            .begin_stage(&obs.trace_id, Stage::Thinker, obs.clip_index, obs.trace_ctx);
        self.audit.add(
            AuditKind::Stage,
            &obs.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_start",
                "stage": Stage::Thinker.as_str(),
                "clip_index": obs.clip_index,
                "rule": rule.rule_id(),
            })),
        );

        let t0 = Instant::now();
        let result = self.think(&obs, rule).await;
        let latency_ms = t0.elapsed().as_millis() as u64;
        self.state.end_stage(&key);

        let (status, parse_ok, decided) = match &result {
            Ok(out) => ("ok", out.parse_ok, out.decided),
            Err(_) => ("error", false, false),
        };
        self.audit.add(
            AuditKind::Stage,
            &obs.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_end",
                "stage": Stage::Thinker.as_str(),
                "clip_index": obs.clip_index,
                "status": status,
                "latency_ms": latency_ms,
                "parse_ok": parse_ok,
                "decided": decided,
            })),
        );

        let mut tags = self.gameday.tags();
        tags.push(("stage", Stage::Thinker.as_str().to_string()));
        self.telemetry
            .distribution("linesight.stage.latency_ms", latency_ms as f64, &tags);

        if let Err(err) = result {
            warn!(trace_id = %obs.trace_id, error = %err, "thinker stage failed");
            self.audit.add(
                AuditKind::ToolError,
                &obs.trace_id,
                self.gameday.tag_payload(json!({
                    "event": "thinker_error",
                    "stage": Stage::Thinker.as_str(),
                    "tool": "thinker",
                    "error": err.to_string(),
                    "error_type": err.error_type(),
                    "clip_index": obs.clip_index,
                })),
            );
            self.telemetry.count("linesight.stage.error", 1, &tags);
        }
    }

    async fn think(&self, obs: &ObservationEvent, rule: TriggerRule) -> Result<ThinkOutcome, StageError> {
        let (citations, grounding_ok) = self.ground(obs, rule).await;

        let (out, parse_ok, model) = self.decide(obs, rule, &citations).await?;

        let assessment_raw = out.get("assessment").cloned().unwrap_or_else(|| json!({}));
        let violation = assessment_raw
            .get("violation")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let mut actions = normalize_actions(out.get("recommended_actions"));

        if !violation || actions.is_empty() {
            debug!(trace_id = %obs.trace_id, rule = rule.rule_id(), "no actionable decision");
            self.telemetry
                .count("linesight.decision.no_action", 1, &self.gameday.tags());
            return Ok(ThinkOutcome {
                parse_ok,
                decided: false,
            });
        }

        let assessment = Assessment {
            violation,
            rule_id: assessment_raw
                .get("rule_id")
                .and_then(|v| v.as_str())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(rule.rule_id())
                .to_string(),
            severity: AssessmentSeverity::parse(
                assessment_raw
                    .get("severity")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default(),
            ),
            confidence: assessment_raw
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0)
                .clamp(0.0, 1.0),
            risk: assessment_raw
                .get("risk")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
        };

        // Grounding degradation: never stop the line on an ungrounded
        // recommendation. Downgrade to an urgent human-verification alert.
        if !grounding_ok {
            if let Some(action) = actions.first_mut() {
                if action.action_type == ActionType::StopLine {
                    action.action_type = ActionType::Alert;
                    action.priority = Priority::P1;
                    action.message = DEGRADED_STOP_MESSAGE.to_string();
                    warn!(trace_id = %obs.trace_id, rule = rule.rule_id(), "stop_line degraded: no grounding");
                    self.audit.add(
                        AuditKind::Health,
                        &obs.trace_id,
                        self.gameday.tag_payload(json!({
                            "event": "degradation",
                            "reason": "low_grounding",
                            "stage": Stage::Thinker.as_str(),
                            "rule": rule.rule_id(),
                        })),
                    );
                    self.telemetry
                        .count("linesight.decision.degraded", 1, &self.gameday.tags());
                }
            }
        }

        let rationale = Rationale {
            short: out
                .get("rationale")
                .and_then(|r| r.get("short"))
                .and_then(|s| s.as_str())
                .unwrap_or(rule.rule_id())
                .to_string(),
            citations,
        };

        let decision = DecisionEvent {
            decision_id: new_id(),
            trace_id: obs.trace_id.clone(),
            trace_ctx: obs.trace_ctx,
            clip_id: obs.clip_id.clone(),
            observation_id: obs.observation_id.clone(),
            camera_id: obs.camera_id.clone(),
            clip_index: obs.clip_index,
            ts: Utc::now(),
            assessment,
            recommended_actions: actions,
            rationale,
            evidence: out
                .get("evidence")
                .cloned()
                .unwrap_or_else(|| json!({"reason": "single_clip"})),
            model,
        };

        self.state.mark(&obs.trace_id, Milestone::Decision);
        self.audit.add(
            AuditKind::Decision,
            &obs.trace_id,
            serde_json::to_value(&decision).unwrap_or_else(|_| json!({})),
        );
        self.bus
            .publish(Topic::Decisions, BusMessage::Decision(decision));
        self.report_e2e(obs);

        Ok(ThinkOutcome {
            parse_ok,
            decided: true,
        })
    }

    /// Look up policy grounding for the triggered rule. Tool failure and
    /// empty results both mean "ungrounded"; neither fails the stage.
    async fn ground(&self, obs: &ObservationEvent, rule: TriggerRule) -> (Vec<Citation>, bool) {
        let budget = Duration::from_millis(self.cfg.tools.sop_budget_ms);
        let query = rule.rule_id().replace('_', " ");
        let outcome = call_tool("sop_lookup", budget, async { self.sop.lookup(&query) }).await;

        let mut tags = self.gameday.tags();
        tags.push(("tool", "sop_lookup".to_string()));
        self.telemetry.count("linesight.tool.calls", 1, &tags);
        self.telemetry
            .distribution("linesight.tool.latency_ms", outcome.latency_ms as f64, &tags);

        match outcome.result {
            Ok(hits) => {
                self.audit.add(
                    AuditKind::ToolCall,
                    &obs.trace_id,
                    self.gameday.tag_payload(json!({
                        "event": "tool_call",
                        "tool": "sop_lookup",
                        "ok": true,
                        "latency_ms": outcome.latency_ms,
                        "hits": hits.len(),
                    })),
                );
                if hits.is_empty() {
                    self.telemetry
                        .count("linesight.rag.no_results", 1, &self.gameday.tags());
                    return (Vec::new(), false);
                }
                let citations: Vec<Citation> = hits
                    .into_iter()
                    .take(MAX_CITATIONS)
                    .map(|h| Citation {
                        source: "sop_lookup".to_string(),
                        id: h.id,
                        text: h.text,
                    })
                    .collect();
                (citations, true)
            }
            Err(err) => {
                warn!(trace_id = %obs.trace_id, error = %err, "sop lookup failed");
                self.audit.add(
                    AuditKind::ToolError,
                    &obs.trace_id,
                    self.gameday.tag_payload(json!({
                        "event": "tool_error",
                        "tool": "sop_lookup",
                        "error": err.to_string(),
                        "error_type": err.error_type(),
                        "latency_ms": outcome.latency_ms,
                    })),
                );
                let mut err_tags = tags.clone();
                err_tags.push(("error_type", err.error_type().to_string()));
                self.telemetry.count("linesight.tool.error", 1, &err_tags);
                (Vec::new(), false)
            }
        }
    }

    /// Run the generator (or deterministic stub) and soft-decode the result.
    async fn decide(
        &self,
        obs: &ObservationEvent,
        rule: TriggerRule,
        citations: &[Citation],
    ) -> Result<(serde_json::Value, bool, ModelInfo), StageError> {
        let user = json!({
            "observation": {"summary": obs.summary, "signals": obs.signals},
            "triggered_rule": rule.rule_id(),
            "citations": citations,
        })
        .to_string();

        let t0 = Instant::now();
        let (raw, name) = match &self.generator {
            Some(g) => {
                let raw = g
                    .generate(GenerateRequest {
                        system: THINKER_PROMPT,
                        user: &user,
                        media: None,
                        temperature: 0.1,
                        max_output_tokens: 512,
                    })
                    .await
                    .map_err(StageError::Other)?;
                (raw, g.model_name().to_string())
            }
            None => (
                stub_decision(rule).to_string(),
                self.cfg.generation.thinker_model.clone(),
            ),
        };
        let latency_ms = t0.elapsed().as_millis() as u64;

        let input = format!("{THINKER_PROMPT}\n{user}");
        super::record_llm_call(
            &self.audit,
            self.telemetry.as_ref(),
            &self.gameday,
            &self.cfg,
            Stage::Thinker,
            &obs.trace_id,
            &name,
            latency_ms,
            &input,
            &raw,
        );

        let model = ModelInfo { name, latency_ms };
        match extract_json_object(&raw) {
            Ok(out) => Ok((out, true, model)),
            Err(reason) => {
                debug!(trace_id = %obs.trace_id, reason, "decision decode failed, conservative fallback");
                Ok((fallback_decision(rule, reason), false, model))
            }
        }
    }

    /// Emit end-to-end clip-to-decision latency and raise an incident when it
    /// exceeds the pipeline SLO.
    fn report_e2e(&self, obs: &ObservationEvent) {
        let Some(e2e_ms) = self.state.e2e_decision_latency_ms(&obs.trace_id) else {
            return;
        };
        let tags = self.gameday.tags();
        self.telemetry
            .distribution("linesight.e2e.decision_latency_ms", e2e_ms as f64, &tags);
        self.audit.add(
            AuditKind::Health,
            &obs.trace_id,
            self.gameday.tag_payload(json!({
                "event": "e2e_latency",
                "e2e_ms": e2e_ms,
            })),
        );

        let slo_ms = self.cfg.slo.pipeline_e2e_ms;
        if e2e_ms <= slo_ms {
            return;
        }
        warn!(trace_id = %obs.trace_id, e2e_ms, slo_ms, "pipeline e2e SLO breach");
        self.telemetry.count("linesight.e2e.slo_breach", 1, &tags);
        self.audit.add(
            AuditKind::StageTimeout,
            &obs.trace_id,
            self.gameday.tag_payload(json!({
                "event": "e2e_slo_breach",
                "e2e_ms": e2e_ms,
                "slo_ms": slo_ms,
                "clip_index": obs.clip_index,
            })),
        );
        self.telemetry.event(
            "Pipeline e2e SLO breach",
            &format!("clip->decision took {e2e_ms}ms (SLO {slo_ms}ms), trace_id={}", obs.trace_id),
            AlertLevel::Warning,
            &tags,
        );
        self.telemetry.incident(IncidentReport {
            title: "Pipeline latency SLO breach".to_string(),
            summary: format!(
                "End-to-end clip->decision latency {e2e_ms}ms exceeded the {slo_ms}ms SLO for trace {}.",
                obs.trace_id
            ),
            severity: "SEV-3",
            tags,
        });
    }
}

/// Deterministic decision used when no generator backend is wired in.
fn stub_decision(rule: TriggerRule) -> serde_json::Value {
    json!({
        "assessment": {
            "violation": true,
            "rule_id": rule.rule_id(),
            "severity": "medium",
            "confidence": 0.6,
            "risk": "rule-triggered without model refinement"
        },
        "recommended_actions": [
            {"type": "alert", "target": "console", "priority": "P2",
             "message": format!("Investigate: {}", rule.rule_id())}
        ],
        "rationale": {"short": rule.rule_id()},
        "evidence": {"reason": "single_clip"}
    })
}

/// Conservative decision when generated text cannot be decoded: always an
/// alert, never a line stop.
fn fallback_decision(rule: TriggerRule, reason: &'static str) -> serde_json::Value {
    json!({
        "assessment": {
            "violation": true,
            "rule_id": rule.rule_id(),
            "severity": "medium",
            "confidence": 0.5,
            "risk": reason
        },
        "recommended_actions": [
            {"type": "alert", "target": "console", "priority": "P2",
             "message": format!("Investigate: {}", rule.rule_id())}
        ],
        "rationale": {"short": "decode_fallback"},
        "evidence": {"reason": "single_clip"}
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SignalMap, TraceContext};

    fn obs_with(signals: &[(&str, &str)]) -> ObservationEvent {
        let mut map = SignalMap::new();
        for (k, v) in signals {
            map.insert((*k).to_string(), json!(v));
        }
        ObservationEvent {
            observation_id: new_id(),
            trace_id: new_id(),
            trace_ctx: TraceContext::default(),
            clip_id: new_id(),
            camera_id: "cam-security-1".to_string(),
            clip_index: 0,
            ts: Utc::now(),
            summary: "test".to_string(),
            signals: map,
            model: ModelInfo::default(),
        }
    }

    #[test]
    fn precedence_picks_highest_rule() {
        let obs = obs_with(&[
            ("machine_operating", "yes"),
            ("panel_open", "yes"),
            ("guard_open", "yes"),
            ("walkway_violation", "yes"),
        ]);
        assert_eq!(
            evaluate_triggers(&obs),
            Some(TriggerRule::PanelOpenWhileOperating)
        );
    }

    #[test]
    fn operating_gated_rules_need_machine_on() {
        let obs = obs_with(&[("panel_open", "yes"), ("machine_operating", "no")]);
        assert_eq!(evaluate_triggers(&obs), None);

        let obs = obs_with(&[("panel_open", "yes"), ("machine_operating", "uncertain")]);
        assert_eq!(evaluate_triggers(&obs), None);
    }

    #[test]
    fn ungated_rules_fire_without_machine_signal() {
        let obs = obs_with(&[("restricted_area_entry", "yes")]);
        assert_eq!(evaluate_triggers(&obs), Some(TriggerRule::RestrictedAreaEntry));

        let obs = obs_with(&[("walkway_violation", "yes")]);
        assert_eq!(evaluate_triggers(&obs), Some(TriggerRule::WalkwayViolation));
    }

    #[test]
    fn uncertain_never_triggers() {
        let obs = obs_with(&[
            ("machine_operating", "yes"),
            ("panel_open", "uncertain"),
            ("walkway_violation", "maybe"),
        ]);
        assert_eq!(evaluate_triggers(&obs), None);
    }

    #[test]
    fn stub_and_fallback_decisions_are_alert_only() {
        for v in [
            stub_decision(TriggerRule::WalkwayViolation),
            fallback_decision(TriggerRule::WalkwayViolation, "no_json"),
        ] {
            let actions = normalize_actions(v.get("recommended_actions"));
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].action_type, ActionType::Alert);
        }
    }
}
