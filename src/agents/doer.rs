//! Doer agent: decision -> delivered action.
//!
//! Enriches the recommended action into operator-ready steps (never changing
//! its canonical type), applies the long-window delivery dedup, and drives
//! the dispatcher sub-stage. A delivery failure still produces a terminal
//! action record: a failed event retargeted at the pager fallback, plus an
//! incident and an investigation case.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditBuffer, AuditKind};
use crate::bus::{Bus, BusMessage, Topic};
use crate::config::PipelineConfig;
use crate::gameday::{GameDayController, Scenario};
use crate::llm::prompts::DOER_PROMPT;
use crate::llm::{GenerateRequest, TextGenerator};
use crate::runtime::RuntimeState;
use crate::telemetry::{AlertLevel, IncidentReport, Telemetry};
use crate::tools::{call_tool, Dispatcher};
use crate::types::{
    new_id, normalize_actions, ActionEvent, ActionPayload, ActionStatus, ActionType,
    DecisionEvent, Milestone, Priority, Stage,
};

use super::{extract_json_object, CooldownGate, StageError};

/// Default execution steps when no generator refines the action.
const STUB_STEPS: [&str; 3] = [
    "Inspect the flagged area",
    "Confirm the condition on camera or in person",
    "Log the outcome in the shift report",
];

pub struct DoerAgent {
    cfg: Arc<PipelineConfig>,
    bus: Arc<Bus>,
    audit: Arc<AuditBuffer>,
    state: Arc<RuntimeState>,
    gameday: Arc<GameDayController>,
    telemetry: Arc<dyn Telemetry>,
    dispatcher: Arc<Dispatcher>,
    generator: Option<Arc<dyn TextGenerator>>,
    cooldown: CooldownGate,
}

impl DoerAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Arc<PipelineConfig>,
        bus: Arc<Bus>,
        audit: Arc<AuditBuffer>,
        state: Arc<RuntimeState>,
        gameday: Arc<GameDayController>,
        telemetry: Arc<dyn Telemetry>,
        dispatcher: Arc<Dispatcher>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        let cooldown = CooldownGate::new(Duration::from_secs(cfg.cooldown.doer_secs));
        Self {
            cfg,
            bus,
            audit,
            state,
            gameday,
            telemetry,
            dispatcher,
            generator,
            cooldown,
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("doer started");
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => break,
                m = self.bus.consume(Topic::Decisions, self.cfg.consume_timeout()) => m,
            };
            match msg {
                Some(BusMessage::Decision(dec)) => self.handle_decision(dec).await,
                Some(_) => warn!("non-decision message on decisions topic"),
                None => {}
            }
        }
        info!("doer stopped");
    }

    /// Deliver (or dedup, or fail over) one decision's action.
    pub async fn handle_decision(&self, dec: DecisionEvent) {
        // The scenario is consulted fresh per message, never cached.
        let outage = self.gameday.active(Scenario::DependencyOutage) && self.gameday.forced();
        self.dispatcher.set_down(outage);

        let key = self
            .state
            .begin_stage(&dec.trace_id, Stage::Doer, dec.clip_index, dec.trace_ctx);
        self.audit.add(
            AuditKind::Stage,
            &dec.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_start",
                "stage": Stage::Doer.as_str(),
                "clip_index": dec.clip_index,
            })),
        );

        let t0 = Instant::now();
        let result = self.act(&dec).await;
        let latency_ms = t0.elapsed().as_millis() as u64;
        self.state.end_stage(&key);

        let status = if result.is_ok() { "ok" } else { "error" };
        self.audit.add(
            AuditKind::Stage,
            &dec.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_end",
                "stage": Stage::Doer.as_str(),
                "clip_index": dec.clip_index,
                "status": status,
                "latency_ms": latency_ms,
            })),
        );

        let mut tags = self.gameday.tags();
        tags.push(("stage", Stage::Doer.as_str().to_string()));
        self.telemetry
            .distribution("linesight.stage.latency_ms", latency_ms as f64, &tags);

        if let Err(err) = result {
            warn!(trace_id = %dec.trace_id, error = %err, "doer stage failed");
            self.audit.add(
                AuditKind::ToolError,
                &dec.trace_id,
                self.gameday.tag_payload(json!({
                    "event": "doer_error",
                    "stage": Stage::Doer.as_str(),
                    "tool": "doer",
                    "error": err.to_string(),
                    "error_type": err.error_type(),
                    "clip_index": dec.clip_index,
                })),
            );
            self.telemetry.count("linesight.stage.error", 1, &tags);
        }
    }

    async fn act(&self, dec: &DecisionEvent) -> Result<(), StageError> {
        let action = self.enrich(dec).await?;
        let severity = dec.assessment.severity.as_str();
        let action_type = action.action_type;

        let mut tags = self.gameday.tags();
        tags.push(("action_type", action_type.as_str().to_string()));
        tags.push(("priority", action.priority.as_str().to_string()));
        self.telemetry.count("linesight.action.attempted", 1, &tags);

        // Delivery dedup: one action per (camera, severity, type) per window.
        let dedup_key = format!("{}:{}:{}", dec.camera_id, severity, action_type.as_str());
        if !self.cooldown.admit(&dedup_key) {
            debug!(key = %dedup_key, "action suppressed by delivery dedup");
            self.telemetry.count("linesight.action.skipped", 1, &tags);
            self.publish_action(dec, action, ActionStatus::Skipped, "dedup", None);
            return Ok(());
        }

        let receipt = self.dispatch(dec, &action).await;
        match receipt {
            Ok(()) => {
                self.telemetry.count("linesight.action.sent", 1, &tags);
                self.publish_action(dec, action, ActionStatus::Sent, "dispatcher", None);
                Ok(())
            }
            Err(error) => {
                self.telemetry.count("linesight.action.failed", 1, &tags);
                self.fail_over(dec, action, &error);
                // Failure is fully handled here: audited, paged, failed-over.
                Ok(())
            }
        }
    }

    /// Drive the dispatcher sub-stage with its own SLO bracketing.
    async fn dispatch(&self, dec: &DecisionEvent, action: &ActionPayload) -> Result<(), String> {
        let key = self.state.begin_stage(
            &dec.trace_id,
            Stage::Dispatcher,
            dec.clip_index,
            dec.trace_ctx,
        );
        self.audit.add(
            AuditKind::Stage,
            &dec.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_start",
                "stage": Stage::Dispatcher.as_str(),
                "clip_index": dec.clip_index,
            })),
        );

        let budget = Duration::from_millis(self.cfg.slo.dispatcher_ms);
        let outcome = call_tool("dispatcher", budget, self.dispatcher.send(action)).await;
        self.state.end_stage(&key);

        let ok = outcome.is_ok();
        self.audit.add(
            AuditKind::Stage,
            &dec.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_end",
                "stage": Stage::Dispatcher.as_str(),
                "clip_index": dec.clip_index,
                "status": if ok { "ok" } else { "error" },
                "latency_ms": outcome.latency_ms,
            })),
        );
        let mut tags = self.gameday.tags();
        tags.push(("tool", "dispatcher".to_string()));
        self.telemetry.count("linesight.tool.calls", 1, &tags);
        self.telemetry
            .distribution("linesight.tool.latency_ms", outcome.latency_ms as f64, &tags);

        match outcome.result {
            Ok(receipt) => {
                debug!(target = %receipt.target, "action delivered");
                Ok(())
            }
            Err(err) => {
                self.audit.add(
                    AuditKind::ToolError,
                    &dec.trace_id,
                    self.gameday.tag_payload(json!({
                        "event": "tool_error",
                        "tool": "dispatcher",
                        "error": err.to_string(),
                        "error_type": err.error_type(),
                        "latency_ms": outcome.latency_ms,
                    })),
                );
                let mut err_tags = tags.clone();
                err_tags.push(("error_type", err.error_type().to_string()));
                self.telemetry.count("linesight.tool.error", 1, &err_tags);
                Err(err.to_string())
            }
        }
    }

    /// Delivery failed: page the fallback target, raise an incident, open a
    /// case, and record the failed action.
    fn fail_over(&self, dec: &DecisionEvent, mut action: ActionPayload, error: &str) {
        warn!(trace_id = %dec.trace_id, error, "delivery failed, failing over to pager");
        let tags = self.gameday.tags();
        self.telemetry.event(
            "Action delivery failed",
            &format!(
                "Dispatcher rejected {} for camera {}: {}",
                action.action_type, dec.camera_id, error
            ),
            AlertLevel::Error,
            &tags,
        );
        self.telemetry.incident(IncidentReport {
            title: "Action delivery failure".to_string(),
            summary: format!(
                "Dispatcher failed for trace {} (camera {}): {}. Fallback page issued.",
                dec.trace_id, dec.camera_id, error
            ),
            severity: "SEV-2",
            tags: tags.clone(),
        });
        self.telemetry.case(
            "Investigate dispatcher failure",
            &format!("Repeated delivery failure for camera {}: {}", dec.camera_id, error),
            "HIGH",
            &tags,
        );

        action.target = "pager".to_string();
        action.message = format!("{} (dispatcher down - fallback)", action.message);
        self.publish_action(
            dec,
            action,
            ActionStatus::Failed,
            "pager",
            Some(error.to_string()),
        );
    }

    /// Record the terminal [`ActionEvent`]: audit, milestone, bus.
    fn publish_action(
        &self,
        dec: &DecisionEvent,
        action: ActionPayload,
        status: ActionStatus,
        provider: &str,
        error: Option<String>,
    ) {
        let event = ActionEvent {
            action_id: new_id(),
            trace_id: dec.trace_id.clone(),
            trace_ctx: dec.trace_ctx,
            decision_id: dec.decision_id.clone(),
            camera_id: dec.camera_id.clone(),
            ts: Utc::now(),
            action,
            status,
            provider: provider.to_string(),
            error,
        };
        self.state.mark(&dec.trace_id, Milestone::Action);
        self.audit.add(
            AuditKind::Action,
            &dec.trace_id,
            serde_json::to_value(&event).unwrap_or_else(|_| json!({})),
        );
        self.bus.publish(Topic::Actions, BusMessage::Action(event));
    }

    /// Enrich the recommended action with operator-ready execution steps.
    /// The canonical action type and priority are pinned to the decision's;
    /// enrichment may only improve the message and steps.
    async fn enrich(&self, dec: &DecisionEvent) -> Result<ActionPayload, StageError> {
        let base = dec
            .recommended_actions
            .first()
            .cloned()
            .unwrap_or_else(|| ActionPayload {
                action_type: ActionType::Alert,
                target: "console".to_string(),
                priority: Priority::P2,
                message: "Investigate incident.".to_string(),
                execution_steps: Vec::new(),
                notes: String::new(),
            });

        let Some(g) = &self.generator else {
            let mut action = base;
            if action.execution_steps.is_empty() {
                action.execution_steps = STUB_STEPS.iter().map(|s| (*s).to_string()).collect();
            }
            return Ok(action);
        };

        let user = serde_json::to_string(dec).unwrap_or_else(|_| "{}".to_string());
        let t0 = Instant::now();
        let raw = g
            .generate(GenerateRequest {
                system: DOER_PROMPT,
                user: &user,
                media: None,
                temperature: 0.2,
                max_output_tokens: 512,
            })
            .await
            .map_err(StageError::Other)?;
        let latency_ms = t0.elapsed().as_millis() as u64;

        let input = format!("{DOER_PROMPT}\n{user}");
        super::record_llm_call(
            &self.audit,
            self.telemetry.as_ref(),
            &self.gameday,
            &self.cfg,
            Stage::Doer,
            &dec.trace_id,
            g.model_name(),
            latency_ms,
            &input,
            &raw,
        );

        let enriched = extract_json_object(&raw)
            .ok()
            .and_then(|v| normalize_actions(v.get("actions")).into_iter().next());
        Ok(match enriched {
            Some(mut action) => {
                // Generated text must never flip an alert into a line stop
                // (or vice versa), nor change the escalation priority.
                action.action_type = base.action_type;
                action.priority = base.priority;
                action
            }
            None => base,
        })
    }
}
