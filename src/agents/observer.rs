//! Observer agent: clip -> structured observation.
//!
//! Consumes the clips topic, reads the spooled segment, runs the generator
//! (or a deterministic stub), soft-decodes the output, and publishes an
//! [`ObservationEvent`]. Decode failures degrade to a high-uncertainty
//! observation instead of dropping the clip; missing or truncated spool files
//! are bad input, not a stage crash.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditBuffer, AuditKind};
use crate::bus::{Bus, BusMessage, Topic};
use crate::config::defaults::SLOW_STAGE_OVERSHOOT_MS;
use crate::config::PipelineConfig;
use crate::gameday::{GameDayController, Scenario};
use crate::llm::prompts::OBSERVER_PROMPT;
use crate::llm::{GenerateRequest, TextGenerator};
use crate::runtime::RuntimeState;
use crate::security::{detect_hijack, detect_injection, INJECTED_ADVERSARIAL_TEXT};
use crate::telemetry::Telemetry;
use crate::types::{
    new_id, ClipEvent, Milestone, ModelInfo, ObservationEvent, SignalMap, Stage,
};

use super::{extract_json_object, StageError};

/// Cap on how much raw generator text is kept when decode fails.
const FALLBACK_SUMMARY_CHARS: usize = 280;

struct ObserveOutcome {
    parse_ok: bool,
}

pub struct ObserverAgent {
    cfg: Arc<PipelineConfig>,
    bus: Arc<Bus>,
    audit: Arc<AuditBuffer>,
    state: Arc<RuntimeState>,
    gameday: Arc<GameDayController>,
    telemetry: Arc<dyn Telemetry>,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl ObserverAgent {
    pub fn new(
        cfg: Arc<PipelineConfig>,
        bus: Arc<Bus>,
        audit: Arc<AuditBuffer>,
        state: Arc<RuntimeState>,
        gameday: Arc<GameDayController>,
        telemetry: Arc<dyn Telemetry>,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            cfg,
            bus,
            audit,
            state,
            gameday,
            telemetry,
            generator,
        }
    }

    /// Consume clips until cancelled. One bad clip never stops the loop.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("observer started");
        loop {
            let msg = tokio::select! {
                () = cancel.cancelled() => break,
                m = self.bus.consume(Topic::Clips, self.cfg.consume_timeout()) => m,
            };
            match msg {
                Some(BusMessage::Clip(clip)) => self.handle_clip(clip).await,
                Some(_) => warn!("non-clip message on clips topic"),
                None => {}
            }
        }
        info!("observer stopped");
    }

    /// Process one clip end to end: stage bracketing, observation, audits.
    pub async fn handle_clip(&self, clip: ClipEvent) {
        let key = self
            .state
            .begin_stage(&clip.trace_id, Stage::Observer, clip.clip_index, clip.trace_ctx);
        self.audit.add(
            AuditKind::Stage,
            &clip.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_start",
                "stage": Stage::Observer.as_str(),
                "clip_index": clip.clip_index,
            })),
        );

        let t0 = Instant::now();
        let result = self.observe(&clip).await;
        let latency_ms = t0.elapsed().as_millis() as u64;
        self.state.end_stage(&key);

        let (status, parse_ok) = match &result {
            Ok(out) => ("ok", out.parse_ok),
            Err(_) => ("error", false),
        };
        self.audit.add(
            AuditKind::Stage,
            &clip.trace_id,
            self.gameday.tag_payload(json!({
                "event": "stage_end",
                "stage": Stage::Observer.as_str(),
                "clip_index": clip.clip_index,
                "status": status,
                "latency_ms": latency_ms,
                "parse_ok": parse_ok,
            })),
        );

        let mut tags = self.gameday.tags();
        tags.push(("stage", Stage::Observer.as_str().to_string()));
        self.telemetry
            .distribution("linesight.stage.latency_ms", latency_ms as f64, &tags);

        if let Err(err) = result {
            let (tool, error) = match &err {
                StageError::BadInput { tool, reason } => (*tool, (*reason).to_string()),
                StageError::Other(e) => ("observer", format!("{e:#}")),
            };
            warn!(trace_id = %clip.trace_id, tool, error, "observer stage failed");
            self.audit.add(
                AuditKind::ToolError,
                &clip.trace_id,
                self.gameday.tag_payload(json!({
                    "event": "observer_error",
                    "stage": Stage::Observer.as_str(),
                    "tool": tool,
                    "error": error,
                    "error_type": err.error_type(),
                    "clip_index": clip.clip_index,
                })),
            );
            self.telemetry.count("linesight.stage.error", 1, &tags);
        }
    }

    async fn observe(&self, clip: &ClipEvent) -> Result<ObserveOutcome, StageError> {
        if self.gameday.active(Scenario::SlowStage) && self.gameday.forced() {
            let ms = self.cfg.slo.observer_ms + SLOW_STAGE_OVERSHOOT_MS;
            debug!(sleep_ms = ms, "slow_stage fault active");
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let media = tokio::fs::read(&clip.clip_path)
            .await
            .map_err(|_| StageError::BadInput {
                tool: "clip_spool",
                reason: "clip_missing",
            })?;
        if (media.len() as u64) < self.cfg.ingest.min_clip_bytes {
            return Err(StageError::BadInput {
                tool: "video_read",
                reason: "video_too_small",
            });
        }

        let (raw, model) = self.generate(clip, &media).await?;
        let (mut summary, signals, parse_ok) = decode_observation(&raw);

        if self.gameday.active(Scenario::PromptInjection) && self.gameday.forced() {
            summary.push(' ');
            summary.push_str(INJECTED_ADVERSARIAL_TEXT);
        }
        summary = self.scrub_summary(clip, summary);

        let obs = ObservationEvent {
            observation_id: new_id(),
            trace_id: clip.trace_id.clone(),
            trace_ctx: clip.trace_ctx,
            clip_id: clip.clip_id.clone(),
            camera_id: clip.camera_id.clone(),
            clip_index: clip.clip_index,
            ts: Utc::now(),
            summary,
            signals,
            model,
        };

        self.state.mark(&clip.trace_id, Milestone::Observation);
        self.audit.add(
            AuditKind::Observation,
            &clip.trace_id,
            serde_json::to_value(&obs).unwrap_or_else(|_| json!({})),
        );
        if let Some(ms) = self.state.e2e_observation_latency_ms(&clip.trace_id) {
            self.telemetry.distribution(
                "linesight.e2e.observation_latency_ms",
                ms as f64,
                &self.gameday.tags(),
            );
        }
        self.bus.publish(Topic::Observations, BusMessage::Observation(obs));

        Ok(ObserveOutcome { parse_ok })
    }

    /// Run the generator (or stub), emitting latency/token/cost accounting.
    async fn generate(
        &self,
        clip: &ClipEvent,
        media: &[u8],
    ) -> Result<(String, ModelInfo), StageError> {
        let user = format!(
            "camera_id={} clip_index={} duration_s={}",
            clip.camera_id, clip.clip_index, self.cfg.ingest.clip_seconds
        );
        let t0 = Instant::now();
        let (raw, name) = match &self.generator {
            Some(g) => {
                let raw = g
                    .generate(GenerateRequest {
                        system: OBSERVER_PROMPT,
                        user: &user,
                        media: Some(media),
                        temperature: 0.1,
                        max_output_tokens: 512,
                    })
                    .await
                    .map_err(StageError::Other)?;
                (raw, g.model_name().to_string())
            }
            None => (
                stub_observation(),
                self.cfg.generation.observer_model.clone(),
            ),
        };
        let latency_ms = t0.elapsed().as_millis() as u64;

        let input = format!("{OBSERVER_PROMPT}\n{user}");
        super::record_llm_call(
            &self.audit,
            self.telemetry.as_ref(),
            &self.gameday,
            &self.cfg,
            Stage::Observer,
            &clip.trace_id,
            &name,
            latency_ms,
            &input,
            &raw,
        );

        Ok((raw, ModelInfo { name, latency_ms }))
    }

    /// Scan generated summary text for injection/hijack attempts; redact and
    /// record a security event on any hit.
    fn scrub_summary(&self, clip: &ClipEvent, summary: String) -> String {
        let mut flagged = false;
        for r in [detect_injection(&summary), detect_hijack(&summary)] {
            if !r.hit {
                continue;
            }
            flagged = true;
            self.audit.add(
                AuditKind::Security,
                &clip.trace_id,
                self.gameday.tag_payload(json!({
                    "event": "generated_text_flagged",
                    "stage": Stage::Observer.as_str(),
                    "kind": r.kind,
                    "pattern": r.reason,
                    "clip_index": clip.clip_index,
                })),
            );
            let mut tags = self.gameday.tags();
            tags.push(("kind", r.kind.to_string()));
            self.telemetry.count("linesight.security.flagged", 1, &tags);
        }
        if flagged {
            warn!(trace_id = %clip.trace_id, "redacting flagged observer summary");
            "[redacted: generated text flagged by security scan]".to_string()
        } else {
            summary
        }
    }
}

/// Soft-decode generator output into (summary, signals, parse_ok).
///
/// On decode failure the raw text becomes a truncated summary with
/// high-uncertainty signals; an uncertain observation, not an error.
fn decode_observation(raw: &str) -> (String, SignalMap, bool) {
    match extract_json_object(raw) {
        Ok(v) => {
            let summary = v
                .get("summary")
                .and_then(|s| s.as_str())
                .unwrap_or("(no summary)")
                .trim()
                .to_string();
            let signals: SignalMap = v
                .get("signals")
                .and_then(|s| s.as_object())
                .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default();
            (summary, signals, true)
        }
        Err(reason) => {
            let summary: String = raw.trim().chars().take(FALLBACK_SUMMARY_CHARS).collect();
            let mut signals = SignalMap::new();
            signals.insert("uncertainty".into(), json!("high"));
            signals.insert("confidence_note".into(), json!(reason));
            (summary, signals, false)
        }
    }
}

/// Deterministic observation used when no generator backend is wired in.
fn stub_observation() -> String {
    json!({
        "summary": "No clear safety violation observed in this segment.",
        "signals": {
            "people_present": "uncertain",
            "walkway_violation": "uncertain",
            "restricted_area_entry": "uncertain",
            "machine_operating": "uncertain",
            "panel_open": "uncertain",
            "guard_open": "uncertain",
            "unsafe_proximity_to_machine": "uncertain",
            "uncertainty": "high",
            "confidence_note": "stub generator; no visual model attached"
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TriState;

    #[test]
    fn decode_reads_summary_and_signals() {
        let raw = r#"prose {"summary": "worker near press", "signals": {"panel_open": "yes"}} trailer"#;
        let (summary, signals, parse_ok) = decode_observation(raw);
        assert!(parse_ok);
        assert_eq!(summary, "worker near press");
        assert_eq!(
            TriState::from_signal(signals.get("panel_open")),
            TriState::Yes
        );
    }

    #[test]
    fn decode_failure_degrades_to_uncertain() {
        let (summary, signals, parse_ok) = decode_observation("the model rambled with no json");
        assert!(!parse_ok);
        assert_eq!(summary, "the model rambled with no json");
        assert_eq!(signals.get("uncertainty"), Some(&json!("high")));
        assert_eq!(signals.get("confidence_note"), Some(&json!("no_json")));
    }

    #[test]
    fn stub_observation_is_decodable_and_uncertain() {
        let (_, signals, parse_ok) = decode_observation(&stub_observation());
        assert!(parse_ok);
        assert_eq!(
            TriState::from_signal(signals.get("panel_open")),
            TriState::Uncertain
        );
    }
}
