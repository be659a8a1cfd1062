//! End-to-end stage-contract tests: clip -> observation -> decision -> action,
//! driven through the real agents with scripted generators.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use linesight::agents::{DoerAgent, ObserverAgent, ThinkerAgent};
use linesight::audit::AuditKind;
use linesight::llm::{ScriptedGenerator, TextGenerator};
use linesight::telemetry::{NoopTelemetry, Telemetry};
use linesight::tools::{Dispatcher, SopLookup};
use linesight::tools::sop_lookup::SopStep;
use linesight::types::{
    new_id, ActionStatus, ActionType, ClipEvent, DecisionEvent, ObservationEvent, Priority,
    TraceContext,
};
use linesight::{AuditBuffer, Bus, BusMessage, GameDayController, PipelineConfig, Topic};

const CONSUME: Duration = Duration::from_millis(200);

struct Rig {
    cfg: Arc<PipelineConfig>,
    bus: Arc<Bus>,
    audit: Arc<AuditBuffer>,
    gameday: Arc<GameDayController>,
    dispatcher: Arc<Dispatcher>,
    observer: ObserverAgent,
    thinker: ThinkerAgent,
    doer: DoerAgent,
    _spool: tempfile::TempDir,
}

impl Rig {
    fn new(
        sop_steps: Vec<SopStep>,
        observer_script: Vec<String>,
        thinker_script: Vec<String>,
    ) -> Self {
        let spool = tempfile::tempdir().expect("spool dir");
        let mut cfg = PipelineConfig::default();
        cfg.ingest.spool_dir = spool.path().to_path_buf();
        let cfg = Arc::new(cfg);

        let bus = Arc::new(Bus::new());
        let audit = Arc::new(AuditBuffer::new(1000));
        let state = Arc::new(linesight::RuntimeState::new());
        let telemetry: Arc<dyn Telemetry> = Arc::new(NoopTelemetry);
        let gameday = Arc::new(GameDayController::new(
            &cfg.gameday,
            Arc::clone(&audit),
            Arc::clone(&telemetry),
        ));
        let dispatcher = Arc::new(Dispatcher::new());
        let sop = Arc::new(SopLookup::with_steps(sop_steps));

        let observer_gen: Option<Arc<dyn TextGenerator>> = if observer_script.is_empty() {
            None
        } else {
            Some(Arc::new(ScriptedGenerator::new("scripted-observer", observer_script)))
        };
        let thinker_gen: Option<Arc<dyn TextGenerator>> = if thinker_script.is_empty() {
            None
        } else {
            Some(Arc::new(ScriptedGenerator::new("scripted-thinker", thinker_script)))
        };

        let observer = ObserverAgent::new(
            Arc::clone(&cfg),
            Arc::clone(&bus),
            Arc::clone(&audit),
            Arc::clone(&state),
            Arc::clone(&gameday),
            Arc::clone(&telemetry),
            observer_gen,
        );
        let thinker = ThinkerAgent::new(
            Arc::clone(&cfg),
            Arc::clone(&bus),
            Arc::clone(&audit),
            Arc::clone(&state),
            Arc::clone(&gameday),
            Arc::clone(&telemetry),
            sop,
            thinker_gen,
        );
        let doer = DoerAgent::new(
            Arc::clone(&cfg),
            Arc::clone(&bus),
            Arc::clone(&audit),
            Arc::clone(&state),
            Arc::clone(&gameday),
            Arc::clone(&telemetry),
            Arc::clone(&dispatcher),
            None,
        );

        Rig {
            cfg,
            bus,
            audit,
            gameday,
            dispatcher,
            observer,
            thinker,
            doer,
            _spool: spool,
        }
    }

    fn spooled_clip(&self, clip_index: u64) -> ClipEvent {
        let trace_id = new_id();
        let path: PathBuf = self
            .cfg
            .ingest
            .spool_dir
            .join(format!("{trace_id}_{clip_index:06}.mp4"));
        std::fs::write(&path, vec![0u8; 4096]).expect("spool clip");
        ClipEvent {
            clip_id: new_id(),
            trace_id,
            trace_ctx: TraceContext::default(),
            camera_id: self.cfg.ingest.camera_id.clone(),
            clip_index,
            clip_start_ts: Utc::now(),
            clip_end_ts: Utc::now(),
            clip_path: path,
        }
    }

    async fn next_observation(&self) -> ObservationEvent {
        match self.bus.consume(Topic::Observations, CONSUME).await {
            Some(BusMessage::Observation(obs)) => obs,
            other => panic!("expected observation, got {other:?}"),
        }
    }

    async fn next_decision(&self) -> DecisionEvent {
        match self.bus.consume(Topic::Decisions, CONSUME).await {
            Some(BusMessage::Decision(dec)) => dec,
            other => panic!("expected decision, got {other:?}"),
        }
    }
}

fn panel_open_observation() -> String {
    json!({
        "summary": "Worker reaching into press with access panel open.",
        "signals": {
            "people_present": "yes",
            "machine_operating": "yes",
            "panel_open": "yes",
            "uncertainty": "low"
        }
    })
    .to_string()
}

fn stop_line_decision() -> String {
    json!({
        "assessment": {
            "violation": true,
            "rule_id": "panel_open_while_operating",
            "severity": "high",
            "confidence": 0.92,
            "risk": "entanglement hazard at the press"
        },
        "recommended_actions": [
            {"type": "stop_line", "target": "console", "priority": "P1",
             "message": "Stop line 1: panel open while press is operating."}
        ],
        "rationale": {"short": "panel open while operating"},
        "evidence": {"reason": "single_clip"}
    })
    .to_string()
}

fn panel_sop() -> Vec<SopStep> {
    vec![SopStep {
        step_id: "SOP-7".into(),
        description: "Panel open while operating: lock out the press and stop the line".into(),
        action: "stop_line".into(),
    }]
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn grounded_stop_line_flows_end_to_end() {
    let rig = Rig::new(
        panel_sop(),
        vec![panel_open_observation()],
        vec![stop_line_decision()],
    );

    let clip = rig.spooled_clip(0);
    rig.observer.handle_clip(clip.clone()).await;
    let obs = rig.next_observation().await;
    assert_eq!(obs.trace_id, clip.trace_id);
    assert!(obs.tri("panel_open").is_yes());

    rig.thinker.handle_observation(obs).await;
    let dec = rig.next_decision().await;
    assert_eq!(dec.assessment.rule_id, "panel_open_while_operating");
    assert_eq!(dec.recommended_actions.len(), 1);
    assert_eq!(dec.recommended_actions[0].action_type, ActionType::StopLine);
    assert_eq!(dec.recommended_actions[0].priority, Priority::P1);
    // Grounding citations came from the SOP tool, capped and attributed
    assert!(!dec.rationale.citations.is_empty());
    assert!(dec.rationale.citations.len() <= 3);
    assert_eq!(dec.rationale.citations[0].source, "sop_lookup");
    assert_eq!(dec.rationale.citations[0].id, "SOP-7");

    rig.doer.handle_decision(dec).await;
    let act = match rig.bus.consume(Topic::Actions, CONSUME).await {
        Some(BusMessage::Action(a)) => a,
        other => panic!("expected action, got {other:?}"),
    };
    assert_eq!(act.status, ActionStatus::Sent);
    assert_eq!(act.provider, "dispatcher");
    assert_eq!(act.action.action_type, ActionType::StopLine);
    assert!(!act.action.execution_steps.is_empty());

    let kpi = rig.audit.kpi();
    assert_eq!(kpi.observations, 1);
    assert_eq!(kpi.decisions, 1);
    assert_eq!(kpi.actions, 1);
    assert_eq!(kpi.action_sent, 1);
    assert_eq!(kpi.stop_line, 1);
    assert!(kpi.last_stop_line_ts.is_some());
}

// ============================================================================
// Grounding degradation
// ============================================================================

#[tokio::test]
async fn ungrounded_stop_line_degrades_to_p1_alert() {
    // Empty SOP catalog: lookup succeeds with zero hits
    let rig = Rig::new(
        Vec::new(),
        vec![panel_open_observation()],
        vec![stop_line_decision()],
    );

    let clip = rig.spooled_clip(0);
    rig.observer.handle_clip(clip).await;
    let obs = rig.next_observation().await;
    rig.thinker.handle_observation(obs).await;

    let dec = rig.next_decision().await;
    let action = &dec.recommended_actions[0];
    assert_eq!(action.action_type, ActionType::Alert);
    assert_eq!(action.priority, Priority::P1);
    assert!(action.message.contains("grounding unavailable"));
    assert!(dec.rationale.citations.is_empty());

    let degraded = rig
        .audit
        .recent(100)
        .into_iter()
        .any(|e| e.kind == AuditKind::Health && e.payload["event"] == "degradation");
    assert!(degraded, "expected a degradation health record");
}

// ============================================================================
// Dedup / cooldown
// ============================================================================

#[tokio::test]
async fn repeat_trigger_within_cooldown_is_suppressed() {
    let rig = Rig::new(
        panel_sop(),
        vec![panel_open_observation(), panel_open_observation()],
        vec![stop_line_decision(), stop_line_decision()],
    );

    for i in 0..2 {
        let clip = rig.spooled_clip(i);
        rig.observer.handle_clip(clip).await;
        let obs = rig.next_observation().await;
        rig.thinker.handle_observation(obs).await;
    }

    // Same camera and rule back-to-back: only the first becomes a decision
    let _first = rig.next_decision().await;
    assert!(rig.bus.consume(Topic::Decisions, CONSUME).await.is_none());
    assert_eq!(rig.audit.kpi().decisions, 1);
}

#[tokio::test]
async fn duplicate_delivery_is_skipped_not_resent() {
    let rig = Rig::new(
        panel_sop(),
        vec![panel_open_observation()],
        vec![stop_line_decision()],
    );

    let clip = rig.spooled_clip(0);
    rig.observer.handle_clip(clip).await;
    let obs = rig.next_observation().await;
    rig.thinker.handle_observation(obs).await;
    let dec = rig.next_decision().await;

    rig.doer.handle_decision(dec.clone()).await;
    rig.doer.handle_decision(dec).await;

    let statuses: Vec<ActionStatus> = {
        let mut v = Vec::new();
        while let Some(BusMessage::Action(a)) = rig.bus.consume(Topic::Actions, CONSUME).await {
            v.push(a.status);
        }
        v
    };
    assert_eq!(statuses, vec![ActionStatus::Sent, ActionStatus::Skipped]);

    let kpi = rig.audit.kpi();
    assert_eq!(kpi.actions, 2);
    assert_eq!(kpi.action_sent, 1);
    assert_eq!(kpi.action_skipped, 1);
    assert_eq!(kpi.action_sent + kpi.action_failed + kpi.action_skipped, kpi.actions);
}

// ============================================================================
// Dependency outage rehearsal
// ============================================================================

#[tokio::test]
async fn dispatcher_outage_fails_over_to_pager() {
    let rig = Rig::new(
        panel_sop(),
        vec![panel_open_observation()],
        vec![stop_line_decision()],
    );
    rig.gameday.set_scenario("dependency_outage");

    let clip = rig.spooled_clip(0);
    rig.observer.handle_clip(clip).await;
    let obs = rig.next_observation().await;
    rig.thinker.handle_observation(obs).await;
    let dec = rig.next_decision().await;
    rig.doer.handle_decision(dec).await;

    let act = match rig.bus.consume(Topic::Actions, CONSUME).await {
        Some(BusMessage::Action(a)) => a,
        other => panic!("expected action, got {other:?}"),
    };
    assert_eq!(act.status, ActionStatus::Failed);
    assert_eq!(act.provider, "pager");
    assert_eq!(act.action.target, "pager");
    assert!(act.action.message.contains("fallback"));
    assert!(act.error.is_some());

    let tool_errors = rig
        .audit
        .recent(100)
        .into_iter()
        .filter(|e| e.kind == AuditKind::ToolError)
        .count();
    assert!(tool_errors >= 1, "dispatcher failure must be audited");

    // Resetting the scenario restores delivery on the next decision
    rig.gameday.reset();
    assert!(!rig.dispatcher.is_down());
}

// ============================================================================
// Bad input and injection handling
// ============================================================================

#[tokio::test]
async fn missing_clip_is_audited_not_fatal() {
    let rig = Rig::new(panel_sop(), Vec::new(), Vec::new());

    let mut clip = rig.spooled_clip(0);
    std::fs::remove_file(&clip.clip_path).expect("remove clip");
    clip.clip_path = rig.cfg.ingest.spool_dir.join("gone.mp4");

    rig.observer.handle_clip(clip).await;
    assert!(rig.bus.consume(Topic::Observations, CONSUME).await.is_none());

    let bad_input = rig.audit.recent(100).into_iter().any(|e| {
        e.kind == AuditKind::ToolError && e.payload["error"] == "clip_missing"
    });
    assert!(bad_input, "expected a clip_missing tool_error record");
}

#[tokio::test]
async fn prompt_injection_scenario_redacts_and_audits() {
    let rig = Rig::new(panel_sop(), vec![panel_open_observation()], Vec::new());
    rig.gameday.set_scenario("prompt_injection");

    let clip = rig.spooled_clip(0);
    rig.observer.handle_clip(clip).await;
    let obs = rig.next_observation().await;

    assert!(obs.summary.contains("redacted"));
    assert!(!obs.summary.to_lowercase().contains("ignore all instructions"));

    let kpi = rig.audit.kpi();
    assert!(kpi.security_events >= 1);
    let flagged = rig
        .audit
        .recent(100)
        .into_iter()
        .any(|e| e.kind == AuditKind::Security && e.payload["scenario"] == "prompt_injection");
    assert!(flagged, "security record must carry the scenario tag");
}
