//! Bounded audit log with on-demand KPI aggregation.
//!
//! Append-only ring buffer of every notable pipeline occurrence. When
//! capacity is exceeded the oldest record is evicted. KPI aggregation is
//! O(buffer size) over a single point-in-time snapshot taken under the lock,
//! so concurrent writers can never tear a KPI readout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use uuid::Uuid;

/// Classification of an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    Clip,
    Observation,
    Decision,
    Action,
    ToolCall,
    ToolError,
    Stage,
    StageTimeout,
    Security,
    Health,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Clip => "clip",
            AuditKind::Observation => "observation",
            AuditKind::Decision => "decision",
            AuditKind::Action => "action",
            AuditKind::ToolCall => "tool_call",
            AuditKind::ToolError => "tool_error",
            AuditKind::Stage => "stage",
            AuditKind::StageTimeout => "stage_timeout",
            AuditKind::Security => "security",
            AuditKind::Health => "health",
        }
    }
}

impl fmt::Display for AuditKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable log record of one pipeline occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub audit_id: Uuid,
    pub ts: DateTime<Utc>,
    pub kind: AuditKind,
    pub trace_id: String,
    pub payload: serde_json::Value,
}

/// Per-priority action counts for the KPI snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PriorityCounts {
    pub p1: u64,
    pub p2: u64,
    pub p3: u64,
}

/// Aggregate KPIs recomputed on demand over the current buffer contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub stop_line: u64,
    pub alert: u64,
    pub decisions: u64,
    pub observations: u64,
    pub actions: u64,
    pub action_sent: u64,
    pub action_failed: u64,
    pub action_skipped: u64,
    pub last_stop_line_ts: Option<DateTime<Utc>>,
    pub priorities: PriorityCounts,
    pub tool_errors: u64,
    pub stage_timeouts: u64,
    pub security_events: u64,
}

/// Bounded, thread-safe event log + KPI aggregator.
pub struct AuditBuffer {
    capacity: usize,
    events: Mutex<VecDeque<AuditEvent>>,
}

impl AuditBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            events: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
        }
    }

    /// Append a record, evicting the oldest when over capacity.
    ///
    /// Returns the generated audit id.
    pub fn add(&self, kind: AuditKind, trace_id: &str, payload: serde_json::Value) -> Uuid {
        let ev = AuditEvent {
            audit_id: Uuid::new_v4(),
            ts: Utc::now(),
            kind,
            trace_id: trace_id.to_string(),
            payload,
        };
        let id = ev.audit_id;
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(ev);
        id
    }

    /// Up to `limit` most-recent records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let lim = limit.max(1);
        let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.iter().rev().take(lim).cloned().collect()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Recompute aggregate KPIs over a single snapshot of the buffer.
    pub fn kpi(&self) -> KpiSnapshot {
        let snapshot: Vec<AuditEvent> = {
            let events = self.events.lock().unwrap_or_else(|e| e.into_inner());
            events.iter().cloned().collect()
        };

        let mut kpi = KpiSnapshot::default();
        for ev in &snapshot {
            match ev.kind {
                AuditKind::Decision => kpi.decisions += 1,
                AuditKind::Observation => kpi.observations += 1,
                AuditKind::ToolError => kpi.tool_errors += 1,
                AuditKind::StageTimeout => kpi.stage_timeouts += 1,
                AuditKind::Security => kpi.security_events += 1,
                AuditKind::Action => {
                    kpi.actions += 1;
                    let action = ev.payload.get("action");
                    let action_type = action
                        .and_then(|a| a.get("type"))
                        .and_then(|t| t.as_str())
                        .unwrap_or_default();
                    let priority = action
                        .and_then(|a| a.get("priority"))
                        .and_then(|p| p.as_str())
                        .unwrap_or_default();
                    let status = ev
                        .payload
                        .get("status")
                        .and_then(|s| s.as_str())
                        .unwrap_or_default();

                    match priority {
                        "P1" => kpi.priorities.p1 += 1,
                        "P2" => kpi.priorities.p2 += 1,
                        "P3" => kpi.priorities.p3 += 1,
                        _ => {}
                    }
                    match status {
                        "sent" => kpi.action_sent += 1,
                        "failed" => kpi.action_failed += 1,
                        "skipped" => kpi.action_skipped += 1,
                        _ => {}
                    }
                    match action_type {
                        "stop_line" => {
                            kpi.stop_line += 1;
                            kpi.last_stop_line_ts = Some(ev.ts);
                        }
                        "alert" => kpi.alert += 1,
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        kpi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn action_payload(action_type: &str, priority: &str, status: &str) -> serde_json::Value {
        json!({
            "action": {"type": action_type, "priority": priority, "message": "m"},
            "status": status,
        })
    }

    #[test]
    fn never_exceeds_capacity_and_keeps_newest() {
        let audit = AuditBuffer::new(10);
        for i in 0..25u64 {
            audit.add(AuditKind::Health, "t", json!({"i": i}));
        }
        assert_eq!(audit.len(), 10);

        let recent = audit.recent(10);
        assert_eq!(recent.len(), 10);
        // Newest first: 24, 23, ... 15
        for (offset, ev) in recent.iter().enumerate() {
            let i = ev.payload.get("i").and_then(|v| v.as_u64());
            assert_eq!(i, Some(24 - offset as u64));
        }
    }

    #[test]
    fn recent_limit_is_clamped() {
        let audit = AuditBuffer::new(100);
        audit.add(AuditKind::Health, "t", json!({}));
        assert_eq!(audit.recent(0).len(), 1);
        assert_eq!(audit.recent(500).len(), 1);
    }

    #[test]
    fn kpi_action_outcomes_sum_to_total() {
        let audit = AuditBuffer::new(100);
        audit.add(AuditKind::Action, "a", action_payload("stop_line", "P1", "sent"));
        audit.add(AuditKind::Action, "b", action_payload("alert", "P2", "failed"));
        audit.add(AuditKind::Action, "c", action_payload("alert", "P2", "skipped"));
        audit.add(AuditKind::Action, "d", action_payload("alert", "P3", "sent"));
        audit.add(AuditKind::Decision, "a", json!({}));
        audit.add(AuditKind::Observation, "a", json!({}));

        let kpi = audit.kpi();
        assert_eq!(kpi.actions, 4);
        assert_eq!(kpi.action_sent + kpi.action_failed + kpi.action_skipped, kpi.actions);
        assert_eq!(kpi.stop_line, 1);
        assert_eq!(kpi.alert, 3);
        assert_eq!(kpi.priorities.p1, 1);
        assert_eq!(kpi.priorities.p2, 2);
        assert_eq!(kpi.priorities.p3, 1);
        assert_eq!(kpi.decisions, 1);
        assert_eq!(kpi.observations, 1);
        assert!(kpi.last_stop_line_ts.is_some());
    }

    #[test]
    fn kpi_counts_failure_kinds() {
        let audit = AuditBuffer::new(100);
        audit.add(AuditKind::ToolError, "t", json!({}));
        audit.add(AuditKind::StageTimeout, "t", json!({}));
        audit.add(AuditKind::StageTimeout, "t", json!({}));
        audit.add(AuditKind::Security, "t", json!({}));

        let kpi = audit.kpi();
        assert_eq!(kpi.tool_errors, 1);
        assert_eq!(kpi.stage_timeouts, 2);
        assert_eq!(kpi.security_events, 1);
    }
}
