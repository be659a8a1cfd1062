//! Per-trace stage-timing state and end-to-end latency computation.
//!
//! All operations are linearizable under a single mutex held only for the
//! duration of the map operation; never across an external call. Timestamps
//! use `tokio::time::Instant` so paused-clock tests observe simulated time.

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::Instant;

use crate::types::{Milestone, Stage, TraceContext};

/// A stage currently executing for a trace.
#[derive(Debug, Clone)]
pub struct StageInFlight {
    pub started_at: Instant,
    pub stage: Stage,
    pub trace_id: String,
    pub clip_index: u64,
    pub trace_ctx: TraceContext,
}

/// Opaque handle returned by [`RuntimeState::begin_stage`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StageKey(String);

impl StageKey {
    fn new(trace_id: &str, stage: Stage) -> Self {
        Self(format!("{trace_id}:{stage}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// First-seen time per pipeline milestone for one trace.
///
/// Fields are set monotonically; a later `mark` for an already-set milestone
/// is a no-op. Entries are never deleted (bounded by process lifetime).
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceTimestamps {
    pub clip: Option<Instant>,
    pub observation: Option<Instant>,
    pub decision: Option<Instant>,
    pub action: Option<Instant>,
}

impl TraceTimestamps {
    fn slot(&mut self, milestone: Milestone) -> &mut Option<Instant> {
        match milestone {
            Milestone::Clip => &mut self.clip,
            Milestone::Observation => &mut self.observation,
            Milestone::Decision => &mut self.decision,
            Milestone::Action => &mut self.action,
        }
    }
}

#[derive(Default)]
struct Inner {
    inflight: HashMap<String, StageInFlight>,
    timestamps: HashMap<String, TraceTimestamps>,
}

/// Stage occupancy tracker and end-to-end latency calculator.
#[derive(Default)]
pub struct RuntimeState {
    inner: Mutex<Inner>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record stage entry. A stale prior entry for the same (trace, stage)
    /// key is overwritten; re-entry is idempotent.
    pub fn begin_stage(
        &self,
        trace_id: &str,
        stage: Stage,
        clip_index: u64,
        trace_ctx: TraceContext,
    ) -> StageKey {
        let key = StageKey::new(trace_id, stage);
        let entry = StageInFlight {
            started_at: Instant::now(),
            stage,
            trace_id: trace_id.to_string(),
            clip_index,
            trace_ctx,
        };
        self.lock().inflight.insert(key.0.clone(), entry);
        key
    }

    /// Remove and return the in-flight entry, or `None` if already ended.
    /// Guards against double-completion.
    pub fn end_stage(&self, key: &StageKey) -> Option<StageInFlight> {
        self.lock().inflight.remove(&key.0)
    }

    /// Record the current time for a milestone the first time it is seen for
    /// this trace. Later calls for the same milestone are no-ops.
    pub fn mark(&self, trace_id: &str, milestone: Milestone) {
        let now = Instant::now();
        let mut inner = self.lock();
        let ts = inner.timestamps.entry(trace_id.to_string()).or_default();
        let slot = ts.slot(milestone);
        if slot.is_none() {
            *slot = Some(now);
        }
    }

    /// Milliseconds between the clip-mark and decision-mark, or `None` if
    /// either is missing. Always >= 0 (saturating).
    pub fn e2e_decision_latency_ms(&self, trace_id: &str) -> Option<u64> {
        let inner = self.lock();
        let ts = inner.timestamps.get(trace_id)?;
        let (clip, decision) = (ts.clip?, ts.decision?);
        Some(decision.saturating_duration_since(clip).as_millis() as u64)
    }

    /// Milliseconds between the clip-mark and observation-mark.
    pub fn e2e_observation_latency_ms(&self, trace_id: &str) -> Option<u64> {
        let inner = self.lock();
        let ts = inner.timestamps.get(trace_id)?;
        let (clip, obs) = (ts.clip?, ts.observation?);
        Some(obs.saturating_duration_since(clip).as_millis() as u64)
    }

    /// Snapshot of all in-flight entries for the watchdog.
    pub fn inflight_snapshot(&self) -> Vec<(StageKey, StageInFlight)> {
        self.lock()
            .inflight
            .iter()
            .map(|(k, v)| (StageKey(k.clone()), v.clone()))
            .collect()
    }

    /// Number of stages currently in flight.
    pub fn inflight_len(&self) -> usize {
        self.lock().inflight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn begin_end_roundtrip() {
        let state = RuntimeState::new();
        let key = state.begin_stage("t1", Stage::Observer, 3, TraceContext::default());
        assert_eq!(state.inflight_len(), 1);

        let entry = state.end_stage(&key).expect("entry should exist");
        assert_eq!(entry.stage, Stage::Observer);
        assert_eq!(entry.clip_index, 3);
        assert_eq!(state.inflight_len(), 0);
    }

    #[tokio::test]
    async fn end_stage_twice_returns_none() {
        let state = RuntimeState::new();
        let key = state.begin_stage("t1", Stage::Thinker, 0, TraceContext::default());
        assert!(state.end_stage(&key).is_some());
        assert!(state.end_stage(&key).is_none());
    }

    #[tokio::test]
    async fn reentry_overwrites_stale_entry() {
        let state = RuntimeState::new();
        let _stale = state.begin_stage("t1", Stage::Doer, 1, TraceContext::default());
        let key = state.begin_stage("t1", Stage::Doer, 2, TraceContext::default());
        // At most one in-flight entry per (trace, stage) key
        assert_eq!(state.inflight_len(), 1);
        let entry = state.end_stage(&key).expect("entry should exist");
        assert_eq!(entry.clip_index, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn e2e_decision_latency_requires_both_marks() {
        let state = RuntimeState::new();
        assert!(state.e2e_decision_latency_ms("t1").is_none());

        state.mark("t1", Milestone::Clip);
        assert!(state.e2e_decision_latency_ms("t1").is_none());

        tokio::time::advance(std::time::Duration::from_millis(120)).await;
        state.mark("t1", Milestone::Decision);
        assert_eq!(state.e2e_decision_latency_ms("t1"), Some(120));
    }

    #[tokio::test(start_paused = true)]
    async fn marks_are_monotonic() {
        let state = RuntimeState::new();
        state.mark("t1", Milestone::Clip);
        tokio::time::advance(std::time::Duration::from_millis(50)).await;
        // Second clip mark must not rewind the milestone
        state.mark("t1", Milestone::Clip);
        tokio::time::advance(std::time::Duration::from_millis(50)).await;
        state.mark("t1", Milestone::Decision);
        assert_eq!(state.e2e_decision_latency_ms("t1"), Some(100));
    }
}
