//! System-wide default constants.
//!
//! Centralises tunables so every config section has a single source of truth.
//! Grouped by subsystem.

// ============================================================================
// Bus / Stage Loops
// ============================================================================

/// Bounded wait used by stage consume loops (ms). Short enough that shutdown
/// signals are observed promptly.
pub const CONSUME_TIMEOUT_MS: u64 = 1_000;

// ============================================================================
// Watchdog
// ============================================================================

/// Watchdog polling interval (ms).
pub const WATCHDOG_POLL_INTERVAL_MS: u64 = 250;

/// Minimum time between repeated breach alerts for the same (trace, stage)
/// key (seconds).
pub const WATCHDOG_DEBOUNCE_SECS: u64 = 10;

// ============================================================================
// Stage SLOs
// ============================================================================

/// Observer stage SLO (ms).
pub const SLO_OBSERVER_MS: u64 = 2_500;

/// Thinker stage SLO (ms).
pub const SLO_THINKER_MS: u64 = 2_000;

/// Doer stage SLO (ms).
pub const SLO_DOER_MS: u64 = 1_500;

/// Dispatcher delivery SLO (ms). Also the dispatcher tool latency budget.
pub const SLO_DISPATCHER_MS: u64 = 1_200;

/// End-to-end clip-to-decision SLO (ms).
pub const SLO_PIPELINE_E2E_MS: u64 = 5_000;

// ============================================================================
// Audit
// ============================================================================

/// Audit ring-buffer capacity (records).
pub const AUDIT_CAPACITY: usize = 4_000;

// ============================================================================
// Dedup / Cooldown
// ============================================================================

/// Thinker decision cooldown per camera+rule key (seconds). Short; repeated
/// triggering decisions are cheap.
pub const THINKER_COOLDOWN_SECS: u64 = 4;

/// Doer dispatch cooldown per camera+severity+type key (seconds). Longer;
/// dispatching actions is operator-visible.
pub const DOER_COOLDOWN_SECS: u64 = 20;

// ============================================================================
// Ingestion / Retention
// ============================================================================

/// Spooled clip retention TTL (seconds). 300 = 5 minutes.
pub const CLIP_TTL_SECS: u64 = 300;

/// Retention janitor sweep interval (seconds).
pub const JANITOR_INTERVAL_SECS: u64 = 30;

/// Clip duration produced by the synthetic source (seconds).
pub const CLIP_SECONDS: f64 = 2.0;

/// Minimum clip file size accepted by the observer (bytes). Anything smaller
/// is treated as an unreadable segment.
pub const MIN_CLIP_BYTES: u64 = 1_024;

// ============================================================================
// Tools
// ============================================================================

/// SOP lookup latency budget (ms).
pub const SOP_BUDGET_MS: u64 = 700;

/// Maximum knowledge-base hits returned per lookup.
pub const SOP_MAX_HITS: usize = 5;

/// Citations attached to a decision (top of the hit list).
pub const MAX_CITATIONS: usize = 3;

// ============================================================================
// Telemetry
// ============================================================================

/// Heartbeat gauge interval (seconds).
pub const HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// Queue-depth gauge interval (seconds).
pub const QUEUE_DEPTH_INTERVAL_SECS: u64 = 5;

// ============================================================================
// Generation Cost Accounting
// ============================================================================

/// Cost per 1k input tokens (USD).
pub const COST_PER_1K_INPUT: f64 = 0.0005;

/// Cost per 1k output tokens (USD).
pub const COST_PER_1K_OUTPUT: f64 = 0.0015;

// ============================================================================
// GameDay
// ============================================================================

/// Extra sleep injected by the slow_stage scenario beyond the observer SLO (ms).
pub const SLOW_STAGE_OVERSHOOT_MS: u64 = 700;
