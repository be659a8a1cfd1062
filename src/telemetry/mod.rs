//! Telemetry/incident backend seam.
//!
//! The pipeline emits counters, gauges, distributions, events, and incident
//! records through this trait. All calls are best-effort: implementations
//! must never propagate a failure into the pipeline.

pub mod heartbeat;

pub use heartbeat::{HeartbeatEmitter, QueueDepthEmitter};

use tracing::{debug, warn};

/// Tag set attached to an emission.
pub type Tags = Vec<(&'static str, String)>;

/// Alert level for backend events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
}

impl AlertLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
        }
    }
}

/// An incident-style record raised for delivery failures and SLO breaches.
#[derive(Debug, Clone)]
pub struct IncidentReport {
    pub title: String,
    pub summary: String,
    /// Backend severity label, e.g. "SEV-2".
    pub severity: &'static str,
    pub tags: Tags,
}

/// Telemetry backend interface. Implementations must be non-blocking and
/// swallow their own errors.
pub trait Telemetry: Send + Sync {
    fn count(&self, name: &str, value: i64, tags: &Tags);
    fn gauge(&self, name: &str, value: f64, tags: &Tags);
    fn distribution(&self, name: &str, value: f64, tags: &Tags);

    /// Emit a backend event (e.g. an alert feed entry).
    fn event(&self, title: &str, text: &str, level: AlertLevel, tags: &Tags);

    /// Open an incident for a reliability signal.
    fn incident(&self, report: IncidentReport);

    /// Open an investigation case (lower urgency than an incident).
    fn case(&self, title: &str, description: &str, priority: &str, tags: &Tags);
}

/// Telemetry backend that writes structured log lines. The default when no
/// real backend is wired in; keeps every emission observable in RUST_LOG
/// output.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn count(&self, name: &str, value: i64, tags: &Tags) {
        debug!(metric = name, value, ?tags, "count");
    }

    fn gauge(&self, name: &str, value: f64, tags: &Tags) {
        debug!(metric = name, value, ?tags, "gauge");
    }

    fn distribution(&self, name: &str, value: f64, tags: &Tags) {
        debug!(metric = name, value, ?tags, "distribution");
    }

    fn event(&self, title: &str, text: &str, level: AlertLevel, tags: &Tags) {
        warn!(title, text, level = level.as_str(), ?tags, "telemetry event");
    }

    fn incident(&self, report: IncidentReport) {
        warn!(
            title = %report.title,
            summary = %report.summary,
            severity = report.severity,
            tags = ?report.tags,
            "incident raised"
        );
    }

    fn case(&self, title: &str, description: &str, priority: &str, tags: &Tags) {
        warn!(title, description, priority, ?tags, "case opened");
    }
}

/// Discards everything. For tests that only assert on audit contents.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn count(&self, _name: &str, _value: i64, _tags: &Tags) {}
    fn gauge(&self, _name: &str, _value: f64, _tags: &Tags) {}
    fn distribution(&self, _name: &str, _value: f64, _tags: &Tags) {}
    fn event(&self, _title: &str, _text: &str, _level: AlertLevel, _tags: &Tags) {}
    fn incident(&self, _report: IncidentReport) {}
    fn case(&self, _title: &str, _description: &str, _priority: &str, _tags: &Tags) {}
}
