//! Linesight - factory-floor video operational intelligence.
//!
//! A staged pipeline turning short camera clips into operator actions:
//!
//! 1. **Producer** spools finished video segments and publishes [`types::ClipEvent`]s.
//! 2. **Observer** reads each clip into a structured [`types::ObservationEvent`].
//! 3. **Thinker** applies deterministic trigger rules, grounds against the SOP
//!    knowledge base, and publishes at most one [`types::DecisionEvent`].
//! 4. **Doer** enriches and delivers the action, recording a terminal
//!    [`types::ActionEvent`] whatever the outcome.
//!
//! Around the data path: an SLO [`runtime::Watchdog`] that reports (never
//! intervenes), a bounded [`audit::AuditBuffer`] with on-demand KPIs, and a
//! [`gameday::GameDayController`] for rehearsing dependency outages, slow
//! stages, and prompt injection in production-shaped conditions.

pub mod agents;
pub mod audit;
pub mod bus;
pub mod config;
pub mod gameday;
pub mod ingest;
pub mod llm;
pub mod runtime;
pub mod security;
pub mod telemetry;
pub mod tools;
pub mod types;

pub use audit::{AuditBuffer, AuditKind, KpiSnapshot};
pub use bus::{Bus, BusMessage, Topic};
pub use config::PipelineConfig;
pub use gameday::{GameDayController, Scenario};
pub use runtime::{RuntimeState, Watchdog};
