//! Background telemetry emitters: liveness heartbeat and bus queue depths.
//!
//! Both run as independent tokio tasks on fixed intervals and stop on the
//! shared cancellation token. Emission failures are the backend's problem;
//! the loops never die.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::Telemetry;
use crate::bus::{Bus, Topic};

/// Periodic liveness gauge (heartbeat + uptime).
pub struct HeartbeatEmitter {
    telemetry: Arc<dyn Telemetry>,
    interval: Duration,
    started_at: Instant,
}

impl HeartbeatEmitter {
    pub fn new(telemetry: Arc<dyn Telemetry>, interval: Duration) -> Self {
        Self {
            telemetry,
            interval,
            started_at: Instant::now(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        info!(interval_s = self.interval.as_secs(), "heartbeat emitter started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let tags = vec![("component", "heartbeat".to_string())];
                    self.telemetry.gauge("linesight.app.heartbeat", 1.0, &tags);
                    self.telemetry.gauge(
                        "linesight.app.uptime_s",
                        self.started_at.elapsed().as_secs_f64(),
                        &tags,
                    );
                }
            }
        }
    }
}

/// Periodic per-topic backlog gauges for queue monitoring.
pub struct QueueDepthEmitter {
    bus: Arc<Bus>,
    telemetry: Arc<dyn Telemetry>,
    interval: Duration,
}

impl QueueDepthEmitter {
    pub fn new(bus: Arc<Bus>, telemetry: Arc<dyn Telemetry>, interval: Duration) -> Self {
        Self {
            bus,
            telemetry,
            interval,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    for topic in Topic::ALL {
                        let tags = vec![("topic", topic.as_str().to_string())];
                        self.telemetry.gauge(
                            "linesight.bus.queue_depth",
                            self.bus.queue_depth(topic) as f64,
                            &tags,
                        );
                    }
                }
            }
        }
    }
}
