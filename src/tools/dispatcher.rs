//! Action-delivery tool.
//!
//! Attempts delivery of a finalized action payload and either confirms or
//! fails. Supports a forced-unavailable mode and an artificial-latency mode,
//! both driven externally by the GameDay scenario controller.

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use crate::types::ActionPayload;

/// Confirmation returned on successful delivery.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub delivered: bool,
    pub target: String,
}

/// Delivery tool with externally controlled failure simulation.
#[derive(Debug, Default)]
pub struct Dispatcher {
    forced_down: AtomicBool,
    artificial_latency_ms: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Force the dispatcher to report itself unavailable.
    pub fn set_down(&self, down: bool) {
        self.forced_down.store(down, Ordering::Relaxed);
    }

    pub fn is_down(&self) -> bool {
        self.forced_down.load(Ordering::Relaxed)
    }

    /// Add artificial latency to every delivery attempt.
    pub fn set_latency(&self, latency: Duration) {
        self.artificial_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Attempt delivery. Confirms or fails; never partially delivers.
    pub async fn send(&self, action: &ActionPayload) -> Result<DeliveryReceipt> {
        let latency_ms = self.artificial_latency_ms.load(Ordering::Relaxed);
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
        if self.forced_down.load(Ordering::Relaxed) {
            bail!("dispatcher_unavailable");
        }
        Ok(DeliveryReceipt {
            delivered: true,
            target: action.target.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActionType, Priority};
    use tokio_test::{assert_err, assert_ok};

    fn action() -> ActionPayload {
        ActionPayload {
            action_type: ActionType::Alert,
            target: "console".into(),
            priority: Priority::P2,
            message: "investigate".into(),
            execution_steps: vec![],
            notes: String::new(),
        }
    }

    #[tokio::test]
    async fn delivers_when_up() {
        let d = Dispatcher::new();
        let receipt = tokio_test::assert_ok!(d.send(&action()).await);
        assert!(receipt.delivered);
        assert_eq!(receipt.target, "console");
    }

    #[tokio::test(start_paused = true)]
    async fn artificial_latency_delays_delivery() {
        let d = Dispatcher::new();
        d.set_latency(Duration::from_millis(300));
        let t0 = tokio::time::Instant::now();
        d.send(&action()).await.expect("delivery");
        assert!(t0.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn fails_when_forced_down() {
        let d = Dispatcher::new();
        d.set_down(true);
        tokio_test::assert_err!(d.send(&action()).await);
        d.set_down(false);
        tokio_test::assert_ok!(d.send(&action()).await);
    }
}
