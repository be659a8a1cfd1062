//! External tool seams and the shared tool-call wrapper.
//!
//! Every external dependency call goes through [`call_tool`], which measures
//! elapsed time, classifies the outcome, and reports latency regardless of
//! outcome. The timeout is measured post-hoc after the blocking call returns;
//! it does not preempt or cancel the underlying call.

pub mod dispatcher;
pub mod sop_lookup;

pub use dispatcher::{DeliveryReceipt, Dispatcher};
pub use sop_lookup::{SopHit, SopLookup};

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Classified failure of a wrapped tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The call completed but exceeded its latency budget.
    #[error("{tool} exceeded {budget_ms}ms budget ({elapsed_ms}ms)")]
    Timeout {
        tool: &'static str,
        budget_ms: u64,
        elapsed_ms: u64,
    },
    /// The call itself failed.
    #[error("{tool} failed: {source}")]
    Dependency {
        tool: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ToolError {
    /// Short classification label for audit records and metric tags.
    pub fn error_type(&self) -> &'static str {
        match self {
            ToolError::Timeout { .. } => "timeout",
            ToolError::Dependency { .. } => "dependency",
        }
    }
}

/// Outcome of a wrapped tool call. Latency is reported even on failure.
#[derive(Debug)]
pub struct ToolOutcome<T> {
    pub result: Result<T, ToolError>,
    pub latency_ms: u64,
}

impl<T> ToolOutcome<T> {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run an external dependency call, measuring elapsed time and classifying
/// the outcome as success, timeout (post-hoc), or dependency failure.
pub async fn call_tool<T, F>(tool: &'static str, budget: Duration, fut: F) -> ToolOutcome<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let t0 = Instant::now();
    let result = fut.await;
    let elapsed = t0.elapsed();
    let latency_ms = elapsed.as_millis() as u64;
    debug!(tool, latency_ms, ok = result.is_ok(), "tool call");

    let result = match result {
        Ok(_) if elapsed > budget => Err(ToolError::Timeout {
            tool,
            budget_ms: budget.as_millis() as u64,
            elapsed_ms: latency_ms,
        }),
        Ok(value) => Ok(value),
        Err(source) => Err(ToolError::Dependency { tool, source }),
    };

    ToolOutcome { result, latency_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn success_within_budget() {
        let outcome = call_tool("t", Duration::from_secs(1), async { Ok(42) }).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.result.expect("ok"), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_success_classified_as_timeout() {
        let outcome = call_tool("t", Duration::from_millis(100), async {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(7)
        })
        .await;
        let err = outcome.result.err().expect("should be timeout");
        assert_eq!(err.error_type(), "timeout");
        // Latency is still reported for the completed-but-late call
        assert!(outcome.latency_ms >= 250);
    }

    #[tokio::test]
    async fn failure_classified_as_dependency() {
        let outcome: ToolOutcome<()> = call_tool("t", Duration::from_secs(1), async {
            anyhow::bail!("boom")
        })
        .await;
        let err = outcome.result.err().expect("should be dependency failure");
        assert_eq!(err.error_type(), "dependency");
    }
}
