//! Text-generation seam.
//!
//! The pipeline treats inference as an opaque text-generation capability:
//! a prompt (and optional binary media) in, generated text out. Latency and
//! token/cost accounting are derived by the core from text lengths; never
//! supplied by the backend.

pub mod prompts;
pub mod tokens;

pub use tokens::{estimate_cost, estimate_tokens, TokenCost};

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One generation request.
pub struct GenerateRequest<'a> {
    pub system: &'a str,
    pub user: &'a str,
    /// Optional binary media (e.g. a video segment) attached to the prompt.
    pub media: Option<&'a [u8]>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// Unified trait for text-generation backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for a request. Synchronous from the stage's point of
    /// view; the call occupies the stage for its full duration.
    async fn generate(&self, req: GenerateRequest<'_>) -> Result<String>;

    /// Backend/model name for logging and audit records.
    fn model_name(&self) -> &str;
}

/// Deterministic generator that replays a scripted queue of responses.
///
/// Used by integration tests and demo runs to drive exact pipeline paths.
/// Returns an error when the script is exhausted.
pub struct ScriptedGenerator {
    name: String,
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedGenerator {
    pub fn new(name: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, _req: GenerateRequest<'_>) -> Result<String> {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("scripted generator exhausted"))
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Generator that always fails, for exercising dependency-failure paths.
pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _req: GenerateRequest<'_>) -> Result<String> {
        anyhow::bail!("generator backend unavailable")
    }

    fn model_name(&self) -> &str {
        "failing-stub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> GenerateRequest<'static> {
        GenerateRequest {
            system: "s",
            user: "u",
            media: None,
            temperature: 0.0,
            max_output_tokens: 100,
        }
    }

    #[tokio::test]
    async fn scripted_generator_replays_in_order() {
        let g = ScriptedGenerator::new("test", vec!["one".into(), "two".into()]);
        assert_eq!(g.generate(req()).await.expect("first"), "one");
        assert_eq!(g.generate(req()).await.expect("second"), "two");
        assert!(g.generate(req()).await.is_err());
    }
}
