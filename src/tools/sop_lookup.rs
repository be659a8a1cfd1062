//! Standard-operating-procedure knowledge-base lookup tool.
//!
//! Loads a JSON step catalog once and answers substring queries with up to
//! five hits. Empty results are a valid, non-error outcome; the caller
//! treats them as missing grounding, not as a failure.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::config::defaults::SOP_MAX_HITS;

/// One knowledge-base step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SopStep {
    pub step_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Deserialize)]
struct SopCatalog {
    #[serde(default)]
    steps: Vec<SopStep>,
}

/// One lookup hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SopHit {
    pub id: String,
    pub text: String,
    pub action: String,
}

/// Knowledge-base lookup backed by a JSON file, loaded lazily and cached.
pub struct SopLookup {
    path: PathBuf,
    cache: OnceLock<Vec<SopStep>>,
}

impl SopLookup {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: OnceLock::new(),
        }
    }

    /// Build from an in-memory catalog (tests, demos).
    pub fn with_steps(steps: Vec<SopStep>) -> Self {
        let lookup = Self::new("<inline>");
        let _ = lookup.cache.set(steps);
        lookup
    }

    fn load(&self) -> Result<&[SopStep]> {
        if let Some(steps) = self.cache.get() {
            return Ok(steps);
        }
        let steps = read_catalog(&self.path)?;
        // A concurrent load may have won the race; either value is the same file.
        let _ = self.cache.set(steps);
        self.cache
            .get()
            .map(Vec::as_slice)
            .context("SOP cache unexpectedly empty after load")
    }

    /// Case-insensitive substring search over step id, description, and
    /// action text. Returns at most five hits; empty is valid.
    pub fn lookup(&self, query: &str) -> Result<Vec<SopHit>> {
        let steps = self.load()?;
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return Ok(Vec::new());
        }
        Ok(steps
            .iter()
            .filter(|s| {
                format!("{} {} {}", s.step_id, s.description, s.action)
                    .to_lowercase()
                    .contains(&q)
            })
            .take(SOP_MAX_HITS)
            .map(|s| SopHit {
                id: s.step_id.clone(),
                text: s.description.clone(),
                action: s.action.clone(),
            })
            .collect())
    }
}

fn read_catalog(path: &Path) -> Result<Vec<SopStep>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("SOP file missing: {}", path.display()))?;
    let catalog: SopCatalog =
        serde_json::from_str(&raw).with_context(|| format!("bad SOP JSON: {}", path.display()))?;
    Ok(catalog.steps)
}
