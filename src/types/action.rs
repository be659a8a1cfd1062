//! Canonical action vocabulary shared by every stage.
//!
//! Action "type" strings normalize to exactly two canonical values, with
//! `alert` as the fallback for anything unrecognized; an unknown string from
//! a language model must never become a line-stopping command. Priorities
//! normalize to P1/P2/P3 with P2 as the middle-severity default.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical action type: a line-stopping action or a lower-severity alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    StopLine,
    Alert,
}

impl ActionType {
    /// Case/separator-insensitive canonicalization with `Alert` fallback.
    pub fn canonicalize(raw: &str) -> Self {
        let s: String = raw
            .trim()
            .to_ascii_lowercase()
            .replace(['-', ' '], "_");
        match s.as_str() {
            "stop" | "stopline" | "stop_line" | "halt" | "shutdown" => ActionType::StopLine,
            _ => ActionType::Alert,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::StopLine => "stop_line",
            ActionType::Alert => "alert",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical priority: P1 (highest) through P3.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P1,
    #[default]
    P2,
    P3,
}

impl Priority {
    /// Normalize a priority string, defaulting to the middle severity.
    pub fn canonicalize(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "P1" | "1" => Priority::P1,
            "P3" | "3" => Priority::P3,
            _ => Priority::P2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized action payload, canonical at every stage boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionPayload {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub target: String,
    pub priority: Priority,
    pub message: String,
    #[serde(default)]
    pub execution_steps: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

impl ActionPayload {
    /// Build a canonical payload from untrusted model output fields.
    pub fn from_raw(raw: &serde_json::Value) -> Option<Self> {
        let obj = raw.as_object()?;
        let text = |key: &str| -> String {
            obj.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .trim()
                .to_string()
        };
        let target = {
            let t = text("target");
            if t.is_empty() { "console".to_string() } else { t }
        };
        let message = {
            let m = text("message");
            if m.is_empty() {
                "Action recommended.".to_string()
            } else {
                m
            }
        };
        Some(Self {
            action_type: ActionType::canonicalize(&text("type")),
            target,
            priority: Priority::canonicalize(&text("priority")),
            message,
            execution_steps: obj
                .get("execution_steps")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .filter_map(|s| s.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
            notes: text("notes"),
        })
    }
}

/// Normalize a raw `recommended_actions` value to at most one canonical action.
pub fn normalize_actions(raw: Option<&serde_json::Value>) -> Vec<ActionPayload> {
    let Some(list) = raw.and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    list.iter()
        .filter_map(ActionPayload::from_raw)
        .take(1)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_type_canonicalization() {
        assert_eq!(ActionType::canonicalize("Stop-Line"), ActionType::StopLine);
        assert_eq!(ActionType::canonicalize("STOP LINE"), ActionType::StopLine);
        assert_eq!(ActionType::canonicalize("halt"), ActionType::StopLine);
        assert_eq!(ActionType::canonicalize("shutdown"), ActionType::StopLine);
        assert_eq!(ActionType::canonicalize("warn"), ActionType::Alert);
        assert_eq!(ActionType::canonicalize("notify"), ActionType::Alert);
        // Unrecognized strings fall back to alert, never stop_line
        assert_eq!(ActionType::canonicalize("launch_rockets"), ActionType::Alert);
        assert_eq!(ActionType::canonicalize(""), ActionType::Alert);
    }

    #[test]
    fn priority_canonicalization() {
        assert_eq!(Priority::canonicalize("p1"), Priority::P1);
        assert_eq!(Priority::canonicalize("3"), Priority::P3);
        assert_eq!(Priority::canonicalize(""), Priority::P2);
        assert_eq!(Priority::canonicalize("urgent"), Priority::P2);
    }

    #[test]
    fn normalize_truncates_to_one_action() {
        let raw = json!([
            {"type": "alert", "message": "first"},
            {"type": "stop_line", "message": "second"}
        ]);
        let actions = normalize_actions(Some(&raw));
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].message, "first");
        assert_eq!(actions[0].target, "console");
        assert_eq!(actions[0].priority, Priority::P2);
    }

    #[test]
    fn normalize_tolerates_garbage() {
        assert!(normalize_actions(None).is_empty());
        assert!(normalize_actions(Some(&json!("not a list"))).is_empty());
        assert!(normalize_actions(Some(&json!([42, "x"]))).is_empty());
    }
}
