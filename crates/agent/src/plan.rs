//! Plan protocol and parser
//!
//! The model answers with free text that should contain one JSON object:
//!
//! ```json
//! {
//!   "reason": "why these commands",
//!   "commands": [{"shell": "cargo test", "allowFail": false}],
//!   "successCriteria": ["tests pass"],
//!   "next": "done | continue"
//! }
//! ```
//!
//! Extraction is a best-effort heuristic: the span from the first `{` to the
//! last `}` is decoded. It lives behind [`PlanParser`] so a schema-constrained
//! mode can replace it without touching the loop.

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

/// Reason recorded on the fallback plan
pub const PARSE_FAILED_REASON: &str = "parse-failed";

/// One shell command proposed by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    #[serde(default, deserialize_with = "null_as_default")]
    pub shell: String,
    #[serde(rename = "allowFail", default, deserialize_with = "null_as_default")]
    pub allow_fail: bool,
}

impl CommandSpec {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            allow_fail: false,
        }
    }

    pub fn allowing_failure(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
            allow_fail: true,
        }
    }
}

/// The model's decision for one cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    #[serde(default, deserialize_with = "null_as_default")]
    pub reason: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub commands: Vec<CommandSpec>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub success_criteria: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub next: String,
}

impl Plan {
    /// Safe plan used whenever the model output cannot be decoded
    pub fn parse_failed() -> Self {
        Self {
            reason: PARSE_FAILED_REASON.to_string(),
            commands: Vec::new(),
            success_criteria: Vec::new(),
            next: "continue".to_string(),
        }
    }

    /// Loose containment test: "done", "Done.", "done | continue" all count.
    pub fn is_done(&self) -> bool {
        self.next.to_lowercase().contains("done")
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Turns raw model output into a [`Plan`]. Never fails.
pub trait PlanParser: Send + Sync {
    fn parse(&self, raw: &str) -> Plan;
}

/// First-`{`-to-last-`}` extraction followed by a strict decode
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSpanParser;

impl PlanParser for JsonSpanParser {
    fn parse(&self, raw: &str) -> Plan {
        parse_plan(raw)
    }
}

/// Slice `raw` to its outermost brace span, or return it unchanged
pub fn extract_json_span(raw: &str) -> &str {
    match (raw.find('{'), raw.rfind('}')) {
        (Some(start), Some(end)) if start < end => &raw[start..=end],
        _ => raw,
    }
}

/// Strict decode of the extracted span
pub fn try_parse_plan(raw: &str) -> serde_json::Result<Plan> {
    serde_json::from_str(extract_json_span(raw))
}

/// Decode, substituting [`Plan::parse_failed`] on any error
pub fn parse_plan(raw: &str) -> Plan {
    match try_parse_plan(raw) {
        Ok(plan) => plan,
        Err(e) => {
            warn!("[PARSE FAILED] {}; continuing with an empty plan", e);
            Plan::parse_failed()
        }
    }
}
