// ABOUTME: Run outputs: the RunResult of a successful run and the per-attempt trace records.
// ABOUTME: FailureReport carries the same accounting for runs that end in an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use agentlang_core::TargetKind;

use crate::provider::Usage;

/// One attempt of one unit, as recorded in the run trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// The stage slot this attempt ran for (the top-level agent name for agent runs).
    pub stage: String,
    /// The agent that actually ran; differs from `stage` when a fallback ran.
    pub unit: String,
    /// 1-based attempt number for `unit` within this stage.
    pub attempt: u32,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub usage: Usage,
    pub provider_calls: u32,
}

/// Accounting attached to a failed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub usage: Usage,
    pub provider_calls: u32,
    pub trace: Vec<AttemptRecord>,
}

/// Outcome of a successful top-level run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Ulid,
    pub target: String,
    pub kind: TargetKind,
    pub output: Value,
    /// Model of the last agent that succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub usage: Usage,
    pub provider_calls: u32,
    pub trace: Vec<AttemptRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// The output as text: strings verbatim, anything else as JSON.
    pub fn output_text(&self) -> String {
        match &self.output {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Trace records for attempts of `unit`, in execution order.
    pub fn attempts_of(&self, unit: &str) -> Vec<&AttemptRecord> {
        self.trace.iter().filter(|r| r.unit == unit).collect()
    }

    /// Trace records for the stage slot `stage`, in execution order.
    pub fn stage_trace(&self, stage: &str) -> Vec<&AttemptRecord> {
        self.trace.iter().filter(|r| r.stage == stage).collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}
