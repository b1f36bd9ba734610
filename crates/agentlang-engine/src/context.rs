// ABOUTME: Per-run execution state: effective config, variable bindings, usage ledger and trace.
// ABOUTME: Also resolves variable references in task inputs and derives the user message text.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use ulid::Ulid;

use agentlang_core::TargetKind;

use crate::config::EffectiveConfig;
use crate::provider::Usage;
use crate::result::{AttemptRecord, FailureReport, RunResult};

/// Structured input handed to an agent or pipeline.
pub type TaskInput = Map<String, Value>;

/// Build a task input holding only a `task` field.
pub fn task_input(task: &str) -> TaskInput {
    let mut input = TaskInput::new();
    input.insert("task".to_string(), Value::String(task.to_string()));
    input
}

/// Fields that carry pipeline plumbing rather than task content.
const PLUMBING_FIELDS: &[&str] = &["task", "message", "previous", "stages"];

/// The user message for an input: `task`, else `message`, else the whole input
/// as JSON. Remaining fields are appended as an "Inputs" block.
pub fn task_text(input: &TaskInput) -> String {
    let head = ["task", "message"]
        .iter()
        .find_map(|key| input.get(*key))
        .map(render_value);

    let Some(head) = head else {
        return Value::Object(input.clone()).to_string();
    };

    let extras: Map<String, Value> = input
        .iter()
        .filter(|(key, _)| !PLUMBING_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if extras.is_empty() {
        head
    } else {
        let rendered = serde_json::to_string_pretty(&extras).unwrap_or_default();
        format!("{head}\n\nInputs:\n{rendered}")
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Named values that run inputs may reference as `name` or `name.field.path`.
#[derive(Debug, Clone, Default)]
pub struct Bindings {
    values: HashMap<String, Value>,
}

impl Bindings {
    pub fn bind(&mut self, name: &str, value: Value) {
        self.values.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every string that references a bound variable with the bound
    /// value at that path. Anything that does not resolve, such as a file name
    /// whose stem happens to be bound, stays literal.
    pub fn resolve_input(&self, input: &TaskInput) -> TaskInput {
        input
            .iter()
            .map(|(key, value)| (key.clone(), self.resolve_value(value)))
            .collect()
    }

    fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self
                .resolve_reference(s)
                .cloned()
                .unwrap_or_else(|| value.clone()),
            Value::Array(items) => {
                Value::Array(items.iter().map(|item| self.resolve_value(item)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn resolve_reference(&self, text: &str) -> Option<&Value> {
        if !is_reference(text) {
            return None;
        }

        let mut segments = text.split('.');
        let mut current = segments.next().and_then(|head| self.values.get(head))?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            }?;
        }
        Some(current)
    }
}

/// A dotted path of identifier-like segments, e.g. `research.output`.
fn is_reference(text: &str) -> bool {
    !text.is_empty()
        && text.split('.').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
}

/// Mutable state owned by exactly one top-level run.
#[derive(Debug)]
pub struct ExecutionContext {
    pub run_id: Ulid,
    pub config: EffectiveConfig,
    pub started_at: DateTime<Utc>,
    usage: Usage,
    provider_calls: u32,
    trace: Vec<AttemptRecord>,
}

impl ExecutionContext {
    pub fn new(config: EffectiveConfig) -> Self {
        Self {
            run_id: Ulid::new(),
            config,
            started_at: Utc::now(),
            usage: Usage::default(),
            provider_calls: 0,
            trace: Vec::new(),
        }
    }

    /// Fold one attempt into the ledger.
    pub fn record(&mut self, record: AttemptRecord) {
        self.usage.add(record.usage);
        self.provider_calls += record.provider_calls;
        self.trace.push(record);
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn provider_calls(&self) -> u32 {
        self.provider_calls
    }

    pub fn trace(&self) -> &[AttemptRecord] {
        &self.trace
    }

    /// Snapshot of the accounting so far.
    pub fn report(&self) -> FailureReport {
        FailureReport {
            usage: self.usage,
            provider_calls: self.provider_calls,
            trace: self.trace.clone(),
        }
    }

    /// Close the run into its result.
    pub fn finish(
        self,
        target: &str,
        kind: TargetKind,
        output: Value,
        model: Option<String>,
    ) -> RunResult {
        RunResult {
            run_id: self.run_id,
            target: target.to_string(),
            kind,
            output,
            model,
            usage: self.usage,
            provider_calls: self.provider_calls,
            trace: self.trace,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> TaskInput {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn task_text_prefers_task_then_message_then_json() {
        assert_eq!(task_text(&task_input("Say hello")), "Say hello");
        assert_eq!(task_text(&input(json!({"message": "Hi"}))), "Hi");
        assert_eq!(task_text(&input(json!({"topic": "rust"}))), "{\"topic\":\"rust\"}");
    }

    #[test]
    fn task_text_appends_extra_fields() {
        let text = task_text(&input(json!({
            "task": "Summarize",
            "previous": {"stage": "a", "output": "x"},
            "stages": {"a": "x"},
            "audience": "kids"
        })));
        assert_eq!(text, "Summarize\n\nInputs:\n{\n  \"audience\": \"kids\"\n}");

        let chained = task_text(&input(json!({
            "task": "OUT_B",
            "previous": {"stage": "b", "output": "OUT_B"},
            "stages": {"a": "OUT_A", "b": "OUT_B"}
        })));
        assert_eq!(chained, "OUT_B");
    }

    #[test]
    fn bound_references_resolve_by_path() {
        let mut bindings = Bindings::default();
        bindings.bind(
            "research",
            json!({"output": "findings", "trace": [{"unit": "a"}]}),
        );

        let resolved = bindings.resolve_input(&input(json!({
            "task": "research.output",
            "first": "research.trace.0.unit",
            "nested": ["research.output", 3]
        })));

        assert_eq!(resolved["task"], "findings");
        assert_eq!(resolved["first"], "a");
        assert_eq!(resolved["nested"], json!(["findings", 3]));
    }

    #[test]
    fn unresolvable_strings_stay_literal() {
        let mut bindings = Bindings::default();
        bindings.bind("research", json!({"output": "findings"}));
        bindings.bind("report", json!("quarterly numbers"));

        let resolved = bindings.resolve_input(&input(json!({
            "task": "Say hello",
            "file": "notes.txt",
            "out": "report.md",
            "missing": "research.summary"
        })));
        assert_eq!(resolved["task"], "Say hello");
        assert_eq!(resolved["file"], "notes.txt");
        assert_eq!(resolved["out"], "report.md");
        assert_eq!(resolved["missing"], "research.summary");
    }

    #[test]
    fn ledger_accumulates_records() {
        let mut ctx = ExecutionContext::new(EffectiveConfig::default());
        for attempt in 1..=2 {
            ctx.record(AttemptRecord {
                stage: "a".to_string(),
                unit: "a".to_string(),
                attempt,
                success: attempt == 2,
                error_kind: None,
                error: None,
                usage: Usage::new(10, 5),
                provider_calls: 2,
            });
        }

        assert_eq!(ctx.usage(), Usage::new(20, 10));
        assert_eq!(ctx.provider_calls(), 4);
        assert_eq!(ctx.report().trace.len(), 2);

        let result = ctx.finish("a", TargetKind::Agent, json!("ok"), None);
        assert_eq!(result.usage.total(), 30);
        assert!(result.finished_at >= result.started_at);
    }
}
