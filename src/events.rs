//! The streamed event protocol and its reconciliation rule.
//!
//! Generalizes the donor's `TrajectoryEvent`/`TrajectoryEventType` shape
//! (and `TrajectoryStream` alias) from a REPL execution trace to the
//! research workflow's event families in the external interface.

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;

/// `Pin<Box<dyn Stream<Item = StreamEvent> + Send>>`, generalizing the
/// donor's `TrajectoryStream` type alias to this crate's event type.
pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

/// Status carried by unified agent events and legacy step events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Running,
    Complete,
    Failed,
}

/// Unified agent event payload: one id per {stage, stepType[, iteration]}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: String,
    pub stage: String,
    pub step_type: String,
    pub title_en: String,
    pub title_zh: Option<String>,
    pub status: StepStatus,
    pub iteration: Option<u32>,
    pub total_iterations: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub meta: HashMap<String, Value>,
}

impl AgentEvent {
    pub fn event_id(stage: &str, step_type: &str, iteration: Option<u32>) -> String {
        match iteration {
            Some(n) => format!("{stage}-{step_type}-{n}"),
            None => format!("{stage}-{step_type}"),
        }
    }
}

/// A single typed event in the session's ordered stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    // Session lifecycle (terminal ones close the stream).
    #[serde(rename = "session-complete")]
    SessionComplete { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "session-error")]
    SessionError { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "agent-paused")]
    AgentPaused { data: Value, timestamp: DateTime<Utc> },

    // Unified agent events.
    #[serde(rename = "agent_event_start")]
    AgentEventStart { data: AgentEvent, timestamp: DateTime<Utc> },
    #[serde(rename = "agent_event_update")]
    AgentEventUpdate { data: AgentEvent, timestamp: DateTime<Utc> },
    #[serde(rename = "agent_event_complete")]
    AgentEventComplete { data: AgentEvent, timestamp: DateTime<Utc> },

    // Legacy step events, kept for backward compatibility.
    #[serde(rename = "agent_step_start")]
    AgentStepStart { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "agent_step_update")]
    AgentStepUpdate { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "agent_step_complete")]
    AgentStepComplete { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "agent_step_log")]
    AgentStepLog { id: Option<String>, data: Value, timestamp: DateTime<Utc> },

    // Cards: same id means update in place.
    #[serde(rename = "data-plan")]
    DataPlan { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "data-paper-list")]
    DataPaperList { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "data-quality")]
    DataQuality { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "data-document")]
    DataDocument { id: String, data: Value, timestamp: DateTime<Utc> },

    // Checkpoints gate the workflow until resolved.
    #[serde(rename = "data-checkpoint")]
    DataCheckpoint { id: String, data: Value, timestamp: DateTime<Utc> },

    // Incremental / transient content.
    #[serde(rename = "data-todo")]
    DataTodo { id: String, data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "data-log-line")]
    DataLogLine { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "data-summary")]
    DataSummary { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "data-notification")]
    DataNotification { data: Value, timestamp: DateTime<Utc> },

    // Research primitives.
    #[serde(rename = "status")]
    Status { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "plan")]
    Plan { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "search_start")]
    SearchStart { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "papers_found")]
    PapersFound { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "analysis")]
    Analysis { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "writing_start")]
    WritingStart { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "content")]
    Content { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "citation")]
    Citation { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "complete")]
    Complete { data: Value, timestamp: DateTime<Utc> },
    #[serde(rename = "error")]
    Error { data: Value, timestamp: DateTime<Utc> },
}

impl StreamEvent {
    /// The stable id this event reconciles on, if it carries one.
    pub fn reconciliation_id(&self) -> Option<&str> {
        match self {
            Self::AgentEventStart { data, .. }
            | Self::AgentEventUpdate { data, .. }
            | Self::AgentEventComplete { data, .. } => Some(&data.id),
            Self::AgentStepStart { id, .. }
            | Self::AgentStepUpdate { id, .. }
            | Self::AgentStepComplete { id, .. } => Some(id),
            Self::AgentStepLog { id, .. } => id.as_deref(),
            Self::DataPlan { id, .. }
            | Self::DataPaperList { id, .. }
            | Self::DataQuality { id, .. }
            | Self::DataDocument { id, .. }
            | Self::DataCheckpoint { id, .. }
            | Self::DataTodo { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SessionComplete { timestamp, .. }
            | Self::SessionError { timestamp, .. }
            | Self::AgentPaused { timestamp, .. }
            | Self::AgentEventStart { timestamp, .. }
            | Self::AgentEventUpdate { timestamp, .. }
            | Self::AgentEventComplete { timestamp, .. }
            | Self::AgentStepStart { timestamp, .. }
            | Self::AgentStepUpdate { timestamp, .. }
            | Self::AgentStepComplete { timestamp, .. }
            | Self::AgentStepLog { timestamp, .. }
            | Self::DataPlan { timestamp, .. }
            | Self::DataPaperList { timestamp, .. }
            | Self::DataQuality { timestamp, .. }
            | Self::DataDocument { timestamp, .. }
            | Self::DataCheckpoint { timestamp, .. }
            | Self::DataTodo { timestamp, .. }
            | Self::DataLogLine { timestamp, .. }
            | Self::DataSummary { timestamp, .. }
            | Self::DataNotification { timestamp, .. }
            | Self::Status { timestamp, .. }
            | Self::Plan { timestamp, .. }
            | Self::SearchStart { timestamp, .. }
            | Self::PapersFound { timestamp, .. }
            | Self::Analysis { timestamp, .. }
            | Self::WritingStart { timestamp, .. }
            | Self::Content { timestamp, .. }
            | Self::Citation { timestamp, .. }
            | Self::Complete { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    /// Terminal events close the stream: no event follows them for the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionComplete { .. } | Self::SessionError { .. } | Self::Complete { .. } | Self::Error { .. })
    }
}

/// Merge `update` into `base` by shallow overlay: top-level `data` keys in
/// `update` replace those in `base`; `meta` (if present in both as objects)
/// is merged one level deeper. Used to reconcile a later same-id event into
/// an earlier one.
pub fn reconcile(base: &Value, update: &Value) -> Value {
    match (base, update) {
        (Value::Object(base_map), Value::Object(update_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in update_map {
                if key == "meta" {
                    if let (Some(Value::Object(base_meta)), Value::Object(update_meta)) =
                        (merged.get("meta"), value)
                    {
                        let mut meta = base_meta.clone();
                        for (k, v) in update_meta {
                            meta.insert(k.clone(), v.clone());
                        }
                        merged.insert("meta".to_string(), Value::Object(meta));
                        continue;
                    }
                }
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, update) => update.clone(),
    }
}

/// Fold a flat vector of events into a map keyed by reconciliation id,
/// later events overlaying earlier ones; events without an id pass through
/// unchanged, keyed by their position.
pub fn reconcile_stream(events: &[StreamEvent]) -> HashMap<String, Value> {
    let mut result: HashMap<String, Value> = HashMap::new();
    for (index, event) in events.iter().enumerate() {
        let key = event
            .reconciliation_id()
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("__unkeyed_{index}"));
        let payload = event_data(event);
        match result.get(&key) {
            Some(existing) => {
                let merged = reconcile(existing, &payload);
                result.insert(key, merged);
            }
            None => {
                result.insert(key, payload);
            }
        }
    }
    result
}

fn event_data(event: &StreamEvent) -> Value {
    serde_json::to_value(event).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reconcile_overlays_top_level_and_merges_meta() {
        let base = json!({"status": "running", "meta": {"count": 1, "kept": true}});
        let update = json!({"status": "complete", "meta": {"count": 2}});
        let merged = reconcile(&base, &update);
        assert_eq!(merged["status"], "complete");
        assert_eq!(merged["meta"]["count"], 2);
        assert_eq!(merged["meta"]["kept"], true);
    }

    #[test]
    fn event_id_includes_iteration_when_present() {
        assert_eq!(AgentEvent::event_id("searching", "search_round", Some(2)), "searching-search_round-2");
        assert_eq!(AgentEvent::event_id("planning", "create_plan", None), "planning-create_plan");
    }

    #[test]
    fn terminal_events_are_identified() {
        let now = Utc::now();
        assert!(StreamEvent::Complete { data: json!({}), timestamp: now }.is_terminal());
        assert!(!StreamEvent::Status { data: json!({}), timestamp: now }.is_terminal());
    }
}
