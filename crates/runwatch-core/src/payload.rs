//! Per-kind payload decoding.
//!
//! Every decoder is total: a missing or mistyped field becomes the field's
//! default, never an error. Keys are looked up in both the camelCase form the
//! trace emitter uses and the snake_case form the engine uses.

use crate::envelope::{Envelope, EventKind};
use crate::value::Fields;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    RunStarted,
    RunCompleted,
    RunFailed(RunFailedPayload),
    Stage(StagePayload),
    Progress(ProgressPayload),
    WorkflowStatus(WorkflowStatusPayload),
    OrchestratorPlan(OrchestratorPlanPayload),
    Decision(DecisionPayload),
    AgentActivated(AgentActivatedPayload),
    AgentExcluded(AgentExcludedPayload),
    SpanStarted(SpanStartedPayload),
    SpanEnded(SpanEndedPayload),
    AgentProgress(AgentProgressPayload),
    AgentNote(AgentNotePayload),
    Evidence(EvidencePayload),
    Recommendation(RecommendationPayload),
    ToolCall(ToolCallPayload),
    QueryStart(QueryStartPayload),
    QueryComplete(QueryCompletePayload),
    Scoring(ScoringPayload),
    RecoveryOption(OptionPayload),
    CoordinatorPlan(CoordinatorPlanPayload),
    Handover(HandoverPayload),
    Heartbeat,
    Unknown,
}

impl EventPayload {
    pub fn decode(envelope: &Envelope) -> Self {
        let fields = envelope.fields();
        match &envelope.kind {
            EventKind::RunStarted => EventPayload::RunStarted,
            EventKind::RunCompleted => EventPayload::RunCompleted,
            EventKind::RunFailed => {
                EventPayload::RunFailed(RunFailedPayload::decode(fields, envelope))
            }
            EventKind::StageStarted | EventKind::StageCompleted | EventKind::StageFailed => {
                EventPayload::Stage(StagePayload::decode(fields, envelope))
            }
            EventKind::ProgressUpdate => EventPayload::Progress(ProgressPayload::decode(fields)),
            EventKind::WorkflowStatus => {
                EventPayload::WorkflowStatus(WorkflowStatusPayload::decode(fields))
            }
            EventKind::OrchestratorPlan => {
                EventPayload::OrchestratorPlan(OrchestratorPlanPayload::decode(fields))
            }
            EventKind::OrchestratorDecision | EventKind::OrchestratorDelegated => {
                EventPayload::Decision(DecisionPayload::decode(fields, envelope))
            }
            EventKind::AgentActivated => {
                EventPayload::AgentActivated(AgentActivatedPayload::decode(fields))
            }
            EventKind::AgentExcluded => {
                EventPayload::AgentExcluded(AgentExcludedPayload::decode(fields))
            }
            EventKind::SpanStarted | EventKind::AgentStarted | EventKind::ExecutorInvoked => {
                EventPayload::SpanStarted(SpanStartedPayload::decode(fields))
            }
            EventKind::SpanEnded | EventKind::AgentCompleted | EventKind::ExecutorCompleted => {
                EventPayload::SpanEnded(SpanEndedPayload::decode(fields))
            }
            EventKind::AgentProgress => {
                EventPayload::AgentProgress(AgentProgressPayload::decode(fields))
            }
            EventKind::AgentObjective
            | EventKind::AgentReasoning
            | EventKind::AgentStreaming
            | EventKind::AgentStatus => {
                EventPayload::AgentNote(AgentNotePayload::decode(fields, envelope))
            }
            EventKind::AgentEvidence => EventPayload::Evidence(EvidencePayload::decode(fields)),
            EventKind::AgentRecommendation => {
                EventPayload::Recommendation(RecommendationPayload::decode(fields))
            }
            EventKind::ToolCalled | EventKind::ToolCompleted | EventKind::ToolFailed => {
                EventPayload::ToolCall(ToolCallPayload::decode(fields, envelope))
            }
            EventKind::DataSourceQueryStart => {
                EventPayload::QueryStart(QueryStartPayload::decode(fields))
            }
            EventKind::DataSourceQueryComplete => {
                EventPayload::QueryComplete(QueryCompletePayload::decode(fields, envelope))
            }
            EventKind::CoordinatorScoring => EventPayload::Scoring(ScoringPayload::decode(fields)),
            EventKind::RecoveryOption => {
                EventPayload::RecoveryOption(OptionPayload::decode(&envelope.payload, 0))
            }
            EventKind::CoordinatorPlan => {
                EventPayload::CoordinatorPlan(CoordinatorPlanPayload::decode(fields))
            }
            EventKind::Handover => EventPayload::Handover(HandoverPayload::decode(fields)),
            EventKind::Heartbeat => EventPayload::Heartbeat,
            EventKind::Unknown(_) => EventPayload::Unknown,
        }
    }
}

impl Envelope {
    /// Authoritative run progress carried by any kind of envelope.
    pub fn run_progress_pct(&self) -> Option<f64> {
        self.fields()
            .f64(&["runProgressPct", "run_progress_pct"])
            .map(clamp_pct)
    }
}

pub fn clamp_pct(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunFailedPayload {
    pub error: Option<String>,
}

impl RunFailedPayload {
    fn decode(fields: Fields<'_>, envelope: &Envelope) -> Self {
        Self {
            error: fields
                .string(&["error", "error_message", "reason"])
                .or_else(|| non_empty(&envelope.message)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StagePayload {
    pub stage_id: Option<String>,
    pub stage_name: Option<String>,
}

impl StagePayload {
    fn decode(fields: Fields<'_>, envelope: &Envelope) -> Self {
        Self {
            stage_id: envelope
                .stage_id
                .clone()
                .or_else(|| fields.string(&["stage_id", "stageId"])),
            stage_name: envelope
                .stage_name
                .clone()
                .or_else(|| fields.string(&["stage_name", "stageName"])),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressPayload {
    pub run_progress_pct: Option<f64>,
    pub agents_total: Option<u32>,
    pub agents_activated: Option<u32>,
    pub agents_running: Option<u32>,
    pub agents_done: Option<u32>,
    pub agents_errored: Option<u32>,
    pub current_step: Option<String>,
}

impl ProgressPayload {
    fn decode(fields: Fields<'_>) -> Self {
        let count = |keys: &[&str]| fields.u64(keys).map(|v| v.min(u32::MAX as u64) as u32);
        Self {
            run_progress_pct: fields
                .f64(&["runProgressPct", "run_progress_pct"])
                .map(clamp_pct),
            agents_total: count(&["agentsTotal", "agents_total"]),
            agents_activated: count(&["agentsActivated", "agents_activated"]),
            agents_running: count(&["agentsRunning", "agents_running"]),
            agents_done: count(&["agentsDone", "agents_done"]),
            agents_errored: count(&["agentsErrored", "agents_errored"]),
            current_step: fields.string(&["currentStep", "current_step"]),
        }
    }

    pub fn has_counts(&self) -> bool {
        self.agents_total.is_some()
            || self.agents_activated.is_some()
            || self.agents_running.is_some()
            || self.agents_done.is_some()
            || self.agents_errored.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowStatusPayload {
    pub status: Option<String>,
    pub current_step: Option<String>,
}

impl WorkflowStatusPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            status: fields.string(&["status", "workflowStatus", "workflow_status"]),
            current_step: fields.string(&["currentStep", "current_step", "event_type"]),
        }
    }
}

/// Roster entry as published by the run-start response and the orchestrator
/// plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterAgent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, rename = "dataSources")]
    pub data_sources: Vec<String>,
    #[serde(default = "default_included")]
    pub included: bool,
    #[serde(default)]
    pub reason: String,
}

fn default_included() -> bool {
    true
}

impl RosterAgent {
    fn decode(map: &Map<String, Value>, included: bool) -> Option<Self> {
        let fields = Fields::new(map);
        let id = fields.string(&["id", "agentId", "agent_id"])?;
        Some(Self {
            name: fields
                .string(&["name", "agentName", "agent_name"])
                .unwrap_or_else(|| id.clone()),
            icon: fields.string(&["icon"]).unwrap_or_default(),
            color: fields.string(&["color"]).unwrap_or_default(),
            data_sources: fields.list(&["dataSources", "data_sources"]),
            included: fields.bool(&["included"]).unwrap_or(included),
            reason: fields.string(&["reason"]).unwrap_or_default(),
            id,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestratorPlanPayload {
    pub selected: Vec<RosterAgent>,
    pub excluded: Vec<RosterAgent>,
}

impl OrchestratorPlanPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            selected: fields
                .objects(&["selectedAgents", "selected_agents"])
                .into_iter()
                .filter_map(|map| RosterAgent::decode(map, true))
                .collect(),
            excluded: fields
                .objects(&["excludedAgents", "excluded_agents"])
                .into_iter()
                .filter_map(|map| RosterAgent::decode(map, false))
                .map(|mut agent| {
                    agent.included = false;
                    agent
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionPayload {
    pub decision_type: String,
    pub reason: String,
    pub confidence: Option<f64>,
}

impl DecisionPayload {
    fn decode(fields: Fields<'_>, envelope: &Envelope) -> Self {
        Self {
            decision_type: fields
                .string(&["decisionType", "decision_type"])
                .unwrap_or_else(|| envelope.kind.as_str().to_string()),
            reason: fields
                .string(&["reason", "reasoning"])
                .unwrap_or_else(|| envelope.message.clone()),
            confidence: fields.f64(&["confidence"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentActivatedPayload {
    pub agent_name: Option<String>,
    pub reason: Option<String>,
    pub data_sources: Vec<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
}

impl AgentActivatedPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            agent_name: fields.string(&["agentName", "agent_name"]),
            reason: fields.string(&["reason"]),
            data_sources: fields.list(&["dataSources", "data_sources"]),
            icon: fields.string(&["icon"]),
            color: fields.string(&["color"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentExcludedPayload {
    pub agent_name: Option<String>,
    pub reason: Option<String>,
}

impl AgentExcludedPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            agent_name: fields.string(&["agentName", "agent_name"]),
            reason: fields.string(&["reason"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanStartedPayload {
    pub objective: Option<String>,
}

impl SpanStartedPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            objective: fields.string(&["objective"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpanEndedPayload {
    pub success: bool,
    pub result_summary: Option<String>,
}

impl Default for SpanEndedPayload {
    fn default() -> Self {
        Self {
            success: true,
            result_summary: None,
        }
    }
}

impl SpanEndedPayload {
    fn decode(fields: Fields<'_>) -> Self {
        let failed_status = fields
            .string(&["status"])
            .map(|status| matches!(status.as_str(), "failed" | "error"))
            .unwrap_or(false);
        Self {
            success: fields.bool(&["success"]).unwrap_or(!failed_status),
            result_summary: fields.string(&["resultSummary", "result_summary", "summary"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentProgressPayload {
    pub percent_complete: Option<f64>,
    pub current_step: Option<String>,
}

impl AgentProgressPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            percent_complete: fields
                .f64(&["percentComplete", "percent_complete"])
                .map(clamp_pct),
            current_step: fields.string(&["currentStep", "current_step"]),
        }
    }
}

/// Free text attached to an agent: objective, reasoning, streamed output or
/// a status line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentNotePayload {
    pub text: Option<String>,
    pub objective: Option<String>,
    pub current_step: Option<String>,
    pub percent_complete: Option<f64>,
}

impl AgentNotePayload {
    fn decode(fields: Fields<'_>, envelope: &Envelope) -> Self {
        Self {
            text: fields
                .string(&["reasoning", "content", "text", "delta", "status"])
                .or_else(|| non_empty(&envelope.message)),
            objective: fields.string(&["objective"]),
            current_step: fields.string(&["currentStep", "current_step"]),
            percent_complete: fields
                .f64(&["percentComplete", "percent_complete"])
                .map(clamp_pct),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidencePayload {
    pub source_type: Option<String>,
    pub summary: String,
    pub result_count: u64,
    pub confidence: Option<f64>,
    pub source_provider: Option<String>,
}

impl EvidencePayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            source_type: fields
                .string(&["sourceType", "source_type"])
                .map(|key| normalize_source_key(&key)),
            summary: fields
                .string(&["summary", "evidence", "content"])
                .unwrap_or_default(),
            result_count: fields.u64(&["resultCount", "result_count"]).unwrap_or(0),
            confidence: fields.f64(&["confidence"]),
            source_provider: fields.string(&["sourceProvider", "source_provider"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecommendationPayload {
    pub recommendation: String,
    pub confidence: Option<f64>,
}

impl RecommendationPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            recommendation: fields
                .string(&["recommendation", "summary"])
                .unwrap_or_default(),
            confidence: fields.f64(&["confidence"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolCallPayload {
    pub tool_id: Option<String>,
    pub tool_name: String,
    pub input: Option<String>,
    pub latency_ms: Option<u64>,
    pub result_count: Option<u64>,
    pub error: Option<String>,
}

impl ToolCallPayload {
    fn decode(fields: Fields<'_>, envelope: &Envelope) -> Self {
        Self {
            tool_id: fields.string(&["toolId", "tool_id", "toolCallId", "tool_call_id"]),
            tool_name: fields
                .string(&["toolName", "tool_name"])
                .or_else(|| envelope.tool_name.clone())
                .unwrap_or_else(|| "tool".to_string()),
            input: fields.string(&["toolInput", "tool_input", "input"]),
            latency_ms: fields
                .u64(&["latencyMs", "latency_ms"])
                .or(envelope.duration_ms),
            result_count: fields.u64(&["resultCount", "result_count"]),
            error: fields.string(&["error"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStartPayload {
    pub source_type: String,
    pub query_summary: Option<String>,
    pub source_provider: Option<String>,
}

impl QueryStartPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            source_type: decode_source_key(fields),
            query_summary: fields.string(&["querySummary", "query_summary"]),
            source_provider: fields.string(&["sourceProvider", "source_provider"]),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryCompletePayload {
    pub source_type: String,
    pub result_count: u64,
    pub latency_ms: u64,
    pub query_summary: Option<String>,
    pub source_provider: Option<String>,
}

impl QueryCompletePayload {
    fn decode(fields: Fields<'_>, envelope: &Envelope) -> Self {
        Self {
            source_type: decode_source_key(fields),
            result_count: fields.u64(&["resultCount", "result_count"]).unwrap_or(0),
            latency_ms: fields
                .u64(&["latencyMs", "latency_ms"])
                .or(envelope.duration_ms)
                .unwrap_or(0),
            query_summary: fields.string(&["querySummary", "query_summary"]),
            source_provider: fields.string(&["sourceProvider", "source_provider"]),
        }
    }
}

fn decode_source_key(fields: Fields<'_>) -> String {
    fields
        .string(&["sourceType", "source_type", "source"])
        .map(|key| normalize_source_key(&key))
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

pub fn normalize_source_key(raw: &str) -> String {
    raw.trim().to_ascii_uppercase().replace(['-', ' '], "_")
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionPayload {
    pub option_id: String,
    pub description: String,
    pub rank: u32,
    pub scores: BTreeMap<String, f64>,
}

impl OptionPayload {
    /// `position` is the zero-based index inside a batch and seeds both the
    /// fallback id and the fallback rank.
    pub fn decode(map: &Map<String, Value>, position: usize) -> Self {
        let fields = Fields::new(map);
        let option_id = fields
            .string(&["optionId", "option_id", "id"])
            .unwrap_or_else(|| format!("opt-{}", position + 1));
        Self {
            description: fields
                .string(&["description", "summary"])
                .unwrap_or_else(|| option_id.clone()),
            rank: fields
                .u64(&["rank"])
                .map(|rank| rank.min(u32::MAX as u64) as u32)
                .unwrap_or(position as u32 + 1),
            scores: decode_scores(fields.object(&["scores"])),
            option_id,
        }
    }
}

fn decode_scores(map: Option<&Map<String, Value>>) -> BTreeMap<String, f64> {
    let Some(map) = map else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(key, value)| crate::value::as_f64(value).map(|score| (key.clone(), score)))
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringPayload {
    pub options: Vec<OptionPayload>,
}

impl ScoringPayload {
    fn decode(fields: Fields<'_>) -> Self {
        let score_table = fields.object(&["scores"]);
        let options = fields
            .objects(&["options"])
            .into_iter()
            .enumerate()
            .map(|(position, map)| {
                let mut option = OptionPayload::decode(map, position);
                if option.scores.is_empty() {
                    let row = score_table
                        .and_then(|table| table.get(&option.option_id))
                        .and_then(Value::as_object);
                    option.scores = decode_scores(row);
                }
                option
            })
            .collect();
        Self { options }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub time: String,
    pub action: String,
    #[serde(default)]
    pub agent: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorPlanPayload {
    pub selected_option_id: Option<String>,
    pub summary: Option<String>,
    pub timeline: Vec<TimelineEntry>,
    pub options: Vec<OptionPayload>,
}

impl CoordinatorPlanPayload {
    fn decode(fields: Fields<'_>) -> Self {
        let timeline = match fields.value(&["timeline"]) {
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .filter_map(|(idx, item)| decode_timeline_entry(item, idx))
                .collect(),
            _ => Vec::new(),
        };
        Self {
            selected_option_id: fields.string(&["selectedOptionId", "selected_option_id"]),
            summary: fields.string(&["summary"]),
            timeline,
            options: fields
                .objects(&["options"])
                .into_iter()
                .enumerate()
                .map(|(position, map)| OptionPayload::decode(map, position))
                .collect(),
        }
    }
}

fn decode_timeline_entry(item: &Value, idx: usize) -> Option<TimelineEntry> {
    match item {
        Value::Object(map) => {
            let fields = Fields::new(map);
            Some(TimelineEntry {
                time: fields
                    .string(&["time"])
                    .unwrap_or_else(|| format!("T+{idx}")),
                action: fields
                    .string(&["action", "summary"])
                    .unwrap_or_else(|| "Action".to_string()),
                agent: fields.string(&["agent"]).unwrap_or_default(),
            })
        }
        Value::String(text) if !text.trim().is_empty() => Some(TimelineEntry {
            time: format!("T+{idx}"),
            action: text.trim().to_string(),
            agent: String::new(),
        }),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoverPayload {
    pub from_agent: Option<String>,
    pub to_agent: Option<String>,
    pub reason: Option<String>,
}

impl HandoverPayload {
    fn decode(fields: Fields<'_>) -> Self {
        Self {
            from_agent: fields.string(&["fromAgent", "from_agent", "from"]),
            to_agent: fields.string(&["toAgent", "to_agent", "to"]),
            reason: fields.string(&["reason"]),
        }
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(kind: &str, payload: Value) -> Envelope {
        let mut envelope = Envelope::new("run-1", EventKind::parse(kind));
        envelope.payload = payload.as_object().cloned().unwrap_or_default();
        envelope
    }

    #[test]
    fn span_ended_defaults_to_success() {
        let decoded = EventPayload::decode(&envelope("span.ended", json!({})));
        match decoded {
            EventPayload::SpanEnded(payload) => assert!(payload.success),
            other => panic!("unexpected payload: {other:?}"),
        }

        let failed = EventPayload::decode(&envelope("span.ended", json!({"success": "false"})));
        assert!(matches!(failed, EventPayload::SpanEnded(SpanEndedPayload { success: false, .. })));
    }

    #[test]
    fn mistyped_fields_fall_back_to_defaults() {
        let decoded = EventPayload::decode(&envelope(
            "data_source.query_complete",
            json!({"sourceType": "sql", "latencyMs": {"bad": true}, "resultCount": "7"}),
        ));
        match decoded {
            EventPayload::QueryComplete(payload) => {
                assert_eq!(payload.source_type, "SQL");
                assert_eq!(payload.latency_ms, 0);
                assert_eq!(payload.result_count, 7);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn scoring_reads_scores_from_side_table() {
        let decoded = EventPayload::decode(&envelope(
            "coordinator.scoring",
            json!({
                "options": [{"optionId": "opt-a", "description": "Swap tails", "rank": 2}],
                "criteria": ["delay_reduction"],
                "scores": {"opt-a": {"delay_reduction": 70}}
            }),
        ));
        match decoded {
            EventPayload::Scoring(payload) => {
                assert_eq!(payload.options.len(), 1);
                assert_eq!(payload.options[0].rank, 2);
                assert_eq!(payload.options[0].scores.get("delay_reduction"), Some(&70.0));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn plan_timeline_accepts_strings_and_objects() {
        let decoded = EventPayload::decode(&envelope(
            "coordinator.plan",
            json!({
                "selectedOptionId": "opt-1",
                "timeline": [{"time": "T+0", "action": "Hold departures"}, "Rebook", 7]
            }),
        ));
        match decoded {
            EventPayload::CoordinatorPlan(payload) => {
                assert_eq!(payload.timeline.len(), 2);
                assert_eq!(payload.timeline[1].time, "T+1");
                assert_eq!(payload.selected_option_id.as_deref(), Some("opt-1"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_decodes_to_unknown() {
        let decoded = EventPayload::decode(&envelope("vendor.custom", json!({"x": 1})));
        assert_eq!(decoded, EventPayload::Unknown);
    }
}
