use crate::value::{self, Fields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum EventLevel {
    #[default]
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }
}

impl FromStr for EventLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "info" | "debug" | "" => Ok(EventLevel::Info),
            "warn" | "warning" => Ok(EventLevel::Warn),
            "error" | "fatal" | "critical" => Ok(EventLevel::Error),
            other => Err(format!("Unknown level: {other}")),
        }
    }
}

impl Serialize for EventLevel {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventLevel {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(value::as_string(&raw)
            .and_then(|text| text.parse().ok())
            .unwrap_or_default())
    }
}

/// Open enumeration of upstream event kinds. Underscore and dotted spellings
/// of the same kind collapse to one variant; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    RunStarted,
    RunCompleted,
    RunFailed,
    StageStarted,
    StageCompleted,
    StageFailed,
    AgentStarted,
    AgentCompleted,
    AgentObjective,
    AgentProgress,
    AgentStatus,
    AgentEvidence,
    AgentReasoning,
    AgentStreaming,
    AgentActivated,
    AgentExcluded,
    AgentRecommendation,
    ToolCalled,
    ToolCompleted,
    ToolFailed,
    ExecutorInvoked,
    ExecutorCompleted,
    OrchestratorPlan,
    OrchestratorDelegated,
    OrchestratorDecision,
    WorkflowStatus,
    SpanStarted,
    SpanEnded,
    DataSourceQueryStart,
    DataSourceQueryComplete,
    CoordinatorScoring,
    CoordinatorPlan,
    RecoveryOption,
    Handover,
    ProgressUpdate,
    Heartbeat,
    Unknown(String),
}

impl Default for EventKind {
    fn default() -> Self {
        EventKind::Unknown(String::new())
    }
}

impl EventKind {
    pub fn parse(input: &str) -> Self {
        let normalized = input.trim();
        match normalized {
            "run_started" | "run.started" => EventKind::RunStarted,
            "run_completed" | "run.completed" => EventKind::RunCompleted,
            "run_failed" | "run.failed" => EventKind::RunFailed,
            "stage_started" | "stage.started" => EventKind::StageStarted,
            "stage_completed" | "stage.completed" => EventKind::StageCompleted,
            "stage_failed" | "stage.failed" => EventKind::StageFailed,
            "agent_started" | "agent.started" => EventKind::AgentStarted,
            "agent_completed" | "agent.completed" => EventKind::AgentCompleted,
            "agent.objective" => EventKind::AgentObjective,
            "agent.progress" => EventKind::AgentProgress,
            "agent.status" => EventKind::AgentStatus,
            "agent.evidence" => EventKind::AgentEvidence,
            "agent.reasoning" => EventKind::AgentReasoning,
            "agent.streaming" => EventKind::AgentStreaming,
            "agent.activated" => EventKind::AgentActivated,
            "agent.excluded" => EventKind::AgentExcluded,
            "agent.recommendation" => EventKind::AgentRecommendation,
            "tool_called" | "tool.called" => EventKind::ToolCalled,
            "tool_completed" | "tool.completed" => EventKind::ToolCompleted,
            "tool_failed" | "tool.failed" => EventKind::ToolFailed,
            "executor.invoked" => EventKind::ExecutorInvoked,
            "executor.completed" => EventKind::ExecutorCompleted,
            "orchestrator.plan" => EventKind::OrchestratorPlan,
            "orchestrator.delegated" => EventKind::OrchestratorDelegated,
            "orchestrator.decision" => EventKind::OrchestratorDecision,
            "workflow.status" => EventKind::WorkflowStatus,
            "span.started" => EventKind::SpanStarted,
            "span.ended" => EventKind::SpanEnded,
            "data_source.query_start" => EventKind::DataSourceQueryStart,
            "data_source.query_complete" => EventKind::DataSourceQueryComplete,
            "coordinator.scoring" => EventKind::CoordinatorScoring,
            "coordinator.plan" => EventKind::CoordinatorPlan,
            "recovery.option" => EventKind::RecoveryOption,
            "handover" => EventKind::Handover,
            "progress_update" | "progress.update" => EventKind::ProgressUpdate,
            "heartbeat" => EventKind::Heartbeat,
            other => EventKind::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::RunStarted => "run_started",
            EventKind::RunCompleted => "run_completed",
            EventKind::RunFailed => "run_failed",
            EventKind::StageStarted => "stage_started",
            EventKind::StageCompleted => "stage_completed",
            EventKind::StageFailed => "stage_failed",
            EventKind::AgentStarted => "agent.started",
            EventKind::AgentCompleted => "agent.completed",
            EventKind::AgentObjective => "agent.objective",
            EventKind::AgentProgress => "agent.progress",
            EventKind::AgentStatus => "agent.status",
            EventKind::AgentEvidence => "agent.evidence",
            EventKind::AgentReasoning => "agent.reasoning",
            EventKind::AgentStreaming => "agent.streaming",
            EventKind::AgentActivated => "agent.activated",
            EventKind::AgentExcluded => "agent.excluded",
            EventKind::AgentRecommendation => "agent.recommendation",
            EventKind::ToolCalled => "tool.called",
            EventKind::ToolCompleted => "tool.completed",
            EventKind::ToolFailed => "tool.failed",
            EventKind::ExecutorInvoked => "executor.invoked",
            EventKind::ExecutorCompleted => "executor.completed",
            EventKind::OrchestratorPlan => "orchestrator.plan",
            EventKind::OrchestratorDelegated => "orchestrator.delegated",
            EventKind::OrchestratorDecision => "orchestrator.decision",
            EventKind::WorkflowStatus => "workflow.status",
            EventKind::SpanStarted => "span.started",
            EventKind::SpanEnded => "span.ended",
            EventKind::DataSourceQueryStart => "data_source.query_start",
            EventKind::DataSourceQueryComplete => "data_source.query_complete",
            EventKind::CoordinatorScoring => "coordinator.scoring",
            EventKind::CoordinatorPlan => "coordinator.plan",
            EventKind::RecoveryOption => "recovery.option",
            EventKind::Handover => "handover",
            EventKind::ProgressUpdate => "progress_update",
            EventKind::Heartbeat => "heartbeat",
            EventKind::Unknown(raw) => raw.as_str(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, EventKind::Heartbeat)
    }

    /// Upstream signals that close the stream cleanly.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::RunCompleted | EventKind::RunFailed)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EventKind::Unknown(_))
    }

    fn is_unspecified(&self) -> bool {
        matches!(self, EventKind::Unknown(raw) if raw.is_empty())
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventKind {
    fn from(input: &str) -> Self {
        EventKind::parse(input)
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        Ok(value::as_string(&raw)
            .map(|text| EventKind::parse(&text))
            .unwrap_or_default())
    }
}

/// One unit of the run event stream. Never mutated once admitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default)]
    pub event_id: String,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
    #[serde(
        rename = "ts",
        alias = "timestamp",
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        deserialize_with = "lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub sequence: Option<u64>,
    #[serde(default)]
    pub level: EventLevel,
    #[serde(default)]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub message: String,
    #[serde(default, deserialize_with = "object_or_empty")]
    pub payload: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub actor: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress_pct: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub duration_ms: Option<u64>,
}

impl Envelope {
    pub fn new(run_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event_id: String::new(),
            run_id: run_id.into(),
            stream_id: None,
            timestamp: None,
            sequence: None,
            level: EventLevel::Info,
            kind,
            stage_id: None,
            stage_name: None,
            agent_name: None,
            executor_name: None,
            tool_name: None,
            message: String::new(),
            payload: Map::new(),
            actor: Value::Null,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            progress_pct: None,
            duration_ms: None,
        }
    }

    /// Fills the fields the upstream may omit: the kind falls back to the
    /// carrying frame's event name and a missing id is derived from the run,
    /// sequence and kind so duplicate bookkeeping still has a key.
    pub fn normalized(mut self, frame_event: Option<&str>) -> Self {
        if self.kind.is_unspecified() {
            if let Some(name) = frame_event.map(str::trim).filter(|name| !name.is_empty()) {
                if name != "message" {
                    self.kind = EventKind::parse(name);
                }
            }
        }
        if self.event_id.trim().is_empty() {
            self.event_id = match (&self.stream_id, self.sequence) {
                (Some(stream_id), _) => format!("{}:{}", self.run_id, stream_id),
                (None, Some(sequence)) => {
                    format!("{}:{}:{}", self.run_id, sequence, self.kind.as_str())
                }
                (None, None) => format!(
                    "{}:{}:{}",
                    self.run_id,
                    self.kind.as_str(),
                    self.timestamp
                        .map(|ts| ts.timestamp_micros())
                        .unwrap_or_default()
                ),
            };
        }
        self
    }

    pub fn fields(&self) -> Fields<'_> {
        Fields::new(&self.payload)
    }

    /// Agent this envelope is attributable to, if any.
    pub fn agent_id(&self) -> Option<String> {
        let fields = self.fields();
        fields
            .string(&["agentId", "agent_id", "executor_id"])
            .or_else(|| non_empty(self.agent_name.as_deref()))
            .or_else(|| fields.string(&["agentName", "agent_name"]))
            .or_else(|| self.actor_agent_id())
    }

    pub fn agent_display_name(&self) -> Option<String> {
        self.fields()
            .string(&["agentName", "agent_name"])
            .or_else(|| non_empty(self.agent_name.as_deref()))
            .or_else(|| {
                self.actor
                    .get("name")
                    .and_then(value::as_string)
                    .filter(|name| !name.trim().is_empty())
            })
    }

    fn actor_agent_id(&self) -> Option<String> {
        let actor = self.actor.as_object()?;
        let is_agent = actor
            .get("kind")
            .and_then(Value::as_str)
            .map(|kind| kind == "agent")
            .unwrap_or(false);
        if !is_agent {
            return None;
        }
        actor
            .get("id")
            .and_then(value::as_string)
            .filter(|id| !id.trim().is_empty())
    }

    pub fn is_meaningful(&self) -> bool {
        !self.kind.is_heartbeat()
    }
}

fn non_empty(input: Option<&str>) -> Option<String> {
    input
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(value::as_timestamp(&raw))
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(value::as_u64(&raw))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(value::as_f64(&raw))
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(value::as_string(&raw).unwrap_or_default())
}

fn object_or_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Object(map) => Ok(map),
        _ => Ok(Map::new()),
    }
}

/// Resume cursor. Redis style `<ms>-<seq>` ids and plain integers compare
/// numerically; anything else compares as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamCursor(String);

impl StreamCursor {
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.trim().to_string()))
        }
    }

    /// Accepts only ids that look like stream positions, so SSE frame ids
    /// that are really event uuids never become a resume cursor.
    pub fn from_frame_id(raw: &str) -> Option<Self> {
        Self::numeric_key(raw.trim())?;
        Self::new(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_after(&self, other: &StreamCursor) -> bool {
        match (Self::numeric_key(&self.0), Self::numeric_key(&other.0)) {
            (Some(mine), Some(theirs)) => mine > theirs,
            _ => self.0 > other.0,
        }
    }

    fn numeric_key(raw: &str) -> Option<(u64, u64)> {
        match raw.split_once('-') {
            Some((ms, seq)) => Some((ms.parse().ok()?, seq.parse().ok()?)),
            None => Some((raw.parse().ok()?, 0)),
        }
    }
}

impl fmt::Display for StreamCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
