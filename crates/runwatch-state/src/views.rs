//! Derived view types. Everything here is plain data; the reducer owns every
//! mutation and consumers only ever see clones.

use chrono::{DateTime, Utc};
use runwatch_core::TimelineEntry;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

pub const SPARKLINE_LEN: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" | "created" => Some(RunStatus::Pending),
            "running" | "started" | "in_progress" | "active" => Some(RunStatus::Running),
            "completed" | "complete" | "succeeded" | "success" | "done" => {
                Some(RunStatus::Completed)
            }
            "failed" | "error" | "errored" => Some(RunStatus::Failed),
            "cancelled" | "canceled" | "aborted" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCounts {
    pub total: u32,
    pub activated: u32,
    pub running: u32,
    pub done: u32,
    pub errored: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunProgress {
    pub run_id: Option<String>,
    pub status: RunStatus,
    pub overall_pct: f64,
    pub agents: AgentCounts,
    pub current_step: Option<String>,
    pub last_event_kind: Option<String>,
    pub last_update_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub event_rate_per_min: u32,
    pub is_live: bool,
    pub is_stale: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Activated,
    Excluded,
    Thinking,
    Querying,
    Done,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Activated => "activated",
            AgentStatus::Excluded => "excluded",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Querying => "querying",
            AgentStatus::Done => "done",
            AgentStatus::Error => "error",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, AgentStatus::Thinking | AgentStatus::Querying)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub id: String,
    pub source_type: Option<String>,
    pub summary: String,
    pub result_count: u64,
    pub confidence: Option<f64>,
    pub source_provider: Option<String>,
    pub at: Option<DateTime<Utc>>,
    /// Synthesized from a query completion; the agent's own evidence event
    /// for the same source fills it in instead of appending.
    #[serde(skip)]
    pub awaiting_detail: bool,
    #[serde(skip)]
    pub detail_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Option<String>,
    pub status: ToolCallStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub latency_ms: Option<u64>,
    pub result_count: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub text: String,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub status: AgentStatus,
    pub included: bool,
    pub icon: String,
    pub color: String,
    pub data_sources: Vec<String>,
    pub reason: Option<String>,
    pub objective: Option<String>,
    pub current_step: Option<String>,
    pub last_message: Option<String>,
    pub recommendation: Option<Recommendation>,
    pub evidence: Vec<Evidence>,
    pub tool_calls: Vec<ToolCall>,
    pub trace_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub percent_complete: f64,
}

impl Agent {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            included: true,
            id,
            ..Self::default()
        }
    }

    /// Raises `percent_complete` to at least `floor`.
    pub fn bump_progress(&mut self, floor: f64) {
        if floor > self.percent_complete {
            self.percent_complete = floor.min(100.0);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSourceStat {
    pub key: String,
    pub name: String,
    pub provider: String,
    pub query_count: u64,
    pub total_results: u64,
    pub avg_latency_ms: f64,
    pub is_active: bool,
    pub last_query_summary: Option<String>,
    pub last_agent: Option<String>,
    pub sparkline: VecDeque<u64>,
}

impl DataSourceStat {
    pub fn new(key: impl Into<String>, name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            provider: provider.into(),
            query_count: 0,
            total_results: 0,
            avg_latency_ms: 0.0,
            is_active: false,
            last_query_summary: None,
            last_agent: None,
            sparkline: VecDeque::with_capacity(SPARKLINE_LEN),
        }
    }

    pub fn record_completion(&mut self, latency_ms: u64, result_count: u64) {
        let count = self.query_count as f64;
        self.avg_latency_ms = (self.avg_latency_ms * count + latency_ms as f64) / (count + 1.0);
        self.query_count += 1;
        self.total_results = self.total_results.saturating_add(result_count);
        self.sparkline.push_back(latency_ms);
        while self.sparkline.len() > SPARKLINE_LEN {
            self.sparkline.pop_front();
        }
        self.is_active = false;
    }
}

/// Weighted criteria for `overall_score`. Each entry lists the accepted key
/// spellings, short form first.
const CRITERIA: &[(&[&str], f64)] = &[
    (&["delay", "delay_reduction", "delayReduction"], 0.25),
    (&["crewMargin", "crew_margin"], 0.15),
    (&["safety", "safety_score", "safetyScore"], 0.25),
    (&["cost", "cost_impact", "costImpact"], 0.15),
    (
        &["passengerImpact", "passenger_impact", "passenger"],
        0.20,
    ),
];

pub fn overall_score(scores: &BTreeMap<String, f64>) -> f64 {
    CRITERIA
        .iter()
        .map(|(keys, weight)| {
            keys.iter()
                .find_map(|key| scores.get(*key))
                .copied()
                .unwrap_or(0.0)
                * weight
        })
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryOption {
    pub option_id: String,
    pub description: String,
    pub rank: u32,
    pub scores: BTreeMap<String, f64>,
    pub overall_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub decision_type: String,
    pub reason: String,
    pub confidence: Option<f64>,
    pub at: Option<DateTime<Utc>>,
}

/// Narrative half of the plan. Options live next to it and are joined in at
/// snapshot time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNarrative {
    pub selected_option_id: Option<String>,
    pub summary: Option<String>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryPlan {
    pub selected_option_id: Option<String>,
    pub summary: Option<String>,
    pub timeline: Vec<TimelineEntry>,
    pub options: Vec<RecoveryOption>,
    pub decisions: Vec<DecisionRecord>,
    pub has_plan: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Handover {
    pub from_agent: String,
    pub to_agent: String,
    pub reason: Option<String>,
    pub animated: bool,
    pub at: Option<DateTime<Utc>>,
}
