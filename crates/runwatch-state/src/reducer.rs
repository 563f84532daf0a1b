//! Event reducer. `RunViews::apply` is total over `Envelope`: every payload
//! shape problem has already degraded to defaults during decoding, so no
//! branch here can fail.

use crate::catalog::{self, DATA_SOURCES};
use crate::views::{
    overall_score, Agent, AgentCounts, AgentStatus, DataSourceStat, DecisionRecord, Evidence,
    Handover, PlanNarrative, Recommendation, RecoveryOption, RecoveryPlan, RunProgress,
    RunStatus, ToolCall, ToolCallStatus,
};
use chrono::{DateTime, Duration, Utc};
use runwatch_core::payload::{
    AgentActivatedPayload, AgentExcludedPayload, AgentNotePayload, CoordinatorPlanPayload,
    EvidencePayload, OptionPayload, OrchestratorPlanPayload, ProgressPayload,
    QueryCompletePayload, QueryStartPayload, SpanEndedPayload, SpanStartedPayload,
    ToolCallPayload,
};
use runwatch_core::{Envelope, EventKind, EventPayload, RosterAgent};
use std::collections::VecDeque;
use tracing::debug;

const QUERY_START_FLOOR: f64 = 20.0;
const EVIDENCE_FLOOR: f64 = 55.0;
const RECOMMENDATION_FLOOR: f64 = 85.0;
const SPAN_START_FLOOR: f64 = 5.0;
const RATE_WINDOW_SECS: i64 = 60;

/// Which views an envelope touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub reset: bool,
    pub progress: bool,
    pub agents: bool,
    pub data_sources: bool,
    pub recovery: bool,
    pub handovers: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        *self == ChangeSet::default()
    }
}

/// Lifecycle inputs for the per-agent state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Activate,
    Exclude,
    Open,
    QueryStart,
    QueryEnd,
    Close { success: bool },
}

fn transition(current: AgentStatus, signal: Signal) -> AgentStatus {
    use AgentStatus::*;
    match (current, signal) {
        (Excluded, _) => Excluded,
        (Idle, Signal::Activate) => Activated,
        (Idle, Signal::Exclude) => Excluded,
        (Idle | Activated, Signal::Open) => Thinking,
        (Idle | Activated | Thinking, Signal::QueryStart) => Querying,
        (Querying, Signal::QueryEnd) => Thinking,
        (Idle | Activated | Thinking | Querying, Signal::Close { success }) => {
            if success {
                Done
            } else {
                Error
            }
        }
        (status, _) => status,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunViews {
    progress: RunProgress,
    agents: Vec<Agent>,
    data_sources: Vec<DataSourceStat>,
    options: Vec<RecoveryOption>,
    plan: Option<PlanNarrative>,
    decisions: Vec<DecisionRecord>,
    handovers: Vec<Handover>,
    recent: VecDeque<DateTime<Utc>>,
}

impl Default for RunViews {
    fn default() -> Self {
        Self::new()
    }
}

impl RunViews {
    pub fn new() -> Self {
        Self {
            progress: RunProgress::default(),
            agents: Vec::new(),
            data_sources: DATA_SOURCES
                .iter()
                .map(|spec| DataSourceStat::new(spec.key, spec.name, spec.provider))
                .collect(),
            options: Vec::new(),
            plan: None,
            decisions: Vec::new(),
            handovers: Vec::new(),
            recent: VecDeque::new(),
        }
    }

    /// Starts a fresh run, optionally seeded with the roster returned by the
    /// run-start call.
    pub fn begin_run(run_id: impl Into<String>, roster: &[RosterAgent]) -> Self {
        let mut views = Self::new();
        views.progress.run_id = Some(run_id.into());
        views.seed_roster(roster);
        views
    }

    pub fn progress(&self) -> &RunProgress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut RunProgress {
        &mut self.progress
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: &str) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    pub fn data_sources(&self) -> &[DataSourceStat] {
        &self.data_sources
    }

    pub fn data_source(&self, key: &str) -> Option<&DataSourceStat> {
        self.data_sources.iter().find(|stat| stat.key == key)
    }

    pub fn handovers(&self) -> &[Handover] {
        &self.handovers
    }

    /// Joins the plan narrative with the live options set.
    pub fn recovery_plan(&self) -> RecoveryPlan {
        let narrative = self.plan.clone().unwrap_or_default();
        RecoveryPlan {
            selected_option_id: narrative.selected_option_id,
            summary: narrative.summary,
            timeline: narrative.timeline,
            options: self.options.clone(),
            decisions: self.decisions.clone(),
            has_plan: self.plan.is_some(),
        }
    }

    pub fn seed_roster(&mut self, roster: &[RosterAgent]) -> bool {
        let mut changed = false;
        for entry in roster {
            let agent = self.agent_entry(&entry.id);
            if !entry.name.trim().is_empty() {
                agent.name = entry.name.clone();
            }
            if !entry.icon.is_empty() {
                agent.icon = entry.icon.clone();
            }
            if !entry.color.is_empty() {
                agent.color = entry.color.clone();
            }
            if !entry.data_sources.is_empty() {
                agent.data_sources = entry.data_sources.clone();
            }
            if !entry.reason.trim().is_empty() {
                agent.reason = Some(entry.reason.clone());
            }
            agent.included = entry.included;
            if !entry.included {
                agent.status = transition(agent.status, Signal::Exclude);
            }
            changed = true;
        }
        if changed {
            self.refresh_counts();
        }
        changed
    }

    /// False for envelopes of another run, which `apply` ignores. A
    /// `run_started` always belongs: it switches the views to its run.
    pub fn accepts(&self, envelope: &Envelope) -> bool {
        envelope.kind == EventKind::RunStarted
            || self
                .progress
                .run_id
                .as_deref()
                .map_or(true, |current| current == envelope.run_id)
    }

    pub fn apply(&mut self, envelope: &Envelope) -> ChangeSet {
        let mut changes = ChangeSet::default();
        if envelope.kind.is_heartbeat() || envelope.kind.is_unknown() {
            return changes;
        }

        if envelope.kind == EventKind::RunStarted {
            match self.progress.run_id.as_deref() {
                Some(current) if current != envelope.run_id => {
                    debug!(
                        event = "views_reset",
                        previous_run = current,
                        run_id = %envelope.run_id
                    );
                    *self = Self::new();
                    changes.reset = true;
                }
                _ => {}
            }
            if self.progress.run_id.is_none() {
                self.progress.run_id = Some(envelope.run_id.clone());
            }
        } else {
            match self.progress.run_id.as_deref() {
                Some(current) if current != envelope.run_id => {
                    debug!(
                        event = "views_foreign_run",
                        current_run = current,
                        run_id = %envelope.run_id,
                        kind = %envelope.kind
                    );
                    return changes;
                }
                Some(_) => {}
                None => self.progress.run_id = Some(envelope.run_id.clone()),
            }
        }

        let at = envelope.timestamp.or(self.progress.last_update_at);
        self.note_event(envelope, at);
        changes.progress = true;

        let attributed = envelope.agent_id();
        if let Some(agent_id) = attributed.as_deref() {
            let display_name = envelope.agent_display_name();
            let agent = self.agent_entry(agent_id);
            agent.trace_count += 1;
            if agent.name == agent.id {
                if let Some(name) = display_name {
                    agent.name = name;
                }
            }
            changes.agents = true;
        }

        let payload = EventPayload::decode(envelope);
        match payload {
            EventPayload::RunStarted => {
                if !self.progress.status.is_terminal() {
                    self.progress.status = RunStatus::Running;
                }
            }
            EventPayload::RunCompleted => {
                if !self.progress.status.is_terminal() {
                    self.progress.status = RunStatus::Completed;
                    self.progress.overall_pct = 100.0;
                }
            }
            EventPayload::RunFailed(failed) => {
                if !self.progress.status.is_terminal() {
                    self.progress.status = RunStatus::Failed;
                    self.progress.error = failed.error;
                }
            }
            EventPayload::Stage(stage) => {
                if let Some(name) = stage.stage_name.or(stage.stage_id) {
                    self.progress.current_step = Some(name);
                }
            }
            EventPayload::Progress(progress) => {
                changes.agents |= self.apply_progress(progress);
            }
            EventPayload::WorkflowStatus(status) => {
                if let Some(next) = status.status.as_deref().and_then(RunStatus::from_label) {
                    if !self.progress.status.is_terminal() {
                        self.progress.status = next;
                        if next == RunStatus::Completed {
                            self.progress.overall_pct = 100.0;
                        }
                    }
                }
                if let Some(step) = status.current_step {
                    self.progress.current_step = Some(step);
                }
            }
            EventPayload::OrchestratorPlan(plan) => {
                changes.agents |= self.apply_orchestrator_plan(plan);
            }
            EventPayload::Decision(decision) => {
                self.decisions.push(DecisionRecord {
                    decision_type: decision.decision_type,
                    reason: decision.reason,
                    confidence: decision.confidence,
                    at,
                });
                changes.recovery = true;
            }
            EventPayload::AgentActivated(activated) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_activation(id, activated);
                    changes.agents = true;
                }
            }
            EventPayload::AgentExcluded(excluded) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_exclusion(id, excluded);
                    changes.agents = true;
                }
            }
            EventPayload::SpanStarted(span) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_span_started(id, span, at);
                    changes.agents = true;
                }
            }
            EventPayload::SpanEnded(span) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_span_ended(id, span, at);
                    changes.agents = true;
                }
            }
            EventPayload::AgentProgress(progress) => {
                if let Some(id) = attributed.as_deref() {
                    let agent = self.agent_entry(id);
                    if let Some(pct) = progress.percent_complete {
                        agent.bump_progress(pct);
                    }
                    if let Some(step) = progress.current_step {
                        agent.current_step = Some(step);
                    }
                    changes.agents = true;
                }
            }
            EventPayload::AgentNote(note) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_note(id, &envelope.kind, note);
                    changes.agents = true;
                }
            }
            EventPayload::Evidence(evidence) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_evidence(id, &envelope.event_id, evidence, at, false);
                    changes.agents = true;
                }
            }
            EventPayload::Recommendation(recommendation) => {
                if let Some(id) = attributed.as_deref() {
                    let agent = self.agent_entry(id);
                    agent.recommendation = Some(Recommendation {
                        text: recommendation.recommendation,
                        confidence: recommendation.confidence,
                    });
                    agent.bump_progress(RECOMMENDATION_FLOOR);
                    changes.agents = true;
                }
            }
            EventPayload::ToolCall(call) => {
                if let Some(id) = attributed.as_deref() {
                    self.apply_tool_call(id, &envelope.kind, &envelope.event_id, call, at);
                    changes.agents = true;
                }
            }
            EventPayload::QueryStart(query) => {
                self.apply_query_start(attributed.as_deref(), query);
                changes.data_sources = true;
                changes.agents |= attributed.is_some();
            }
            EventPayload::QueryComplete(query) => {
                self.apply_query_complete(attributed.as_deref(), &envelope.event_id, query, at);
                changes.data_sources = true;
                changes.agents |= attributed.is_some();
            }
            EventPayload::Scoring(scoring) => {
                self.options = scoring.options.into_iter().map(scored_option).collect();
                sort_options(&mut self.options);
                changes.recovery = true;
            }
            EventPayload::RecoveryOption(option) => {
                self.upsert_option(option);
                changes.recovery = true;
            }
            EventPayload::CoordinatorPlan(plan) => {
                self.apply_coordinator_plan(plan);
                changes.recovery = true;
            }
            EventPayload::Handover(handover) => {
                if let (Some(from), Some(to)) = (handover.from_agent, handover.to_agent) {
                    self.agent_entry(&from);
                    self.agent_entry(&to);
                    self.handovers.push(Handover {
                        from_agent: from,
                        to_agent: to,
                        reason: handover.reason,
                        animated: true,
                        at,
                    });
                    changes.handovers = true;
                    changes.agents = true;
                }
            }
            EventPayload::Heartbeat | EventPayload::Unknown => {}
        }

        if let Some(pct) = envelope.run_progress_pct().or(envelope.progress_pct) {
            self.merge_run_progress(pct);
        }
        if changes.agents && !matches!(envelope.kind, EventKind::ProgressUpdate) {
            self.refresh_counts();
        }
        changes
    }

    fn note_event(&mut self, envelope: &Envelope, at: Option<DateTime<Utc>>) {
        self.progress.last_event_kind = Some(envelope.kind.as_str().to_string());
        if let Some(at) = at {
            if self
                .progress
                .last_update_at
                .map(|last| at > last)
                .unwrap_or(true)
            {
                self.progress.last_update_at = Some(at);
            }
            self.recent.push_back(at);
            let newest = self.progress.last_update_at.unwrap_or(at);
            let horizon = newest - Duration::seconds(RATE_WINDOW_SECS);
            self.recent.retain(|stamp| *stamp > horizon);
            self.progress.event_rate_per_min = self.recent.len() as u32;
        }
        if self.progress.status == RunStatus::Pending && !envelope.kind.is_terminal() {
            self.progress.status = RunStatus::Running;
        }
    }

    /// Monotonic floor: lower values never replace higher ones, and terminal
    /// runs are frozen.
    fn merge_run_progress(&mut self, pct: f64) {
        if self.progress.status.is_terminal() {
            return;
        }
        if pct > self.progress.overall_pct {
            self.progress.overall_pct = pct.min(100.0);
        }
    }

    fn apply_progress(&mut self, progress: ProgressPayload) -> bool {
        if let Some(step) = progress.current_step.clone() {
            self.progress.current_step = Some(step);
        }
        if !progress.has_counts() {
            self.refresh_counts();
            return false;
        }
        let derived = self.derived_counts();
        self.progress.agents = AgentCounts {
            total: progress.agents_total.unwrap_or(derived.total),
            activated: progress.agents_activated.unwrap_or(derived.activated),
            running: progress.agents_running.unwrap_or(derived.running),
            done: progress.agents_done.unwrap_or(derived.done),
            errored: progress.agents_errored.unwrap_or(derived.errored),
        };
        false
    }

    fn apply_orchestrator_plan(&mut self, plan: OrchestratorPlanPayload) -> bool {
        let roster = plan
            .selected
            .into_iter()
            .chain(plan.excluded)
            .collect::<Vec<_>>();
        self.seed_roster(&roster)
    }

    fn apply_activation(&mut self, id: &str, activated: AgentActivatedPayload) {
        let agent = self.agent_entry(id);
        if let Some(name) = activated.agent_name {
            agent.name = name;
        }
        if !activated.data_sources.is_empty() {
            agent.data_sources = activated.data_sources;
        }
        if let Some(icon) = activated.icon {
            agent.icon = icon;
        }
        if let Some(color) = activated.color {
            agent.color = color;
        }
        if activated.reason.is_some() {
            agent.reason = activated.reason;
        }
        agent.status = transition(agent.status, Signal::Activate);
    }

    fn apply_exclusion(&mut self, id: &str, excluded: AgentExcludedPayload) {
        let agent = self.agent_entry(id);
        if let Some(name) = excluded.agent_name {
            agent.name = name;
        }
        if excluded.reason.is_some() {
            agent.reason = excluded.reason;
        }
        let next = transition(agent.status, Signal::Exclude);
        if next == AgentStatus::Excluded {
            agent.included = false;
        }
        agent.status = next;
    }

    fn apply_span_started(
        &mut self,
        id: &str,
        span: SpanStartedPayload,
        at: Option<DateTime<Utc>>,
    ) {
        let agent = self.agent_entry(id);
        let next = transition(agent.status, Signal::Open);
        if next != agent.status {
            agent.started_at = agent.started_at.or(at);
            agent.bump_progress(SPAN_START_FLOOR);
        }
        agent.status = next;
        if span.objective.is_some() {
            agent.objective = span.objective;
        }
    }

    fn apply_span_ended(&mut self, id: &str, span: SpanEndedPayload, at: Option<DateTime<Utc>>) {
        let agent = self.agent_entry(id);
        let next = transition(agent.status, Signal::Close {
            success: span.success,
        });
        if next != agent.status {
            agent.ended_at = at;
            if next == AgentStatus::Done {
                agent.bump_progress(100.0);
            }
        }
        agent.status = next;
        if span.result_summary.is_some() {
            agent.last_message = span.result_summary;
        }
    }

    fn apply_note(&mut self, id: &str, kind: &EventKind, note: AgentNotePayload) {
        let agent = self.agent_entry(id);
        match kind {
            EventKind::AgentObjective => {
                agent.objective = note.objective.or(note.text);
            }
            _ => {
                if note.objective.is_some() {
                    agent.objective = note.objective;
                }
                if note.text.is_some() {
                    agent.last_message = note.text;
                }
            }
        }
        if let Some(step) = note.current_step {
            agent.current_step = Some(step);
        }
        if let Some(pct) = note.percent_complete {
            agent.bump_progress(pct);
        }
    }

    fn apply_evidence(
        &mut self,
        id: &str,
        event_id: &str,
        evidence: EvidencePayload,
        at: Option<DateTime<Utc>>,
        from_query: bool,
    ) {
        let agent = self.agent_entry(id);
        let evidence_id = format!("ev-{event_id}");
        let seen = agent.evidence.iter().any(|entry| {
            entry.id == evidence_id || entry.detail_id.as_deref() == Some(evidence_id.as_str())
        });
        if !seen {
            let pending = match (from_query, evidence.source_type.as_deref()) {
                (false, Some(source)) => agent.evidence.iter_mut().rev().find(|entry| {
                    entry.awaiting_detail && entry.source_type.as_deref() == Some(source)
                }),
                _ => None,
            };
            match pending {
                Some(entry) => {
                    if !evidence.summary.is_empty() {
                        entry.summary = evidence.summary;
                    }
                    if evidence.result_count > 0 {
                        entry.result_count = evidence.result_count;
                    }
                    entry.confidence = evidence.confidence.or(entry.confidence);
                    if evidence.source_provider.is_some() {
                        entry.source_provider = evidence.source_provider;
                    }
                    entry.awaiting_detail = false;
                    entry.detail_id = Some(evidence_id);
                }
                None => agent.evidence.push(Evidence {
                    id: evidence_id,
                    source_type: evidence.source_type,
                    summary: evidence.summary,
                    result_count: evidence.result_count,
                    confidence: evidence.confidence,
                    source_provider: evidence.source_provider,
                    at,
                    awaiting_detail: from_query,
                    detail_id: None,
                }),
            }
        }
        agent.bump_progress(EVIDENCE_FLOOR);
    }

    fn apply_tool_call(
        &mut self,
        id: &str,
        kind: &EventKind,
        event_id: &str,
        call: ToolCallPayload,
        at: Option<DateTime<Utc>>,
    ) {
        let agent = self.agent_entry(id);
        if *kind == EventKind::ToolCalled {
            let call_id = call
                .tool_id
                .clone()
                .unwrap_or_else(|| format!("tool-{event_id}"));
            if agent.tool_calls.iter().all(|existing| existing.id != call_id) {
                agent.tool_calls.push(ToolCall {
                    id: call_id,
                    name: call.tool_name,
                    input: call.input,
                    status: ToolCallStatus::Running,
                    started_at: at,
                    ended_at: None,
                    latency_ms: None,
                    result_count: None,
                    error: None,
                });
            }
            agent.status = transition(agent.status, Signal::Open);
            return;
        }

        let status = if *kind == EventKind::ToolFailed {
            ToolCallStatus::Failed
        } else {
            ToolCallStatus::Completed
        };
        let by_id = call.tool_id.as_deref().and_then(|tool_id| {
            agent
                .tool_calls
                .iter()
                .rposition(|existing| existing.id == tool_id)
        });
        let matched = by_id.or_else(|| {
            agent.tool_calls.iter().rposition(|existing| {
                existing.status == ToolCallStatus::Running && existing.name == call.tool_name
            })
        });
        match matched {
            Some(idx) => {
                let existing = &mut agent.tool_calls[idx];
                existing.status = status;
                existing.ended_at = at;
                existing.latency_ms = call.latency_ms.or(existing.latency_ms);
                existing.result_count = call.result_count.or(existing.result_count);
                existing.error = call.error.or(existing.error.take());
            }
            None => agent.tool_calls.push(ToolCall {
                id: call
                    .tool_id
                    .unwrap_or_else(|| format!("tool-{event_id}")),
                name: call.tool_name,
                input: call.input,
                status,
                started_at: None,
                ended_at: at,
                latency_ms: call.latency_ms,
                result_count: call.result_count,
                error: call.error,
            }),
        }
    }

    fn apply_query_start(&mut self, agent_id: Option<&str>, query: QueryStartPayload) {
        let summary = query.query_summary.clone().unwrap_or_else(|| {
            let who = agent_id.unwrap_or("agent");
            format!("{who} querying {}", query.source_type)
        });
        let stat = self.source_entry(&query.source_type);
        stat.is_active = true;
        stat.last_query_summary = Some(summary);
        stat.last_agent = agent_id.map(str::to_string);
        if let Some(provider) = query.source_provider {
            if stat.provider == "Unknown" {
                stat.provider = provider;
            }
        }

        if let Some(id) = agent_id {
            let agent = self.agent_entry(id);
            agent.status = transition(agent.status, Signal::QueryStart);
            agent.bump_progress(QUERY_START_FLOOR);
        }
    }

    fn apply_query_complete(
        &mut self,
        agent_id: Option<&str>,
        event_id: &str,
        query: QueryCompletePayload,
        at: Option<DateTime<Utc>>,
    ) {
        let stat = self.source_entry(&query.source_type);
        stat.record_completion(query.latency_ms, query.result_count);
        let provider = stat.provider.clone();
        if let Some(summary) = query.query_summary.clone() {
            stat.last_query_summary = Some(summary);
        }

        if let Some(id) = agent_id {
            let summary = query.query_summary.unwrap_or_else(|| {
                format!(
                    "{} results from {}",
                    query.result_count, query.source_type
                )
            });
            self.apply_evidence(
                id,
                event_id,
                EvidencePayload {
                    source_type: Some(query.source_type),
                    summary,
                    result_count: query.result_count,
                    confidence: None,
                    source_provider: query.source_provider.or(Some(provider)),
                },
                at,
                true,
            );
            let agent = self.agent_entry(id);
            agent.status = transition(agent.status, Signal::QueryEnd);
        }
    }

    fn upsert_option(&mut self, option: OptionPayload) {
        let scored = scored_option(option);
        match self
            .options
            .iter_mut()
            .find(|existing| existing.option_id == scored.option_id)
        {
            Some(existing) => *existing = scored,
            None => self.options.push(scored),
        }
        sort_options(&mut self.options);
    }

    fn apply_coordinator_plan(&mut self, plan: CoordinatorPlanPayload) {
        if self.options.is_empty() && !plan.options.is_empty() {
            self.options = plan.options.into_iter().map(scored_option).collect();
            sort_options(&mut self.options);
        }
        self.plan = Some(PlanNarrative {
            selected_option_id: plan
                .selected_option_id
                .or_else(|| self.options.first().map(|option| option.option_id.clone())),
            summary: plan.summary,
            timeline: plan.timeline,
        });
    }

    fn agent_entry(&mut self, id: &str) -> &mut Agent {
        let idx = match self.agents.iter().position(|agent| agent.id == id) {
            Some(idx) => idx,
            None => {
                self.agents.push(Agent::new(id));
                self.agents.len() - 1
            }
        };
        &mut self.agents[idx]
    }

    fn source_entry(&mut self, key: &str) -> &mut DataSourceStat {
        let idx = match self.data_sources.iter().position(|stat| stat.key == key) {
            Some(idx) => idx,
            None => {
                let stat = match catalog::lookup(key) {
                    Some(spec) => DataSourceStat::new(spec.key, spec.name, spec.provider),
                    None => DataSourceStat::new(key, key, "Unknown"),
                };
                self.data_sources.push(stat);
                self.data_sources.len() - 1
            }
        };
        &mut self.data_sources[idx]
    }

    fn derived_counts(&self) -> AgentCounts {
        let mut counts = AgentCounts::default();
        for agent in &self.agents {
            if agent.status == AgentStatus::Excluded {
                continue;
            }
            counts.total += 1;
            if agent.status != AgentStatus::Idle {
                counts.activated += 1;
            }
            match agent.status {
                status if status.is_running() => counts.running += 1,
                AgentStatus::Done => counts.done += 1,
                AgentStatus::Error => counts.errored += 1,
                _ => {}
            }
        }
        counts
    }

    fn refresh_counts(&mut self) {
        self.progress.agents = self.derived_counts();
    }
}

fn scored_option(option: OptionPayload) -> RecoveryOption {
    RecoveryOption {
        overall_score: overall_score(&option.scores),
        option_id: option.option_id,
        description: option.description,
        rank: option.rank,
        scores: option.scores,
    }
}

fn sort_options(options: &mut [RecoveryOption]) {
    options.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.option_id.cmp(&b.option_id)));
}

/// Pure form of [`RunViews::apply`].
pub fn reduce(mut views: RunViews, envelope: &Envelope) -> RunViews {
    views.apply(envelope);
    views
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_770_000_000 + secs, 0).single().expect("fixed ts")
    }

    fn event(kind: &str, agent: Option<&str>, payload: Value) -> Envelope {
        let mut envelope = Envelope::new("run-1", EventKind::parse(kind));
        envelope.event_id = format!("{kind}-{}", agent.unwrap_or("-"));
        envelope.timestamp = Some(at(0));
        envelope.payload = payload.as_object().cloned().unwrap_or_default();
        if let Some(agent) = agent {
            envelope
                .payload
                .insert("agentId".to_string(), json!(agent));
        }
        envelope
    }

    #[test]
    fn lifecycle_transitions() {
        assert_eq!(
            transition(AgentStatus::Idle, Signal::Activate),
            AgentStatus::Activated
        );
        assert_eq!(
            transition(AgentStatus::Activated, Signal::Open),
            AgentStatus::Thinking
        );
        assert_eq!(
            transition(AgentStatus::Thinking, Signal::QueryStart),
            AgentStatus::Querying
        );
        assert_eq!(
            transition(AgentStatus::Querying, Signal::QueryEnd),
            AgentStatus::Thinking
        );
        assert_eq!(
            transition(AgentStatus::Querying, Signal::Close { success: false }),
            AgentStatus::Error
        );
        assert_eq!(
            transition(AgentStatus::Excluded, Signal::Open),
            AgentStatus::Excluded
        );
        assert_eq!(
            transition(AgentStatus::Done, Signal::QueryStart),
            AgentStatus::Done
        );
        assert_eq!(
            transition(AgentStatus::Done, Signal::Activate),
            AgentStatus::Done
        );
    }

    #[test]
    fn unknown_kind_mutates_nothing() {
        let mut views = RunViews::begin_run("run-1", &[]);
        let before = views.clone();
        let changes = views.apply(&event("vendor.custom", Some("a"), json!({"x": 1})));
        assert!(changes.is_empty());
        assert_eq!(views, before);
    }

    #[test]
    fn run_progress_is_monotonic_and_frozen_on_failure() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event("progress_update", None, json!({"runProgressPct": 40})));
        views.apply(&event("progress_update", None, json!({"runProgressPct": 25})));
        assert_eq!(views.progress().overall_pct, 40.0);

        views.apply(&event("run_failed", None, json!({"error": "boom"})));
        views.apply(&event("progress_update", None, json!({"runProgressPct": 90})));
        assert_eq!(views.progress().overall_pct, 40.0);
        assert_eq!(views.progress().status, RunStatus::Failed);
        assert_eq!(views.progress().error.as_deref(), Some("boom"));
    }

    #[test]
    fn run_completed_forces_full_progress() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event("run_started", None, json!({})));
        views.apply(&event("run_completed", None, json!({})));
        assert_eq!(views.progress().overall_pct, 100.0);
        assert_eq!(views.progress().status, RunStatus::Completed);
        views.apply(&event("workflow.status", None, json!({"status": "running"})));
        assert_eq!(views.progress().status, RunStatus::Completed);
    }

    #[test]
    fn derived_counts_track_running_agents() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event("agent.activated", Some("a"), json!({})));
        views.apply(&event("agent.activated", Some("b"), json!({})));
        views.apply(&event("agent_started", Some("a"), json!({})));
        views.apply(&event(
            "data_source.query_start",
            Some("b"),
            json!({"sourceType": "SQL"}),
        ));

        let counts = views.progress().agents;
        assert_eq!(counts.total, 2);
        assert_eq!(counts.activated, 2);
        assert_eq!(counts.running, 2);
        assert_eq!(counts.done, 0);
    }

    #[test]
    fn payload_counts_are_authoritative() {
        let roster = vec![RosterAgent {
            id: "a".into(),
            included: true,
            ..RosterAgent::default()
        }];
        let mut views = RunViews::begin_run("run-1", &roster);
        assert_eq!(views.progress().agents.total, 1);
        views.apply(&event(
            "progress_update",
            None,
            json!({"agentsTotal": 6, "agentsDone": 2, "currentStep": "Scoring"}),
        ));
        let counts = views.progress().agents;
        assert_eq!(counts.total, 6);
        assert_eq!(counts.done, 2);
        assert_eq!(counts.running, 0);
        assert_eq!(views.progress().current_step.as_deref(), Some("Scoring"));
    }

    #[test]
    fn tool_completion_matches_latest_running_call_by_name() {
        let mut views = RunViews::begin_run("run-1", &[]);
        let mut first = event("tool.called", Some("a"), json!({"toolName": "search"}));
        first.event_id = "t1".into();
        let mut second = event("tool.called", Some("a"), json!({"toolName": "search"}));
        second.event_id = "t2".into();
        views.apply(&first);
        views.apply(&second);
        views.apply(&event(
            "tool.completed",
            Some("a"),
            json!({"toolName": "search", "latencyMs": 30}),
        ));

        let calls = &views.agent("a").expect("agent").tool_calls;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].status, ToolCallStatus::Running);
        assert_eq!(calls[1].status, ToolCallStatus::Completed);
        assert_eq!(calls[1].latency_ms, Some(30));
    }

    #[test]
    fn tool_completion_prefers_explicit_id() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event(
            "tool.called",
            Some("a"),
            json!({"toolName": "search", "toolId": "call-1"}),
        ));
        let mut later = event("tool.called", Some("a"), json!({"toolName": "search"}));
        later.event_id = "t2".into();
        views.apply(&later);
        views.apply(&event(
            "tool.failed",
            Some("a"),
            json!({"toolName": "search", "toolId": "call-1", "error": "timeout"}),
        ));
        let calls = &views.agent("a").expect("agent").tool_calls;
        assert_eq!(calls[0].status, ToolCallStatus::Failed);
        assert_eq!(calls[0].error.as_deref(), Some("timeout"));
        assert_eq!(calls[1].status, ToolCallStatus::Running);
    }

    #[test]
    fn unmatched_completion_inserts_finished_call() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event("tool.completed", Some("a"), json!({"toolName": "lookup"})));
        let calls = &views.agent("a").expect("agent").tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ToolCallStatus::Completed);
    }

    #[test]
    fn handover_links_agents_without_touching_status() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event("agent.activated", Some("a"), json!({})));
        views.apply(&event(
            "handover",
            None,
            json!({"fromAgent": "a", "toAgent": "b", "reason": "needs crew data"}),
        ));
        assert_eq!(views.handovers().len(), 1);
        assert!(views.handovers()[0].animated);
        assert_eq!(
            views.agent("a").expect("a").status,
            AgentStatus::Activated
        );
        assert_eq!(views.agent("b").expect("b").status, AgentStatus::Idle);
    }

    #[test]
    fn agent_evidence_fills_query_entry_for_same_source() {
        let mut views = RunViews::begin_run("run-1", &[]);
        let mut query = event(
            "data_source.query_complete",
            Some("a"),
            json!({"sourceType": "SQL", "resultCount": 3, "latencyMs": 80}),
        );
        query.event_id = "q1".into();
        views.apply(&query);

        let mut detail = event(
            "agent.evidence",
            Some("a"),
            json!({"sourceType": "sql", "summary": "SQL evidence used by a", "resultCount": 7, "confidence": 0.8}),
        );
        detail.event_id = "d1".into();
        views.apply(&detail);
        views.apply(&detail);

        let agent = views.agent("a").expect("agent");
        assert_eq!(agent.evidence.len(), 1);
        assert_eq!(agent.evidence[0].id, "ev-q1");
        assert_eq!(agent.evidence[0].summary, "SQL evidence used by a");
        assert_eq!(agent.evidence[0].result_count, 7);
        assert_eq!(agent.evidence[0].confidence, Some(0.8));

        let mut other = event(
            "agent.evidence",
            Some("a"),
            json!({"sourceType": "KQL", "summary": "weather feed"}),
        );
        other.event_id = "d2".into();
        views.apply(&other);
        assert_eq!(views.agent("a").expect("agent").evidence.len(), 2);
    }

    #[test]
    fn unknown_source_is_created_lazily() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event(
            "data_source.query_complete",
            Some("a"),
            json!({"sourceType": "blob-store", "latencyMs": 10}),
        ));
        let stat = views.data_source("BLOB_STORE").expect("lazy source");
        assert_eq!(stat.provider, "Unknown");
        assert_eq!(stat.query_count, 1);
    }

    #[test]
    fn new_run_started_resets_views() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event("agent.activated", Some("a"), json!({})));
        let mut next = event("run_started", None, json!({}));
        next.run_id = "run-2".into();
        let changes = views.apply(&next);
        assert!(changes.reset);
        assert!(views.agents().is_empty());
        assert_eq!(views.progress().run_id.as_deref(), Some("run-2"));
        assert_eq!(views.progress().status, RunStatus::Running);
    }

    #[test]
    fn foreign_run_envelopes_are_ignored() {
        let mut views = RunViews::begin_run("run-1", &[]);
        let mut stray = event("agent.activated", Some("a"), json!({}));
        stray.run_id = "run-0".into();
        assert!(views.apply(&stray).is_empty());
        assert!(views.agents().is_empty());
    }

    #[test]
    fn event_rate_counts_last_minute() {
        let mut views = RunViews::begin_run("run-1", &[]);
        for (idx, secs) in [0, 10, 50, 100].into_iter().enumerate() {
            let mut envelope = event("stage_started", None, json!({}));
            envelope.event_id = format!("s{idx}");
            envelope.timestamp = Some(at(secs));
            views.apply(&envelope);
        }
        assert_eq!(views.progress().event_rate_per_min, 2);
        assert_eq!(views.progress().last_update_at, Some(at(100)));
    }

    #[test]
    fn plan_falls_back_to_inline_options() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event(
            "coordinator.plan",
            None,
            json!({
                "summary": "Swap aircraft",
                "options": [
                    {"optionId": "b", "rank": 2, "scores": {"delay": 10}},
                    {"optionId": "a", "rank": 1, "scores": {"delay": 90}}
                ]
            }),
        ));
        let plan = views.recovery_plan();
        assert!(plan.has_plan);
        assert_eq!(plan.options.len(), 2);
        assert_eq!(plan.options[0].option_id, "a");
        assert_eq!(plan.selected_option_id.as_deref(), Some("a"));
    }

    #[test]
    fn decisions_are_logged() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event(
            "orchestrator.decision",
            None,
            json!({"decisionType": "agent_selection", "reason": "crew issue", "confidence": 0.9}),
        ));
        let plan = views.recovery_plan();
        assert!(!plan.has_plan);
        assert_eq!(plan.decisions.len(), 1);
        assert_eq!(plan.decisions[0].decision_type, "agent_selection");
    }

    #[test]
    fn orchestrator_plan_seeds_roster() {
        let mut views = RunViews::begin_run("run-1", &[]);
        views.apply(&event(
            "orchestrator.plan",
            None,
            json!({
                "selectedAgents": [{"id": "crew", "name": "Crew", "dataSources": ["SQL"]}],
                "excludedAgents": [{"id": "cargo", "name": "Cargo", "reason": "no cargo"}]
            }),
        ));
        assert_eq!(views.agent("crew").expect("crew").status, AgentStatus::Idle);
        assert_eq!(
            views.agent("cargo").expect("cargo").status,
            AgentStatus::Excluded
        );
        assert_eq!(views.progress().agents.total, 1);
    }
}
