//! Snapshot rendering for stdout: summary lines or JSON documents.

use crate::config::OutputFormat;
use crate::connector::ConnectionState;
use runwatch_state::{AgentStatus, RunStore, ViewChange};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq)]
struct AgentMark {
    status: AgentStatus,
    percent: u32,
    evidence: usize,
    tools: usize,
}

pub struct Printer {
    format: OutputFormat,
    agents: HashMap<String, AgentMark>,
    sources: HashMap<String, (u64, bool)>,
    handovers_seen: usize,
}

impl Printer {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            agents: HashMap::new(),
            sources: HashMap::new(),
            handovers_seen: 0,
        }
    }

    pub fn connection(&self, state: &ConnectionState) -> Vec<String> {
        match self.format {
            OutputFormat::Text => vec![format!("[stream] {}", state.label())],
            OutputFormat::Json => vec![serde_json::json!({
                "connection": state.label(),
                "live": state.is_live(),
            })
            .to_string()],
        }
    }

    pub fn render(&mut self, store: &RunStore, changes: &BTreeSet<ViewChange>) -> Vec<String> {
        if changes.is_empty() {
            return Vec::new();
        }
        if changes.contains(&ViewChange::Reset) {
            self.agents.clear();
            self.sources.clear();
            self.handovers_seen = 0;
        }
        match self.format {
            OutputFormat::Json => match serde_json::to_string(&store.snapshot()) {
                Ok(line) => vec![line],
                Err(err) => {
                    tracing::warn!(event = "snapshot_encode_error", error = %err);
                    Vec::new()
                }
            },
            OutputFormat::Text => self.render_text(store, changes),
        }
    }

    fn render_text(&mut self, store: &RunStore, changes: &BTreeSet<ViewChange>) -> Vec<String> {
        let mut lines = Vec::new();
        let reset = changes.contains(&ViewChange::Reset);
        if reset || changes.contains(&ViewChange::RunProgress) {
            lines.push(progress_line(store));
        }
        if reset || changes.contains(&ViewChange::Agents) {
            lines.extend(self.agent_lines(store));
        }
        if reset || changes.contains(&ViewChange::DataSources) {
            lines.extend(self.source_lines(store));
        }
        if changes.contains(&ViewChange::RecoveryPlan) {
            lines.push(plan_line(store));
        }
        if changes.contains(&ViewChange::Handovers) {
            let handovers = store.handovers();
            for handover in handovers.iter().skip(self.handovers_seen) {
                lines.push(format!(
                    "[handover] {} -> {}{}",
                    handover.from_agent,
                    handover.to_agent,
                    handover
                        .reason
                        .as_deref()
                        .map(|reason| format!(" ({reason})"))
                        .unwrap_or_default()
                ));
            }
            self.handovers_seen = handovers.len();
        }
        lines
    }

    fn agent_lines(&mut self, store: &RunStore) -> Vec<String> {
        let mut lines = Vec::new();
        for agent in store.agents() {
            let mark = AgentMark {
                status: agent.status,
                percent: agent.percent_complete.round() as u32,
                evidence: agent.evidence.len(),
                tools: agent.tool_calls.len(),
            };
            if self.agents.get(&agent.id) == Some(&mark) {
                continue;
            }
            lines.push(format!(
                "[agent] {} ({}) {} {}% evidence={} tools={} traces={}",
                agent.id,
                agent.name,
                agent.status.as_str(),
                mark.percent,
                mark.evidence,
                mark.tools,
                agent.trace_count
            ));
            self.agents.insert(agent.id.clone(), mark);
        }
        lines
    }

    fn source_lines(&mut self, store: &RunStore) -> Vec<String> {
        let mut lines = Vec::new();
        for stat in store.data_sources() {
            let mark = (stat.query_count, stat.is_active);
            let known = self.sources.get(&stat.key).copied();
            if known == Some(mark) || (known.is_none() && mark == (0, false)) {
                self.sources.insert(stat.key.clone(), mark);
                continue;
            }
            lines.push(format!(
                "[source] {} [{}] queries={} results={} avg={:.0}ms{}",
                stat.key,
                stat.provider,
                stat.query_count,
                stat.total_results,
                stat.avg_latency_ms,
                if stat.is_active { " active" } else { "" }
            ));
            self.sources.insert(stat.key.clone(), mark);
        }
        lines
    }
}

fn plan_line(store: &RunStore) -> String {
    let plan = store.recovery_plan();
    let top = plan
        .options
        .first()
        .map(|option| format!(" top={} score={:.1}", option.option_id, option.overall_score))
        .unwrap_or_default();
    format!(
        "[plan] selected={} options={} decisions={}{}",
        plan.selected_option_id.as_deref().unwrap_or("-"),
        plan.options.len(),
        plan.decisions.len(),
        top
    )
}

fn progress_line(store: &RunStore) -> String {
    let progress = store.run_progress();
    let mut flags = Vec::new();
    if progress.is_live {
        flags.push("live");
    }
    if progress.is_stale {
        flags.push("stale");
    }
    format!(
        "[run] {} {} {:.0}% agents={}/{} running={} done={} errored={} rate={}/min step={}{}",
        progress.run_id.as_deref().unwrap_or("-"),
        progress.status.as_str(),
        progress.overall_pct,
        progress.agents.activated,
        progress.agents.total,
        progress.agents.running,
        progress.agents.done,
        progress.agents.errored,
        progress.event_rate_per_min,
        progress.current_step.as_deref().unwrap_or("-"),
        if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(","))
        }
    )
}
