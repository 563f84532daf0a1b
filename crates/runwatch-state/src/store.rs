//! `RunStore`: the single owner of buffer, views and staleness flags.
//! Callers feed it envelopes and clock ticks; readers get cloned snapshots
//! plus a broadcast of which view changed.

use crate::buffer::{Admission, BufferStats, BufferedEvent, IngestionBuffer};
use crate::reducer::{ChangeSet, RunViews};
use crate::staleness::StalenessMonitor;
use crate::views::{Agent, DataSourceStat, Handover, RecoveryPlan, RunProgress};
use chrono::{DateTime, Duration, Utc};
use runwatch_core::{Envelope, RosterAgent};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

const NOTIFY_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewChange {
    Reset,
    RunProgress,
    Agents,
    DataSources,
    RecoveryPlan,
    Handovers,
    Events,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub buffer_capacity: usize,
    pub stale_threshold: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: crate::buffer::DEFAULT_BUFFER_CAPACITY,
            stale_threshold: Duration::seconds(crate::staleness::DEFAULT_STALE_THRESHOLD_SECS),
        }
    }
}

/// Full snapshot of every view, as emitted by the JSON output mode.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub run_progress: RunProgress,
    pub agents: Vec<Agent>,
    pub data_sources: Vec<DataSourceStat>,
    pub recovery_plan: RecoveryPlan,
    pub handovers: Vec<Handover>,
    pub buffer: BufferStats,
}

pub struct RunStore {
    buffer: IngestionBuffer,
    views: RunViews,
    monitor: StalenessMonitor,
    changes: broadcast::Sender<ViewChange>,
}

impl RunStore {
    pub fn new(config: StoreConfig) -> Self {
        let (changes, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            buffer: IngestionBuffer::new(config.buffer_capacity),
            views: RunViews::new(),
            monitor: StalenessMonitor::new(config.stale_threshold),
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViewChange> {
        self.changes.subscribe()
    }

    /// Resets everything and seeds the agent registry from a run-start roster.
    pub fn begin_run(&mut self, run_id: &str, roster: &[RosterAgent]) {
        self.buffer.clear();
        self.monitor.reset();
        self.views = RunViews::begin_run(run_id, roster);
        self.sync_monitor_flags();
        self.notify(ViewChange::Reset);
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.monitor.reset();
        self.views = RunViews::new();
        self.sync_monitor_flags();
        self.notify(ViewChange::Reset);
    }

    pub fn ingest(&mut self, envelope: Envelope) -> Admission {
        self.ingest_at(envelope, Utc::now())
    }

    /// Admits the envelope into the buffer, then applies it to the views.
    /// Heartbeats should go through [`RunStore::record_heartbeat`] instead;
    /// one arriving here is logged and only refreshes the heartbeat clock.
    pub fn ingest_at(&mut self, mut envelope: Envelope, received_at: DateTime<Utc>) -> Admission {
        if envelope.timestamp.is_none() {
            envelope.timestamp = Some(received_at);
        }
        if envelope.kind.is_heartbeat() {
            self.record_heartbeat(envelope.timestamp.unwrap_or(received_at));
        }
        let admission = self.buffer.admit(envelope.clone(), received_at);
        self.notify(ViewChange::Events);
        if envelope.kind.is_heartbeat() {
            return admission;
        }

        if !envelope.kind.is_unknown() && self.views.accepts(&envelope) {
            self.monitor.record_meaningful(received_at);
        }
        let changes = self.views.apply(&envelope);
        if changes.reset {
            debug!(event = "store_reset_by_run_start", run_id = %envelope.run_id);
        }
        self.sync_monitor_flags();
        self.publish(changes);
        admission
    }

    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.monitor.record_heartbeat(at);
        self.sync_monitor_flags();
        self.notify(ViewChange::RunProgress);
    }

    pub fn set_connection(&mut self, connected: bool, now: DateTime<Utc>) {
        if connected == self.monitor.is_connected() {
            return;
        }
        self.monitor.set_connected(connected, now);
        self.sync_monitor_flags();
        self.notify(ViewChange::RunProgress);
    }

    /// Staleness poll. Only writes the monitor's own flags.
    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        let was_stale = self.monitor.is_stale();
        let stale = self.monitor.evaluate(now);
        if stale != was_stale {
            debug!(event = "staleness_changed", stale);
            self.sync_monitor_flags();
            self.notify(ViewChange::RunProgress);
        }
        stale
    }

    pub fn run_progress(&self) -> RunProgress {
        self.views.progress().clone()
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.views.agents().to_vec()
    }

    pub fn agent(&self, id: &str) -> Option<Agent> {
        self.views.agent(id).cloned()
    }

    pub fn data_sources(&self) -> Vec<DataSourceStat> {
        self.views.data_sources().to_vec()
    }

    pub fn data_source(&self, key: &str) -> Option<DataSourceStat> {
        self.views.data_source(key).cloned()
    }

    pub fn recovery_plan(&self) -> RecoveryPlan {
        self.views.recovery_plan()
    }

    pub fn handovers(&self) -> Vec<Handover> {
        self.views.handovers().to_vec()
    }

    pub fn events(&self) -> Vec<BufferedEvent> {
        self.buffer.snapshot()
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer.stats()
    }

    pub fn views(&self) -> &RunViews {
        &self.views
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            run_progress: self.run_progress(),
            agents: self.agents(),
            data_sources: self.data_sources(),
            recovery_plan: self.recovery_plan(),
            handovers: self.handovers(),
            buffer: self.buffer_stats(),
        }
    }

    fn sync_monitor_flags(&mut self) {
        let progress = self.views.progress_mut();
        progress.is_live = self.monitor.is_connected();
        progress.is_stale = self.monitor.is_stale();
        progress.last_heartbeat_at = self.monitor.last_heartbeat_at();
    }

    fn publish(&self, changes: ChangeSet) {
        if changes.reset {
            self.notify(ViewChange::Reset);
        }
        if changes.progress {
            self.notify(ViewChange::RunProgress);
        }
        if changes.agents {
            self.notify(ViewChange::Agents);
        }
        if changes.data_sources {
            self.notify(ViewChange::DataSources);
        }
        if changes.recovery {
            self.notify(ViewChange::RecoveryPlan);
        }
        if changes.handovers {
            self.notify(ViewChange::Handovers);
        }
    }

    fn notify(&self, change: ViewChange) {
        // No receivers is fine: presentation layers are optional.
        let _ = self.changes.send(change);
    }
}

impl Default for RunStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
