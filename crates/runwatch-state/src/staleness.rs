use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_STALE_THRESHOLD_SECS: i64 = 20;

/// Watchdog over "no meaningful update" gaps. Heartbeats prove the transport
/// is alive but never reset the meaningful-event clock.
#[derive(Debug, Clone)]
pub struct StalenessMonitor {
    threshold: Duration,
    connected: bool,
    connected_at: Option<DateTime<Utc>>,
    last_meaningful_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    stale: bool,
}

impl StalenessMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            connected: false,
            connected_at: None,
            last_meaningful_at: None,
            last_heartbeat_at: None,
            stale: false,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn record_meaningful(&mut self, at: DateTime<Utc>) {
        self.last_meaningful_at = Some(at);
        self.stale = false;
    }

    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat_at = Some(at);
    }

    pub fn set_connected(&mut self, connected: bool, now: DateTime<Utc>) {
        if connected && !self.connected {
            self.connected_at = Some(now);
        }
        self.connected = connected;
        if !connected {
            self.stale = false;
        }
    }

    /// Re-evaluates the flag against `now` and returns it. Before the first
    /// meaningful event the gap is measured from the moment of connection.
    pub fn evaluate(&mut self, now: DateTime<Utc>) -> bool {
        self.stale = self.connected
            && self
                .last_meaningful_at
                .or(self.connected_at)
                .map(|since| now - since > self.threshold)
                .unwrap_or(false);
        self.stale
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn last_heartbeat_at(&self) -> Option<DateTime<Utc>> {
        self.last_heartbeat_at
    }

    pub fn last_meaningful_at(&self) -> Option<DateTime<Utc>> {
        self.last_meaningful_at
    }

    pub fn reset(&mut self) {
        self.last_meaningful_at = None;
        self.last_heartbeat_at = None;
        self.stale = false;
    }
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_STALE_THRESHOLD_SECS))
    }
}
