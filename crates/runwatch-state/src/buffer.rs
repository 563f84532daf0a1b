use chrono::{DateTime, Utc};
use runwatch_core::Envelope;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

pub const DEFAULT_BUFFER_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmitReason {
    Fresh,
    Duplicate,
    OutOfOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub accepted: bool,
    pub reason: AdmitReason,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedEvent {
    pub envelope: Envelope,
    pub received_at: DateTime<Utc>,
    pub duplicate: bool,
    pub out_of_order: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub out_of_order: u64,
    pub evicted: u64,
}

/// Bounded, insertion-ordered log of admitted envelopes. Nothing is ever
/// rejected; duplicates and sequence regressions are flagged and counted.
#[derive(Debug)]
pub struct IngestionBuffer {
    capacity: usize,
    entries: VecDeque<BufferedEvent>,
    held_ids: HashMap<String, usize>,
    highest_sequence: HashMap<String, u64>,
    stats: BufferStats,
}

impl IngestionBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            held_ids: HashMap::new(),
            highest_sequence: HashMap::new(),
            stats: BufferStats::default(),
        }
    }

    pub fn admit(&mut self, envelope: Envelope, received_at: DateTime<Utc>) -> Admission {
        let duplicate = self.held_ids.contains_key(&envelope.event_id);
        let out_of_order = self.track_sequence(&envelope);

        if duplicate {
            self.stats.duplicates += 1;
            debug!(
                event = "ingest_duplicate",
                event_id = %envelope.event_id,
                kind = %envelope.kind
            );
        }
        if out_of_order {
            self.stats.out_of_order += 1;
            warn!(
                event = "ingest_out_of_order",
                run_id = %envelope.run_id,
                event_id = %envelope.event_id,
                sequence = envelope.sequence.unwrap_or_default(),
                highest = self.highest_sequence.get(&envelope.run_id).copied().unwrap_or_default()
            );
        }

        *self.held_ids.entry(envelope.event_id.clone()).or_insert(0) += 1;
        self.entries.push_back(BufferedEvent {
            envelope,
            received_at,
            duplicate,
            out_of_order,
        });
        self.stats.admitted += 1;
        while self.entries.len() > self.capacity {
            self.evict_oldest();
        }

        let reason = if duplicate {
            AdmitReason::Duplicate
        } else if out_of_order {
            AdmitReason::OutOfOrder
        } else {
            AdmitReason::Fresh
        };
        Admission {
            accepted: true,
            reason,
        }
    }

    /// Returns true when the envelope's sequence does not advance the run's
    /// high-water mark. Sequence 0 is the upstream's "unset" value and is
    /// ignored.
    fn track_sequence(&mut self, envelope: &Envelope) -> bool {
        let Some(sequence) = envelope.sequence.filter(|seq| *seq > 0) else {
            return false;
        };
        match self.highest_sequence.get_mut(&envelope.run_id) {
            Some(highest) if sequence <= *highest => true,
            Some(highest) => {
                *highest = sequence;
                false
            }
            None => {
                self.highest_sequence
                    .insert(envelope.run_id.clone(), sequence);
                false
            }
        }
    }

    fn evict_oldest(&mut self) {
        let Some(evicted) = self.entries.pop_front() else {
            return;
        };
        if let Some(count) = self.held_ids.get_mut(&evicted.envelope.event_id) {
            *count -= 1;
            if *count == 0 {
                self.held_ids.remove(&evicted.envelope.event_id);
            }
        }
        self.stats.evicted += 1;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.held_ids.clear();
        self.highest_sequence.clear();
        self.stats = BufferStats::default();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedEvent> {
        self.entries.iter()
    }

    pub fn snapshot(&self) -> Vec<BufferedEvent> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for IngestionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}
