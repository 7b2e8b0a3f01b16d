use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::broker::message::Message;
use crate::broker::topic::TopicPattern;
use crate::utils::BusError;

/// What one matched route did to a traced message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Action kinds in route order (`emit`, `forward`, `log`, `call`).
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// One processed message: a deep-copied snapshot of the envelope plus
/// the summary of the routes that matched it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Monotonic sequence number within this tracer.
    pub seq: u64,
    /// Unix milliseconds when the entry was recorded.
    pub ts: i64,
    /// The message as the pipeline saw it. The envelope is a restricted
    /// value type, so the clone is a complete, cycle-free snapshot.
    pub message: Message,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteSummary>,
    /// Error code when the pipeline dropped the message instead of
    /// dispatching it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropped: Option<String>,
}

impl TraceEntry {
    /// Whether anything went wrong: the message was dropped or a matched
    /// route reported action errors.
    pub fn has_errors(&self) -> bool {
        self.dropped.is_some() || self.routes.iter().any(|r| !r.errors.is_empty())
    }
}

/// Criteria for querying the trace buffer. Empty criteria match everything.
#[derive(Debug, Clone, Default)]
pub struct TraceFilter {
    /// Topic pattern in subscription syntax (`sensor.*.temp`, `*`).
    pub topic: Option<String>,
    pub message_id: Option<String>,
    /// Keep entries that matched at least one route (`true`) or none
    /// (`false`).
    pub has_routes: Option<bool>,
    /// Keep entries with errors (`true`) or without (`false`).
    pub has_errors: Option<bool>,
    /// Only entries recorded at or after this timestamp.
    pub since_ts: Option<i64>,
    /// Only entries recorded at or before this timestamp.
    pub until_ts: Option<i64>,
    /// Keep only the most recent N matches.
    pub limit: Option<usize>,
}

/// Ring buffer of processed messages.
///
/// Every message the bus picks up leaves one entry here when a tracer
/// is attached, dropped messages included. The buffer holds the most
/// recent `capacity` entries; older ones fall off the front. An
/// optional sampling rate keeps high-volume buses cheap to trace: each
/// message is recorded with probability `sample_rate`.
#[derive(Debug)]
pub struct Tracer {
    capacity: usize,
    sample_rate: f64,
    entries: VecDeque<TraceEntry>,
    seq: u64,
    evicted: u64,
    skipped: u64,
}

impl Tracer {
    /// A tracer that records every message, up to `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self::with_sampling(capacity, 1.0)
    }

    /// A tracer that records each message with probability
    /// `sample_rate`. The rate is clamped to `[0.0, 1.0]`.
    pub fn with_sampling(capacity: usize, sample_rate: f64) -> Self {
        Self {
            capacity,
            sample_rate: sample_rate.clamp(0.0, 1.0),
            entries: VecDeque::with_capacity(capacity),
            seq: 0,
            evicted: 0,
            skipped: 0,
        }
    }

    /// Records one processed message with the outcome of its routing
    /// pass and, for dropped messages, the rejection code.
    pub fn record(&mut self, msg: &Message, routes: Vec<RouteSummary>, dropped: Option<String>) {
        if self.capacity == 0 {
            return;
        }
        if self.sample_rate < 1.0 && rand::random::<f64>() >= self.sample_rate {
            self.skipped += 1;
            return;
        }

        self.seq += 1;
        let entry = TraceEntry {
            seq: self.seq,
            ts: chrono::Utc::now().timestamp_millis(),
            message: msg.clone(),
            routes,
            dropped,
        };
        self.push(entry);
    }

    fn push(&mut self, entry: TraceEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    /// Entries matching the filter, oldest first. With a `limit`, the
    /// most recent matches win but the order stays oldest-first.
    pub fn query(&self, filter: &TraceFilter) -> Vec<TraceEntry> {
        let pattern = match &filter.topic {
            Some(raw) => match TopicPattern::parse(raw) {
                Ok(p) => Some(p),
                // an unparseable filter matches nothing
                Err(_) => return Vec::new(),
            },
            None => None,
        };

        let mut matches: Vec<TraceEntry> = self
            .entries
            .iter()
            .filter(|e| {
                if let Some(id) = &filter.message_id {
                    if &e.message.id != id {
                        return false;
                    }
                }
                if let Some(want) = filter.has_routes {
                    if e.routes.is_empty() == want {
                        return false;
                    }
                }
                if let Some(want) = filter.has_errors {
                    if e.has_errors() != want {
                        return false;
                    }
                }
                if let Some(since) = filter.since_ts {
                    if e.ts < since {
                        return false;
                    }
                }
                if let Some(until) = filter.until_ts {
                    if e.ts > until {
                        return false;
                    }
                }
                if let Some(p) = &pattern {
                    if !p.matches(&e.message.topic) {
                        return false;
                    }
                }
                true
            })
            .cloned()
            .collect();

        if let Some(limit) = filter.limit {
            if matches.len() > limit {
                matches.drain(..matches.len() - limit);
            }
        }
        matches
    }

    /// Serializes the whole buffer to a JSON snapshot.
    pub fn export_json(&self) -> Result<String, BusError> {
        let entries: Vec<&TraceEntry> = self.entries.iter().collect();
        serde_json::to_string(&entries).map_err(|e| BusError::TraceInvalid(e.to_string()))
    }

    /// Replaces the buffer with a JSON snapshot, bypassing sampling. The
    /// sequence counter jumps past the imported entries so fresh
    /// recordings stay monotonic. Returns how many entries were loaded.
    pub fn import_json(&mut self, json: &str) -> Result<usize, BusError> {
        let entries: Vec<TraceEntry> =
            serde_json::from_str(json).map_err(|e| BusError::TraceInvalid(e.to_string()))?;
        let count = entries.len();
        self.entries.clear();
        for entry in entries {
            self.seq = self.seq.max(entry.seq);
            self.push(entry);
        }
        Ok(count)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
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

    /// Entries pushed off the ring since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Messages not recorded because of sampling.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }
}
