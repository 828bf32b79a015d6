//! Per-session event stream (spec.md §4.10 "Event Store"): append-only,
//! bounded by count and TTL, replayable from a client's last-seen event id
//! for reconnect/resume. Defined as a trait so an in-memory store and a
//! distributed key-value-backed one are interchangeable behind one
//! interface; only the in-memory backend ships here.

use std::collections::VecDeque;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use sheet_common::config::EventsConfig;
use sheet_errors::ErrorMetadata;

#[derive(Debug, Clone)]
pub struct Event {
    pub stream_id: String,
    pub sequence: u64,
    pub payload: serde_json::Value,
    pub created_at: Instant,
}

impl Event {
    pub fn event_id(&self) -> String {
        format!("{}:{}", self.stream_id, self.sequence)
    }
}

fn parse_event_id(event_id: &str) -> anyhow::Result<(String, u64)> {
    let (stream, sequence) = event_id
        .rsplit_once(':')
        .ok_or_else(|| anyhow::anyhow!(ErrorMetadata::invalid_params(format!("malformed event id {event_id}"))))?;
    let sequence: u64 = sequence
        .parse()
        .map_err(|_| anyhow::anyhow!(ErrorMetadata::invalid_params(format!("malformed event id {event_id}"))))?;
    Ok((stream.to_string(), sequence))
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn append(&self, stream_id: &str, payload: serde_json::Value) -> anyhow::Result<Event>;

    /// Replays every event in the id's stream strictly after its sequence,
    /// in order, through `sink`. An unknown or already-evicted id yields an
    /// empty replay rather than an error; the stream id is still returned
    /// since it's syntactically recoverable from the event id itself.
    async fn replay_events_after(&self, last_event_id: &str, sink: &mut dyn FnMut(&Event)) -> anyhow::Result<String>;
}

/// All events across every stream in one insertion-ordered deque; adequate
/// at the bounded scale spec.md sets (5000 entries, 5 minute TTL) without
/// needing a secondary per-stream index for eviction bookkeeping.
pub struct InMemoryEventStore {
    config: EventsConfig,
    events: Mutex<VecDeque<Event>>,
    next_sequence: Mutex<std::collections::HashMap<String, u64>>,
}

impl InMemoryEventStore {
    pub fn new(config: EventsConfig) -> Self {
        Self { config, events: Mutex::new(VecDeque::new()), next_sequence: Mutex::new(std::collections::HashMap::new()) }
    }

    fn evict_locked(&self, events: &mut VecDeque<Event>) {
        let now = Instant::now();
        while let Some(front) = events.front() {
            let expired = now.duration_since(front.created_at) >= self.config.ttl;
            let over_capacity = events.len() > self.config.max_entries;
            if !expired && !over_capacity {
                break;
            }
            events.pop_front();
            sheet_metrics::session_store::log_event_evicted(if expired { "ttl" } else { "capacity" });
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, stream_id: &str, payload: serde_json::Value) -> anyhow::Result<Event> {
        let sequence = {
            let mut next = self.next_sequence.lock();
            let entry = next.entry(stream_id.to_string()).or_insert(0);
            let sequence = *entry;
            *entry += 1;
            sequence
        };
        let event = Event { stream_id: stream_id.to_string(), sequence, payload, created_at: Instant::now() };

        let mut events = self.events.lock();
        events.push_back(event.clone());
        self.evict_locked(&mut events);
        sheet_metrics::session_store::log_event_appended();
        Ok(event)
    }

    async fn replay_events_after(&self, last_event_id: &str, sink: &mut dyn FnMut(&Event)) -> anyhow::Result<String> {
        let (stream_id, after_sequence) = parse_event_id(last_event_id)?;
        let events = self.events.lock();
        for event in events.iter().filter(|event| event.stream_id == stream_id && event.sequence > after_sequence) {
            sink(event);
        }
        Ok(stream_id)
    }
}
