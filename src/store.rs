//! Append-only event stream storage. The production engine lives outside the
//! core; this module defines the seam plus an in-memory implementation used
//! by tests and single-process runs.

use crate::swap::event::Event;
use crate::swap::SwapId;
use async_trait::async_trait;
use std::collections::HashMap;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Provenance attached to each recorded event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub effective_date: OffsetDateTime,
    pub source: String,
}

/// An event as it sits in a stream, with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event: Event,
    pub meta: EventMeta,
    pub version: u64,
}

impl RecordedEvent {
    /// Sort key for merging events of one swap gathered from several
    /// sources. Replay of a single stream keeps append order.
    pub fn sort_key(&self) -> (u16, OffsetDateTime) {
        (self.event.tag(), self.meta.effective_date)
    }
}

/// Stream name a swap's events are stored under.
pub fn stream_name(swap_id: &SwapId) -> String {
    format!("swap-{swap_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("expected stream version {expected} but found {actual}")]
    VersionConflict { expected: u64, actual: u64 },
    #[error("event store backend failed: {0}")]
    Backend(#[from] anyhow::Error),
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// All events of the swap's stream, in append order.
    async fn read_stream(&self, swap_id: &SwapId) -> Result<Vec<RecordedEvent>, StoreError>;

    /// Append `events` atomically iff the stream still has exactly
    /// `expected_version` events.
    async fn append(
        &self,
        swap_id: &SwapId,
        expected_version: u64,
        events: Vec<(Event, EventMeta)>,
    ) -> Result<Vec<RecordedEvent>, StoreError>;
}

#[derive(Default)]
pub struct InMemoryEventStore {
    streams: Mutex<HashMap<String, Vec<RecordedEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn read_stream(&self, swap_id: &SwapId) -> Result<Vec<RecordedEvent>, StoreError> {
        let streams = self.streams.lock().await;
        Ok(streams.get(&stream_name(swap_id)).cloned().unwrap_or_default())
    }

    async fn append(
        &self,
        swap_id: &SwapId,
        expected_version: u64,
        events: Vec<(Event, EventMeta)>,
    ) -> Result<Vec<RecordedEvent>, StoreError> {
        let mut streams = self.streams.lock().await;
        let stream = streams.entry(stream_name(swap_id)).or_default();

        let actual = stream.len() as u64;
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        let mut appended = Vec::with_capacity(events.len());
        for (offset, (event, meta)) in events.into_iter().enumerate() {
            let recorded = RecordedEvent {
                event,
                meta,
                version: expected_version + offset as u64,
            };
            stream.push(recorded.clone());
            appended.push(recorded);
        }

        Ok(appended)
    }
}
