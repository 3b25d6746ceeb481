use std::collections::HashMap;
use std::sync::RwLock;

use sourcebus_core::{ExpectedVersion, SourceId};
use sourcebus_events::VersionedEvent;

use super::r#trait::{EventStore, EventStoreError};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<SourceId, Vec<VersionedEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version of a stream (0 when it does not exist).
    pub fn stream_version(&self, source_id: SourceId) -> Result<u64, EventStoreError> {
        let streams = self.streams.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(streams
            .get(&source_id)
            .map(|s| Self::current_version(s))
            .unwrap_or(0))
    }

    /// Number of streams holding at least one event.
    pub fn stream_count(&self) -> usize {
        self.streams.read().map(|s| s.len()).unwrap_or(0)
    }

    fn current_version(stream: &[VersionedEvent]) -> u64 {
        stream.last().map(|e| e.version).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        source_id: SourceId,
        expected: ExpectedVersion,
        events: Vec<VersionedEvent>,
    ) -> Result<(), EventStoreError> {
        if events.is_empty() {
            return Ok(());
        }

        for (idx, e) in events.iter().enumerate() {
            if e.source_id != source_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event for stream {} in batch for {source_id} (index {idx})",
                    e.source_id
                )));
            }
        }

        // Check and write under one lock.
        let mut streams = self.streams.write().map_err(|_| EventStoreError::LockPoisoned)?;

        let current = streams
            .get(&source_id)
            .map(|s| Self::current_version(s))
            .unwrap_or(0);

        if !expected.matches(current) {
            return Err(EventStoreError::Concurrency {
                expected,
                actual: current,
            });
        }

        for (offset, e) in events.iter().enumerate() {
            let want = current + 1 + offset as u64;
            if e.version != want {
                return Err(EventStoreError::InvalidAppend(format!(
                    "expected version {want}, got {} (index {offset})",
                    e.version
                )));
            }
        }

        streams.entry(source_id).or_default().extend(events);
        Ok(())
    }

    fn read_history(&self, source_id: SourceId) -> Result<Vec<VersionedEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| EventStoreError::LockPoisoned)?;
        Ok(streams.get(&source_id).cloned().unwrap_or_default())
    }
}
