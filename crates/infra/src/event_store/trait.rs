use std::sync::Arc;

use thiserror::Error;

use sourcebus_core::{ExpectedVersion, SourceId};
use sourcebus_events::VersionedEvent;

/// Event store operation error.
///
/// These are **infrastructure errors** (storage, concurrency) as opposed to
/// domain errors (validation, invariants).
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The stream is not at the expected version: another writer got there first.
    #[error("optimistic concurrency check failed (expected {expected}, actual {actual})")]
    Concurrency { expected: ExpectedVersion, actual: u64 },

    /// The batch does not continue the stream (wrong source, gaps, ...).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("event store lock poisoned")]
    LockPoisoned,
}

/// Append-only store of per-aggregate event streams.
///
/// ## Design Principles
///
/// - **No storage assumptions**: works with the in-memory implementation
///   (tests/dev) and durable backends alike
/// - **Optimistic locking**: via [`ExpectedVersion`], no pessimistic locks
/// - **Append-only**: events are never modified or deleted
///
/// ## Append Semantics
///
/// `append()`:
/// - checks the current stream version against `expected`
/// - requires every event to belong to `source_id` and the versions to
///   continue the stream (`current + 1`, `current + 2`, ...)
/// - persists the batch atomically: all events or none
///
/// The version check and the write must be one atomic step: of two appends
/// racing on the same expected version exactly one succeeds.
///
/// ## Read Semantics
///
/// `read_history()` returns the stream ordered by version, or an empty vector
/// for an unknown source.
pub trait EventStore: Send + Sync {
    fn append(
        &self,
        source_id: SourceId,
        expected: ExpectedVersion,
        events: Vec<VersionedEvent>,
    ) -> Result<(), EventStoreError>;

    fn read_history(&self, source_id: SourceId) -> Result<Vec<VersionedEvent>, EventStoreError>;
}

impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    fn append(
        &self,
        source_id: SourceId,
        expected: ExpectedVersion,
        events: Vec<VersionedEvent>,
    ) -> Result<(), EventStoreError> {
        (**self).append(source_id, expected, events)
    }

    fn read_history(&self, source_id: SourceId) -> Result<Vec<VersionedEvent>, EventStoreError> {
        (**self).read_history(source_id)
    }
}
