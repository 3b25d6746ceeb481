//! Event stream repository: persistence of event-sourced aggregates.
//!
//! ## Save Flow
//!
//! ```text
//! aggregate (pending events)
//!   ↓
//! 1. Expected version = version − pending count
//!   ↓
//! 2. Append pending events (atomic version check in the store)
//!   ↓
//! 3. Clear pending on the aggregate
//!   ↓
//! 4. Publish the committed events (when a publisher is configured)
//! ```
//!
//! Publication happens only after a successful append. A publish failure is
//! reported to the caller, but the events stay persisted and the aggregate's
//! pending list stays cleared: delivery is at-least-once at best, retries are
//! up to the caller.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use sourcebus_core::{ExpectedVersion, SourceId};
use sourcebus_events::{BusError, EventPublisher, EventSourceError, EventSourcedAggregate, Publisher, VersionedEvent};

use crate::event_store::{EventStore, EventStoreError};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Another writer advanced the stream; nothing was persisted.
    #[error("concurrency conflict on {source_id} (expected {expected}, actual {actual})")]
    Concurrency {
        source_id: SourceId,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("no events stored for {0}")]
    NotFound(SourceId),

    #[error(transparent)]
    EventSource(#[from] EventSourceError),

    #[error("event store failure: {0}")]
    Store(#[source] EventStoreError),

    /// Events were persisted, but handing them to the publisher failed.
    #[error("events persisted but publication failed: {0}")]
    Publish(#[source] BusError),

    /// The store returned a stream that is not a valid history.
    #[error("corrupt history for {source_id}: {reason}")]
    CorruptHistory { source_id: SourceId, reason: String },
}

/// Loads and saves event-sourced aggregates through an [`EventStore`].
pub struct EventStreamRepository<S> {
    store: S,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl<S> EventStreamRepository<S> {
    pub fn new(store: S) -> Self {
        Self { store, publisher: None }
    }

    /// Publish every saved batch through `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

impl<S> core::fmt::Debug for EventStreamRepository<S>
where
    S: core::fmt::Debug,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventStreamRepository")
            .field("store", &self.store)
            .field("publishing", &self.publisher.is_some())
            .finish()
    }
}

impl<S: EventStore> EventStreamRepository<S> {
    /// Persist the aggregate's pending events.
    ///
    /// Returns the committed events (empty when nothing was pending). On a
    /// concurrency conflict nothing is persisted and the pending events are
    /// kept, so the caller can reload and retry.
    pub async fn save<A>(&self, aggregate: &mut A) -> Result<Vec<VersionedEvent>, RepositoryError>
    where
        A: EventSourcedAggregate + ?Sized,
    {
        let source = aggregate.event_source();
        if !source.has_pending() {
            return Ok(Vec::new());
        }

        let source_id = source.source_id();
        let expected = ExpectedVersion::from_committed(source.committed_version());
        let pending = source.pending_events().to_vec();

        self.store
            .append(source_id, expected, pending)
            .map_err(|err| match err {
                EventStoreError::Concurrency { expected, actual } => RepositoryError::Concurrency {
                    source_id,
                    expected,
                    actual,
                },
                other => RepositoryError::Store(other),
            })?;

        let committed = aggregate.event_source_mut().mark_committed();
        debug!(
            source_id = %source_id,
            expected = %expected,
            count = committed.len(),
            "events appended"
        );

        if let Some(publisher) = &self.publisher {
            publisher.publish(committed.clone()).await.map_err(|err| {
                warn!(source_id = %source_id, error = %err, "publication failed after append");
                RepositoryError::Publish(err)
            })?;
        }

        Ok(committed)
    }

    /// Full ordered history of a stream.
    pub fn get(&self, source_id: SourceId) -> Result<Vec<VersionedEvent>, RepositoryError> {
        let history = self.store.read_history(source_id).map_err(RepositoryError::Store)?;
        if history.is_empty() {
            return Err(RepositoryError::NotFound(source_id));
        }

        validate_loaded_stream(source_id, &history)?;
        Ok(history)
    }

    /// Rebuild an aggregate from its history.
    ///
    /// `rehydrate` receives the stream id and the validated history, typically
    /// an aggregate constructor followed by `replay_from_history`.
    pub fn load<A, F>(&self, source_id: SourceId, rehydrate: F) -> Result<A, RepositoryError>
    where
        F: FnOnce(SourceId, &[VersionedEvent]) -> Result<A, EventSourceError>,
    {
        let history = self.get(source_id)?;
        Ok(rehydrate(source_id, &history)?)
    }
}

/// Current version of a validated stream.
pub fn stream_version(stream: &[VersionedEvent]) -> u64 {
    stream.last().map(|e| e.version).unwrap_or(0)
}

fn validate_loaded_stream(source_id: SourceId, stream: &[VersionedEvent]) -> Result<(), RepositoryError> {
    // A buggy backend must not leak another stream or hand back gaps.
    for (idx, e) in stream.iter().enumerate() {
        if e.source_id != source_id {
            return Err(RepositoryError::CorruptHistory {
                source_id,
                reason: format!("event of stream {} at index {idx}", e.source_id),
            });
        }
        let want = idx as u64 + 1;
        if e.version != want {
            return Err(RepositoryError::CorruptHistory {
                source_id,
                reason: format!("expected version {want} at index {idx}, found {}", e.version),
            });
        }
    }
    Ok(())
}
