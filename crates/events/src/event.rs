use std::sync::Arc;

use chrono::{DateTime, Utc};

use sourcebus_core::{CorrelationId, EventId, SourceId};

use crate::payload::{Payload, TypedPayload};

/// One committed (or about to be committed) fact about one aggregate.
///
/// Events are:
/// - **immutable** once persisted (treat them as facts)
/// - **versioned**: `version` is the position in the aggregate's stream,
///   starting at 1, contiguous per `source_id`
/// - **polymorphic**: `event` holds any [`Payload`]; `event_type` is its
///   stable name for cross-boundary resolution
#[derive(Debug, Clone)]
pub struct VersionedEvent {
    pub id: EventId,
    pub correlation_id: CorrelationId,
    pub source_id: SourceId,
    pub version: u64,
    pub event_type: String,
    pub created: DateTime<Utc>,
    pub event: Arc<dyn Payload>,
}

impl VersionedEvent {
    /// Wrap a typed payload, stamping a fresh id and the current time.
    pub fn new<E: TypedPayload>(
        source_id: SourceId,
        version: u64,
        correlation_id: CorrelationId,
        event: E,
    ) -> Self {
        Self::from_payload(source_id, version, correlation_id, Arc::new(event))
    }

    pub fn from_payload(
        source_id: SourceId,
        version: u64,
        correlation_id: CorrelationId,
        event: Arc<dyn Payload>,
    ) -> Self {
        Self {
            id: EventId::new(),
            correlation_id,
            source_id,
            version,
            event_type: event.type_name().to_string(),
            created: Utc::now(),
            event,
        }
    }

    pub fn payload(&self) -> &dyn Payload {
        self.event.as_ref()
    }

    /// Typed access to the payload.
    pub fn downcast_ref<E: TypedPayload>(&self) -> Option<&E> {
        self.event.downcast_ref::<E>()
    }
}

/// Order events by creation time (stable for equal timestamps).
///
/// Useful when merging the streams of several aggregates; a single stream is
/// ordered by `version` instead.
pub fn sort_by_created(events: &mut [VersionedEvent]) {
    events.sort_by_key(|e| e.created);
}
