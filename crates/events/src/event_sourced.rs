//! Event-sourced aggregate base.
//!
//! Aggregates *compose* an [`EventSourced<S>`] helper instead of inheriting
//! behavior. The helper owns:
//!
//! - the stream bookkeeping ([`EventSource`]: id, version, pending events),
//! - the aggregate's state `S`,
//! - a [`Mutations<S>`] table mapping each payload type to the single
//!   procedure that evolves `S` for it.
//!
//! ```ignore
//! pub struct Account {
//!     inner: EventSourced<AccountState>,
//! }
//!
//! impl Account {
//!     pub fn new(id: SourceId) -> Result<Self, EventSourceError> {
//!         let mutations = Mutations::new()
//!             .on(|s: &mut AccountState, e: &AccountCreated| s.email = e.email.clone())
//!             .on(|s: &mut AccountState, e: &PasswordChanged| s.password = e.hash.clone());
//!         Ok(Self { inner: EventSourced::new(id, AccountState::default(), mutations)? })
//!     }
//! }
//! ```

use core::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use sourcebus_core::{AggregateRoot, CorrelationId, SourceId};

use crate::error::EventSourceError;
use crate::event::VersionedEvent;
use crate::payload::{Payload, TypedPayload};

type MutationFn<S> = Box<dyn Fn(&mut S, &dyn Payload) + Send + Sync>;

/// Payload type → state mutation table.
pub struct Mutations<S> {
    table: HashMap<TypeId, (&'static str, MutationFn<S>)>,
    duplicate: Option<&'static str>,
}

impl<S: 'static> Mutations<S> {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            duplicate: None,
        }
    }

    /// Register the mutation procedure for payload type `E`.
    ///
    /// A second registration for the same type is remembered and reported by
    /// [`validate`](Self::validate) (and therefore by `EventSourced::new`).
    pub fn on<E, F>(mut self, mutation: F) -> Self
    where
        E: TypedPayload,
        F: Fn(&mut S, &E) + Send + Sync + 'static,
    {
        let key = TypeId::of::<E>();
        if self.table.contains_key(&key) {
            self.duplicate.get_or_insert(E::TYPE_NAME);
            return self;
        }

        let erased: MutationFn<S> = Box::new(move |state: &mut S, payload: &dyn Payload| {
            if let Some(event) = payload.downcast_ref::<E>() {
                mutation(state, event);
            }
        });
        self.table.insert(key, (E::TYPE_NAME, erased));
        self
    }

    pub fn handles(&self, payload: &dyn Payload) -> bool {
        self.table.contains_key(&payload.payload_type_id())
    }

    pub fn validate(&self) -> Result<(), EventSourceError> {
        match self.duplicate {
            Some(event_type) => Err(EventSourceError::DuplicateMutation {
                event_type: event_type.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn apply(&self, state: &mut S, payload: &dyn Payload) -> Result<(), EventSourceError> {
        let (_, mutation) =
            self.table
                .get(&payload.payload_type_id())
                .ok_or_else(|| EventSourceError::UnhandledEvent {
                    event_type: payload.type_name().to_string(),
                })?;
        mutation(state, payload);
        Ok(())
    }
}

impl<S: 'static> Default for Mutations<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> core::fmt::Debug for Mutations<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<_> = self.table.values().map(|(name, _)| *name).collect();
        f.debug_struct("Mutations").field("handles", &names).finish()
    }
}

/// Stream bookkeeping shared by every event-sourced aggregate.
#[derive(Debug, Clone)]
pub struct EventSource {
    source_id: SourceId,
    version: u64,
    correlation_id: CorrelationId,
    pending: Vec<VersionedEvent>,
}

impl EventSource {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            version: 0,
            correlation_id: CorrelationId::new(),
            pending: Vec::new(),
        }
    }

    pub fn source_id(&self) -> SourceId {
        self.source_id
    }

    /// Version of the last applied event (pending included).
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Version the store is expected to hold (pending excluded).
    pub fn committed_version(&self) -> u64 {
        self.version - self.pending.len() as u64
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    pub fn set_correlation_id(&mut self, correlation_id: CorrelationId) {
        self.correlation_id = correlation_id;
    }

    pub fn pending_events(&self) -> &[VersionedEvent] {
        &self.pending
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Forget pending events after they were persisted.
    ///
    /// The version already accounts for them, so it is left untouched.
    pub fn mark_committed(&mut self) -> Vec<VersionedEvent> {
        std::mem::take(&mut self.pending)
    }
}

/// The narrow view of an aggregate the repository works with.
pub trait EventSourcedAggregate {
    fn event_source(&self) -> &EventSource;

    fn event_source_mut(&mut self) -> &mut EventSource;
}

impl EventSourcedAggregate for EventSource {
    fn event_source(&self) -> &EventSource {
        self
    }

    fn event_source_mut(&mut self) -> &mut EventSource {
        self
    }
}

/// Event-sourcing helper owned by an aggregate.
#[derive(Debug)]
pub struct EventSourced<S> {
    source: EventSource,
    state: S,
    mutations: Arc<Mutations<S>>,
}

impl<S: 'static> EventSourced<S> {
    /// Fresh aggregate: version 0, no history.
    pub fn new(
        source_id: SourceId,
        state: S,
        mutations: impl Into<Arc<Mutations<S>>>,
    ) -> Result<Self, EventSourceError> {
        let mutations = mutations.into();
        mutations.validate()?;
        Ok(Self {
            source: EventSource::new(source_id),
            state,
            mutations,
        })
    }

    /// Rebuild an aggregate from its stored history.
    pub fn from_history(
        source_id: SourceId,
        state: S,
        mutations: impl Into<Arc<Mutations<S>>>,
        history: &[VersionedEvent],
    ) -> Result<Self, EventSourceError> {
        let mut aggregate = Self::new(source_id, state, mutations)?;
        aggregate.replay_from_history(history)?;
        Ok(aggregate)
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn source(&self) -> &EventSource {
        &self.source
    }

    pub fn set_correlation_id(&mut self, correlation_id: CorrelationId) {
        self.source.set_correlation_id(correlation_id);
    }

    /// Raise a new event: apply it to the state and queue it as pending.
    pub fn update<E: TypedPayload>(&mut self, event: E) -> Result<&VersionedEvent, EventSourceError> {
        let correlation_id = self.source.correlation_id;
        self.update_correlated(correlation_id, event)
    }

    pub fn update_correlated<E: TypedPayload>(
        &mut self,
        correlation_id: CorrelationId,
        event: E,
    ) -> Result<&VersionedEvent, EventSourceError> {
        self.update_payload(correlation_id, Arc::new(event))
    }

    /// Untyped variant of [`update`](Self::update).
    ///
    /// Nothing changes when no mutation is registered for the payload.
    pub fn update_payload(
        &mut self,
        correlation_id: CorrelationId,
        event: Arc<dyn Payload>,
    ) -> Result<&VersionedEvent, EventSourceError> {
        self.mutations.apply(&mut self.state, event.as_ref())?;

        self.source.version += 1;
        let versioned =
            VersionedEvent::from_payload(self.source.source_id, self.source.version, correlation_id, event);
        self.source.pending.push(versioned);

        let last = self.source.pending.len() - 1;
        Ok(&self.source.pending[last])
    }

    /// Apply stored events without queuing them as pending.
    ///
    /// `history` must be ordered by version and continue the current version.
    pub fn replay_from_history(&mut self, history: &[VersionedEvent]) -> Result<(), EventSourceError> {
        for event in history {
            if event.source_id != self.source.source_id {
                return Err(EventSourceError::SourceMismatch {
                    expected: self.source.source_id,
                    found: event.source_id,
                });
            }
            let expected = self.source.version + 1;
            if event.version != expected {
                return Err(EventSourceError::OutOfSequence {
                    expected,
                    found: event.version,
                });
            }

            self.mutations.apply(&mut self.state, event.payload())?;
            self.source.version = event.version;
        }
        Ok(())
    }
}

impl<S> AggregateRoot for EventSourced<S> {
    fn source_id(&self) -> SourceId {
        self.source.source_id
    }

    fn version(&self) -> u64 {
        self.source.version
    }
}

impl<S> EventSourcedAggregate for EventSourced<S> {
    fn event_source(&self) -> &EventSource {
        &self.source
    }

    fn event_source_mut(&mut self) -> &mut EventSource {
        &mut self.source
    }
}
