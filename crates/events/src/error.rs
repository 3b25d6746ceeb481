//! Errors raised by the bus, the dispatcher and the aggregate base.

use thiserror::Error;

use sourcebus_core::SourceId;

/// Transport-level failure (publish, receive, close).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed; no further publish or receive is possible.
    #[error("bus is closed")]
    Closed,

    /// A receive loop is already attached to an exclusive bus.
    #[error("bus already has an active receiver")]
    AlreadyReceiving,

    /// The receiver acknowledged an item as not processed.
    #[error("receiver rejected {message_type} (batch position {position})")]
    Rejected { message_type: String, position: usize },

    /// The receiving side went away mid-handshake.
    #[error("receiver dropped before acknowledging")]
    ReceiverGone,

    /// Any failure of the underlying transport (broker, network, ...).
    #[error("transport failure: {0}")]
    Transport(String),
}

impl BusError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

/// A handler failed while processing a dispatched item.
#[derive(Debug, Error)]
#[error("handler for {type_name} failed: {source}")]
pub struct DispatchError {
    pub type_name: String,
    #[source]
    pub source: anyhow::Error,
}

/// Why a `listen` loop ended with an error.
#[derive(Debug, Error)]
pub enum ListenError {
    /// The receive loop could not be attached.
    #[error("failed to start receiving: {0}")]
    Receive(#[source] BusError),

    /// The transport reported an error while the loop was running.
    #[error("transport error while listening: {0}")]
    Transport(#[source] BusError),

    /// The graceful close handshake failed.
    #[error("close handshake failed: {0}")]
    Close(#[source] BusError),
}

/// Misuse of the event-sourced aggregate base.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventSourceError {
    /// No mutation procedure is registered for a payload type.
    #[error("aggregate has no mutation registered for event type {event_type}")]
    UnhandledEvent { event_type: String },

    /// Two mutation procedures were registered for one payload type.
    #[error("mutation for event type {event_type} registered twice")]
    DuplicateMutation { event_type: String },

    /// A history event belongs to another stream.
    #[error("event for stream {found} replayed into aggregate {expected}")]
    SourceMismatch { expected: SourceId, found: SourceId },

    /// A history event does not continue the aggregate's version sequence.
    #[error("out-of-sequence event: expected version {expected}, found {found}")]
    OutOfSequence { expected: u64, found: u64 },
}

/// Type registry lookups and payload (de)serialization.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("type name {name} is already registered for a different type")]
    Conflict { name: String },

    #[error("unknown payload type {0}")]
    UnknownType(String),

    #[error("failed to decode {type_name}: {source}")]
    Decode {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {type_name}: {source}")]
    Encode {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("registry lock poisoned")]
    Poisoned,
}
