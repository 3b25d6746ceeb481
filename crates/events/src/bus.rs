//! Bus contracts: publishing batches and receiving them through a handshake.
//!
//! A bus has two roles:
//!
//! - [`Publisher`]: hand a batch of items to the bus.
//! - [`Receiver`]: attach a background loop that delivers items one at a time.
//!
//! ## Handshake protocol
//!
//! ```text
//! publish(batch) ──item──▶ receive loop ──TransactedAccept──▶ consumer
//!        ▲                      │                               │
//!        └──── ack result ◀─────┴─────────── acknowledge(bool) ◀┘
//! ```
//!
//! Exactly one item is in flight per bus. The loop does not take the next item
//! (nor a close request) before the consumer acknowledged the current one,
//! and `publish` does not move to the next item before that acknowledgment
//! came back. A consumer that never acknowledges stalls the pipeline; there is
//! no acknowledgment timeout.
//!
//! The same contracts serve events ([`VersionedEvent`]) and commands
//! ([`Command`]).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::command::Command;
use crate::error::BusError;
use crate::event::VersionedEvent;
use crate::payload::Payload;
use crate::registry::TypeRegistry;

/// Anything a bus can carry and a dispatcher can route.
pub trait Message: core::fmt::Debug + Send + Sync + 'static {
    /// Stable name of the payload type (`eventType` / `CommandType`).
    fn message_type(&self) -> &str;

    fn payload(&self) -> &dyn Payload;
}

impl Message for VersionedEvent {
    fn message_type(&self) -> &str {
        &self.event_type
    }

    fn payload(&self) -> &dyn Payload {
        self.event.as_ref()
    }
}

impl Message for Command {
    fn message_type(&self) -> &str {
        &self.command_type
    }

    fn payload(&self) -> &dyn Payload {
        self.body.as_ref()
    }
}

/// An item handed to a consumer together with its single-use acknowledgment.
#[derive(Debug)]
pub struct TransactedAccept<M> {
    pub message: M,
    processed: oneshot::Sender<bool>,
}

impl<M> TransactedAccept<M> {
    pub fn new(message: M, processed: oneshot::Sender<bool>) -> Self {
        Self { message, processed }
    }

    /// Signal the outcome back to the bus, releasing the next delivery.
    ///
    /// Consumes the accept: an item is acknowledged at most once. Dropping an
    /// accept without acknowledging counts as a rejection.
    pub fn acknowledge(self, processed_successfully: bool) {
        // The loop only stops waiting by being torn down; nothing to report then.
        let _ = self.processed.send(processed_successfully);
    }

    /// Split into the item and the acknowledgment handle.
    pub fn into_parts(self) -> (M, Acknowledgment) {
        (self.message, Acknowledgment(self.processed))
    }
}

/// Acknowledgment handle detached from its item.
#[derive(Debug)]
pub struct Acknowledgment(oneshot::Sender<bool>);

impl Acknowledgment {
    pub fn acknowledge(self, processed_successfully: bool) {
        let _ = self.0.send(processed_successfully);
    }
}

/// Reply channel of a close request.
pub type CloseResponse = oneshot::Sender<Result<(), BusError>>;

/// Channels a consumer hands to [`Receiver::receive`].
///
/// The receive loop owns the sending halves of `receive`/`errors` and the
/// receiving half of `close`; the consumer keeps the other ends.
pub struct ReceiverOptions<M> {
    /// Shared registry for transports that rebuild payloads from their names.
    pub type_registry: Arc<dyn TypeRegistry>,
    /// Close requests, each carrying the channel to reply on.
    pub close: mpsc::Receiver<CloseResponse>,
    /// Transport errors surfaced by the loop.
    pub errors: mpsc::Sender<BusError>,
    /// Items handed to the consumer.
    pub receive: mpsc::Sender<TransactedAccept<M>>,
    /// Reserved for single-consumer transports.
    pub exclusive: bool,
}

impl<M> core::fmt::Debug for ReceiverOptions<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReceiverOptions")
            .field("exclusive", &self.exclusive)
            .finish_non_exhaustive()
    }
}

/// Consumer-side ends matching a [`ReceiverOptions`].
#[derive(Debug)]
pub struct ReceiverHandles<M> {
    pub close: mpsc::Sender<CloseResponse>,
    pub errors: mpsc::Receiver<BusError>,
    pub receive: mpsc::Receiver<TransactedAccept<M>>,
}

impl<M> ReceiverOptions<M> {
    /// Build a connected options/handles pair.
    pub fn channel(type_registry: Arc<dyn TypeRegistry>, exclusive: bool) -> (Self, ReceiverHandles<M>) {
        let (close_tx, close_rx) = mpsc::channel(1);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let (receive_tx, receive_rx) = mpsc::channel(1);

        let options = Self {
            type_registry,
            close: close_rx,
            errors: errors_tx,
            receive: receive_tx,
            exclusive,
        };
        let handles = ReceiverHandles {
            close: close_tx,
            errors: errors_rx,
            receive: receive_rx,
        };
        (options, handles)
    }
}

/// Publishing side of a bus.
#[async_trait]
pub trait Publisher<M>: Send + Sync {
    /// Deliver `batch` in order; returns once every item was acknowledged.
    async fn publish(&self, batch: Vec<M>) -> Result<(), BusError>;
}

/// Receiving side of a bus.
pub trait Receiver<M>: Send + Sync {
    /// Start the background receive loop. Returns once the loop is attached.
    fn receive(&self, options: ReceiverOptions<M>) -> Result<(), BusError>;
}

/// Publishes events saved to the event store.
pub trait EventPublisher: Publisher<VersionedEvent> {}
impl<T: Publisher<VersionedEvent> + ?Sized> EventPublisher for T {}

/// Receives globally published events.
pub trait EventReceiver: Receiver<VersionedEvent> {}
impl<T: Receiver<VersionedEvent> + ?Sized> EventReceiver for T {}

/// Publishes commands.
pub trait CommandPublisher: Publisher<Command> {}
impl<T: Publisher<Command> + ?Sized> CommandPublisher for T {}

/// Receives published commands.
pub trait CommandReceiver: Receiver<Command> {}
impl<T: Receiver<Command> + ?Sized> CommandReceiver for T {}

#[async_trait]
impl<M, P> Publisher<M> for Arc<P>
where
    M: Send + 'static,
    P: Publisher<M> + ?Sized,
{
    async fn publish(&self, batch: Vec<M>) -> Result<(), BusError> {
        (**self).publish(batch).await
    }
}

impl<M, R> Receiver<M> for Arc<R>
where
    R: Receiver<M> + ?Sized,
{
    fn receive(&self, options: ReceiverOptions<M>) -> Result<(), BusError> {
        (**self).receive(options)
    }
}
