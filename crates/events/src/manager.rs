//! Dispatch manager: drives a receive loop and fans items out to handlers.
//!
//! ## Lifecycle
//!
//! ```text
//! stopped ──listen()──▶ running ──stop / transport error──▶ draining ──▶ stopped
//! ```
//!
//! Handlers are registered with `&mut self` before listening; `listen` only
//! needs `&self`, so the handler tables cannot change while items are being
//! dispatched.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::bus::{Message, Receiver, ReceiverHandles, ReceiverOptions, TransactedAccept};
use crate::command::Command;
use crate::dispatcher::{Dispatcher, HandlerFuture, MapBasedDispatcher};
use crate::error::{BusError, ListenError, RegistryError};
use crate::event::VersionedEvent;
use crate::payload::TypedPayload;
use crate::registry::{TypeDescriptor, TypeRegistry};

/// Manager routing [`VersionedEvent`]s.
pub type EventDispatchManager<R> = DispatchManager<VersionedEvent, R>;

/// Manager routing [`Command`]s.
pub type CommandDispatchManager<R> = DispatchManager<Command, R>;

/// Dispatch manager configuration.
#[derive(Debug, Clone)]
pub struct DispatchManagerConfig {
    /// Name for logging
    pub name: String,
    /// Acknowledge items whose dispatch failed as processed
    pub ack_failures: bool,
}

impl Default for DispatchManagerConfig {
    fn default() -> Self {
        Self {
            name: "dispatch-manager".to_string(),
            ack_failures: true,
        }
    }
}

impl DispatchManagerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// When `false`, a failed dispatch is acknowledged negatively and the
    /// publisher sees [`BusError::Rejected`].
    pub fn with_ack_failures(mut self, ack_failures: bool) -> Self {
        self.ack_failures = ack_failures;
        self
    }
}

/// Listens on a bus and dispatches every received item.
///
/// Dispatch failures are logged and never retried. By default the item is
/// still acknowledged as processed (see [`DispatchManagerConfig::ack_failures`]).
pub struct DispatchManager<M, R> {
    receiver: R,
    type_registry: Arc<dyn TypeRegistry>,
    dispatcher: MapBasedDispatcher<M>,
    config: DispatchManagerConfig,
}

impl<M, R> DispatchManager<M, R>
where
    M: Message,
    R: Receiver<M>,
{
    pub fn new(receiver: R, type_registry: Arc<dyn TypeRegistry>) -> Self {
        Self {
            receiver,
            type_registry,
            dispatcher: MapBasedDispatcher::new(),
            config: DispatchManagerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DispatchManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &DispatchManagerConfig {
        &self.config
    }

    pub fn type_registry(&self) -> &Arc<dyn TypeRegistry> {
        &self.type_registry
    }

    /// Register a handler for payload type `P` and make `P` resolvable by name.
    pub fn register_handler<P, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        P: TypedPayload,
        F: for<'a> Fn(&'a M) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.type_registry.register(TypeDescriptor::of::<P>())?;
        self.dispatcher.register_handler::<P, F>(handler);
        debug!(manager = %self.config.name, payload_type = P::TYPE_NAME, "handler registered");
        Ok(())
    }

    /// Register a handler invoked for every item, after the type handlers.
    pub fn register_global_handler<F>(&mut self, handler: F)
    where
        F: for<'a> Fn(&'a M) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.dispatcher.register_global_handler(handler);
    }

    /// Receive and dispatch items until `stop` resolves or the transport fails.
    ///
    /// On stop, a close request is sent to the bus. Items still arriving while
    /// the close is pending are dispatched and acknowledged; the result is the
    /// outcome of the close (`Ok(())` on a clean close).
    pub async fn listen<F>(&self, stop: F, exclusive: bool) -> Result<(), ListenError>
    where
        F: Future<Output = ()>,
    {
        let (options, mut handles) = ReceiverOptions::channel(Arc::clone(&self.type_registry), exclusive);
        self.receiver.receive(options).map_err(ListenError::Receive)?;

        info!(manager = %self.config.name, exclusive, "dispatch manager listening");

        tokio::pin!(stop);
        loop {
            tokio::select! {
                biased;

                Some(err) = handles.errors.recv() => {
                    error!(manager = %self.config.name, error = %err, "transport error, stopping");
                    return Err(ListenError::Transport(err));
                }

                _ = &mut stop => break,

                accept = handles.receive.recv() => match accept {
                    Some(accept) => self.handle(accept).await,
                    None => {
                        // The loop may hand off its error and drop the accept channel
                        // before the error was read; wait for the error channel to settle.
                        let err = handles.errors.recv().await.unwrap_or(BusError::Closed);
                        warn!(manager = %self.config.name, error = %err, "receive loop ended");
                        return Err(ListenError::Transport(err));
                    }
                },
            }
        }

        info!(manager = %self.config.name, "dispatch manager stopping");
        let result = self.drain(&mut handles).await;
        match &result {
            Ok(()) => info!(manager = %self.config.name, "dispatch manager stopped"),
            Err(err) => error!(manager = %self.config.name, error = %err, "dispatch manager stopped with error"),
        }
        result
    }

    async fn drain(&self, handles: &mut ReceiverHandles<M>) -> Result<(), ListenError> {
        let (reply_tx, mut reply_rx) = oneshot::channel();
        handles
            .close
            .send(reply_tx)
            .await
            .map_err(|_| ListenError::Close(BusError::Closed))?;

        loop {
            tokio::select! {
                biased;

                reply = &mut reply_rx => {
                    return match reply {
                        Ok(result) => result.map_err(ListenError::Close),
                        Err(_) => Err(ListenError::Close(BusError::Closed)),
                    };
                }

                Some(accept) = handles.receive.recv() => self.handle(accept).await,
            }
        }
    }

    async fn handle(&self, accept: TransactedAccept<M>) {
        let (message, ack) = accept.into_parts();
        let message_type = message.message_type();

        debug!(manager = %self.config.name, message_type, "dispatching");

        let processed = match self.dispatcher.dispatch(&message).await {
            Ok(()) => {
                debug!(manager = %self.config.name, message_type, "dispatched");
                true
            }
            Err(err) => {
                error!(
                    manager = %self.config.name,
                    message_type,
                    error = %err,
                    "dispatch failed"
                );
                self.config.ack_failures
            }
        };

        ack.acknowledge(processed);
    }
}

impl<R: Receiver<VersionedEvent>> DispatchManager<VersionedEvent, R> {
    pub fn register_event_handler<E, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        E: TypedPayload,
        F: for<'a> Fn(&'a VersionedEvent) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.register_handler::<E, F>(handler)
    }
}

impl<R: Receiver<Command>> DispatchManager<Command, R> {
    pub fn register_command_handler<C, F>(&mut self, handler: F) -> Result<(), RegistryError>
    where
        C: TypedPayload,
        F: for<'a> Fn(&'a Command) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.register_handler::<C, F>(handler)
    }
}

impl<M, R> core::fmt::Debug for DispatchManager<M, R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DispatchManager")
            .field("config", &self.config)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
