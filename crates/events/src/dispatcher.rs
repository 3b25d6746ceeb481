//! Routing of received items to registered handlers.

use core::any::TypeId;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::bus::Message;
use crate::error::DispatchError;
use crate::payload::TypedPayload;

/// Future returned by a handler; may borrow the item it handles.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Handler function type.
///
/// Handlers are async so they can load, update and save aggregates; an `Err`
/// is reported back through the dispatcher.
pub type Handler<M> = Box<dyn for<'a> Fn(&'a M) -> HandlerFuture<'a> + Send + Sync>;

/// Pins down the handler signature for closures built outside a registration
/// call.
///
/// ```ignore
/// let log_it = handler(|event: &VersionedEvent| Box::pin(async move {
///     tracing::info!(event_type = %event.event_type, "seen");
///     Ok(())
/// }));
/// ```
pub fn handler<M, F>(f: F) -> F
where
    F: for<'a> Fn(&'a M) -> HandlerFuture<'a> + Send + Sync + 'static,
{
    f
}

/// Routes one item to its handlers.
#[async_trait]
pub trait Dispatcher<M: Sync>: Send + Sync {
    async fn dispatch(&self, message: &M) -> Result<(), DispatchError>;
}

/// Dispatcher keyed by the payload's runtime type.
///
/// For each item:
///
/// 1. the handlers registered for the payload type run in registration order;
///    the first error is returned immediately and nothing else runs
/// 2. the global handlers run in registration order; the first error aborts
///    the rest
///
/// A payload type without handlers is not an error: only the global handlers
/// run.
pub struct MapBasedDispatcher<M> {
    registry: HashMap<TypeId, Vec<Handler<M>>>,
    global: Vec<Handler<M>>,
}

impl<M: Message> MapBasedDispatcher<M> {
    pub fn new() -> Self {
        Self {
            registry: HashMap::new(),
            global: Vec::new(),
        }
    }

    /// Register a handler for payload type `P`.
    pub fn register_handler<P, F>(&mut self, handler: F)
    where
        P: TypedPayload,
        F: for<'a> Fn(&'a M) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.registry
            .entry(TypeId::of::<P>())
            .or_default()
            .push(Box::new(handler));
    }

    /// Register a handler invoked for every item.
    pub fn register_global_handler<F>(&mut self, handler: F)
    where
        F: for<'a> Fn(&'a M) -> HandlerFuture<'a> + Send + Sync + 'static,
    {
        self.global.push(Box::new(handler));
    }

    pub fn handles<P: TypedPayload>(&self) -> bool {
        self.registry.contains_key(&TypeId::of::<P>())
    }

    pub fn handler_count(&self) -> usize {
        self.registry.values().map(Vec::len).sum::<usize>() + self.global.len()
    }
}

impl<M: Message> Default for MapBasedDispatcher<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> core::fmt::Debug for MapBasedDispatcher<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MapBasedDispatcher")
            .field("types", &self.registry.len())
            .field("global", &self.global.len())
            .finish()
    }
}

#[async_trait]
impl<M: Message> Dispatcher<M> for MapBasedDispatcher<M> {
    async fn dispatch(&self, message: &M) -> Result<(), DispatchError> {
        let fail = |source: anyhow::Error| DispatchError {
            type_name: message.message_type().to_string(),
            source,
        };

        let type_handlers = self
            .registry
            .get(&message.payload().payload_type_id())
            .map(Vec::as_slice)
            .unwrap_or_default();

        for handler in type_handlers.iter().chain(&self.global) {
            handler(message).await.map_err(fail)?;
        }

        Ok(())
    }
}
