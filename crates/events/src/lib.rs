//! Events, commands and the machinery that moves them.
//!
//! - payloads, [`VersionedEvent`] and [`Command`] with their wire records
//! - the [`TypeRegistry`] resolving payload type names
//! - the event-sourced aggregate base ([`EventSourced`])
//! - bus contracts and the [`InMemoryBus`]
//! - handler dispatch ([`MapBasedDispatcher`]) and the [`DispatchManager`]
//!   driving a receive loop

pub mod bus;
pub mod command;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod event;
pub mod event_sourced;
pub mod in_memory_bus;
pub mod manager;
pub mod payload;
pub mod registry;

pub use bus::{
    Acknowledgment, CloseResponse, CommandPublisher, CommandReceiver, EventPublisher, EventReceiver, Message,
    Publisher, Receiver, ReceiverHandles, ReceiverOptions, TransactedAccept,
};
pub use command::Command;
pub use dispatcher::{Dispatcher, Handler, HandlerFuture, MapBasedDispatcher, handler};
pub use envelope::{CommandRecord, EventRecord};
pub use error::{BusError, DispatchError, EventSourceError, ListenError, RegistryError};
pub use event::{VersionedEvent, sort_by_created};
pub use event_sourced::{EventSource, EventSourced, EventSourcedAggregate, Mutations};
pub use in_memory_bus::{InMemoryBus, InMemoryBusConfig, InMemoryCommandBus, InMemoryEventBus};
pub use manager::{CommandDispatchManager, DispatchManager, DispatchManagerConfig, EventDispatchManager};
pub use payload::{Payload, TypedPayload};
pub use registry::{InMemoryTypeRegistry, TypeDescriptor, TypeRegistry};
