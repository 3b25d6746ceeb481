//! Infrastructure layer: event storage, aggregate persistence, publication log.

pub mod event_store;
pub mod publication_log;
pub mod repository;

#[cfg(test)]
mod integration_tests;

pub use event_store::{EventStore, EventStoreError, InMemoryEventStore};
pub use publication_log::{InMemoryPublicationLog, PublicationLog, PublicationLogError, publication_log_handler};
pub use repository::{EventStreamRepository, RepositoryError, stream_version};
