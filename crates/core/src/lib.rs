//! `sourcebus-core`: event-sourcing foundation building blocks.
//!
//! This crate contains **pure** primitives (no bus, storage or runtime concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::InvalidId;
pub use id::{CorrelationId, EventId, SourceId};
