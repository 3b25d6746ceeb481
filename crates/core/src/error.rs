//! Errors raised by core primitives.

use thiserror::Error;

/// A string could not be parsed into one of the typed identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {reason}")]
pub struct InvalidId {
    /// Name of the identifier type (e.g. `SourceId`).
    pub kind: &'static str,
    pub reason: String,
}
