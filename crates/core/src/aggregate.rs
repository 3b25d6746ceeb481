//! Aggregate root trait and optimistic concurrency expectations.

use crate::id::SourceId;

/// Aggregate root marker + minimal interface.
///
/// Event-sourced aggregates expose their stream identity and the number of
/// events applied so far (pending events included).
pub trait AggregateRoot {
    /// Returns the aggregate's stream identity.
    fn source_id(&self) -> SourceId;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// For event-sourced aggregates this is the version of the last event
    /// applied, whether it was replayed from history or raised locally.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an event stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, imports).
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// Require the stream to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Expectation derived from an aggregate's last committed version.
    pub fn from_committed(version: u64) -> Self {
        if version == 0 {
            ExpectedVersion::NoStream
        } else {
            ExpectedVersion::Exact(version)
        }
    }

    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => actual == 0,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::NoStream => f.write_str("0 (no stream)"),
            ExpectedVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}
