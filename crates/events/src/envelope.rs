//! Wire envelopes for events and commands.
//!
//! In process, payloads travel as `Arc<dyn Payload>`. Across a process
//! boundary (broker, log, file) they travel as these serde records: metadata
//! plus the payload as JSON, with the type name used to rebuild the concrete
//! payload through a [`TypeRegistry`].
//!
//! Field names are part of the storage/transport contract and must not change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use sourcebus_core::{CorrelationId, EventId, SourceId};

use crate::command::Command;
use crate::error::RegistryError;
use crate::event::VersionedEvent;
use crate::registry::TypeRegistry;

/// Serialized form of a [`VersionedEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    #[serde(rename = "correlationID")]
    pub correlation_id: CorrelationId,
    #[serde(rename = "sourceID")]
    pub source_id: SourceId,
    pub version: u64,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "time")]
    pub created: DateTime<Utc>,
    pub event: JsonValue,
}

impl EventRecord {
    pub fn encode(event: &VersionedEvent) -> Result<Self, RegistryError> {
        let payload = event.event.to_json().map_err(|source| RegistryError::Encode {
            type_name: event.event_type.clone(),
            source,
        })?;

        Ok(Self {
            id: event.id,
            correlation_id: event.correlation_id,
            source_id: event.source_id,
            version: event.version,
            event_type: event.event_type.clone(),
            created: event.created,
            event: payload,
        })
    }

    /// Rebuild the event, resolving `event_type` through the registry.
    pub fn decode(self, registry: &dyn TypeRegistry) -> Result<VersionedEvent, RegistryError> {
        let payload = registry.decode(&self.event_type, self.event)?;

        Ok(VersionedEvent {
            id: self.id,
            correlation_id: self.correlation_id,
            source_id: self.source_id,
            version: self.version,
            event_type: self.event_type,
            created: self.created,
            event: payload,
        })
    }
}

/// Serialized form of a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(rename = "CommandType")]
    pub command_type: String,
    #[serde(rename = "Created")]
    pub created: DateTime<Utc>,
    #[serde(rename = "Body")]
    pub body: JsonValue,
}

impl CommandRecord {
    pub fn encode(command: &Command) -> Result<Self, RegistryError> {
        let body = command.body.to_json().map_err(|source| RegistryError::Encode {
            type_name: command.command_type.clone(),
            source,
        })?;

        Ok(Self {
            command_type: command.command_type.clone(),
            created: command.created,
            body,
        })
    }

    pub fn decode(self, registry: &dyn TypeRegistry) -> Result<Command, RegistryError> {
        let body = registry.decode(&self.command_type, self.body)?;

        Ok(Command {
            command_type: self.command_type,
            created: self.created,
            body,
        })
    }
}
