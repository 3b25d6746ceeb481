//! Polymorphic event/command payloads.
//!
//! A payload is the domain part of a message: `AccountCreated`,
//! `ChangePassword`, etc. Messages carry payloads as `Arc<dyn Payload>` so a
//! single bus, store or dispatcher can move any payload type around. The
//! concrete type is recovered with [`downcast_ref`](dyn Payload::downcast_ref)
//! in process, or through a [`TypeRegistry`](crate::TypeRegistry) after a
//! payload crossed a process boundary as JSON.

use core::any::{Any, TypeId};
use core::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

/// A typed payload with a stable, transport-safe name.
///
/// `TYPE_NAME` is part of the wire contract (`eventType` / `CommandType`):
/// once events were persisted under a name, the name must not change.
pub trait TypedPayload: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// Object-safe view of a payload.
///
/// Implemented for every [`TypedPayload`]; there is no need to implement it by
/// hand.
pub trait Payload: Any + Debug + Send + Sync {
    /// Stable type name (e.g. `"account.created"`).
    fn type_name(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    /// Encode the payload for transport or storage.
    fn to_json(&self) -> Result<JsonValue, serde_json::Error>;
}

impl<T: TypedPayload> Payload for T {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl dyn Payload {
    /// Runtime type of the concrete payload (the dispatch key).
    pub fn payload_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    pub fn is<T: Payload>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Payload>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}
