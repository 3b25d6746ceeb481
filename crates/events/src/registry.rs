//! Type registry: stable type names → payload descriptors.
//!
//! Payloads cross process boundaries as `(type name, JSON)`. The registry is
//! how a transport turns that pair back into a concrete `Arc<dyn Payload>`.
//! It is an explicit object shared by `Arc` (no process-global state) and is
//! append-only: entries are added while handlers are registered and only read
//! afterwards.

use core::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;

use crate::error::RegistryError;
use crate::payload::{Payload, TypedPayload};

type DecodeFn = fn(JsonValue) -> Result<Arc<dyn Payload>, serde_json::Error>;

/// Everything needed to reconstruct a payload type from its name.
#[derive(Clone, Copy)]
pub struct TypeDescriptor {
    name: &'static str,
    type_id: TypeId,
    decode: DecodeFn,
}

impl TypeDescriptor {
    pub fn of<T: TypedPayload>() -> Self {
        fn decode<T: TypedPayload>(value: JsonValue) -> Result<Arc<dyn Payload>, serde_json::Error> {
            let typed: T = serde_json::from_value(value)?;
            Ok(Arc::new(typed))
        }

        Self {
            name: T::TYPE_NAME,
            type_id: TypeId::of::<T>(),
            decode: decode::<T>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn decode(&self, value: JsonValue) -> Result<Arc<dyn Payload>, RegistryError> {
        (self.decode)(value).map_err(|source| RegistryError::Decode {
            type_name: self.name.to_string(),
            source,
        })
    }
}

impl core::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("type_id", &self.type_id)
            .finish()
    }
}

/// Name → type resolution for polymorphic payloads.
pub trait TypeRegistry: Send + Sync {
    /// Register a payload type. Registering the same type twice is a no-op.
    fn register(&self, descriptor: TypeDescriptor) -> Result<(), RegistryError>;

    fn resolve(&self, name: &str) -> Option<TypeDescriptor>;

    /// Decode a JSON payload previously encoded under `name`.
    fn decode(&self, name: &str, value: JsonValue) -> Result<Arc<dyn Payload>, RegistryError> {
        let descriptor = self
            .resolve(name)
            .ok_or_else(|| RegistryError::UnknownType(name.to_string()))?;
        descriptor.decode(value)
    }
}

impl<R> TypeRegistry for Arc<R>
where
    R: TypeRegistry + ?Sized,
{
    fn register(&self, descriptor: TypeDescriptor) -> Result<(), RegistryError> {
        (**self).register(descriptor)
    }

    fn resolve(&self, name: &str) -> Option<TypeDescriptor> {
        (**self).resolve(name)
    }
}

/// `RwLock<HashMap>`-backed registry.
#[derive(Debug, Default)]
pub struct InMemoryTypeRegistry {
    types: RwLock<HashMap<&'static str, TypeDescriptor>>,
}

impl InMemoryTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Typed shorthand for `register(TypeDescriptor::of::<T>())`.
    pub fn register_type<T: TypedPayload>(&self) -> Result<(), RegistryError> {
        self.register(TypeDescriptor::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.types.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TypeRegistry for InMemoryTypeRegistry {
    fn register(&self, descriptor: TypeDescriptor) -> Result<(), RegistryError> {
        let mut types = self.types.write().map_err(|_| RegistryError::Poisoned)?;

        match types.get(descriptor.name) {
            Some(existing) if existing.type_id == descriptor.type_id => Ok(()),
            Some(_) => Err(RegistryError::Conflict {
                name: descriptor.name.to_string(),
            }),
            None => {
                types.insert(descriptor.name, descriptor);
                Ok(())
            }
        }
    }

    fn resolve(&self, name: &str) -> Option<TypeDescriptor> {
        // A poisoned lock still holds a consistent map: entries are only ever inserted.
        let types = self.types.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        types.get(name).copied()
    }
}
