use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::payload::{Payload, TypedPayload};

/// A request to act, wrapped with transport metadata.
///
/// Commands represent **intent**. They are transient: the core routes them to
/// exactly one command dispatch loop and never persists them.
///
/// ## Command vs Event
///
/// - **Command**: intent to do something (e.g. "change the password")
/// - **Event**: fact that something happened (e.g. "password changed")
#[derive(Debug, Clone)]
pub struct Command {
    pub command_type: String,
    pub created: DateTime<Utc>,
    pub body: Arc<dyn Payload>,
}

impl Command {
    pub fn new<C: TypedPayload>(body: C) -> Self {
        Self::from_payload(Arc::new(body))
    }

    pub fn from_payload(body: Arc<dyn Payload>) -> Self {
        Self {
            command_type: body.type_name().to_string(),
            created: Utc::now(),
            body,
        }
    }

    pub fn payload(&self) -> &dyn Payload {
        self.body.as_ref()
    }

    pub fn downcast_ref<C: TypedPayload>(&self) -> Option<&C> {
        self.body.downcast_ref::<C>()
    }
}
