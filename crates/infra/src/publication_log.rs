//! Log of every event ever published, used to rebuild read models.

use std::sync::{Arc, RwLock};

use thiserror::Error;

use sourcebus_core::CorrelationId;
use sourcebus_events::{EventRecord, HandlerFuture, RegistryError, TypeRegistry, VersionedEvent, handler, sort_by_created};

#[derive(Debug, Error)]
pub enum PublicationLogError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("publication log lock poisoned")]
    LockPoisoned,
}

/// Append-only record of published integration events.
pub trait PublicationLog: Send + Sync {
    fn save(&self, event: &VersionedEvent) -> Result<(), PublicationLogError>;

    /// Every logged event, oldest first.
    fn all(&self) -> Result<Vec<VersionedEvent>, PublicationLogError>;

    /// Logged events sharing a correlation id, oldest first.
    fn by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Vec<VersionedEvent>, PublicationLogError>;
}

impl<L> PublicationLog for Arc<L>
where
    L: PublicationLog + ?Sized,
{
    fn save(&self, event: &VersionedEvent) -> Result<(), PublicationLogError> {
        (**self).save(event)
    }

    fn all(&self) -> Result<Vec<VersionedEvent>, PublicationLogError> {
        (**self).all()
    }

    fn by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Vec<VersionedEvent>, PublicationLogError> {
        (**self).by_correlation_id(correlation_id)
    }
}

/// In-memory publication log.
///
/// Stores the wire form ([`EventRecord`]) like a durable log would, and decodes
/// through the registry on read.
pub struct InMemoryPublicationLog {
    records: RwLock<Vec<EventRecord>>,
    type_registry: Arc<dyn TypeRegistry>,
}

impl InMemoryPublicationLog {
    pub fn new(type_registry: Arc<dyn TypeRegistry>) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            type_registry,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decode_where(
        &self,
        keep: impl Fn(&EventRecord) -> bool,
    ) -> Result<Vec<VersionedEvent>, PublicationLogError> {
        let records = self.records.read().map_err(|_| PublicationLogError::LockPoisoned)?;

        let mut events = records
            .iter()
            .filter(|r| keep(r))
            .map(|r| r.clone().decode(&*self.type_registry))
            .collect::<Result<Vec<_>, _>>()?;

        sort_by_created(&mut events);
        Ok(events)
    }
}

impl core::fmt::Debug for InMemoryPublicationLog {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryPublicationLog")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl PublicationLog for InMemoryPublicationLog {
    fn save(&self, event: &VersionedEvent) -> Result<(), PublicationLogError> {
        let record = EventRecord::encode(event)?;
        let mut records = self.records.write().map_err(|_| PublicationLogError::LockPoisoned)?;
        records.push(record);
        Ok(())
    }

    fn all(&self) -> Result<Vec<VersionedEvent>, PublicationLogError> {
        self.decode_where(|_| true)
    }

    fn by_correlation_id(&self, correlation_id: CorrelationId) -> Result<Vec<VersionedEvent>, PublicationLogError> {
        self.decode_where(|r| r.correlation_id == correlation_id)
    }
}

/// Global event handler appending every dispatched event to `log`.
pub fn publication_log_handler<L>(
    log: Arc<L>,
) -> impl for<'a> Fn(&'a VersionedEvent) -> HandlerFuture<'a> + Send + Sync + 'static
where
    L: PublicationLog + ?Sized + 'static,
{
    handler::<VersionedEvent, _>(move |event| {
        let saved = log.save(event).map_err(anyhow::Error::from);
        Box::pin(std::future::ready(saved))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use sourcebus_core::SourceId;
    use sourcebus_events::{InMemoryTypeRegistry, TypedPayload};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Shipped {
        order: u32,
    }

    impl TypedPayload for Shipped {
        const TYPE_NAME: &'static str = "test.shipped";
    }

    fn registry() -> Arc<dyn TypeRegistry> {
        let registry = InMemoryTypeRegistry::new();
        registry.register_type::<Shipped>().unwrap();
        Arc::new(registry)
    }

    fn shipped(correlation_id: CorrelationId, order: u32) -> VersionedEvent {
        VersionedEvent::new(SourceId::new(), 1, correlation_id, Shipped { order })
    }

    #[test]
    fn all_returns_events_by_creation_time() {
        let log = InMemoryPublicationLog::new(registry());
        let first = shipped(CorrelationId::new(), 1);
        let mut second = shipped(CorrelationId::new(), 2);
        second.created = first.created - chrono::Duration::seconds(5);

        log.save(&first).unwrap();
        log.save(&second).unwrap();

        let orders: Vec<u32> = log
            .all()
            .unwrap()
            .iter()
            .map(|e| e.downcast_ref::<Shipped>().unwrap().order)
            .collect();
        assert_eq!(orders, vec![2, 1]);
    }

    #[test]
    fn filters_by_correlation_id() {
        let log = InMemoryPublicationLog::new(registry());
        let correlation = CorrelationId::new();
        log.save(&shipped(correlation, 1)).unwrap();
        log.save(&shipped(CorrelationId::new(), 2)).unwrap();
        log.save(&shipped(correlation, 3)).unwrap();

        let related = log.by_correlation_id(correlation).unwrap();
        assert_eq!(related.len(), 2);
        assert!(related.iter().all(|e| e.correlation_id == correlation));
    }

    #[test]
    fn unregistered_types_fail_on_read() {
        let log = InMemoryPublicationLog::new(Arc::new(InMemoryTypeRegistry::new()));
        log.save(&shipped(CorrelationId::new(), 1)).unwrap();

        assert!(matches!(
            log.all(),
            Err(PublicationLogError::Registry(RegistryError::UnknownType(_)))
        ));
    }

    #[tokio::test]
    async fn handler_saves_each_event() {
        let log = Arc::new(InMemoryPublicationLog::new(registry()));
        let save = publication_log_handler(log.clone());

        save(&shipped(CorrelationId::new(), 1)).await.unwrap();
        save(&shipped(CorrelationId::new(), 2)).await.unwrap();

        assert_eq!(log.len(), 2);
    }
}
