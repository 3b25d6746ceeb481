//! Integration tests for the full event-sourced pipeline.
//!
//! Tests: Aggregate → EventStreamRepository → EventBus → DispatchManager → handlers
//!
//! Verifies:
//! - Saved events are persisted with contiguous versions and published in order
//! - Optimistic concurrency conflicts are detected
//! - Replaying a stream rebuilds the same state
//! - The dispatch loop stops cleanly

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use tokio::sync::oneshot;

    use sourcebus_core::{AggregateRoot, CorrelationId, SourceId};
    use sourcebus_events::{
        Command, CommandDispatchManager, EventDispatchManager, EventSource, EventSourceError, EventSourced,
        EventSourcedAggregate, InMemoryBus, InMemoryCommandBus, InMemoryEventBus, InMemoryTypeRegistry, Message,
        Mutations, Publisher, TypeRegistry, TypedPayload, VersionedEvent,
    };

    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::publication_log::{InMemoryPublicationLog, PublicationLog, publication_log_handler};
    use crate::repository::{EventStreamRepository, RepositoryError};

    // ---- Account aggregate -------------------------------------------------

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct AccountCreated {
        first_name: String,
        last_name: String,
        email: String,
        password_hash: String,
    }

    impl TypedPayload for AccountCreated {
        const TYPE_NAME: &'static str = "account.created";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct PasswordChanged {
        password_hash: String,
    }

    impl TypedPayload for PasswordChanged {
        const TYPE_NAME: &'static str = "account.password_changed";
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct ChangePassword {
        account: SourceId,
        password: String,
    }

    impl TypedPayload for ChangePassword {
        const TYPE_NAME: &'static str = "account.change_password";
    }

    #[derive(Debug, Default, Clone, PartialEq)]
    struct AccountState {
        first_name: String,
        last_name: String,
        email: String,
        password_hash: String,
    }

    #[derive(Debug)]
    struct Account {
        inner: EventSourced<AccountState>,
    }

    impl Account {
        fn mutations() -> Mutations<AccountState> {
            Mutations::new()
                .on(|s: &mut AccountState, e: &AccountCreated| {
                    s.first_name = e.first_name.clone();
                    s.last_name = e.last_name.clone();
                    s.email = e.email.clone();
                    s.password_hash = e.password_hash.clone();
                })
                .on(|s: &mut AccountState, e: &PasswordChanged| {
                    s.password_hash = e.password_hash.clone();
                })
        }

        fn empty(id: SourceId) -> Result<Self, EventSourceError> {
            Ok(Self {
                inner: EventSourced::new(id, AccountState::default(), Self::mutations())?,
            })
        }

        fn open(id: SourceId, first: &str, last: &str, email: &str, password: &str) -> Self {
            let mut account = Self::empty(id).unwrap();
            account
                .inner
                .update(AccountCreated {
                    first_name: first.into(),
                    last_name: last.into(),
                    email: email.into(),
                    password_hash: hash(password),
                })
                .unwrap();
            account
        }

        fn from_history(id: SourceId, history: &[VersionedEvent]) -> Result<Self, EventSourceError> {
            let mut account = Self::empty(id)?;
            account.inner.replay_from_history(history)?;
            Ok(account)
        }

        fn change_password(&mut self, password: &str) {
            self.inner
                .update(PasswordChanged {
                    password_hash: hash(password),
                })
                .unwrap();
        }

        fn state(&self) -> &AccountState {
            self.inner.state()
        }
    }

    impl EventSourcedAggregate for Account {
        fn event_source(&self) -> &EventSource {
            self.inner.event_source()
        }

        fn event_source_mut(&mut self) -> &mut EventSource {
            self.inner.event_source_mut()
        }
    }

    fn hash(password: &str) -> String {
        password.chars().rev().collect()
    }

    async fn until_receiving<M: Message>(bus: &InMemoryBus<M>) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !bus.is_receiving() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("receive loop never attached");
    }

    // ---- Repository ----------------------------------------------------------

    #[tokio::test]
    async fn account_lifecycle_and_stale_save() {
        let repo = EventStreamRepository::new(InMemoryEventStore::new());
        let id = SourceId::new();

        let mut account = Account::open(id, "John", "Snow", "john.snow@thewall.eu", "$ecureP@ss");
        account.change_password("n3wP@ss");
        repo.save(&mut account).await.unwrap();

        let history = repo.get(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_type, AccountCreated::TYPE_NAME);
        assert_eq!(history[0].version, 1);
        assert_eq!(history[1].event_type, PasswordChanged::TYPE_NAME);
        assert_eq!(history[1].version, 2);

        // A second instance that never saw the stream believes it is new.
        let mut stale = Account::open(id, "Jon", "Snow", "jon@thewall.eu", "other");
        let err = repo.save(&mut stale).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Concurrency { actual: 2, .. }));

        let history = repo.get(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[0].downcast_ref::<AccountCreated>().unwrap().email,
            "john.snow@thewall.eu"
        );
    }

    #[tokio::test]
    async fn replay_rebuilds_identical_state() {
        let repo = EventStreamRepository::new(InMemoryEventStore::new());
        let id = SourceId::new();

        let mut account = Account::open(id, "Arya", "Stark", "arya@winterfell.north", "needle");
        account.change_password("no one");
        repo.save(&mut account).await.unwrap();

        let loaded = repo.load(id, Account::from_history).unwrap();

        assert_eq!(loaded.state(), account.state());
        assert_eq!(loaded.inner.version(), account.inner.version());
        assert!(!loaded.event_source().has_pending());
    }

    #[tokio::test]
    async fn loaded_aggregate_continues_the_stream() {
        let repo = EventStreamRepository::new(InMemoryEventStore::new());
        let id = SourceId::new();

        let mut account = Account::open(id, "Sam", "Tarly", "sam@citadel.os", "books");
        repo.save(&mut account).await.unwrap();

        let mut loaded = repo.load(id, Account::from_history).unwrap();
        loaded.change_password("more books");
        repo.save(&mut loaded).await.unwrap();

        let versions: Vec<u64> = repo.get(id).unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_saves_on_same_version_yield_one_conflict() {
        let repo = Arc::new(EventStreamRepository::new(InMemoryEventStore::new()));
        let id = SourceId::new();

        let mut seed = Account::open(id, "Ned", "Stark", "ned@winterfell.north", "honor");
        repo.save(&mut seed).await.unwrap();

        // Both writers load version 1 before either saves.
        let mut tasks = Vec::new();
        for password in ["one", "two"] {
            let mut account = repo.load(id, Account::from_history).unwrap();
            account.change_password(password);
            let repo = Arc::clone(&repo);
            tasks.push(tokio::spawn(async move { repo.save(&mut account).await }));
        }

        let mut ok = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => ok += 1,
                Err(RepositoryError::Concurrency { .. }) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!((ok, conflicts), (1, 1));
        let versions: Vec<u64> = repo.get(id).unwrap().iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![1, 2]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            ..ProptestConfig::default()
        })]

        /// Property: after N updates and one save, the stream holds exactly versions 1..=N.
        #[test]
        fn saved_versions_are_contiguous(passwords in prop::collection::vec("[a-z]{1,8}", 0..12)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = Arc::new(InMemoryEventStore::new());
            let repo = EventStreamRepository::new(store.clone());
            let id = SourceId::new();

            let mut account = Account::open(id, "Bran", "Stark", "bran@winterfell.north", "raven");
            for password in &passwords {
                account.change_password(password);
            }
            runtime.block_on(repo.save(&mut account)).unwrap();

            let versions: Vec<u64> = store.read_history(id).unwrap().iter().map(|e| e.version).collect();
            let expected: Vec<u64> = (1..=passwords.len() as u64 + 1).collect();
            prop_assert_eq!(versions, expected);
            prop_assert!(!account.event_source().has_pending());
            prop_assert_eq!(account.inner.version(), passwords.len() as u64 + 1);
        }
    }

    // ---- Bus + dispatch ----------------------------------------------------

    #[tokio::test]
    async fn saved_events_reach_handlers_in_order() {
        let bus = Arc::new(InMemoryEventBus::new());
        let registry: Arc<dyn TypeRegistry> = Arc::new(InMemoryTypeRegistry::new());
        let log = Arc::new(InMemoryPublicationLog::new(registry.clone()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let mut manager = EventDispatchManager::new(bus.clone(), registry.clone());
        let sink = Arc::clone(&seen);
        manager
            .register_event_handler::<AccountCreated, _>(move |event| {
                sink.lock().unwrap().push(format!("created v{}", event.version));
                Box::pin(async { anyhow::Ok(()) })
            })
            .unwrap();
        let sink = Arc::clone(&seen);
        manager
            .register_event_handler::<PasswordChanged, _>(move |event| {
                sink.lock().unwrap().push(format!("password v{}", event.version));
                Box::pin(async { anyhow::Ok(()) })
            })
            .unwrap();
        manager.register_global_handler(publication_log_handler(log.clone()));

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let listener = tokio::spawn(async move {
            manager
                .listen(
                    async {
                        let _ = stop_rx.await;
                    },
                    true,
                )
                .await
        });
        until_receiving(&bus).await;

        let repo = EventStreamRepository::new(InMemoryEventStore::new()).with_publisher(bus.clone());
        let id = SourceId::new();
        let correlation = CorrelationId::new();
        let mut account = Account::open(id, "Tyrion", "Lannister", "tyrion@rock.west", "wine");
        account.inner.set_correlation_id(correlation);
        account.change_password("more wine");
        repo.save(&mut account).await.unwrap();

        // `save` returns only after every event was acknowledged.
        assert_eq!(*seen.lock().unwrap(), ["created v1", "password v2"]);

        let logged = log.by_correlation_id(correlation).unwrap();
        assert_eq!(logged.len(), 1);
        assert_eq!(logged[0].event_type, PasswordChanged::TYPE_NAME);
        assert_eq!(log.all().unwrap().len(), 2);

        stop_tx.send(()).unwrap();
        listener.await.unwrap().unwrap();
        assert!(bus.is_closed());
    }

    #[tokio::test]
    async fn command_handler_changes_password_through_repository() {
        let commands = Arc::new(InMemoryCommandBus::new());
        let events = Arc::new(InMemoryEventBus::new());
        let registry: Arc<dyn TypeRegistry> = Arc::new(InMemoryTypeRegistry::new());
        let log = Arc::new(InMemoryPublicationLog::new(registry.clone()));
        let repo = Arc::new(EventStreamRepository::new(InMemoryEventStore::new()).with_publisher(events.clone()));
        let id = SourceId::new();

        // Events saved before anyone listens are dropped by the idle bus.
        let mut account = Account::open(id, "Sansa", "Stark", "sansa@winterfell.north", "lemoncakes");
        repo.save(&mut account).await.unwrap();

        let mut event_manager = EventDispatchManager::new(events.clone(), registry.clone());
        event_manager.register_global_handler(publication_log_handler(log.clone()));

        let mut command_manager = CommandDispatchManager::new(commands.clone(), registry.clone());
        let handler_repo = Arc::clone(&repo);
        command_manager
            .register_command_handler::<ChangePassword, _>(move |command: &Command| {
                let repo = Arc::clone(&handler_repo);
                Box::pin(async move {
                    let body = command
                        .downcast_ref::<ChangePassword>()
                        .ok_or_else(|| anyhow::anyhow!("unexpected command body"))?;
                    let mut account = repo.load(body.account, Account::from_history)?;
                    account.change_password(&body.password);
                    repo.save(&mut account).await?;
                    anyhow::Ok(())
                })
            })
            .unwrap();

        let (stop_events, events_stopped) = oneshot::channel::<()>();
        let event_listener = tokio::spawn(async move {
            event_manager
                .listen(
                    async {
                        let _ = events_stopped.await;
                    },
                    true,
                )
                .await
        });
        let (stop_commands, commands_stopped) = oneshot::channel::<()>();
        let command_listener = tokio::spawn(async move {
            command_manager
                .listen(
                    async {
                        let _ = commands_stopped.await;
                    },
                    false,
                )
                .await
        });
        until_receiving(&events).await;
        until_receiving(&commands).await;

        commands
            .publish(vec![Command::new(ChangePassword {
                account: id,
                password: "winter".into(),
            })])
            .await
            .unwrap();

        // The command was acknowledged only after its handler saved and published.
        let loaded = repo.load(id, Account::from_history).unwrap();
        assert_eq!(loaded.state().password_hash, hash("winter"));
        assert_eq!(loaded.inner.version(), 2);

        let published = log.all().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].event_type, PasswordChanged::TYPE_NAME);
        assert_eq!(published[0].version, 2);
        assert_eq!(published[0].source_id, id);

        stop_commands.send(()).unwrap();
        command_listener.await.unwrap().unwrap();
        stop_events.send(()).unwrap();
        event_listener.await.unwrap().unwrap();
        assert!(commands.is_closed());
        assert!(events.is_closed());
    }
}
