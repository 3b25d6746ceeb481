//! In-memory handshake bus for tests, dev and single-process setups.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::bus::{Message, Publisher, Receiver, ReceiverOptions, TransactedAccept};
use crate::command::Command;
use crate::error::BusError;
use crate::event::VersionedEvent;

/// In-memory bus carrying [`VersionedEvent`]s.
pub type InMemoryEventBus = InMemoryBus<VersionedEvent>;

/// In-memory bus carrying [`Command`]s.
pub type InMemoryCommandBus = InMemoryBus<Command>;

/// In-memory bus configuration.
#[derive(Debug, Clone)]
pub struct InMemoryBusConfig {
    /// Name for logging
    pub name: String,
    /// How many publishers may queue an item while one is in flight
    pub capacity: usize,
}

impl Default for InMemoryBusConfig {
    fn default() -> Self {
        Self {
            name: "in-memory-bus".to_string(),
            capacity: 16,
        }
    }
}

impl InMemoryBusConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }
}

/// Result of one handshake, reported back to the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Processed,
    Rejected,
    ReceiverGone,
}

struct Delivery<M> {
    message: M,
    outcome: oneshot::Sender<Outcome>,
}

enum BusState<M> {
    /// No receiver attached.
    Idle,
    /// A receive loop drains the queue behind this sender.
    Receiving(mpsc::Sender<Delivery<M>>),
    Closed,
}

impl<M> BusState<M> {
    fn label(&self) -> &'static str {
        match self {
            BusState::Idle => "idle",
            BusState::Receiving(_) => "receiving",
            BusState::Closed => "closed",
        }
    }
}

/// In-memory bus with a per-item handshake.
///
/// - **idle** until [`receive`](Receiver::receive) attaches a loop: publishing
///   to an idle bus is a logged no-op that drops the batch
/// - **receiving**: one item in flight at a time, `publish` waits for each
///   acknowledgment
/// - **closed** after a close request: `publish` and `receive` fail with
///   [`BusError::Closed`]
///
/// Every receiver is exclusive: a second `receive` while a loop is attached
/// fails with [`BusError::AlreadyReceiving`]. When the consumer goes away
/// without closing, the bus returns to idle and can be received from again;
/// publishers still waiting on the detached loop get [`BusError::ReceiverGone`].
pub struct InMemoryBus<M> {
    config: InMemoryBusConfig,
    state: Arc<Mutex<BusState<M>>>,
}

impl<M: Message> InMemoryBus<M> {
    pub fn new() -> Self {
        Self::with_config(InMemoryBusConfig::default())
    }

    pub fn with_config(config: InMemoryBusConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BusState::Idle)),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn is_receiving(&self) -> bool {
        self.lock_state()
            .map(|s| matches!(*s, BusState::Receiving(_)))
            .unwrap_or(false)
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state()
            .map(|s| matches!(*s, BusState::Closed))
            .unwrap_or(true)
    }

    /// Why a publisher lost its receive loop: closed, or the consumer left.
    fn shutdown_error(&self) -> BusError {
        if self.is_closed() {
            BusError::Closed
        } else {
            BusError::ReceiverGone
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, BusState<M>>, BusError> {
        self.state
            .lock()
            .map_err(|_| BusError::transport("bus state lock poisoned"))
    }
}

impl<M: Message> Default for InMemoryBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> core::fmt::Debug for InMemoryBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = match self.state.lock() {
            Ok(s) => s.label(),
            Err(_) => "poisoned",
        };
        f.debug_struct("InMemoryBus")
            .field("config", &self.config)
            .field("state", &state)
            .finish()
    }
}

#[async_trait]
impl<M: Message> Publisher<M> for InMemoryBus<M> {
    async fn publish(&self, batch: Vec<M>) -> Result<(), BusError> {
        let queue = {
            let state = self.lock_state()?;
            match &*state {
                BusState::Idle => {
                    debug!(bus = %self.config.name, dropped = batch.len(), "no receiver attached, dropping batch");
                    return Ok(());
                }
                BusState::Closed => return Err(BusError::Closed),
                BusState::Receiving(queue) => queue.clone(),
            }
        };

        for (position, message) in batch.into_iter().enumerate() {
            let message_type = message.message_type().to_string();
            let (outcome_tx, outcome_rx) = oneshot::channel();

            if queue
                .send(Delivery {
                    message,
                    outcome: outcome_tx,
                })
                .await
                .is_err()
            {
                return Err(self.shutdown_error());
            }

            // A dropped outcome means the loop shut down before handling the item.
            let Ok(outcome) = outcome_rx.await else {
                return Err(self.shutdown_error());
            };
            match outcome {
                Outcome::Processed => {}
                Outcome::Rejected => {
                    return Err(BusError::Rejected {
                        message_type,
                        position,
                    });
                }
                Outcome::ReceiverGone => return Err(BusError::ReceiverGone),
            }
        }

        Ok(())
    }
}

impl<M: Message> Receiver<M> for InMemoryBus<M> {
    fn receive(&self, options: ReceiverOptions<M>) -> Result<(), BusError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| BusError::transport(format!("receive requires a tokio runtime: {e}")))?;

        let queue = {
            let mut state = self.lock_state()?;
            match &*state {
                BusState::Idle => {}
                BusState::Receiving(_) => return Err(BusError::AlreadyReceiving),
                BusState::Closed => return Err(BusError::Closed),
            }
            let (tx, rx) = mpsc::channel(self.config.capacity.max(1));
            *state = BusState::Receiving(tx);
            rx
        };

        debug!(bus = %self.config.name, exclusive = options.exclusive, "receive loop attached");
        runtime.spawn(receive_loop(
            self.config.name.clone(),
            queue,
            options,
            Arc::clone(&self.state),
        ));
        Ok(())
    }
}

async fn receive_loop<M: Message>(
    name: String,
    mut queue: mpsc::Receiver<Delivery<M>>,
    mut options: ReceiverOptions<M>,
    state: Arc<Mutex<BusState<M>>>,
) {
    loop {
        // Between handshakes: close requests win over queued items.
        tokio::select! {
            biased;

            request = options.close.recv() => {
                match request {
                    Some(reply) => {
                        set_state(&state, BusState::Closed);
                        // Queued deliveries are dropped with the queue; their publishers see `Closed`.
                        drop(queue);
                        info!(bus = %name, "bus closed");
                        let _ = reply.send(Ok(()));
                    }
                    None => {
                        debug!(bus = %name, "consumer dropped its close handle, detaching");
                        detach(&name, &state, queue).await;
                    }
                }
                return;
            }

            delivery = queue.recv() => {
                let Some(delivery) = delivery else {
                    // Only reachable once the state no longer holds the sender.
                    return;
                };

                let Delivery { message, outcome } = delivery;
                let (ack_tx, ack_rx) = oneshot::channel();

                if options.receive.send(TransactedAccept::new(message, ack_tx)).await.is_err() {
                    warn!(bus = %name, "consumer went away mid-handshake, detaching");
                    let _ = outcome.send(Outcome::ReceiverGone);
                    detach(&name, &state, queue).await;
                    return;
                }

                let result = match ack_rx.await {
                    Ok(true) => Outcome::Processed,
                    Ok(false) | Err(_) => Outcome::Rejected,
                };
                let _ = outcome.send(result);
            }
        }
    }
}

/// Return the bus to idle and fail every delivery still queued for this loop.
async fn detach<M>(name: &str, state: &Mutex<BusState<M>>, mut queue: mpsc::Receiver<Delivery<M>>) {
    set_state(state, BusState::Idle);
    queue.close();

    let mut abandoned = 0usize;
    while let Some(delivery) = queue.recv().await {
        let _ = delivery.outcome.send(Outcome::ReceiverGone);
        abandoned += 1;
    }
    if abandoned > 0 {
        warn!(bus = %name, abandoned, "consumer went away with items queued");
    }
}

fn set_state<M>(state: &Mutex<BusState<M>>, next: BusState<M>) {
    let mut guard = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = next;
}
