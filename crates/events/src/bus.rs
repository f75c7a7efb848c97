//! Event publishing/subscription abstraction (mechanics only).
//!
//! Committed stock events are handed to the bus **after** the ledger write
//! succeeds. The ledger stays the source of truth; the bus is only distribution.
//!
//! - **Transport-agnostic**: in-memory channels in tests, a broker in production
//! - **At-least-once**: consumers must tolerate duplicates (use `sequence_number`)
//! - **No persistence**: a lost message can always be rebuilt from the ledger

use std::sync::Arc;
use std::sync::mpsc::Receiver;

/// A subscription to an event stream.
///
/// Each subscription receives its own copy of every message published after it
/// was created (broadcast semantics). Intended for a single consuming thread.
///
/// ```ignore
/// let subscription = bus.subscribe();
/// for envelope in subscription.drain() {
///     notify(envelope)?;
/// }
/// ```
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self { receiver }
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Drain every message that is already queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

/// Domain-agnostic event bus (pub/sub abstraction).
///
/// ```text
/// StockService → StockLedger (append) → EventBus (publish) → Consumers
///                                                            ├─ alert notifier
///                                                            └─ dashboards
/// ```
///
/// `publish()` may fail (full queue, broker down). Because the ledger already
/// holds the event, a failed publication never invalidates the committed write.
///
/// Implementations are `Send + Sync`; many service tasks publish concurrently.
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<(), Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
