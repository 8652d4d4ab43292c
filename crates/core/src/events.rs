//! Event channel decoupling the queue from its consumers.
//!
//! The queue never answers "this request timed out" or "retry this one"
//! through return values; it publishes [`GridEvent`]s and whoever distributes
//! work subscribes. Publishing never blocks on subscriber processing, and
//! per-publisher delivery order is preserved.
//!
//! Two consumption patterns are supported:
//!
//! 1. **Streams**: subscribe via [`EventBus::subscribe`] and poll
//! 2. **Waiters**: register a predicate via [`EventBus::register_waiter`] and
//!    receive the first matching event on a oneshot channel
//!
//! Waiters are checked before the broadcast send, so a caller waiting on a
//! specific request id sees its event even when stream subscribers lag.
//! Cross-process deployments may replace this bus with a remote broker; the
//! ordering guarantee then belongs to the broker's contract.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use sgrid_protocol::{RequestId, SessionRejected};

use crate::error::{Error, Result};

/// Notifications published by the session queue.
#[derive(Debug, Clone, PartialEq)]
pub enum GridEvent {
    /// A request was appended to the queue and awaits matching.
    NewSessionRequest(RequestId),
    /// A retried request is still alive; matching should be re-attempted.
    RetrySessionRequest(RequestId),
    /// A request left the queue without being dispatched. Published exactly
    /// once per rejected request.
    SessionRejected(SessionRejected),
    /// The distributor produced a session for the request; the payload is
    /// the downstream new-session response to relay to the waiting client.
    NewSessionResponse { request_id: RequestId, payload: Value },
}

impl GridEvent {
    /// The request this event concerns.
    pub fn request_id(&self) -> RequestId {
        match self {
            GridEvent::NewSessionRequest(id) | GridEvent::RetrySessionRequest(id) => *id,
            GridEvent::SessionRejected(rejected) => rejected.request_id,
            GridEvent::NewSessionResponse { request_id, .. } => *request_id,
        }
    }
}

struct WaiterEntry<E> {
    predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
    complete_tx: oneshot::Sender<E>,
}

/// Publish/subscribe bus combining broadcast fan-out with one-shot waiters.
pub struct EventBus<E: Clone + Send + 'static = GridEvent> {
    tx: broadcast::Sender<E>,
    waiters: Mutex<Vec<WaiterEntry<E>>>,
}

impl<E: Clone + Send + 'static> EventBus<E> {
    /// Creates a bus with the given broadcast channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Publishes an event to all matching waiters, then all subscribers.
    ///
    /// Never blocks on consumers; a subscriber that falls behind loses old
    /// events rather than stalling the publisher. Waiters whose receiver was
    /// dropped are discarded here, so an abandoned wait never accumulates.
    pub fn emit(&self, event: E) {
        {
            let mut waiters = self.waiters.lock();
            let mut i = 0;
            while i < waiters.len() {
                if waiters[i].complete_tx.is_closed() {
                    waiters.swap_remove(i);
                } else if (waiters[i].predicate)(&event) {
                    let entry = waiters.swap_remove(i);
                    let _ = entry.complete_tx.send(event.clone());
                } else {
                    i += 1;
                }
            }
        }
        let _ = self.tx.send(event);
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }

    /// Registers a one-shot waiter completed by the first event matching
    /// `predicate`. The waiter is removed once it fires.
    pub fn register_waiter<F>(&self, predicate: F) -> oneshot::Receiver<E>
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        let (complete_tx, complete_rx) = oneshot::channel();
        self.waiters.lock().push(WaiterEntry {
            predicate: Box::new(predicate),
            complete_tx,
        });
        complete_rx
    }

    /// Number of live stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Number of registered waiters still pending.
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Wrapper around [`broadcast::Receiver`] that survives lag.
///
/// A distributor loop that falls behind gets a warning and keeps receiving
/// instead of erroring out of its loop.
pub struct EventStream<E: Clone + Send + 'static = GridEvent> {
    rx: broadcast::Receiver<E>,
}

impl<E: Clone + Send + 'static> EventStream<E> {
    pub fn new(rx: broadcast::Receiver<E>) -> Self {
        Self { rx }
    }

    /// Receives the next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(target = "sgrid.events", dropped = n, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receives an event only if one is immediately available.
    pub fn try_recv(&mut self) -> Option<E> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!(target = "sgrid.events", dropped = n, "event stream lagged");
                }
                Err(
                    broadcast::error::TryRecvError::Empty | broadcast::error::TryRecvError::Closed,
                ) => return None,
            }
        }
    }
}

/// One-shot event waiter with timeout support.
///
/// Created from [`EventBus::register_waiter`]; completes when a matching
/// event is emitted. Await directly for no timeout, or call
/// [`wait`](Self::wait) to bound it.
pub struct EventWaiter<E> {
    rx: oneshot::Receiver<E>,
    timeout: Duration,
}

impl<E: Send + 'static> EventWaiter<E> {
    pub fn new(rx: oneshot::Receiver<E>, timeout: Duration) -> Self {
        Self { rx, timeout }
    }

    /// Waits for the event within the configured timeout.
    ///
    /// Times out with [`Error::SessionNotCreated`]; a dropped bus surfaces
    /// as [`Error::SchedulerStopped`].
    pub async fn wait(self) -> Result<E> {
        tokio::time::timeout(self.timeout, self.rx)
            .await
            .map_err(|_| Error::SessionNotCreated("timed out waiting for grid event".to_string()))?
            .map_err(|_| Error::SchedulerStopped)
    }
}

impl<E: Send + 'static> Future for EventWaiter<E> {
    type Output = Result<E>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(event)) => Poll::Ready(Ok(event)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::SchedulerStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
