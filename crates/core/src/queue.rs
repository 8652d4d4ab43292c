//! The local new-session queue.
//!
//! One instance per process generation; nothing survives a restart. A single
//! fair reader/writer lock serializes every mutation (insert, remove, clear,
//! purge, retry re-evaluation) while size and snapshot reads proceed
//! concurrently with each other.
//!
//! Timeout is enforced lazily at every touch: any operation about to hand
//! out or act on a request older than the global timeout discards it and
//! publishes a rejection instead, so callers are never handed stale work.
//! A periodic background sweep catches requests nobody touches.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use sgrid_protocol::{Capabilities, RequestId, SessionRejected};

use crate::events::{EventBus, GridEvent};
use crate::scheduler::Scheduler;

/// Period of the background expiry sweep.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);
/// Delay before the first sweep after construction.
const PURGE_INITIAL_DELAY: Duration = Duration::from_secs(30);

/// A pending ask for a new browser session.
///
/// Identity is the request id; the payload is the raw new-session JSON the
/// client submitted, decoded only for observability snapshots and matching.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    request_id: RequestId,
    payload: Value,
    inserted_at: Instant,
    /// Age already accumulated before this process saw the request.
    prior_age: Duration,
    enqueued_epoch_secs: u64,
}

impl SessionRequest {
    /// Creates a request enqueued now.
    pub fn new(request_id: RequestId, payload: Value) -> Self {
        Self {
            request_id,
            payload,
            inserted_at: Instant::now(),
            prior_age: Duration::ZERO,
            enqueued_epoch_secs: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// Creates a request whose clock started at `epoch_secs`.
    ///
    /// Used when a retry hop carries the original enqueue timestamp across
    /// processes: the age, and therefore the deadline, is measured from the
    /// first admission, not from re-insertion.
    pub fn with_enqueued_epoch(request_id: RequestId, payload: Value, epoch_secs: u64) -> Self {
        let now_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self {
            request_id,
            payload,
            inserted_at: Instant::now(),
            prior_age: Duration::from_secs(now_epoch.saturating_sub(epoch_secs)),
            enqueued_epoch_secs: epoch_secs,
        }
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Epoch seconds of first admission, as carried on the wire.
    pub fn enqueued_epoch_secs(&self) -> u64 {
        self.enqueued_epoch_secs
    }

    /// Time spent in the queue so far, counting earlier hops.
    pub fn age(&self) -> Duration {
        self.prior_age + self.inserted_at.elapsed()
    }
}

struct QueueState {
    requests: VecDeque<SessionRequest>,
}

struct QueueInner {
    bus: Arc<EventBus>,
    scheduler: Scheduler,
    retry_interval: Duration,
    request_timeout: Duration,
    timed_out_message: String,
    state: RwLock<QueueState>,
}

/// Concurrent ordered collection of pending session requests.
///
/// Back inserts are FIFO; front inserts are the retry path and take priority
/// over the natural order, so a request that nearly matched is re-evaluated
/// before new arrivals. Business outcomes (timeout, cancellation) are
/// published as [`GridEvent`]s, never returned as errors.
pub struct LocalSessionQueue {
    inner: Arc<QueueInner>,
}

impl LocalSessionQueue {
    /// Creates the queue and arms the periodic expiry sweep.
    ///
    /// Must be called within a tokio runtime; the sweep and the per-request
    /// retry timers share one background worker.
    pub fn new(bus: Arc<EventBus>, retry_interval: Duration, request_timeout: Duration) -> Self {
        let inner = Arc::new(QueueInner {
            bus,
            scheduler: Scheduler::new(),
            retry_interval,
            request_timeout,
            timed_out_message: format!(
                "New session request rejected after being in the queue for more than {request_timeout:?}"
            ),
            state: RwLock::new(QueueState {
                requests: VecDeque::new(),
            }),
        });

        let sweep = Arc::downgrade(&inner);
        inner.scheduler.schedule_repeating(PURGE_INITIAL_DELAY, PURGE_INTERVAL, move || {
            if let Some(inner) = sweep.upgrade() {
                inner.purge_expired();
            }
        });

        Self { inner }
    }

    /// Appends a request and publishes a new-request event.
    ///
    /// Returns whether the request was admitted; the underlying collection
    /// never refuses, so this is `true` short of memory exhaustion.
    pub fn insert_back(&self, request: SessionRequest) -> bool {
        let request_id = request.request_id();
        let mut state = self.inner.state.write();
        state.requests.push_back(request);
        debug!(target = "sgrid.queue", %request_id, "session request queued");
        self.inner.bus.emit(GridEvent::NewSessionRequest(request_id));
        true
    }

    /// Re-inserts a request at the front and arms its retry timer.
    ///
    /// Front inserts are evaluated before back-inserted arrivals. After the
    /// retry interval the timer either expires the request or publishes a
    /// retry event; that one-shot timer is the only per-request state held
    /// outside the queue's lock.
    pub fn insert_front(&self, request: SessionRequest) -> bool {
        let request_id = request.request_id();
        {
            let mut state = self.inner.state.write();
            state.requests.push_front(request);
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner.scheduler.schedule(self.inner.retry_interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.retry_request(request_id);
            }
        });
        true
    }

    /// Removes the request with the given id, if it is still pending.
    ///
    /// The head is checked first - the distributor usually asks for exactly
    /// the request it was just told about - with a linear scan as fallback.
    /// An expired request is never handed out: it is discarded, a rejection
    /// is published, and the call reports "not found".
    pub fn remove_by_id(&self, id: RequestId) -> Option<SessionRequest> {
        let removed = {
            let mut state = self.inner.state.write();
            match state.requests.front() {
                Some(front) if front.request_id() == id => state.requests.pop_front(),
                Some(_) => state
                    .requests
                    .iter()
                    .position(|request| request.request_id() == id)
                    .and_then(|index| state.requests.remove(index)),
                None => None,
            }
        };

        let request = removed?;
        if self.inner.has_timed_out(&request) {
            self.inner.reject_timed_out(id);
            return None;
        }
        Some(request)
    }

    /// Drains the queue, rejecting every pending request, and returns how
    /// many were drained.
    pub fn clear(&self) -> usize {
        let drained: Vec<SessionRequest> = {
            let mut state = self.inner.state.write();
            state.requests.drain(..).collect()
        };

        info!(target = "sgrid.queue", count = drained.len(), "clearing new session request queue");
        for request in &drained {
            self.inner.bus.emit(GridEvent::SessionRejected(SessionRejected::new(
                request.request_id(),
                "New session request cancelled.",
            )));
        }
        drained.len()
    }

    /// Removes every expired request and rejects each one.
    ///
    /// Runs on the background sweep; exposed for callers that want an
    /// immediate pass.
    pub fn purge_expired(&self) {
        self.inner.purge_expired();
    }

    /// Best-effort snapshot of the pending requests' capabilities.
    ///
    /// Entries whose payload does not decode are logged and skipped rather
    /// than failing the whole snapshot.
    pub fn pending_capabilities(&self) -> Vec<Capabilities> {
        let state = self.inner.state.read();
        state
            .requests
            .iter()
            .filter_map(|request| {
                let caps = Capabilities::from_new_session_payload(request.payload());
                if caps.is_none() {
                    warn!(
                        target = "sgrid.queue",
                        request_id = %request.request_id(),
                        "skipping request with undecodable capabilities"
                    );
                }
                caps
            })
            .collect()
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.inner.state.read().requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.read().requests.is_empty()
    }

    /// The queue is ready as soon as its event channel is, which in-process
    /// is always.
    pub fn is_ready(&self) -> bool {
        true
    }

    /// The configured global request timeout.
    pub fn request_timeout(&self) -> Duration {
        self.inner.request_timeout
    }

    /// Stops the background timer worker, dropping pending sweeps and retry
    /// timers. Part of the owning process's supervised shutdown.
    pub fn stop(&self) {
        self.inner.scheduler.stop();
    }
}

impl QueueInner {
    fn has_timed_out(&self, request: &SessionRequest) -> bool {
        request.age() > self.request_timeout
    }

    fn reject_timed_out(&self, request_id: RequestId) {
        info!(target = "sgrid.queue", %request_id, "session request timed out");
        self.bus.emit(GridEvent::SessionRejected(SessionRejected::new(
            request_id,
            self.timed_out_message.clone(),
        )));
    }

    /// Retry-timer callback for a front-inserted request.
    ///
    /// A request that was dispatched or removed in the meantime is left
    /// alone. An expired one is removed and rejected; a live one stays
    /// queued and a retry event asks the distributor to match it again.
    fn retry_request(&self, request_id: RequestId) {
        let mut state = self.state.write();
        let Some(index) = state
            .requests
            .iter()
            .position(|request| request.request_id() == request_id)
        else {
            debug!(target = "sgrid.queue", %request_id, "retry timer fired for departed request");
            return;
        };

        if self.has_timed_out(&state.requests[index]) {
            state.requests.remove(index);
            drop(state);
            self.reject_timed_out(request_id);
        } else {
            debug!(target = "sgrid.queue", %request_id, "all slots busy, requesting retry");
            self.bus.emit(GridEvent::RetrySessionRequest(request_id));
        }
    }

    fn purge_expired(&self) {
        let expired: Vec<RequestId> = {
            let mut state = self.state.write();
            let mut expired = Vec::new();
            state.requests.retain(|request| {
                if request.age() > self.request_timeout {
                    expired.push(request.request_id());
                    false
                } else {
                    true
                }
            });
            expired
        };

        for request_id in expired {
            self.reject_timed_out(request_id);
        }
    }
}
