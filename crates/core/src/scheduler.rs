//! Single-worker timer scheduler.
//!
//! All time-based callbacks of a queue - the periodic expiry sweep and the
//! one-shot retry timers - run on one background task, so no two timer
//! callbacks for the same queue ever run concurrently with each other. They
//! may run concurrently with foreground queue calls; the queue's own lock
//! arbitrates that.
//!
//! Deadlines live in a min-heap rather than one task per timer, which keeps
//! resource use bounded under high request volume. The worker sleeps until
//! the nearest deadline or until a new timer arrives, whichever is sooner.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

type Job = Box<dyn FnOnce() + Send>;
type RepeatJob = Box<dyn FnMut() + Send>;

enum Command {
    Once { deadline: Instant, job: Job },
    Repeating {
        deadline: Instant,
        every: Duration,
        job: RepeatJob,
    },
}

enum TimerKind {
    Once(Job),
    Repeating { every: Duration, job: RepeatJob },
}

struct Timer {
    deadline: Instant,
    seq: u64,
    kind: TimerKind,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Handle to the background timer worker.
///
/// Created inside a tokio runtime. [`stop`](Self::stop) is the explicit
/// lifecycle exit: it drops every pending timer and ends the worker task;
/// the owning process calls it during supervised shutdown. Dropping the
/// scheduler stops it as well.
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Command>,
    shutdown_tx: watch::Sender<bool>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawns the worker task. Must be called within a tokio runtime.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(rx, shutdown_rx));
        Self {
            tx,
            shutdown_tx,
            worker: parking_lot::Mutex::new(Some(worker)),
        }
    }

    /// Arms a one-shot timer firing after `delay`.
    ///
    /// Silently a no-op once the scheduler is stopped; a stopping process
    /// has no use for late retries.
    pub fn schedule(&self, delay: Duration, job: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Command::Once {
            deadline: Instant::now() + delay,
            job: Box::new(job),
        });
    }

    /// Arms a repeating timer: first fire after `initial_delay`, then one
    /// fire every `every`.
    pub fn schedule_repeating(
        &self,
        initial_delay: Duration,
        every: Duration,
        job: impl FnMut() + Send + 'static,
    ) {
        let _ = self.tx.send(Command::Repeating {
            deadline: Instant::now() + initial_delay,
            every,
            job: Box::new(job),
        });
    }

    /// Stops the worker and clears every pending timer.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.worker.lock().take() {
            handle.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut timers: BinaryHeap<Reverse<Timer>> = BinaryHeap::new();
    let mut seq: u64 = 0;

    loop {
        let next_deadline = timers.peek().map(|Reverse(timer)| timer.deadline);

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!(target = "sgrid.scheduler", pending = timers.len(), "scheduler stopping");
                    break;
                }
            }
            command = rx.recv() => {
                match command {
                    Some(Command::Once { deadline, job }) => {
                        seq += 1;
                        timers.push(Reverse(Timer { deadline, seq, kind: TimerKind::Once(job) }));
                    }
                    Some(Command::Repeating { deadline, every, job }) => {
                        seq += 1;
                        timers.push(Reverse(Timer { deadline, seq, kind: TimerKind::Repeating { every, job } }));
                    }
                    // Every handle dropped; nothing can observe the
                    // remaining timers.
                    None => break,
                }
            }
            _ = sleep_until_or_forever(next_deadline) => {
                let now = Instant::now();
                while let Some(Reverse(timer)) = timers.peek() {
                    if timer.deadline > now {
                        break;
                    }
                    let Reverse(timer) = timers.pop().expect("peeked timer");
                    match timer.kind {
                        TimerKind::Once(job) => job(),
                        TimerKind::Repeating { every, mut job } => {
                            job();
                            seq += 1;
                            timers.push(Reverse(Timer {
                                deadline: timer.deadline + every,
                                seq,
                                kind: TimerKind::Repeating { every, job },
                            }));
                        }
                    }
                }
            }
        }
    }
}

async fn sleep_until_or_forever(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn one_shot_fires_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn repeating_timer_keeps_firing() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.schedule_repeating(Duration::from_millis(5), Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(fired.load(Ordering::SeqCst) >= 3);
    }

    #[tokio::test]
    async fn timers_fire_in_deadline_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for (label, delay_ms) in [("late", 40u64), ("early", 10), ("middle", 25)] {
            let order = order.clone();
            scheduler.schedule(Duration::from_millis(delay_ms), move || {
                order.lock().push(label);
            });
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(*order.lock(), vec!["early", "middle", "late"]);
    }

    #[tokio::test]
    async fn stop_clears_pending_timers() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        scheduler.schedule(Duration::from_millis(20), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        scheduler.stop();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
