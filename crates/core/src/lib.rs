//! Admission and matching core of the session grid.
//!
//! A node accepts requests for new automated-browser sessions, parks them in
//! an in-memory queue for the lifetime of the process, retries or expires
//! them on a single background timer worker, and matches their capability
//! requirements against the session factories the node can offer.
//!
//! The pieces, leaves first:
//!
//! - [`events::EventBus`] - non-blocking publish/subscribe channel carrying
//!   queue notifications to whoever distributes work
//! - [`scheduler::Scheduler`] - one worker task driving every timer callback
//! - [`queue::LocalSessionQueue`] - the concurrent queue with retry and
//!   timeout state
//! - [`slots`] - driver discovery and session-factory assembly
//! - [`options`] - typed views over the configuration values this crate
//!   consumes
//! - [`augment`] - decorator registry for capability-driven session wrappers
//!
//! The remote facade speaking the identical contract over HTTP lives in
//! `sgrid-server`, next to the queue's own wire endpoints.

pub mod augment;
pub mod error;
pub mod events;
pub mod options;
pub mod queue;
pub mod scheduler;
pub mod slots;

pub use error::{Error, Result};
pub use events::{EventBus, EventStream, EventWaiter, GridEvent};
pub use queue::{LocalSessionQueue, SessionRequest};
pub use scheduler::Scheduler;
