//! HTTP surface of the session grid queue.
//!
//! Two halves of the same contract:
//!
//! - [`routes`] serves the queue over HTTP for the process that hosts the
//!   real [`sgrid::LocalSessionQueue`]
//! - [`remote`] is the facade other grid processes use to talk to it, one
//!   synchronous request/response call per queue operation

pub mod cli;
pub mod logging;
pub mod remote;
pub mod routes;
