//! Wire types for the session grid queue protocol.
//!
//! This crate contains the serde-serializable types shared by the local
//! queue, the HTTP queue endpoints, and the remote queue facade. These
//! types represent the "protocol layer" - the shapes of data as they
//! appear on the wire.
//!
//! Types in this crate are pure data: no locking, no scheduling, no
//! behavior beyond construction, lookup, and (de)serialization. The
//! matching and queueing semantics live in `sgrid-core`.

pub mod capabilities;
pub mod headers;
pub mod request;

pub use capabilities::*;
pub use headers::*;
pub use request::*;
