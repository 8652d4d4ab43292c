//! Header and route constants for the queue wire contract.

/// Epoch seconds at which a session request was first enqueued. Carried on
/// retry re-insertions so the original deadline survives a process hop.
pub const SESSION_REQUEST_TIMESTAMP_HEADER: &str = "new-session-request-timestamp";

/// Correlates retries and removals with the original admission.
pub const SESSION_REQUEST_ID_HEADER: &str = "request-id";

/// Shared secret required on mutating queue calls.
pub const REGISTRATION_SECRET_HEADER: &str = "x-registration-secret";

/// W3C trace context header propagated on facade calls.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Base path for session admission and removal.
pub const SESSION_ROUTE: &str = "/se/grid/newsessionqueuer/session";

/// Path for queue-wide operations (listing, clear).
pub const QUEUE_ROUTE: &str = "/se/grid/newsessionqueuer/queue";

/// Readiness probe path.
pub const READYZ_ROUTE: &str = "/readyz";
