//! Session request identity and rejection payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier of a pending new-session request.
///
/// No two live requests share an id; the id is the only handle clients hold
/// for retries and removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from its wire form.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw).ok().map(Self)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Structured rejection of a queued request.
///
/// Carried by rejection events and by error responses from the queue
/// endpoints. Exactly one of these is produced per rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRejected {
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
    pub message: String,
}

impl SessionRejected {
    pub fn new(request_id: RequestId, message: impl Into<String>) -> Self {
        Self {
            request_id,
            message: message.into(),
        }
    }
}

/// Shared secret attached to mutating queue calls.
///
/// Compared verbatim; an empty secret on both sides means "no auth".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `candidate` matches this secret.
    pub fn matches(&self, candidate: Option<&str>) -> bool {
        match candidate {
            Some(value) => value == self.0,
            None => self.0.is_empty(),
        }
    }
}
