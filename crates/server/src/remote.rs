//! Client-side facade over the HTTP queue endpoints.
//!
//! Other grid processes hold a [`RemoteSessionQueue`] instead of the local
//! queue; every method maps to exactly one request against the host
//! serving [`crate::routes::router`].

use std::time::Duration;

use anyhow::{Context, anyhow};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use sgrid::queue::SessionRequest;
use sgrid_protocol::{
    Capabilities, QUEUE_ROUTE, READYZ_ROUTE, REGISTRATION_SECRET_HEADER, RequestId, SESSION_ROUTE,
    SESSION_REQUEST_ID_HEADER, SESSION_REQUEST_TIMESTAMP_HEADER, Secret, TRACEPARENT_HEADER,
};

const REMOTE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote view of a session queue hosted by another grid process.
pub struct RemoteSessionQueue {
    client: reqwest::Client,
    base: Url,
    secret: Option<Secret>,
}

impl RemoteSessionQueue {
    pub fn new(base: Url, secret: Option<Secret>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(REMOTE_CONNECT_TIMEOUT)
            .build()
            .context("building http client for remote session queue")?;
        Ok(Self {
            client,
            base,
            secret,
        })
    }

    /// Submits a new-session payload and blocks until the hosting queue
    /// relays the session result or a rejection.
    pub async fn add_to_queue(&self, payload: &Value) -> anyhow::Result<Value> {
        let response = self
            .client
            .post(self.endpoint(SESSION_ROUTE)?)
            .headers(self.trace_headers())
            .json(payload)
            .send()
            .await
            .context("submitting new session request to remote queue")?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .context("decoding new session response")?;
        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .pointer("/value/message")
                .and_then(Value::as_str)
                .unwrap_or("new session request failed");
            Err(anyhow!("{message}"))
        }
    }

    /// Re-inserts a request at the head of the remote queue, preserving its
    /// original id and enqueue timestamp.
    pub async fn retry_add_to_queue(&self, request: &SessionRequest) -> anyhow::Result<bool> {
        let route = format!("{}/retry/{}", SESSION_ROUTE, request.request_id());
        let mut headers = self.trace_headers();
        self.insert_secret(&mut headers);
        headers.insert(
            SESSION_REQUEST_TIMESTAMP_HEADER,
            HeaderValue::from_str(&request.enqueued_epoch_secs().to_string())?,
        );
        headers.insert(
            SESSION_REQUEST_ID_HEADER,
            HeaderValue::from_str(&request.request_id().to_string())?,
        );

        let response = self
            .client
            .post(self.endpoint(&route)?)
            .headers(headers)
            .json(request.payload())
            .send()
            .await
            .context("retrying session request against remote queue")?;

        let added = response
            .error_for_status()
            .context("remote queue refused the retry")?
            .json()
            .await
            .context("decoding retry response")?;
        Ok(added)
    }

    /// Takes a pending request out of the remote queue. `None` when the
    /// request already left the queue.
    pub async fn remove(&self, request_id: RequestId) -> anyhow::Result<Option<SessionRequest>> {
        let route = format!("{}/{}", SESSION_ROUTE, request_id);
        let response = self
            .client
            .get(self.endpoint(&route)?)
            .headers(self.trace_headers())
            .send()
            .await
            .context("removing session request from remote queue")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = response
            .error_for_status()
            .context("remote queue rejected the removal")?;

        let epoch = response
            .headers()
            .get(SESSION_REQUEST_TIMESTAMP_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.parse::<u64>().ok());
        let payload: Value = response
            .json()
            .await
            .context("decoding removed session request")?;

        let request = match epoch {
            Some(epoch) => SessionRequest::with_enqueued_epoch(request_id, payload, epoch),
            None => {
                warn!(
                    target = "sgrid.remote",
                    %request_id,
                    "removal response missing enqueue timestamp"
                );
                SessionRequest::new(request_id, payload)
            }
        };
        Ok(Some(request))
    }

    /// Drops every pending request; returns how many were cleared.
    pub async fn clear(&self) -> anyhow::Result<usize> {
        let mut headers = self.trace_headers();
        self.insert_secret(&mut headers);
        let count = self
            .client
            .delete(self.endpoint(QUEUE_ROUTE)?)
            .headers(headers)
            .send()
            .await
            .context("clearing remote queue")?
            .error_for_status()
            .context("remote queue refused the clear")?
            .json()
            .await
            .context("decoding clear response")?;
        Ok(count)
    }

    /// Snapshot of the capabilities currently waiting in the remote queue.
    pub async fn queue_contents(&self) -> anyhow::Result<Vec<Capabilities>> {
        let contents = self
            .client
            .get(self.endpoint(QUEUE_ROUTE)?)
            .headers(self.trace_headers())
            .send()
            .await
            .context("listing remote queue contents")?
            .error_for_status()
            .context("remote queue refused the listing")?
            .json()
            .await
            .context("decoding queue contents")?;
        Ok(contents)
    }

    /// Health probe. Any failure, transport or status, reads as not ready.
    pub async fn is_ready(&self) -> bool {
        let Ok(url) = self.endpoint(READYZ_ROUTE) else {
            return false;
        };
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(target = "sgrid.remote", error = %err, "readiness probe failed");
                false
            }
        }
    }

    fn endpoint(&self, route: &str) -> anyhow::Result<Url> {
        self.base
            .join(route)
            .with_context(|| format!("joining {route} onto {}", self.base))
    }

    fn insert_secret(&self, headers: &mut HeaderMap) {
        if let Some(secret) = &self.secret {
            if let Ok(value) = HeaderValue::from_str(secret.as_str()) {
                headers.insert(REGISTRATION_SECRET_HEADER, value);
            }
        }
    }

    fn trace_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&new_traceparent()) {
            headers.insert(TRACEPARENT_HEADER, value);
        }
        headers
    }
}

/// W3C trace-context header for correlating queue calls across processes.
fn new_traceparent() -> String {
    let trace_id = Uuid::new_v4().simple();
    let span_id = &Uuid::new_v4().simple().to_string()[..16];
    format!("00-{trace_id}-{span_id}-01")
}
