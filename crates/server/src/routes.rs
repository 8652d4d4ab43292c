//! Axum routes implementing the queue wire contract.
//!
//! Every route is a thin shim over [`LocalSessionQueue`]; the admission
//! route additionally parks the caller on the event bus until the
//! distributor answers or the request is rejected.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use serde_json::{Value, json};
use tracing::debug;

use sgrid::events::{EventBus, EventWaiter, GridEvent};
use sgrid::queue::{LocalSessionQueue, SessionRequest};
use sgrid_protocol::{
    REGISTRATION_SECRET_HEADER, RequestId, SESSION_REQUEST_ID_HEADER,
    SESSION_REQUEST_TIMESTAMP_HEADER, Secret,
};

/// Slack on top of the request timeout before the admission route gives up
/// waiting for a queue event. The queue itself rejects first; this only
/// guards against a wedged distributor.
const RELAY_GRACE: Duration = Duration::from_secs(10);

/// Shared state behind the queue endpoints.
pub struct AppState {
    pub queue: Arc<LocalSessionQueue>,
    pub bus: Arc<EventBus>,
    /// Secret required on mutating calls; `None` disables the check.
    pub secret: Option<Secret>,
}

/// Builds the queue router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/se/grid/newsessionqueuer/session", post(add_session))
        .route(
            "/se/grid/newsessionqueuer/session/retry/{request_id}",
            post(retry_session),
        )
        .route(
            "/se/grid/newsessionqueuer/session/{request_id}",
            get(remove_session),
        )
        .route("/se/grid/newsessionqueuer/queue", get(list_queue))
        .route("/se/grid/newsessionqueuer/queue", delete(clear_queue))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// `POST /se/grid/newsessionqueuer/session`
///
/// Enqueues the payload and waits for the matching completion or rejection
/// event, relaying whichever arrives first.
async fn add_session(
    State(state): State<Arc<AppState>>,
    axum::Json(payload): axum::Json<Value>,
) -> Response {
    let request_id = RequestId::new();

    // Register before inserting so a fast distributor cannot win the race.
    let waiter = state.bus.register_waiter(move |event: &GridEvent| {
        matches!(
            event,
            GridEvent::SessionRejected(_) | GridEvent::NewSessionResponse { .. }
        ) && event.request_id() == request_id
    });

    state
        .queue
        .insert_back(SessionRequest::new(request_id, payload));

    let timeout = state.queue.request_timeout() + RELAY_GRACE;
    match EventWaiter::new(waiter, timeout).wait().await {
        Ok(GridEvent::NewSessionResponse { payload, .. }) => {
            (StatusCode::OK, axum::Json(payload)).into_response()
        }
        Ok(GridEvent::SessionRejected(rejected)) => {
            error_response(StatusCode::INTERNAL_SERVER_ERROR, rejected.request_id, &rejected.message)
        }
        // Waiter gave up; whatever is still queued under this id is dead.
        _ => {
            state.queue.remove_by_id(request_id);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                request_id,
                "new session request was not answered in time",
            )
        }
    }
}

/// `POST /se/grid/newsessionqueuer/session/retry/{request_id}`
///
/// Front-inserts the payload under its original id and timestamp. Requires
/// the registration secret.
async fn retry_session(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    axum::Json(payload): axum::Json<Value>,
) -> Response {
    if let Some(denied) = check_secret(&state, &headers) {
        return denied;
    }
    let Some(request_id) = RequestId::parse(&request_id) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let request = match header_epoch(&headers) {
        Some(epoch) => SessionRequest::with_enqueued_epoch(request_id, payload, epoch),
        None => SessionRequest::new(request_id, payload),
    };

    debug!(target = "sgrid.server", %request_id, "retry re-insertion");
    let added = state.queue.insert_front(request);
    axum::Json(added).into_response()
}

/// `GET /se/grid/newsessionqueuer/session/{request_id}`
///
/// Pop-and-return when the request is still pending; empty 404 otherwise.
/// The enqueue timestamp and id travel back as headers.
async fn remove_session(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> Response {
    let Some(request_id) = RequestId::parse(&request_id) else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    match state.queue.remove_by_id(request_id) {
        Some(request) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&request.enqueued_epoch_secs().to_string()) {
                headers.insert(SESSION_REQUEST_TIMESTAMP_HEADER, value);
            }
            if let Ok(value) = HeaderValue::from_str(&request.request_id().to_string()) {
                headers.insert(SESSION_REQUEST_ID_HEADER, value);
            }
            (StatusCode::OK, headers, axum::Json(request.payload().clone())).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// `DELETE /se/grid/newsessionqueuer/queue` - drain everything, answer with
/// the count. Requires the registration secret.
async fn clear_queue(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    if let Some(denied) = check_secret(&state, &headers) {
        return denied;
    }
    axum::Json(state.queue.clear()).into_response()
}

/// `GET /se/grid/newsessionqueuer/queue` - non-destructive capability
/// listing.
async fn list_queue(State(state): State<Arc<AppState>>) -> Response {
    axum::Json(state.queue.pending_capabilities()).into_response()
}

async fn readyz(State(state): State<Arc<AppState>>) -> Response {
    if state.queue.is_ready() {
        (StatusCode::OK, "ok").into_response()
    } else {
        StatusCode::SERVICE_UNAVAILABLE.into_response()
    }
}

fn check_secret(state: &AppState, headers: &HeaderMap) -> Option<Response> {
    let Some(secret) = &state.secret else {
        return None;
    };
    let candidate = headers
        .get(REGISTRATION_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());
    if secret.matches(candidate) {
        None
    } else {
        Some(
            (
                StatusCode::UNAUTHORIZED,
                axum::Json(json!({"value": {"error": "unauthorized", "message": "registration secret mismatch"}})),
            )
                .into_response(),
        )
    }
}

fn header_epoch(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(SESSION_REQUEST_TIMESTAMP_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.parse().ok())
}

fn error_response(status: StatusCode, request_id: RequestId, message: &str) -> Response {
    (
        status,
        axum::Json(json!({
            "value": {
                "error": "session not created",
                "message": message,
                "requestId": request_id.to_string(),
            }
        })),
    )
        .into_response()
}
