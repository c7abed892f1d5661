//! `Idempotency-Key` enforcement for mutating checkout calls.
//!
//! Successful responses are buffered and replayed verbatim for a repeated key
//! within the TTL. Keys are scoped to the authenticated user and the request
//! path, so two shoppers can never observe each other's stored responses.

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::CONTENT_TYPE, request::Parts, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::{mapref::entry::Entry, DashMap};
use http_body_util::BodyExt as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::auth::AuthUser;
use crate::errors::{ApiError, ServiceError};

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAY_HEADER: &str = "idempotent-replayed";
const MAX_KEY_LEN: usize = 255;

#[derive(Clone)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
    pub stored_at: Instant,
}

#[derive(Clone)]
enum Slot {
    InFlight(Instant),
    Done(StoredResponse),
}

impl Slot {
    fn started_at(&self) -> Instant {
        match self {
            Slot::InFlight(at) => *at,
            Slot::Done(stored) => stored.stored_at,
        }
    }
}

/// Outcome of reserving a key before the handler runs.
pub enum Reservation {
    Proceed,
    Replay(StoredResponse),
    InFlight,
}

#[derive(Clone)]
pub struct IdempotencyStore {
    entries: Arc<DashMap<String, Slot>>,
    ttl: Duration,
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Claim `key`, or report why the request must not run again.
    pub fn reserve(&self, key: &str) -> Reservation {
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().started_at().elapsed() >= self.ttl {
                    occupied.insert(Slot::InFlight(Instant::now()));
                    return Reservation::Proceed;
                }
                match occupied.get() {
                    Slot::Done(stored) => Reservation::Replay(stored.clone()),
                    Slot::InFlight(_) => Reservation::InFlight,
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::InFlight(Instant::now()));
                Reservation::Proceed
            }
        }
    }

    pub fn complete(&self, key: &str, stored: StoredResponse) {
        self.entries.insert(key.to_string(), Slot::Done(stored));
    }

    /// Drop an unfinished reservation so the client may retry with the same key.
    fn release_in_flight(&self, key: &str) {
        self.entries
            .remove_if(key, |_, slot| matches!(slot, Slot::InFlight(_)));
    }

    pub fn cleanup(&self) {
        let ttl = self.ttl;
        self.entries.retain(|_, slot| slot.started_at().elapsed() < ttl);
    }
}

#[cfg(test)]
impl IdempotencyStore {
    fn get(&self, key: &str) -> Option<StoredResponse> {
        match self.entries.get(key)?.value() {
            Slot::Done(stored) if stored.stored_at.elapsed() < self.ttl => Some(stored.clone()),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds a reservation while the handler runs. Dropping it without
/// `complete` (error response, cancelled request) frees the key.
struct ReservationGuard {
    store: IdempotencyStore,
    key: String,
    armed: bool,
}

impl ReservationGuard {
    fn new(store: &IdempotencyStore, key: String) -> Self {
        Self {
            store: store.clone(),
            key,
            armed: true,
        }
    }

    fn complete(mut self, stored: StoredResponse) {
        self.store.complete(&self.key, stored);
        self.armed = false;
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if self.armed {
            self.store.release_in_flight(&self.key);
        }
    }
}

/// The validated `Idempotency-Key` of the current request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_parts(parts: &Parts) -> Result<Self, ApiError> {
        let raw = parts
            .headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .ok_or_else(|| ApiError::bad_request("Idempotency-Key header is required"))?;
        let value = raw
            .to_str()
            .map_err(|_| ApiError::bad_request("Idempotency-Key header must be ASCII"))?
            .trim();
        if value.is_empty() {
            return Err(ApiError::bad_request("Idempotency-Key header must not be empty"));
        }
        if value.len() > MAX_KEY_LEN {
            return Err(ApiError::bad_request(format!(
                "Idempotency-Key header must be at most {} characters",
                MAX_KEY_LEN
            )));
        }
        Ok(Self(value.to_string()))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(key) = parts.extensions.get::<IdempotencyKey>() {
            return Ok(key.clone());
        }
        Self::from_parts(parts)
    }
}

fn replay(stored: StoredResponse) -> Response {
    let mut resp = Response::new(axum::body::Body::from(stored.body));
    *resp.status_mut() = stored.status;
    if let Some(ct) = stored.content_type {
        resp.headers_mut().insert(CONTENT_TYPE, ct);
    }
    resp.headers_mut()
        .insert(IDEMPOTENT_REPLAY_HEADER, HeaderValue::from_static("true"));
    resp
}

/// Requires an `Idempotency-Key` on mutating requests and replays stored 2xx responses.
///
/// Must run inside the auth layer so the key can be scoped to the caller.
pub async fn idempotency_middleware(
    State(store): State<IdempotencyStore>,
    req: Request,
    next: Next,
) -> Response {
    let is_mutating = matches!(req.method().as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    if !is_mutating {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let key = match IdempotencyKey::from_parts(&parts) {
        Ok(key) => key,
        Err(err) => return err.into_response(),
    };
    let scope = parts
        .extensions
        .get::<AuthUser>()
        .map(|user| user.user_id.to_string())
        .unwrap_or_else(|| "anonymous".to_string());
    let slot_key = format!("{}:{}:{}", scope, parts.uri.path(), key.as_str());

    store.cleanup();

    match store.reserve(&slot_key) {
        Reservation::Replay(stored) => {
            debug!(idempotency_key = %key.as_str(), "replaying stored response");
            return replay(stored);
        }
        Reservation::InFlight => {
            return ServiceError::Conflict(
                "A request with this Idempotency-Key is already in progress".to_string(),
            )
            .into_response();
        }
        Reservation::Proceed => {}
    }

    let guard = ReservationGuard::new(&store, slot_key);
    parts.extensions.insert(key);
    let resp = next.run(Request::from_parts(parts, body)).await;

    if !resp.status().is_success() {
        return resp;
    }

    let (parts, body) = resp.into_parts();
    match body.collect().await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            guard.complete(StoredResponse {
                status: parts.status,
                body: bytes.clone(),
                content_type: parts.headers.get(CONTENT_TYPE).cloned(),
                stored_at: Instant::now(),
            });
            Response::from_parts(parts, axum::body::Body::from(bytes))
        }
        Err(err) => {
            warn!(error = %err, "failed to buffer response for idempotent replay");
            Response::from_parts(parts, axum::body::Body::empty())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        middleware::from_fn_with_state,
        routing::post,
        Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(store: IdempotencyStore, calls: Arc<AtomicUsize>, status: StatusCode) -> Router {
        Router::new()
            .route(
                "/pay",
                post(move |key: IdempotencyKey| {
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        (status, format!("{}:{}", key.as_str(), n))
                    }
                }),
            )
            .layer(from_fn_with_state(store, idempotency_middleware))
    }

    fn post_with_key(key: Option<&str>) -> axum::http::Request<Body> {
        let mut builder = axum::http::Request::builder().method("POST").uri("/pay");
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = app(IdempotencyStore::default(), calls.clone(), StatusCode::OK)
            .oneshot(post_with_key(None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_key_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = app(IdempotencyStore::default(), calls, StatusCode::OK)
            .oneshot(post_with_key(Some("   ")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn repeated_key_replays_first_response() {
        let store = IdempotencyStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let router = app(store, calls.clone(), StatusCode::OK);

        let first = router.clone().oneshot(post_with_key(Some("k-1"))).await.unwrap();
        let second = router.oneshot(post_with_key(Some("k-1"))).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(second.headers().contains_key(IDEMPOTENT_REPLAY_HEADER));
        let a = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        let b = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(&a[..], b"k-1:1");
    }

    #[tokio::test]
    async fn failed_responses_are_not_stored() {
        let store = IdempotencyStore::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let router = app(store.clone(), calls.clone(), StatusCode::PAYMENT_REQUIRED);

        router.clone().oneshot(post_with_key(Some("k-2"))).await.unwrap();
        router.oneshot(post_with_key(Some("k-2"))).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn cancelled_request_frees_its_key() {
        let store = IdempotencyStore::default();
        let slow = Router::new()
            .route(
                "/pay",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    StatusCode::OK
                }),
            )
            .layer(from_fn_with_state(store.clone(), idempotency_middleware));

        let cut_off = tokio::time::timeout(
            Duration::from_millis(50),
            slow.oneshot(post_with_key(Some("k-3"))),
        )
        .await;
        assert!(cut_off.is_err());

        let calls = Arc::new(AtomicUsize::new(0));
        let retry = app(store, calls.clone(), StatusCode::OK)
            .oneshot(post_with_key(Some("k-3")))
            .await
            .unwrap();
        assert_eq!(retry.status(), StatusCode::OK);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn finished_key_is_not_released() {
        let store = IdempotencyStore::default();
        store.complete(
            "done",
            StoredResponse {
                status: StatusCode::OK,
                body: Bytes::from_static(b"{}"),
                content_type: None,
                stored_at: Instant::now(),
            },
        );
        store.release_in_flight("done");
        assert!(store.get("done").is_some());
    }

    #[test]
    fn in_flight_key_blocks_duplicate() {
        let store = IdempotencyStore::default();
        assert!(matches!(store.reserve("a"), Reservation::Proceed));
        assert!(matches!(store.reserve("a"), Reservation::InFlight));
        store.release_in_flight("a");
        assert!(matches!(store.reserve("a"), Reservation::Proceed));
    }

    #[test]
    fn expired_entries_are_cleaned_up() {
        let store = IdempotencyStore::new(Duration::from_millis(0));
        store.complete(
            "old",
            StoredResponse {
                status: StatusCode::OK,
                body: Bytes::from_static(b"{}"),
                content_type: None,
                stored_at: Instant::now(),
            },
        );
        assert!(store.get("old").is_none());
        store.cleanup();
        assert!(store.is_empty());
    }
}
