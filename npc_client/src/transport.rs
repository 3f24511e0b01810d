//! Transport abstraction.
//!
//! A transport performs one request/response exchange against a logical
//! backend route. It is stateless from the caller's point of view: no retries
//! and no timeout policy live here. Callers decide what a failure means
//! (fatal during bootstrap, swallowed during sync).
//!
//! The raw exchange moves `serde_json::Value`s; the typed helpers below
//! decode each route into its explicit response structure.

use std::fmt;

use async_trait::async_trait;
use npc_shared::protocol::{
    ActorId, InteractRequest, InteractResponse, NpcData, Route, SyncRequest, SyncResponse,
    WorldState,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure of a single exchange. Always carries a diagnostic message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The backend could not be reached or the connection broke.
    #[error("{route}: connection failed: {reason}")]
    Connection { route: String, reason: String },
    /// The backend answered with a non-success status.
    #[error("{route}: backend returned status {status}: {detail}")]
    Status {
        route: String,
        status: u16,
        detail: String,
    },
    /// The request could not be encoded.
    #[error("{route}: could not encode request: {reason}")]
    Encode { route: String, reason: String },
    /// The response body was not what the route promises.
    #[error("{route}: malformed response: {reason}")]
    Decode { route: String, reason: String },
}

impl TransportError {
    pub fn connection(route: &Route, reason: impl fmt::Display) -> Self {
        TransportError::Connection {
            route: route.path(),
            reason: reason.to_string(),
        }
    }

    pub fn status(route: &Route, status: u16, detail: impl Into<String>) -> Self {
        TransportError::Status {
            route: route.path(),
            status,
            detail: detail.into(),
        }
    }

    pub fn decode(route: &Route, reason: impl fmt::Display) -> Self {
        TransportError::Decode {
            route: route.path(),
            reason: reason.to_string(),
        }
    }

    /// Route path the failed exchange targeted.
    pub fn route(&self) -> &str {
        match self {
            TransportError::Connection { route, .. }
            | TransportError::Status { route, .. }
            | TransportError::Encode { route, .. }
            | TransportError::Decode { route, .. } => route,
        }
    }
}

/// Request/response exchange with the backend.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `payload` to `route` and returns the decoded response body.
    ///
    /// Read-only routes receive `Value::Null` as payload.
    async fn exchange(&self, route: &Route, payload: Value) -> Result<Value, TransportError>;
}

/// Extracts a human-readable message from an error body.
///
/// Understands `{"detail": "..."}` and `{"error": "..."}`; anything else is
/// rendered as compact JSON.
pub fn error_detail(body: &Value) -> String {
    ["detail", "error"]
        .iter()
        .find_map(|key| body.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match body {
            Value::String(s) => s.clone(),
            Value::Null => "no detail".to_string(),
            other => other.to_string(),
        })
}

async fn call<Req, Resp>(
    transport: &dyn Transport,
    route: Route,
    request: Option<&Req>,
) -> Result<Resp, TransportError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let payload = match request {
        Some(req) => serde_json::to_value(req).map_err(|e| TransportError::Encode {
            route: route.path(),
            reason: e.to_string(),
        })?,
        None => Value::Null,
    };
    let body = transport.exchange(&route, payload).await?;
    serde_json::from_value(body).map_err(|e| TransportError::decode(&route, e))
}

/// `world`: which actors exist.
pub async fn fetch_world(transport: &dyn Transport) -> Result<WorldState, TransportError> {
    call::<Value, _>(transport, Route::World, None).await
}

/// `npc/{id}`: initial data for one actor.
pub async fn fetch_npc(transport: &dyn Transport, id: &ActorId) -> Result<NpcData, TransportError> {
    call::<Value, _>(transport, Route::Npc(id.clone()), None).await
}

/// `unity/update`: upload a snapshot, receive per-actor updates.
pub async fn sync(
    transport: &dyn Transport,
    request: &SyncRequest,
) -> Result<SyncResponse, TransportError> {
    call(transport, Route::Sync, Some(request)).await
}

/// `interact`: player interaction with one actor.
pub async fn interact(
    transport: &dyn Transport,
    request: &InteractRequest,
) -> Result<InteractResponse, TransportError> {
    call(transport, Route::Interact, Some(request)).await
}
