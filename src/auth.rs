//! Session gate.
//!
//! Resolves the [`Principal`] behind a request from its session token
//! (`Authorization: Bearer <token>` or a `sid` cookie).  Handlers take
//! the [`Authenticated`] extractor and pass the principal explicitly to
//! every [`PayrollEngine`](crate::engine::PayrollEngine) call; a request
//! without a live session is rejected with `401` before reaching them.

use crate::error::{PayrollError, PayrollResult};
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sid";

/// The authenticated user on whose behalf an operation runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub email: String,
    pub role: String,
}

impl Principal {
    pub fn admin(email: impl Into<String>) -> Self {
        Principal {
            id: Uuid::new_v4().to_string(),
            email: email.into(),
            role: "admin".to_string(),
        }
    }
}

/// Resolves the session principal for a request, if any.
pub trait SessionGate: Send + Sync {
    fn current_principal(&self, headers: &HeaderMap) -> Option<Principal>;

    /// End the session carried by `headers`.  Returns whether one existed.
    fn end_session(&self, headers: &HeaderMap) -> bool;
}

/// Session token carried by the request: bearer token first, then cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if bearer.is_some() {
        return bearer;
    }
    headers
        .get("cookie")
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == SESSION_COOKIE).then_some(value)
            })
        })
}

/// In-memory token → principal map.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Principal>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session for `principal` and return its token.
    pub fn issue(&self, principal: Principal) -> PayrollResult<String> {
        let token = Uuid::new_v4().simple().to_string();
        self.register(token.clone(), principal)?;
        Ok(token)
    }

    /// Register a session under a caller-chosen token.
    pub fn register(&self, token: String, principal: Principal) -> PayrollResult<()> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| PayrollError::Storage("session registry lock poisoned".into()))?;
        debug!(principal = %principal.email, "session opened");
        sessions.insert(token, principal);
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions
            .write()
            .map(|mut sessions| sessions.remove(token).is_some())
            .unwrap_or(false)
    }

    pub fn lookup(&self, token: &str) -> Option<Principal> {
        self.sessions
            .read()
            .ok()
            .and_then(|sessions| sessions.get(token).cloned())
    }
}

impl SessionGate for SessionRegistry {
    fn current_principal(&self, headers: &HeaderMap) -> Option<Principal> {
        session_token(headers).and_then(|token| self.lookup(token))
    }

    fn end_session(&self, headers: &HeaderMap) -> bool {
        session_token(headers).map_or(false, |token| self.revoke(token))
    }
}

/// Extractor yielding the session principal, or `401 Unauthenticated`.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    Arc<dyn SessionGate>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = PayrollError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let gate = <Arc<dyn SessionGate> as FromRef<S>>::from_ref(state);
        gate.current_principal(&parts.headers)
            .map(Authenticated)
            .ok_or(PayrollError::Unauthenticated)
    }
}
