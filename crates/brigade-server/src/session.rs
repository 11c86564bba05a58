//! Session context extraction.
//!
//! Every action names its caller explicitly through three headers:
//!
//! | Header | Required | Meaning |
//! |--------|----------|---------|
//! | `x-user-id` | yes | signed-in user |
//! | `x-role` | yes | the user's role |
//! | `x-session-id` | no | the client's session UUID; a fresh one is minted when absent |
//!
//! A client that also holds a `/ws/sync` socket sends the same session id
//! there, so its own actions are not echoed back as hints.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use brigade_core::review::SessionContext;
use brigade_types::{RoleName, SessionId, UserId};
use uuid::Uuid;

use crate::error::ApiError;

/// Header naming the acting user.
pub const USER_HEADER: &str = "x-user-id";
/// Header naming the acting user's role.
pub const ROLE_HEADER: &str = "x-role";
/// Header carrying the client session id.
pub const SESSION_HEADER: &str = "x-session-id";

/// The caller of a request.
#[derive(Debug, Clone)]
pub struct Caller(pub SessionContext);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        context_from_headers(&parts.headers).map(Self)
    }
}

/// Build a session context from request headers.
///
/// # Errors
///
/// Returns [`ApiError::MissingSession`] if the user or role header is
/// missing or empty, or the session id is not a UUID.
pub fn context_from_headers(headers: &HeaderMap) -> Result<SessionContext, ApiError> {
    let user = required(headers, USER_HEADER)?;
    let role = required(headers, ROLE_HEADER)?;
    let session_id = match header(headers, SESSION_HEADER) {
        Some(raw) => raw
            .parse::<Uuid>()
            .map(SessionId::from)
            .map_err(|e| ApiError::MissingSession(format!("{SESSION_HEADER}: {e}")))?,
        None => SessionId::new(),
    };
    Ok(SessionContext {
        session_id,
        user_id: UserId::from(user),
        role: RoleName::from(role),
    })
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    header(headers, name).ok_or_else(|| ApiError::MissingSession(format!("{name} header required")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn session_id_is_kept_when_given() {
        let id = "0190f5c2-7a2e-7cc3-8f0e-3c6b5f0d2a11";
        let ctx = context_from_headers(&headers(&[
            (USER_HEADER, "kim"),
            (ROLE_HEADER, "kitchen"),
            (SESSION_HEADER, id),
        ]))
        .unwrap();
        assert_eq!(ctx.session_id.to_string(), id);
        assert_eq!(ctx.user_id, UserId::from("kim"));
        assert_eq!(ctx.role, RoleName::from("kitchen"));
    }

    #[test]
    fn role_is_required() {
        let err = context_from_headers(&headers(&[(USER_HEADER, "kim")])).unwrap_err();
        assert!(matches!(err, ApiError::MissingSession(_)));
    }

    #[test]
    fn malformed_session_id_is_refused() {
        let err = context_from_headers(&headers(&[
            (USER_HEADER, "kim"),
            (ROLE_HEADER, "kitchen"),
            (SESSION_HEADER, "tab-1"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ApiError::MissingSession(_)));
    }
}
