use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::response::Response;
use http::header::AUTHORIZATION;
use http::request::Parts;
use http::StatusCode;
use subtle::ConstantTimeEq;

use super::error_response;
use crate::ServiceState;

/// Header carrying the authenticated caller's user id
///
/// Authentication happens in front of the relay; the relay trusts this header.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The calling user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for CallerId
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CallerId(v.to_string()))
            .ok_or_else(|| {
                error_response(
                    StatusCode::UNAUTHORIZED,
                    format!("missing {} header", USER_ID_HEADER),
                )
            })
    }
}

/// Proof that the request carries the configured completion credential
///
/// Only the auth adapter holds this credential, so only it can attach a
/// payload to a pending handshake. Requests are refused with 403 while no
/// credential is configured and with 401 when the bearer token is missing
/// or wrong.
#[derive(Debug, Clone, Copy)]
pub struct CompletionAuth;

#[async_trait]
impl FromRequestParts<ServiceState> for CompletionAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.completion_token() else {
            return Err(error_response(
                StatusCode::FORBIDDEN,
                "handshake completion is disabled",
            ));
        };

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .unwrap_or_default();

        if presented.is_empty() || !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            tracing::warn!("rejected handshake completion without a valid credential");
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "invalid completion credential",
            ));
        }

        Ok(CompletionAuth)
    }
}
