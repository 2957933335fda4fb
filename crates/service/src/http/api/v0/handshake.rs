use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::crypto::{EcPublicJwk, KeyError, PublicKey};
use common::handshake::{CompletedHandshake, HandshakeError, HandshakeInit};

use crate::http::api::client::{ApiError, ApiRequest};
use crate::http::api::{error_response, CompletionAuth};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitHandshakeRequest {
    pub client_public_key_jwk: EcPublicJwk,
}

#[tracing::instrument(skip_all)]
pub async fn init_handler(
    State(state): State<ServiceState>,
    Json(req): Json<InitHandshakeRequest>,
) -> Result<impl IntoResponse, HandshakeApiError> {
    let client_public_key = PublicKey::try_from(&req.client_public_key_jwk)?;
    let init = state.handshakes().init(client_public_key).await?;
    Ok((http::StatusCode::OK, Json(init)).into_response())
}

impl ApiRequest for InitHandshakeRequest {
    type Response = HandshakeInit;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/handshake")?;
        Ok(client.post(full_url).json(&self))
    }
}

/// `{ready:false}` until the handshake is completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrieveHandshakeResponse {
    pub ready: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub completed: Option<CompletedHandshake>,
}

#[tracing::instrument(skip_all, fields(%id))]
pub async fn retrieve_handler(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HandshakeApiError> {
    let completed = state.handshakes().retrieve(id).await?;
    Ok((
        http::StatusCode::OK,
        Json(RetrieveHandshakeResponse {
            ready: completed.is_some(),
            completed,
        }),
    )
        .into_response())
}

#[derive(Debug, Clone)]
pub struct RetrieveHandshakeRequest {
    pub handshake_id: Uuid,
}

impl ApiRequest for RetrieveHandshakeRequest {
    type Response = RetrieveHandshakeResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!("/api/v0/handshake/{}", self.handshake_id))?;
        Ok(client.get(full_url))
    }
}

/// Attach the payload (for instance an issued bearer token) to a pending
/// handshake. The payload is sealed before it is stored. Only callers holding
/// the completion credential may do this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteHandshakeBody {
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteHandshakeResponse {
    pub ok: bool,
}

#[tracing::instrument(skip_all, fields(%id))]
pub async fn complete_handler(
    _auth: CompletionAuth,
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
    Json(body): Json<CompleteHandshakeBody>,
) -> Result<impl IntoResponse, HandshakeApiError> {
    let payload = serde_json::to_vec(&body.payload)?;
    state.handshakes().complete(id, &payload).await?;
    Ok((
        http::StatusCode::OK,
        Json(CompleteHandshakeResponse { ok: true }),
    )
        .into_response())
}

#[derive(Debug, Clone)]
pub struct CompleteHandshakeRequest {
    pub handshake_id: Uuid,
    pub payload: serde_json::Value,
    /// Sent as the bearer credential
    pub completion_token: String,
}

impl ApiRequest for CompleteHandshakeRequest {
    type Response = CompleteHandshakeResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!(
            "/api/v0/handshake/{}/complete",
            self.handshake_id
        ))?;
        Ok(client
            .post(full_url)
            .bearer_auth(&self.completion_token)
            .json(&CompleteHandshakeBody {
                payload: self.payload,
            }))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HandshakeApiError {
    #[error("invalid public key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}

impl IntoResponse for HandshakeApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            HandshakeApiError::InvalidKey(_) | HandshakeApiError::InvalidPayload(_) => {
                http::StatusCode::BAD_REQUEST
            }
            HandshakeApiError::Handshake(e) => match e {
                HandshakeError::InvalidHandshake(_) | HandshakeError::NotFound(_) => {
                    http::StatusCode::NOT_FOUND
                }
                HandshakeError::ExpiredSession(_) => http::StatusCode::GONE,
                HandshakeError::AlreadyCompleted(_) => http::StatusCode::CONFLICT,
                HandshakeError::Key(_) => http::StatusCode::BAD_REQUEST,
                HandshakeError::Store(_) | HandshakeError::Secret(_) => {
                    tracing::error!(error = %e, "handshake failed");
                    http::StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        };
        error_response(status, self.to_string())
    }
}
