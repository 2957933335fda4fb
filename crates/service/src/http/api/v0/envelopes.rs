use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::envelope::{ContentEnvelope, EnvelopeError, EnvelopeStoreError, WrappedKeyEntry};

use crate::http::api::client::{ApiError, ApiRequest};
use crate::http::api::{error_response, CallerId};
use crate::ServiceState;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PutEnvelopeResponse {
    pub id: Uuid,
}

#[tracing::instrument(skip_all, fields(%user_id))]
pub async fn put_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Json(envelope): Json<ContentEnvelope>,
) -> Result<impl IntoResponse, EnvelopeApiError> {
    authorize(&user_id, &envelope)?;
    if envelope.sender_device_id().is_none() {
        return Err(EnvelopeApiError::InvalidRequest(
            "metadata.senderDeviceId is required".into(),
        ));
    }
    let wraps = envelope.wrapped_keys().len();
    let id = state.envelopes().put(envelope).await?;
    tracing::info!(%id, wraps, "envelope stored");

    Ok((http::StatusCode::OK, Json(PutEnvelopeResponse { id })).into_response())
}

#[derive(Debug, Clone)]
pub struct PutEnvelopeRequest {
    pub envelope: ContentEnvelope,
}

impl ApiRequest for PutEnvelopeRequest {
    type Response = PutEnvelopeResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/envelopes")?;
        Ok(client.post(full_url).json(&self.envelope))
    }
}

#[tracing::instrument(skip_all, fields(%id))]
pub async fn get_handler(
    State(state): State<ServiceState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, EnvelopeApiError> {
    let envelope = state
        .envelopes()
        .get(id)
        .await?
        .ok_or(EnvelopeApiError::NotFound(id))?;
    Ok((http::StatusCode::OK, Json(envelope)).into_response())
}

#[derive(Debug, Clone, Copy)]
pub struct GetEnvelopeRequest {
    pub id: Uuid,
}

impl ApiRequest for GetEnvelopeRequest {
    type Response = ContentEnvelope;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!("/api/v0/envelopes/{}", self.id))?;
        Ok(client.get(full_url))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendWrapResponse {
    pub ok: bool,
}

/// Backfill path: only the envelope's author may add recipients
#[tracing::instrument(skip_all, fields(%id, %user_id))]
pub async fn append_wrap_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Path(id): Path<Uuid>,
    Json(entry): Json<WrappedKeyEntry>,
) -> Result<impl IntoResponse, EnvelopeApiError> {
    let envelope = state
        .envelopes()
        .get(id)
        .await?
        .ok_or(EnvelopeApiError::NotFound(id))?;
    authorize(&user_id, &envelope)?;

    let recipient_device_id = entry.recipient_device_id.clone();
    state.envelopes().append_wrap(id, entry).await?;
    tracing::info!(recipient_device_id, "wrap appended");

    Ok((http::StatusCode::OK, Json(AppendWrapResponse { ok: true })).into_response())
}

#[derive(Debug, Clone)]
pub struct AppendWrapRequest {
    pub id: Uuid,
    pub entry: WrappedKeyEntry,
}

impl ApiRequest for AppendWrapRequest {
    type Response = AppendWrapResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!("/api/v0/envelopes/{}/wraps", self.id))?;
        Ok(client.post(full_url).json(&self.entry))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoredQuery {
    pub device_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthoredResponse {
    pub ids: Vec<Uuid>,
}

/// Envelopes authored by one of the caller's devices, oldest first
#[tracing::instrument(skip_all, fields(%user_id))]
pub async fn authored_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Query(query): Query<AuthoredQuery>,
) -> Result<impl IntoResponse, EnvelopeApiError> {
    let ids = state
        .envelopes()
        .authored_by(&user_id, &query.device_id)
        .await?;
    Ok((http::StatusCode::OK, Json(AuthoredResponse { ids })).into_response())
}

#[derive(Debug, Clone)]
pub struct AuthoredRequest {
    pub device_id: String,
}

impl ApiRequest for AuthoredRequest {
    type Response = AuthoredResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/envelopes")?;
        Ok(client
            .get(full_url)
            .query(&[("deviceId", self.device_id.as_str())]))
    }
}

fn authorize(user_id: &str, envelope: &ContentEnvelope) -> Result<(), EnvelopeApiError> {
    match envelope.sender_user_id() {
        Some(sender) if sender == user_id => Ok(()),
        Some(_) => Err(EnvelopeApiError::Forbidden),
        None => Err(EnvelopeApiError::InvalidRequest(
            "metadata.senderUserId is required".into(),
        )),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeApiError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("caller is not the envelope author")]
    Forbidden,
    #[error("envelope not found: {0}")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] EnvelopeStoreError),
}

impl IntoResponse for EnvelopeApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            EnvelopeApiError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            EnvelopeApiError::Forbidden => http::StatusCode::FORBIDDEN,
            EnvelopeApiError::NotFound(_) | EnvelopeApiError::Store(EnvelopeStoreError::NotFound(_)) => {
                http::StatusCode::NOT_FOUND
            }
            EnvelopeApiError::Store(EnvelopeStoreError::Envelope(
                EnvelopeError::DuplicateRecipient { .. },
            )) => http::StatusCode::CONFLICT,
            EnvelopeApiError::Store(e) => {
                tracing::error!(error = %e, "envelope store failed");
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}
