use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::crypto::{EcPublicJwk, KeyError, PublicKey};
use common::directory::{DirectoryError, RecipientKeyRecord, Registration};

use crate::http::api::client::{ApiError, ApiRequest};
use crate::http::api::{error_response, CallerId};
use crate::ServiceState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    pub device_id: String,
    pub encryption_public_key_jwk: EcPublicJwk,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_public_key_jwk: Option<EcPublicJwk>,
    pub algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterDeviceResponse {
    pub ok: bool,
}

#[tracing::instrument(skip_all, fields(device_id = %req.device_id))]
pub async fn register_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Json(req): Json<RegisterDeviceRequest>,
) -> Result<impl IntoResponse, RegisterDeviceError> {
    if req.device_id.is_empty() {
        return Err(RegisterDeviceError::InvalidRequest(
            "deviceId is required".into(),
        ));
    }
    let encryption_key = PublicKey::try_from(&req.encryption_public_key_jwk)?;
    let mut record = RecipientKeyRecord::new(&user_id, &req.device_id, encryption_key)
        .with_algorithm(req.algorithm);
    if let Some(jwk) = &req.signing_public_key_jwk {
        record = record.with_signing_key(PublicKey::try_from(jwk)?);
    }

    let registration = state.directory().register(record).await?;
    match registration {
        Registration::Created => tracing::info!(%user_id, "device registered"),
        Registration::Replaced => tracing::info!(%user_id, "device key replaced"),
    }

    Ok((
        http::StatusCode::OK,
        Json(RegisterDeviceResponse { ok: true }),
    )
        .into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum RegisterDeviceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("invalid public key: {0}")]
    InvalidKey(#[from] KeyError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl IntoResponse for RegisterDeviceError {
    fn into_response(self) -> Response {
        let status = match &self {
            RegisterDeviceError::InvalidRequest(_) | RegisterDeviceError::InvalidKey(_) => {
                http::StatusCode::BAD_REQUEST
            }
            RegisterDeviceError::Directory(DirectoryError::DeviceLimitExceeded { .. }) => {
                http::StatusCode::CONFLICT
            }
            RegisterDeviceError::Directory(e) => {
                tracing::error!(error = %e, "device registration failed");
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

impl ApiRequest for RegisterDeviceRequest {
    type Response = RegisterDeviceResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/devices")?;
        Ok(client.post(full_url).json(&self))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDeviceResponse {
    pub removed: bool,
}

#[tracing::instrument(skip_all)]
pub async fn remove_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Path(device_id): Path<String>,
) -> Result<impl IntoResponse, RemoveDeviceError> {
    let removed = state.directory().remove(&user_id, &device_id).await?;
    if !removed {
        return Err(RemoveDeviceError::NotFound(device_id));
    }
    tracing::info!(%user_id, %device_id, "device removed");

    Ok((
        http::StatusCode::OK,
        Json(RemoveDeviceResponse { removed }),
    )
        .into_response())
}

#[derive(Debug, thiserror::Error)]
pub enum RemoveDeviceError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl IntoResponse for RemoveDeviceError {
    fn into_response(self) -> Response {
        let status = match &self {
            RemoveDeviceError::NotFound(_) => http::StatusCode::NOT_FOUND,
            RemoveDeviceError::Directory(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveDeviceRequest {
    pub device_id: String,
}

impl ApiRequest for RemoveDeviceRequest {
    type Response = RemoveDeviceResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join(&format!("/api/v0/devices/{}", self.device_id))?;
        Ok(client.delete(full_url))
    }
}
