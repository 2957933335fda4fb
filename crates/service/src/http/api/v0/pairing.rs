use std::time::Duration;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::pairing::{PairingError, SealedTicket};

use crate::http::api::client::{ApiError, ApiRequest};
use crate::http::api::{error_response, CallerId};
use crate::ServiceState;

/// A sealed ticket parked by the primary device. The pairing secret never
/// reaches the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitPairingRequest {
    pub device_id: String,
    #[serde(flatten)]
    pub sealed: SealedTicket,
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitPairingResponse {
    pub token: String,
}

#[tracing::instrument(skip_all, fields(device_id = %req.device_id))]
pub async fn init_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Json(req): Json<InitPairingRequest>,
) -> Result<impl IntoResponse, PairingApiError> {
    let token = state
        .pairing()
        .park_ticket(
            &req.device_id,
            req.sealed,
            Duration::from_millis(req.ttl_ms),
        )
        .await?;
    tracing::debug!(%user_id, "pairing initiated");

    Ok((http::StatusCode::OK, Json(InitPairingResponse { token })).into_response())
}

impl ApiRequest for InitPairingRequest {
    type Response = InitPairingResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/pairing")?;
        Ok(client.post(full_url).json(&self))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimPairingRequest {
    pub token: String,
}

#[tracing::instrument(skip_all)]
pub async fn claim_handler(
    State(state): State<ServiceState>,
    CallerId(user_id): CallerId,
    Json(req): Json<ClaimPairingRequest>,
) -> Result<impl IntoResponse, PairingApiError> {
    let ticket = state.pairing().claim_ticket(&req.token).await?;
    tracing::debug!(%user_id, primary = %ticket.device_id, "pairing claimed");

    Ok((http::StatusCode::OK, Json(ticket.sealed)).into_response())
}

impl ApiRequest for ClaimPairingRequest {
    type Response = SealedTicket;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/pairing/claim")?;
        Ok(client.post(full_url).json(&self))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PairingApiError {
    #[error(transparent)]
    Pairing(#[from] PairingError),
}

impl IntoResponse for PairingApiError {
    fn into_response(self) -> Response {
        let PairingApiError::Pairing(e) = &self;
        let status = match e {
            // expired tickets are indistinguishable from unknown ones on the wire
            PairingError::NotFound | PairingError::ExpiredSession => {
                http::StatusCode::NOT_FOUND
            }
            PairingError::InvalidTtl { .. } => http::StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!(error = %e, "pairing failed");
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let message = match e {
            PairingError::ExpiredSession => PairingError::NotFound.to_string(),
            _ => self.to_string(),
        };
        error_response(status, message)
    }
}
