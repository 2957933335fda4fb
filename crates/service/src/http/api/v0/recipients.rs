use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reqwest::{Client, RequestBuilder, Url};
use serde::{Deserialize, Serialize};

use common::directory::{DirectoryError, RecipientKeyRecord};

use crate::http::api::client::{ApiError, ApiRequest};
use crate::http::api::error_response;
use crate::ServiceState;

/// Upper bound on user ids per lookup
const MAX_USERS_PER_LOOKUP: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsQuery {
    /// Comma separated user ids
    pub user_ids: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientsResponse {
    pub recipients: Vec<RecipientKeyRecord>,
}

#[tracing::instrument(skip_all)]
pub async fn handler(
    State(state): State<ServiceState>,
    Query(query): Query<RecipientsQuery>,
) -> Result<impl IntoResponse, RecipientsError> {
    let user_ids = parse_user_ids(&query.user_ids);
    if user_ids.is_empty() {
        return Err(RecipientsError::InvalidRequest(
            "userIds is required".into(),
        ));
    }
    if user_ids.len() > MAX_USERS_PER_LOOKUP {
        return Err(RecipientsError::InvalidRequest(format!(
            "at most {} userIds per lookup",
            MAX_USERS_PER_LOOKUP
        )));
    }

    let recipients = state.directory().list_for_users(&user_ids).await?;
    tracing::debug!(
        users = user_ids.len(),
        devices = recipients.len(),
        "resolved recipients"
    );

    Ok((http::StatusCode::OK, Json(RecipientsResponse { recipients })).into_response())
}

fn parse_user_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|seen| seen == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

#[derive(Debug, thiserror::Error)]
pub enum RecipientsError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl IntoResponse for RecipientsError {
    fn into_response(self) -> Response {
        let status = match &self {
            RecipientsError::InvalidRequest(_) => http::StatusCode::BAD_REQUEST,
            RecipientsError::Directory(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        };
        error_response(status, self.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RecipientsRequest {
    pub user_ids: Vec<String>,
}

impl ApiRequest for RecipientsRequest {
    type Response = RecipientsResponse;

    fn build_request(self, base_url: &Url, client: &Client) -> Result<RequestBuilder, ApiError> {
        let full_url = base_url.join("/api/v0/recipients")?;
        Ok(client
            .get(full_url)
            .query(&[("userIds", self.user_ids.join(","))]))
    }
}
