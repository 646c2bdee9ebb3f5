//! Request handlers.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, State};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiError;
use crate::{AppState, Requester};

/// Response of `GET /api/log/key`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LogKeyResponse {
    /// Hex-encoded public log key.
    pub key: String,
}

/// Body of `POST /api/import`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImportRequest {
    /// Object identifier, e.g. `proto1:<hex hash>`.
    pub object: String,
}

/// Response of `POST /api/import`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ImportResponse {
    /// Hex content hash of the object being imported.
    pub hash: String,
}

pub(crate) async fn log_key(State(state): State<AppState>) -> Json<LogKeyResponse> {
    Json(LogKeyResponse {
        key: hex::encode(state.node.log_key().as_bytes()),
    })
}

pub(crate) async fn import(
    State(state): State<AppState>,
    Extension(Requester(requester)): Extension<Requester>,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<Json<ImportResponse>, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    let object = request.object.trim();
    if object.is_empty() {
        return Err(ApiError::InvalidRequest("object is required".into()));
    }

    let hash = state.node.import(object, requester).await?;
    info!(object, requester, %hash, "import accepted");
    Ok(Json(ImportResponse { hash: hash.to_hex() }))
}
