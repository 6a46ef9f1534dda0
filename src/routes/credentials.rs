use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::db::credential_queries;
use crate::errors::AppError;
use crate::models::{Credentials, Validation};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_credentials).post(save_credentials))
        .route("/status", post(credential_status))
}

#[derive(Serialize)]
struct Message {
    message: &'static str,
}

/// GET /api/credentials - 200 with the stored credentials, or 204 when none are saved
async fn get_credentials(State(state): State<AppState>) -> Result<Response, AppError> {
    match credential_queries::fetch(&state.pool).await? {
        Some(credentials) => Ok(Json(credentials).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

/// POST /api/credentials - create or replace
async fn save_credentials(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    credentials.validate().map_err(AppError::Validation)?;
    credential_queries::upsert(&state.pool, &credentials).await?;
    info!("Saved upstream credentials for {}", credentials.url);
    Ok((StatusCode::CREATED, Json(Message { message: "Credentials saved" })))
}

/// POST /api/credentials/status - try the given credentials upstream
async fn credential_status(
    State(state): State<AppState>,
    Json(credentials): Json<Credentials>,
) -> Result<(StatusCode, Json<Message>), AppError> {
    credentials.validate().map_err(AppError::Validation)?;

    match state.upstream.validate(&credentials).await? {
        Validation::Valid => Ok((StatusCode::OK, Json(Message { message: "Successful Connection" }))),
        Validation::Rejected { status } => Ok((
            rejection_status(status),
            Json(Message { message: "Unsuccessful Connection" }),
        )),
    }
}

/// Upstream error statuses pass through; anything else the login endpoint answers with
/// besides 200 is reported as a bad gateway.
fn rejection_status(upstream: u16) -> StatusCode {
    match StatusCode::from_u16(upstream) {
        Ok(status) if status.is_client_error() || status.is_server_error() => status,
        _ => StatusCode::BAD_GATEWAY,
    }
}
