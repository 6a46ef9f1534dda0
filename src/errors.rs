use axum::http::StatusCode;
use axum::response::IntoResponse;
use thiserror::Error;

/// Failure classes for a single scheduler tick.
///
/// Every variant except `FatalConfig` is contained to the tick that produced it;
/// the loop logs it and carries on.
#[derive(Debug, Error)]
pub enum EtlError {
    /// State store, cache, database or network unreachable. Retried next tick.
    #[error("transient infrastructure error: {0}")]
    TransientInfra(String),

    /// No credentials configured, or the upstream rejected them.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The upstream call succeeded but returned something we cannot use.
    #[error("upstream data error: {0}")]
    UpstreamData(String),

    /// Another scheduler instance owns the job right now, or our lease expired.
    #[error("lease lost for job {0}")]
    LeaseLost(String),

    #[error("fatal configuration error: {0}")]
    FatalConfig(String),
}

impl EtlError {
    pub fn is_transient(&self) -> bool {
        matches!(self, EtlError::TransientInfra(_))
    }
}

impl From<sqlx::Error> for EtlError {
    fn from(value: sqlx::Error) -> Self {
        EtlError::TransientInfra(format!("database: {}", value))
    }
}

impl From<redis::RedisError> for EtlError {
    fn from(value: redis::RedisError) -> Self {
        EtlError::TransientInfra(format!("cache: {}", value))
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            EtlError::UpstreamData(value.to_string())
        } else {
            EtlError::TransientInfra(value.to_string())
        }
    }
}

/// Errors surfaced by the backend HTTP API.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found")]
    NotFound,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Dependency unavailable: {0}")]
    Unavailable(String),
    #[error("External error: {0}")]
    External(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg).into_response(),
            AppError::Db(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: sqlx::Error) -> Self {
        AppError::Db(value)
    }
}

impl From<EtlError> for AppError {
    fn from(value: EtlError) -> Self {
        match value {
            EtlError::LeaseLost(job) => AppError::Conflict(format!("lease held for {}", job)),
            EtlError::TransientInfra(msg) => AppError::Unavailable(msg),
            other => AppError::External(other.to_string()),
        }
    }
}
