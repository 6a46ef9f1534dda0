use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::{info, warn};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(health))
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    database: bool,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    info!("GET /health - Health check");
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(e) => {
            warn!("Health check could not reach database: {}", e);
            false
        }
    };
    Json(Health {
        status: if database { "OK" } else { "DEGRADED" },
        database,
    })
}
