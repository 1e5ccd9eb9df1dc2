use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use super::SharedState;
use crate::errors::GatewayError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub connected: bool,
    pub timestamp: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/query/execute", post(execute_query))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(cors)
}

pub async fn execute_query(
    State(state): State<SharedState>,
    body: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let query = match &body {
        Ok(Json(req)) => req.query.as_deref(),
        Err(rejection) => {
            log::debug!("[{request_id}] unreadable request body: {rejection}");
            None
        }
    };
    log::debug!("[{request_id}] execute: {}", query.unwrap_or_default());

    match state.execute(query).await {
        Ok(resp) => {
            log::info!("[{request_id}] query succeeded with {} result(s)", resp.count);
            Json(resp).into_response()
        }
        Err(err) => {
            match &err {
                GatewayError::Internal(cause) => {
                    log::error!("[{request_id}] query execution error: {cause}");
                }
                GatewayError::Execution(cause) => {
                    log::warn!("[{request_id}] query execution error: {cause}");
                }
                other => log::info!("[{request_id}] rejected ({}): {other}", other.id()),
            }
            err.into_response()
        }
    }
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        connected: state.is_connected(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}
