//! Monitor target management endpoints (API key protected)
//!
//! Endpoints:
//!   POST / -> Register a target
//!   GET / -> List enabled targets
//!   GET /{id} -> Target with its most recent ticks
//!   DELETE /{id} -> Soft-disable a target

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::database::{MonitorTarget, NewTarget, PersistenceGateway, StoreError, Tick};

const DEFAULT_TICK_LIMIT: i64 = 50;
const MAX_TICK_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct TargetApiState {
    pub store: Arc<dyn PersistenceGateway>,
}

#[derive(Debug, Serialize)]
pub struct TargetListResponse {
    pub targets: Vec<MonitorTarget>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct TargetDetailResponse {
    pub target: MonitorTarget,
    pub ticks: Vec<Tick>,
}

#[derive(Debug, Deserialize)]
pub struct TickQuery {
    pub limit: Option<i64>,
}

fn validate_target(target: &NewTarget) -> Result<(), String> {
    let parsed = Url::parse(&target.url).map_err(|e| format!("invalid url: {}", e))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme: {}", parsed.scheme()));
    }
    if parsed.host_str().is_none() {
        return Err("url must have a host".to_string());
    }
    if target.title.trim().is_empty() {
        return Err("title cannot be empty".to_string());
    }
    Ok(())
}

/// Failure on a target route, rendered as `{success: false, message}`
#[derive(Debug, Error)]
pub enum TargetApiError {
    #[error("{0}")]
    Invalid(String),
    #[error("Target {0} not found")]
    NotFound(i32),
    #[error("Internal Server Error")]
    Persistence(#[from] StoreError),
}

impl IntoResponse for TargetApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            TargetApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            TargetApiError::NotFound(_) => StatusCode::NOT_FOUND,
            TargetApiError::Persistence(e) => {
                error!("Target storage failure: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(json!({ "success": false, "message": self.to_string() })),
        )
            .into_response()
    }
}

async fn create_target(
    State(state): State<TargetApiState>,
    request: Result<Json<NewTarget>, JsonRejection>,
) -> Result<(StatusCode, Json<MonitorTarget>), TargetApiError> {
    let Json(request) =
        request.map_err(|e| TargetApiError::Invalid(format!("Invalid request body: {}", e)))?;

    if let Err(reason) = validate_target(&request) {
        warn!("Rejected target {}: {}", request.url, reason);
        return Err(TargetApiError::Invalid(reason));
    }

    let target = state.store.create_target(&request).await?;
    info!(target_id = %target.id, url = %target.url, "Monitor target created");
    Ok((StatusCode::CREATED, Json(target)))
}

async fn list_targets(
    State(state): State<TargetApiState>,
) -> Result<Json<TargetListResponse>, TargetApiError> {
    let targets = state.store.enabled_targets().await?;

    Ok(Json(TargetListResponse {
        count: targets.len(),
        targets,
    }))
}

async fn get_target(
    State(state): State<TargetApiState>,
    Path(id): Path<i32>,
    Query(query): Query<TickQuery>,
) -> Result<Json<TargetDetailResponse>, TargetApiError> {
    let target = state
        .store
        .get_target(id)
        .await?
        .ok_or(TargetApiError::NotFound(id))?;

    let limit = query
        .limit
        .unwrap_or(DEFAULT_TICK_LIMIT)
        .clamp(1, MAX_TICK_LIMIT);

    let ticks = state.store.recent_ticks(id, limit).await?;

    Ok(Json(TargetDetailResponse { target, ticks }))
}

async fn disable_target(
    State(state): State<TargetApiState>,
    Path(id): Path<i32>,
) -> Result<Json<MonitorTarget>, TargetApiError> {
    let target = state
        .store
        .disable_target(id)
        .await?
        .ok_or(TargetApiError::NotFound(id))?;

    info!(target_id = %id, "Monitor target disabled");
    Ok(Json(target))
}

/// Create target management router
pub fn create_router(state: TargetApiState) -> Router {
    Router::new()
        .route("/", get(list_targets).post(create_target))
        .route("/{id}", get(get_target).delete(disable_target))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::MemoryStore;

    fn new_target(url: &str, title: &str) -> NewTarget {
        NewTarget {
            url: url.to_string(),
            title: title.to_string(),
            description: None,
        }
    }

    #[test]
    fn test_validate_target() {
        assert!(validate_target(&new_target("https://example.com", "Example")).is_ok());
        assert!(validate_target(&new_target("ftp://example.com", "Example")).is_err());
        assert!(validate_target(&new_target("example.com", "Example")).is_err());
        assert!(validate_target(&new_target("https://example.com", "  ")).is_err());
    }

    #[tokio::test]
    async fn test_create_list_disable() {
        let state = TargetApiState {
            store: Arc::new(MemoryStore::new()),
        };

        let (status, Json(created)) = create_target(
            State(state.clone()),
            Ok(Json(new_target("https://example.com", "Example"))),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);

        let Json(list) = list_targets(State(state.clone())).await.unwrap();
        assert_eq!(list.count, 1);

        let Json(detail) = get_target(
            State(state.clone()),
            Path(created.id),
            Query(TickQuery { limit: None }),
        )
        .await
        .unwrap();
        assert_eq!(detail.target.url, "https://example.com");
        assert!(detail.ticks.is_empty());

        let Json(disabled) = disable_target(State(state.clone()), Path(created.id))
            .await
            .unwrap();
        assert!(disabled.disabled);

        let Json(list) = list_targets(State(state.clone())).await.unwrap();
        assert_eq!(list.count, 0);

        let missing = disable_target(State(state), Path(999)).await;
        assert!(matches!(missing, Err(TargetApiError::NotFound(999))));
    }

    #[tokio::test]
    async fn test_errors_use_envelope() {
        let state = TargetApiState {
            store: Arc::new(MemoryStore::new()),
        };

        let err = create_target(
            State(state.clone()),
            Ok(Json(new_target("ftp://example.com", "Example"))),
        )
        .await
        .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "unsupported scheme: ftp");

        let err = get_target(State(state), Path(42), Query(TickQuery { limit: None }))
            .await
            .unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Target 42 not found");
    }
}
