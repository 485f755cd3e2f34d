// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP adapter.
//!
//! Thin JSON surface over [`LifecycleController`]. Every route lives under
//! `/api`; errors are rendered as `{"detail": "..."}`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{error, info};

use crate::controller::{
    HealthReport, InstanceView, LifecycleController, PairingCodeView, ServerInfo,
};
use crate::error::Error;
use crate::registry::{Instance, InstanceStatus, NewInstance};

type AppState = Arc<LifecycleController>;

/// Engine error rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    /// HTTP status for the wrapped error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) | Error::InvalidState { .. } | Error::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::UpstreamUnreachable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(json!({ "detail": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LeaseRequest {
    duration_months: i64,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Build the API router.
pub fn router(controller: Arc<LifecycleController>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/server-info", get(server_info))
        .route("/login", post(login))
        .route("/instances", get(list_instances).post(create_instance))
        .route("/instances/{id}", get(get_instance).delete(delete_instance))
        .route("/instances/{id}/approve", post(approve_instance))
        .route("/instances/{id}/renew", post(renew_instance))
        .route("/instances/{id}/stop", post(stop_instance))
        .route("/instances/{id}/pairing-code", get(pairing_code))
        .route("/instances/{id}/regenerate-code", post(regenerate_code));

    Router::new().nest("/api", api).with_state(controller)
}

/// Serve the API on an already bound listener until `shutdown` flips to `true`.
pub async fn serve(
    listener: tokio::net::TcpListener,
    controller: Arc<LifecycleController>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP server listening");

    axum::serve(listener, router(controller))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn health(State(controller): State<AppState>) -> Json<HealthReport> {
    Json(controller.health().await)
}

async fn server_info(State(controller): State<AppState>) -> ApiResult<ServerInfo> {
    Ok(Json(controller.server_info().await?))
}

async fn login(State(controller): State<AppState>, Json(req): Json<LoginRequest>) -> Response {
    if controller.login(&req.username, &req.password) {
        Json(json!({ "success": true, "message": "Login successful" })).into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "Invalid credentials" })),
        )
            .into_response()
    }
}

async fn create_instance(
    State(controller): State<AppState>,
    Json(req): Json<NewInstance>,
) -> ApiResult<Instance> {
    Ok(Json(controller.create(req).await?))
}

async fn list_instances(
    State(controller): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<InstanceView>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<InstanceStatus>)
        .transpose()?;
    Ok(Json(controller.list(status).await?))
}

async fn get_instance(
    State(controller): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<InstanceView> {
    Ok(Json(controller.get(&id).await?))
}

async fn approve_instance(
    State(controller): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<Instance> {
    Ok(Json(controller.approve(&id, req.duration_months).await?))
}

async fn renew_instance(
    State(controller): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<LeaseRequest>,
) -> ApiResult<Instance> {
    Ok(Json(controller.renew(&id, req.duration_months).await?))
}

async fn stop_instance(
    State(controller): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Instance> {
    Ok(Json(controller.stop(&id).await?))
}

async fn delete_instance(
    State(controller): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    controller.delete(&id).await?;
    Ok(Json(json!({ "message": "Instance deleted", "id": id })))
}

async fn pairing_code(
    State(controller): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<PairingCodeView> {
    Ok(Json(controller.pairing_code(&id).await?))
}

async fn regenerate_code(
    State(controller): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    Ok(Json(controller.regenerate_code(&id).await?))
}
