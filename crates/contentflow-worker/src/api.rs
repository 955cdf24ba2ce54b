/*
 *  Copyright 2025-2026 ContentFlow Authors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Health and status surface.
//!
//! A small axum app running as a sidecar task of the supervisor process:
//!
//! - `GET /` returns the service identity
//! - `GET /health` is liveness (200 whenever the supervisor process is up)
//! - `GET /status` is the live fleet snapshot from the supervisor

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::supervisor::{RoleStatus, Supervisor};

#[derive(Clone)]
pub struct ApiState {
    pub worker_name: String,
    pub supervisor: Arc<Supervisor>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    worker_name: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    worker_name: String,
    running: bool,
    timestamp: String,
    processing_workers: RoleStatus,
    source_workers: RoleStatus,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

async fn root(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "service": "ContentFlow Worker API",
        "version": env!("CARGO_PKG_VERSION"),
        "worker_name": state.worker_name,
    }))
}

async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        worker_name: state.worker_name,
    })
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.supervisor.status().await;
    Json(StatusResponse {
        worker_name: state.worker_name,
        running: snapshot.running,
        timestamp: Utc::now().to_rfc3339(),
        processing_workers: snapshot.processing_workers,
        source_workers: snapshot.source_workers,
    })
}

/// Serves the API until the stop signal fires. Bind failures are logged and
/// tolerated; the fleet runs fine without its status surface.
pub async fn serve(state: ApiState, host: String, port: u16, mut stop: watch::Receiver<bool>) {
    let addr = format!("{host}:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(addr = %addr, error = %e, "status API failed to bind");
            return;
        }
    };
    info!(addr = %addr, "status API listening");

    let app = router(state);
    let shutdown = async move {
        let _ = stop.changed().await;
    };
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        warn!(error = %e, "status API server error");
    }
}
