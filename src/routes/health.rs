// ABOUTME: Health check route reporting database reachability and backend wiring
// ABOUTME: Returns 503 when the database does not answer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Health check route for service monitoring

use crate::resources::ServerResources;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tracing::warn;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/health", get(Self::health))
            .with_state(resources)
    }

    async fn health(State(resources): State<Arc<ServerResources>>) -> impl IntoResponse {
        let database = resources.database.health_check().await;
        if let Err(e) = &database {
            warn!(error = %e, "Health check: database unavailable");
        }
        let status = if database.is_ok() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };

        (
            status,
            Json(serde_json::json!({
                "status": if database.is_ok() { "healthy" } else { "degraded" },
                "database": if database.is_ok() { "ok" } else { "unavailable" },
                "rateLimitBackend": resources.rate_limiter.store().backend_name(),
                "providers": resources.providers.names(),
                "searchEnabled": resources.search.is_enabled(),
                "activeGenerations": resources.generations.active_count(),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
    }
}
