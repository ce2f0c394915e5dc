// ABOUTME: Router assembly and HTTP server lifecycle for the Parley gateway
// ABOUTME: Merges chat and health routes under tracing, request-id, body-limit and CORS layers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::constants::headers::GENERATION_ID;
use crate::constants::limits::MAX_REQUEST_BODY_BYTES;
use crate::resources::ServerResources;
use crate::routes::{ChatRoutes, HealthRoutes};
use anyhow::{Context, Result};
use axum::Router;
use http::{header, HeaderName, Method};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Assemble every route with the shared middleware stack
pub fn build_router(resources: Arc<ServerResources>) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .merge(ChatRoutes::routes(Arc::clone(&resources)))
        .merge(HealthRoutes::routes(resources))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
                .layer(setup_cors()),
        )
}

fn setup_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            header::ORIGIN,
        ])
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers([
            HeaderName::from_static(GENERATION_ID),
            HeaderName::from_static(REQUEST_ID_HEADER),
        ])
}

/// Serve until ctrl-c or until `resources.shutdown` is cancelled
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails
pub async fn run_server(resources: Arc<ServerResources>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Parley listening on http://{addr}");

    let shutdown = resources.shutdown.clone();
    let app = build_router(resources);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            () = shutdown.cancelled() => {}
        }
    })
    .await
    .context("HTTP server failed")
}
