// ABOUTME: Chat route handlers for streaming generation and chat management
// ABOUTME: Generate streams SSE events; abort, save-partial and status act on a generation id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Chat routes
//!
//! `POST /api/chat/generate` answers with an SSE stream once admission passed and
//! with a structured JSON error otherwise. The generation id travels in the
//! `x-generation-id` response header.

use crate::constants::headers::{FORWARDED_FOR, GENERATION_ID};
use crate::errors::AppError;
use crate::ledger::derive_title;
use crate::models::{Chat, Message};
use crate::resources::ServerResources;
use crate::services::generation::GenerationPipeline;
use crate::utils::sanitize::sanitize_user_content;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tracing::warn;
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to create a chat
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    /// Optional title
    #[serde(default)]
    pub title: Option<String>,
    /// Default model alias; the catalog's first alias when absent
    #[serde(default)]
    pub default_model: Option<String>,
}

/// Chats of the caller
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatListResponse {
    /// Chats, most recently updated first
    pub chats: Vec<Chat>,
    /// Total count
    pub total: usize,
}

/// Messages of a chat
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageListResponse {
    /// Chat id
    pub chat_id: String,
    /// Messages in append order
    pub messages: Vec<Message>,
}

/// Result of saving a partial generation
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePartialResponse {
    /// Persisted assistant message id
    pub message_id: String,
    /// Title set by this save
    pub title: Option<String>,
    /// Cost charged
    pub cost_micros: i64,
}

// ============================================================================
// Routes
// ============================================================================

/// Chat routes implementation
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            // Streaming generation
            .route("/api/chat/generate", post(Self::generate))
            .route(
                "/api/chat/generations/:generation_id",
                get(Self::generation_status),
            )
            .route(
                "/api/chat/generations/:generation_id/abort",
                post(Self::abort_generation),
            )
            .route(
                "/api/chat/generations/:generation_id/save-partial",
                post(Self::save_partial),
            )
            // Chat management
            .route("/api/chats", post(Self::create_chat))
            .route("/api/chats", get(Self::list_chats))
            .route("/api/chats/:chat_id/messages", get(Self::list_messages))
            .with_state(resources)
    }

    /// Admit a generation and stream its events
    async fn generate(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, AppError> {
        let client_key = client_key(&resources, &headers, connect_info.as_ref());
        let handle = GenerationPipeline::new(resources)
            .start(&headers, &client_key, &body)
            .await?;
        let generation_id = HeaderValue::from_str(&handle.generation_id)
            .map_err(|e| AppError::internal(format!("Invalid generation id header: {e}")))?;

        let mut events = handle.events;
        let stream = async_stream::stream! {
            while let Some(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(data) => yield Ok::<_, Infallible>(Event::default().data(data)),
                    Err(e) => warn!(kind = event.kind(), error = %e, "Failed to serialize event"),
                }
            }
        };

        let mut response = Sse::new(stream)
            .keep_alive(KeepAlive::default())
            .into_response();
        response
            .headers_mut()
            .insert(HeaderName::from_static(GENERATION_ID), generation_id);
        Ok(response)
    }

    async fn generation_status(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
        Path(generation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let pipeline = GenerationPipeline::new(Arc::clone(&resources));
        let identity = pipeline
            .authenticate(&headers, &client_key(&resources, &headers, connect_info.as_ref()))
            .await?;
        let record = resources.jobs.get_for_owner(&generation_id, &identity)?;
        Ok((StatusCode::OK, Json(record)).into_response())
    }

    async fn abort_generation(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
        Path(generation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let pipeline = GenerationPipeline::new(Arc::clone(&resources));
        let identity = pipeline
            .authenticate(&headers, &client_key(&resources, &headers, connect_info.as_ref()))
            .await?;
        resources.generations.abort(&generation_id, &identity)?;
        Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "generationId": generation_id, "aborting": true })),
        )
            .into_response())
    }

    async fn save_partial(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
        Path(generation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let pipeline = GenerationPipeline::new(resources.clone());
        let identity = pipeline
            .authenticate(&headers, &client_key(&resources, &headers, connect_info.as_ref()))
            .await?;
        let report = pipeline.save_partial(&identity, &generation_id).await?;
        let message_id = report
            .message_id
            .ok_or_else(|| AppError::internal("Saved partial has no message id"))?;

        Ok((
            StatusCode::CREATED,
            Json(SavePartialResponse {
                message_id,
                title: report.title,
                cost_micros: report.cost_micros,
            }),
        )
            .into_response())
    }

    async fn create_chat(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<Response, AppError> {
        let pipeline = GenerationPipeline::new(Arc::clone(&resources));
        let identity = pipeline
            .authenticate(&headers, &client_key(&resources, &headers, connect_info.as_ref()))
            .await?;

        let request: CreateChatRequest = if body.is_empty() {
            CreateChatRequest::default()
        } else {
            serde_json::from_slice(&body)
                .map_err(|e| AppError::invalid_input(format!("Malformed request body: {e}")))?
        };

        let default_model = match request.default_model {
            Some(alias) => resources
                .catalog
                .get(alias.trim())
                .map(|spec| spec.alias.clone())
                .ok_or_else(|| {
                    AppError::invalid_field("defaultModel", format!("Unknown model '{alias}'"))
                })?,
            None => resources
                .catalog
                .aliases()
                .next()
                .map(ToOwned::to_owned)
                .ok_or_else(|| AppError::config("Model catalog is empty"))?,
        };
        let title = request
            .title
            .map(|title| sanitize_user_content(&title))
            .filter(|title| !title.is_empty())
            .map(|title| derive_title(&title));

        let chat = resources
            .chats
            .create_chat(
                &identity,
                &Uuid::new_v4().to_string(),
                title.as_deref(),
                &default_model,
            )
            .await?;
        Ok((StatusCode::CREATED, Json(chat)).into_response())
    }

    async fn list_chats(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let pipeline = GenerationPipeline::new(Arc::clone(&resources));
        let identity = pipeline
            .authenticate(&headers, &client_key(&resources, &headers, connect_info.as_ref()))
            .await?;
        let chats = resources.chats.list_chats(&identity).await?;
        Ok((
            StatusCode::OK,
            Json(ChatListResponse {
                total: chats.len(),
                chats,
            }),
        )
            .into_response())
    }

    async fn list_messages(
        State(resources): State<Arc<ServerResources>>,
        connect_info: Option<ConnectInfo<SocketAddr>>,
        headers: HeaderMap,
        Path(chat_id): Path<String>,
    ) -> Result<Response, AppError> {
        let pipeline = GenerationPipeline::new(Arc::clone(&resources));
        let identity = pipeline
            .authenticate(&headers, &client_key(&resources, &headers, connect_info.as_ref()))
            .await?;

        let chat = resources
            .chats
            .get_chat(&chat_id)
            .await?
            .filter(|chat| chat.owner == identity)
            .ok_or_else(|| AppError::not_found("Chat"))?;
        let messages = resources.chats.list_messages(&chat.id).await?;
        Ok((
            StatusCode::OK,
            Json(MessageListResponse {
                chat_id: chat.id,
                messages,
            }),
        )
            .into_response())
    }
}

/// Key for anonymous rate limiting
///
/// The first `x-forwarded-for` hop is used only when the deployment trusts its
/// proxy; otherwise the peer address.
fn client_key(
    resources: &ServerResources,
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    client_key_from(
        resources.config.rate_limits.trust_forwarded_for,
        headers,
        connect_info,
    )
}

fn client_key_from(
    trust_forwarded_for: bool,
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    let forwarded = || {
        headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned)
    };
    trust_forwarded_for
        .then(forwarded)
        .flatten()
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_owned())
}
