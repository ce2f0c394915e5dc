// ABOUTME: End-to-end tests for the streaming generation route
// ABOUTME: Covers admission rejections, search augmentation, in-band failures, abort and save-partial
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

mod common;
mod helpers;

use axum::http::StatusCode;
use futures_util::StreamExt;
use helpers::axum_test::{AxumTestRequest, AxumTestResponse};
use helpers::stubs::{search_result, ScriptedProvider, StubSearchProvider};
use parley_server::budget::BudgetStore;
use parley_server::config::environment::ServerConfig;
use parley_server::database::{ActivityStore, UsageStore};
use parley_server::llm::{LlmProvider, MessageRole};
use parley_server::models::{ActionKind, IdentityId, PlanId};
use parley_server::resources::ServerResources;
use parley_server::search::{sources::split_marker, SearchProvider};
use parley_server::server::build_router;
use parley_server::services::jobs::{poll_until_settled, JobStatus, PollConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

async fn gateway(
    config: ServerConfig,
    provider: &Arc<ScriptedProvider>,
    search: Option<&Arc<StubSearchProvider>>,
) -> Arc<ServerResources> {
    let mut builder = common::test_builder(config)
        .await
        .unwrap()
        .llm_provider(Arc::clone(provider) as Arc<dyn LlmProvider>);
    if let Some(search) = search {
        builder = builder.search_provider(Arc::clone(search) as Arc<dyn SearchProvider>);
    }
    builder.build().await.unwrap()
}

fn generate_body(chat_id: &str, model: &str, content: &str, web_search: bool) -> Value {
    json!({
        "chatId": chat_id,
        "model": model,
        "webSearch": web_search,
        "messages": [{ "role": "user", "content": content }],
    })
}

async fn generate(resources: &Arc<ServerResources>, identity: &str, body: &Value) -> AxumTestResponse {
    AxumTestRequest::post("/api/chat/generate")
        .bearer(&common::token_for(identity))
        .json(body)
        .send(build_router(Arc::clone(resources)))
        .await
}

async fn settled_job(resources: &Arc<ServerResources>, generation_id: &str) -> JobStatus {
    poll_until_settled(
        &resources.jobs,
        generation_id,
        PollConfig {
            interval: Duration::from_millis(10),
            max_attempts: 500,
        },
    )
    .await
    .unwrap()
}

/// Read SSE frames until `needle` shows up, returning the remaining body stream
async fn read_until(
    response: axum::http::Response<axum::body::Body>,
    needle: &str,
) -> axum::body::BodyDataStream {
    let mut stream = response.into_body().into_data_stream();
    let mut seen = String::new();
    while !seen.contains(needle) {
        let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("Timed out waiting for SSE frame")
            .expect("Stream ended early")
            .unwrap();
        seen.push_str(&String::from_utf8_lossy(&frame));
    }
    stream
}

// ============================================================================
// Happy Path
// ============================================================================

#[tokio::test]
async fn test_generation_streams_and_persists() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["Lisbon ", "is the capital."]));
    let resources = gateway(common::test_config(), &provider, None).await;

    let response = generate(
        &resources,
        "alice",
        &generate_body("chat-1", "flash", "What is the capital of Portugal?", false),
    )
    .await
    .assert_status(StatusCode::OK);

    assert!(response
        .header("content-type")
        .unwrap()
        .starts_with("text/event-stream"));
    assert!(response.header("x-generation-id").is_some());
    assert_eq!(response.sse_kinds(), vec!["chunk", "chunk", "title", "done"]);

    let events = response.sse_events();
    assert_eq!(events[0]["content"], "Lisbon ");
    assert_eq!(events[2]["title"], "What is the capital of Portugal?");
    let message_id = events[3]["messageId"].as_str().unwrap().to_owned();

    let messages = AxumTestRequest::get("/api/chats/chat-1/messages")
        .bearer(&common::token_for("alice"))
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::OK)
        .json::<Value>();
    let messages = messages["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["id"], message_id.as_str());
    assert_eq!(messages[1]["content"], "Lisbon is the capital.");

    let usage = resources
        .usage
        .list_usage(&IdentityId::new("alice"))
        .await
        .unwrap();
    assert_eq!(usage.len(), 1);
    assert_eq!(usage[0].action, ActionKind::Chat);
    assert_eq!(usage[0].model, "flash");
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_second_exchange_has_no_title() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    generate(&resources, "alice", &generate_body("chat-1", "flash", "first", false))
        .await
        .assert_status(StatusCode::OK);
    let second = generate(&resources, "alice", &generate_body("chat-1", "flash", "second", false))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(second.sse_kinds(), vec!["chunk", "done"]);
}

#[tokio::test]
async fn test_job_status_reports_completion() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    let response = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", false))
        .await
        .assert_status(StatusCode::OK);
    let generation_id = response.header("x-generation-id").unwrap();

    let uri = format!("/api/chat/generations/{generation_id}");
    let status = AxumTestRequest::get(&uri)
        .bearer(&common::token_for("alice"))
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::OK)
        .json::<Value>();
    assert_eq!(status["status"], "completed");
    assert!(status["result"]["messageId"].is_string());

    // Jobs are private to their owner
    AxumTestRequest::get(&uri)
        .bearer(&common::token_for("mallory"))
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

// ============================================================================
// Search Augmentation
// ============================================================================

#[tokio::test]
async fn test_web_search_adds_context_and_sources() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["See [1] ", "and [2]."]));
    let search = Arc::new(StubSearchProvider::with_results(vec![
        search_result("Portugal", "https://example.com/portugal"),
        search_result("Lisbon", "https://example.com/lisbon"),
    ]));
    let resources = gateway(common::test_config(), &provider, Some(&search)).await;
    common::assign_plan(&resources, "alice", "pro").await;

    let response = generate(
        &resources,
        "alice",
        &generate_body("chat-1", "flash", "Capital of Portugal?", true),
    )
    .await
    .assert_status(StatusCode::OK);

    assert_eq!(
        response.sse_kinds(),
        vec!["search_results", "chunk", "chunk", "title", "done"]
    );
    let events = response.sse_events();
    assert_eq!(events[0]["results"].as_array().unwrap().len(), 2);

    let request = provider.last_request().unwrap();
    assert_eq!(request.messages[0].role, MessageRole::System);
    assert!(request.messages[0].content.contains("https://example.com/lisbon"));
    assert_eq!(request.messages.last().unwrap().role, MessageRole::User);

    let messages = resources.chats.list_messages("chat-1").await.unwrap();
    let (body, refs) = split_marker(&messages[1].content);
    assert_eq!(body, "See [1] and [2].");
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[1].url, "https://example.com/lisbon");

    let usage = resources
        .usage
        .list_usage(&IdentityId::new("alice"))
        .await
        .unwrap();
    let actions: Vec<ActionKind> = usage.iter().map(|record| record.action).collect();
    assert_eq!(actions, vec![ActionKind::Search, ActionKind::Chat]);
    assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn test_empty_search_behaves_like_no_search() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["plain answer"]));
    let search = Arc::new(StubSearchProvider::with_results(Vec::new()));
    let resources = gateway(common::test_config(), &provider, Some(&search)).await;

    let response = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", true))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(response.sse_kinds(), vec!["chunk", "title", "done"]);
    let request = provider.last_request().unwrap();
    assert_eq!(request.messages.len(), 1);

    let alice = IdentityId::new("alice");
    assert_eq!(resources.usage.list_usage(&alice).await.unwrap().len(), 1);
    let snapshot = resources.budget.store().snapshot(&alice).await.unwrap();
    assert_eq!(snapshot.searches_today, 0);
}

#[tokio::test]
async fn test_failing_search_is_not_fatal() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["answer"]));
    let search = Arc::new(StubSearchProvider::failing());
    let resources = gateway(common::test_config(), &provider, Some(&search)).await;

    let response = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", true))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(response.sse_kinds(), vec!["chunk", "title", "done"]);
    assert_eq!(search.calls(), 1);
}

// ============================================================================
// In-band Failures
// ============================================================================

#[tokio::test]
async fn test_backend_failure_mid_stream() {
    let provider = Arc::new(ScriptedProvider::failing_after("gemini", &["Lis", "bon"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    let response = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", false))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(response.sse_kinds(), vec!["chunk", "chunk", "error"]);
    let events = response.sse_events();
    assert!(!events[2]["message"].as_str().unwrap().is_empty());

    assert_eq!(resources.chats.count_messages("chat-1").await.unwrap(), 0);
    let alice = IdentityId::new("alice");
    assert!(resources.usage.list_usage(&alice).await.unwrap().is_empty());
    let snapshot = resources.budget.store().snapshot(&alice).await.unwrap();
    assert_eq!(snapshot.messages_today, 0);

    let generation_id = response.header("x-generation-id").unwrap();
    assert!(matches!(
        settled_job(&resources, &generation_id).await,
        JobStatus::Failed { .. }
    ));
}

#[tokio::test]
async fn test_backend_refusal_is_an_error_event() {
    let provider = Arc::new(ScriptedProvider::refusing("gemini", "model overloaded"));
    let resources = gateway(common::test_config(), &provider, None).await;

    let response = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", false))
        .await
        .assert_status(StatusCode::OK);

    assert_eq!(response.sse_kinds(), vec!["error"]);
}

// ============================================================================
// Abort and Save-Partial
// ============================================================================

#[tokio::test]
async fn test_abort_then_save_partial() {
    let provider = Arc::new(ScriptedProvider::hanging_after("gemini", &["partial ", "answer"]));
    let resources = gateway(common::test_config(), &provider, None).await;
    let token = common::token_for("alice");

    let response = AxumTestRequest::post("/api/chat/generate")
        .bearer(&token)
        .json(&generate_body("chat-1", "flash", "tell me a story", false))
        .send_streaming(build_router(Arc::clone(&resources)))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let generation_id = response
        .headers()
        .get("x-generation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    let mut stream = read_until(response, "answer").await;

    let aborted = AxumTestRequest::post(&format!("/api/chat/generations/{generation_id}/abort"))
        .bearer(&token)
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::ACCEPTED)
        .json::<Value>();
    assert_eq!(aborted["aborting"], true);

    // The stream closes without an error event
    let mut rest = String::new();
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
    {
        rest.push_str(&String::from_utf8_lossy(&frame.unwrap()));
    }
    assert!(!rest.contains("\"error\""));

    assert_eq!(
        settled_job(&resources, &generation_id).await,
        JobStatus::Failed {
            reason: "aborted: cancelled".to_owned()
        }
    );
    assert_eq!(resources.chats.count_messages("chat-1").await.unwrap(), 0);

    let saved = AxumTestRequest::post(&format!(
        "/api/chat/generations/{generation_id}/save-partial"
    ))
    .bearer(&token)
    .send(build_router(Arc::clone(&resources)))
    .await
    .assert_status(StatusCode::CREATED)
    .json::<Value>();
    assert!(saved["messageId"].is_string());
    assert_eq!(saved["title"], "tell me a story");

    let messages = resources.chats.list_messages("chat-1").await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content, "partial answer");
    let usage = resources
        .usage
        .list_usage(&IdentityId::new("alice"))
        .await
        .unwrap();
    assert_eq!(usage[0].action, ActionKind::Partial);

    // A partial is saved at most once
    AxumTestRequest::post(&format!(
        "/api/chat/generations/{generation_id}/save-partial"
    ))
    .bearer(&token)
    .send(build_router(Arc::clone(&resources)))
    .await
    .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_abort_by_other_identity_is_not_found() {
    let provider = Arc::new(ScriptedProvider::hanging_after("gemini", &["x"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    let response = AxumTestRequest::post("/api/chat/generate")
        .bearer(&common::token_for("alice"))
        .json(&generate_body("chat-1", "flash", "hi", false))
        .send_streaming(build_router(Arc::clone(&resources)))
        .await;
    let generation_id = response
        .headers()
        .get("x-generation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();

    AxumTestRequest::post(&format!("/api/chat/generations/{generation_id}/abort"))
        .bearer(&common::token_for("mallory"))
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    assert_eq!(resources.generations.active_count(), 1);
    drop(response);
}

#[tokio::test]
async fn test_client_disconnect_aborts_generation() {
    let provider = Arc::new(ScriptedProvider::hanging_after("gemini", &["half"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    let response = AxumTestRequest::post("/api/chat/generate")
        .bearer(&common::token_for("alice"))
        .json(&generate_body("chat-1", "flash", "hi", false))
        .send_streaming(build_router(Arc::clone(&resources)))
        .await;
    let generation_id = response
        .headers()
        .get("x-generation-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_owned();
    let stream = read_until(response, "half").await;
    drop(stream);

    assert_eq!(
        settled_job(&resources, &generation_id).await,
        JobStatus::Failed {
            reason: "aborted: client_disconnected".to_owned()
        }
    );
    assert_eq!(resources.chats.count_messages("chat-1").await.unwrap(), 0);
    assert_eq!(resources.generations.active_count(), 0);
}

// ============================================================================
// Admission Rejections
// ============================================================================

#[tokio::test]
async fn test_rate_limited_request_never_reaches_backend() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let mut config = common::test_config();
    config.rate_limits.chat_max = 1;
    let resources = gateway(config, &provider, None).await;

    generate(&resources, "alice", &generate_body("chat-1", "flash", "one", false))
        .await
        .assert_status(StatusCode::OK);
    tokio::time::sleep(Duration::from_secs(1)).await;
    let limited = generate(&resources, "alice", &generate_body("chat-1", "flash", "two", false))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);

    let retry_after: u64 = limited.header("retry-after").unwrap().parse().unwrap();
    assert!(retry_after < 60, "retry-after {retry_after} must be under the window");
    let body = limited.json::<Value>();
    assert_eq!(body["error"]["code"], "RATE_LIMIT_EXCEEDED");
    assert_eq!(provider.calls(), 1);

    // Another identity has its own window
    generate(&resources, "bob", &generate_body("chat-2", "flash", "one", false))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_free_plan_cannot_use_premium_model() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    let denied = generate(&resources, "alice", &generate_body("chat-1", "pro", "hi", false))
        .await
        .assert_status(StatusCode::FORBIDDEN)
        .json::<Value>();

    assert_eq!(denied["error"]["code"], "PLAN_FORBIDS_MODEL");
    assert_eq!(denied["error"]["details"]["reason"], "plan_forbids_model");
    assert_eq!(denied["error"]["details"]["planId"], "free");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_plan_claim_unlocks_premium_model() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    AxumTestRequest::post("/api/chat/generate")
        .bearer(&common::plan_token_for("carol", "pro"))
        .json(&generate_body("chat-1", "pro", "hi", false))
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::OK);

    let snapshot = resources
        .budget
        .store()
        .snapshot(&IdentityId::new("carol"))
        .await
        .unwrap();
    assert_eq!(snapshot.plan_id, Some(PlanId::new("pro")));

    // The stored plan sticks for tokens without the claim
    generate(&resources, "carol", &generate_body("chat-1", "pro", "again", false))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_exhausted_quota_is_forbidden() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;
    let alice = IdentityId::new("alice");
    for _ in 0..20 {
        resources
            .budget
            .commit(&alice, ActionKind::Chat, 0)
            .await
            .unwrap();
    }

    let denied = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", false))
        .await
        .assert_status(StatusCode::FORBIDDEN)
        .json::<Value>();

    assert_eq!(denied["error"]["code"], "QUOTA_EXHAUSTED");
    assert_eq!(denied["error"]["details"]["reason"], "quota_exhausted");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_spend_ceiling_is_forbidden() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;
    common::assign_plan(&resources, "alice", "enterprise").await;
    resources
        .budget
        .commit(&IdentityId::new("alice"), ActionKind::Chat, 500_000_000)
        .await
        .unwrap();

    let denied = generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", false))
        .await
        .assert_status(StatusCode::FORBIDDEN)
        .json::<Value>();

    assert_eq!(denied["error"]["code"], "BUDGET_CEILING_REACHED");
    assert_eq!(denied["error"]["details"]["reason"], "budget_ceiling");
    assert_eq!(denied["error"]["details"]["planId"], "enterprise");
}

#[tokio::test]
async fn test_missing_and_invalid_tokens() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;
    let body = generate_body("chat-1", "flash", "hi", false);

    let missing = AxumTestRequest::post("/api/chat/generate")
        .json(&body)
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::UNAUTHORIZED)
        .json::<Value>();
    assert_eq!(missing["error"]["code"], "AUTH_REQUIRED");

    let invalid = AxumTestRequest::post("/api/chat/generate")
        .bearer("not-a-jwt")
        .json(&body)
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::UNAUTHORIZED)
        .json::<Value>();
    assert_eq!(invalid["error"]["code"], "AUTH_INVALID");
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_repeated_auth_failures_are_throttled() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let mut config = common::test_config();
    config.rate_limits.trust_forwarded_for = true;
    let resources = gateway(config, &provider, None).await;
    let body = generate_body("chat-1", "flash", "hi", false);
    let attempts = resources.config.rate_limits.auth_failure_max;

    for _ in 0..attempts {
        AxumTestRequest::post("/api/chat/generate")
            .header("x-forwarded-for", "203.0.113.9")
            .bearer("forged")
            .json(&body)
            .send(build_router(Arc::clone(&resources)))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    let throttled = AxumTestRequest::post("/api/chat/generate")
        .header("x-forwarded-for", "203.0.113.9")
        .bearer(&common::token_for("alice"))
        .json(&body)
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert!(throttled.header("retry-after").is_some());

    // Other clients are unaffected
    AxumTestRequest::post("/api/chat/generate")
        .header("x-forwarded-for", "198.51.100.7")
        .bearer(&common::token_for("alice"))
        .json(&body)
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::OK);
}

#[tokio::test]
async fn test_rotating_forwarded_for_does_not_escape_guard() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;
    let body = generate_body("chat-1", "flash", "hi", false);
    let attempts = resources.config.rate_limits.auth_failure_max;

    for attempt in 0..attempts {
        AxumTestRequest::post("/api/chat/generate")
            .header("x-forwarded-for", &format!("198.51.100.{attempt}"))
            .bearer("forged")
            .json(&body)
            .send(build_router(Arc::clone(&resources)))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    AxumTestRequest::post("/api/chat/generate")
        .header("x-forwarded-for", "198.51.100.250")
        .bearer("forged")
        .json(&body)
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_malformed_and_invalid_bodies() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;
    let token = common::token_for("alice");

    let malformed = AxumTestRequest::post("/api/chat/generate")
        .bearer(&token)
        .header("content-type", "application/json")
        .raw_body("{\"chatId\": ")
        .send(build_router(Arc::clone(&resources)))
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json::<Value>();
    assert_eq!(malformed["error"]["code"], "INVALID_INPUT");

    let unknown_model = generate(&resources, "alice", &generate_body("chat-1", "gpt-99", "hi", false))
        .await
        .assert_status(StatusCode::BAD_REQUEST)
        .json::<Value>();
    assert!(unknown_model["error"]["message"]
        .as_str()
        .unwrap()
        .contains("gpt-99"));

    generate(&resources, "alice", &generate_body("chat-1", "flash", "   ", false))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn test_foreign_chat_is_not_found() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    generate(&resources, "alice", &generate_body("chat-1", "flash", "mine", false))
        .await
        .assert_status(StatusCode::OK);
    generate(&resources, "mallory", &generate_body("chat-1", "flash", "yours?", false))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    assert_eq!(provider.calls(), 1);
    assert_eq!(resources.chats.count_messages("chat-1").await.unwrap(), 2);
}

#[tokio::test]
async fn test_unconfigured_backend_is_unavailable() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    // "llama" is served by groq, which is not registered here
    let response = generate(&resources, "alice", &generate_body("chat-1", "llama", "hi", false))
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert!(response.header("x-generation-id").is_none());
}

// ============================================================================
// Activity Log
// ============================================================================

#[tokio::test]
async fn test_generation_is_recorded_in_activity_log() {
    let provider = Arc::new(ScriptedProvider::replying("gemini", &["ok"]));
    let resources = gateway(common::test_config(), &provider, None).await;

    generate(&resources, "alice", &generate_body("chat-1", "flash", "hi", false))
        .await
        .assert_status(StatusCode::OK);
    resources.background.drain().await;

    let activity = resources
        .activity
        .list_activity(&IdentityId::new("alice"))
        .await
        .unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].kind, "generation_completed");
    assert_eq!(activity[0].chat_id.as_deref(), Some("chat-1"));
}
