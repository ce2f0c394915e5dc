// ABOUTME: Scripted model backend, canned search provider and failing stores for tests
// ABOUTME: Count calls so tests can assert a backend was or was not reached
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use async_trait::async_trait;
use parley_server::database::{ChatStore, UsageStore};
use parley_server::errors::{AppError, AppResult};
use parley_server::llm::{ChatRequest, ChatStream, LlmProvider, StreamChunk};
use parley_server::models::{Chat, IdentityId, Message, NewMessage, UsageCostRecord};
use parley_server::rate_limiting::{CounterStore, WindowCount};
use parley_server::search::{SearchProvider, SearchResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// One step of a scripted backend stream
#[derive(Debug, Clone)]
pub enum Step {
    /// Yield a text fragment
    Fragment(String),
    /// Wait before the next step
    Delay(Duration),
    /// Yield a transport error and end
    Fail(String),
    /// Never yield again
    Hang,
}

/// Model backend that replays a fixed script
pub struct ScriptedProvider {
    name: String,
    steps: Vec<Step>,
    open_error: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

impl ScriptedProvider {
    /// Backend named `name` running `steps`
    pub fn new(name: &str, steps: Vec<Step>) -> Self {
        Self {
            name: name.to_owned(),
            steps,
            open_error: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Backend that streams `fragments` and finishes
    pub fn replying(name: &str, fragments: &[&str]) -> Self {
        Self::new(
            name,
            fragments
                .iter()
                .map(|f| Step::Fragment((*f).to_owned()))
                .collect(),
        )
    }

    /// Backend that streams `fragments` and then fails
    pub fn failing_after(name: &str, fragments: &[&str]) -> Self {
        let mut steps: Vec<Step> = fragments
            .iter()
            .map(|f| Step::Fragment((*f).to_owned()))
            .collect();
        steps.push(Step::Fail("connection reset by peer".to_owned()));
        Self::new(name, steps)
    }

    /// Backend that streams `fragments` and then stalls
    pub fn hanging_after(name: &str, fragments: &[&str]) -> Self {
        let mut steps: Vec<Step> = fragments
            .iter()
            .map(|f| Step::Fragment((*f).to_owned()))
            .collect();
        steps.push(Step::Hang);
        Self::new(name, steps)
    }

    /// Backend that refuses to open a stream
    pub fn refusing(name: &str, message: &str) -> Self {
        let mut provider = Self::new(name, Vec::new());
        provider.open_error = Some(message.to_owned());
        provider
    }

    /// Number of streams requested
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Most recent request
    pub fn last_request(&self) -> Option<ChatRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChatStream, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(message) = &self.open_error {
            return Err(AppError::external_service(&self.name, message.clone()));
        }

        let steps = self.steps.clone();
        let name = self.name.clone();
        Ok(Box::pin(async_stream::stream! {
            for step in steps {
                match step {
                    Step::Fragment(text) => yield Ok(StreamChunk::fragment(text)),
                    Step::Delay(duration) => tokio::time::sleep(duration).await,
                    Step::Fail(message) => {
                        yield Err(AppError::external_service(name.clone(), message));
                        return;
                    }
                    Step::Hang => std::future::pending::<()>().await,
                }
            }
        }))
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

/// Search provider returning canned results
pub struct StubSearchProvider {
    results: Vec<SearchResult>,
    fail: bool,
    calls: AtomicUsize,
    last_limit: AtomicUsize,
}

impl StubSearchProvider {
    /// Provider answering every query with `results`
    pub fn with_results(results: Vec<SearchResult>) -> Self {
        Self {
            results,
            fail: false,
            calls: AtomicUsize::new(0),
            last_limit: AtomicUsize::new(0),
        }
    }

    /// Provider whose every query fails
    pub fn failing() -> Self {
        Self {
            results: Vec::new(),
            fail: true,
            calls: AtomicUsize::new(0),
            last_limit: AtomicUsize::new(0),
        }
    }

    /// Number of queries received
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `max_results` of the most recent query
    pub fn last_limit(&self) -> usize {
        self.last_limit.load(Ordering::SeqCst)
    }
}

/// Search result with a title and URL
pub fn search_result(title: &str, url: &str) -> SearchResult {
    SearchResult {
        title: title.to_owned(),
        snippet: format!("About {title}"),
        url: url.to_owned(),
    }
}

#[async_trait]
impl SearchProvider for StubSearchProvider {
    fn name(&self) -> &str {
        "stub-search"
    }

    async fn search(&self, _query: &str, max_results: usize) -> AppResult<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_limit.store(max_results, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::external_service("stub-search", "search backend down"));
        }
        Ok(self.results.iter().take(max_results).cloned().collect())
    }
}

/// Chat store whose every operation fails
pub struct FailingChatStore;

#[async_trait]
impl ChatStore for FailingChatStore {
    async fn create_chat(
        &self,
        _owner: &IdentityId,
        _chat_id: &str,
        _title: Option<&str>,
        _default_model: &str,
    ) -> AppResult<Chat> {
        Err(AppError::database("chat store offline"))
    }

    async fn get_chat(&self, _chat_id: &str) -> AppResult<Option<Chat>> {
        Err(AppError::database("chat store offline"))
    }

    async fn list_chats(&self, _owner: &IdentityId) -> AppResult<Vec<Chat>> {
        Err(AppError::database("chat store offline"))
    }

    async fn list_messages(&self, _chat_id: &str) -> AppResult<Vec<Message>> {
        Err(AppError::database("chat store offline"))
    }

    async fn count_messages(&self, _chat_id: &str) -> AppResult<i64> {
        Err(AppError::database("chat store offline"))
    }

    async fn append_exchange(
        &self,
        _owner: &IdentityId,
        _chat_id: &str,
        _default_model: &str,
        _user: &NewMessage,
        _assistant: &NewMessage,
    ) -> AppResult<(Message, Message)> {
        Err(AppError::database("chat store offline"))
    }

    async fn set_title_if_unset(&self, _chat_id: &str, _title: &str) -> AppResult<bool> {
        Err(AppError::database("chat store offline"))
    }

    async fn touch_chat(&self, _chat_id: &str) -> AppResult<()> {
        Err(AppError::database("chat store offline"))
    }
}

/// Usage store whose writes fail
pub struct FailingUsageStore;

#[async_trait]
impl UsageStore for FailingUsageStore {
    async fn record_usage(&self, _record: &UsageCostRecord) -> AppResult<()> {
        Err(AppError::database("usage store offline"))
    }

    async fn list_usage(&self, _identity: &IdentityId) -> AppResult<Vec<UsageCostRecord>> {
        Ok(Vec::new())
    }
}

/// Counter store that is always unreachable
pub struct UnreachableCounterStore;

#[async_trait]
impl CounterStore for UnreachableCounterStore {
    async fn increment(&self, _key: &str, _window: Duration) -> AppResult<WindowCount> {
        Err(AppError::unavailable("counter store unreachable"))
    }

    async fn current(&self, _key: &str) -> AppResult<Option<WindowCount>> {
        Err(AppError::unavailable("counter store unreachable"))
    }

    fn backend_name(&self) -> &'static str {
        "unreachable"
    }
}
