// ABOUTME: Store traits for chats, usage cost records and the activity log
// ABOUTME: The ledger and routes depend on these so tests can inject failing stores
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::errors::AppResult;
use crate::models::{Chat, IdentityId, Message, NewMessage, UsageCostRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chat and message persistence
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Create an empty chat owned by `owner`
    async fn create_chat(
        &self,
        owner: &IdentityId,
        chat_id: &str,
        title: Option<&str>,
        default_model: &str,
    ) -> AppResult<Chat>;

    /// Fetch a chat regardless of owner
    async fn get_chat(&self, chat_id: &str) -> AppResult<Option<Chat>>;

    /// Chats owned by `owner`, most recently updated first
    async fn list_chats(&self, owner: &IdentityId) -> AppResult<Vec<Chat>>;

    /// Messages of a chat in append order
    async fn list_messages(&self, chat_id: &str) -> AppResult<Vec<Message>>;

    /// Number of messages in a chat
    async fn count_messages(&self, chat_id: &str) -> AppResult<i64>;

    /// Append a user message and its assistant reply in one transaction
    ///
    /// Creates the chat for `owner` when it does not exist yet. Fails with
    /// `ResourceNotFound` when the chat belongs to someone else.
    async fn append_exchange(
        &self,
        owner: &IdentityId,
        chat_id: &str,
        default_model: &str,
        user: &NewMessage,
        assistant: &NewMessage,
    ) -> AppResult<(Message, Message)>;

    /// Set the title unless one is already set; returns whether it was written
    async fn set_title_if_unset(&self, chat_id: &str, title: &str) -> AppResult<bool>;

    /// Bump `updated_at`
    async fn touch_chat(&self, chat_id: &str) -> AppResult<()>;
}

/// Internal cost ledger
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append one cost record
    async fn record_usage(&self, record: &UsageCostRecord) -> AppResult<()>;

    /// Records for an identity in insertion order
    async fn list_usage(&self, identity: &IdentityId) -> AppResult<Vec<UsageCostRecord>>;
}

/// One entry of the activity log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// Acting identity
    pub identity: IdentityId,
    /// Event kind, e.g. `generation_completed`
    pub kind: String,
    /// Chat the event relates to
    pub chat_id: Option<String>,
    /// Generation the event relates to
    pub generation_id: Option<String>,
    /// Free-form details
    pub detail: Value,
    /// When it happened
    pub created_at: DateTime<Utc>,
}

impl ActivityEvent {
    /// New event stamped now
    #[must_use]
    pub fn new(identity: IdentityId, kind: impl Into<String>) -> Self {
        Self {
            identity,
            kind: kind.into(),
            chat_id: None,
            generation_id: None,
            detail: Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Attach a chat id
    #[must_use]
    pub fn with_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Attach a generation id
    #[must_use]
    pub fn with_generation(mut self, generation_id: impl Into<String>) -> Self {
        self.generation_id = Some(generation_id.into());
        self
    }

    /// Attach details
    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }
}

/// Append-only activity log
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Append one event
    async fn record_activity(&self, event: &ActivityEvent) -> AppResult<()>;

    /// Events for an identity in insertion order
    async fn list_activity(&self, identity: &IdentityId) -> AppResult<Vec<ActivityEvent>>;
}
