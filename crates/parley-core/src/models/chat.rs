// ABOUTME: Chat and message record types for database persistence
// ABOUTME: Chats are owned by one identity and hold append-only, immutable messages
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::IdentityId;
use crate::errors::AppError;

/// Message roles for chat conversations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System instruction message
    System,
    /// User input message
    User,
    /// Assistant response message
    Assistant,
}

impl MessageRole {
    /// Convert to string representation for storage
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(AppError::invalid_input(format!(
                "Unknown message role: {other}"
            ))),
        }
    }
}

/// A chat owned by exactly one identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Unique chat ID
    pub id: String,
    /// Identity that owns the chat
    pub owner: IdentityId,
    /// Title, set once from the first exchange
    pub title: Option<String>,
    /// Default model alias for new generations
    pub default_model: String,
    /// When the chat was created
    pub created_at: DateTime<Utc>,
    /// When the chat last received a message
    pub updated_at: DateTime<Utc>,
}

/// A persisted, immutable chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID
    pub id: String,
    /// Chat this message belongs to
    pub chat_id: String,
    /// Role of the sender
    pub role: MessageRole,
    /// Sanitized content (assistant content may end with a sources marker)
    pub content: String,
    /// Model alias that produced or received the message
    pub model: String,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

/// Message about to be appended to a chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    /// Role of the sender
    pub role: MessageRole,
    /// Content to store
    pub content: String,
    /// Model alias
    pub model: String,
}

impl NewMessage {
    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            model: model.into(),
        }
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            model: model.into(),
        }
    }
}
