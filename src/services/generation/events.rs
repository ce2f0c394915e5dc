// ABOUTME: Tagged SSE payloads emitted during a generation
// ABOUTME: search_results, chunk, title, done and error, serialized with a "type" tag
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::search::SearchResult;
use serde::{Deserialize, Serialize};

/// One event of a generation stream
///
/// Ordering per stream: at most one `search_results` before any `chunk`, zero or
/// more `chunk`s in backend order, at most one `title`, then exactly one terminal
/// `done` or `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Search results folded into the prompt
    SearchResults {
        /// Results in rank order
        results: Vec<SearchResult>,
    },
    /// A relayed fragment of model output
    Chunk {
        /// Fragment text
        content: String,
    },
    /// Title derived from the first exchange of a chat
    Title {
        /// Chat title
        title: String,
    },
    /// Terminal success
    Done {
        /// Persisted assistant message id
        #[serde(rename = "messageId")]
        message_id: String,
    },
    /// Terminal failure
    Error {
        /// User-safe description
        message: String,
    },
}

impl StreamEvent {
    /// Chunk event
    #[must_use]
    pub fn chunk(content: impl Into<String>) -> Self {
        Self::Chunk {
            content: content.into(),
        }
    }

    /// Error event
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether the event ends the stream
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Value of the `type` tag
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SearchResults { .. } => "search_results",
            Self::Chunk { .. } => "chunk",
            Self::Title { .. } => "title",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
