// ABOUTME: Generate request model validated at the HTTP boundary
// ABOUTME: Bounds message count and size, sanitizes content and resolves the model alias
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::constants::limits::{MAX_CHAT_ID_LEN, MAX_MESSAGES, MAX_MESSAGE_CHARS};
use crate::errors::{AppError, AppResult};
use crate::llm::{ChatMessage, ModelCatalog, ModelSpec};
use crate::models::MessageRole;
use crate::search::sources::split_marker;
use crate::utils::sanitize::sanitize_user_content;
use serde::Deserialize;

/// `POST /api/chat/generate` body
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Target chat; created on first use
    pub chat_id: String,
    /// Conversation so far, ending with the new user message
    pub messages: Vec<IncomingMessage>,
    /// Model alias
    pub model: String,
    /// Whether to augment the prompt with web search
    #[serde(default)]
    pub web_search: bool,
}

/// One message of the request
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Sender role
    pub role: MessageRole,
    /// Raw content
    pub content: String,
}

/// A request that passed validation
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// Target chat
    pub chat_id: String,
    /// Sanitized prompt, ending with the new user message
    pub prompt: Vec<ChatMessage>,
    /// Sanitized content of the new user message
    pub user_content: String,
    /// Resolved model
    pub model: ModelSpec,
    /// Whether search augmentation was requested
    pub web_search: bool,
}

impl GenerateRequest {
    /// Parse a JSON body
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when the body is not a valid request
    pub fn parse(body: &[u8]) -> AppResult<Self> {
        serde_json::from_slice(body)
            .map_err(|e| AppError::invalid_input(format!("Malformed request body: {e}")))
    }

    /// Validate and sanitize
    ///
    /// # Errors
    ///
    /// Returns a field-specific `InvalidInput` error for the first violation
    pub fn validate(self, catalog: &ModelCatalog) -> AppResult<ValidatedRequest> {
        let chat_id = self.chat_id.trim();
        if chat_id.is_empty() {
            return Err(AppError::invalid_field("chatId", "chatId is required"));
        }
        if chat_id.len() > MAX_CHAT_ID_LEN {
            return Err(AppError::invalid_field(
                "chatId",
                format!("chatId must be at most {MAX_CHAT_ID_LEN} characters"),
            ));
        }

        let model = catalog.get(self.model.trim()).cloned().ok_or_else(|| {
            AppError::invalid_field("model", format!("Unknown model '{}'", self.model))
        })?;

        if self.messages.is_empty() {
            return Err(AppError::invalid_field("messages", "messages must not be empty"));
        }
        if self.messages.len() > MAX_MESSAGES {
            return Err(AppError::invalid_field(
                "messages",
                format!("at most {MAX_MESSAGES} messages are allowed"),
            ));
        }

        let last_index = self.messages.len() - 1;
        let mut prompt = Vec::with_capacity(self.messages.len());
        for (index, message) in self.messages.into_iter().enumerate() {
            if message.content.chars().count() > MAX_MESSAGE_CHARS {
                return Err(AppError::invalid_field(
                    &format!("messages[{index}].content"),
                    format!("message content must be at most {MAX_MESSAGE_CHARS} characters"),
                ));
            }
            let content = match message.role {
                MessageRole::Assistant => split_marker(&message.content).0.trim().to_owned(),
                MessageRole::User | MessageRole::System => sanitize_user_content(&message.content),
            };

            if index == last_index {
                if message.role != MessageRole::User {
                    return Err(AppError::invalid_field(
                        "messages",
                        "the last message must come from the user",
                    ));
                }
                if content.is_empty() {
                    return Err(AppError::invalid_field(
                        &format!("messages[{index}].content"),
                        "message content is empty",
                    ));
                }
            }
            if !content.is_empty() {
                prompt.push(ChatMessage::new(message.role, content));
            }
        }

        let user_content = prompt
            .last()
            .map(|message| message.content.clone())
            .unwrap_or_default();

        Ok(ValidatedRequest {
            chat_id: chat_id.to_owned(),
            prompt,
            user_content,
            model,
            web_search: self.web_search,
        })
    }
}
