// ABOUTME: Chat and message tables with owner-checked, transactional exchange appends
// ABOUTME: Messages are append-only and ordered by insertion sequence
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::{parse_timestamp, ChatStore, Database};
use crate::errors::{AppError, AppResult};
use crate::models::{Chat, IdentityId, Message, MessageRole, NewMessage};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

impl Database {
    pub(super) async fn migrate_chats(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS chats (
                id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                title TEXT,
                default_model TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chats_owner_updated ON chats(owner, updated_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant')),
                content TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, seq)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn chat_from_row(row: &SqliteRow) -> AppResult<Chat> {
    let created_at: String = row.get("created_at");
    let updated_at: String = row.get("updated_at");
    let owner: String = row.get("owner");
    Ok(Chat {
        id: row.get("id"),
        owner: IdentityId::new(owner),
        title: row.get("title"),
        default_model: row.get("default_model"),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn message_from_row(row: &SqliteRow) -> AppResult<Message> {
    let role: String = row.get("role");
    let created_at: String = row.get("created_at");
    Ok(Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        role: role.parse::<MessageRole>()?,
        content: row.get("content"),
        model: row.get("model"),
        created_at: parse_timestamp(&created_at)?,
    })
}

async fn insert_message(
    tx: &mut Transaction<'_, Sqlite>,
    chat_id: &str,
    message: &NewMessage,
) -> AppResult<Message> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r"
        INSERT INTO messages (id, chat_id, role, content, model, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(&id)
    .bind(chat_id)
    .bind(message.role.as_str())
    .bind(&message.content)
    .bind(&message.model)
    .bind(now.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| AppError::database(format!("Failed to add message: {e}")))?;

    Ok(Message {
        id,
        chat_id: chat_id.to_owned(),
        role: message.role,
        content: message.content.clone(),
        model: message.model.clone(),
        created_at: now,
    })
}

#[async_trait]
impl ChatStore for Database {
    async fn create_chat(
        &self,
        owner: &IdentityId,
        chat_id: &str,
        title: Option<&str>,
        default_model: &str,
    ) -> AppResult<Chat> {
        let now = Utc::now();

        sqlx::query(
            r"
            INSERT INTO chats (id, owner, title, default_model, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ",
        )
        .bind(chat_id)
        .bind(owner.as_str())
        .bind(title)
        .bind(default_model)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to create chat: {e}")))?;

        Ok(Chat {
            id: chat_id.to_owned(),
            owner: owner.clone(),
            title: title.map(ToOwned::to_owned),
            default_model: default_model.to_owned(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_chat(&self, chat_id: &str) -> AppResult<Option<Chat>> {
        let row = sqlx::query(
            r"
            SELECT id, owner, title, default_model, created_at, updated_at
            FROM chats
            WHERE id = $1
            ",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get chat: {e}")))?;

        row.as_ref().map(chat_from_row).transpose()
    }

    async fn list_chats(&self, owner: &IdentityId) -> AppResult<Vec<Chat>> {
        let rows = sqlx::query(
            r"
            SELECT id, owner, title, default_model, created_at, updated_at
            FROM chats
            WHERE owner = $1
            ORDER BY updated_at DESC
            ",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list chats: {e}")))?;

        rows.iter().map(chat_from_row).collect()
    }

    async fn list_messages(&self, chat_id: &str) -> AppResult<Vec<Message>> {
        let rows = sqlx::query(
            r"
            SELECT id, chat_id, role, content, model, created_at
            FROM messages
            WHERE chat_id = $1
            ORDER BY seq ASC
            ",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to get messages: {e}")))?;

        rows.iter().map(message_from_row).collect()
    }

    async fn count_messages(&self, chat_id: &str) -> AppResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM messages WHERE chat_id = $1")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to count messages: {e}")))?;

        Ok(row.get("count"))
    }

    async fn append_exchange(
        &self,
        owner: &IdentityId,
        chat_id: &str,
        default_model: &str,
        user: &NewMessage,
        assistant: &NewMessage,
    ) -> AppResult<(Message, Message)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {e}")))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r"
            INSERT INTO chats (id, owner, title, default_model, created_at, updated_at)
            VALUES ($1, $2, NULL, $3, $4, $4)
            ON CONFLICT(id) DO NOTHING
            ",
        )
        .bind(chat_id)
        .bind(owner.as_str())
        .bind(default_model)
        .bind(&now)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::database(format!("Failed to create chat: {e}")))?;

        let stored_owner: String = sqlx::query_scalar("SELECT owner FROM chats WHERE id = $1")
            .bind(chat_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to read chat owner: {e}")))?;
        if stored_owner != owner.as_str() {
            // Dropping the transaction rolls it back
            return Err(AppError::not_found("Chat"));
        }

        let user_message = insert_message(&mut tx, chat_id, user).await?;
        let assistant_message = insert_message(&mut tx, chat_id, assistant).await?;

        sqlx::query("UPDATE chats SET updated_at = $1 WHERE id = $2")
            .bind(&now)
            .bind(chat_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database(format!("Failed to update chat timestamp: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit exchange: {e}")))?;

        Ok((user_message, assistant_message))
    }

    async fn set_title_if_unset(&self, chat_id: &str, title: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r"
            UPDATE chats
            SET title = $1
            WHERE id = $2 AND (title IS NULL OR title = '')
            ",
        )
        .bind(title)
        .bind(chat_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to set chat title: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch_chat(&self, chat_id: &str) -> AppResult<()> {
        sqlx::query("UPDATE chats SET updated_at = $1 WHERE id = $2")
            .bind(Utc::now().to_rfc3339())
            .bind(chat_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::database(format!("Failed to touch chat: {e}")))?;
        Ok(())
    }
}
