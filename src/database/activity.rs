// ABOUTME: Activity log of generation outcomes written by background tasks
// ABOUTME: Rows are best effort and never read on the request path
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::{parse_timestamp, ActivityEvent, ActivityStore, Database};
use crate::errors::{AppError, AppResult};
use crate::models::IdentityId;
use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

impl Database {
    pub(super) async fn migrate_activity(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activity_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                identity TEXT NOT NULL,
                kind TEXT NOT NULL,
                chat_id TEXT,
                generation_id TEXT,
                detail TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ActivityStore for Database {
    async fn record_activity(&self, event: &ActivityEvent) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO activity_events (identity, kind, chat_id, generation_id, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(event.identity.as_str())
        .bind(&event.kind)
        .bind(event.chat_id.as_deref())
        .bind(event.generation_id.as_deref())
        .bind(serde_json::to_string(&event.detail)?)
        .bind(event.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record activity: {e}")))?;
        Ok(())
    }

    async fn list_activity(&self, identity: &IdentityId) -> AppResult<Vec<ActivityEvent>> {
        let rows = sqlx::query(
            r"
            SELECT identity, kind, chat_id, generation_id, detail, created_at
            FROM activity_events
            WHERE identity = $1
            ORDER BY seq ASC
            ",
        )
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list activity: {e}")))?;

        rows.iter()
            .map(|row| -> AppResult<ActivityEvent> {
                let identity: String = row.get("identity");
                let detail: String = row.get("detail");
                let created_at: String = row.get("created_at");
                Ok(ActivityEvent {
                    identity: IdentityId::new(identity),
                    kind: row.get("kind"),
                    chat_id: row.get("chat_id"),
                    generation_id: row.get("generation_id"),
                    detail: serde_json::from_str(&detail)?,
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}
