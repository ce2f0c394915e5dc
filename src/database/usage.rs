// ABOUTME: Append-only usage cost records for internal reconciliation
// ABOUTME: One row per completed generation, saved partial or charged search
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::{parse_timestamp, Database, UsageStore};
use crate::errors::{AppError, AppResult};
use crate::models::{ActionKind, IdentityId, UsageCostRecord};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;

impl Database {
    pub(super) async fn migrate_usage(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS usage_cost_records (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                identity TEXT NOT NULL,
                action TEXT NOT NULL CHECK (action IN ('chat', 'search', 'partial')),
                model TEXT NOT NULL,
                input_tokens INTEGER NOT NULL,
                output_tokens INTEGER NOT NULL,
                cost_micros INTEGER NOT NULL,
                estimated_tokens INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_usage_identity ON usage_cost_records(identity, seq)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl UsageStore for Database {
    async fn record_usage(&self, record: &UsageCostRecord) -> AppResult<()> {
        sqlx::query(
            r"
            INSERT INTO usage_cost_records
                (id, identity, action, model, input_tokens, output_tokens, cost_micros, estimated_tokens, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(&record.id)
        .bind(record.identity.as_str())
        .bind(record.action.as_str())
        .bind(&record.model)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_micros)
        .bind(record.estimated_tokens)
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to record usage: {e}")))?;
        Ok(())
    }

    async fn list_usage(&self, identity: &IdentityId) -> AppResult<Vec<UsageCostRecord>> {
        let rows = sqlx::query(
            r"
            SELECT id, identity, action, model, input_tokens, output_tokens, cost_micros, estimated_tokens, created_at
            FROM usage_cost_records
            WHERE identity = $1
            ORDER BY seq ASC
            ",
        )
        .bind(identity.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to list usage: {e}")))?;

        rows.iter()
            .map(|row| -> AppResult<UsageCostRecord> {
                let action: String = row.get("action");
                let created_at: String = row.get("created_at");
                let identity: String = row.get("identity");
                Ok(UsageCostRecord {
                    id: row.get("id"),
                    identity: IdentityId::new(identity),
                    action: action.parse::<ActionKind>()?,
                    model: row.get("model"),
                    input_tokens: row.get("input_tokens"),
                    output_tokens: row.get("output_tokens"),
                    cost_micros: row.get("cost_micros"),
                    estimated_tokens: row.get("estimated_tokens"),
                    created_at: parse_timestamp(&created_at)?,
                })
            })
            .collect()
    }
}
