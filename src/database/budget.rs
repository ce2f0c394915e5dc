// ABOUTME: Durable per-identity budget state with daily quota and monthly spend rollover
// ABOUTME: Commits are single upserts so concurrent increments are never lost
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::Database;
use crate::budget::{BudgetSnapshot, BudgetStore};
use crate::errors::{AppError, AppResult};
use crate::models::{ActionKind, IdentityId, PlanId};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

impl Database {
    pub(super) async fn migrate_budget(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS budget_state (
                identity TEXT PRIMARY KEY,
                plan_id TEXT,
                quota_day TEXT NOT NULL,
                messages_today INTEGER NOT NULL DEFAULT 0,
                searches_today INTEGER NOT NULL DEFAULT 0,
                spend_period TEXT NOT NULL,
                period_spend_micros INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Daily quota window key
fn quota_day(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Monthly spend period key
fn spend_period(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

fn count_from_db(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[async_trait]
impl BudgetStore for Database {
    async fn snapshot(&self, identity: &IdentityId) -> AppResult<BudgetSnapshot> {
        let row = sqlx::query(
            r"
            SELECT plan_id, quota_day, messages_today, searches_today, spend_period, period_spend_micros
            FROM budget_state
            WHERE identity = $1
            ",
        )
        .bind(identity.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to read budget state: {e}")))?;

        let Some(row) = row else {
            return Ok(BudgetSnapshot::default());
        };

        let now = Utc::now();
        let same_day = row.get::<String, _>("quota_day") == quota_day(now);
        let same_period = row.get::<String, _>("spend_period") == spend_period(now);
        let plan_id: Option<String> = row.get("plan_id");

        Ok(BudgetSnapshot {
            plan_id: plan_id.map(PlanId::new),
            messages_today: if same_day {
                count_from_db(row.get("messages_today"))
            } else {
                0
            },
            searches_today: if same_day {
                count_from_db(row.get("searches_today"))
            } else {
                0
            },
            period_spend_micros: if same_period {
                row.get("period_spend_micros")
            } else {
                0
            },
        })
    }

    async fn commit(
        &self,
        identity: &IdentityId,
        action: ActionKind,
        cost_micros: i64,
    ) -> AppResult<BudgetSnapshot> {
        let now = Utc::now();
        let (messages, searches) = if action.counts_as_message() {
            (1_i64, 0_i64)
        } else {
            (0, 1)
        };

        // SET expressions all read the pre-update row, so rollover and increment
        // happen in one statement
        let row = sqlx::query(
            r"
            INSERT INTO budget_state
                (identity, plan_id, quota_day, messages_today, searches_today, spend_period, period_spend_micros, updated_at)
            VALUES ($1, NULL, $2, $3, $4, $5, $6, $7)
            ON CONFLICT(identity) DO UPDATE SET
                messages_today = CASE WHEN budget_state.quota_day = excluded.quota_day
                    THEN budget_state.messages_today + excluded.messages_today
                    ELSE excluded.messages_today END,
                searches_today = CASE WHEN budget_state.quota_day = excluded.quota_day
                    THEN budget_state.searches_today + excluded.searches_today
                    ELSE excluded.searches_today END,
                quota_day = excluded.quota_day,
                period_spend_micros = CASE WHEN budget_state.spend_period = excluded.spend_period
                    THEN budget_state.period_spend_micros + excluded.period_spend_micros
                    ELSE excluded.period_spend_micros END,
                spend_period = excluded.spend_period,
                updated_at = excluded.updated_at
            RETURNING plan_id, messages_today, searches_today, period_spend_micros
            ",
        )
        .bind(identity.as_str())
        .bind(quota_day(now))
        .bind(messages)
        .bind(searches)
        .bind(spend_period(now))
        .bind(cost_micros.max(0))
        .bind(now.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to commit budget usage: {e}")))?;

        let plan_id: Option<String> = row.get("plan_id");
        Ok(BudgetSnapshot {
            plan_id: plan_id.map(PlanId::new),
            messages_today: count_from_db(row.get("messages_today")),
            searches_today: count_from_db(row.get("searches_today")),
            period_spend_micros: row.get("period_spend_micros"),
        })
    }

    async fn assign_plan(&self, identity: &IdentityId, plan: &PlanId) -> AppResult<()> {
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO budget_state
                (identity, plan_id, quota_day, messages_today, searches_today, spend_period, period_spend_micros, updated_at)
            VALUES ($1, $2, $3, 0, 0, $4, 0, $5)
            ON CONFLICT(identity) DO UPDATE SET
                plan_id = excluded.plan_id,
                updated_at = excluded.updated_at
            ",
        )
        .bind(identity.as_str())
        .bind(plan.as_str())
        .bind(quota_day(now))
        .bind(spend_period(now))
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::database(format!("Failed to assign plan: {e}")))?;
        Ok(())
    }
}
