// ABOUTME: Usage cost ledger record and billable action classes
// ABOUTME: One record is written per completed or explicitly saved partial generation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::IdentityId;
use crate::errors::AppError;

/// Billable action classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// A completed chat generation
    Chat,
    /// A web search that returned results
    Search,
    /// An aborted generation saved explicitly by its owner
    Partial,
}

impl ActionKind {
    /// Storage representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Search => "search",
            Self::Partial => "partial",
        }
    }

    /// Whether the action consumes the daily message quota
    #[must_use]
    pub const fn counts_as_message(&self) -> bool {
        matches!(self, Self::Chat | Self::Partial)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "search" => Ok(Self::Search),
            "partial" => Ok(Self::Partial),
            other => Err(AppError::invalid_input(format!(
                "Unknown action kind: {other}"
            ))),
        }
    }
}

/// Internal, append-only cost ledger entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageCostRecord {
    /// Unique record ID
    pub id: String,
    /// Identity charged
    pub identity: IdentityId,
    /// Action that incurred the cost
    pub action: ActionKind,
    /// Model alias (the search provider name for search records)
    pub model: String,
    /// Estimated input tokens
    pub input_tokens: i64,
    /// Estimated output tokens
    pub output_tokens: i64,
    /// Computed cost in micro-USD
    pub cost_micros: i64,
    /// Tokens estimated at admission, kept to track estimator drift
    pub estimated_tokens: i64,
    /// When the record was written
    pub created_at: DateTime<Utc>,
}
