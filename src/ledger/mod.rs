// ABOUTME: Usage ledger that settles a completed generation exactly once
// ABOUTME: Persists the exchange, commits budget usage, writes the cost record and sets the title
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Usage Ledger
//!
//! Settlement runs five steps in order:
//!
//! 1. persist the user message and the assistant reply (with the sources marker)
//! 2. estimate output tokens and compute the cost
//! 3. commit the cost to the budget gate
//! 4. append a usage cost record
//! 5. on the first exchange of a chat, derive and store a title
//!
//! Every step is attempted even when an earlier one failed. Failures are logged
//! with enough context to reconcile by hand and returned in the [`LedgerReport`];
//! nothing is rolled back.

pub mod title;
pub mod tokens;

pub use title::derive_title;
pub use tokens::{estimate_messages, CharRatioEstimator, TokenEstimator};

use crate::budget::{BudgetGate, Reservation};
use crate::database::{ChatStore, UsageStore};
use crate::llm::ModelSpec;
use crate::logging::AppLogger;
use crate::models::{ActionKind, IdentityId, NewMessage, UsageCostRecord};
use crate::search::{sources::render_marker, SearchResult};
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Ledger steps that can fail independently
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStep {
    /// Writing the exchange to the chat
    PersistMessage,
    /// Committing cost and quota to the budget gate
    CommitBudget,
    /// Appending the usage cost record
    RecordUsage,
    /// Storing the chat title
    SetTitle,
}

impl LedgerStep {
    /// Stable name for logs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PersistMessage => "persist_message",
            Self::CommitBudget => "commit_budget",
            Self::RecordUsage => "record_usage",
            Self::SetTitle => "set_title",
        }
    }
}

impl fmt::Display for LedgerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the ledger needs to settle one generation
#[derive(Debug)]
pub struct Settlement {
    /// Owner of the chat
    pub identity: IdentityId,
    /// Chat receiving the exchange
    pub chat_id: String,
    /// Default model for a chat created by this exchange
    pub default_model: String,
    /// Model that produced the reply
    pub model: ModelSpec,
    /// `Chat` for completed generations, `Partial` for saved partials
    pub action: ActionKind,
    /// Sanitized content of the triggering user message
    pub user_content: String,
    /// Concatenated relayed fragments
    pub content: String,
    /// Search results folded into the prompt
    pub sources: Vec<SearchResult>,
    /// Estimated tokens of the prompt sent to the backend
    pub input_tokens: i64,
    /// Total tokens assumed at admission
    pub estimated_tokens: i64,
    /// Whether this is the first exchange of the chat
    pub first_exchange: bool,
    /// Admission reservation; absent for saved partials, which commit directly
    pub reservation: Option<Reservation>,
}

/// Outcome of a settlement
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerReport {
    /// Persisted assistant message id
    pub message_id: Option<String>,
    /// Title written for the chat
    pub title: Option<String>,
    /// Cost charged in micro-USD
    pub cost_micros: i64,
    /// Steps that failed
    pub failures: Vec<LedgerStep>,
}

impl LedgerReport {
    /// Whether every step succeeded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Settles completed generations and charged searches
#[derive(Clone)]
pub struct UsageLedger {
    chats: Arc<dyn ChatStore>,
    usage: Arc<dyn UsageStore>,
    budget: Arc<BudgetGate>,
    estimator: Arc<dyn TokenEstimator>,
}

impl UsageLedger {
    /// Create a ledger over the given stores
    #[must_use]
    pub fn new(
        chats: Arc<dyn ChatStore>,
        usage: Arc<dyn UsageStore>,
        budget: Arc<BudgetGate>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self {
            chats,
            usage,
            budget,
            estimator,
        }
    }

    /// Estimator shared with admission
    #[must_use]
    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    /// Settle one generation
    pub async fn settle(&self, settlement: Settlement) -> LedgerReport {
        let Settlement {
            identity,
            chat_id,
            default_model,
            model,
            action,
            user_content,
            content,
            sources,
            input_tokens,
            estimated_tokens,
            first_exchange,
            reservation,
        } = settlement;
        let mut report = LedgerReport::default();

        let output_tokens = self.estimator.estimate(&content);
        let cost_micros = model.pricing.cost_micros(input_tokens, output_tokens);
        report.cost_micros = cost_micros;

        let fail = |step: LedgerStep, error: &dyn fmt::Display| {
            AppLogger::log_ledger_failure(
                step.as_str(),
                identity.as_str(),
                &chat_id,
                &model.alias,
                cost_micros,
                error,
            );
        };

        let persisted_content = format!("{content}{}", render_marker(&sources));
        match self
            .chats
            .append_exchange(
                &identity,
                &chat_id,
                &default_model,
                &NewMessage::user(user_content.as_str(), model.alias.as_str()),
                &NewMessage::assistant(persisted_content, model.alias.as_str()),
            )
            .await
        {
            Ok((_, assistant)) => report.message_id = Some(assistant.id),
            Err(e) => {
                fail(LedgerStep::PersistMessage, &e);
                report.failures.push(LedgerStep::PersistMessage);
            }
        }

        let committed = match reservation {
            Some(reservation) => self.budget.settle(reservation, cost_micros).await,
            None => self.budget.commit(&identity, action, cost_micros).await,
        };
        if let Err(e) = committed {
            fail(LedgerStep::CommitBudget, &e);
            report.failures.push(LedgerStep::CommitBudget);
        }

        let record = UsageCostRecord {
            id: Uuid::new_v4().to_string(),
            identity: identity.clone(),
            action,
            model: model.alias.clone(),
            input_tokens,
            output_tokens,
            cost_micros,
            estimated_tokens,
            created_at: Utc::now(),
        };
        if let Err(e) = self.usage.record_usage(&record).await {
            fail(LedgerStep::RecordUsage, &e);
            report.failures.push(LedgerStep::RecordUsage);
        }

        if first_exchange && report.message_id.is_some() {
            let title = derive_title(&user_content);
            match self.chats.set_title_if_unset(&chat_id, &title).await {
                Ok(true) => report.title = Some(title),
                Ok(false) => debug!(chat_id = %chat_id, "Chat already titled"),
                Err(e) => {
                    fail(LedgerStep::SetTitle, &e);
                    report.failures.push(LedgerStep::SetTitle);
                }
            }
        }

        info!(
            identity = %identity,
            chat_id = %chat_id,
            model = %model.alias,
            action = %action,
            input_tokens,
            output_tokens,
            estimated_tokens,
            cost_micros,
            failures = report.failures.len(),
            "Generation settled"
        );
        report
    }

    /// Charge a search that returned results
    pub async fn record_search(
        &self,
        reservation: Reservation,
        provider: &str,
        cost_micros: i64,
    ) -> LedgerReport {
        let identity = reservation.identity().clone();
        let mut report = LedgerReport {
            cost_micros,
            ..LedgerReport::default()
        };

        if let Err(e) = self.budget.settle(reservation, cost_micros).await {
            AppLogger::log_ledger_failure(
                LedgerStep::CommitBudget.as_str(),
                identity.as_str(),
                "-",
                provider,
                cost_micros,
                &e,
            );
            report.failures.push(LedgerStep::CommitBudget);
        }

        let record = UsageCostRecord {
            id: Uuid::new_v4().to_string(),
            identity: identity.clone(),
            action: ActionKind::Search,
            model: provider.to_owned(),
            input_tokens: 0,
            output_tokens: 0,
            cost_micros,
            estimated_tokens: 0,
            created_at: Utc::now(),
        };
        if let Err(e) = self.usage.record_usage(&record).await {
            AppLogger::log_ledger_failure(
                LedgerStep::RecordUsage.as_str(),
                identity.as_str(),
                "-",
                provider,
                cost_micros,
                &e,
            );
            report.failures.push(LedgerStep::RecordUsage);
        }

        report
    }
}
