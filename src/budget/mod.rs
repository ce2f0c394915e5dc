// ABOUTME: Budget and plan admission gate with per-identity reservations
// ABOUTME: authorize checks model access, daily quota and spend ceiling; commit records actual cost
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Budget Gate
//!
//! `authorize` evaluates, in order, whether the identity's plan permits the target
//! model, whether the daily quota for the action has room, and (for metered plans)
//! whether the estimated cost fits under the spend ceiling. It writes nothing
//! durable. An admitted request receives a [`Reservation`] that counts against the
//! identity's quota and ceiling until it is settled or dropped, so two concurrent
//! requests that together exceed a quota cannot both pass.
//!
//! `settle` (or the direct `commit`) performs the durable increment with the actual
//! cost once the action completes. Both hold a short per-identity lock that is never
//! held across a model call.

/// Plan policies and the plan catalog
pub mod plans;

pub use plans::{ModelTier, PlanCatalog, PlanPolicy};

use crate::errors::{AppError, AppResult, ErrorCode};
use crate::models::{ActionKind, IdentityId, PlanId};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Why a request was denied by the budget gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// The plan does not include the requested model
    PlanForbidsModel,
    /// The daily quota for the action is used up
    QuotaExhausted,
    /// The estimated cost would exceed the metered spend ceiling
    BudgetCeiling,
}

impl DenialReason {
    /// Error code raised for this denial
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::PlanForbidsModel => ErrorCode::PlanForbidsModel,
            Self::QuotaExhausted => ErrorCode::QuotaExhausted,
            Self::BudgetCeiling => ErrorCode::BudgetCeilingReached,
        }
    }

    /// Human-readable reason
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::PlanForbidsModel => "plan forbids model",
            Self::QuotaExhausted => "quota exhausted",
            Self::BudgetCeiling => "budget ceiling",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Committed usage for the current accounting periods
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BudgetSnapshot {
    /// Assigned plan; `None` applies the catalog default
    pub plan_id: Option<PlanId>,
    /// Messages committed today (UTC)
    pub messages_today: u32,
    /// Searches committed today (UTC)
    pub searches_today: u32,
    /// Spend committed this calendar month, micro-USD
    pub period_spend_micros: i64,
}

/// Durable budget state
///
/// Implementations apply day and month rollover themselves: a snapshot read on a
/// new day reports zero daily counts, and a commit on a new day restarts them.
#[async_trait]
pub trait BudgetStore: Send + Sync {
    /// Read committed usage for the current periods
    async fn snapshot(&self, identity: &IdentityId) -> AppResult<BudgetSnapshot>;

    /// Atomically add one action and its cost to the identity's committed usage
    async fn commit(
        &self,
        identity: &IdentityId,
        action: ActionKind,
        cost_micros: i64,
    ) -> AppResult<BudgetSnapshot>;

    /// Assign a plan to an identity
    async fn assign_plan(&self, identity: &IdentityId, plan: &PlanId) -> AppResult<()>;
}

/// Usage admitted but not yet committed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PendingUsage {
    messages: u32,
    searches: u32,
    cost_micros: i64,
}

impl PendingUsage {
    fn add(&mut self, action: ActionKind, cost_micros: i64) {
        match action {
            ActionKind::Search => self.searches += 1,
            ActionKind::Chat | ActionKind::Partial => self.messages += 1,
        }
        self.cost_micros += cost_micros;
    }

    fn remove(&mut self, action: ActionKind, cost_micros: i64) {
        match action {
            ActionKind::Search => self.searches = self.searches.saturating_sub(1),
            ActionKind::Chat | ActionKind::Partial => {
                self.messages = self.messages.saturating_sub(1);
            }
        }
        self.cost_micros = (self.cost_micros - cost_micros).max(0);
    }

    const fn is_empty(&self) -> bool {
        self.messages == 0 && self.searches == 0 && self.cost_micros == 0
    }
}

type PendingMap = Arc<DashMap<IdentityId, PendingUsage>>;

/// Admitted usage held against an identity's quota until settled or dropped
///
/// Dropping a reservation without settling it releases the held usage, which is
/// how aborted, failed and timed-out generations leave no trace in the budget.
pub struct Reservation {
    identity: IdentityId,
    action: ActionKind,
    estimated_cost_micros: i64,
    pending: PendingMap,
}

impl Reservation {
    /// Identity the reservation belongs to
    #[must_use]
    pub const fn identity(&self) -> &IdentityId {
        &self.identity
    }

    /// Reserved action
    #[must_use]
    pub const fn action(&self) -> ActionKind {
        self.action
    }

    /// Cost estimated at admission
    #[must_use]
    pub const fn estimated_cost_micros(&self) -> i64 {
        self.estimated_cost_micros
    }
}

impl fmt::Debug for Reservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("identity", &self.identity)
            .field("action", &self.action)
            .field("estimated_cost_micros", &self.estimated_cost_micros)
            .finish_non_exhaustive()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        let now_empty = self
            .pending
            .get_mut(&self.identity)
            .is_some_and(|mut usage| {
                usage.remove(self.action, self.estimated_cost_micros);
                usage.is_empty()
            });
        if now_empty {
            self.pending
                .remove_if(&self.identity, |_, usage| usage.is_empty());
        }
    }
}

/// Outcome of [`BudgetGate::authorize`]
#[derive(Debug)]
pub struct Admission {
    /// Plan the decision was made under
    pub plan_id: PlanId,
    /// Denial reason; `None` when admitted
    pub reason: Option<DenialReason>,
    reservation: Option<Reservation>,
}

impl Admission {
    /// Whether the request was admitted
    #[must_use]
    pub const fn allowed(&self) -> bool {
        self.reason.is_none()
    }

    /// Take the reservation, or convert the denial into a 403 error
    ///
    /// # Errors
    ///
    /// Returns a plan denial carrying the reason and plan id
    pub fn into_reservation(self) -> AppResult<Reservation> {
        match (self.reason, self.reservation) {
            (None, Some(reservation)) => Ok(reservation),
            (Some(reason), _) => Err(AppError::plan_denied(
                reason.error_code(),
                format!("Request denied: {reason}"),
                self.plan_id.as_str(),
            )),
            (None, None) => Err(AppError::internal("Admission granted without reservation")),
        }
    }
}

/// Per-identity quota and model-access gate
pub struct BudgetGate {
    store: Arc<dyn BudgetStore>,
    plans: PlanCatalog,
    pending: PendingMap,
    locks: DashMap<IdentityId, Arc<Mutex<()>>>,
}

impl BudgetGate {
    /// Create a gate over a durable store
    #[must_use]
    pub fn new(store: Arc<dyn BudgetStore>, plans: PlanCatalog) -> Self {
        Self {
            store,
            plans,
            pending: Arc::new(DashMap::new()),
            locks: DashMap::new(),
        }
    }

    /// Plan catalog used for decisions
    #[must_use]
    pub const fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    /// Durable store behind the gate
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BudgetStore> {
        &self.store
    }

    fn lock_for(&self, identity: &IdentityId) -> Arc<Mutex<()>> {
        self.locks.entry(identity.clone()).or_default().clone()
    }

    /// Decide whether `identity` may perform `action`
    ///
    /// `model_tier` is the tier of the target model (absent for non-model actions)
    /// and `estimated_cost_micros` is checked against the ceiling of metered plans.
    ///
    /// # Errors
    ///
    /// Returns an error only when the budget store cannot be read
    pub async fn authorize(
        &self,
        identity: &IdentityId,
        action: ActionKind,
        model_tier: Option<ModelTier>,
        estimated_cost_micros: i64,
    ) -> AppResult<Admission> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;

        let snapshot = self.store.snapshot(identity).await?;
        let plan = snapshot
            .plan_id
            .as_ref()
            .map_or_else(|| self.plans.default_plan(), |id| self.plans.resolve(id));
        let pending = self
            .pending
            .get(identity)
            .map(|usage| *usage)
            .unwrap_or_default();

        if let Some(reason) = evaluate(
            plan,
            &snapshot,
            pending,
            action,
            model_tier,
            estimated_cost_micros,
        ) {
            info!(
                identity = %identity,
                plan_id = %plan.id,
                action = %action,
                reason = %reason,
                "Budget gate denied request"
            );
            return Ok(Admission {
                plan_id: plan.id.clone(),
                reason: Some(reason),
                reservation: None,
            });
        }

        self.pending
            .entry(identity.clone())
            .or_default()
            .add(action, estimated_cost_micros);
        debug!(
            identity = %identity,
            plan_id = %plan.id,
            action = %action,
            estimated_cost_micros,
            "Budget reserved"
        );

        Ok(Admission {
            plan_id: plan.id.clone(),
            reason: None,
            reservation: Some(Reservation {
                identity: identity.clone(),
                action,
                estimated_cost_micros,
                pending: Arc::clone(&self.pending),
            }),
        })
    }

    /// Commit the actual cost of a reserved action and release the reservation
    ///
    /// # Errors
    ///
    /// Returns an error if the durable increment fails; the reservation is
    /// released either way
    pub async fn settle(
        &self,
        reservation: Reservation,
        actual_cost_micros: i64,
    ) -> AppResult<BudgetSnapshot> {
        let lock = self.lock_for(&reservation.identity);
        let _guard = lock.lock().await;
        let result = self
            .store
            .commit(&reservation.identity, reservation.action, actual_cost_micros)
            .await;
        drop(reservation);
        result
    }

    /// Record the plan an identity's token asserts
    ///
    /// Unknown plan ids are ignored. Returns whether the stored plan changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the budget store cannot be read or written
    pub async fn sync_plan(&self, identity: &IdentityId, plan: &PlanId) -> AppResult<bool> {
        if self.plans.get(plan).is_none() {
            warn!(identity = %identity, plan_id = %plan, "Token names an unknown plan, ignored");
            return Ok(false);
        }
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;
        let snapshot = self.store.snapshot(identity).await?;
        if snapshot.plan_id.as_ref() == Some(plan) {
            return Ok(false);
        }
        self.store.assign_plan(identity, plan).await?;
        info!(identity = %identity, plan_id = %plan, "Plan updated from token");
        Ok(true)
    }

    /// Commit an action that was never reserved (saved partial generations)
    ///
    /// # Errors
    ///
    /// Returns an error if the durable increment fails
    pub async fn commit(
        &self,
        identity: &IdentityId,
        action: ActionKind,
        actual_cost_micros: i64,
    ) -> AppResult<BudgetSnapshot> {
        let lock = self.lock_for(identity);
        let _guard = lock.lock().await;
        self.store.commit(identity, action, actual_cost_micros).await
    }

    /// Forget per-identity locks nobody is holding
    pub fn purge_idle_locks(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.locks.len())
    }
}

fn evaluate(
    plan: &PlanPolicy,
    snapshot: &BudgetSnapshot,
    pending: PendingUsage,
    action: ActionKind,
    model_tier: Option<ModelTier>,
    estimated_cost_micros: i64,
) -> Option<DenialReason> {
    if let Some(tier) = model_tier {
        if !plan.permits_tier(tier) {
            return Some(DenialReason::PlanForbidsModel);
        }
    }

    let (used, quota) = match action {
        ActionKind::Search => (
            snapshot.searches_today + pending.searches,
            plan.daily_searches,
        ),
        ActionKind::Chat | ActionKind::Partial => (
            snapshot.messages_today + pending.messages,
            plan.daily_messages,
        ),
    };
    if quota.is_some_and(|limit| used >= limit) {
        return Some(DenialReason::QuotaExhausted);
    }

    if let Some(ceiling) = plan.monthly_ceiling_micros {
        let projected = snapshot.period_spend_micros + pending.cost_micros + estimated_cost_micros;
        if projected > ceiling {
            return Some(DenialReason::BudgetCeiling);
        }
    }

    None
}
