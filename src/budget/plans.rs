// ABOUTME: Plan policies: model tier access, daily quotas and metered spend ceilings
// ABOUTME: Built-in tiers from free to enterprise with a catalog keyed by plan id
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::models::PlanId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Model access tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    /// Available on every plan
    Standard,
    /// Requires a plan that includes premium models
    Premium,
}

/// Admission policy for one plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPolicy {
    /// Plan identifier
    pub id: PlanId,
    /// Messages per UTC day; `None` means unlimited
    pub daily_messages: Option<u32>,
    /// Searches per UTC day; `None` means unlimited
    pub daily_searches: Option<u32>,
    /// Whether premium-tier models may be used
    pub premium_models: bool,
    /// Hard spend ceiling per calendar month (metered plans only), micro-USD
    pub monthly_ceiling_micros: Option<i64>,
}

impl PlanPolicy {
    /// Free plan: standard models, small daily quotas
    #[must_use]
    pub fn free() -> Self {
        Self {
            id: PlanId::new("free"),
            daily_messages: Some(20),
            daily_searches: Some(3),
            premium_models: false,
            monthly_ceiling_micros: None,
        }
    }

    /// Starter plan
    #[must_use]
    pub fn starter() -> Self {
        Self {
            id: PlanId::new("starter"),
            daily_messages: Some(100),
            daily_searches: Some(20),
            premium_models: false,
            monthly_ceiling_micros: None,
        }
    }

    /// Professional plan: premium models included
    #[must_use]
    pub fn pro() -> Self {
        Self {
            id: PlanId::new("pro"),
            daily_messages: Some(500),
            daily_searches: Some(100),
            premium_models: true,
            monthly_ceiling_micros: None,
        }
    }

    /// Premium plan
    #[must_use]
    pub fn premium() -> Self {
        Self {
            id: PlanId::new("premium"),
            daily_messages: Some(2_000),
            daily_searches: Some(500),
            premium_models: true,
            monthly_ceiling_micros: None,
        }
    }

    /// Enterprise plan: metered, no daily quotas, $500 monthly ceiling
    #[must_use]
    pub fn enterprise() -> Self {
        Self {
            id: PlanId::new("enterprise"),
            daily_messages: None,
            daily_searches: None,
            premium_models: true,
            monthly_ceiling_micros: Some(500_000_000),
        }
    }

    /// Whether the plan may use a model of the given tier
    #[must_use]
    pub const fn permits_tier(&self, tier: ModelTier) -> bool {
        match tier {
            ModelTier::Standard => true,
            ModelTier::Premium => self.premium_models,
        }
    }

    /// Whether spend is checked against a ceiling
    #[must_use]
    pub const fn is_metered(&self) -> bool {
        self.monthly_ceiling_micros.is_some()
    }
}

/// Plans known to the gateway
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<PlanId, PlanPolicy>,
    default_plan: PlanPolicy,
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::with_plans(
            PlanPolicy::free(),
            [
                PlanPolicy::starter(),
                PlanPolicy::pro(),
                PlanPolicy::premium(),
                PlanPolicy::enterprise(),
            ],
        )
    }
}

impl PlanCatalog {
    /// Build a catalog from a default plan and additional plans
    #[must_use]
    pub fn with_plans(default_plan: PlanPolicy, plans: impl IntoIterator<Item = PlanPolicy>) -> Self {
        let mut map: HashMap<PlanId, PlanPolicy> =
            plans.into_iter().map(|p| (p.id.clone(), p)).collect();
        map.insert(default_plan.id.clone(), default_plan.clone());
        Self {
            plans: map,
            default_plan,
        }
    }

    /// Plan assigned to identities without a stored plan
    #[must_use]
    pub const fn default_plan(&self) -> &PlanPolicy {
        &self.default_plan
    }

    /// Look up a plan by id
    #[must_use]
    pub fn get(&self, id: &PlanId) -> Option<&PlanPolicy> {
        self.plans.get(id)
    }

    /// Look up a plan, falling back to the default plan for unknown ids
    #[must_use]
    pub fn resolve(&self, id: &PlanId) -> &PlanPolicy {
        self.plans.get(id).unwrap_or_else(|| {
            warn!(plan_id = %id, "Unknown plan id, applying default plan");
            &self.default_plan
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_premium_models_require_pro_or_above() {
        assert!(!PlanPolicy::free().permits_tier(ModelTier::Premium));
        assert!(!PlanPolicy::starter().permits_tier(ModelTier::Premium));
        assert!(PlanPolicy::pro().permits_tier(ModelTier::Premium));
        assert!(PlanPolicy::free().permits_tier(ModelTier::Standard));
    }

    #[test]
    fn test_only_enterprise_is_metered() {
        assert!(PlanPolicy::enterprise().is_metered());
        assert!(!PlanPolicy::premium().is_metered());
    }

    #[test]
    fn test_unknown_plan_resolves_to_default() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.resolve(&PlanId::new("gold")).id.as_str(), "free");
        assert_eq!(catalog.resolve(&PlanId::new("pro")).id.as_str(), "pro");
    }
}
