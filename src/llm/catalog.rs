// ABOUTME: Model catalog mapping public aliases to providers, tiers and per-token pricing
// ABOUTME: Cost maths in integer micro-USD per million tokens, rounded up
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::budget::ModelTier;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TOKENS_PER_PRICING_UNIT: i128 = 1_000_000;

/// Price of a model in micro-USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    /// Prompt tokens
    pub input_micros_per_million: i64,
    /// Generated tokens
    pub output_micros_per_million: i64,
}

impl Pricing {
    /// Create a price
    #[must_use]
    pub const fn new(input_micros_per_million: i64, output_micros_per_million: i64) -> Self {
        Self {
            input_micros_per_million,
            output_micros_per_million,
        }
    }

    /// Cost of a generation in micro-USD, rounded up to the next micro
    #[must_use]
    pub fn cost_micros(&self, input_tokens: i64, output_tokens: i64) -> i64 {
        let numerator = i128::from(input_tokens.max(0))
            * i128::from(self.input_micros_per_million)
            + i128::from(output_tokens.max(0)) * i128::from(self.output_micros_per_million);
        let rounded = (numerator + TOKENS_PER_PRICING_UNIT - 1) / TOKENS_PER_PRICING_UNIT;
        i64::try_from(rounded).unwrap_or(i64::MAX)
    }
}

/// One public model alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Alias clients send in `model`
    pub alias: String,
    /// Registered provider name
    pub provider: String,
    /// Model name sent to the provider
    pub provider_model: String,
    /// Access tier
    pub tier: ModelTier,
    /// Pricing
    pub pricing: Pricing,
}

impl ModelSpec {
    /// Create a model spec
    #[must_use]
    pub fn new(
        alias: impl Into<String>,
        provider: impl Into<String>,
        provider_model: impl Into<String>,
        tier: ModelTier,
        pricing: Pricing,
    ) -> Self {
        Self {
            alias: alias.into(),
            provider: provider.into(),
            provider_model: provider_model.into(),
            tier,
            pricing,
        }
    }
}

/// Known model aliases
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelSpec>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::from_specs([
            ModelSpec::new(
                "flash",
                "gemini",
                "gemini-2.0-flash",
                ModelTier::Standard,
                Pricing::new(100_000, 400_000),
            ),
            ModelSpec::new(
                "pro",
                "gemini",
                "gemini-2.5-pro",
                ModelTier::Premium,
                Pricing::new(1_250_000, 10_000_000),
            ),
            ModelSpec::new(
                "llama",
                "groq",
                "llama-3.3-70b-versatile",
                ModelTier::Standard,
                Pricing::new(590_000, 790_000),
            ),
            ModelSpec::new(
                "local",
                "local",
                "qwen2.5:14b-instruct",
                ModelTier::Standard,
                Pricing::new(0, 0),
            ),
        ])
    }
}

impl ModelCatalog {
    /// Build a catalog from specs; later aliases replace earlier ones
    #[must_use]
    pub fn from_specs(specs: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: specs
                .into_iter()
                .map(|spec| (spec.alias.clone(), spec))
                .collect(),
        }
    }

    /// Look up an alias
    #[must_use]
    pub fn get(&self, alias: &str) -> Option<&ModelSpec> {
        self.models.get(alias)
    }

    /// Add or replace an alias
    pub fn insert(&mut self, spec: ModelSpec) {
        self.models.insert(spec.alias.clone(), spec);
    }

    /// All aliases in order
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_rounds_up_to_micro() {
        let pricing = Pricing::new(100_000, 400_000);
        // 10 input tokens at $0.10/M = 1 micro; 3 output at $0.40/M = 1.2 micros
        assert_eq!(pricing.cost_micros(10, 3), 3);
        assert_eq!(pricing.cost_micros(0, 0), 0);
    }

    #[test]
    fn test_cost_for_a_million_tokens() {
        let pricing = Pricing::new(1_250_000, 10_000_000);
        assert_eq!(pricing.cost_micros(1_000_000, 0), 1_250_000);
        assert_eq!(pricing.cost_micros(0, 1_000_000), 10_000_000);
    }

    #[test]
    fn test_default_aliases() {
        let catalog = ModelCatalog::default();
        let aliases: Vec<&str> = catalog.aliases().collect();
        assert_eq!(aliases, vec!["flash", "llama", "local", "pro"]);
        assert_eq!(catalog.get("pro").map(|m| m.tier), Some(ModelTier::Premium));
        assert!(catalog.get("gpt-9").is_none());
    }
}
