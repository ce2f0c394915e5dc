// ABOUTME: Length-based token estimation shared by admission and settlement
// ABOUTME: One estimator instance prices both sides so any drift is recorded, not hidden
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::llm::ChatMessage;
use std::fmt;

/// Estimates the token count of a text
pub trait TokenEstimator: Send + Sync + fmt::Debug {
    /// Estimated tokens in `text`
    fn estimate(&self, text: &str) -> i64;
}

/// `ceil(chars / ratio)` estimator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharRatioEstimator {
    chars_per_token: usize,
}

impl CharRatioEstimator {
    /// Estimator with a custom ratio; zero is treated as one
    #[must_use]
    pub const fn new(chars_per_token: usize) -> Self {
        Self {
            chars_per_token: if chars_per_token == 0 {
                1
            } else {
                chars_per_token
            },
        }
    }
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self::new(4)
    }
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, text: &str) -> i64 {
        let chars = text.chars().count();
        i64::try_from(chars.div_ceil(self.chars_per_token)).unwrap_or(i64::MAX)
    }
}

/// Estimated tokens of a whole prompt
#[must_use]
pub fn estimate_messages(estimator: &dyn TokenEstimator, messages: &[ChatMessage]) -> i64 {
    messages
        .iter()
        .map(|message| estimator.estimate(&message.content))
        .sum()
}
