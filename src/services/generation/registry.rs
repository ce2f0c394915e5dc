// ABOUTME: Registry of in-flight generations and stashed partial responses
// ABOUTME: Supports owner-only abort and a bounded window to save an aborted response
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::errors::{AppError, AppResult};
use crate::llm::ModelSpec;
use crate::models::IdentityId;
use crate::search::SearchResult;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct ActiveGeneration {
    owner: IdentityId,
    chat_id: String,
    cancel: CancellationToken,
}

/// Content of an aborted generation that its owner may still save
#[derive(Debug, Clone)]
pub struct PartialGeneration {
    /// Owner
    pub owner: IdentityId,
    /// Target chat
    pub chat_id: String,
    /// Default model for a chat created on save
    pub default_model: String,
    /// Model that produced the content
    pub model: ModelSpec,
    /// Triggering user message
    pub user_content: String,
    /// Content relayed before the abort
    pub content: String,
    /// Search results folded into the prompt
    pub sources: Vec<SearchResult>,
    /// Estimated prompt tokens
    pub input_tokens: i64,
    /// Tokens assumed at admission
    pub estimated_tokens: i64,
    /// Whether the chat had no messages when the generation started
    pub first_exchange: bool,
}

struct StashedPartial {
    partial: PartialGeneration,
    stashed_at: Instant,
}

/// In-flight generations and their partial stashes
pub struct GenerationRegistry {
    active: DashMap<String, ActiveGeneration>,
    partials: DashMap<String, StashedPartial>,
    partial_ttl: Duration,
}

impl GenerationRegistry {
    /// Registry keeping partials for `partial_ttl`
    #[must_use]
    pub fn new(partial_ttl: Duration) -> Self {
        Self {
            active: DashMap::new(),
            partials: DashMap::new(),
            partial_ttl,
        }
    }

    /// Track a generation; the returned token is cancelled by [`Self::abort`] or
    /// when `parent` is cancelled
    pub fn register(
        &self,
        generation_id: &str,
        owner: &IdentityId,
        chat_id: &str,
        parent: &CancellationToken,
    ) -> CancellationToken {
        let cancel = parent.child_token();
        self.active.insert(
            generation_id.to_owned(),
            ActiveGeneration {
                owner: owner.clone(),
                chat_id: chat_id.to_owned(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Stop tracking a generation
    pub fn finish(&self, generation_id: &str) {
        self.active.remove(generation_id);
    }

    /// Cancel a running generation owned by `owner`
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when the generation is not running or belongs to
    /// someone else
    pub fn abort(&self, generation_id: &str, owner: &IdentityId) -> AppResult<()> {
        let active = self
            .active
            .get(generation_id)
            .filter(|active| &active.owner == owner)
            .ok_or_else(|| AppError::not_found("Generation"))?;
        active.cancel.cancel();
        info!(
            generation_id,
            identity = %owner,
            chat_id = %active.chat_id,
            "Generation aborted by owner"
        );
        Ok(())
    }

    /// Keep an aborted generation's content for later saving
    pub fn stash_partial(&self, generation_id: &str, partial: PartialGeneration) {
        debug!(generation_id, chars = partial.content.len(), "Partial stashed");
        self.partials.insert(
            generation_id.to_owned(),
            StashedPartial {
                partial,
                stashed_at: Instant::now(),
            },
        );
    }

    /// Remove and return a stashed partial owned by `owner`
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` when nothing is stashed, the stash expired or it
    /// belongs to someone else
    pub fn take_partial(
        &self,
        generation_id: &str,
        owner: &IdentityId,
    ) -> AppResult<PartialGeneration> {
        let ttl = self.partial_ttl;
        self.partials
            .remove_if(generation_id, |_, stash| {
                &stash.partial.owner == owner && stash.stashed_at.elapsed() <= ttl
            })
            .map(|(_, stash)| stash.partial)
            .ok_or_else(|| AppError::not_found("Partial generation"))
    }

    /// Drop expired partials
    pub fn purge_expired(&self) -> usize {
        let before = self.partials.len();
        let ttl = self.partial_ttl;
        self.partials
            .retain(|_, stash| stash.stashed_at.elapsed() <= ttl);
        before.saturating_sub(self.partials.len())
    }

    /// Number of running generations
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel every running generation
    pub fn abort_all(&self) {
        for active in &self.active {
            active.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ModelCatalog;

    fn partial(owner: &str) -> PartialGeneration {
        PartialGeneration {
            owner: IdentityId::new(owner),
            chat_id: "c1".to_owned(),
            default_model: "flash".to_owned(),
            model: ModelCatalog::default().get("flash").cloned().unwrap(),
            user_content: "hi".to_owned(),
            content: "half an ans".to_owned(),
            sources: Vec::new(),
            input_tokens: 1,
            estimated_tokens: 1025,
            first_exchange: true,
        }
    }

    #[test]
    fn test_abort_requires_owner() {
        let registry = GenerationRegistry::new(Duration::from_secs(60));
        let root = CancellationToken::new();
        let token = registry.register("g1", &IdentityId::new("alice"), "c1", &root);

        assert!(registry.abort("g1", &IdentityId::new("bob")).is_err());
        assert!(!token.is_cancelled());
        registry.abort("g1", &IdentityId::new("alice")).unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_parent_cancellation_reaches_generation() {
        let registry = GenerationRegistry::new(Duration::from_secs(60));
        let root = CancellationToken::new();
        let token = registry.register("g1", &IdentityId::new("alice"), "c1", &root);
        root.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_partial_taken_once_by_owner() {
        let registry = GenerationRegistry::new(Duration::from_secs(60));
        registry.stash_partial("g1", partial("alice"));

        assert!(registry.take_partial("g1", &IdentityId::new("bob")).is_err());
        let taken = registry.take_partial("g1", &IdentityId::new("alice")).unwrap();
        assert_eq!(taken.content, "half an ans");
        assert!(registry.take_partial("g1", &IdentityId::new("alice")).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_expires() {
        let registry = GenerationRegistry::new(Duration::from_secs(5));
        registry.stash_partial("g1", partial("alice"));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.take_partial("g1", &IdentityId::new("alice")).is_err());
    }
}
