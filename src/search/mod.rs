// ABOUTME: Optional web-search augmentation of prompts with a bounded set of snippets
// ABOUTME: Renders results into one system-context message and a parsable sources marker
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Search Augmenter
//!
//! Given the latest user message, fetch at most `max_results` snippets from a
//! [`SearchProvider`]. An empty result means no augmentation. Provider failures are
//! logged and treated as empty, so search can never fail a generation.
//!
//! Results are folded into the prompt as a single prepended system message and
//! recorded on the persisted assistant message as a sources marker (see [`sources`]).

/// Machine-parsable sources suffix for assistant messages
pub mod sources;
/// Tavily search API provider
pub mod tavily;

pub use tavily::TavilySearchProvider;

use crate::constants::limits::{MAX_SNIPPET_CHARS, SEARCH_OVERFETCH_FACTOR};
use crate::errors::AppResult;
use crate::llm::ChatMessage;
use crate::utils::sanitize::sanitize_user_content;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Page title
    pub title: String,
    /// Relevant excerpt
    pub snippet: String,
    /// Page URL
    pub url: String,
}

/// Web-search backend
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Provider name for logs and cost records
    fn name(&self) -> &str;

    /// Search for `query`, returning at most `max_results` hits
    async fn search(&self, query: &str, max_results: usize) -> AppResult<Vec<SearchResult>>;
}

/// Bounded, failure-tolerant search front end
#[derive(Clone)]
pub struct SearchAugmenter {
    provider: Option<Arc<dyn SearchProvider>>,
    max_results: usize,
}

impl SearchAugmenter {
    /// Create an augmenter; `None` disables search
    #[must_use]
    pub fn new(provider: Option<Arc<dyn SearchProvider>>, max_results: usize) -> Self {
        Self {
            provider,
            max_results,
        }
    }

    /// Augmenter that never searches
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(None, 0)
    }

    /// Whether a provider is configured
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.provider.is_some() && self.max_results > 0
    }

    /// Provider name, if enabled
    #[must_use]
    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_deref().map(SearchProvider::name)
    }

    /// Fetch snippets for `query`; empty on failure, blank query or when disabled
    pub async fn augment(&self, query: &str) -> Vec<SearchResult> {
        let Some(provider) = self.provider.as_ref() else {
            return Vec::new();
        };
        let query = query.trim();
        if query.is_empty() || self.max_results == 0 {
            return Vec::new();
        }

        // Hits without a usable URL are dropped below, so ask for more than we keep
        let requested = self.max_results.saturating_mul(SEARCH_OVERFETCH_FACTOR);
        match provider.search(query, requested).await {
            Ok(results) => {
                let cleaned: Vec<SearchResult> = results
                    .into_iter()
                    .filter_map(clean_result)
                    .take(self.max_results)
                    .collect();
                debug!(
                    provider = provider.name(),
                    requested,
                    results = cleaned.len(),
                    "Search completed"
                );
                cleaned
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    error = %e,
                    "Search failed, proceeding without augmentation"
                );
                Vec::new()
            }
        }
    }
}

fn clean_result(result: SearchResult) -> Option<SearchResult> {
    let url = result.url.trim().to_owned();
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return None;
    }
    let snippet: String = sanitize_user_content(&result.snippet)
        .chars()
        .take(MAX_SNIPPET_CHARS)
        .collect();
    Some(SearchResult {
        title: sanitize_user_content(&result.title),
        snippet,
        url,
    })
}

/// Render results into the system-context message prepended to the prompt
#[must_use]
pub fn render_context(results: &[SearchResult]) -> ChatMessage {
    let mut context = String::from(
        "Use the following web search results to answer the user's latest message. \
         Cite sources by their number when you rely on them.\n",
    );
    for (index, result) in results.iter().enumerate() {
        let _ = write!(
            context,
            "\n[{}] {}\n{}\n{}\n",
            index + 1,
            result.title,
            result.url,
            result.snippet
        );
    }
    ChatMessage::system(context)
}
