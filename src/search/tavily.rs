// ABOUTME: Tavily web search API client implementing SearchProvider
// ABOUTME: POSTs the query to /search and maps hits to title, snippet and url
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::{SearchProvider, SearchResult};
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;
use url::Url;

const REQUEST_TIMEOUT_SECS: u64 = 8;
/// Largest `max_results` the search API accepts
const MAX_RESULTS_PER_QUERY: usize = 20;

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
    include_answer: bool,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyHit>,
}

#[derive(Deserialize)]
struct TavilyHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

/// Tavily search provider
pub struct TavilySearchProvider {
    client: Client,
    endpoint: Url,
    api_key: String,
}

impl TavilySearchProvider {
    /// Create a provider against `base_url`
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid base URL, or an internal
    /// error if the HTTP client cannot be built
    pub fn new(base_url: &str, api_key: impl Into<String>) -> AppResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::config(format!("Invalid TAVILY_BASE_URL: {e}")))?;
        let endpoint = base
            .join("search")
            .map_err(|e| AppError::config(format!("Invalid TAVILY_BASE_URL: {e}")))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearchProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    #[instrument(skip(self, query))]
    async fn search(&self, query: &str, max_results: usize) -> AppResult<Vec<SearchResult>> {
        let max_results = max_results.min(MAX_RESULTS_PER_QUERY);
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&TavilyRequest {
                api_key: &self.api_key,
                query,
                max_results,
                search_depth: "basic",
                include_answer: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::external_service(
                "tavily",
                format!("search returned {status}"),
            ));
        }

        let body: TavilyResponse = response.json().await?;
        Ok(body
            .results
            .into_iter()
            .take(max_results)
            .map(|hit| SearchResult {
                title: hit.title,
                snippet: hit.content,
                url: hit.url,
            })
            .collect())
    }
}
