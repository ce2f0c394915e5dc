// ABOUTME: Process-scoped server state created at startup and torn down at shutdown
// ABOUTME: Wires stores, limiter, budget gate, providers, ledger and background workers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Server Resources
//!
//! Lifecycle:
//!
//! 1. [`ServerResources::initialize`] (or the builder) connects the database,
//!    picks the counter store, registers model backends and starts the sweeper.
//! 2. Routes receive an `Arc<ServerResources>` and never create shared state of
//!    their own.
//! 3. [`ServerResources::shutdown`] cancels running generations, drains
//!    background tasks and closes the database pool.

use crate::auth::{IdentityResolver, JwtIdentityResolver};
use crate::budget::{BudgetGate, BudgetStore, PlanCatalog};
use crate::config::environment::ServerConfig;
use crate::constants::defaults::{
    PARTIAL_STASH_TTL_SECS, SHUTDOWN_GRACE_SECS, SWEEP_INTERVAL_SECS,
};
use crate::database::{ActivityStore, ChatStore, Database, UsageStore};
use crate::ledger::{CharRatioEstimator, UsageLedger};
use crate::llm::{
    LlmProvider, LlmProviderRegistry, ModelCatalog, OpenAiCompatibleConfig,
    OpenAiCompatibleProvider,
};
use crate::rate_limiting::{CounterStore, InMemoryCounterStore, RateLimiter, RedisCounterStore};
use crate::relay::InferenceRelay;
use crate::search::{SearchAugmenter, SearchProvider, TavilySearchProvider};
use crate::services::background::BackgroundDispatcher;
use crate::services::generation::GenerationRegistry;
use crate::services::jobs::JobRegistry;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Shared state for every request
pub struct ServerResources {
    /// Configuration
    pub config: Arc<ServerConfig>,
    /// Database handle
    pub database: Arc<Database>,
    /// Caller identity resolution
    pub identity: Arc<dyn IdentityResolver>,
    /// Fixed-window rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// Plan and budget admission
    pub budget: Arc<BudgetGate>,
    /// Model aliases
    pub catalog: Arc<ModelCatalog>,
    /// Model backends by provider name
    pub providers: Arc<LlmProviderRegistry>,
    /// Web-search augmentation
    pub search: Arc<SearchAugmenter>,
    /// Backend stream relay
    pub relay: InferenceRelay,
    /// Usage ledger
    pub ledger: Arc<UsageLedger>,
    /// Chat persistence
    pub chats: Arc<dyn ChatStore>,
    /// Usage cost records
    pub usage: Arc<dyn UsageStore>,
    /// Activity log
    pub activity: Arc<dyn ActivityStore>,
    /// In-flight generations and partial stashes
    pub generations: Arc<GenerationRegistry>,
    /// Generation job statuses
    pub jobs: JobRegistry,
    /// Best-effort side effects
    pub background: BackgroundDispatcher,
    /// Cancelled at shutdown; parent of every generation token
    pub shutdown: CancellationToken,
}

impl ServerResources {
    /// Build resources from configuration alone
    ///
    /// # Errors
    ///
    /// Returns an error if the database or a configured backend cannot be set up
    pub async fn initialize(config: ServerConfig) -> Result<Arc<Self>> {
        ServerResourcesBuilder::new(config).build().await
    }

    /// Builder for overriding individual components
    #[must_use]
    pub fn builder(config: ServerConfig) -> ServerResourcesBuilder {
        ServerResourcesBuilder::new(config)
    }

    /// Tear everything down
    pub async fn shutdown(&self) {
        info!("Shutting down server resources");
        self.shutdown.cancel();
        self.generations.abort_all();
        self.background
            .shutdown(Duration::from_secs(SHUTDOWN_GRACE_SECS))
            .await;
        self.database.close().await;
    }

    fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let resources = Arc::downgrade(self);
        let stop = self.background.cancellation();
        self.background.spawn_worker("sweeper", async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = stop.cancelled() => return Ok(()),
                    _ = ticker.tick() => {}
                }
                let Some(resources) = resources.upgrade() else {
                    return Ok(());
                };
                let counters = match resources.rate_limiter.store().purge_expired().await {
                    Ok(purged) => purged,
                    Err(e) => {
                        warn!(error = %e, "Counter sweep failed");
                        0
                    }
                };
                let locks = resources.budget.purge_idle_locks();
                let partials = resources.generations.purge_expired();
                let jobs = resources
                    .jobs
                    .purge_settled(Duration::from_secs(PARTIAL_STASH_TTL_SECS));
                debug!(counters, locks, partials, jobs, "Sweep finished");
            }
        });
    }
}

/// Builder for [`ServerResources`]
pub struct ServerResourcesBuilder {
    config: ServerConfig,
    database: Option<Database>,
    counter_store: Option<Arc<dyn CounterStore>>,
    budget_store: Option<Arc<dyn BudgetStore>>,
    chat_store: Option<Arc<dyn ChatStore>>,
    usage_store: Option<Arc<dyn UsageStore>>,
    llm_providers: Vec<Arc<dyn LlmProvider>>,
    search_provider: Option<Arc<dyn SearchProvider>>,
    catalog: Option<ModelCatalog>,
    plans: Option<PlanCatalog>,
    sweep_interval: Duration,
}

impl ServerResourcesBuilder {
    /// Builder with production wiring derived from `config`
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            database: None,
            counter_store: None,
            budget_store: None,
            chat_store: None,
            usage_store: None,
            llm_providers: Vec::new(),
            search_provider: None,
            catalog: None,
            plans: None,
            sweep_interval: Duration::from_secs(SWEEP_INTERVAL_SECS),
        }
    }

    /// Use an existing database
    #[must_use]
    pub fn database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }

    /// Use a specific counter store
    #[must_use]
    pub fn counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Use a specific budget store instead of the database
    #[must_use]
    pub fn budget_store(mut self, store: Arc<dyn BudgetStore>) -> Self {
        self.budget_store = Some(store);
        self
    }

    /// Use a specific chat store instead of the database
    #[must_use]
    pub fn chat_store(mut self, store: Arc<dyn ChatStore>) -> Self {
        self.chat_store = Some(store);
        self
    }

    /// Use a specific usage store instead of the database
    #[must_use]
    pub fn usage_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    /// Register a model backend, replacing any configured one with the same name
    #[must_use]
    pub fn llm_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm_providers.push(provider);
        self
    }

    /// Use a specific search provider
    #[must_use]
    pub fn search_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search_provider = Some(provider);
        self
    }

    /// Use a custom model catalog
    #[must_use]
    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Use a custom plan catalog
    #[must_use]
    pub fn plans(mut self, plans: PlanCatalog) -> Self {
        self.plans = Some(plans);
        self
    }

    /// Interval of the expiry sweeper
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Assemble the resources and start the sweeper
    ///
    /// # Errors
    ///
    /// Returns an error if the database, Redis or a configured backend cannot be
    /// set up
    pub async fn build(self) -> Result<Arc<ServerResources>> {
        let config = self.config;

        let database = match self.database {
            Some(database) => database,
            None => Database::new(&config.database.url)
                .await
                .context("Failed to initialize database")?,
        };
        let database = Arc::new(database);

        let counter_store: Arc<dyn CounterStore> = match self.counter_store {
            Some(store) => store,
            None => match &config.rate_limits.redis_url {
                Some(url) => Arc::new(
                    RedisCounterStore::connect(url)
                        .await
                        .context("Failed to connect rate-limit store")?,
                ),
                None => Arc::new(InMemoryCounterStore::new()),
            },
        };
        info!(
            backend = counter_store.backend_name(),
            policy = ?config.rate_limits.failure_policy,
            "Rate limiter ready"
        );
        let rate_limiter = Arc::new(RateLimiter::new(
            counter_store,
            config.rate_limits.failure_policy,
        ));

        let budget_store: Arc<dyn BudgetStore> = self
            .budget_store
            .unwrap_or_else(|| Arc::clone(&database) as Arc<dyn BudgetStore>);
        let budget = Arc::new(BudgetGate::new(
            budget_store,
            self.plans.unwrap_or_default(),
        ));

        let chats: Arc<dyn ChatStore> = self
            .chat_store
            .unwrap_or_else(|| Arc::clone(&database) as Arc<dyn ChatStore>);
        let usage: Arc<dyn UsageStore> = self
            .usage_store
            .unwrap_or_else(|| Arc::clone(&database) as Arc<dyn UsageStore>);
        let activity: Arc<dyn ActivityStore> = Arc::clone(&database) as Arc<dyn ActivityStore>;

        let mut providers = configured_providers(&config)?;
        for provider in self.llm_providers {
            providers.register(provider);
        }
        if providers.is_empty() {
            warn!("No model backends configured; every generation will be rejected");
        } else {
            info!(providers = ?providers.names(), "Model backends registered");
        }

        let search_provider = match self.search_provider {
            Some(provider) => Some(provider),
            None => configured_search(&config)?,
        };
        let search = Arc::new(SearchAugmenter::new(
            search_provider,
            config.search.max_results,
        ));

        let ledger = Arc::new(UsageLedger::new(
            Arc::clone(&chats),
            Arc::clone(&usage),
            Arc::clone(&budget),
            Arc::new(CharRatioEstimator::default()),
        ));

        let resources = Arc::new(ServerResources {
            identity: Arc::new(JwtIdentityResolver::new(&config.auth.jwt_secret)),
            relay: InferenceRelay::new(config.relay.idle_timeout(), config.relay.total_timeout()),
            config: Arc::new(config),
            database,
            rate_limiter,
            budget,
            catalog: Arc::new(self.catalog.unwrap_or_default()),
            providers: Arc::new(providers),
            search,
            ledger,
            chats,
            usage,
            activity,
            generations: Arc::new(GenerationRegistry::new(Duration::from_secs(
                PARTIAL_STASH_TTL_SECS,
            ))),
            jobs: JobRegistry::new(),
            background: BackgroundDispatcher::new(),
            shutdown: CancellationToken::new(),
        });
        resources.start_sweeper(self.sweep_interval);

        Ok(resources)
    }
}

fn configured_providers(config: &ServerConfig) -> Result<LlmProviderRegistry> {
    let mut registry = LlmProviderRegistry::new();
    let mut configs = Vec::new();
    if let Some(key) = &config.llm.gemini_api_key {
        configs.push(OpenAiCompatibleConfig::gemini(key.clone()));
    }
    if let Some(key) = &config.llm.groq_api_key {
        configs.push(OpenAiCompatibleConfig::groq(key.clone()));
    }
    if let Some(url) = &config.llm.local_base_url {
        configs.push(OpenAiCompatibleConfig::local(url.clone()));
    }
    for provider_config in configs {
        let name = provider_config.name.clone();
        let provider = OpenAiCompatibleProvider::new(provider_config)
            .with_context(|| format!("Failed to create {name} provider"))?;
        registry.register(Arc::new(provider));
    }
    Ok(registry)
}

fn configured_search(config: &ServerConfig) -> Result<Option<Arc<dyn SearchProvider>>> {
    let Some(key) = &config.search.tavily_api_key else {
        return Ok(None);
    };
    let provider = TavilySearchProvider::new(&config.search.tavily_base_url, key.clone())
        .context("Failed to create search provider")?;
    Ok(Some(Arc::new(provider)))
}
