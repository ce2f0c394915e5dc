// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Parses ports, database, JWT, rate limits, relay timeouts, search and model backends
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Environment-based configuration management for production deployment

use crate::constants::{defaults, env_config};
use crate::rate_limiting::{FailurePolicy, LimitSpec, RateLimitClass};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

/// Environment type for security and other configurations
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development
    #[default]
    Development,
    /// Production deployment
    Production,
    /// Automated tests
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL
    pub url: String,
}

/// Identity token configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &"[REDACTED]")
            .finish()
    }
}

/// Fixed-window limits for each action class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Chat requests per window
    pub chat_max: u32,
    /// Chat window in seconds
    pub chat_window_secs: u64,
    /// Searches per window
    pub search_max: u32,
    /// Search window in seconds
    pub search_window_secs: u64,
    /// Failed authentications per client key per window
    pub auth_failure_max: u32,
    /// Failed authentication window in seconds
    pub auth_failure_window_secs: u64,
    /// Behaviour when the counter store is unreachable
    pub failure_policy: FailurePolicy,
    /// Redis URL for the shared counter store; in-memory when unset
    pub redis_url: Option<String>,
    /// Whether `x-forwarded-for` comes from a proxy we trust
    ///
    /// When false the failed-auth guard keys on the peer address only, since
    /// clients can put anything in that header.
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    /// Limit spec for an action class
    #[must_use]
    pub const fn spec(&self, class: RateLimitClass) -> LimitSpec {
        match class {
            RateLimitClass::Chat => {
                LimitSpec::new(self.chat_max, Duration::from_secs(self.chat_window_secs))
            }
            RateLimitClass::Search => LimitSpec::new(
                self.search_max,
                Duration::from_secs(self.search_window_secs),
            ),
            RateLimitClass::AuthFailure => LimitSpec::new(
                self.auth_failure_max,
                Duration::from_secs(self.auth_failure_window_secs),
            ),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            chat_max: defaults::CHAT_RATE_LIMIT_MAX,
            chat_window_secs: defaults::CHAT_RATE_LIMIT_WINDOW_SECS,
            search_max: defaults::SEARCH_RATE_LIMIT_MAX,
            search_window_secs: defaults::SEARCH_RATE_LIMIT_WINDOW_SECS,
            auth_failure_max: defaults::AUTH_FAILURE_LIMIT_MAX,
            auth_failure_window_secs: defaults::AUTH_FAILURE_WINDOW_SECS,
            failure_policy: FailurePolicy::Closed,
            redis_url: None,
            trust_forwarded_for: false,
        }
    }
}

/// Backend stream timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Seconds without a fragment (or without a connection) before giving up
    pub idle_timeout_secs: u64,
    /// Seconds allowed for a whole generation
    pub total_timeout_secs: u64,
}

impl RelayConfig {
    /// Idle timeout as a duration
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Total timeout as a duration
    #[must_use]
    pub const fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: defaults::RELAY_IDLE_TIMEOUT_SECS,
            total_timeout_secs: defaults::RELAY_TOTAL_TIMEOUT_SECS,
        }
    }
}

/// Web-search augmentation settings
#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Upper bound on results folded into a prompt
    pub max_results: usize,
    /// Cost charged per search with results, micro-USD
    pub cost_micros: i64,
    /// Tavily API key; search is disabled when `None`
    pub tavily_api_key: Option<String>,
    /// Tavily API base URL
    pub tavily_base_url: String,
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("max_results", &self.max_results)
            .field("cost_micros", &self.cost_micros)
            .field("tavily_api_key", &self.tavily_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("tavily_base_url", &self.tavily_base_url)
            .finish()
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_results: defaults::SEARCH_MAX_RESULTS,
            cost_micros: defaults::SEARCH_COST_MICROS,
            tavily_api_key: None,
            tavily_base_url: defaults::TAVILY_BASE_URL.to_owned(),
        }
    }
}

/// Model backend credentials
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Gemini API key
    pub gemini_api_key: Option<String>,
    /// Groq API key
    pub groq_api_key: Option<String>,
    /// Local `OpenAI`-compatible server
    pub local_base_url: Option<String>,
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("gemini_api_key", &self.gemini_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("groq_api_key", &self.groq_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("local_base_url", &self.local_base_url)
            .finish()
    }
}

/// Admission estimates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Output tokens assumed when estimating cost at admission
    pub output_token_estimate: i64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            output_token_estimate: defaults::OUTPUT_TOKEN_ESTIMATE,
        }
    }
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `HTTP` listen port
    pub http_port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Storage
    pub database: DatabaseConfig,
    /// Identity tokens
    pub auth: AuthConfig,
    /// Rate limiting
    pub rate_limits: RateLimitConfig,
    /// Relay timeouts
    pub relay: RelayConfig,
    /// Search augmentation
    pub search: SearchConfig,
    /// Model backends
    pub llm: LlmConfig,
    /// Budget admission
    pub budget: BudgetConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable holds an unparsable value, or if no JWT
    /// secret is configured in production
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let environment =
            Environment::from_str_or_default(&env_var_or(env_config::ENVIRONMENT, "development"));

        let config = Self {
            http_port: parse_env(env_config::HTTP_PORT, defaults::HTTP_PORT)?,
            environment,
            database: DatabaseConfig {
                url: env_var_or(env_config::DATABASE_URL, defaults::DATABASE_URL),
            },
            auth: AuthConfig {
                jwt_secret: load_jwt_secret(environment)?,
            },
            rate_limits: RateLimitConfig {
                chat_max: parse_env(
                    env_config::RATE_LIMIT_CHAT_MAX,
                    defaults::CHAT_RATE_LIMIT_MAX,
                )?,
                chat_window_secs: parse_env(
                    env_config::RATE_LIMIT_CHAT_WINDOW_SECS,
                    defaults::CHAT_RATE_LIMIT_WINDOW_SECS,
                )?,
                search_max: parse_env(
                    env_config::RATE_LIMIT_SEARCH_MAX,
                    defaults::SEARCH_RATE_LIMIT_MAX,
                )?,
                search_window_secs: parse_env(
                    env_config::RATE_LIMIT_SEARCH_WINDOW_SECS,
                    defaults::SEARCH_RATE_LIMIT_WINDOW_SECS,
                )?,
                auth_failure_max: parse_env(
                    env_config::RATE_LIMIT_AUTH_FAILURE_MAX,
                    defaults::AUTH_FAILURE_LIMIT_MAX,
                )?,
                auth_failure_window_secs: parse_env(
                    env_config::RATE_LIMIT_AUTH_FAILURE_WINDOW_SECS,
                    defaults::AUTH_FAILURE_WINDOW_SECS,
                )?,
                failure_policy: parse_env(
                    env_config::RATE_LIMIT_FAILURE_POLICY,
                    FailurePolicy::Closed,
                )?,
                redis_url: optional_env(env_config::REDIS_URL),
                trust_forwarded_for: parse_env(
                    env_config::RATE_LIMIT_TRUST_FORWARDED_FOR,
                    false,
                )?,
            },
            relay: RelayConfig {
                idle_timeout_secs: parse_env(
                    env_config::RELAY_IDLE_TIMEOUT_SECS,
                    defaults::RELAY_IDLE_TIMEOUT_SECS,
                )?,
                total_timeout_secs: parse_env(
                    env_config::RELAY_TOTAL_TIMEOUT_SECS,
                    defaults::RELAY_TOTAL_TIMEOUT_SECS,
                )?,
            },
            search: SearchConfig {
                max_results: parse_env(
                    env_config::SEARCH_MAX_RESULTS,
                    defaults::SEARCH_MAX_RESULTS,
                )?,
                cost_micros: parse_env(
                    env_config::SEARCH_COST_MICROS,
                    defaults::SEARCH_COST_MICROS,
                )?,
                tavily_api_key: optional_env(env_config::TAVILY_API_KEY),
                tavily_base_url: env_var_or(
                    env_config::TAVILY_BASE_URL,
                    defaults::TAVILY_BASE_URL,
                ),
            },
            llm: LlmConfig {
                gemini_api_key: optional_env(env_config::GEMINI_API_KEY),
                groq_api_key: optional_env(env_config::GROQ_API_KEY),
                local_base_url: optional_env(env_config::LOCAL_LLM_BASE_URL),
            },
            budget: BudgetConfig {
                output_token_estimate: parse_env(
                    env_config::OUTPUT_TOKEN_ESTIMATE,
                    defaults::OUTPUT_TOKEN_ESTIMATE,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Configuration for tests and embedded use: in-memory defaults with a fixed secret
    #[must_use]
    pub fn for_testing(jwt_secret: impl Into<String>) -> Self {
        Self {
            http_port: defaults::HTTP_PORT,
            environment: Environment::Testing,
            database: DatabaseConfig {
                url: "sqlite::memory:".to_owned(),
            },
            auth: AuthConfig {
                jwt_secret: jwt_secret.into(),
            },
            rate_limits: RateLimitConfig::default(),
            relay: RelayConfig::default(),
            search: SearchConfig::default(),
            llm: LlmConfig::default(),
            budget: BudgetConfig::default(),
        }
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting
    pub fn validate(&self) -> Result<()> {
        if self.rate_limits.chat_window_secs == 0
            || self.rate_limits.search_window_secs == 0
            || self.rate_limits.auth_failure_window_secs == 0
        {
            bail!("Rate limit windows must be at least one second");
        }
        if self.relay.idle_timeout_secs == 0 || self.relay.total_timeout_secs == 0 {
            bail!("Relay timeouts must be at least one second");
        }
        if self.search.cost_micros < 0 {
            bail!("SEARCH_COST_MICROS must not be negative");
        }
        if self.budget.output_token_estimate < 0 {
            bail!("OUTPUT_TOKEN_ESTIMATE must not be negative");
        }
        Ok(())
    }

    /// Log a redacted configuration summary
    pub fn log_summary(&self) {
        info!(
            http_port = self.http_port,
            environment = ?self.environment,
            database = %self.database.url,
            counter_store = if self.rate_limits.redis_url.is_some() { "redis" } else { "memory" },
            failure_policy = ?self.rate_limits.failure_policy,
            search_enabled = self.search.tavily_api_key.is_some(),
            "Server configuration loaded"
        );
    }
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Get a non-empty environment variable
fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw}")),
        _ => Ok(default),
    }
}

fn load_jwt_secret(environment: Environment) -> Result<String> {
    if let Some(secret) = optional_env(env_config::JWT_SECRET) {
        return Ok(secret);
    }
    if environment.is_production() {
        bail!("{} must be set in production", env_config::JWT_SECRET);
    }
    warn!(
        "{} not set; using a random per-process secret, tokens will not survive restarts",
        env_config::JWT_SECRET
    );
    Ok(format!("dev-{}", uuid::Uuid::new_v4().simple()))
}
