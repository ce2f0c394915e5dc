// ABOUTME: Fixed-window rate limiting keyed by identity (or anonymous client key) and action class
// ABOUTME: Increment-and-check is one atomic store operation; store outages follow a failure policy
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Rate Limiting
//!
//! Each request increments a counter keyed by `(subject, action class)` inside a
//! fixed window. The first increment of a window starts it; when the window elapses
//! the counter restarts from zero. A request is allowed while the post-increment
//! count stays within the class limit, and a denial carries the time left in the
//! window as its retry-after hint.
//!
//! Counters live in a [`CounterStore`]: [`memory::InMemoryCounterStore`] for a single
//! process or [`redis::RedisCounterStore`] when several instances share limits.

/// In-process counter store backed by `DashMap`
pub mod memory;
/// Redis counter store using an atomic `INCR` + `PEXPIRE` script
pub mod redis;

pub use memory::InMemoryCounterStore;
pub use redis::RedisCounterStore;

use crate::constants::rate_limit_keys::ANONYMOUS_PREFIX;
use crate::errors::{AppError, AppResult};
use crate::models::IdentityId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Independently limited action classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitClass {
    /// Chat generation requests
    Chat,
    /// Web-search augmentation
    Search,
    /// Failed authentication attempts from one client key
    AuthFailure,
}

impl RateLimitClass {
    /// Stable name used in counter keys and error details
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Search => "search",
            Self::AuthFailure => "auth_failure",
        }
    }
}

impl fmt::Display for RateLimitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window length and maximum count for one action class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitSpec {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl LimitSpec {
    /// Create a limit spec
    #[must_use]
    pub const fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }
}

/// Counter key: an identity or an anonymous client key, plus the action class
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    subject: String,
    class: RateLimitClass,
}

impl RateLimitKey {
    /// Key for an authenticated identity
    #[must_use]
    pub fn identity(identity: &IdentityId, class: RateLimitClass) -> Self {
        Self {
            subject: identity.as_str().to_owned(),
            class,
        }
    }

    /// Key for an unauthenticated client (address or similar)
    #[must_use]
    pub fn anonymous(client_key: &str, class: RateLimitClass) -> Self {
        Self {
            subject: format!("{ANONYMOUS_PREFIX}{client_key}"),
            class,
        }
    }

    /// Action class of this key
    #[must_use]
    pub const fn class(&self) -> RateLimitClass {
        self.class
    }

    /// Flat key used by counter stores
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.subject, self.class.as_str())
    }
}

/// Counter value and time left in its window after an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window
    pub count: u64,
    /// Time until the window resets
    pub remaining: Duration,
}

/// Result of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Limit applied
    pub limit: u32,
    /// Requests left in the window after this one
    pub remaining: u32,
    /// Wait before retrying; set only on denial
    pub retry_after: Option<Duration>,
}

impl RateLimitDecision {
    fn allow(limit: u32, remaining: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after: None,
        }
    }

    fn deny(limit: u32, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after: Some(retry_after),
        }
    }

    /// Convert a denial into the 429 error raised before a stream opens
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` with the retry-after hint when denied
    pub fn into_result(self, class: RateLimitClass) -> AppResult<Self> {
        match self.retry_after {
            Some(retry_after) if !self.allowed => {
                Err(AppError::rate_limited(class.as_str(), retry_after))
            }
            _ => Ok(self),
        }
    }
}

/// Behaviour when the counter store cannot be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Allow the request and log a warning
    Open,
    /// Deny the request with the class window as retry-after
    Closed,
}

impl FromStr for FailurePolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            other => Err(AppError::config(format!(
                "Unknown rate limit failure policy '{other}', expected 'open' or 'closed'"
            ))),
        }
    }
}

/// Atomically incrementable, window-expiring counters
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment the counter for `key` and return its new value
    ///
    /// Starts a new window of length `window` when the key is absent or expired.
    async fn increment(&self, key: &str, window: Duration) -> AppResult<WindowCount>;

    /// Read the counter without incrementing it
    async fn current(&self, key: &str) -> AppResult<Option<WindowCount>>;

    /// Drop expired counters; a no-op for stores with native expiry
    async fn purge_expired(&self) -> AppResult<usize> {
        Ok(0)
    }

    /// Backend name for logs and health output
    fn backend_name(&self) -> &'static str;
}

/// Rate limiter over a shared counter store
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    policy: FailurePolicy,
}

impl RateLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(store: Arc<dyn CounterStore>, policy: FailurePolicy) -> Self {
        Self { store, policy }
    }

    /// Counter store backing this limiter
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Increment the counter for `key` and decide whether the request may proceed
    pub async fn check(&self, key: &RateLimitKey, spec: &LimitSpec) -> RateLimitDecision {
        let storage_key = key.storage_key();
        match self.store.increment(&storage_key, spec.window).await {
            Ok(window) => Self::decide(window, spec),
            Err(e) => self.on_store_failure(&storage_key, spec, &e),
        }
    }

    /// Decide from the current count without consuming a slot
    ///
    /// Used by the failed-authentication guard, which only increments on failure.
    pub async fn peek(&self, key: &RateLimitKey, spec: &LimitSpec) -> RateLimitDecision {
        let storage_key = key.storage_key();
        match self.store.current(&storage_key).await {
            Ok(Some(window)) if window.count >= u64::from(spec.max_requests) => {
                RateLimitDecision::deny(spec.max_requests, window.remaining)
            }
            Ok(Some(window)) => RateLimitDecision::allow(
                spec.max_requests,
                remaining_after(window.count, spec.max_requests),
            ),
            Ok(None) => RateLimitDecision::allow(spec.max_requests, spec.max_requests),
            Err(e) => self.on_store_failure(&storage_key, spec, &e),
        }
    }

    fn decide(window: WindowCount, spec: &LimitSpec) -> RateLimitDecision {
        if window.count > u64::from(spec.max_requests) {
            debug!(
                count = window.count,
                limit = spec.max_requests,
                retry_after_ms = window.remaining.as_millis() as u64,
                "Rate limit exceeded"
            );
            RateLimitDecision::deny(spec.max_requests, window.remaining)
        } else {
            RateLimitDecision::allow(
                spec.max_requests,
                remaining_after(window.count, spec.max_requests),
            )
        }
    }

    fn on_store_failure(
        &self,
        storage_key: &str,
        spec: &LimitSpec,
        error: &AppError,
    ) -> RateLimitDecision {
        match self.policy {
            FailurePolicy::Open => {
                warn!(
                    key = %storage_key,
                    backend = self.store.backend_name(),
                    error = %error,
                    "Counter store unavailable, failing open"
                );
                RateLimitDecision::allow(spec.max_requests, 0)
            }
            FailurePolicy::Closed => {
                warn!(
                    key = %storage_key,
                    backend = self.store.backend_name(),
                    error = %error,
                    "Counter store unavailable, failing closed"
                );
                RateLimitDecision::deny(spec.max_requests, spec.window)
            }
        }
    }
}

fn remaining_after(count: u64, max: u32) -> u32 {
    u64::from(max).saturating_sub(count) as u32
}
