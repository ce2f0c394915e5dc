// ABOUTME: Redis counter store for rate limits shared across gateway instances
// ABOUTME: One Lua script performs INCR, sets PEXPIRE on the first hit and reads the PTTL
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::{CounterStore, WindowCount};
use crate::constants::rate_limit_keys::REDIS_KEY_PREFIX;
use crate::errors::{AppError, AppResult};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Script;
use std::time::Duration;
use tracing::{error, info, warn};

const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

const INITIAL_CONNECT_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 250;
const MAX_RETRY_DELAY_MS: u64 = 2_000;

/// Redis-backed counter store
///
/// Uses Redis `ConnectionManager` for automatic reconnection. All keys are
/// prefixed with `REDIS_KEY_PREFIX` so the store can share a Redis instance.
#[derive(Clone)]
pub struct RedisCounterStore {
    manager: ConnectionManager,
    script: Script,
}

impl RedisCounterStore {
    /// Connect to Redis with exponential backoff on the initial connection
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or every connection attempt fails
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        info!("Connecting rate-limit counter store to Redis");
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::config(format!("Invalid Redis URL: {e}")))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(5))
            .set_response_timeout(Duration::from_secs(2))
            .set_number_of_retries(3);

        let mut delay_ms = INITIAL_RETRY_DELAY_MS;
        let mut last_error = None;
        for attempt in 0..=INITIAL_CONNECT_RETRIES {
            match ConnectionManager::new_with_config(client.clone(), manager_config.clone()).await
            {
                Ok(manager) => {
                    info!(attempt, "Redis counter store connected");
                    return Ok(Self {
                        manager,
                        script: Script::new(INCREMENT_SCRIPT),
                    });
                }
                Err(e) => {
                    if attempt < INITIAL_CONNECT_RETRIES {
                        warn!(
                            "Redis connection attempt {}/{} failed, retrying in {}ms: {}",
                            attempt + 1,
                            INITIAL_CONNECT_RETRIES + 1,
                            delay_ms,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(MAX_RETRY_DELAY_MS);
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(AppError::unavailable(format!(
            "Failed to connect to Redis after {} attempts: {}",
            INITIAL_CONNECT_RETRIES + 1,
            last_error.map_or_else(|| "unknown error".to_owned(), |e| e.to_string())
        )))
    }

    fn build_key(key: &str) -> String {
        format!("{REDIS_KEY_PREFIX}{key}")
    }
}

fn ttl_to_remaining(ttl_ms: i64) -> Duration {
    Duration::from_millis(u64::try_from(ttl_ms).unwrap_or(0))
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> AppResult<WindowCount> {
        let mut conn = self.manager.clone();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);

        let (count, ttl_ms): (u64, i64) = self
            .script
            .key(Self::build_key(key))
            .arg(window_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis rate-limit script failed: {}", e);
                AppError::unavailable(format!("Counter store error: {e}"))
            })?;

        Ok(WindowCount {
            count,
            remaining: ttl_to_remaining(ttl_ms),
        })
    }

    async fn current(&self, key: &str) -> AppResult<Option<WindowCount>> {
        let mut conn = self.manager.clone();
        let redis_key = Self::build_key(key);

        let (count, ttl_ms): (Option<u64>, i64) = redis::pipe()
            .get(&redis_key)
            .pttl(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis rate-limit read failed: {}", e);
                AppError::unavailable(format!("Counter store error: {e}"))
            })?;

        Ok(count.map(|count| WindowCount {
            count,
            remaining: ttl_to_remaining(ttl_ms),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
