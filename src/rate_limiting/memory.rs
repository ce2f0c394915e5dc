// ABOUTME: In-memory fixed-window counter store using DashMap's entry API
// ABOUTME: Single-process deployments and tests; expired windows are swept periodically
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::{CounterStore, WindowCount};
use crate::errors::AppResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Counter state: (count, window start, window length)
type Window = (u64, Instant, Duration);

/// In-memory counter store with per-key sharded locking
///
/// `DashMap::entry` holds the shard lock for the read-modify-write, which makes
/// each increment linearizable with respect to other increments of the same key.
#[derive(Clone, Default)]
pub struct InMemoryCounterStore {
    counters: Arc<DashMap<String, Window>>,
}

impl InMemoryCounterStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked keys
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether no keys are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

fn remaining(start: Instant, window: Duration, now: Instant) -> Duration {
    window.saturating_sub(now.duration_since(start))
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> AppResult<WindowCount> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_owned())
            .or_insert((0, now, window));
        let (count, start, length) = entry.value_mut();

        if now.duration_since(*start) >= *length {
            *count = 0;
            *start = now;
            *length = window;
        }
        *count += 1;

        let result = WindowCount {
            count: *count,
            remaining: remaining(*start, *length, now),
        };
        drop(entry);
        Ok(result)
    }

    async fn current(&self, key: &str) -> AppResult<Option<WindowCount>> {
        let now = Instant::now();
        Ok(self.counters.get(key).and_then(|entry| {
            let (count, start, length) = *entry.value();
            (now.duration_since(start) < length).then(|| WindowCount {
                count,
                remaining: remaining(start, length, now),
            })
        }))
    }

    async fn purge_expired(&self) -> AppResult<usize> {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters
            .retain(|_key, (_count, start, length)| now.duration_since(*start) < *length);
        Ok(before.saturating_sub(self.counters.len()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
