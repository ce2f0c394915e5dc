// ABOUTME: Job status state machine and pull loop for long-running generation flows
// ABOUTME: Processing settles once to Completed or Failed; pollers wait with a fixed interval
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::errors::{AppError, AppResult};
use crate::models::IdentityId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Status of a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Still running
    Processing,
    /// Finished with a result
    Completed {
        /// Job output
        result: Value,
    },
    /// Finished with an error
    Failed {
        /// User-safe reason
        reason: String,
    },
}

impl JobStatus {
    /// Whether the job reached a final state
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// A tracked job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Owner allowed to read the job
    pub owner: IdentityId,
    /// Current status
    #[serde(flatten)]
    pub status: JobStatus,
    /// Last transition
    pub updated_at: DateTime<Utc>,
}

/// Source of job statuses for [`poll_until_settled`]
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Current status, `None` when unknown
    async fn status(&self, job_id: &str) -> AppResult<Option<JobStatus>>;
}

/// In-process job table
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<DashMap<String, JobRecord>>,
}

impl JobRegistry {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new job in `Processing`
    pub fn start(&self, job_id: impl Into<String>, owner: IdentityId) {
        self.jobs.insert(
            job_id.into(),
            JobRecord {
                owner,
                status: JobStatus::Processing,
                updated_at: Utc::now(),
            },
        );
    }

    /// Move a job to `Completed`
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown or already settled
    pub fn complete(&self, job_id: &str, result: Value) -> AppResult<()> {
        self.settle(job_id, JobStatus::Completed { result })
    }

    /// Move a job to `Failed`
    ///
    /// # Errors
    ///
    /// Returns an error if the job is unknown or already settled
    pub fn fail(&self, job_id: &str, reason: impl Into<String>) -> AppResult<()> {
        self.settle(
            job_id,
            JobStatus::Failed {
                reason: reason.into(),
            },
        )
    }

    fn settle(&self, job_id: &str, status: JobStatus) -> AppResult<()> {
        let mut record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| AppError::not_found("Job"))?;
        if record.status.is_settled() {
            return Err(AppError::invalid_input(format!(
                "Job {job_id} already settled"
            )));
        }
        record.status = status;
        record.updated_at = Utc::now();
        drop(record);
        debug!(job_id, "Job settled");
        Ok(())
    }

    /// Job visible to `owner`
    ///
    /// # Errors
    ///
    /// Returns `ResourceNotFound` for unknown jobs and jobs of other owners
    pub fn get_for_owner(&self, job_id: &str, owner: &IdentityId) -> AppResult<JobRecord> {
        self.jobs
            .get(job_id)
            .filter(|record| &record.owner == owner)
            .map(|record| record.value().clone())
            .ok_or_else(|| AppError::not_found("Generation"))
    }

    /// Drop settled jobs older than `ttl`
    pub fn purge_settled(&self, ttl: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(ttl) else {
            return 0;
        };
        let cutoff = Utc::now() - age;
        let before = self.jobs.len();
        self.jobs
            .retain(|_, record| !record.status.is_settled() || record.updated_at > cutoff);
        before.saturating_sub(self.jobs.len())
    }

    /// Number of tracked jobs
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[async_trait]
impl JobSource for JobRegistry {
    async fn status(&self, job_id: &str) -> AppResult<Option<JobStatus>> {
        Ok(self.jobs.get(job_id).map(|record| record.status.clone()))
    }
}

/// Pull loop settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between attempts
    pub interval: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_attempts: 120,
        }
    }
}

/// Poll `source` until the job settles
///
/// # Errors
///
/// Returns `ResourceNotFound` for unknown jobs, `ExternalTimeout` when the job is
/// still processing after `max_attempts`, or the source's own error
pub async fn poll_until_settled(
    source: &dyn JobSource,
    job_id: &str,
    config: PollConfig,
) -> AppResult<JobStatus> {
    for attempt in 1..=config.max_attempts.max(1) {
        match source.status(job_id).await? {
            None => return Err(AppError::not_found("Job")),
            Some(status) if status.is_settled() => return Ok(status),
            Some(_) => {
                debug!(job_id, attempt, "Job still processing");
                if attempt < config.max_attempts {
                    tokio::time::sleep(config.interval).await;
                }
            }
        }
    }
    Err(AppError::external_timeout(format!("job {job_id}")))
}
