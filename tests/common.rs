// ABOUTME: Shared test utilities and setup functions for integration tests
// ABOUTME: Provides quiet logging, in-memory resources and identity token helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::unwrap_used,
    clippy::expect_used
)]
//! Shared test utilities for `parley_server`
//!
//! This module provides common test setup functions to reduce duplication
//! across integration tests.

use anyhow::Result;
use parley_server::{
    auth::JwtIdentityResolver,
    config::environment::ServerConfig,
    database::Database,
    models::{IdentityId, PlanId},
    resources::{ServerResources, ServerResourcesBuilder},
};
use std::sync::{Arc, Once};
use std::time::Duration;

static INIT_LOGGER: Once = Once::new();

/// Secret shared by every test configuration
pub const TEST_JWT_SECRET: &str = "parley-test-secret-not-for-production";

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        // Check for TEST_LOG environment variable to control test logging level
        let log_level = match std::env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => tracing::Level::TRACE,
            Ok("DEBUG") => tracing::Level::DEBUG,
            Ok("INFO") => tracing::Level::INFO,
            _ => tracing::Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

/// Configuration with in-memory storage and the test secret
pub fn test_config() -> ServerConfig {
    ServerConfig::for_testing(TEST_JWT_SECRET)
}

/// Standard test database setup
pub async fn create_test_database() -> Result<Database> {
    init_test_logging();
    Database::new("sqlite::memory:").await
}

/// Builder over a fresh in-memory database
pub async fn test_builder(config: ServerConfig) -> Result<ServerResourcesBuilder> {
    let database = create_test_database().await?;
    Ok(ServerResources::builder(config)
        .database(database)
        .sweep_interval(Duration::from_secs(3600)))
}

/// Mint a token for `identity` signed with the test secret
pub fn token_for(identity: &str) -> String {
    JwtIdentityResolver::new(TEST_JWT_SECRET)
        .issue_token(&IdentityId::new(identity), Duration::from_secs(3600))
        .unwrap()
}

/// Mint a token for `identity` whose `plan` claim names `plan`
pub fn plan_token_for(identity: &str, plan: &str) -> String {
    JwtIdentityResolver::new(TEST_JWT_SECRET)
        .issue_plan_token(
            &IdentityId::new(identity),
            Some(&PlanId::new(plan)),
            Duration::from_secs(3600),
        )
        .unwrap()
}

/// Put `identity` on `plan`
pub async fn assign_plan(resources: &Arc<ServerResources>, identity: &str, plan: &str) {
    resources
        .budget
        .store()
        .assign_plan(&IdentityId::new(identity), &PlanId::new(plan))
        .await
        .unwrap();
}
