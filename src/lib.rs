// ABOUTME: Main library entry point for the Parley generation gateway
// ABOUTME: Admits chat requests under rate and plan rules, relays model streams and settles usage
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

// Crate-level attributes:
// - deny(unsafe_code): Zero-tolerance unsafe policy.
#![deny(unsafe_code)]

//! # Parley Server
//!
//! An admission-and-relay gateway in front of third-party large-language-model
//! backends. Each chat generation request is authenticated, rate limited, validated
//! and checked against the caller's plan before a model stream is opened. Tokens are
//! relayed to the client over Server-Sent Events as they arrive, and a usage ledger
//! records the assistant message and its cost exactly once per completed generation.
//!
//! ## Architecture
//!
//! - **Rate Limiter**: fixed-window counters keyed by identity and action class
//! - **Budget Gate**: plan model access, daily quotas and metered spend ceilings
//! - **Search Augmenter**: optional web-search context with a sources marker
//! - **Inference Relay**: streaming state machine between backend and client
//! - **Usage Ledger**: persistence, quota commit, cost record and chat title
//! - **Generation Pipeline**: orchestrates the stages and owns the request lifecycle
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use parley_server::config::environment::ServerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Parley configured with port: HTTP={}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Identity resolution from bearer tokens
pub mod auth;

/// Plan policies and the budget admission gate
pub mod budget;

/// Environment-based configuration
pub mod config;

/// Application constants and default values
pub mod constants;

/// `SQLite` persistence for chats, budgets, usage records and activity
pub mod database;

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Usage ledger: token estimation, cost settlement and titles
pub mod ledger;

/// LLM provider abstraction, model catalog and streaming clients
pub mod llm;

/// Production logging and structured output
pub mod logging;

/// Core domain models re-exported from `parley-core`
pub mod models;

/// Fixed-window rate limiting with pluggable counter stores
pub mod rate_limiting;

/// Streaming relay between a model backend and the client
pub mod relay;

/// Process-scoped server state
pub mod resources;

/// `HTTP` routes
pub mod routes;

/// Web-search augmentation
pub mod search;

/// Router assembly and server lifecycle
pub mod server;

/// Generation pipeline, background tasks and job polling
pub mod services;

/// Utility functions and helpers
pub mod utils;
