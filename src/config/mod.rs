// ABOUTME: Configuration management module for centralized server settings
// ABOUTME: Environment-only configuration for ports, storage, limits, relay and providers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Configuration module for the Parley server
//!
//! All settings are read from environment variables with defaults, see
//! [`environment::ServerConfig::from_env`].

/// Environment and server configuration
pub mod environment;
