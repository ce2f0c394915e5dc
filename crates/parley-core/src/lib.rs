// ABOUTME: Core types for the Parley generation gateway
// ABOUTME: Foundation crate with error handling and the chat, budget and ledger domain models
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

#![deny(unsafe_code)]

//! # Parley Core
//!
//! Foundation crate providing shared types for the Parley generation gateway.
//! This crate is designed to change infrequently, enabling incremental
//! compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError` and `ErrorCode`
//! - **models**: Identities, plans, chats, messages and usage cost records

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Core domain models (identity, chat, message, usage cost record)
pub mod models;
