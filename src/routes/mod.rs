// ABOUTME: Route module organization for the Parley HTTP endpoints
// ABOUTME: Each domain module holds route definitions and thin handlers over the service layer
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Route module for the Parley server
//!
//! Each domain module contains only route definitions and thin handler functions
//! that delegate to the service layer.

/// Chat generation and chat management routes
pub mod chat;
/// Health check route
pub mod health;

/// Chat route handlers
pub use chat::ChatRoutes;
/// Health route handlers
pub use health::HealthRoutes;
