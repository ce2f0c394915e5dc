// ABOUTME: Core data models for the Parley generation gateway
// ABOUTME: Re-exports identity, plan, chat, message and usage cost record types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! # Data Models
//!
//! This module contains the core data structures shared by the admission, relay
//! and ledger stages of the gateway.
//!
//! ## Core Models
//!
//! - `IdentityId`: Opaque user id resolved by authentication
//! - `PlanId`: Plan the identity is subscribed to
//! - `ActionKind`: Billable action classes (chat, search, partial)
//! - `Chat` / `Message`: Owned conversations with append-only messages
//! - `UsageCostRecord`: Internal cost ledger entry, never exposed to end users

mod chat;
mod identity;
mod usage;

pub use chat::{Chat, Message, MessageRole, NewMessage};
pub use identity::{IdentityId, PlanId};
pub use usage::{ActionKind, UsageCostRecord};
