// ABOUTME: Re-exports the core domain models from parley-core
// ABOUTME: Identity, plan, chat, message and usage cost record types
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Core domain models, see [`parley_core::models`].

pub use parley_core::models::{
    ActionKind, Chat, IdentityId, Message, MessageRole, NewMessage, PlanId, UsageCostRecord,
};
