// ABOUTME: Re-exports the unified error types from parley-core
// ABOUTME: Keeps crate::errors paths stable for all server modules
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Unified error handling, see [`parley_core::errors`].

pub use parley_core::errors::{
    AppError, AppResult, ErrorCode, ErrorContext, ErrorResponse, ErrorResponseDetails,
};
