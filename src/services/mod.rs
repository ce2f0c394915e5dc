// ABOUTME: Service layer behind the HTTP routes
// ABOUTME: Generation pipeline, background task dispatch and job status polling
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

//! Domain service layer
//!
//! Route handlers stay thin: they translate HTTP into calls on these services and
//! render the results.

/// Fire-and-forget side effects dispatched after the main path
pub mod background;

/// Admission, relay and settlement of chat generations
pub mod generation;

/// Job status state machine and pull-based polling
pub mod jobs;
