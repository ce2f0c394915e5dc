// ABOUTME: Utility module with shared helpers
// ABOUTME: Content sanitization for user-supplied text
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

/// HTML and script stripping for user content
pub mod sanitize;
