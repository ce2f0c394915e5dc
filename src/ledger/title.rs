// ABOUTME: Short chat titles derived from the first user message
// ABOUTME: Collapses whitespace and truncates on a word boundary
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use crate::constants::{limits::MAX_TITLE_CHARS, titles::FALLBACK_TITLE};

/// Title for a chat whose first user message is `text`
#[must_use]
pub fn derive_title(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return FALLBACK_TITLE.to_owned();
    }
    if collapsed.chars().count() <= MAX_TITLE_CHARS {
        return collapsed;
    }

    // Leave room for the ellipsis
    let head: String = collapsed.chars().take(MAX_TITLE_CHARS - 1).collect();
    let cut = match head.rfind(' ') {
        Some(space) if space > 0 => &head[..space],
        _ => head.as_str(),
    };
    format!("{}…", cut.trim_end())
}
