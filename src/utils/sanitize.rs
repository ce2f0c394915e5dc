// ABOUTME: HTML and script stripping for user-supplied chat content
// ABOUTME: Applied before content is stored or sent to a model backend
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use regex::Regex;
use std::sync::LazyLock;

// Executable or invisible blocks are removed with their contents
static BLOCK_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|object|embed|noscript)\b[^>]*>.*?</\s*(script|style|iframe|object|embed|noscript)\s*>").ok()
});

static UNCLOSED_BLOCK_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|iframe|object|embed|noscript)\b.*$").ok()
});

static TAG_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)</?[a-zA-Z!][^>]*>").ok());

static COMMENT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").ok());

static JS_URL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)javascript\s*:").ok());

fn strip(pattern: &LazyLock<Option<Regex>>, text: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_owned(),
    }
}

/// Strip HTML markup and script content from user text
///
/// Script-like blocks are removed entirely, remaining tags and comments are
/// dropped while their text content is kept, and `javascript:` URL schemes are
/// neutralised. Surrounding whitespace is trimmed.
#[must_use]
pub fn sanitize_user_content(text: &str) -> String {
    let without_blocks = strip(&BLOCK_PATTERN, text);
    let without_unclosed = strip(&UNCLOSED_BLOCK_PATTERN, &without_blocks);
    let without_comments = strip(&COMMENT_PATTERN, &without_unclosed);
    let without_tags = strip(&TAG_PATTERN, &without_comments);
    strip(&JS_URL_PATTERN, &without_tags).trim().to_owned()
}
