// ABOUTME: Compact sources marker appended to assistant messages produced with search context
// ABOUTME: An HTML comment wrapping a JSON list of titles and URLs, parsed back on reload
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Parley contributors

use super::SearchResult;
use crate::constants::sources::{MARKER_CLOSE, MARKER_OPEN};
use serde::{Deserialize, Serialize};

/// One cited source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Page title
    pub title: String,
    /// Page URL
    pub url: String,
}

/// Render the marker for `results`; empty when there are none
#[must_use]
pub fn render_marker(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return String::new();
    }
    let refs: Vec<SourceRef> = results
        .iter()
        .map(|r| SourceRef {
            title: r.title.clone(),
            url: r.url.clone(),
        })
        .collect();
    // `-->` inside JSON strings would end the comment early
    let json = serde_json::to_string(&refs)
        .unwrap_or_else(|_| "[]".to_owned())
        .replace("-->", "--\\u003e");
    format!("{MARKER_OPEN}{json}{MARKER_CLOSE}")
}

/// Split persisted content into the relayed body and its cited sources
///
/// Content without a well-formed trailing marker is returned unchanged.
#[must_use]
pub fn split_marker(content: &str) -> (&str, Vec<SourceRef>) {
    let Some(start) = content.rfind(MARKER_OPEN) else {
        return (content, Vec::new());
    };
    let Some(json) = content[start + MARKER_OPEN.len()..].strip_suffix(MARKER_CLOSE) else {
        return (content, Vec::new());
    };
    serde_json::from_str::<Vec<SourceRef>>(json)
        .map_or((content, Vec::new()), |refs| (&content[..start], refs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(title: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.to_owned(),
            snippet: String::new(),
            url: url.to_owned(),
        }
    }

    #[test]
    fn test_marker_round_trip() {
        let results = vec![
            result("One", "https://one.example"),
            result("Two --> trick", "https://two.example"),
        ];
        let content = format!("The answer.{}", render_marker(&results));
        let (body, refs) = split_marker(&content);
        assert_eq!(body, "The answer.");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].title, "Two --> trick");
        assert_eq!(refs[0].url, "https://one.example");
    }

    #[test]
    fn test_no_results_no_marker() {
        assert!(render_marker(&[]).is_empty());
    }

    #[test]
    fn test_plain_content_untouched() {
        let (body, refs) = split_marker("just text <!-- sources: not json -->");
        assert_eq!(body, "just text <!-- sources: not json -->");
        assert!(refs.is_empty());
    }
}
