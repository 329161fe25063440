//! Keyword configuration and scanning.
//!
//! Active keywords are matched case-insensitively as literals against every
//! text of a document. Each hit stores the occurrence count and a context
//! snippet around the first match.

use regex::RegexBuilder;
use tracing::{debug, info};

use crate::error::RepositoryError;
use crate::models::{DocumentText, KeywordMatch};
use crate::snippet::shorten;
use crate::store::Store;

/// Technical keywords seeded by `regwatch keywords seed` and `regwatch init`.
pub const DEFAULT_TECH_KEYWORDS: &[&str] = &[
    "AnaCredit",
    "credit institution",
    "Central Bank",
    "counterparty",
    "exposure",
    "loan",
    "Basel",
    "EBA",
    "European Banking Authority",
    "large exposure",
    "default",
    "non-performing",
];

pub const DEFAULT_CATEGORY: &str = "technical";

const CONTEXT_CHARS: usize = 200;
const SNIPPET_WIDTH: usize = 400;

/// Insert the default keywords that are not configured yet. Returns the
/// number of keywords now known from the default list.
pub async fn bootstrap_default_keywords(store: &dyn Store) -> Result<usize, RepositoryError> {
    for keyword in DEFAULT_TECH_KEYWORDS {
        store.get_or_create_keyword(keyword, DEFAULT_CATEGORY).await?;
    }
    info!(count = DEFAULT_TECH_KEYWORDS.len(), "default keywords bootstrapped");
    Ok(DEFAULT_TECH_KEYWORDS.len())
}

/// Count case-insensitive occurrences of `keyword` in `text`, with a
/// shortened snippet of the text around the first occurrence.
pub fn find_occurrences(text: &str, keyword: &str) -> (usize, Option<String>) {
    let Ok(pattern) = RegexBuilder::new(&regex::escape(keyword))
        .case_insensitive(true)
        .build()
    else {
        return (0, None);
    };

    let mut matches = pattern.find_iter(text);
    let Some(first) = matches.next() else {
        return (0, None);
    };
    let count = 1 + matches.count();

    let start = floor_char_boundary(text, first.start().saturating_sub(CONTEXT_CHARS));
    let end = ceil_char_boundary(text, first.end() + CONTEXT_CHARS);
    let snippet = shorten(&text[start..end], SNIPPET_WIDTH);
    (count, Some(snippet))
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

/// Scan one text against every active keyword and persist the hits.
pub async fn scan_text(
    store: &dyn Store,
    text: &DocumentText,
) -> Result<Vec<KeywordMatch>, RepositoryError> {
    if text.full_text.trim().is_empty() {
        debug!(text_id = text.id, "empty text, nothing to scan");
        return Ok(Vec::new());
    }

    let mut saved = Vec::new();
    for keyword in store.list_keywords(true).await? {
        let (count, snippet) = find_occurrences(&text.full_text, &keyword.keyword);
        if count == 0 {
            continue;
        }
        let m = store
            .save_keyword_match(text.document_id, text.id, &keyword, count as i64, snippet)
            .await?;
        saved.push(m);
    }
    debug!(text_id = text.id, matches = saved.len(), "keyword scan done");
    Ok(saved)
}
