//! Version lineage inspection.
//!
//! `regwatch history <url>` prints every stored version of a URL, newest
//! first, and checks that the chain is intact: versions `N..1` without gaps,
//! each pointing at its predecessor's id.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};

use crate::models::Document;
use crate::store::Store;

/// Verify a newest-first history forms the chain `N, N-1, ..., 1`.
pub fn check_lineage(history: &[Document]) -> Result<(), String> {
    for (idx, doc) in history.iter().enumerate() {
        let expected_version = (history.len() - idx) as i64;
        if doc.version != expected_version {
            return Err(format!(
                "row {} has version {}, expected {}",
                doc.id, doc.version, expected_version
            ));
        }
        match (history.get(idx + 1), doc.previous_version_id) {
            (Some(prev), Some(prev_id)) if prev.id == prev_id && prev.id < doc.id => {}
            (None, None) => {}
            (_, link) => {
                return Err(format!(
                    "row {} (version {}) has predecessor {:?}",
                    doc.id, doc.version, link
                ))
            }
        }
    }
    Ok(())
}

pub async fn run_history(store: &dyn Store, url: &str) -> Result<()> {
    let history = store.document_history(url).await?;
    if history.is_empty() {
        bail!("no document stored for url: {}", url);
    }

    println!("--- History: {} ---", url);
    println!(
        "{:>6}  {:>7}  {:>6}  {:<12}  {:<16}  {:<16}  {}",
        "ID", "VERSION", "PREV", "CHECKSUM", "FIRST SEEN", "LAST SEEN", "SIZE"
    );
    for doc in &history {
        println!(
            "{:>6}  {:>7}  {:>6}  {:<12}  {:<16}  {:<16}  {}",
            doc.id,
            doc.version,
            doc.previous_version_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            crate::fingerprint::short(&doc.checksum),
            format_ts(doc.first_seen_at),
            format_ts(doc.last_seen_at),
            doc.filesize_bytes
        );
    }
    println!();

    match check_lineage(&history) {
        Ok(()) => println!("lineage: ok ({} versions)", history.len()),
        Err(problem) => println!("lineage: BROKEN ({})", problem),
    }
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M").to_string()
}
