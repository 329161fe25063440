//! Database statistics and health overview.
//!
//! Summarizes what the watcher has collected: row counts per table and a
//! per-source breakdown of documents, versions and last observation. Used by
//! `regwatch stats` to check that scheduled runs are doing their job.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;

/// Per-source breakdown of tracked URLs and stored versions.
struct SourceStats {
    source: String,
    url_count: i64,
    version_count: i64,
    last_seen_ms: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, pool: &SqlitePool) -> Result<()> {
    let mut totals = Vec::new();
    for table in [
        "documents",
        "document_texts",
        "keyword_configs",
        "keyword_matches",
        "notification_logs",
    ] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(pool)
            .await?;
        totals.push((table, count));
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("regwatch database stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    for (table, count) in &totals {
        println!("  {:<20} {}", format!("{}:", table), count);
    }

    let source_rows = sqlx::query(
        r#"
        SELECT
            source,
            COUNT(DISTINCT url) AS url_count,
            COUNT(*) AS version_count,
            MAX(last_seen_at) AS last_seen
        FROM documents
        GROUP BY source
        ORDER BY version_count DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    let source_stats: Vec<SourceStats> = source_rows
        .iter()
        .map(|row| SourceStats {
            source: row.get("source"),
            url_count: row.get("url_count"),
            version_count: row.get("version_count"),
            last_seen_ms: row.get("last_seen"),
        })
        .collect();

    if !source_stats.is_empty() {
        println!();
        println!("  By source:");
        println!(
            "  {:<24} {:>6} {:>9}   {}",
            "SOURCE", "URLS", "VERSIONS", "LAST SEEN"
        );
        println!("  {}", "-".repeat(60));

        for s in &source_stats {
            let seen_display = match s.last_seen_ms {
                Some(ms) => format_ts_relative(ms / 1000),
                None => "never".to_string(),
            };
            println!(
                "  {:<24} {:>6} {:>9}   {}",
                s.source, s.url_count, s.version_count, seen_display
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time for a Unix timestamp in seconds (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts(ts)
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
