//! Periodic runs per authority.
//!
//! Every configured authority gets its own task ticking at its
//! `interval_hours`. The first tick fires immediately. A failed run is logged
//! and the loop waits for the next tick. On Ctrl-C no new run starts, and
//! runs already in progress are allowed to finish.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::config::Config;
use crate::run::Engine;

/// `(authority code, interval)` for every configured authority.
pub fn schedule(config: &Config) -> Vec<(String, Duration)> {
    config
        .authorities
        .iter()
        .map(|(code, authority)| {
            (
                code.clone(),
                Duration::from_secs(authority.interval_hours.saturating_mul(3600)),
            )
        })
        .collect()
}

pub async fn run_scheduler(config: &Config, engine: Arc<Engine>) -> anyhow::Result<()> {
    let plan = schedule(config);
    if plan.is_empty() {
        anyhow::bail!("No authorities configured. Add [authorities.<CODE>] sections to the config.");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    for (code, period) in plan {
        info!(authority = %code, every_secs = period.as_secs(), "scheduling authority");
        let engine = Arc::clone(&engine);
        let mut shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                match engine.run(&code).await {
                    Ok(report) => info!(
                        authority = %code,
                        fetched = report.ingest.fetched,
                        new = report.ingest.created(),
                        changed = report.ingest.changed(),
                        skipped = report.skipped(),
                        errored = report.errored(),
                        notified = report.notified(),
                        "scheduled run finished"
                    ),
                    Err(e) => error!(authority = %code, error = %e, "scheduled run failed"),
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for running batches");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "scheduler task ended abnormally");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthorityConfig;

    #[test]
    fn one_entry_per_authority() {
        let mut config = Config::minimal();
        for (code, hours) in [("BCL", 6), ("ECB", 24)] {
            config.authorities.insert(
                code.to_string(),
                AuthorityConfig {
                    name: code.to_string(),
                    source_label: format!("{}_AnaCredit", code),
                    base_url: "https://example.org".into(),
                    listing_url: "https://example.org/list.html".into(),
                    interval_hours: hours,
                },
            );
        }
        assert_eq!(
            schedule(&config),
            vec![
                ("BCL".to_string(), Duration::from_secs(6 * 3600)),
                ("ECB".to_string(), Duration::from_secs(24 * 3600)),
            ]
        );
    }
}
