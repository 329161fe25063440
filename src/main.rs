//! # regwatch CLI
//!
//! The `regwatch` binary drives ingestion, the stage pipeline and the
//! scheduler, and inspects what has been stored.
//!
//! ## Usage
//!
//! ```bash
//! regwatch --config ./config/regwatch.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `regwatch init` | Create the SQLite database, run migrations, seed keywords |
//! | `regwatch authorities` | List configured authorities |
//! | `regwatch sync <AUTHORITY>` | Ingest one authority (no downstream stages) |
//! | `regwatch run <AUTHORITY>` | Ingest one authority and run the stage pipeline |
//! | `regwatch schedule` | Run every authority on its interval until Ctrl-C |
//! | `regwatch history <URL>` | Print the version lineage of a URL |
//! | `regwatch stats` | Row counts and per-source breakdown |
//! | `regwatch keywords seed\|list\|add` | Manage scanned keywords |

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use regwatch::config::{self, Config};
use regwatch::keywords;
use regwatch::run::{print_ingest_report, print_run_report, Engine};
use regwatch::store::{SqliteStore, Store};
use regwatch::{db, history, logging, migrate, scheduler, stats};

/// regwatch: watch regulatory portals for new and changed publications.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/regwatch.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "regwatch",
    about = "Watch regulatory-publication portals for new and changed documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/regwatch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed the default keywords.
    ///
    /// Idempotent: running it multiple times is safe.
    Init,

    /// List configured authorities.
    Authorities,

    /// Discover, fetch and version the documents of one authority.
    Sync {
        /// Authority code, e.g. `BCL`.
        authority: String,
    },

    /// Like `sync`, then run extraction, translation, keyword scanning and
    /// notification on every new or changed document.
    Run {
        /// Authority code, e.g. `BCL`.
        authority: String,
    },

    /// Run every configured authority on its own interval until Ctrl-C.
    Schedule,

    /// Show every stored version of a URL, newest first.
    History {
        /// Document URL (archive members use `<archive url>#<inner path>`).
        url: String,
    },

    /// Show database statistics.
    Stats,

    /// Manage the keywords scanned for.
    Keywords {
        #[command(subcommand)]
        action: KeywordAction,
    },
}

#[derive(Subcommand)]
enum KeywordAction {
    /// Insert the default technical keywords (existing ones are kept).
    Seed,
    /// List keywords.
    List {
        /// Only show active keywords.
        #[arg(long)]
        active: bool,
    },
    /// Add a keyword.
    Add {
        keyword: String,
        #[arg(long, default_value = keywords::DEFAULT_CATEGORY)]
        category: String,
    },
}

async fn open_store(cfg: &Config) -> Result<Arc<SqliteStore>> {
    let pool = db::connect(cfg).await?;
    migrate::migrate_pool(&pool).await?;
    Ok(Arc::new(SqliteStore::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = open_store(&cfg).await?;
            let seeded = keywords::bootstrap_default_keywords(&*store).await?;
            println!("Database initialized successfully.");
            println!("  keywords: {} defaults present", seeded);
        }
        Commands::Authorities => {
            if cfg.authorities.is_empty() {
                println!("No authorities configured.");
            } else {
                println!("{:<8} {:<24} {:>6}  {}", "CODE", "SOURCE", "EVERY", "LISTING");
                for (code, a) in &cfg.authorities {
                    println!(
                        "{:<8} {:<24} {:>5}h  {}",
                        code, a.source_label, a.interval_hours, a.listing_url
                    );
                }
            }
        }
        Commands::Sync { authority } => {
            cfg.authority(&authority)?;
            let store = open_store(&cfg).await?;
            let engine = Engine::from_config(&cfg, store)?;
            let report = engine.sync(&authority).await?;
            print_ingest_report("sync", &report);
            println!("  errored: {}", report.errored);
            println!("ok");
        }
        Commands::Run { authority } => {
            cfg.authority(&authority)?;
            let store = open_store(&cfg).await?;
            let engine = Engine::from_config(&cfg, store)?;
            let report = engine.run(&authority).await?;
            print_run_report(&report);
        }
        Commands::Schedule => {
            let store = open_store(&cfg).await?;
            let engine = Arc::new(Engine::from_config(&cfg, store)?);
            scheduler::run_scheduler(&cfg, engine).await?;
        }
        Commands::History { url } => {
            let store = open_store(&cfg).await?;
            history::run_history(&*store, &url).await?;
        }
        Commands::Stats => {
            let store = open_store(&cfg).await?;
            stats::run_stats(&cfg, store.pool()).await?;
        }
        Commands::Keywords { action } => {
            let store = open_store(&cfg).await?;
            run_keywords(&*store, action).await?;
        }
    }

    Ok(())
}

async fn run_keywords(store: &dyn Store, action: KeywordAction) -> Result<()> {
    match action {
        KeywordAction::Seed => {
            let n = keywords::bootstrap_default_keywords(store).await?;
            println!("{} default keywords present", n);
        }
        KeywordAction::List { active } => {
            let list = store.list_keywords(active).await?;
            println!("{:>4}  {:<32} {:<12} {}", "ID", "KEYWORD", "CATEGORY", "ACTIVE");
            for k in &list {
                println!(
                    "{:>4}  {:<32} {:<12} {}",
                    k.id,
                    k.keyword,
                    k.category,
                    if k.is_active { "yes" } else { "no" }
                );
            }
        }
        KeywordAction::Add { keyword, category } => {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                bail!("keyword must not be empty");
            }
            let k = store.get_or_create_keyword(keyword, &category).await?;
            println!("keyword {} ({}) id={}", k.keyword, k.category, k.id);
        }
    }
    Ok(())
}
