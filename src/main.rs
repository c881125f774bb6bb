use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use vesper::config::Config;
use vesper::feed::{FeedSync, Fetcher, ProxyClient, Scheduler, SchedulerSettings, SyncSettings};
use vesper::storage::{Database, DatabaseError};
use vesper::util::AllowListSanitizer;

/// Get the config directory path (~/.config/vesper/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("vesper"))
}

#[derive(Parser, Debug)]
#[command(name = "vesper", about = "Feed aggregator: subscribe, refresh and list RSS/Atom feeds")]
struct Args {
    /// Config file (defaults to ~/.config/vesper/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed and run its first sync
    Subscribe {
        url: String,
        /// Folder to file the feed under
        #[arg(long, value_name = "ID")]
        folder: Option<i64>,
    },
    /// Refresh every feed
    Refresh {
        /// Ignore the refresh throttle and per-feed backoff
        #[arg(long)]
        force: bool,
    },
    /// Sync a single feed
    Sync {
        feed_id: i64,
        #[arg(long)]
        force: bool,
    },
    /// List feeds with unread counts
    Feeds,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?
        .with_env_overrides();

    let db_path = config_dir.join("vesper.db");
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of vesper appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let client = ProxyClient::new(config.proxy_base.clone(), config.fetch_timeout())
        .context("Failed to create HTTP client")?
        .with_cache_max_age(config.cache_max_age_secs);
    let fetcher = Fetcher::new(client, config.backoff_base());
    let sync = FeedSync::new(
        db.clone(),
        fetcher,
        Arc::new(AllowListSanitizer::default()),
        SyncSettings::from(&config),
    );

    match args.command {
        Command::Subscribe { url, folder } => {
            let feed_id = sync
                .subscribe(&url, folder)
                .await
                .with_context(|| format!("Failed to subscribe to {url}"))?;
            println!("Subscribed: feed {feed_id}");
        }
        Command::Refresh { force } => {
            let scheduler = Scheduler::new(sync, SchedulerSettings::from(&config));
            let outcomes = scheduler
                .refresh_all(force)
                .await
                .context("Failed to refresh feeds")?;

            for outcome in &outcomes {
                match &outcome.result {
                    Ok(summary) => println!(
                        "{}: {} new ({} unread, {} archived)",
                        outcome.url, summary.total, summary.unread, summary.archived
                    ),
                    Err(e) => println!("{}: failed: {}", outcome.url, e),
                }
            }
            if outcomes.is_empty() {
                println!("Nothing refreshed (throttled, all feeds in backoff, or no feeds)");
            }
        }
        Command::Sync { feed_id, force } => {
            let feed = db
                .get_feed(feed_id)
                .await
                .context("Failed to load feed")?
                .ok_or_else(|| anyhow::anyhow!("No feed with id {feed_id}"))?;
            let summary = sync
                .sync_feed(&feed, config.unread_limit, force)
                .await
                .with_context(|| format!("Failed to sync {}", feed.url))?;
            println!(
                "{}: {} new ({} unread, {} archived)",
                feed.url, summary.total, summary.unread, summary.archived
            );
        }
        Command::Feeds => {
            let feeds = db
                .get_feeds_with_unread_counts()
                .await
                .context("Failed to load feeds")?;
            for feed in feeds {
                let status = feed.error.as_deref().unwrap_or("ok");
                println!("{:>5}  {:>4} unread  {}  <{}>  [{}]", feed.id, feed.unread_count, feed.title, feed.url, status);
            }
        }
    }

    Ok(())
}
