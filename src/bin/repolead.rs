use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use repolead::cache::ResponseCache;
use repolead::config::Config;
use repolead::crawl::{swap_into, CrawlDriver, GithubSearchClient};
use repolead::http::{router, AppState};
use repolead::ingest::IngestionEngine;
use repolead::logging::init_logging;
use repolead::store::Store;
use time::OffsetDateTime;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "repolead", about = "Repository leaderboard store, crawler, and server")]
struct Cli {
    /// Path to a TOML config file overlaying the built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the HTTP leaderboard server.
    Serve {
        #[arg(long, env = "REPOLEAD_DB")]
        db: Option<PathBuf>,
        #[arg(long, env = "REPOLEAD_PORT")]
        port: Option<u16>,
    },
    /// Runs one crawl pass against GitHub and ingests the results.
    Crawl {
        #[arg(long, env = "REPOLEAD_DB")]
        db: Option<PathBuf>,
        #[arg(long, env = "GITHUB_TOKEN")]
        token: String,
        #[arg(long)]
        min_stars: Option<u32>,
        /// Crawl into a staging file and atomically swap it into place on
        /// success, instead of writing the live database directly.
        #[arg(long)]
        staging: Option<PathBuf>,
    },
    /// Prints summary counts from the store (repos, runs, languages).
    Stats {
        #[arg(long, env = "REPOLEAD_DB")]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging("repolead=info,tower_http=info");

    let cli = Cli::parse();
    let base_config = match &cli.config {
        Some(path) if path.exists() => Config::from_file(path)?,
        _ => Config::default(),
    };

    match cli.command {
        Command::Serve { db, port } => serve(base_config, db, port).await,
        Command::Crawl {
            db,
            token,
            min_stars,
            staging,
        } => crawl(base_config, db, token, min_stars, staging).await,
        Command::Stats { db } => stats(base_config, db),
    }
}

async fn serve(mut config: Config, db: Option<PathBuf>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(db) = db {
        config.db_path = db;
    }
    if let Some(port) = port {
        config.port = port;
    }

    let store = Arc::new(Store::open(&config.db_path)?);
    let cache = Arc::new(ResponseCache::new(config.cache_capacity));
    let state = AppState {
        store: store.clone(),
        cache: cache.clone(),
    };

    match std::env::var("GITHUB_TOKEN") {
        Ok(token) => {
            spawn_scheduler(store, cache, config.crawl_hours.clone(), token, config.crawl_min_stars);
        }
        Err(_) => warn!("GITHUB_TOKEN not set, in-process crawl scheduler disabled"),
    }

    let addr = std::net::SocketAddr::new(config.host, config.port);
    info!(%addr, db = %config.db_path.display(), "starting repolead server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// In-process scheduler that wakes the crawl at fixed UTC hours (spec.md
/// §6, "CLI / process layout"). Runs the pass directly against the
/// already-open live `Store` rather than staging + swapping, since the
/// serving process already shares one WAL-mode connection across concurrent
/// readers (spec.md §5) — the staging/swap seam in `crawl::swap_into` is
/// for the out-of-process `repolead crawl` invocation instead.
fn spawn_scheduler(
    store: Arc<Store>,
    cache: Arc<ResponseCache>,
    hours: Vec<u8>,
    token: String,
    min_stars: u32,
) {
    tokio::spawn(async move {
        let client = GithubSearchClient::new(token);
        let driver = CrawlDriver::new(client);
        loop {
            let wait = seconds_until_next_hour(&hours);
            tokio::time::sleep(Duration::from_secs(wait)).await;

            let mut engine = IngestionEngine::new(&store);
            info!(min_stars, "scheduled crawl pass starting");
            if let Err(err) = driver.run_pass(&mut engine, min_stars as i64).await {
                error!(%err, "scheduled crawl pass failed");
                continue;
            }
            cache.clear();
            info!("scheduled crawl pass complete, cache cleared");
        }
    });
}

/// Seconds from now until the next UTC wall-clock hour in `hours`. Falls
/// back to a 6-hour default cadence if `hours` is empty.
fn seconds_until_next_hour(hours: &[u8]) -> u64 {
    if hours.is_empty() {
        return 6 * 3600;
    }
    let now = OffsetDateTime::now_utc();
    let now_seconds_of_day = now.hour() as i64 * 3600 + now.minute() as i64 * 60 + now.second() as i64;

    let mut best = i64::MAX;
    for &hour in hours {
        let target_seconds_of_day = hour as i64 * 3600;
        let mut delta = target_seconds_of_day - now_seconds_of_day;
        if delta <= 0 {
            delta += 24 * 3600;
        }
        best = best.min(delta);
    }
    best.max(1) as u64
}

async fn crawl(
    mut config: Config,
    db: Option<PathBuf>,
    token: String,
    min_stars: Option<u32>,
    staging: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(db) = db {
        config.db_path = db;
    }
    if let Some(min_stars) = min_stars {
        config.crawl_min_stars = min_stars;
    }

    let target_path = staging.clone().unwrap_or_else(|| config.db_path.clone());
    let store = Store::open(&target_path)?;
    let mut engine = IngestionEngine::new(&store);

    let client = GithubSearchClient::new(token);
    let driver = CrawlDriver::new(client);

    info!(min_stars = config.crawl_min_stars, "starting crawl pass");
    driver
        .run_pass(&mut engine, config.crawl_min_stars as i64)
        .await?;
    info!("crawl pass complete");

    if let Some(staging_path) = staging {
        swap_into(&staging_path, &config.db_path)?;
        info!(live = %config.db_path.display(), "swapped staging database into place");
    }

    Ok(())
}

fn stats(mut config: Config, db: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(db) = db {
        config.db_path = db;
    }
    if !config.db_path.exists() {
        warn!(path = %config.db_path.display(), "database file does not exist yet");
    }

    let store = Store::open(&config.db_path)?;
    let conn = store.conn();
    let repos: i64 = conn.query_row("SELECT COUNT(*) FROM repo", [], |r| r.get(0))?;
    let runs: i64 = conn.query_row("SELECT COUNT(*) FROM fetch_run", [], |r| r.get(0))?;
    let languages: i64 = conn.query_row("SELECT COUNT(*) FROM language", [], |r| r.get(0))?;
    let topics: i64 = conn.query_row("SELECT COUNT(*) FROM topic", [], |r| r.get(0))?;

    println!("repos:     {repos}");
    println!("runs:      {runs}");
    println!("languages: {languages}");
    println!("topics:    {topics}");

    Ok(())
}
