mod github;

use std::path::Path;
use std::time::Duration;

pub use github::GithubSearchClient;

use crate::error::{Error, Result};
use crate::ingest::IngestionEngine;

/// One page of the upstream search walk: a batch of snapshots plus the
/// cursor/continuation state spec.md §4.5 requires of the driver.
pub struct SearchPage {
    pub nodes: Vec<crate::model::RepoSnapshot>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// Boundary interface the `IngestionEngine` is driven through (spec.md
/// §4.5). Implementations own pagination, cursoring, and rate-limit
/// backoff; the core only sees ordered batches.
#[async_trait::async_trait]
pub trait SearchSource {
    async fn search_page(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage>;
}

/// Drives `IngestionEngine::ingest` from a [`SearchSource`], walking
/// `stars:>=S sort:stars-asc` and advancing `S` past GitHub's 1000-result
/// ceiling, per spec.md §4.5 / `original_source/crawler.py::crawl`.
pub struct CrawlDriver<S> {
    source: S,
}

impl<S: SearchSource> CrawlDriver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Runs one full pass: repeatedly walks the search space from
    /// `min_stars` upward, handing each ≤1000-result chunk to `engine` as
    /// one batch, until the upstream search returns nothing.
    pub async fn run_pass(&self, engine: &mut IngestionEngine<'_>, min_stars: i64) -> Result<()> {
        let mut current_min_stars = min_stars;

        loop {
            let query = format!("stars:>={current_min_stars} sort:stars-asc");
            let mut cursor: Option<String> = None;
            let mut batch = Vec::new();

            loop {
                let page = self.source.search_page(&query, cursor.as_deref()).await?;
                if page.nodes.is_empty() {
                    break;
                }
                batch.extend(page.nodes);
                cursor = page.end_cursor;
                if !page.has_next_page || batch.len() >= 1000 {
                    break;
                }
            }

            if batch.is_empty() {
                break;
            }

            let last_stars = batch.last().expect("checked non-empty above").stars;
            engine.ingest(&batch)?;

            current_min_stars = if last_stars == current_min_stars {
                current_min_stars + 1
            } else {
                last_stars
            };
        }

        engine.finish_run();
        Ok(())
    }
}

/// Atomically replaces the live database file with the staging one, the
/// one piece of `deploy_site` (original_source/crawler.py) that is a core
/// concern rather than a deployment one: everything else there (process
/// restart, HTML/JS patching) is out of scope per spec.md §1.
pub fn swap_into(staging_path: &Path, live_path: &Path) -> Result<()> {
    std::fs::rename(staging_path, live_path).map_err(Error::from)
}

/// Sleeps for the given duration, isolated behind a function so tests can
/// stub it out without pulling in a fake-clock dependency.
pub(crate) async fn backoff_sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
