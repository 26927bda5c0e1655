use serde::{Deserialize, Serialize};

/// One repository observation as handed to the ingestion engine by a
/// `CrawlDriver`. Optional fields mirror the upstream search API's
/// semi-structured payload (see Design Notes: "dynamic snapshot shape").
#[derive(Debug, Clone, PartialEq)]
pub struct RepoSnapshot {
    pub id: i64,
    pub name_with_owner: String,
    pub description: Option<String>,
    pub homepage_url: Option<String>,
    pub created_at: Option<i64>,
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub disk_usage: Option<i64>,
    pub updated_at: Option<i64>,
    pub pushed_at: Option<i64>,
    pub is_archived: bool,
    pub primary_language: Option<String>,
    pub topics: Vec<String>,
}

/// The four metrics whose (in)equality drives history-segment splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricQuadruple {
    pub stars: i64,
    pub forks: i64,
    pub watchers: i64,
    pub disk_usage: Option<i64>,
}

/// Filter tuple shared by every leaderboard-shaped query.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub q: Option<String>,
    pub in_description: bool,
    pub language: Option<String>,
    pub topic: Option<String>,
}

/// Recognized `metric` query values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Stars,
    Forks,
    Watchers,
    DiskUsage,
    Trending24h,
    Trending3d,
    Trending7d,
    Trending30d,
}

impl Metric {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "stars" | "stargazerCount" => Self::Stars,
            "forks" | "forkCount" => Self::Forks,
            "watchers" | "watchersCount" => Self::Watchers,
            "diskUsage" | "disk_usage" => Self::DiskUsage,
            "trending24h" => Self::Trending24h,
            "trending3d" => Self::Trending3d,
            "trending7d" => Self::Trending7d,
            "trending30d" => Self::Trending30d,
            _ => return None,
        })
    }

    pub fn window_seconds(self) -> Option<i64> {
        match self {
            Self::Trending24h => Some(24 * 3600),
            Self::Trending3d => Some(3 * 24 * 3600),
            Self::Trending7d => Some(7 * 24 * 3600),
            Self::Trending30d => Some(30 * 24 * 3600),
            _ => None,
        }
    }

    /// The bare SQL column this metric sorts by, for the static (non-trending)
    /// leaderboard. Returns `None` for trending metrics.
    pub fn sort_column(self) -> Option<&'static str> {
        match self {
            Self::Stars => Some("stars"),
            Self::Forks => Some("forks"),
            Self::Watchers => Some("watchers"),
            Self::DiskUsage => Some("disk_usage"),
            _ => None,
        }
    }
}

/// One row of a leaderboard result, or a single-repo view. Field names are
/// the compact wire keys from spec.md §6 ("Repo object wire shape").
#[derive(Debug, Clone, Serialize)]
pub struct RepoView {
    pub n: String,
    pub g: Option<i64>,
    pub s: i64,
    pub f: i64,
    pub w: i64,
    pub d: Option<i64>,
    pub a: Option<String>,
    pub h: Option<String>,
    pub c: Option<String>,
    pub p: Option<String>,
    pub i: bool,
    pub l: Option<String>,
    pub t: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ns: Option<i64>,
}

/// One run-length-encoded metric segment, rendered for `/api/repo/history`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySegment {
    #[serde(rename = "startFetchedAt")]
    pub start_fetched_at: Option<String>,
    #[serde(rename = "endFetchedAt")]
    pub end_fetched_at: Option<String>,
    pub s: i64,
    pub f: i64,
    pub w: i64,
    pub d: Option<i64>,
}
