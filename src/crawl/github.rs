use std::time::Duration;

use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{backoff_sleep, SearchPage, SearchSource};
use crate::error::{Error, Result};
use crate::model::RepoSnapshot;
use crate::timeutil::iso_to_unix;

const GITHUB_GRAPHQL_URL: &str = "https://api.github.com/graphql";
const MAX_ATTEMPTS: u32 = 8;
const LOW_REMAINING_THRESHOLD: i64 = 10;

const SEARCH_QUERY: &str = r#"
query($q: String!, $cursor: String) {
  rateLimit {
    remaining
    resetAt
  }
  search(query: $q, type: REPOSITORY, first: 50, after: $cursor) {
    pageInfo {
      endCursor
      hasNextPage
    }
    nodes {
      ... on Repository {
        databaseId
        nameWithOwner
        description
        homepageUrl
        createdAt
        updatedAt
        pushedAt
        isArchived
        diskUsage
        stargazerCount
        forkCount
        watchers {
          totalCount
        }
        primaryLanguage {
          name
        }
        repositoryTopics(first: 20) {
          nodes {
            topic {
              name
            }
          }
        }
      }
    }
  }
}
"#;

/// GitHub GraphQL search-based [`SearchSource`], grounded on
/// `original_source/crawler.py`'s pagination and rate-limit handling
/// (`_run_query`, `_handle_rate_limit`).
pub struct GithubSearchClient {
    http: reqwest::Client,
    token: String,
}

impl GithubSearchClient {
    pub fn new(token: String) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("repolead-crawler")
            .build()
            .expect("reqwest client builds with the default TLS backend");
        Self { http, token }
    }

    async fn execute(&self, query: &str, cursor: Option<&str>) -> Result<Value> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let body = json!({ "query": SEARCH_QUERY, "variables": { "q": query, "cursor": cursor } });
            let response = self
                .http
                .post(GITHUB_GRAPHQL_URL)
                .bearer_auth(&self.token)
                .json(&body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(Error::Upstream(format!("network error: {err}")));
                    }
                    warn!(attempt, %err, "crawl request failed, retrying after fixed backoff");
                    backoff_sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 403 {
                let remaining = header_i64(&response, "x-ratelimit-remaining");
                if remaining == Some(0) {
                    let reset_at = header_i64(&response, "x-ratelimit-reset").unwrap_or(0);
                    sleep_until_epoch(reset_at).await;
                    continue;
                }
            }

            if status.is_server_error() {
                if attempt >= MAX_ATTEMPTS {
                    return Err(Error::Upstream(format!("upstream server error: {status}")));
                }
                let jitter_ms = rand::thread_rng().gen_range(0..500);
                let delay = Duration::from_millis(500 * 2u64.pow(attempt.min(6)) + jitter_ms);
                warn!(attempt, %status, ?delay, "upstream 5xx, backing off");
                backoff_sleep(delay).await;
                continue;
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|err| Error::Upstream(format!("malformed response body: {err}")))?;

            if let Some(errors) = payload.get("errors").and_then(Value::as_array) {
                if errors
                    .iter()
                    .any(|e| e.get("type").and_then(Value::as_str) == Some("RATE_LIMITED"))
                {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(Error::Upstream("rate limited after max attempts".into()));
                    }
                    backoff_sleep(Duration::from_secs(60)).await;
                    continue;
                }
                return Err(Error::Upstream(format!("GraphQL errors: {errors:?}")));
            }

            if let Some(remaining) = payload
                .pointer("/data/rateLimit/remaining")
                .and_then(Value::as_i64)
            {
                if remaining < LOW_REMAINING_THRESHOLD {
                    let reset_at = payload
                        .pointer("/data/rateLimit/resetAt")
                        .and_then(Value::as_str)
                        .and_then(|s| iso_to_unix(Some(s)))
                        .unwrap_or(0);
                    debug!(remaining, reset_at, "rate limit running low, pausing");
                    sleep_until_epoch(reset_at).await;
                }
            }

            return Ok(payload);
        }
    }
}

#[async_trait::async_trait]
impl SearchSource for GithubSearchClient {
    async fn search_page(&self, query: &str, cursor: Option<&str>) -> Result<SearchPage> {
        let payload = self.execute(query, cursor).await?;
        let search = payload
            .pointer("/data/search")
            .ok_or_else(|| Error::Upstream("response missing data.search".into()))?;

        let nodes = search
            .get("nodes")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(node_to_snapshot)
            .collect();

        let end_cursor = search
            .pointer("/pageInfo/endCursor")
            .and_then(Value::as_str)
            .map(str::to_owned);
        let has_next_page = search
            .pointer("/pageInfo/hasNextPage")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        Ok(SearchPage {
            nodes,
            end_cursor,
            has_next_page,
        })
    }
}

fn header_i64(response: &reqwest::Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

async fn sleep_until_epoch(reset_at_unix: i64) {
    let now = crate::timeutil::now_unix();
    let wait = (reset_at_unix - now).max(1).min(15 * 60);
    backoff_sleep(Duration::from_secs(wait as u64)).await;
}

/// Normalizes one GraphQL search result node into a [`RepoSnapshot`],
/// mirroring `original_source/crawler.py::_node_to_repo`'s defensive
/// unwrapping of the nested `watchers`/`primaryLanguage`/`repositoryTopics`
/// shapes (Design Notes: "dynamic snapshot shape").
fn node_to_snapshot(node: &Value) -> Option<RepoSnapshot> {
    let id = node.get("databaseId")?.as_i64()?;
    let name_with_owner = node.get("nameWithOwner")?.as_str()?.to_owned();

    let topics = node
        .pointer("/repositoryTopics/nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|n| n.pointer("/topic/name")?.as_str())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Some(RepoSnapshot {
        id,
        name_with_owner,
        description: node.get("description").and_then(Value::as_str).map(str::to_owned),
        homepage_url: node.get("homepageUrl").and_then(Value::as_str).map(str::to_owned),
        created_at: node.get("createdAt").and_then(Value::as_str).and_then(|s| iso_to_unix(Some(s))),
        stars: node.get("stargazerCount").and_then(Value::as_i64).unwrap_or(0),
        forks: node.get("forkCount").and_then(Value::as_i64).unwrap_or(0),
        watchers: node
            .pointer("/watchers/totalCount")
            .and_then(Value::as_i64)
            .unwrap_or(0),
        disk_usage: node.get("diskUsage").and_then(Value::as_i64),
        updated_at: node.get("updatedAt").and_then(Value::as_str).and_then(|s| iso_to_unix(Some(s))),
        pushed_at: node.get("pushedAt").and_then(Value::as_str).and_then(|s| iso_to_unix(Some(s))),
        is_archived: node.get("isArchived").and_then(Value::as_bool).unwrap_or(false),
        primary_language: node
            .pointer("/primaryLanguage/name")
            .and_then(Value::as_str)
            .map(str::to_owned),
        topics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_to_snapshot_unwraps_nested_shapes() {
        let node = json!({
            "databaseId": 42,
            "nameWithOwner": "acme/widget",
            "description": "a widget",
            "homepageUrl": null,
            "createdAt": "2020-01-01T00:00:00Z",
            "updatedAt": "2021-01-01T00:00:00Z",
            "pushedAt": "2021-06-01T00:00:00Z",
            "isArchived": false,
            "diskUsage": 1024,
            "stargazerCount": 10,
            "forkCount": 2,
            "watchers": { "totalCount": 10 },
            "primaryLanguage": { "name": "Rust" },
            "repositoryTopics": { "nodes": [{ "topic": { "name": "cli" } }] }
        });

        let snapshot = node_to_snapshot(&node).expect("valid node");
        assert_eq!(snapshot.id, 42);
        assert_eq!(snapshot.name_with_owner, "acme/widget");
        assert_eq!(snapshot.primary_language.as_deref(), Some("Rust"));
        assert_eq!(snapshot.topics, vec!["cli".to_string()]);
        assert_eq!(snapshot.watchers, 10);
        assert!(snapshot.created_at.is_some());
    }

    #[test]
    fn node_to_snapshot_rejects_missing_database_id() {
        let node = json!({ "nameWithOwner": "acme/widget" });
        assert!(node_to_snapshot(&node).is_none());
    }
}
