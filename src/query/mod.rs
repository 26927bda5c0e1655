use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use crate::error::{Error, Result};
use crate::model::{Filters, HistorySegment, Metric, RepoView};
use crate::store::Store;
use crate::timeutil::unix_to_iso;

const PAGE_SIZE: i64 = 100;

const BASE_SELECT: &str = "
    SELECT
        r.name_with_owner                     AS name_with_owner,
        rl.stars                               AS stars,
        rl.forks                               AS forks,
        rl.watchers                            AS watchers,
        rl.disk_usage                          AS disk_usage,
        r.description                          AS description,
        r.homepage_url                         AS homepage_url,
        r.created_at                           AS created_at,
        rl.pushed_at                           AS pushed_at,
        rl.is_archived                         AS is_archived,
        lang.name                              AS primary_language,
        GROUP_CONCAT(t.name, char(31))         AS topics_concat
    FROM repo_latest rl
    JOIN repo r ON r.id = rl.repo_id
    LEFT JOIN language lang ON lang.id = rl.primary_language_id
    LEFT JOIN repo_topic_latest rtl ON rtl.repo_id = rl.repo_id
    LEFT JOIN topic t ON t.id = rtl.topic_id
";

/// Stateless, read-only leaderboard query layer over a [`Store`]. Every
/// method here corresponds 1:1 to a spec.md §4.3 operation.
pub struct QueryEngine<'a> {
    store: &'a Store,
}

impl<'a> QueryEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// `leaderboard(metric, page, filters)` — spec.md §4.3.1 / §4.3.2.
    /// Dispatches to the trending query when `metric` names a trending
    /// window.
    pub fn leaderboard(&self, metric_raw: &str, page: i64, filters: &Filters) -> Result<Vec<RepoView>> {
        if page < 1 {
            return Err(Error::InvalidArgument("page must be >= 1".to_string()));
        }
        let metric = Metric::parse(metric_raw)
            .ok_or_else(|| Error::InvalidArgument(format!("unsupported metric: {metric_raw}")))?;

        if let Some(window) = metric.window_seconds() {
            return self.trending_leaderboard(window, page, filters);
        }

        let column = metric.sort_column().expect("non-trending metric always has a sort column");
        let (where_clause, where_params) = filter_where(filters);
        let offset = (page - 1) * PAGE_SIZE;

        let sql = format!(
            "{BASE_SELECT}{where_clause}
             GROUP BY rl.repo_id
             ORDER BY rl.{column} DESC, r.name_with_owner ASC
             LIMIT ? OFFSET ?"
        );

        let mut all_params = where_params;
        all_params.push(SqlValue::Integer(PAGE_SIZE));
        all_params.push(SqlValue::Integer(offset));

        let conn = self.store.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(all_params), |row| row_to_view(row, false))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `countLeaderboard(filters)` — spec.md §4.3.1.
    pub fn count_leaderboard(&self, filters: &Filters) -> Result<i64> {
        let (where_clause, where_params) = filter_where(filters);
        let sql = format!(
            "SELECT COUNT(DISTINCT rl.repo_id)
             FROM repo_latest rl
             JOIN repo r ON r.id = rl.repo_id
             LEFT JOIN language lang ON lang.id = rl.primary_language_id
             {where_clause}"
        );
        let conn = self.store.conn();
        let count: i64 = conn.query_row(&sql, params_from_iter(where_params), |row| row.get(0))?;
        Ok(count)
    }

    /// `totalPages` helper used by the HTTP layer (spec.md §4.3.1).
    pub fn total_pages(total: i64) -> i64 {
        if total <= 0 {
            1
        } else {
            (total + PAGE_SIZE - 1) / PAGE_SIZE
        }
    }

    fn trending_leaderboard(&self, window_seconds: i64, page: i64, filters: &Filters) -> Result<Vec<RepoView>> {
        let base_run_id = self.base_run_id_for_window(window_seconds)?;
        let (where_clause, where_params) = filter_where(filters);
        let offset = (page - 1) * PAGE_SIZE;

        let sql = format!(
            "SELECT
                r.name_with_owner                     AS name_with_owner,
                rl.stars                               AS stars,
                rl.forks                               AS forks,
                rl.watchers                            AS watchers,
                rl.disk_usage                          AS disk_usage,
                r.description                          AS description,
                r.homepage_url                         AS homepage_url,
                r.created_at                           AS created_at,
                rl.pushed_at                           AS pushed_at,
                rl.is_archived                         AS is_archived,
                lang.name                              AS primary_language,
                GROUP_CONCAT(t.name, char(31))         AS topics_concat,
                MAX(
                    rl.stars - COALESCE((
                        SELECT h.stars
                        FROM repo_metrics_hist h
                        WHERE h.repo_id = rl.repo_id
                          AND h.start_run_id <= ?
                          AND h.end_run_id   >= ?
                        ORDER BY h.start_run_id ASC
                        LIMIT 1
                    ), rl.stars),
                    0
                )                                       AS new_stars
            FROM repo_latest rl
            JOIN repo r ON r.id = rl.repo_id
            LEFT JOIN language lang ON lang.id = rl.primary_language_id
            LEFT JOIN repo_topic_latest rtl ON rtl.repo_id = rl.repo_id
            LEFT JOIN topic t ON t.id = rtl.topic_id
            {where_clause}
            GROUP BY rl.repo_id
            ORDER BY new_stars DESC, rl.stars DESC, r.name_with_owner ASC
            LIMIT ? OFFSET ?"
        );

        let mut all_params = vec![SqlValue::Integer(base_run_id), SqlValue::Integer(base_run_id)];
        all_params.extend(where_params);
        all_params.push(SqlValue::Integer(PAGE_SIZE));
        all_params.push(SqlValue::Integer(offset));

        let conn = self.store.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(all_params), |row| row_to_view(row, true))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn base_run_id_for_window(&self, window_seconds: i64) -> Result<i64> {
        let conn = self.store.conn();
        let max_fetched_at: Option<i64> =
            conn.query_row("SELECT MAX(fetched_at) FROM fetch_run", [], |row| row.get(0))?;
        let Some(max_fetched_at) = max_fetched_at else {
            return Ok(0);
        };
        let cutoff = max_fetched_at - window_seconds;
        let base_run_id: Option<i64> = conn.query_row(
            "SELECT MAX(id) FROM fetch_run WHERE fetched_at <= ?1",
            params![cutoff],
            |row| row.get(0),
        )?;
        Ok(base_run_id.unwrap_or(0))
    }

    /// `getRepoLatest(nameWithOwner)` — spec.md §4.3.3.
    pub fn get_repo_latest(&self, name_with_owner: &str) -> Result<Option<RepoView>> {
        let sql = format!("{BASE_SELECT} WHERE r.name_with_owner = ?1 GROUP BY rl.repo_id");
        let view = {
            let conn = self.store.conn();
            conn.query_row(&sql, params![name_with_owner], |row| row_to_view(row, false))
                .optional()?
        };
        let Some(mut view) = view else {
            return Ok(None);
        };
        view.g = self.get_global_rank(name_with_owner)?;
        Ok(Some(view))
    }

    /// `getGlobalRank(nameWithOwner)` — spec.md §4.3.4.
    pub fn get_global_rank(&self, name_with_owner: &str) -> Result<Option<i64>> {
        let conn = self.store.conn();
        conn.query_row(
            "SELECT (
                SELECT COUNT(*)
                FROM repo_latest rl2
                JOIN repo r2 ON r2.id = rl2.repo_id
                WHERE rl2.stars > rl.stars
                   OR (rl2.stars = rl.stars AND r2.name_with_owner < r.name_with_owner)
            ) + 1
            FROM repo_latest rl
            JOIN repo r ON r.id = rl.repo_id
            WHERE r.name_with_owner = ?1",
            params![name_with_owner],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// `historySegments(nameWithOwner, limit)` — spec.md §4.3.5.
    pub fn history_segments(&self, name_with_owner: &str, limit: i64) -> Result<Vec<HistorySegment>> {
        let conn = self.store.conn();
        let repo_id: Option<i64> = conn
            .query_row(
                "SELECT id FROM repo WHERE name_with_owner = ?1",
                params![name_with_owner],
                |row| row.get(0),
            )
            .optional()?;
        let Some(repo_id) = repo_id else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare(
            "SELECT
                rs.fetched_at AS start_fetched_at,
                re.fetched_at AS end_fetched_at,
                h.stars, h.forks, h.watchers, h.disk_usage
             FROM repo_metrics_hist h
             JOIN fetch_run rs ON rs.id = h.start_run_id
             JOIN fetch_run re ON re.id = h.end_run_id
             WHERE h.repo_id = ?1
             ORDER BY h.start_run_id ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![repo_id, limit], |row| {
                Ok(HistorySegment {
                    start_fetched_at: unix_to_iso(row.get::<_, Option<i64>>(0)?),
                    end_fetched_at: unix_to_iso(row.get::<_, Option<i64>>(1)?),
                    s: row.get(2)?,
                    f: row.get(3)?,
                    w: row.get(4)?,
                    d: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

fn filter_where(filters: &Filters) -> (String, Vec<SqlValue>) {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<SqlValue> = Vec::new();

    if let Some(language) = &filters.language {
        clauses.push("lang.name = ?".to_string());
        params.push(SqlValue::Text(language.clone()));
    }

    if let Some(topic) = &filters.topic {
        clauses.push(
            "EXISTS (
                SELECT 1 FROM repo_topic_latest rtl2
                JOIN topic t2 ON t2.id = rtl2.topic_id
                WHERE rtl2.repo_id = rl.repo_id AND t2.name = ?
            )"
            .to_string(),
        );
        params.push(SqlValue::Text(topic.clone()));
    }

    if let Some(q) = &filters.q {
        let trimmed = q.trim();
        if !trimmed.is_empty() {
            let like = format!("%{trimmed}%");
            if filters.in_description {
                clauses.push("(r.name_with_owner LIKE ? OR r.description LIKE ?)".to_string());
                params.push(SqlValue::Text(like.clone()));
                params.push(SqlValue::Text(like));
            } else {
                clauses.push("r.name_with_owner LIKE ?".to_string());
                params.push(SqlValue::Text(like));
            }
        }
    }

    if clauses.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), params)
    }
}

fn row_to_view(row: &Row<'_>, has_new_stars: bool) -> rusqlite::Result<RepoView> {
    let topics_concat: Option<String> = row.get(11)?;
    let topics = topics_concat
        .map(|s| s.split('\u{1f}').filter(|t| !t.is_empty()).map(str::to_string).collect())
        .unwrap_or_default();

    let new_stars: Option<i64> = if has_new_stars {
        let ns: i64 = row.get(12)?;
        if ns != 0 {
            Some(ns)
        } else {
            None
        }
    } else {
        None
    };

    Ok(RepoView {
        n: row.get(0)?,
        g: None,
        s: row.get(1)?,
        f: row.get(2)?,
        w: row.get(3)?,
        d: row.get(4)?,
        a: row.get(5)?,
        h: row.get(6)?,
        c: unix_to_iso(row.get::<_, Option<i64>>(7)?),
        p: unix_to_iso(row.get::<_, Option<i64>>(8)?),
        i: row.get::<_, i64>(9)? != 0,
        l: row.get(10)?,
        t: topics,
        ns: new_stars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::IngestionEngine;
    use crate::model::RepoSnapshot;

    fn snap(id: i64, name: &str, stars: i64, lang: Option<&str>, topics: &[&str]) -> RepoSnapshot {
        RepoSnapshot {
            id,
            name_with_owner: name.to_string(),
            description: Some(format!("desc for {name}")),
            homepage_url: None,
            created_at: Some(1_000),
            stars,
            forks: 1,
            watchers: 2,
            disk_usage: Some(100),
            updated_at: Some(2_000),
            pushed_at: Some(3_000),
            is_archived: false,
            primary_language: lang.map(str::to_string),
            topics: topics.iter().map(|s| s.to_string()).collect(),
        }
    }

    // Scenario S6: filter composition (language AND topic).
    #[test]
    fn filter_composition_matches_intersection_only() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        engine
            .ingest(&[
                snap(1, "go/db", 10, Some("Go"), &["database"]),
                snap(2, "go/other", 20, Some("Go"), &[]),
                snap(3, "rust/db", 30, Some("Rust"), &["database"]),
            ])
            .unwrap();

        let qe = QueryEngine::new(&store);
        let filters = Filters {
            q: None,
            in_description: true,
            language: Some("Go".to_string()),
            topic: Some("database".to_string()),
        };
        let items = qe.leaderboard("stars", 1, &filters).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].n, "go/db");
    }

    // Scenario S4: trending window picks up the delta since the cutoff run.
    #[test]
    fn trending_delta_uses_segment_covering_base_run() {
        let store = Store::open_in_memory().unwrap();
        let day = 86_400;
        let conn_setup = |fetched_at: i64| -> i64 {
            let conn = store.conn();
            conn.execute("INSERT INTO fetch_run(fetched_at) VALUES (?1)", params![fetched_at])
                .unwrap();
            conn.last_insert_rowid()
        };
        // runs at 0, 1d, 2d, 3d, 4d with stars 100, 100, 120, 150, 200
        let stars_by_run = [100, 100, 120, 150, 200];
        for (i, stars) in stars_by_run.iter().enumerate() {
            let run_id = conn_setup(i as i64 * day);
            let conn = store.conn();
            conn.execute(
                "INSERT INTO repo(id, name_with_owner, created_at) VALUES (1, 'a/x', 0)
                 ON CONFLICT(id) DO NOTHING",
                [],
            )
            .unwrap();
            if i == 0 {
                conn.execute(
                    "INSERT INTO repo_metrics_hist(repo_id, start_run_id, end_run_id, stars, forks, watchers, disk_usage)
                     VALUES (1, ?1, ?1, ?2, 0, 0, NULL)",
                    params![run_id, stars],
                )
                .unwrap();
            } else if *stars == stars_by_run[i - 1] {
                conn.execute(
                    "UPDATE repo_metrics_hist SET end_run_id = ?1 WHERE repo_id = 1 AND end_run_id = (SELECT MAX(end_run_id) FROM repo_metrics_hist WHERE repo_id = 1)",
                    params![run_id],
                )
                .unwrap();
            } else {
                conn.execute(
                    "INSERT INTO repo_metrics_hist(repo_id, start_run_id, end_run_id, stars, forks, watchers, disk_usage)
                     VALUES (1, ?1, ?1, ?2, 0, 0, NULL)",
                    params![run_id, stars],
                )
                .unwrap();
            }
            conn.execute(
                "INSERT INTO repo_latest(repo_id, run_id, history_start_run_id, stars, forks, watchers, is_archived)
                 VALUES (1, ?1, 1, ?2, 0, 0, 0)
                 ON CONFLICT(repo_id) DO UPDATE SET run_id = excluded.run_id, stars = excluded.stars",
                params![run_id, stars],
            )
            .unwrap();
        }

        let qe = QueryEngine::new(&store);
        let items = qe.leaderboard("trending3d", 1, &Filters::default()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].ns, Some(100));
    }

    #[test]
    fn unrecognized_metric_is_invalid_argument() {
        let store = Store::open_in_memory().unwrap();
        let qe = QueryEngine::new(&store);
        let err = qe.leaderboard("bogus", 1, &Filters::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn zero_results_yield_one_total_page() {
        assert_eq!(QueryEngine::total_pages(0), 1);
        assert_eq!(QueryEngine::total_pages(100), 1);
        assert_eq!(QueryEngine::total_pages(101), 2);
    }
}
