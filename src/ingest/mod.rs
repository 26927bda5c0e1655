use std::collections::{HashMap, HashSet};

use rusqlite::{params, OptionalExtension, Transaction};

use crate::error::Result;
use crate::model::{MetricQuadruple, RepoSnapshot};
use crate::store::Store;
use crate::timeutil::now_unix;

/// Existing metrics for a repo, as needed by the diff step.
struct ExistingLatest {
    history_start_run_id: i64,
    quad: MetricQuadruple,
}

/// Consumes batches of repository snapshots for one fetch pass, diffing
/// each against `RepoLatest` and maintaining run-length-encoded history
/// (spec.md §4.2). Not `Send`/`Sync` across passes by design: a single
/// `IngestionEngine` instance owns one pass's `run_id` and its in-process
/// interning caches.
pub struct IngestionEngine<'a> {
    store: &'a Store,
    run_id: Option<i64>,
    lang_cache: HashMap<String, i64>,
    topic_cache: HashMap<String, i64>,
    processed_repo_ids: HashSet<i64>,
}

impl<'a> IngestionEngine<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            run_id: None,
            lang_cache: HashMap::new(),
            topic_cache: HashMap::new(),
            processed_repo_ids: HashSet::new(),
        }
    }

    /// The run id for the current pass, lazily creating a `FetchRun` row on
    /// first call.
    pub fn run_id(&mut self) -> Result<i64> {
        if let Some(id) = self.run_id {
            return Ok(id);
        }
        let fetched_at = now_unix();
        let id = self.store.transaction(|tx| {
            tx.execute(
                "INSERT INTO fetch_run(fetched_at) VALUES (?1)",
                params![fetched_at],
            )?;
            Ok(tx.last_insert_rowid())
        })?;
        self.run_id = Some(id);
        Ok(id)
    }

    /// Ends the current pass. The next call to [`IngestionEngine::ingest`]
    /// starts a new `FetchRun` and a fresh dedup set.
    pub fn finish_run(&mut self) {
        self.run_id = None;
        self.processed_repo_ids.clear();
    }

    /// Ingests one batch of snapshots, per the six-phase algorithm in
    /// spec.md §4.2. Malformed or duplicate-within-pass entries are
    /// dropped silently (phase 1); callers that want visibility should log
    /// the input batch size vs. what this returns.
    pub fn ingest(&mut self, batch: &[RepoSnapshot]) -> Result<usize> {
        let run_id = self.run_id()?;

        // Phase 1: filter.
        let fresh: Vec<&RepoSnapshot> = batch
            .iter()
            .filter(|s| s.id > 0 && !self.processed_repo_ids.contains(&s.id))
            .collect();
        for s in &fresh {
            self.processed_repo_ids.insert(s.id);
        }
        if fresh.is_empty() {
            return Ok(0);
        }

        // Phases 2-3: resolve name conflicts, then upsert Repo.
        self.store.transaction(|tx| {
            resolve_name_conflicts(tx, &fresh)?;
            upsert_repos(tx, &fresh)?;
            Ok(())
        })?;

        // Intern languages/topics outside the main write transaction (own
        // small transactions, like the per-name cache fills in the
        // original implementation).
        for s in &fresh {
            if let Some(name) = s.primary_language.as_deref() {
                self.intern_language(name)?;
            }
            for topic in &s.topics {
                self.intern_topic(topic)?;
            }
        }

        // Phase 4: diff against RepoLatest; phases 5-6: upsert latest +
        // refresh topics, all inside one transaction.
        let repo_ids: Vec<i64> = fresh.iter().map(|s| s.id).collect();
        self.store.transaction(|tx| {
            let existing = fetch_existing_latest(tx, &repo_ids)?;

            for s in &fresh {
                let quad = MetricQuadruple {
                    stars: s.stars,
                    forks: s.forks,
                    watchers: s.watchers,
                    disk_usage: s.disk_usage,
                };
                let history_start_run_id = match existing.get(&s.id) {
                    None => {
                        insert_hist_segment(tx, s.id, run_id, run_id, quad)?;
                        run_id
                    }
                    Some(old) => {
                        if old.quad != quad {
                            insert_hist_segment(tx, s.id, run_id, run_id, quad)?;
                            run_id
                        } else {
                            extend_hist_segment(tx, s.id, old.history_start_run_id, run_id)?;
                            old.history_start_run_id
                        }
                    }
                };

                let lang_id = s
                    .primary_language
                    .as_deref()
                    .and_then(|n| self.lang_cache.get(n).copied());

                tx.execute(
                    "INSERT INTO repo_latest(
                        repo_id, run_id, history_start_run_id,
                        stars, forks, watchers, disk_usage,
                        updated_at, pushed_at, is_archived,
                        primary_language_id
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    ON CONFLICT(repo_id) DO UPDATE SET
                        run_id               = excluded.run_id,
                        history_start_run_id = excluded.history_start_run_id,
                        stars                = excluded.stars,
                        forks                = excluded.forks,
                        watchers             = excluded.watchers,
                        disk_usage           = excluded.disk_usage,
                        updated_at           = excluded.updated_at,
                        pushed_at            = excluded.pushed_at,
                        is_archived          = excluded.is_archived,
                        primary_language_id  = excluded.primary_language_id",
                    params![
                        s.id,
                        run_id,
                        history_start_run_id,
                        s.stars,
                        s.forks,
                        s.watchers,
                        s.disk_usage,
                        s.updated_at,
                        s.pushed_at,
                        s.is_archived as i64,
                        lang_id,
                    ],
                )?;
            }

            refresh_topics(tx, &fresh, &self.topic_cache)?;
            Ok(())
        })?;

        Ok(fresh.len())
    }

    fn intern_language(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self.lang_cache.get(name) {
            return Ok(*id);
        }
        let id = self.store.transaction(|tx| {
            tx.execute("INSERT OR IGNORE INTO language(name) VALUES (?1)", params![name])?;
            let id: i64 = tx.query_row(
                "SELECT id FROM language WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(id)
        })?;
        self.lang_cache.insert(name.to_string(), id);
        Ok(id)
    }

    fn intern_topic(&mut self, name: &str) -> Result<i64> {
        if let Some(id) = self.topic_cache.get(name) {
            return Ok(*id);
        }
        let id = self.store.transaction(|tx| {
            tx.execute("INSERT OR IGNORE INTO topic(name) VALUES (?1)", params![name])?;
            let id: i64 = tx.query_row(
                "SELECT id FROM topic WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )?;
            Ok(id)
        })?;
        self.topic_cache.insert(name.to_string(), id);
        Ok(id)
    }
}

fn resolve_name_conflicts(tx: &Transaction<'_>, fresh: &[&RepoSnapshot]) -> Result<()> {
    for s in fresh {
        tx.execute(
            "DELETE FROM repo_latest
             WHERE repo_id IN (SELECT id FROM repo WHERE name_with_owner = ?1 AND id != ?2)",
            params![s.name_with_owner, s.id],
        )?;
        tx.execute(
            "DELETE FROM repo_topic_latest
             WHERE repo_id IN (SELECT id FROM repo WHERE name_with_owner = ?1 AND id != ?2)",
            params![s.name_with_owner, s.id],
        )?;
        tx.execute(
            "UPDATE repo
             SET name_with_owner = name_with_owner || '-renamed-' || id
             WHERE name_with_owner = ?1 AND id != ?2",
            params![s.name_with_owner, s.id],
        )?;
    }
    Ok(())
}

fn upsert_repos(tx: &Transaction<'_>, fresh: &[&RepoSnapshot]) -> Result<()> {
    for s in fresh {
        tx.execute(
            "INSERT INTO repo(id, name_with_owner, created_at, description, homepage_url)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name_with_owner = excluded.name_with_owner,
                description     = excluded.description,
                homepage_url    = excluded.homepage_url",
            params![
                s.id,
                s.name_with_owner,
                s.created_at,
                s.description,
                s.homepage_url,
            ],
        )?;
    }
    Ok(())
}

fn fetch_existing_latest(
    tx: &Transaction<'_>,
    repo_ids: &[i64],
) -> Result<HashMap<i64, ExistingLatest>> {
    let mut out = HashMap::new();
    let mut stmt = tx.prepare(
        "SELECT repo_id, history_start_run_id, stars, forks, watchers, disk_usage
         FROM repo_latest WHERE repo_id = ?1",
    )?;
    for &id in repo_ids {
        if let Some(row) = stmt
            .query_row(params![id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            })
            .optional()?
        {
            let (repo_id, history_start_run_id, stars, forks, watchers, disk_usage) = row;
            out.insert(
                repo_id,
                ExistingLatest {
                    history_start_run_id,
                    quad: MetricQuadruple {
                        stars,
                        forks,
                        watchers,
                        disk_usage,
                    },
                },
            );
        }
    }
    Ok(out)
}

fn insert_hist_segment(
    tx: &Transaction<'_>,
    repo_id: i64,
    start_run_id: i64,
    end_run_id: i64,
    quad: MetricQuadruple,
) -> Result<()> {
    tx.execute(
        "INSERT INTO repo_metrics_hist(repo_id, start_run_id, end_run_id, stars, forks, watchers, disk_usage)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![repo_id, start_run_id, end_run_id, quad.stars, quad.forks, quad.watchers, quad.disk_usage],
    )?;
    Ok(())
}

fn extend_hist_segment(
    tx: &Transaction<'_>,
    repo_id: i64,
    start_run_id: i64,
    new_end_run_id: i64,
) -> Result<()> {
    tx.execute(
        "UPDATE repo_metrics_hist SET end_run_id = ?1 WHERE repo_id = ?2 AND start_run_id = ?3",
        params![new_end_run_id, repo_id, start_run_id],
    )?;
    Ok(())
}

fn refresh_topics(
    tx: &Transaction<'_>,
    fresh: &[&RepoSnapshot],
    topic_cache: &HashMap<String, i64>,
) -> Result<()> {
    for s in fresh {
        tx.execute(
            "DELETE FROM repo_topic_latest WHERE repo_id = ?1",
            params![s.id],
        )?;
    }
    for s in fresh {
        for topic in &s.topics {
            if let Some(&topic_id) = topic_cache.get(topic) {
                tx.execute(
                    "INSERT OR IGNORE INTO repo_topic_latest(repo_id, topic_id) VALUES (?1, ?2)",
                    params![s.id, topic_id],
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(id: i64, name: &str, stars: i64) -> RepoSnapshot {
        RepoSnapshot {
            id,
            name_with_owner: name.to_string(),
            description: None,
            homepage_url: None,
            created_at: Some(1_000),
            stars,
            forks: 0,
            watchers: 0,
            disk_usage: None,
            updated_at: None,
            pushed_at: None,
            is_archived: false,
            primary_language: None,
            topics: vec![],
        }
    }

    fn repo_count(store: &Store) -> i64 {
        store
            .conn()
            .query_row("SELECT COUNT(*) FROM repo", [], |r| r.get(0))
            .unwrap()
    }

    fn hist_count(store: &Store, repo_id: i64) -> i64 {
        store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM repo_metrics_hist WHERE repo_id = ?1",
                params![repo_id],
                |r| r.get(0),
            )
            .unwrap()
    }

    // Scenario S1: fresh ingest.
    #[test]
    fn fresh_ingest_creates_one_history_segment() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        engine.ingest(&[snap(1, "a/x", 10)]).unwrap();

        assert_eq!(repo_count(&store), 1);
        assert_eq!(hist_count(&store, 1), 1);
        let (start, end, stars): (i64, i64, i64) = store
            .conn()
            .query_row(
                "SELECT start_run_id, end_run_id, stars FROM repo_metrics_hist WHERE repo_id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!((start, end, stars), (1, 1, 10));
    }

    // Scenario S2: no-op pass extends the open segment.
    #[test]
    fn unchanged_metrics_extend_segment_across_passes() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        engine.ingest(&[snap(1, "a/x", 10)]).unwrap();
        engine.finish_run();
        engine.ingest(&[snap(1, "a/x", 10)]).unwrap();

        assert_eq!(hist_count(&store, 1), 1);
        let (start, end): (i64, i64) = store
            .conn()
            .query_row(
                "SELECT start_run_id, end_run_id FROM repo_metrics_hist WHERE repo_id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((start, end), (1, 2));
    }

    // Scenario S3: a changed metric opens a new segment.
    #[test]
    fn changed_metrics_open_new_segment() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        engine.ingest(&[snap(1, "a/x", 10)]).unwrap();
        engine.finish_run();
        engine.ingest(&[snap(1, "a/x", 10)]).unwrap();
        engine.finish_run();
        engine.ingest(&[snap(1, "a/x", 15)]).unwrap();

        assert_eq!(hist_count(&store, 1), 2);
        let history_start_run_id: i64 = store
            .conn()
            .query_row(
                "SELECT history_start_run_id FROM repo_latest WHERE repo_id = 1",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(history_start_run_id, 3);
    }

    // Scenario S5: rename disassociates the losing id's latest/topic rows
    // but keeps its history.
    #[test]
    fn rename_preserves_losing_ids_history() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        engine.ingest(&[snap(7, "old/x", 5)]).unwrap();
        engine.finish_run();
        engine.ingest(&[snap(8, "old/x", 9)]).unwrap();

        let old_name: String = store
            .conn()
            .query_row(
                "SELECT name_with_owner FROM repo WHERE id = 7",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(old_name, "old/x-renamed-8");

        let latest_count_for_7: i64 = store
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM repo_latest WHERE repo_id = 7",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(latest_count_for_7, 0);
        assert_eq!(hist_count(&store, 7), 1);

        let new_name: String = store
            .conn()
            .query_row(
                "SELECT name_with_owner FROM repo WHERE id = 8",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(new_name, "old/x");
    }

    // Scenario S7: duplicate ingestion within a pass is a no-op the second time.
    #[test]
    fn duplicate_within_pass_is_dropped() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        let n = engine.ingest(&[snap(1, "a/x", 10), snap(1, "a/x", 10)]).unwrap();
        assert_eq!(n, 1);
        assert_eq!(hist_count(&store, 1), 1);
    }

    #[test]
    fn non_positive_id_is_skipped() {
        let store = Store::open_in_memory().unwrap();
        let mut engine = IngestionEngine::new(&store);
        let n = engine.ingest(&[snap(0, "a/x", 10), snap(-1, "b/y", 10)]).unwrap();
        assert_eq!(n, 0);
        assert_eq!(repo_count(&store), 0);
    }
}
