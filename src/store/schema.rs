/// Schema DDL, transliterated column-for-column and index-for-index from
/// `examples/original_source/db.py::_create_schema`.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repo (
    id              INTEGER PRIMARY KEY,
    name_with_owner TEXT NOT NULL UNIQUE,
    description     TEXT,
    homepage_url    TEXT,
    created_at      INTEGER
);

CREATE TABLE IF NOT EXISTS language (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS topic (
    id   INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS fetch_run (
    id         INTEGER PRIMARY KEY,
    fetched_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS repo_latest (
    repo_id              INTEGER PRIMARY KEY,
    run_id               INTEGER NOT NULL,
    history_start_run_id INTEGER NOT NULL,

    stars      INTEGER NOT NULL,
    forks      INTEGER NOT NULL,
    watchers   INTEGER NOT NULL,
    disk_usage INTEGER,

    updated_at  INTEGER,
    pushed_at   INTEGER,
    is_archived INTEGER NOT NULL,

    primary_language_id INTEGER,

    FOREIGN KEY(repo_id) REFERENCES repo(id) ON DELETE CASCADE,
    FOREIGN KEY(run_id) REFERENCES fetch_run(id) ON DELETE CASCADE,
    FOREIGN KEY(history_start_run_id) REFERENCES fetch_run(id) ON DELETE CASCADE,
    FOREIGN KEY(primary_language_id) REFERENCES language(id)
);

CREATE TABLE IF NOT EXISTS repo_metrics_hist (
    repo_id      INTEGER NOT NULL,
    start_run_id INTEGER NOT NULL,
    end_run_id   INTEGER NOT NULL,

    stars      INTEGER NOT NULL,
    forks      INTEGER NOT NULL,
    watchers   INTEGER NOT NULL,
    disk_usage INTEGER,

    PRIMARY KEY (repo_id, start_run_id),
    FOREIGN KEY(repo_id) REFERENCES repo(id) ON DELETE CASCADE,
    FOREIGN KEY(start_run_id) REFERENCES fetch_run(id) ON DELETE CASCADE,
    FOREIGN KEY(end_run_id) REFERENCES fetch_run(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS repo_topic_latest (
    repo_id  INTEGER NOT NULL,
    topic_id INTEGER NOT NULL,
    PRIMARY KEY (repo_id, topic_id),
    FOREIGN KEY(repo_id) REFERENCES repo(id) ON DELETE CASCADE,
    FOREIGN KEY(topic_id) REFERENCES topic(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_repo_name ON repo(name_with_owner);

CREATE INDEX IF NOT EXISTS idx_repo_latest_stars ON repo_latest(stars DESC);
CREATE INDEX IF NOT EXISTS idx_repo_latest_forks ON repo_latest(forks DESC);
CREATE INDEX IF NOT EXISTS idx_repo_latest_watchers ON repo_latest(watchers DESC);
CREATE INDEX IF NOT EXISTS idx_repo_latest_disk ON repo_latest(disk_usage DESC);

CREATE INDEX IF NOT EXISTS idx_hist_repo_end ON repo_metrics_hist(repo_id, end_run_id);

CREATE INDEX IF NOT EXISTS idx_topic_name ON topic(name);
CREATE INDEX IF NOT EXISTS idx_repo_topic_topic ON repo_topic_latest(topic_id);
"#;
