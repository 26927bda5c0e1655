use repolead::ingest::IngestionEngine;
use repolead::model::{Filters, RepoSnapshot};
use repolead::query::QueryEngine;
use repolead::store::Store;

fn snapshot(id: i64, name: &str, stars: i64, lang: Option<&str>, topics: &[&str]) -> RepoSnapshot {
    RepoSnapshot {
        id,
        name_with_owner: name.to_string(),
        description: Some(format!("{name} does things")),
        homepage_url: None,
        created_at: Some(1_700_000_000),
        stars,
        forks: stars / 2,
        watchers: stars,
        disk_usage: Some(2_048),
        updated_at: Some(1_700_100_000),
        pushed_at: Some(1_700_100_000),
        is_archived: false,
        primary_language: lang.map(str::to_string),
        topics: topics.iter().map(|s| s.to_string()).collect(),
    }
}

#[test]
fn full_ingest_then_leaderboard_round_trip() {
    let path = tempfile::NamedTempFile::new().unwrap().into_temp_path();
    let store = Store::open(&path).expect("open file-backed store");

    {
        let mut engine = IngestionEngine::new(&store);
        engine
            .ingest(&[
                snapshot(1, "acme/widget", 500, Some("Rust"), &["cli", "tooling"]),
                snapshot(2, "acme/gadget", 900, Some("Go"), &["cli"]),
                snapshot(3, "acme/gizmo", 100, Some("Rust"), &["library"]),
            ])
            .unwrap();
        engine.finish_run();
    }

    // Second pass: gizmo's stars grow, widget stays flat.
    {
        let mut engine = IngestionEngine::new(&store);
        engine
            .ingest(&[
                snapshot(1, "acme/widget", 500, Some("Rust"), &["cli", "tooling"]),
                snapshot(2, "acme/gadget", 900, Some("Go"), &["cli"]),
                snapshot(3, "acme/gizmo", 400, Some("Rust"), &["library"]),
            ])
            .unwrap();
        engine.finish_run();
    }

    let qe = QueryEngine::new(&store);

    let top = qe.leaderboard("stars", 1, &Filters::default()).unwrap();
    assert_eq!(top.len(), 3);
    assert_eq!(top[0].n, "acme/gadget");
    assert_eq!(top[0].s, 900);

    let rust_only = qe
        .leaderboard(
            "stars",
            1,
            &Filters {
                q: None,
                in_description: false,
                language: Some("Rust".to_string()),
                topic: None,
            },
        )
        .unwrap();
    assert_eq!(rust_only.len(), 2);
    assert!(rust_only.iter().all(|v| v.n.starts_with("acme/widget") || v.n.starts_with("acme/gizmo")));

    let view = qe.get_repo_latest("acme/gadget").unwrap().expect("present");
    assert_eq!(view.g, Some(1));
    assert_eq!(view.t, vec!["cli".to_string()]);

    let history = qe.history_segments("acme/gizmo", 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].s, 100);
    assert_eq!(history[1].s, 400);

    let total = qe.count_leaderboard(&Filters::default()).unwrap();
    assert_eq!(total, 3);
    assert_eq!(QueryEngine::total_pages(total), 1);
}
