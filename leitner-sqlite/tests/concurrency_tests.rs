//! Concurrent reconciliations against a file-backed database. Each call gets
//! its own `TagSync`, so the in-process card locks never meet and only the
//! database write lock orders them.

use leitner_core::{CardInput, CardService, Repository, SyncOptions, TagSync};
use leitner_sqlite::SqliteRepo;
use std::sync::Arc;
use tempfile::TempDir;

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

async fn file_repo() -> (TempDir, Arc<SqliteRepo>) {
    let dir = tempfile::tempdir().unwrap();
    let repo = SqliteRepo::open_file(dir.path().join("leitner.sqlite3"))
        .await
        .unwrap();
    (dir, Arc::new(repo))
}

fn sync(repo: &Arc<SqliteRepo>) -> TagSync {
    TagSync::new(repo.clone(), SyncOptions::default())
}

async fn card_ids(repo: &Arc<SqliteRepo>, count: usize) -> (uuid::Uuid, Vec<i64>) {
    let deck = repo.create_deck("Lang").await.unwrap();
    repo.create_box("Daily", 1).await.unwrap();
    let svc = CardService::new(repo.clone(), Arc::new(sync(repo)));
    let mut ids = Vec::new();
    for i in 0..count {
        let c = svc
            .create(CardInput {
                deck_id: deck.id,
                question: Some(format!("q{i}")),
                answer: "a".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        ids.push(c.card.id);
    }
    (deck.id, ids)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_cards_racing_for_a_new_tag_share_one_row() {
    let (_dir, repo) = file_repo().await;
    let (deck_id, ids) = card_ids(&repo, 2).await;
    let (a, b) = (sync(&repo), sync(&repo));

    let wanted = names(&["shared", "verbs"]);
    let (ra, rb) = tokio::join!(
        a.reconcile(deck_id, ids[0], &wanted),
        b.reconcile(deck_id, ids[1], &wanted),
    );
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra.created.len() + rb.created.len(), 2);
    assert_eq!(repo.list_tags(deck_id).await.unwrap().len(), 2);
    for id in ids {
        let tags: Vec<String> = repo
            .card_tags(id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(tags, wanted);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_calls_on_one_card_leave_one_complete_set() {
    let (_dir, repo) = file_repo().await;
    let (deck_id, ids) = card_ids(&repo, 1).await;
    let (a, b) = (sync(&repo), sync(&repo));

    let first = names(&["alpha", "beta"]);
    let second = names(&["gamma"]);
    let (ra, rb) = tokio::join!(
        a.reconcile(deck_id, ids[0], &first),
        b.reconcile(deck_id, ids[0], &second),
    );
    ra.unwrap();
    rb.unwrap();

    let tags: Vec<String> = repo
        .card_tags(ids[0])
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(tags == first || tags == second, "mixed tag set: {tags:?}");
    assert_eq!(repo.list_tags(deck_id).await.unwrap().len(), 3);
}
