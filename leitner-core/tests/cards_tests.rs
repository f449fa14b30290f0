use leitner_core::memory::{Fault, MemoryRepo};
use leitner_core::{
    CardError, CardInput, CardPatch, CardService, CoreError, Deck, Difficulty, QuestionType,
    Repository, SyncError, SyncOptions, SyncPhase, TagSync,
};
use std::sync::Arc;

async fn setup() -> (Arc<MemoryRepo>, CardService, Deck) {
    let repo = Arc::new(MemoryRepo::new());
    let deck = repo.create_deck("Spanish").await.unwrap();
    let sync = Arc::new(TagSync::new(repo.clone(), SyncOptions::default()));
    let svc = CardService::new(repo.clone(), sync);
    (repo, svc, deck)
}

fn classic(deck: &Deck, tags: &[&str]) -> CardInput {
    CardInput {
        deck_id: deck.id,
        question: Some("hola".into()),
        answer: "hello".into(),
        tags: tags.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_puts_card_in_shortest_interval_box() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Weekly", 7).await.unwrap();
    let daily = repo.create_box("Daily", 1).await.unwrap();

    let out = svc.create(classic(&deck, &["greeting"])).await.unwrap();

    assert_eq!(out.card.box_id, daily.id);
    assert_eq!(out.tags, vec!["greeting".to_string()]);
}

#[tokio::test]
async fn create_without_any_box_is_not_found() {
    let (_repo, svc, deck) = setup().await;

    let err = svc.create(classic(&deck, &[])).await.unwrap_err();

    assert!(matches!(err, CardError::Store(CoreError::NotFound("box"))));
}

#[tokio::test]
async fn validation_rejects_incomplete_cards() {
    let (_repo, svc, deck) = setup().await;

    let mut no_answer = classic(&deck, &[]);
    no_answer.answer = "  ".into();
    assert!(matches!(
        svc.create(no_answer).await,
        Err(CardError::Store(CoreError::Invalid(_)))
    ));

    let mut media = classic(&deck, &[]);
    media.question_type = QuestionType::Media;
    assert!(media.validate().is_err());
    media.media = Some("cards/hola.png".into());
    assert!(media.validate().is_ok());

    let mut classic_no_question = classic(&deck, &[]);
    classic_no_question.question = None;
    assert!(classic_no_question.validate().is_err());
}

#[tokio::test]
async fn edit_replaces_tags_and_keeps_other_fields() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["a", "b"])).await.unwrap();

    let out = svc
        .edit(
            created.card.id,
            CardPatch {
                notes: Some("informal".into()),
                tags: Some(vec!["b".into(), "c".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.card.notes.as_deref(), Some("informal"));
    assert_eq!(out.card.answer, "hello");
    assert_eq!(out.tags, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(repo.list_tags(deck.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn edit_without_tags_leaves_them_alone() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["a"])).await.unwrap();

    let out = svc
        .edit(
            created.card.id,
            CardPatch {
                answer: Some("hi".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(out.card.answer, "hi");
    assert_eq!(out.tags, vec!["a".to_string()]);
}

#[tokio::test]
async fn failed_tag_sync_on_edit_surfaces_phase() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["a"])).await.unwrap();

    repo.inject(SyncPhase::CreateTags, Fault::Fail("unique violation".into()));
    let err = svc
        .edit(
            created.card.id,
            CardPatch {
                answer: Some("hi".into()),
                notes: Some("informal".into()),
                tags: Some(vec!["z".into()]),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();

    match err {
        CardError::Tags(e @ SyncError::Phase { .. }) => {
            assert_eq!(e.phase(), Some(SyncPhase::CreateTags))
        }
        other => panic!("unexpected error: {other}"),
    }
    let after = svc.get(created.card.id).await.unwrap();
    assert_eq!(after.tags, vec!["a".to_string()]);
    assert_eq!(after.card.answer, "hello");
    assert_eq!(after.card.notes, None);
}

#[tokio::test]
async fn failed_tag_sync_on_create_keeps_no_card() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();

    repo.inject(SyncPhase::CreateTags, Fault::Fail("disk full".into()));
    let err = svc.create(classic(&deck, &["greeting"])).await.unwrap_err();
    assert!(matches!(err, CardError::Tags(SyncError::Phase { .. })));
    assert!(repo.list_cards(Some(deck.id)).await.unwrap().is_empty());
    assert!(repo.pivots().await.is_empty());

    let retried = svc.create(classic(&deck, &["greeting"])).await.unwrap();
    let cards = repo.list_cards(Some(deck.id)).await.unwrap();
    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].id, retried.card.id);
    assert_eq!(retried.tags, vec!["greeting".to_string()]);
}

#[tokio::test]
async fn edit_validates_the_patched_card() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["a"])).await.unwrap();

    let blank_question = svc
        .edit(
            created.card.id,
            CardPatch {
                question: Some("  ".into()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        blank_question,
        Err(CardError::Store(CoreError::Invalid("classic card needs a question")))
    ));

    let mut media = classic(&deck, &[]);
    media.question_type = QuestionType::Media;
    media.media = Some("cards/hola.png".into());
    let media = svc.create(media).await.unwrap();
    let blank_media = svc
        .edit(
            media.card.id,
            CardPatch {
                media: Some(String::new()),
                ..Default::default()
            },
        )
        .await;
    assert!(matches!(
        blank_media,
        Err(CardError::Store(CoreError::Invalid("media card needs a media reference")))
    ));

    let stored = repo.get_card(created.card.id).await.unwrap();
    assert_eq!(stored.question.as_deref(), Some("hola"));
    let stored = repo.get_card(media.card.id).await.unwrap();
    assert_eq!(stored.media.as_deref(), Some("cards/hola.png"));
}

#[tokio::test]
async fn delete_card_drops_pivots() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["a", "b"])).await.unwrap();

    repo.delete_card(created.card.id).await.unwrap();

    assert!(repo.pivots().await.is_empty());
    assert_eq!(repo.tag_count().await, 2);
    assert!(matches!(
        repo.delete_card(created.card.id).await,
        Err(CoreError::NotFound("card"))
    ));
}

#[tokio::test]
async fn answering_records_a_statistic() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &[])).await.unwrap();

    let stat = svc.answer(created.card.id, Difficulty::Hard).await.unwrap();

    assert_eq!(stat.card_id, created.card.id);
    assert_eq!(stat.box_id, created.card.box_id);
    let card = repo.get_card(created.card.id).await.unwrap();
    assert!(card.last_answered_at.is_some());
    assert!(matches!(
        svc.answer(9_999, Difficulty::Easy).await,
        Err(CardError::Store(CoreError::NotFound("card")))
    ));
}

#[test]
fn parses_difficulty_and_question_type() {
    assert_eq!("E".parse::<Difficulty>().unwrap(), Difficulty::Easy);
    assert_eq!("medium".parse::<Difficulty>().unwrap(), Difficulty::Medium);
    assert!("meh".parse::<Difficulty>().is_err());
    assert_eq!("Media".parse::<QuestionType>().unwrap(), QuestionType::Media);
}

#[tokio::test]
async fn card_with_tags_serializes_flat() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["x"])).await.unwrap();

    let v = serde_json::to_value(&created).unwrap();

    assert_eq!(v["answer"], "hello");
    assert_eq!(v["question_type"], "classic");
    assert_eq!(v["tags"], serde_json::json!(["x"]));
}

#[test]
fn clean_tags_trims_and_drops_blanks() {
    let cleaned = leitner_core::clean_tags(["  math ", "", "   ", "algebra", "math"]);
    assert_eq!(cleaned, vec!["math", "algebra", "math"]);
}

#[tokio::test]
async fn set_tags_resolves_in_the_cards_deck() {
    let (repo, svc, deck) = setup().await;
    repo.create_box("Daily", 1).await.unwrap();
    let created = svc.create(classic(&deck, &["a"])).await.unwrap();

    let report = svc
        .set_tags(created.card.id, &["a".to_string(), "b".to_string()])
        .await
        .unwrap();

    assert_eq!(report.linked, 2);
    assert_eq!(report.created.len(), 1);
    assert_eq!(repo.list_tags(deck.id).await.unwrap().len(), 2);
    assert!(matches!(
        svc.set_tags(9_999, &[]).await,
        Err(CardError::Store(CoreError::NotFound("card")))
    ));
}
