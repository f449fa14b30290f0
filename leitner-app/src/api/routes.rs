use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use leitner_core::{CardId, CardInput, CardWithTags, Deck, DeckId, Statistic, SyncReport};
use std::sync::Arc;

use crate::api::dto::{AnswerIn, ApiError, CardForm, PatchIn, TagOut, TagsIn};
use crate::cli::commands::App;

pub type AppState = Arc<App>;

pub async fn list_decks(State(st): State<AppState>) -> Result<Json<Vec<Deck>>, ApiError> {
    let mut decks = st.repo.list_decks().await?;
    decks.sort_by_key(|d| d.created_at);
    Ok(Json(decks))
}

pub async fn deck_tags(
    State(st): State<AppState>,
    Path(deck_id): Path<DeckId>,
) -> Result<Json<Vec<TagOut>>, ApiError> {
    st.repo.get_deck(deck_id).await?;
    let tags = st.repo.list_tags(deck_id).await?;
    Ok(Json(
        tags.into_iter()
            .map(|t| TagOut { id: t.id, name: t.name })
            .collect(),
    ))
}

pub async fn create_card(
    State(st): State<AppState>,
    Json(form): Json<CardForm>,
) -> Result<(StatusCode, Json<CardWithTags>), ApiError> {
    let input = CardInput::try_from(form)?;
    let card = st.cards.create(input).await?;
    Ok((StatusCode::CREATED, Json(card)))
}

pub async fn edit_card(
    State(st): State<AppState>,
    Path(card_id): Path<CardId>,
    Json(patch): Json<PatchIn>,
) -> Result<Json<CardWithTags>, ApiError> {
    Ok(Json(st.cards.edit(card_id, patch.into()).await?))
}

pub async fn card_tags(
    State(st): State<AppState>,
    Path(card_id): Path<CardId>,
) -> Result<Json<Vec<TagOut>>, ApiError> {
    st.repo.get_card(card_id).await?;
    let tags = st.repo.card_tags(card_id).await?;
    Ok(Json(
        tags.into_iter()
            .map(|t| TagOut { id: t.id, name: t.name })
            .collect(),
    ))
}

pub async fn put_card_tags(
    State(st): State<AppState>,
    Path(card_id): Path<CardId>,
    Json(body): Json<TagsIn>,
) -> Result<Json<SyncReport>, ApiError> {
    let tags = leitner_core::clean_tags(&body.tags);
    Ok(Json(st.cards.set_tags(card_id, &tags).await?))
}

pub async fn answer_card(
    State(st): State<AppState>,
    Path(card_id): Path<CardId>,
    Json(body): Json<AnswerIn>,
) -> Result<(StatusCode, Json<Statistic>), ApiError> {
    let stat = st.cards.answer(card_id, body.difficulty()?).await?;
    Ok((StatusCode::CREATED, Json(stat)))
}
