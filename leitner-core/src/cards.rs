use crate::{
    repo::{first_box, Repository},
    tagsync::{SyncReport, TagSync},
    BoxId, Card, CardError, CardId, CoreError, DeckId, Difficulty, NewCard, QuestionType,
    Statistic,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// A validated card submission.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CardInput {
    pub deck_id: DeckId,
    /// Defaults to the shortest-interval box.
    pub box_id: Option<BoxId>,
    pub question_type: QuestionType,
    pub question: Option<String>,
    pub answer: String,
    pub notes: Option<String>,
    pub media: Option<String>,
    pub tags: Vec<String>,
}

impl CardInput {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.deck_id.is_nil() {
            return Err(CoreError::Invalid("deck id"));
        }
        check_content(self.question_type, &self.question, &self.answer, &self.media)
    }
}

/// Field changes for an existing card. `None` leaves a field as is;
/// `tags: Some(vec![])` removes every tag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CardPatch {
    pub box_id: Option<BoxId>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub notes: Option<String>,
    pub media: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl CardPatch {
    fn touches_card(&self) -> bool {
        self.box_id.is_some()
            || self.question.is_some()
            || self.answer.is_some()
            || self.notes.is_some()
            || self.media.is_some()
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct CardWithTags {
    #[serde(flatten)]
    pub card: Card,
    pub tags: Vec<String>,
}

/// Card create/edit flows: persist the card, then reconcile its tags.
pub struct CardService {
    repo: Arc<dyn Repository>,
    tags: Arc<TagSync>,
}

impl CardService {
    pub fn new(repo: Arc<dyn Repository>, tags: Arc<TagSync>) -> Self {
        Self { repo, tags }
    }

    pub async fn create(&self, input: CardInput) -> Result<CardWithTags, CardError> {
        input.validate()?;
        let box_id = match input.box_id {
            Some(id) => id,
            None => {
                let boxes = self.repo.list_boxes().await?;
                first_box(&boxes).ok_or(CoreError::NotFound("box"))?
            }
        };
        let card = self
            .repo
            .add_card(&NewCard {
                deck_id: input.deck_id,
                box_id,
                question_type: input.question_type,
                question: input.question,
                answer: input.answer,
                notes: input.notes,
                media: input.media,
            })
            .await?;
        info!(card_id = card.id, deck_id = %card.deck_id, "card created");

        if let Err(e) = self.tags.reconcile(card.deck_id, card.id, &input.tags).await {
            // A card whose first tag sync failed is not kept.
            if let Err(undo) = self.repo.delete_card(card.id).await {
                warn!(card_id = card.id, error = %undo, "could not remove card after failed tag sync");
            }
            return Err(e.into());
        }
        self.with_tags(card).await
    }

    /// Applies the field changes, then reconciles tags when given. If the tag
    /// sync fails the card's previous fields are written back.
    pub async fn edit(&self, card_id: CardId, patch: CardPatch) -> Result<CardWithTags, CardError> {
        let original = self.repo.get_card(card_id).await?;
        let mut card = original.clone();
        let touched = patch.touches_card();
        if touched {
            if let Some(b) = patch.box_id {
                card.box_id = b;
            }
            if let Some(q) = patch.question {
                card.question = Some(q);
            }
            if let Some(a) = patch.answer {
                card.answer = a;
            }
            if let Some(n) = patch.notes {
                card.notes = Some(n);
            }
            if let Some(m) = patch.media {
                card.media = Some(m);
            }
            check_content(card.question_type, &card.question, &card.answer, &card.media)?;
            card = self.repo.update_card(&card).await?;
        }
        if let Some(tags) = patch.tags {
            if let Err(e) = self.tags.reconcile(card.deck_id, card.id, &tags).await {
                if touched {
                    if let Err(undo) = self.repo.update_card(&original).await {
                        warn!(card_id, error = %undo, "could not restore card after failed tag sync");
                    }
                }
                return Err(e.into());
            }
        }
        self.with_tags(card).await
    }

    /// Replaces the card's tags, resolving names in the card's own deck.
    pub async fn set_tags(&self, card_id: CardId, tags: &[String]) -> Result<SyncReport, CardError> {
        let card = self.repo.get_card(card_id).await?;
        Ok(self.tags.reconcile(card.deck_id, card.id, tags).await?)
    }

    pub async fn answer(
        &self,
        card_id: CardId,
        difficulty: Difficulty,
    ) -> Result<Statistic, CardError> {
        Ok(self.repo.record_answer(card_id, difficulty).await?)
    }

    pub async fn get(&self, card_id: CardId) -> Result<CardWithTags, CardError> {
        let card = self.repo.get_card(card_id).await?;
        self.with_tags(card).await
    }

    async fn with_tags(&self, card: Card) -> Result<CardWithTags, CardError> {
        let tags = self
            .repo
            .card_tags(card.id)
            .await?
            .into_iter()
            .map(|t| t.name)
            .collect();
        Ok(CardWithTags { card, tags })
    }
}

/// Trims submitted tag names and drops the blank ones. Order is kept and
/// duplicates are left for reconciliation to collapse.
pub fn clean_tags<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|t| t.as_ref().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn check_content(
    question_type: QuestionType,
    question: &Option<String>,
    answer: &str,
    media: &Option<String>,
) -> Result<(), CoreError> {
    if answer.trim().is_empty() {
        return Err(CoreError::Invalid("answer is required"));
    }
    match question_type {
        QuestionType::Classic if blank(question) => {
            Err(CoreError::Invalid("classic card needs a question"))
        }
        QuestionType::Media if blank(media) => {
            Err(CoreError::Invalid("media card needs a media reference"))
        }
        _ => Ok(()),
    }
}

fn blank(s: &Option<String>) -> bool {
    s.as_deref().map(str::trim).unwrap_or("").is_empty()
}
