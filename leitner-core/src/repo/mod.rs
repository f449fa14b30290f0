use crate::{
    BoxId, Card, CardId, CardTag, CoreError, Deck, DeckId, Difficulty, LeitnerBox, NewCard, NewTag,
    Statistic, Tag, TagRef,
};
use async_trait::async_trait;

pub mod memory;

#[async_trait]
pub trait Repository: Send + Sync {
    // Decks
    async fn create_deck(&self, name: &str) -> Result<Deck, CoreError>;
    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError>;
    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError>;

    // Boxes
    async fn create_box(&self, name: &str, interval_days: u32) -> Result<LeitnerBox, CoreError>;
    async fn list_boxes(&self) -> Result<Vec<LeitnerBox>, CoreError>;

    // Cards
    async fn add_card(&self, card: &NewCard) -> Result<Card, CoreError>;
    async fn get_card(&self, id: CardId) -> Result<Card, CoreError>;
    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError>;
    async fn update_card(&self, card: &Card) -> Result<Card, CoreError>;
    /// Removes the card with its pivots and statistics.
    async fn delete_card(&self, id: CardId) -> Result<(), CoreError>;

    // Statistics
    async fn record_answer(
        &self,
        card_id: CardId,
        difficulty: Difficulty,
    ) -> Result<Statistic, CoreError>;

    // Tags (read side)
    async fn list_tags(&self, deck_id: DeckId) -> Result<Vec<Tag>, CoreError>;
    async fn card_tags(&self, card_id: CardId) -> Result<Vec<Tag>, CoreError>;
}

/// Write side of tag reconciliation. Every reconciliation runs inside one
/// [`TagTx`]; nothing it writes is visible until [`TagTx::commit`].
#[async_trait]
pub trait TagStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn TagTx>, CoreError>;
}

/// A storage transaction over the tag and pivot tables.
///
/// Dropping a transaction without committing it rolls back every write made
/// through it.
#[async_trait]
pub trait TagTx: Send {
    /// Takes the card's write lock for the rest of the transaction.
    /// Fails with `NotFound("card")` if the card does not exist.
    async fn lock_card(&mut self, card_id: CardId) -> Result<(), CoreError>;

    async fn select_tags(&mut self, deck_id: DeckId, names: &[String])
        -> Result<Vec<TagRef>, CoreError>;

    /// Inserts the rows as one batch. Rows whose `(deck_id, name)` already
    /// exists are skipped and absent from the result.
    async fn insert_tags(&mut self, rows: &[NewTag]) -> Result<Vec<TagRef>, CoreError>;

    async fn delete_pivots_by_card(&mut self, card_id: CardId) -> Result<(), CoreError>;

    async fn insert_pivots(&mut self, rows: &[CardTag]) -> Result<(), CoreError>;

    async fn commit(&mut self) -> Result<(), CoreError>;
}

/// Box new cards start in: the one with the shortest interval.
pub fn first_box(boxes: &[LeitnerBox]) -> Option<BoxId> {
    boxes
        .iter()
        .min_by_key(|b| (b.interval_days, b.id))
        .map(|b| b.id)
}
