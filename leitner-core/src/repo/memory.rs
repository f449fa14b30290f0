use crate::{
    repo::{Repository, TagStore, TagTx},
    BoxId, Card, CardId, CardTag, CoreError, Deck, DeckId, Difficulty, LeitnerBox, NewCard,
    NewTag, Statistic, SyncPhase, Tag, TagId, TagRef,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One-shot fault armed on a reconciliation phase.
#[derive(Clone, Debug)]
pub enum Fault {
    /// The store call fails with this message.
    Fail(String),
    /// The store call sleeps this long before doing its work.
    Stall(Duration),
    /// Right after the lookup, another writer commits a tag with this name
    /// into the looked-up deck. Only meaningful on `LookupTags`.
    ConcurrentTag(String),
}

#[derive(Clone, Default)]
struct State {
    decks: HashMap<DeckId, Deck>,
    boxes: BTreeMap<BoxId, LeitnerBox>,
    cards: BTreeMap<CardId, Card>,
    tags: BTreeMap<TagId, Tag>,
    pivots: BTreeSet<(CardId, TagId)>,
    statistics: Vec<Statistic>,
    last_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn find_tag(&self, deck_id: DeckId, name: &str) -> Option<&Tag> {
        self.tags
            .values()
            .find(|t| t.deck_id == deck_id && t.name == name)
    }

    fn push_tag(&mut self, deck_id: DeckId, name: &str) -> TagRef {
        let tag = Tag {
            id: self.next_id(),
            deck_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let out = TagRef {
            id: tag.id,
            name: tag.name.clone(),
        };
        self.tags.insert(tag.id, tag);
        out
    }
}

type Faults = Arc<Mutex<HashMap<SyncPhase, Fault>>>;

/// Process-local store implementing both [`Repository`] and [`TagStore`].
///
/// Transactions are serialized: one holds the whole state until it commits
/// or is dropped.
#[derive(Default)]
pub struct MemoryRepo {
    state: Arc<AsyncMutex<State>>,
    faults: Faults,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms `fault` for the next store call made in `phase`.
    pub fn inject(&self, phase: SyncPhase, fault: Fault) {
        self.faults.lock().insert(phase, fault);
    }

    /// Every pivot row, for assertions.
    pub async fn pivots(&self) -> Vec<CardTag> {
        self.state
            .lock()
            .await
            .pivots
            .iter()
            .map(|&(card_id, tag_id)| CardTag { card_id, tag_id })
            .collect()
    }

    pub async fn tag_count(&self) -> usize {
        self.state.lock().await.tags.len()
    }
}

async fn trip(faults: &Faults, phase: SyncPhase) -> Result<Option<Fault>, CoreError> {
    let armed = faults.lock().remove(&phase);
    match armed {
        Some(Fault::Fail(message)) => Err(CoreError::Storage {
            op: phase.as_str(),
            message,
        }),
        Some(Fault::Stall(d)) => {
            tokio::time::sleep(d).await;
            Ok(None)
        }
        other => Ok(other),
    }
}

#[async_trait]
impl Repository for MemoryRepo {
    async fn create_deck(&self, name: &str) -> Result<Deck, CoreError> {
        let mut s = self.state.lock().await;
        if s.decks.values().any(|d| d.name.eq_ignore_ascii_case(name)) {
            return Err(CoreError::Conflict("deck name already exists"));
        }
        let deck = Deck::new(name);
        s.decks.insert(deck.id, deck.clone());
        Ok(deck)
    }

    async fn get_deck(&self, id: DeckId) -> Result<Deck, CoreError> {
        self.state
            .lock()
            .await
            .decks
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("deck"))
    }

    async fn list_decks(&self) -> Result<Vec<Deck>, CoreError> {
        let mut v: Vec<Deck> = self.state.lock().await.decks.values().cloned().collect();
        v.sort_by_key(|d| d.created_at);
        Ok(v)
    }

    async fn create_box(&self, name: &str, interval_days: u32) -> Result<LeitnerBox, CoreError> {
        let mut s = self.state.lock().await;
        let b = LeitnerBox {
            id: s.next_id(),
            name: name.to_string(),
            interval_days,
            created_at: Utc::now(),
        };
        s.boxes.insert(b.id, b.clone());
        Ok(b)
    }

    async fn list_boxes(&self) -> Result<Vec<LeitnerBox>, CoreError> {
        let mut v: Vec<LeitnerBox> = self.state.lock().await.boxes.values().cloned().collect();
        v.sort_by_key(|b| (b.interval_days, b.id));
        Ok(v)
    }

    async fn add_card(&self, card: &NewCard) -> Result<Card, CoreError> {
        let mut s = self.state.lock().await;
        if !s.decks.contains_key(&card.deck_id) {
            return Err(CoreError::NotFound("deck"));
        }
        if !s.boxes.contains_key(&card.box_id) {
            return Err(CoreError::NotFound("box"));
        }
        let stored = Card {
            id: s.next_id(),
            deck_id: card.deck_id,
            box_id: card.box_id,
            question_type: card.question_type,
            question: card.question.clone(),
            answer: card.answer.clone(),
            notes: card.notes.clone(),
            media: card.media.clone(),
            last_answered_at: None,
            created_at: Utc::now(),
        };
        s.cards.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_card(&self, id: CardId) -> Result<Card, CoreError> {
        self.state
            .lock()
            .await
            .cards
            .get(&id)
            .cloned()
            .ok_or(CoreError::NotFound("card"))
    }

    async fn list_cards(&self, deck_id: Option<DeckId>) -> Result<Vec<Card>, CoreError> {
        let s = self.state.lock().await;
        let mut v: Vec<Card> = s.cards.values().cloned().collect();
        if let Some(did) = deck_id {
            v.retain(|c| c.deck_id == did);
        }
        Ok(v)
    }

    async fn update_card(&self, card: &Card) -> Result<Card, CoreError> {
        let mut s = self.state.lock().await;
        if !s.boxes.contains_key(&card.box_id) {
            return Err(CoreError::NotFound("box"));
        }
        let Some(slot) = s.cards.get_mut(&card.id) else {
            return Err(CoreError::NotFound("card"));
        };
        *slot = card.clone();
        Ok(card.clone())
    }

    async fn delete_card(&self, id: CardId) -> Result<(), CoreError> {
        let mut s = self.state.lock().await;
        if s.cards.remove(&id).is_none() {
            return Err(CoreError::NotFound("card"));
        }
        s.pivots.retain(|&(card_id, _)| card_id != id);
        s.statistics.retain(|st| st.card_id != id);
        Ok(())
    }

    async fn record_answer(
        &self,
        card_id: CardId,
        difficulty: Difficulty,
    ) -> Result<Statistic, CoreError> {
        let mut s = self.state.lock().await;
        let now = Utc::now();
        let box_id = {
            let Some(card) = s.cards.get_mut(&card_id) else {
                return Err(CoreError::NotFound("card"));
            };
            card.last_answered_at = Some(now);
            card.box_id
        };
        let stat = Statistic {
            id: s.next_id(),
            card_id,
            box_id,
            difficulty,
            created_at: now,
        };
        s.statistics.push(stat.clone());
        Ok(stat)
    }

    async fn list_tags(&self, deck_id: DeckId) -> Result<Vec<Tag>, CoreError> {
        let s = self.state.lock().await;
        let mut v: Vec<Tag> = s
            .tags
            .values()
            .filter(|t| t.deck_id == deck_id)
            .cloned()
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(v)
    }

    async fn card_tags(&self, card_id: CardId) -> Result<Vec<Tag>, CoreError> {
        let s = self.state.lock().await;
        let mut v: Vec<Tag> = s
            .pivots
            .iter()
            .filter(|(cid, _)| *cid == card_id)
            .filter_map(|(_, tid)| s.tags.get(tid).cloned())
            .collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(v)
    }
}

#[async_trait]
impl TagStore for MemoryRepo {
    async fn begin(&self) -> Result<Box<dyn TagTx>, CoreError> {
        trip(&self.faults, SyncPhase::Begin).await?;
        let state = self.state.clone().lock_owned().await;
        let backup = Some(state.clone());
        Ok(Box::new(MemoryTx {
            state,
            backup,
            faults: self.faults.clone(),
        }))
    }
}

struct MemoryTx {
    state: OwnedMutexGuard<State>,
    // Pre-transaction image, restored on drop unless committed.
    backup: Option<State>,
    faults: Faults,
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if let Some(prev) = self.backup.take() {
            *self.state = prev;
        }
    }
}

#[async_trait]
impl TagTx for MemoryTx {
    async fn lock_card(&mut self, card_id: CardId) -> Result<(), CoreError> {
        trip(&self.faults, SyncPhase::LockCard).await?;
        if !self.state.cards.contains_key(&card_id) {
            return Err(CoreError::NotFound("card"));
        }
        Ok(())
    }

    async fn select_tags(
        &mut self,
        deck_id: DeckId,
        names: &[String],
    ) -> Result<Vec<TagRef>, CoreError> {
        let fault = trip(&self.faults, SyncPhase::LookupTags).await?;
        let found = self
            .state
            .tags
            .values()
            .filter(|t| t.deck_id == deck_id && names.contains(&t.name))
            .map(|t| TagRef {
                id: t.id,
                name: t.name.clone(),
            })
            .collect();

        if let Some(Fault::ConcurrentTag(name)) = fault {
            // The other writer committed, so its row outlives our rollback.
            let created = self.state.push_tag(deck_id, &name);
            let row = self.state.tags.get(&created.id).cloned();
            if let (Some(prev), Some(row)) = (self.backup.as_mut(), row) {
                prev.tags.insert(row.id, row);
                prev.last_id = prev.last_id.max(created.id);
            }
        }
        Ok(found)
    }

    async fn insert_tags(&mut self, rows: &[NewTag]) -> Result<Vec<TagRef>, CoreError> {
        trip(&self.faults, SyncPhase::CreateTags).await?;
        let mut created = Vec::with_capacity(rows.len());
        for row in rows {
            if self.state.find_tag(row.deck_id, &row.name).is_some() {
                continue;
            }
            created.push(self.state.push_tag(row.deck_id, &row.name));
        }
        Ok(created)
    }

    async fn delete_pivots_by_card(&mut self, card_id: CardId) -> Result<(), CoreError> {
        trip(&self.faults, SyncPhase::ClearPivots).await?;
        self.state.pivots.retain(|(cid, _)| *cid != card_id);
        Ok(())
    }

    async fn insert_pivots(&mut self, rows: &[CardTag]) -> Result<(), CoreError> {
        trip(&self.faults, SyncPhase::InsertPivots).await?;
        for row in rows {
            if !self.state.cards.contains_key(&row.card_id) {
                return Err(CoreError::storage("insert pivots", "card does not exist"));
            }
            if !self.state.tags.contains_key(&row.tag_id) {
                return Err(CoreError::storage("insert pivots", "tag does not exist"));
            }
            if self.state.pivots.contains(&(row.card_id, row.tag_id)) {
                return Err(CoreError::Conflict("card already has tag"));
            }
        }
        self.state
            .pivots
            .extend(rows.iter().map(|r| (r.card_id, r.tag_id)));
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CoreError> {
        trip(&self.faults, SyncPhase::Commit).await?;
        self.backup = None;
        Ok(())
    }
}
