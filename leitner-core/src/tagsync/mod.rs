//! Tag reconciliation: make a card's tag associations match a submitted list
//! of names, creating any tags the deck does not have yet.

use crate::{
    repo::TagStore, CardId, CardTag, CoreError, DeckId, NewTag, SyncError, SyncPhase, TagId,
    TagRef,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub mod locks;

pub use locks::{CardGuard, CardLocks};

pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct SyncOptions {
    /// Upper bound for each storage round-trip.
    pub op_timeout: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            op_timeout: DEFAULT_OP_TIMEOUT,
        }
    }
}

/// Outcome of a successful reconciliation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Tags this call inserted.
    pub created: Vec<TagRef>,
    /// Pivot rows the card now has.
    pub linked: usize,
}

pub struct TagSync {
    store: Arc<dyn TagStore>,
    locks: CardLocks,
    opts: SyncOptions,
}

impl TagSync {
    pub fn new(store: Arc<dyn TagStore>, opts: SyncOptions) -> Self {
        Self {
            store,
            locks: CardLocks::new(),
            opts,
        }
    }

    pub fn locks(&self) -> &CardLocks {
        &self.locks
    }

    /// Makes the card's tags exactly the distinct names in `tag_names`,
    /// scoped to `deck_id`.
    ///
    /// All writes happen in one store transaction: on any error the card
    /// keeps the tags it had before the call. Calls for the same card are
    /// serialized.
    pub async fn reconcile(
        &self,
        deck_id: DeckId,
        card_id: CardId,
        tag_names: &[String],
    ) -> Result<SyncReport, SyncError> {
        if deck_id == Uuid::nil() {
            return Err(SyncError::Invalid("deck id"));
        }
        if card_id <= 0 {
            return Err(SyncError::Invalid("card id"));
        }
        if tag_names.iter().any(|n| n.is_empty()) {
            return Err(SyncError::Invalid("tag name"));
        }
        let wanted = dedup(tag_names);

        let span = info_span!("reconcile", %deck_id, card_id, tags = wanted.len());
        async move {
            let _guard = self.locks.acquire(card_id).await;
            let res = self.run(deck_id, card_id, &wanted).await;
            if let Err(e) = &res {
                warn!(error = %e, "tag sync rolled back");
            }
            res
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        deck_id: DeckId,
        card_id: CardId,
        wanted: &[String],
    ) -> Result<SyncReport, SyncError> {
        let mut tx = self.step(SyncPhase::Begin, self.store.begin()).await?;
        self.step(SyncPhase::LockCard, tx.lock_card(card_id)).await?;

        let found = if wanted.is_empty() {
            Vec::new()
        } else {
            self.step(SyncPhase::LookupTags, tx.select_tags(deck_id, wanted))
                .await?
        };
        let mut ids: HashMap<String, TagId> = found.into_iter().map(|t| (t.name, t.id)).collect();

        let missing: Vec<NewTag> = wanted
            .iter()
            .filter(|n| !ids.contains_key(n.as_str()))
            .map(|n| NewTag {
                deck_id,
                name: n.clone(),
            })
            .collect();

        let mut created = Vec::new();
        if !missing.is_empty() {
            created = self
                .step(SyncPhase::CreateTags, tx.insert_tags(&missing))
                .await?;
            ids.extend(created.iter().map(|t| (t.name.clone(), t.id)));

            // Names another writer created between our lookup and insert.
            let raced: Vec<String> = missing
                .into_iter()
                .map(|t| t.name)
                .filter(|n| !ids.contains_key(n))
                .collect();
            if !raced.is_empty() {
                debug!(count = raced.len(), "adopting tags created concurrently");
                let adopted = self
                    .step(SyncPhase::LookupTags, tx.select_tags(deck_id, &raced))
                    .await?;
                ids.extend(adopted.into_iter().map(|t| (t.name, t.id)));
            }
        }

        self.step(SyncPhase::ClearPivots, tx.delete_pivots_by_card(card_id))
            .await?;

        let pivots = wanted
            .iter()
            .map(|name| match ids.get(name) {
                Some(&tag_id) => Ok(CardTag { card_id, tag_id }),
                None => Err(SyncError::Unresolved {
                    deck_id,
                    name: name.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if !pivots.is_empty() {
            self.step(SyncPhase::InsertPivots, tx.insert_pivots(&pivots))
                .await?;
        }

        self.step(SyncPhase::Commit, tx.commit()).await?;
        debug!(created = created.len(), linked = pivots.len(), "tags synced");
        Ok(SyncReport {
            created,
            linked: pivots.len(),
        })
    }

    async fn step<T>(
        &self,
        phase: SyncPhase,
        fut: impl Future<Output = Result<T, CoreError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.opts.op_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(source)) => Err(SyncError::Phase { phase, source }),
            Err(_) => Err(SyncError::Timeout {
                phase,
                after: self.opts.op_timeout,
            }),
        }
    }
}

/// Distinct names in first-seen order.
fn dedup(names: &[String]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(names.len());
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        if seen.insert(name.as_str()) {
            out.push(name.clone());
        }
    }
    out
}
