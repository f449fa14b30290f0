use crate::CardId;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Keyed async mutexes, one per card with a reconciliation in flight.
///
/// Entries are created on first use and removed when the last holder or
/// waiter lets go, so the map only ever holds busy cards. A waiter whose
/// future is dropped before it gets the lock counts as letting go.
#[derive(Default)]
pub struct CardLocks {
    slots: Mutex<HashMap<CardId, Slot>>,
}

struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Holder plus queued waiters.
    users: usize,
}

impl CardLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, card_id: CardId) -> CardGuard<'_> {
        let lock = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(card_id).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            slot.lock.clone()
        };
        // Registered before waiting: dropping this future unregisters it.
        let mut guard = CardGuard {
            locks: self,
            card_id,
            held: None,
        };
        guard.held = Some(lock.lock_owned().await);
        guard
    }

    /// Number of cards currently locked or waited on.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, card_id: CardId) {
        let mut slots = self.slots.lock();
        if let Entry::Occupied(mut e) = slots.entry(card_id) {
            e.get_mut().users -= 1;
            if e.get().users == 0 {
                e.remove();
            }
        }
    }
}

pub struct CardGuard<'a> {
    locks: &'a CardLocks,
    card_id: CardId,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for CardGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        self.locks.release(self.card_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_leaves_no_entry() {
        let locks = CardLocks::new();
        let held = locks.acquire(1).await;

        let mut waiting = Box::pin(locks.acquire(1));
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut waiting)
            .await
            .is_err());
        assert_eq!(locks.len(), 1);

        drop(held);
        drop(waiting);

        assert!(locks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn queued_waiter_gets_the_lock_after_holder() {
        let locks = CardLocks::new();
        let held = locks.acquire(7).await;

        let mut waiting = Box::pin(locks.acquire(7));
        assert!(tokio::time::timeout(Duration::from_millis(10), &mut waiting)
            .await
            .is_err());

        drop(held);
        let next = waiting.await;
        assert_eq!(locks.len(), 1);

        drop(next);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn distinct_cards_do_not_block_each_other() {
        let locks = CardLocks::new();
        let a = locks.acquire(1).await;
        let b = locks.acquire(2).await;

        assert_eq!(locks.len(), 2);
        drop(a);
        drop(b);
        assert!(locks.is_empty());
    }
}
