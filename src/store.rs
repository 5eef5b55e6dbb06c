//! In-memory item store.
//!
//! Two maps guarded by their own `RwLock`: item records and payload bytes.
//! Writers that touch both always take the record lock first, then the
//! payload lock, so an insert or delete is atomic across the pair.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::state_machine::{Item, ItemId, ItemState};

/// Result of a conditional state update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateUpdate {
    /// The item was in the expected state and now holds the new one.
    Applied(Item),
    /// Someone else moved the item first; carries the current record.
    Stale(Item),
    /// No item with that id.
    Missing,
}

/// Number of items per state at one moment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub uploaded: usize,
    pub processing: usize,
    pub done: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn get(&self, state: ItemState) -> usize {
        match state {
            ItemState::Uploaded => self.uploaded,
            ItemState::Processing => self.processing,
            ItemState::Done => self.done,
            ItemState::Failed => self.failed,
        }
    }

    fn bump(&mut self, state: ItemState) {
        match state {
            ItemState::Uploaded => self.uploaded += 1,
            ItemState::Processing => self.processing += 1,
            ItemState::Done => self.done += 1,
            ItemState::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.uploaded + self.processing + self.done + self.failed
    }

    /// Every tracked item has reached a terminal state.
    pub fn is_settled(&self) -> bool {
        self.uploaded == 0 && self.processing == 0
    }
}

/// Thread-safe holder of all item records and their payloads.
#[derive(Debug, Default)]
pub struct Store {
    records: RwLock<HashMap<ItemId, Item>>,
    payloads: RwLock<HashMap<ItemId, Arc<[u8]>>>,
}

// The maps hold plain data, so a panic in another holder cannot leave them
// half-written in a way that matters; recover the guard instead of failing.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record by id.
    pub fn put(&self, item: Item) {
        write(&self.records).insert(item.id, item);
    }

    /// Insert a record together with its payload.
    pub fn insert(&self, item: Item, payload: impl Into<Arc<[u8]>>) {
        let mut records = write(&self.records);
        let mut payloads = write(&self.payloads);
        payloads.insert(item.id, payload.into());
        records.insert(item.id, item);
    }

    pub fn get(&self, id: &ItemId) -> Option<Item> {
        read(&self.records).get(id).cloned()
    }

    pub fn exists(&self, id: &ItemId) -> bool {
        read(&self.records).contains_key(id)
    }

    /// Snapshot of every record. Order is unspecified.
    pub fn list_all(&self) -> Vec<Item> {
        read(&self.records).values().cloned().collect()
    }

    /// Snapshot of the records currently in `state`.
    pub fn list_by_state(&self, state: ItemState) -> Vec<Item> {
        read(&self.records)
            .values()
            .filter(|item| item.state == state)
            .cloned()
            .collect()
    }

    pub fn count(&self) -> usize {
        read(&self.records).len()
    }

    pub fn counts(&self) -> StateCounts {
        let records = read(&self.records);
        let mut counts = StateCounts::default();
        for item in records.values() {
            counts.bump(item.state);
        }
        counts
    }

    /// Set the state unconditionally. Returns the previous state and the
    /// updated record.
    pub fn update_state(&self, id: &ItemId, state: ItemState) -> Option<(ItemState, Item)> {
        let mut records = write(&self.records);
        let item = records.get_mut(id)?;
        let previous = item.state;
        item.set_state(state);
        Some((previous, item.clone()))
    }

    /// Set the state only if the item is still in `expected`.
    pub fn update_state_if(
        &self,
        id: &ItemId,
        expected: ItemState,
        state: ItemState,
    ) -> StateUpdate {
        let mut records = write(&self.records);
        match records.get_mut(id) {
            None => StateUpdate::Missing,
            Some(item) if item.state != expected => StateUpdate::Stale(item.clone()),
            Some(item) => {
                item.set_state(state);
                StateUpdate::Applied(item.clone())
            }
        }
    }

    /// Remove a record and its payload. Returns the removed record.
    pub fn delete(&self, id: &ItemId) -> Option<Item> {
        let mut records = write(&self.records);
        let mut payloads = write(&self.payloads);
        let removed = records.remove(id);
        payloads.remove(id);
        removed
    }

    pub fn put_payload(&self, id: ItemId, bytes: impl Into<Arc<[u8]>>) {
        write(&self.payloads).insert(id, bytes.into());
    }

    pub fn get_payload(&self, id: &ItemId) -> Option<Arc<[u8]>> {
        read(&self.payloads).get(id).cloned()
    }

    /// Drop everything.
    pub fn clear(&self) {
        let mut records = write(&self.records);
        let mut payloads = write(&self.payloads);
        records.clear();
        payloads.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn item(label: &str, size: u64) -> Item {
        Item::new(label.into(), size)
    }

    #[test]
    fn insert_and_get() {
        let store = Store::new();
        let it = item("a.jpg", 3);
        let id = it.id;
        store.insert(it.clone(), vec![1u8, 2, 3]);

        assert_eq!(store.get(&id), Some(it));
        assert_eq!(store.get_payload(&id).as_deref(), Some(&[1u8, 2, 3][..]));
        assert!(store.exists(&id));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn put_overwrites_by_id() {
        let store = Store::new();
        let mut it = item("a.jpg", 1);
        store.put(it.clone());
        it.label = "renamed.jpg".into();
        store.put(it.clone());

        assert_eq!(store.count(), 1);
        assert_eq!(store.get(&it.id).unwrap().label, "renamed.jpg");
    }

    #[test]
    fn delete_removes_record_and_payload() {
        let store = Store::new();
        let it = item("a.jpg", 1);
        let id = it.id;
        store.insert(it, vec![9u8]);

        assert!(store.delete(&id).is_some());
        assert!(store.get(&id).is_none());
        assert!(store.get_payload(&id).is_none());
        assert!(store.delete(&id).is_none());
    }

    #[test]
    fn list_by_state_is_subset_of_list_all() {
        let store = Store::new();
        for i in 0..6 {
            let it = item(&format!("{i}.jpg"), 1);
            let id = it.id;
            store.insert(it, vec![0u8]);
            if i % 2 == 0 {
                store.update_state(&id, ItemState::Processing);
            }
        }

        let all = store.list_all();
        for state in ItemState::ALL {
            let mut expected: Vec<_> = all
                .iter()
                .filter(|i| i.state == state)
                .map(|i| i.id)
                .collect();
            let mut got: Vec<_> = store.list_by_state(state).iter().map(|i| i.id).collect();
            expected.sort();
            got.sort();
            assert_eq!(got, expected, "mismatch for {state}");
        }
        assert_eq!(store.counts().processing, 3);
        assert_eq!(store.counts().uploaded, 3);
    }

    #[test]
    fn conditional_update() {
        let store = Store::new();
        let it = item("a.jpg", 1);
        let id = it.id;
        store.put(it);

        let applied = store.update_state_if(&id, ItemState::Uploaded, ItemState::Processing);
        assert!(matches!(applied, StateUpdate::Applied(ref i) if i.state == ItemState::Processing));

        let stale = store.update_state_if(&id, ItemState::Uploaded, ItemState::Processing);
        assert!(matches!(stale, StateUpdate::Stale(ref i) if i.state == ItemState::Processing));

        store.delete(&id);
        assert_eq!(
            store.update_state_if(&id, ItemState::Processing, ItemState::Done),
            StateUpdate::Missing
        );
    }

    #[test]
    fn update_state_on_missing_item() {
        let store = Store::new();
        assert!(store.update_state(&uuid::Uuid::new_v4(), ItemState::Done).is_none());
    }

    #[test]
    fn clear_empties_both_maps() {
        let store = Store::new();
        let it = item("a.jpg", 1);
        let id = it.id;
        store.insert(it, vec![1u8]);
        store.clear();
        assert_eq!(store.count(), 0);
        assert!(store.get_payload(&id).is_none());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let store = Arc::new(Store::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..50 {
                        let it = Item::new(format!("{t}-{i}.jpg"), 1);
                        let id = it.id;
                        store.insert(it, vec![0u8]);
                        let _ = store.list_by_state(ItemState::Uploaded);
                        if i % 5 == 0 {
                            store.delete(&id);
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.count(), 8 * 40);
        assert_eq!(store.counts().total(), store.count());
    }
}
