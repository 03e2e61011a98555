//! Hash index implementation.

use super::{Index, Key, KeyType};
use crate::error::{StoreError, StoreResult};
use crate::lock::{LockCell, LockCoordinator, Lockable};
use crate::types::{FieldId, ModelId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Default)]
struct Entries {
    by_key: HashMap<Key, BTreeSet<ModelId>>,
    by_id: HashMap<ModelId, Key>,
}

impl Entries {
    fn remove(&mut self, id: ModelId) -> Option<Key> {
        let key = self.by_id.remove(&id)?;
        if let Some(ids) = self.by_key.get_mut(&key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_key.remove(&key);
            }
        }
        Some(key)
    }

    fn insert(&mut self, key: Key, id: ModelId) {
        self.remove(id);
        self.by_key.entry(key.clone()).or_default().insert(id);
        self.by_id.insert(id, key);
    }
}

/// Hash-based index for equality lookups.
///
/// `HashIndex` keeps a bidirectional mapping: key to the set of ids stored
/// under it, and id to its single key. Storing an id again moves it to the
/// new key.
///
/// # Example
///
/// ```rust,ignore
/// let index = HashIndex::new(coordinator, "people.name", KeyType::Single(ValueType::Text));
///
/// index.store(NAME, Key::from("bob"), id)?;
/// assert_eq!(index.get(&Key::from("bob"))?, id);
/// ```
pub struct HashIndex {
    cell: LockCell,
    name: String,
    key_type: KeyType,
    entries: RwLock<Entries>,
}

impl HashIndex {
    /// Creates a new hash index.
    pub fn new(coordinator: Arc<LockCoordinator>, name: impl Into<String>, key_type: KeyType) -> Self {
        Self {
            cell: LockCell::new(coordinator),
            name: name.into(),
            key_type,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Returns the index name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Lockable for HashIndex {
    fn lock_cell(&self) -> &LockCell {
        &self.cell
    }
}

impl Index for HashIndex {
    fn store(&self, _field: FieldId, key: Key, id: ModelId) -> StoreResult<()> {
        if !self.key_type.matches(&key) {
            return Err(StoreError::type_mismatch(
                format!("{:?}", self.key_type),
                &key,
            ));
        }
        let _txn = self.cell.lock_exclusive()?;
        self.entries.write().insert(key, id);
        Ok(())
    }

    fn erase(&self, id: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        self.entries.write().remove(id);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        *self.entries.write() = Entries::default();
        Ok(())
    }

    fn get_list(&self, key: &Key) -> StoreResult<Vec<ModelId>> {
        let _txn = self.cell.lock_shared()?;
        let entries = self.entries.read();
        Ok(entries
            .by_key
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    fn get(&self, key: &Key) -> StoreResult<ModelId> {
        let _txn = self.cell.lock_shared()?;
        let entries = self.entries.read();
        entries
            .by_key
            .get(key)
            .and_then(|ids| ids.first().copied())
            .ok_or_else(|| StoreError::instance_not_found(self.name.as_str(), key))
    }

    fn key_of(&self, id: ModelId) -> StoreResult<Option<Key>> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.entries.read().by_id.get(&id).cloned())
    }

    fn len(&self) -> StoreResult<usize> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.entries.read().by_id.len())
    }

    fn key_type(&self) -> &KeyType {
        &self.key_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::{Value, ValueType};

    const NAME: FieldId = FieldId::new(1);

    fn index() -> HashIndex {
        HashIndex::new(
            LockCoordinator::new(Config::default()),
            "people.name",
            KeyType::Single(ValueType::Text),
        )
    }

    #[test]
    fn store_and_get() {
        let index = index();
        index.store(NAME, Key::from("bob"), ModelId::new(1)).unwrap();

        assert_eq!(index.get(&Key::from("bob")).unwrap(), ModelId::new(1));
        assert_eq!(index.get_list(&Key::from("bob")).unwrap(), vec![ModelId::new(1)]);
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let index = index();
        let err = index.get(&Key::from("nobody")).unwrap_err();
        assert!(err.is_not_found());
        assert!(index.get_list(&Key::from("nobody")).unwrap().is_empty());
    }

    #[test]
    fn restoring_moves_id_to_new_key() {
        let index = index();
        let id = ModelId::new(5);
        index.store(NAME, Key::from("old"), id).unwrap();
        index.store(NAME, Key::from("new"), id).unwrap();

        assert!(index.get_list(&Key::from("old")).unwrap().is_empty());
        assert_eq!(index.get(&Key::from("new")).unwrap(), id);
        assert_eq!(index.key_of(id).unwrap(), Some(Key::from("new")));
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn many_ids_per_key_and_smallest_wins() {
        let index = index();
        for raw in [30, 10, 20] {
            index.store(NAME, Key::from("dup"), ModelId::new(raw)).unwrap();
        }
        assert_eq!(
            index.get_list(&Key::from("dup")).unwrap(),
            vec![ModelId::new(10), ModelId::new(20), ModelId::new(30)]
        );
        assert_eq!(index.get(&Key::from("dup")).unwrap(), ModelId::new(10));
    }

    #[test]
    fn erase_and_clear() {
        let index = index();
        index.store(NAME, Key::from("a"), ModelId::new(1)).unwrap();
        index.store(NAME, Key::from("b"), ModelId::new(2)).unwrap();

        index.erase(ModelId::new(1)).unwrap();
        index.erase(ModelId::new(99)).unwrap();
        assert_eq!(index.key_of(ModelId::new(1)).unwrap(), None);
        assert_eq!(index.len().unwrap(), 1);

        index.clear().unwrap();
        assert!(index.is_empty().unwrap());
    }

    #[test]
    fn wrong_key_type_is_rejected() {
        let index = index();
        let err = index
            .store(NAME, Key::Single(Value::from(1_u32)), ModelId::new(1))
            .unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }

    #[test]
    fn mutation_holds_exclusive_lock_for_transaction() {
        let index = index();
        let txn = index.lock_cell().begin();
        index.store(NAME, Key::from("a"), ModelId::new(1)).unwrap();
        assert!(txn.holds_exclusive(&index));
    }
}
