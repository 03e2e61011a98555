//! Index over a relation field.

use super::{HashIndex, Index, Key, KeyType};
use crate::error::StoreResult;
use crate::lock::{LockCell, LockCoordinator, Lockable};
use crate::model::ValueType;
use crate::types::{FieldId, ModelId, StoreId};
use std::sync::Arc;

/// A hash index whose keys are references into one target store.
///
/// Stores look for relation indexes when an instance of a target store is
/// erased, to find and cascade to the instances referencing it.
pub struct RelationIndex {
    inner: HashIndex,
    target: StoreId,
}

impl RelationIndex {
    /// Creates an index of references into `target`.
    pub fn new(coordinator: Arc<LockCoordinator>, name: impl Into<String>, target: StoreId) -> Self {
        Self {
            inner: HashIndex::new(coordinator, name, KeyType::Single(ValueType::Ref(target))),
            target,
        }
    }

    /// Returns the store the indexed references point into.
    #[must_use]
    pub fn target(&self) -> StoreId {
        self.target
    }
}

impl Lockable for RelationIndex {
    fn lock_cell(&self) -> &LockCell {
        self.inner.lock_cell()
    }
}

impl Index for RelationIndex {
    fn store(&self, field: FieldId, key: Key, id: ModelId) -> StoreResult<()> {
        self.inner.store(field, key, id)
    }

    fn erase(&self, id: ModelId) -> StoreResult<()> {
        self.inner.erase(id)
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()
    }

    fn get_list(&self, key: &Key) -> StoreResult<Vec<ModelId>> {
        self.inner.get_list(key)
    }

    fn get(&self, key: &Key) -> StoreResult<ModelId> {
        self.inner.get(key)
    }

    fn key_of(&self, id: ModelId) -> StoreResult<Option<Key>> {
        self.inner.key_of(id)
    }

    fn len(&self) -> StoreResult<usize> {
        self.inner.len()
    }

    fn key_type(&self) -> &KeyType {
        self.inner.key_type()
    }

    fn is_relation_index(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::model::Value;
    use crate::types::RefKey;

    #[test]
    fn matches_only_its_target_store() {
        let people = StoreId::new(100);
        let index = RelationIndex::new(LockCoordinator::new(Config::default()), "groups.founder", people);

        let person = Key::from(RefKey::new(people, ModelId::new(1)));
        let other = Key::from(RefKey::new(StoreId::new(101), ModelId::new(1)));

        assert!(index.is_relation_index());
        assert!(index.match_key_type(&person));
        assert!(index.match_key_type(&Key::Single(Value::Null)));
        assert!(!index.match_key_type(&other));
        assert_eq!(index.target(), people);
    }

    #[test]
    fn finds_referencing_ids() {
        let people = StoreId::new(200);
        let index = RelationIndex::new(LockCoordinator::new(Config::default()), "groups.founder", people);
        let founder = Key::from(RefKey::new(people, ModelId::new(7)));

        index.store(FieldId::new(2), founder.clone(), ModelId::new(1)).unwrap();
        index.store(FieldId::new(2), founder.clone(), ModelId::new(2)).unwrap();
        index
            .store(FieldId::new(2), Key::Single(Value::Null), ModelId::new(3))
            .unwrap();

        assert_eq!(
            index.get_list(&founder).unwrap(),
            vec![ModelId::new(1), ModelId::new(2)]
        );
    }
}
