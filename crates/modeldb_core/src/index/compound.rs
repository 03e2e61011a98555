//! Compound (multi-field) index.

use super::{CompoundKey, HashIndex, Index, Key, KeyType};
use crate::error::{StoreError, StoreResult};
use crate::lock::{LockCell, LockCoordinator, Lockable};
use crate::model::ValueType;
use crate::types::{FieldId, ModelId};
use std::sync::Arc;

/// An index keyed by a tuple of field values.
///
/// Field changes arrive one at a time. Storing a single value patches the
/// component belonging to that field in the id's current tuple; storing a
/// full tuple replaces it. Ids seen for the first time start from the
/// default tuple.
pub struct CompoundIndex {
    inner: HashIndex,
    fields: Vec<FieldId>,
    defaults: CompoundKey,
}

impl CompoundIndex {
    /// Creates an index over `fields`, whose types are given in the same order.
    pub fn new(
        coordinator: Arc<LockCoordinator>,
        name: impl Into<String>,
        fields: Vec<(FieldId, ValueType)>,
    ) -> Self {
        let types: Vec<ValueType> = fields.iter().map(|(_, value_type)| *value_type).collect();
        let defaults = CompoundKey::new(types.iter().map(ValueType::default_value).collect());
        Self {
            inner: HashIndex::new(coordinator, name, KeyType::Compound(types)),
            fields: fields.into_iter().map(|(field, _)| field).collect(),
            defaults,
        }
    }

    /// Returns the indexed fields in component order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.fields
    }
}

impl Lockable for CompoundIndex {
    fn lock_cell(&self) -> &LockCell {
        self.inner.lock_cell()
    }
}

impl Index for CompoundIndex {
    fn store(&self, field: FieldId, key: Key, id: ModelId) -> StoreResult<()> {
        let value = match key {
            Key::Compound(_) => return self.inner.store(field, key, id),
            Key::Single(value) => value,
        };
        let position = self
            .fields
            .iter()
            .position(|candidate| *candidate == field)
            .ok_or(StoreError::FieldNotFound { field })?;

        let _txn = self.lock_cell().lock_exclusive()?;
        let mut components = match self.inner.key_of(id)? {
            Some(Key::Compound(current)) => current.into_components(),
            _ => self.defaults.clone().into_components(),
        };
        components[position] = value;
        self.inner
            .store(field, Key::Compound(CompoundKey::new(components)), id)
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

    fn is_compound_index(&self) -> bool {
        true
    }
}
