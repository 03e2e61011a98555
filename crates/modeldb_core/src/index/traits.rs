//! The index trait.

use super::{Key, KeyType};
use crate::error::StoreResult;
use crate::lock::Lockable;
use crate::types::{FieldId, ModelId};

/// A map between keys and model ids.
///
/// Every id maps to at most one key; a key may map to many ids. Each
/// operation joins the calling thread's transaction and locks the index:
/// exclusively for mutations, shared for lookups.
pub trait Index: Lockable + Send + Sync {
    /// Associates `id` with `key`, replacing any previous key of `id`.
    ///
    /// `field` names the field whose change produced `key`; compound
    /// indexes use it to patch a single component.
    fn store(&self, field: FieldId, key: Key, id: ModelId) -> StoreResult<()>;

    /// Removes `id` and its key. Does nothing if `id` is not indexed.
    fn erase(&self, id: ModelId) -> StoreResult<()>;

    /// Removes every entry.
    fn clear(&self) -> StoreResult<()>;

    /// Returns the ids stored under `key`, in ascending order.
    fn get_list(&self, key: &Key) -> StoreResult<Vec<ModelId>>;

    /// Returns one id stored under `key`; the smallest if there are several.
    fn get(&self, key: &Key) -> StoreResult<ModelId>;

    /// Returns the key stored for `id`.
    fn key_of(&self, id: ModelId) -> StoreResult<Option<Key>>;

    /// Returns the number of indexed ids.
    fn len(&self) -> StoreResult<usize>;

    /// Returns `true` if no ids are indexed.
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the shape of keys this index accepts.
    fn key_type(&self) -> &KeyType;

    /// Returns `true` if `key` has the shape this index accepts.
    fn match_key_type(&self, key: &Key) -> bool {
        self.key_type().matches(key)
    }

    /// Returns `true` for indexes over a relation field.
    fn is_relation_index(&self) -> bool {
        false
    }

    /// Returns `true` for indexes over several fields.
    fn is_compound_index(&self) -> bool {
        false
    }
}
