//! Type-erased views of stores used for cross-store cascades.

use crate::error::StoreResult;
use crate::lock::Lockable;
use crate::types::{LockId, ModelId, RefKey, StoreId};
use std::sync::Weak;

/// Operations one model store performs on another without knowing its type.
///
/// A store referenced by relation fields of other stores keeps those stores
/// as dependents and notifies them when one of its instances is erased.
pub trait AnyModelStore: Lockable + Send + Sync {
    /// Returns the store id.
    fn store_id(&self) -> StoreId;

    /// Returns the store name.
    fn name(&self) -> &str;

    /// Returns `true` if an instance with `id` is stored.
    fn contains_id(&self, id: ModelId) -> StoreResult<bool>;

    /// Applies relation-field delete policies to instances referencing `deleting`.
    fn trigger_relation_model_delete_event(&self, deleting: RefKey) -> StoreResult<()>;

    /// Returns `true` if an instance without automatic cleanup references `target`.
    fn has_index_references(&self, target: RefKey) -> StoreResult<bool>;

    /// Erases the instance if it has automatic cleanup and nothing references it.
    fn do_automatic_cleanup(&self, id: ModelId) -> StoreResult<()>;

    /// Registers a store whose relation fields point into this one.
    fn register_dependent(&self, dependent: Weak<dyn AnyModelStore>) -> StoreResult<()>;
}

/// The side of a relation a model store sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    A,
    B,
}

/// Operations a model store performs on the relation stores it takes part in.
pub(crate) trait RelationLink: Send + Sync {
    fn relation_id(&self) -> LockId;

    fn exists_on(&self, side: Side, id: ModelId) -> StoreResult<bool>;

    fn erase_on(&self, side: Side, id: ModelId) -> StoreResult<()>;

    fn clear(&self) -> StoreResult<()>;
}
