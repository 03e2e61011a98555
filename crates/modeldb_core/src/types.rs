//! Core type definitions for ModelDB.

use std::fmt;

/// Identifier of a stored model instance.
///
/// Ids are derived from the instance's address when it is first stored and
/// are preserved verbatim by export and import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModelId(pub u64);

impl ModelId {
    /// Creates a new model ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model:{}", self.0)
    }
}

/// Identifier of a lockable resource.
///
/// Lock IDs are allocated from a process-wide counter, so ascending order
/// is a stable total order across all resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u64);

impl LockId {
    /// Creates a new lock ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock:{}", self.0)
    }
}

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Identifier of a model store.
///
/// A store's ID equals the ID of its lock, which keeps relation references
/// unambiguous between stores holding the same Rust type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(pub u64);

impl StoreId {
    /// Creates a new store ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<LockId> for StoreId {
    fn from(id: LockId) -> Self {
        Self(id.as_u64())
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{}", self.0)
    }
}

/// Identifier of a field within a model type.
///
/// Field ids are chosen by the model author and must be unique within a
/// model, including fields inherited from a parent model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldId(pub u32);

impl FieldId {
    /// Creates a new field ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field:{}", self.0)
    }
}

/// Reference to an instance in a specific model store.
///
/// Relation fields hold a `RefKey`; the store component lets an index
/// tell references to different stores apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RefKey {
    /// Store holding the referenced instance.
    pub store: StoreId,
    /// Id of the referenced instance.
    pub id: ModelId,
}

impl RefKey {
    /// Creates a new reference.
    #[must_use]
    pub const fn new(store: StoreId, id: ModelId) -> Self {
        Self { store, id }
    }
}

impl fmt::Display for RefKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.store, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_id_display() {
        assert_eq!(ModelId::new(42).to_string(), "model:42");
    }

    #[test]
    fn lock_ids_order_numerically() {
        let mut ids = vec![LockId::new(9), LockId::new(2), LockId::new(5)];
        ids.sort();
        assert_eq!(ids, vec![LockId::new(2), LockId::new(5), LockId::new(9)]);
    }

    #[test]
    fn store_id_from_lock_id() {
        assert_eq!(StoreId::from(LockId::new(7)), StoreId::new(7));
    }

    #[test]
    fn ref_key_display() {
        let key = RefKey::new(StoreId::new(3), ModelId::new(11));
        assert_eq!(key.to_string(), "store:3/model:11");
    }
}
