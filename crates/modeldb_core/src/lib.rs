//! # ModelDB Core
//!
//! In-process object store for ModelDB.
//!
//! This crate provides:
//! - Thread-affine transactions over reader/writer locks, with deadlock
//!   detection and lock-history based preemptive acquisition
//! - Hash, compound and relation indexes over model fields
//! - Model stores with identity, cascading erase and garbage collection
//! - Relation stores for many-to-many pairs between two model stores
//! - JSON record persistence for all stores

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod error;
pub mod index;
pub mod lock;
pub mod model;
pub mod store;
mod types;

pub use config::Config;
pub use database::Database;
pub use error::{StoreError, StoreResult};
pub use index::{CompoundIndex, CompoundKey, HashIndex, Index, Key, KeyType, RelationIndex};
pub use lock::{CallSite, HistoryStats, LockCell, LockCoordinator, Lockable, Transaction};
pub use model::{FieldDescriptor, FieldPolicy, Handle, Model, ModelDescriptor, Value, ValueType};
pub use store::{
    AnyModelStore, ErasePolicy, ImportStats, ModelRecord, ModelStore, Persistent, RelationRecord,
    RelationStore,
};
pub use types::{FieldId, LockId, ModelId, RefKey, StoreId, TransactionId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
