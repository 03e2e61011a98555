//! Secondary indexes over model fields.
//!
//! This module provides three index kinds sharing one [`Index`] trait:
//!
//! - [`HashIndex`]: equality lookups on one field
//! - [`CompoundIndex`]: equality lookups on a tuple of fields
//! - [`RelationIndex`]: lookups of instances referencing a target instance
//!
//! Indexes map keys to [`ModelId`](crate::types::ModelId)s; the owning
//! store resolves ids to handles.

mod compound;
mod hash;
mod key;
mod relation;
mod traits;

pub use compound::CompoundIndex;
pub use hash::HashIndex;
pub use key::{hash_combine, CompoundKey, Key, KeyType};
pub use relation::RelationIndex;
pub use traits::Index;
