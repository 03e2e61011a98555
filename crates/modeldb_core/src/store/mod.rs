//! Model stores, relation stores and their persistence.

mod link;
mod model_store;
mod persist;
mod relation_store;

pub use link::AnyModelStore;
pub use model_store::ModelStore;
pub use persist::{
    write_record, ImportStats, ModelRecord, Persistent, Record, RecordReader, RelationRecord,
};
pub use relation_store::{ErasePolicy, RelationStore};
