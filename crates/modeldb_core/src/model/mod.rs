//! Model types, field descriptors and values.

mod descriptor;
mod handle;
mod value;

pub use descriptor::{FieldDescriptor, FieldPolicy, ModelDescriptor};
pub use handle::Handle;
pub use value::{Value, ValueType};

/// An instance type that can be kept in a [`ModelStore`](crate::store::ModelStore).
///
/// One Rust type may back several model types (for example a base type and
/// a derived one); `model_name` selects the [`ModelDescriptor`] that applies
/// to a given instance.
pub trait Model: Send + Sync + 'static {
    /// Returns the name of this instance's model type.
    fn model_name(&self) -> &str;
}
