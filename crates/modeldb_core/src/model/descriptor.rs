//! Field and model descriptors.
//!
//! A [`ModelDescriptor`] tells a store how to construct an instance of a
//! model type and how to read and write each of its fields. Descriptors
//! are plain data built once at start-up; they replace per-type
//! reflection.

use super::{Model, Value, ValueType};
use crate::error::{StoreError, StoreResult};
use crate::store::{AnyModelStore, ModelStore};
use crate::types::{FieldId, ModelId, RefKey, StoreId};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

/// What happens to a referencing instance when its relation target is erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldPolicy {
    /// No explicit policy; the referencing instance is erased.
    #[default]
    None,
    /// Erase the referencing instance.
    OnDeleteErase,
    /// Reset the field to null.
    OnDeleteSetToNull,
}

type Getter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;
type Setter<T> = Arc<dyn Fn(&mut T, Value) -> StoreResult<()> + Send + Sync>;

/// Relation metadata of a field.
#[derive(Clone)]
struct RelationTarget {
    store: Weak<dyn AnyModelStore>,
    policy: FieldPolicy,
}

/// Describes one field of a model type.
pub struct FieldDescriptor<T> {
    id: FieldId,
    name: String,
    value_type: ValueType,
    get: Getter<T>,
    set: Setter<T>,
    relation: Option<RelationTarget>,
}

impl<T: Model> FieldDescriptor<T> {
    /// Creates a plain field.
    pub fn new(
        id: FieldId,
        name: impl Into<String>,
        value_type: ValueType,
        get: impl Fn(&T) -> Value + Send + Sync + 'static,
        set: impl Fn(&mut T, Value) -> StoreResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            value_type,
            get: Arc::new(get),
            set: Arc::new(set),
            relation: None,
        }
    }

    /// Creates a nullable reference to an instance of `target`.
    ///
    /// Registering a model with a relation field indexes the field and makes
    /// the owning store a dependent of `target`.
    pub fn relation<U: Model>(
        id: FieldId,
        name: impl Into<String>,
        target: &Arc<ModelStore<U>>,
        policy: FieldPolicy,
        get: impl Fn(&T) -> Option<ModelId> + Send + Sync + 'static,
        set: impl Fn(&mut T, Option<ModelId>) + Send + Sync + 'static,
    ) -> Self {
        let store = target.store_id();
        let weak: Weak<ModelStore<U>> = Arc::downgrade(target);
        let weak: Weak<dyn AnyModelStore> = weak;
        Self {
            id,
            name: name.into(),
            value_type: ValueType::Ref(store),
            get: Arc::new(move |instance: &T| {
                get(instance).map_or(Value::Null, |id| Value::Ref(RefKey::new(store, id)))
            }),
            set: Arc::new(move |instance: &mut T, value: Value| match value {
                Value::Null => {
                    set(instance, None);
                    Ok(())
                }
                Value::Ref(key) if key.store == store => {
                    set(instance, Some(key.id));
                    Ok(())
                }
                other => Err(StoreError::type_mismatch(ValueType::Ref(store), other.type_name())),
            }),
            relation: Some(RelationTarget {
                store: weak,
                policy,
            }),
        }
    }

    /// Returns the field id.
    #[must_use]
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Returns the field name used in exported records.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the field's value type.
    #[must_use]
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Returns `true` for relation fields.
    #[must_use]
    pub fn is_relation(&self) -> bool {
        self.relation.is_some()
    }

    /// Returns the delete policy of a relation field.
    #[must_use]
    pub fn policy(&self) -> Option<FieldPolicy> {
        self.relation.as_ref().map(|relation| relation.policy)
    }

    /// Returns the store a relation field points into.
    #[must_use]
    pub fn target_store(&self) -> Option<StoreId> {
        match self.value_type {
            ValueType::Ref(store) => Some(store),
            _ => None,
        }
    }

    pub(crate) fn target(&self) -> Option<Arc<dyn AnyModelStore>> {
        self.relation.as_ref().and_then(|relation| relation.store.upgrade())
    }

    /// Reads the field from an instance.
    pub fn read(&self, instance: &T) -> Value {
        (self.get)(instance)
    }

    /// Writes the field on an instance, checking the value's type first.
    pub fn write(&self, instance: &mut T, value: Value) -> StoreResult<()> {
        if !value.matches(&self.value_type) {
            return Err(StoreError::type_mismatch(self.value_type, value.type_name()));
        }
        (self.set)(instance, value)
    }
}

impl<T> Clone for FieldDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name.clone(),
            value_type: self.value_type,
            get: Arc::clone(&self.get),
            set: Arc::clone(&self.set),
            relation: self.relation.clone(),
        }
    }
}

impl<T> fmt::Debug for FieldDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("value_type", &self.value_type)
            .field("policy", &self.relation.as_ref().map(|r| r.policy))
            .finish()
    }
}

/// Describes a model type: its name, constructor and fields.
pub struct ModelDescriptor<T> {
    name: String,
    construct: Arc<dyn Fn() -> T + Send + Sync>,
    fields: Vec<FieldDescriptor<T>>,
    automatic_cleanup: bool,
}

impl<T: Model> ModelDescriptor<T> {
    /// Creates a descriptor with no fields.
    pub fn new(name: impl Into<String>, construct: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            name: name.into(),
            construct: Arc::new(construct),
            fields: Vec::new(),
            automatic_cleanup: false,
        }
    }

    /// Creates a descriptor for a derived model type.
    ///
    /// The derived type inherits the parent's fields and cleanup setting.
    pub fn extend(
        parent: &Self,
        name: impl Into<String>,
        construct: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            construct: Arc::new(construct),
            fields: parent.fields.clone(),
            automatic_cleanup: parent.automatic_cleanup,
        }
    }

    /// Adds a field.
    #[must_use]
    pub fn with_field(mut self, field: FieldDescriptor<T>) -> Self {
        self.fields.push(field);
        self
    }

    /// Sets whether unreferenced instances of this type are erased automatically.
    #[must_use]
    pub fn automatic_cleanup(mut self, enabled: bool) -> Self {
        self.automatic_cleanup = enabled;
        self
    }

    /// Returns the model type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the fields, parent fields first.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor<T>] {
        &self.fields
    }

    /// Looks up a field by id.
    #[must_use]
    pub fn field(&self, id: FieldId) -> Option<&FieldDescriptor<T>> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// Returns `true` if automatic cleanup is enabled.
    #[must_use]
    pub fn is_automatic_cleanup(&self) -> bool {
        self.automatic_cleanup
    }

    /// Constructs a default instance.
    pub fn construct(&self) -> T {
        (self.construct)()
    }

    /// Rejects descriptors that declare a field id or name twice.
    pub(crate) fn validate(&self) -> StoreResult<()> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();
        for field in &self.fields {
            if !ids.insert(field.id) || !names.insert(field.name.as_str()) {
                return Err(StoreError::invalid_operation(format!(
                    "model {} declares field {} ({}) twice",
                    self.name, field.id, field.name
                )));
            }
        }
        Ok(())
    }
}

impl<T> Clone for ModelDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            construct: Arc::clone(&self.construct),
            fields: self.fields.clone(),
            automatic_cleanup: self.automatic_cleanup,
        }
    }
}

impl<T> fmt::Debug for ModelDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("automatic_cleanup", &self.automatic_cleanup)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Note {
        title: String,
        pinned: bool,
        kind: &'static str,
    }

    impl Model for Note {
        fn model_name(&self) -> &str {
            self.kind
        }
    }

    fn title() -> FieldDescriptor<Note> {
        FieldDescriptor::new(
            FieldId::new(1),
            "title",
            ValueType::Text,
            |note: &Note| Value::from(note.title.as_str()),
            |note, value| {
                note.title = value.into_text()?;
                Ok(())
            },
        )
    }

    fn pinned() -> FieldDescriptor<Note> {
        FieldDescriptor::new(
            FieldId::new(2),
            "pinned",
            ValueType::Bool,
            |note: &Note| Value::from(note.pinned),
            |note, value| {
                note.pinned = value.into_bool()?;
                Ok(())
            },
        )
    }

    #[test]
    fn read_and_write_fields() {
        let field = title();
        let mut note = Note::default();
        field.write(&mut note, Value::from("hello")).unwrap();
        assert_eq!(field.read(&note), Value::from("hello"));
    }

    #[test]
    fn write_rejects_wrong_type() {
        let field = title();
        let mut note = Note::default();
        let err = field.write(&mut note, Value::from(3_i64)).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(note.title.is_empty());
    }

    #[test]
    fn extend_inherits_fields_and_cleanup() {
        let base = ModelDescriptor::new("note", || Note {
            kind: "note",
            ..Note::default()
        })
        .with_field(title())
        .automatic_cleanup(true);
        let derived = ModelDescriptor::extend(&base, "pinned_note", || Note {
            kind: "pinned_note",
            pinned: true,
            ..Note::default()
        })
        .with_field(pinned());

        assert_eq!(derived.fields().len(), 2);
        assert!(derived.is_automatic_cleanup());
        assert!(derived.field(FieldId::new(1)).is_some());
        assert!(base.field(FieldId::new(2)).is_none());
        assert_eq!(derived.construct().model_name(), "pinned_note");
    }

    #[test]
    fn duplicate_field_ids_are_rejected() {
        let descriptor = ModelDescriptor::new("note", Note::default)
            .with_field(title())
            .with_field(title());
        assert!(descriptor.validate().is_err());
    }
}
