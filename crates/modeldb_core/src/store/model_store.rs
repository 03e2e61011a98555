//! Typed model stores.

use super::link::{AnyModelStore, RelationLink, Side};
use super::persist::{
    write_record, ImportStats, ModelRecord, Persistent, Progress, Record, RecordReader,
};
use crate::error::{StoreError, StoreResult};
use crate::index::{CompoundIndex, HashIndex, Index, Key, KeyType, RelationIndex};
use crate::lock::{LockCell, LockCoordinator, Lockable};
use crate::model::{FieldDescriptor, FieldPolicy, Handle, Model, ModelDescriptor, Value, ValueType};
use crate::types::{FieldId, LockId, ModelId, RefKey, StoreId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

type FieldSet = BTreeSet<FieldId>;

struct RelationEntry {
    id: LockId,
    link: Weak<dyn RelationLink>,
    side: Side,
}

struct StoreState<T> {
    models: BTreeMap<String, Arc<ModelDescriptor<T>>>,
    instances: HashMap<ModelId, Handle<T>>,
    ids: HashMap<Handle<T>, ModelId>,
    indexes: BTreeMap<FieldSet, Arc<dyn Index>>,
    relations: Vec<RelationEntry>,
    dependents: Vec<(StoreId, Weak<dyn AnyModelStore>)>,
    erasing: HashSet<ModelId>,
}

impl<T> StoreState<T> {
    fn new() -> Self {
        Self {
            models: BTreeMap::new(),
            instances: HashMap::new(),
            ids: HashMap::new(),
            indexes: BTreeMap::new(),
            relations: Vec::new(),
            dependents: Vec::new(),
            erasing: HashSet::new(),
        }
    }

    /// Derives an id from the instance address, probing past collisions.
    fn generate_id(&self, instance: &Handle<T>) -> ModelId {
        let mut raw = instance.identity_hash();
        while self.instances.contains_key(&ModelId::new(raw)) {
            raw = raw.wrapping_add(1);
        }
        ModelId::new(raw)
    }

    fn insert(&mut self, id: ModelId, instance: &Handle<T>) {
        self.instances.insert(id, instance.clone());
        self.ids.insert(instance.clone(), id);
    }

    fn remove(&mut self, id: ModelId) -> Option<Handle<T>> {
        let instance = self.instances.remove(&id)?;
        self.ids.remove(&instance);
        Some(instance)
    }
}

/// A store of model instances of one Rust type.
///
/// The store owns instance identity (handle to [`ModelId`] and back), the
/// registered model types, the secondary indexes over their fields, and the
/// links to relation stores and to stores whose relation fields point here.
///
/// Every public operation joins the calling thread's transaction and locks
/// the store: exclusively for mutations, shared for reads.
///
/// # Example
///
/// ```rust,ignore
/// let people = ModelStore::<Person>::new(coordinator, "people");
/// people.register_model(person_descriptor())?;
/// people.add_index(&[NAME])?;
///
/// let bob = Handle::new(Person::new("bob", 1));
/// people.store(&bob)?;
/// assert_eq!(people.get(&[NAME], "bob")?, bob);
/// ```
pub struct ModelStore<T: Model> {
    cell: LockCell,
    store_id: StoreId,
    name: String,
    self_ref: Weak<Self>,
    state: RwLock<StoreState<T>>,
}

impl<T: Model> ModelStore<T> {
    /// Creates an empty store.
    pub fn new(coordinator: Arc<LockCoordinator>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|self_ref| {
            let cell = LockCell::new(coordinator);
            Self {
                store_id: StoreId::from(cell.id()),
                cell,
                name,
                self_ref: self_ref.clone(),
                state: RwLock::new(StoreState::new()),
            }
        })
    }

    /// Returns the store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the store id.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    /// Makes a model type storable.
    ///
    /// Each relation field is indexed, and this store registers itself as a
    /// dependent of the field's target store.
    #[track_caller]
    pub fn register_model(&self, descriptor: ModelDescriptor<T>) -> StoreResult<()> {
        descriptor.validate()?;
        let _txn = self.cell.lock_exclusive()?;

        let relation_fields: Vec<FieldDescriptor<T>> = descriptor
            .fields()
            .iter()
            .filter(|field| field.is_relation())
            .cloned()
            .collect();
        let model = descriptor.name().to_string();
        self.state
            .write()
            .models
            .insert(model.clone(), Arc::new(descriptor));

        for field in relation_fields {
            let target = field.target().ok_or_else(|| {
                StoreError::invalid_operation(format!(
                    "relation field {} of {} points at a dropped store",
                    field.name(),
                    model
                ))
            })?;
            self.add_index(&[field.id()])?;
            let dependent: Weak<dyn AnyModelStore> = self.self_ref.clone();
            target.register_dependent(dependent)?;
        }
        debug!("registered model {} in {}", model, self.name);
        Ok(())
    }

    /// Removes a model type. Returns `false` if it was not registered.
    #[track_caller]
    pub fn unregister_model(&self, name: &str) -> StoreResult<bool> {
        let _txn = self.cell.lock_exclusive()?;
        Ok(self.state.write().models.remove(name).is_some())
    }

    /// Returns the names of the registered model types.
    #[track_caller]
    pub fn model_names(&self) -> StoreResult<Vec<String>> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.state.read().models.keys().cloned().collect())
    }

    /// Adds an index over `fields`.
    ///
    /// One field gives a hash index, or a relation index for a relation
    /// field; several give a compound index whose tuple follows the order of
    /// `fields`. Existing instances are indexed immediately. Adding an index
    /// over a field set that is already indexed does nothing.
    #[track_caller]
    pub fn add_index(&self, fields: &[FieldId]) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let set: FieldSet = fields.iter().copied().collect();
        if set.is_empty() || set.len() != fields.len() {
            return Err(StoreError::invalid_operation(format!(
                "index fields must be distinct and non-empty: {fields:?}"
            )));
        }
        if self.state.read().indexes.contains_key(&set) {
            return Ok(());
        }

        let descriptors = fields
            .iter()
            .map(|field| self.field_descriptor(*field))
            .collect::<StoreResult<Vec<_>>>()?;
        let label = format!(
            "{}.{}",
            self.name,
            descriptors
                .iter()
                .map(|field| field.name())
                .collect::<Vec<_>>()
                .join("+")
        );
        let coordinator = Arc::clone(self.cell.coordinator());
        let index: Arc<dyn Index> = match descriptors.as_slice() {
            [field] => match field.value_type() {
                ValueType::Ref(target) => Arc::new(RelationIndex::new(coordinator, label, target)),
                value_type => Arc::new(HashIndex::new(coordinator, label, KeyType::Single(value_type))),
            },
            _ => Arc::new(CompoundIndex::new(
                coordinator,
                label,
                descriptors
                    .iter()
                    .map(|field| (field.id(), field.value_type()))
                    .collect(),
            )),
        };

        for (id, instance) in self.sorted_instances() {
            let Ok(descriptor) = self.descriptor_for(&instance) else {
                continue;
            };
            let values: Vec<(FieldId, Value)> = {
                let guard = instance.read();
                descriptor
                    .fields()
                    .iter()
                    .filter(|field| set.contains(&field.id()))
                    .map(|field| (field.id(), field.read(&guard)))
                    .collect()
            };
            for (field, value) in values {
                index.store(field, Key::Single(value), id)?;
            }
        }

        self.state.write().indexes.insert(set, index);
        debug!("added index over {:?} to {}", fields, self.name);
        Ok(())
    }

    /// Adds a compound index; `fields` must name at least two fields.
    #[track_caller]
    pub fn add_compound_index(&self, fields: &[FieldId]) -> StoreResult<()> {
        if fields.len() < 2 {
            return Err(StoreError::invalid_operation(
                "a compound index needs at least two fields",
            ));
        }
        self.add_index(fields)
    }

    /// Returns the index over exactly the given field set.
    #[track_caller]
    pub fn get_index(&self, fields: &[FieldId]) -> StoreResult<Arc<dyn Index>> {
        let _txn = self.cell.lock_shared()?;
        let set: FieldSet = fields.iter().copied().collect();
        let index = self.state.read().indexes.get(&set).cloned();
        index.ok_or_else(|| StoreError::IndexNotFound {
            fields: format!("{fields:?}"),
        })
    }

    /// Stores an instance, returning its id.
    ///
    /// Storing an instance that is already stored returns its existing id.
    #[track_caller]
    pub fn store(&self, instance: &Handle<T>) -> StoreResult<ModelId> {
        let _txn = self.cell.lock_exclusive()?;
        let descriptor = self.descriptor_for(instance)?;
        let id = {
            let mut state = self.state.write();
            if let Some(id) = state.ids.get(instance).copied() {
                return Ok(id);
            }
            let id = state.generate_id(instance);
            state.insert(id, instance);
            id
        };
        self.index_instance(id, instance, &descriptor)?;
        debug!("stored {} in {}", id, self.name);
        Ok(id)
    }

    /// Erases an instance, cascading to everything that references it.
    ///
    /// Does nothing if the instance is not stored.
    #[track_caller]
    pub fn erase(&self, instance: &Handle<T>) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let id = self.state.read().ids.get(instance).copied();
        match id {
            Some(id) => self.erase_helper(id),
            None => Ok(()),
        }
    }

    /// Erases the instance with the given id. Does nothing if it is not stored.
    #[track_caller]
    pub fn erase_id(&self, id: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        self.erase_helper(id)
    }

    /// Erases every instance.
    ///
    /// Dependent stores are notified for each instance, then every index and
    /// relation store is cleared.
    #[track_caller]
    pub fn clear(&self) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let ids: Vec<ModelId> = self.sorted_instances().into_iter().map(|(id, _)| id).collect();
        let dependents = self.live_dependents();
        for id in &ids {
            for dependent in &dependents {
                dependent.trigger_relation_model_delete_event(RefKey::new(self.store_id, *id))?;
            }
        }

        let indexes: Vec<Arc<dyn Index>> = {
            let mut state = self.state.write();
            state.instances.clear();
            state.ids.clear();
            state.indexes.values().cloned().collect()
        };
        for index in indexes {
            index.clear()?;
        }
        for (relation, _) in self.live_relations() {
            relation.clear()?;
        }
        info!("cleared {} instances from {}", ids.len(), self.name);
        Ok(())
    }

    /// Returns `true` if the instance is stored.
    #[track_caller]
    pub fn contains(&self, instance: &Handle<T>) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.state.read().ids.contains_key(instance))
    }

    /// Returns the id of a stored instance.
    #[track_caller]
    pub fn get_id(&self, instance: &Handle<T>) -> StoreResult<ModelId> {
        let _txn = self.cell.lock_shared()?;
        let id = self.state.read().ids.get(instance).copied();
        id.ok_or_else(|| StoreError::instance_not_found(self.name.as_str(), format!("{instance:?}")))
    }

    /// Returns the instance with the given id.
    #[track_caller]
    pub fn get_instance(&self, id: ModelId) -> StoreResult<Handle<T>> {
        let _txn = self.cell.lock_shared()?;
        let instance = self.state.read().instances.get(&id).cloned();
        instance.ok_or_else(|| StoreError::instance_not_found(self.name.as_str(), id))
    }

    /// Returns every stored instance, ordered by id.
    #[track_caller]
    pub fn get_all(&self) -> StoreResult<Vec<Handle<T>>> {
        let _txn = self.cell.lock_shared()?;
        Ok(self
            .sorted_instances()
            .into_iter()
            .map(|(_, instance)| instance)
            .collect())
    }

    /// Returns every stored id in ascending order.
    #[track_caller]
    pub fn get_id_list(&self) -> StoreResult<Vec<ModelId>> {
        let _txn = self.cell.lock_shared()?;
        let mut ids: Vec<ModelId> = self.state.read().instances.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    /// Returns the number of stored instances.
    #[track_caller]
    pub fn len(&self) -> StoreResult<usize> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.state.read().instances.len())
    }

    /// Returns `true` if no instances are stored.
    #[track_caller]
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns the instances stored under `key` in the index over `fields`.
    #[track_caller]
    pub fn get_list(&self, fields: &[FieldId], key: impl Into<Key>) -> StoreResult<Vec<Handle<T>>> {
        let _txn = self.cell.lock_shared()?;
        let ids = self.get_index(fields)?.get_list(&key.into())?;
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.instances.get(id).cloned())
            .collect())
    }

    /// Returns one instance stored under `key` in the index over `fields`.
    ///
    /// If several instances share the key, the one with the smallest id is
    /// returned.
    #[track_caller]
    pub fn get(&self, fields: &[FieldId], key: impl Into<Key>) -> StoreResult<Handle<T>> {
        let _txn = self.cell.lock_shared()?;
        let id = self.get_index(fields)?.get(&key.into())?;
        self.get_instance(id)
    }

    /// Mutates an instance and brings indexes up to date.
    ///
    /// Every field whose value changed is re-indexed. For relation fields the
    /// new target must be stored; otherwise every changed field is restored
    /// and `InstanceNotFound` returned. The previous target of a changed relation
    /// field gets an automatic-cleanup check.
    #[track_caller]
    pub fn update<R>(&self, instance: &Handle<T>, mutate: impl FnOnce(&mut T) -> R) -> StoreResult<R> {
        let _txn = self.cell.lock_exclusive()?;
        let id = self.state.read().ids.get(instance).copied();
        let Some(id) = id else {
            return Ok(mutate(&mut *instance.write()));
        };

        let descriptor = self.descriptor_for(instance)?;
        let before = snapshot(&descriptor, instance);
        let result = mutate(&mut *instance.write());
        let after = snapshot(&descriptor, instance);

        let changed: Vec<(&FieldDescriptor<T>, Value, Value)> = descriptor
            .fields()
            .iter()
            .zip(before)
            .zip(after)
            .filter(|((_, old), new)| old != new)
            .map(|((field, old), new)| (field, old, new))
            .collect();

        let invalid = changed
            .iter()
            .find_map(|(field, _, new)| self.check_relation_target(field, new).err());
        if let Some(err) = invalid {
            let mut guard = instance.write();
            for (field, old, _) in changed {
                field.write(&mut guard, old)?;
            }
            return Err(err);
        }

        for (field, old, new) in changed {
            self.field_written(id, field, old, new)?;
        }
        Ok(result)
    }

    /// Assigns one field.
    ///
    /// A relation field may only be assigned a stored target or null.
    #[track_caller]
    pub fn set_field(&self, instance: &Handle<T>, field: FieldId, value: Value) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let descriptor = self.descriptor_for(instance)?;
        let field = descriptor
            .field(field)
            .ok_or(StoreError::FieldNotFound { field })?;
        self.check_relation_target(field, &value)?;

        let old = field.read(&instance.read());
        field.write(&mut instance.write(), value.clone())?;

        let id = self.state.read().ids.get(instance).copied();
        if let Some(id) = id {
            if old != value {
                self.field_written(id, field, old, value)?;
            }
        }
        Ok(())
    }

    /// Resets a field to its type's default; relation fields become null.
    #[track_caller]
    pub fn reset_field(&self, instance: &Handle<T>, field: FieldId) -> StoreResult<()> {
        let default = {
            let descriptor = self.descriptor_for(instance)?;
            let field = descriptor
                .field(field)
                .ok_or(StoreError::FieldNotFound { field })?;
            field.value_type().default_value()
        };
        self.set_field(instance, field, default)
    }

    /// Reads one field of an instance.
    #[track_caller]
    pub fn field_value(&self, instance: &Handle<T>, field: FieldId) -> StoreResult<Value> {
        let _txn = self.cell.lock_shared()?;
        let descriptor = self.descriptor_for(instance)?;
        let field = descriptor
            .field(field)
            .ok_or(StoreError::FieldNotFound { field })?;
        let value = field.read(&instance.read());
        Ok(value)
    }

    /// Re-indexes every field of a stored instance.
    ///
    /// Only needed after the instance was mutated without [`update`](Self::update).
    #[track_caller]
    pub fn update_indexes(&self, instance: &Handle<T>) -> StoreResult<()> {
        let _txn = self.cell.lock_shared()?;
        let id = self.state.read().ids.get(instance).copied();
        let Some(id) = id else {
            return Ok(());
        };
        let descriptor = self.descriptor_for(instance)?;
        self.index_instance(id, instance, &descriptor)
    }

    /// Stores `value` as the key for `field` of a stored instance in every
    /// index covering that field. Does nothing for instances not stored.
    #[track_caller]
    pub fn update_index(&self, instance: &Handle<T>, field: FieldId, value: Value) -> StoreResult<()> {
        let _txn = self.cell.lock_shared()?;
        let id = self.state.read().ids.get(instance).copied();
        match id {
            Some(id) => self.index_field(id, field, value),
            None => Ok(()),
        }
    }

    /// Returns `true` if anything still references the instance.
    ///
    /// Counts relation fields of instances without automatic cleanup in
    /// dependent stores, and pairs in every relation store.
    #[track_caller]
    pub fn has_relation_references(&self, id: ModelId) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        let key = RefKey::new(self.store_id, id);
        for dependent in self.live_dependents() {
            if dependent.has_index_references(key)? {
                return Ok(true);
            }
        }
        for (relation, side) in self.live_relations() {
            if relation.exists_on(side, id)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Returns what happens to referencing instances when the target of a
    /// relation field is erased. Plain fields report [`FieldPolicy::None`].
    #[track_caller]
    pub fn field_delete_policy(&self, field: FieldId) -> StoreResult<FieldPolicy> {
        let _txn = self.cell.lock_shared()?;
        self.field_descriptor(field)?;
        Ok(self.field_policy(field))
    }

    /// Erases every unreferenced instance whose model type has automatic
    /// cleanup enabled. Returns the number of instances erased directly.
    #[track_caller]
    pub fn do_garbage_collection(&self) -> StoreResult<usize> {
        let _txn = self.cell.lock_exclusive()?;
        let mut erased = 0;
        for (id, instance) in self.sorted_instances() {
            let still_stored = self.state.read().instances.contains_key(&id);
            if !still_stored || !self.descriptor_for(&instance)?.is_automatic_cleanup() {
                continue;
            }
            if self.has_relation_references(id)? {
                continue;
            }
            self.erase_helper(id)?;
            erased += 1;
        }
        info!("garbage collection erased {} instances from {}", erased, self.name);
        Ok(erased)
    }

    /// Encodes a stored instance as an export record.
    #[track_caller]
    pub fn to_json(&self, instance: &Handle<T>) -> StoreResult<ModelRecord> {
        let _txn = self.cell.lock_shared()?;
        let id = self.get_id(instance)?;
        self.record_for(id, instance)
    }

    /// Writes every instance as one JSON record per line, ordered by id.
    #[track_caller]
    pub fn export_to_writer<W: Write>(&self, output: &mut W) -> StoreResult<usize> {
        let _txn = self.cell.lock_shared()?;
        let instances = self.sorted_instances();
        let interval = self.cell.coordinator().config().progress_interval;
        let mut progress = Progress::new(&self.name, "export", Some(instances.len()), interval);
        for (done, (id, instance)) in instances.iter().enumerate() {
            let record = self.record_for(*id, instance)?;
            write_record(output, &record)?;
            progress.tick(done + 1);
        }
        info!("exported {} records from {}", instances.len(), self.name);
        Ok(instances.len())
    }

    /// Adds the records read from `input`, keeping their ids.
    ///
    /// Malformed records and records with undecodable fields are skipped.
    /// A record naming an unregistered model type, reusing a stored id, or
    /// referencing a missing relation target aborts the import.
    #[track_caller]
    pub fn import_from_reader<R: BufRead>(&self, input: R) -> StoreResult<ImportStats> {
        let _txn = self.cell.lock_exclusive()?;
        let interval = self.cell.coordinator().config().progress_interval;
        let mut progress = Progress::new(&self.name, "import", None, interval);
        let mut stats = ImportStats::default();

        for item in RecordReader::<R, ModelRecord>::new(input) {
            match item? {
                Record::Parsed(record) => {
                    if self.import_record(record)? {
                        stats.imported += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
                Record::Malformed { line, message } => {
                    warn!(
                        "skipping malformed record ending at line {} of {}: {}",
                        line, self.name, message
                    );
                    stats.skipped += 1;
                }
            }
            progress.tick(stats.imported + stats.skipped);
        }
        info!(
            "imported {} records into {} ({} skipped)",
            stats.imported, self.name, stats.skipped
        );
        Ok(stats)
    }

    pub(crate) fn register_relation_store(
        &self,
        id: LockId,
        link: Weak<dyn RelationLink>,
        side: Side,
    ) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        self.state
            .write()
            .relations
            .push(RelationEntry { id, link, side });
        Ok(())
    }

    /// Drops a relation store's registration without taking the store lock.
    pub(crate) fn detach_relation_store(&self, id: LockId) {
        self.state.write().relations.retain(|entry| entry.id != id);
    }

    fn import_record(&self, record: ModelRecord) -> StoreResult<bool> {
        let descriptor = self.state.read().models.get(&record.model).cloned();
        let descriptor = descriptor.ok_or_else(|| StoreError::unknown_model(&record.model))?;
        let id = ModelId::new(record.id);
        if self.state.read().instances.contains_key(&id) {
            return Err(StoreError::DuplicateId { id });
        }

        let mut instance = descriptor.construct();
        for field in descriptor.fields() {
            let Some(json) = record.fields.get(field.name()) else {
                continue;
            };
            let value = match Value::from_json(json, &field.value_type()) {
                Ok(value) => value,
                Err(err) => {
                    warn!("skipping record {} of {}: field {}: {}", id, self.name, field.name(), err);
                    return Ok(false);
                }
            };
            self.check_relation_target(field, &value)?;
            if let Err(err) = field.write(&mut instance, value) {
                warn!("skipping record {} of {}: field {}: {}", id, self.name, field.name(), err);
                return Ok(false);
            }
        }

        let instance = Handle::new(instance);
        self.state.write().insert(id, &instance);
        self.index_instance(id, &instance, &descriptor)?;
        Ok(true)
    }

    fn record_for(&self, id: ModelId, instance: &Handle<T>) -> StoreResult<ModelRecord> {
        let descriptor = self.descriptor_for(instance)?;
        let guard = instance.read();
        let fields = descriptor
            .fields()
            .iter()
            .map(|field| Ok((field.name().to_string(), field.read(&guard).to_json()?)))
            .collect::<StoreResult<_>>()?;
        Ok(ModelRecord {
            id: id.as_u64(),
            model: descriptor.name().to_string(),
            fields,
        })
    }

    fn erase_helper(&self, id: ModelId) -> StoreResult<()> {
        {
            let mut state = self.state.write();
            if !state.instances.contains_key(&id) || !state.erasing.insert(id) {
                return Ok(());
            }
        }
        let result = self.erase_stored(id);
        self.state.write().erasing.remove(&id);
        result
    }

    fn erase_stored(&self, id: ModelId) -> StoreResult<()> {
        let me = RefKey::new(self.store_id, id);
        for dependent in self.live_dependents() {
            dependent.trigger_relation_model_delete_event(me)?;
        }

        let (instance, indexes) = {
            let mut state = self.state.write();
            let instance = state.remove(id);
            let indexes: Vec<Arc<dyn Index>> = state.indexes.values().cloned().collect();
            (instance, indexes)
        };
        let Some(instance) = instance else {
            return Ok(());
        };
        for index in indexes {
            index.erase(id)?;
        }
        for (relation, side) in self.live_relations() {
            relation.erase_on(side, id)?;
        }

        if cfg!(debug_assertions) && self.has_relation_references(id)? {
            error!("{} of {} is still referenced after erase", id, self.name);
            return Err(StoreError::invariant_violation(format!(
                "{id} of {} is still referenced after erase",
                self.name
            )));
        }

        let targets: Vec<(Arc<dyn AnyModelStore>, ModelId)> = match self.descriptor_for(&instance) {
            Ok(descriptor) => {
                let guard = instance.read();
                descriptor
                    .fields()
                    .iter()
                    .filter_map(|field| match field.read(&guard) {
                        Value::Ref(target) => field.target().map(|store| (store, target.id)),
                        _ => None,
                    })
                    .collect()
            }
            Err(_) => Vec::new(),
        };
        for (store, target) in targets {
            store.do_automatic_cleanup(target)?;
        }
        debug!("erased {} from {}", id, self.name);
        Ok(())
    }

    /// Re-indexes a changed field and gives the old relation target a cleanup check.
    fn field_written(
        &self,
        id: ModelId,
        field: &FieldDescriptor<T>,
        old: Value,
        new: Value,
    ) -> StoreResult<()> {
        self.index_field(id, field.id(), new)?;
        if let (Value::Ref(previous), Some(target)) = (old, field.target()) {
            target.do_automatic_cleanup(previous.id)?;
        }
        Ok(())
    }

    fn check_relation_target(&self, field: &FieldDescriptor<T>, value: &Value) -> StoreResult<()> {
        let Value::Ref(target) = value else {
            return Ok(());
        };
        if !field.is_relation() {
            return Ok(());
        }
        let store = field.target().ok_or_else(|| {
            StoreError::invalid_operation(format!(
                "relation field {} of {} points at a dropped store",
                field.name(),
                self.name
            ))
        })?;
        if store.contains_id(target.id)? {
            Ok(())
        } else {
            Err(StoreError::instance_not_found(store.name(), target.id))
        }
    }

    fn index_instance(
        &self,
        id: ModelId,
        instance: &Handle<T>,
        descriptor: &ModelDescriptor<T>,
    ) -> StoreResult<()> {
        let values: Vec<(FieldId, Value)> = {
            let guard = instance.read();
            descriptor
                .fields()
                .iter()
                .map(|field| (field.id(), field.read(&guard)))
                .collect()
        };
        for (field, value) in values {
            self.index_field(id, field, value)?;
        }
        Ok(())
    }

    fn index_field(&self, id: ModelId, field: FieldId, value: Value) -> StoreResult<()> {
        let indexes: Vec<Arc<dyn Index>> = self
            .state
            .read()
            .indexes
            .iter()
            .filter(|(fields, _)| fields.contains(&field))
            .map(|(_, index)| Arc::clone(index))
            .collect();
        for index in indexes {
            index.store(field, Key::Single(value.clone()), id)?;
        }
        Ok(())
    }

    fn descriptor_for(&self, instance: &Handle<T>) -> StoreResult<Arc<ModelDescriptor<T>>> {
        let model = instance.read().model_name().to_string();
        let descriptor = self.state.read().models.get(&model).cloned();
        descriptor.ok_or_else(|| StoreError::unknown_model(model))
    }

    /// Finds a field among all registered model types.
    fn field_descriptor(&self, field: FieldId) -> StoreResult<FieldDescriptor<T>> {
        let state = self.state.read();
        state
            .models
            .values()
            .find_map(|model| model.field(field).cloned())
            .ok_or(StoreError::FieldNotFound { field })
    }

    fn field_policy(&self, field: FieldId) -> FieldPolicy {
        let state = self.state.read();
        state
            .models
            .values()
            .find_map(|model| model.field(field).and_then(FieldDescriptor::policy))
            .unwrap_or_default()
    }

    fn sorted_instances(&self) -> Vec<(ModelId, Handle<T>)> {
        let mut instances: Vec<(ModelId, Handle<T>)> = self
            .state
            .read()
            .instances
            .iter()
            .map(|(id, instance)| (*id, instance.clone()))
            .collect();
        instances.sort_unstable_by_key(|(id, _)| *id);
        instances
    }

    fn live_dependents(&self) -> Vec<Arc<dyn AnyModelStore>> {
        self.state
            .read()
            .dependents
            .iter()
            .filter_map(|(_, dependent)| dependent.upgrade())
            .collect()
    }

    fn live_relations(&self) -> Vec<(Arc<dyn RelationLink>, Side)> {
        self.state
            .read()
            .relations
            .iter()
            .filter_map(|entry| entry.link.upgrade().map(|link| (link, entry.side)))
            .collect()
    }
}

fn snapshot<T: Model>(descriptor: &ModelDescriptor<T>, instance: &Handle<T>) -> Vec<Value> {
    let guard = instance.read();
    descriptor
        .fields()
        .iter()
        .map(|field| field.read(&guard))
        .collect()
}

impl<T: Model> Lockable for ModelStore<T> {
    fn lock_cell(&self) -> &LockCell {
        &self.cell
    }
}

impl<T: Model> AnyModelStore for ModelStore<T> {
    fn store_id(&self) -> StoreId {
        self.store_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn contains_id(&self, id: ModelId) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.state.read().instances.contains_key(&id))
    }

    fn trigger_relation_model_delete_event(&self, deleting: RefKey) -> StoreResult<()> {
        let key = Key::Single(Value::Ref(deleting));
        let candidates: Vec<(FieldId, Arc<dyn Index>)> = self
            .state
            .read()
            .indexes
            .iter()
            .filter(|(_, index)| index.is_relation_index() && index.match_key_type(&key))
            .filter_map(|(fields, index)| {
                fields.first().map(|field| (*field, Arc::clone(index)))
            })
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let _txn = self.cell.lock_exclusive()?;
        for (field, index) in candidates {
            let policy = self.field_policy(field);
            for id in index.get_list(&key)? {
                match policy {
                    FieldPolicy::None | FieldPolicy::OnDeleteErase => self.erase_id(id)?,
                    FieldPolicy::OnDeleteSetToNull => {
                        let instance = self.state.read().instances.get(&id).cloned();
                        if let Some(instance) = instance {
                            self.reset_field(&instance, field)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn has_index_references(&self, target: RefKey) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        let key = Key::Single(Value::Ref(target));
        let indexes: Vec<Arc<dyn Index>> = self
            .state
            .read()
            .indexes
            .values()
            .filter(|index| index.is_relation_index() && index.match_key_type(&key))
            .cloned()
            .collect();

        for index in indexes {
            for id in index.get_list(&key)? {
                let instance = self.state.read().instances.get(&id).cloned();
                let Some(instance) = instance else {
                    continue;
                };
                let automatic = self
                    .descriptor_for(&instance)
                    .map(|descriptor| descriptor.is_automatic_cleanup())
                    .unwrap_or(false);
                if !automatic {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn do_automatic_cleanup(&self, id: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let instance = {
            let state = self.state.read();
            if state.erasing.contains(&id) {
                return Ok(());
            }
            state.instances.get(&id).cloned()
        };
        let Some(instance) = instance else {
            return Ok(());
        };
        if !self.descriptor_for(&instance)?.is_automatic_cleanup() {
            return Ok(());
        }
        if self.has_relation_references(id)? {
            return Ok(());
        }
        debug!("automatic cleanup of {} in {}", id, self.name);
        self.erase_helper(id)
    }

    fn register_dependent(&self, dependent: Weak<dyn AnyModelStore>) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let Some(store) = dependent.upgrade() else {
            return Ok(());
        };
        let id = store.store_id();
        let mut state = self.state.write();
        state
            .dependents
            .retain(|(_, existing)| existing.strong_count() > 0);
        if !state.dependents.iter().any(|(existing, _)| *existing == id) {
            state.dependents.push((id, dependent));
        }
        Ok(())
    }
}

impl<T: Model> Persistent for ModelStore<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn export_json(&self, path: &Path) -> StoreResult<usize> {
        let mut output = BufWriter::new(File::create(path)?);
        let written = self.export_to_writer(&mut output)?;
        output.flush()?;
        Ok(written)
    }

    fn import_json(&self, path: &Path) -> StoreResult<ImportStats> {
        self.import_from_reader(BufReader::new(File::open(path)?))
    }
}
