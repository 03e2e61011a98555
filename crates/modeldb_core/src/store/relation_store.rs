//! Many-to-many relation stores.

use super::link::{AnyModelStore, RelationLink, Side};
use super::model_store::ModelStore;
use super::persist::{write_record, ImportStats, Persistent, Progress, Record, RecordReader, RelationRecord};
use crate::error::{StoreError, StoreResult};
use crate::lock::{LockCell, Lockable};
use crate::model::{Handle, Model};
use crate::types::{LockId, ModelId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// What a relation store does to an instance once its last pair is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErasePolicy {
    /// Leave the instance alone.
    #[default]
    None,
    /// Erase the instance when it no longer takes part in any pair.
    EraseModelWhenErasingRelation,
}

#[derive(Default)]
struct Pairs {
    by_a: HashMap<ModelId, BTreeSet<ModelId>>,
    by_b: HashMap<ModelId, BTreeSet<ModelId>>,
    len: usize,
}

impl Pairs {
    fn insert(&mut self, a: ModelId, b: ModelId) -> bool {
        if !self.by_a.entry(a).or_default().insert(b) {
            return false;
        }
        self.by_b.entry(b).or_default().insert(a);
        self.len += 1;
        true
    }

    fn remove(&mut self, a: ModelId, b: ModelId) -> bool {
        let removed = remove_from(&mut self.by_a, a, b);
        if removed {
            remove_from(&mut self.by_b, b, a);
            self.len -= 1;
        }
        removed
    }

    fn remove_a(&mut self, a: ModelId) -> Vec<ModelId> {
        let bs: Vec<ModelId> = self.by_a.remove(&a).unwrap_or_default().into_iter().collect();
        for b in &bs {
            remove_from(&mut self.by_b, *b, a);
        }
        self.len -= bs.len();
        bs
    }

    fn remove_b(&mut self, b: ModelId) -> Vec<ModelId> {
        let as_: Vec<ModelId> = self.by_b.remove(&b).unwrap_or_default().into_iter().collect();
        for a in &as_ {
            remove_from(&mut self.by_a, *a, b);
        }
        self.len -= as_.len();
        as_
    }

    fn first(&self) -> Option<(ModelId, ModelId)> {
        self.by_a
            .iter()
            .find_map(|(a, bs)| bs.first().map(|b| (*a, *b)))
    }

    fn sorted(&self) -> Vec<(ModelId, ModelId)> {
        let mut pairs: Vec<(ModelId, ModelId)> = self
            .by_a
            .iter()
            .flat_map(|(a, bs)| bs.iter().map(move |b| (*a, *b)))
            .collect();
        pairs.sort_unstable();
        pairs
    }
}

fn remove_from(map: &mut HashMap<ModelId, BTreeSet<ModelId>>, key: ModelId, value: ModelId) -> bool {
    let Some(values) = map.get_mut(&key) else {
        return false;
    };
    let removed = values.remove(&value);
    if values.is_empty() {
        map.remove(&key);
    }
    removed
}

/// A set of (A, B) pairs between instances of two model stores.
///
/// Pairs may only name stored instances. When an instance is erased from
/// either model store, its pairs are removed. Each side carries an
/// [`ErasePolicy`] deciding whether an instance that loses its last pair is
/// erased too; every instance that loses a pair also gets an automatic
/// cleanup check in its own store.
pub struct RelationStore<A: Model, B: Model> {
    cell: LockCell,
    name: String,
    a_store: Arc<ModelStore<A>>,
    a_policy: ErasePolicy,
    b_store: Arc<ModelStore<B>>,
    b_policy: ErasePolicy,
    pairs: RwLock<Pairs>,
}

impl<A: Model, B: Model> RelationStore<A, B> {
    /// Creates a relation store and registers it with both model stores.
    pub fn new(
        name: impl Into<String>,
        a_store: Arc<ModelStore<A>>,
        a_policy: ErasePolicy,
        b_store: Arc<ModelStore<B>>,
        b_policy: ErasePolicy,
    ) -> StoreResult<Arc<Self>> {
        let coordinator = Arc::clone(a_store.lock_cell().coordinator());
        let relation = Arc::new(Self {
            cell: LockCell::new(coordinator),
            name: name.into(),
            a_store,
            a_policy,
            b_store,
            b_policy,
            pairs: RwLock::new(Pairs::default()),
        });

        let id = relation.cell.id();
        let weak: Weak<Self> = Arc::downgrade(&relation);
        let link: Weak<dyn RelationLink> = weak;
        relation
            .a_store
            .register_relation_store(id, link.clone(), Side::A)?;
        relation.b_store.register_relation_store(id, link, Side::B)?;
        debug!(
            "created relation {} between {} and {}",
            relation.name,
            relation.a_store.name(),
            relation.b_store.name()
        );
        Ok(relation)
    }

    /// Returns the relation name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the A-side model store.
    #[must_use]
    pub fn a_store(&self) -> &Arc<ModelStore<A>> {
        &self.a_store
    }

    /// Returns the B-side model store.
    #[must_use]
    pub fn b_store(&self) -> &Arc<ModelStore<B>> {
        &self.b_store
    }

    /// Adds a pair. Both instances must be stored.
    #[track_caller]
    pub fn store(&self, a: ModelId, b: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        if !self.a_store.contains_id(a)? {
            return Err(StoreError::instance_not_found(self.a_store.name(), a));
        }
        if !self.b_store.contains_id(b)? {
            return Err(StoreError::instance_not_found(self.b_store.name(), b));
        }
        self.pairs.write().insert(a, b);
        Ok(())
    }

    /// Adds a pair between two stored instances.
    #[track_caller]
    pub fn store_instances(&self, a: &Handle<A>, b: &Handle<B>) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let a = self.a_store.get_id(a)?;
        let b = self.b_store.get_id(b)?;
        self.store(a, b)
    }

    /// Removes one pair, then applies both sides' policies and cleanup checks.
    #[track_caller]
    pub fn erase(&self, a: ModelId, b: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        if !self.pairs.write().remove(a, b) {
            return Ok(());
        }
        self.erase_a_model(a)?;
        self.erase_b_model(b)
    }

    /// Removes every pair of `a`.
    #[track_caller]
    pub fn erase_a(&self, a: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let bs = self.pairs.write().remove_a(a);
        for b in bs {
            self.erase_b_model(b)?;
        }
        self.erase_a_model(a)
    }

    /// Removes every pair of `b`.
    #[track_caller]
    pub fn erase_b(&self, b: ModelId) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        let as_ = self.pairs.write().remove_b(b);
        for a in as_ {
            self.erase_a_model(a)?;
        }
        self.erase_b_model(b)
    }

    /// Removes every pair, applying both sides' policies.
    #[track_caller]
    pub fn clear(&self) -> StoreResult<()> {
        let _txn = self.cell.lock_exclusive()?;
        loop {
            let next = self.pairs.read().first();
            let Some((a, b)) = next else {
                break;
            };
            self.erase(a, b)?;
        }
        Ok(())
    }

    /// Returns `true` if the pair exists.
    #[track_caller]
    pub fn contains(&self, a: ModelId, b: ModelId) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        let pairs = self.pairs.read();
        Ok(pairs.by_a.get(&a).is_some_and(|bs| bs.contains(&b)))
    }

    /// Returns `true` if `a` takes part in any pair.
    #[track_caller]
    pub fn exists_a(&self, a: ModelId) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.pairs.read().by_a.contains_key(&a))
    }

    /// Returns `true` if `b` takes part in any pair.
    #[track_caller]
    pub fn exists_b(&self, b: ModelId) -> StoreResult<bool> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.pairs.read().by_b.contains_key(&b))
    }

    /// Returns the B ids paired with `a`, ascending.
    #[track_caller]
    pub fn get_b_list(&self, a: ModelId) -> StoreResult<Vec<ModelId>> {
        let _txn = self.cell.lock_shared()?;
        let pairs = self.pairs.read();
        Ok(pairs
            .by_a
            .get(&a)
            .map(|bs| bs.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Returns the A ids paired with `b`, ascending.
    #[track_caller]
    pub fn get_a_list(&self, b: ModelId) -> StoreResult<Vec<ModelId>> {
        let _txn = self.cell.lock_shared()?;
        let pairs = self.pairs.read();
        Ok(pairs
            .by_b
            .get(&b)
            .map(|a_ids| a_ids.iter().copied().collect())
            .unwrap_or_default())
    }

    /// Returns the B instances paired with `a`.
    #[track_caller]
    pub fn get_b_instances(&self, a: ModelId) -> StoreResult<Vec<Handle<B>>> {
        let _txn = self.cell.lock_shared()?;
        self.get_b_list(a)?
            .into_iter()
            .map(|b| self.b_store.get_instance(b))
            .collect()
    }

    /// Returns the A instances paired with `b`.
    #[track_caller]
    pub fn get_a_instances(&self, b: ModelId) -> StoreResult<Vec<Handle<A>>> {
        let _txn = self.cell.lock_shared()?;
        self.get_a_list(b)?
            .into_iter()
            .map(|a| self.a_store.get_instance(a))
            .collect()
    }

    /// Returns every pair, ordered.
    #[track_caller]
    pub fn pairs(&self) -> StoreResult<Vec<(ModelId, ModelId)>> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.pairs.read().sorted())
    }

    /// Returns the number of pairs.
    #[track_caller]
    pub fn len(&self) -> StoreResult<usize> {
        let _txn = self.cell.lock_shared()?;
        Ok(self.pairs.read().len)
    }

    /// Returns `true` if there are no pairs.
    #[track_caller]
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Writes every pair as one `{"A":id,"B":id}` line.
    #[track_caller]
    pub fn export_to_writer<W: Write>(&self, output: &mut W) -> StoreResult<usize> {
        let _txn = self.cell.lock_shared()?;
        let pairs = self.pairs.read().sorted();
        let interval = self.cell.coordinator().config().progress_interval;
        let mut progress = Progress::new(&self.name, "export", Some(pairs.len()), interval);
        for (done, (a, b)) in pairs.iter().enumerate() {
            write_record(
                output,
                &RelationRecord {
                    a: a.as_u64(),
                    b: b.as_u64(),
                },
            )?;
            progress.tick(done + 1);
        }
        info!("exported {} pairs from {}", pairs.len(), self.name);
        Ok(pairs.len())
    }

    /// Adds the pairs read from `input`.
    ///
    /// Malformed records and pairs naming instances missing from either
    /// model store are skipped.
    #[track_caller]
    pub fn import_from_reader<R: BufRead>(&self, input: R) -> StoreResult<ImportStats> {
        let _txn = self.cell.lock_exclusive()?;
        let interval = self.cell.coordinator().config().progress_interval;
        let mut progress = Progress::new(&self.name, "import", None, interval);
        let mut stats = ImportStats::default();
        let a_ids: BTreeSet<ModelId> = self.a_store.get_id_list()?.into_iter().collect();
        let b_ids: BTreeSet<ModelId> = self.b_store.get_id_list()?.into_iter().collect();

        for item in RecordReader::<R, RelationRecord>::new(input) {
            match item? {
                Record::Parsed(record) => {
                    let (a, b) = (ModelId::new(record.a), ModelId::new(record.b));
                    if a_ids.contains(&a) && b_ids.contains(&b) {
                        self.pairs.write().insert(a, b);
                        stats.imported += 1;
                    } else {
                        warn!("skipping pair ({}, {}) of {}: unknown instance", a, b, self.name);
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
            "imported {} pairs into {} ({} skipped)",
            stats.imported, self.name, stats.skipped
        );
        Ok(stats)
    }

    fn erase_a_model(&self, a: ModelId) -> StoreResult<()> {
        if self.a_policy == ErasePolicy::EraseModelWhenErasingRelation {
            let paired = self.pairs.read().by_a.contains_key(&a);
            if !paired {
                self.a_store.erase_id(a)?;
            }
        }
        self.a_store.do_automatic_cleanup(a)
    }

    fn erase_b_model(&self, b: ModelId) -> StoreResult<()> {
        if self.b_policy == ErasePolicy::EraseModelWhenErasingRelation {
            let paired = self.pairs.read().by_b.contains_key(&b);
            if !paired {
                self.b_store.erase_id(b)?;
            }
        }
        self.b_store.do_automatic_cleanup(b)
    }
}

impl<A: Model, B: Model> Lockable for RelationStore<A, B> {
    fn lock_cell(&self) -> &LockCell {
        &self.cell
    }
}

impl<A: Model, B: Model> RelationLink for RelationStore<A, B> {
    fn relation_id(&self) -> LockId {
        self.cell.id()
    }

    fn exists_on(&self, side: Side, id: ModelId) -> StoreResult<bool> {
        match side {
            Side::A => self.exists_a(id),
            Side::B => self.exists_b(id),
        }
    }

    fn erase_on(&self, side: Side, id: ModelId) -> StoreResult<()> {
        match side {
            Side::A => self.erase_a(id),
            Side::B => self.erase_b(id),
        }
    }

    fn clear(&self) -> StoreResult<()> {
        RelationStore::clear(self)
    }
}

impl<A: Model, B: Model> Persistent for RelationStore<A, B> {
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

impl<A: Model, B: Model> Drop for RelationStore<A, B> {
    fn drop(&mut self) {
        let id = self.cell.id();
        self.a_store.detach_relation_store(id);
        self.b_store.detach_relation_store(id);
    }
}
