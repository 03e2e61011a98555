//! Database facade.

use crate::config::Config;
use crate::error::{StoreError, StoreResult};
use crate::lock::{LockCoordinator, Transaction};
use crate::model::Model;
use crate::store::{ErasePolicy, ImportStats, ModelStore, Persistent, RelationStore};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A set of model and relation stores sharing one lock coordinator.
///
/// `Database` creates stores, saves them to and loads them from a directory
/// of JSON record files (one `<store name>.json` per store), and offers a
/// retry helper for operations that fail with a deadlock.
///
/// ```rust,ignore
/// let db = Database::new(Config::default());
/// let people = db.create_model_store::<Person>("people")?;
/// people.register_model(person_descriptor())?;
///
/// people.store(&Handle::new(Person::new("bob", 1)))?;
/// db.save(Path::new("data"))?;
/// ```
pub struct Database {
    coordinator: Arc<LockCoordinator>,
    models: RwLock<Vec<Arc<dyn Persistent>>>,
    relations: RwLock<Vec<Arc<dyn Persistent>>>,
}

impl Database {
    /// Creates an empty database.
    pub fn new(config: Config) -> Self {
        Self {
            coordinator: LockCoordinator::new(config),
            models: RwLock::new(Vec::new()),
            relations: RwLock::new(Vec::new()),
        }
    }

    /// Returns the lock coordinator shared by all stores.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<LockCoordinator> {
        &self.coordinator
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        self.coordinator.config()
    }

    /// Creates a model store. Store names must be unique within the database.
    pub fn create_model_store<T: Model>(&self, name: &str) -> StoreResult<Arc<ModelStore<T>>> {
        self.check_unused(name)?;
        let store = ModelStore::new(Arc::clone(&self.coordinator), name);
        self.models.write().push(Arc::clone(&store) as Arc<dyn Persistent>);
        debug!("created model store {}", name);
        Ok(store)
    }

    /// Creates a relation store between two model stores of this database.
    pub fn create_relation_store<A: Model, B: Model>(
        &self,
        name: &str,
        a_store: &Arc<ModelStore<A>>,
        a_policy: ErasePolicy,
        b_store: &Arc<ModelStore<B>>,
        b_policy: ErasePolicy,
    ) -> StoreResult<Arc<RelationStore<A, B>>> {
        self.check_unused(name)?;
        let relation = RelationStore::new(
            name,
            Arc::clone(a_store),
            a_policy,
            Arc::clone(b_store),
            b_policy,
        )?;
        self.relations
            .write()
            .push(Arc::clone(&relation) as Arc<dyn Persistent>);
        Ok(relation)
    }

    /// Returns the names of all stores, model stores first.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        let models = self.models.read();
        let relations = self.relations.read();
        models
            .iter()
            .chain(relations.iter())
            .map(|store| store.name().to_string())
            .collect()
    }

    /// Returns the calling thread's transaction, beginning one if needed.
    ///
    /// Store operations performed while the returned handle is alive join
    /// the transaction, so their locks are held until it is dropped.
    #[track_caller]
    pub fn transaction(&self) -> Arc<Transaction> {
        self.coordinator.begin()
    }

    /// Writes every store to `dir`, creating it if needed.
    ///
    /// All stores are locked for reading for the duration of the save.
    /// Returns the total number of records written.
    #[track_caller]
    pub fn save(&self, dir: &Path) -> StoreResult<usize> {
        fs::create_dir_all(dir)?;
        let stores = self.all_stores();
        let txn = self.coordinator.begin();
        for store in &stores {
            txn.get_shared_lock(store.as_ref())?;
        }

        let mut written = 0;
        for store in &stores {
            written += store.export_json(&store_path(dir, store.name()))?;
        }
        info!("saved {} records from {} stores to {:?}", written, stores.len(), dir);
        Ok(written)
    }

    /// Loads every store from `dir`; model stores first, then relation stores.
    ///
    /// Stores without a file in `dir` are left untouched. All stores are
    /// locked exclusively for the duration of the load.
    #[track_caller]
    pub fn load(&self, dir: &Path) -> StoreResult<ImportStats> {
        let stores = self.all_stores();
        let txn = self.coordinator.begin();
        for store in &stores {
            txn.get_exclusive_lock(store.as_ref())?;
        }

        let mut total = ImportStats::default();
        for store in &stores {
            let path = store_path(dir, store.name());
            if !path.exists() {
                debug!("no file for store {} in {:?}", store.name(), dir);
                continue;
            }
            let stats = store.import_json(&path)?;
            total.imported += stats.imported;
            total.skipped += stats.skipped;
        }
        info!(
            "loaded {} records from {:?} ({} skipped)",
            total.imported, dir, total.skipped
        );
        Ok(total)
    }

    /// Runs `operation`, retrying it while it fails with a deadlock.
    ///
    /// Retrying only helps if each attempt runs in a fresh transaction, so a
    /// call made while the thread already has a transaction runs once.
    pub fn retry_on_deadlock<R>(
        &self,
        attempts: usize,
        mut operation: impl FnMut() -> StoreResult<R>,
    ) -> StoreResult<R> {
        let nested = self.coordinator.current().is_some();
        let mut attempt = 1;
        loop {
            match operation() {
                Err(err) if err.is_deadlock() && !nested && attempt < attempts => {
                    warn!("attempt {} of {} deadlocked: {}", attempt, attempts, err);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn all_stores(&self) -> Vec<Arc<dyn Persistent>> {
        let models = self.models.read();
        let relations = self.relations.read();
        models.iter().chain(relations.iter()).cloned().collect()
    }

    fn check_unused(&self, name: &str) -> StoreResult<()> {
        if self.store_names().iter().any(|existing| existing == name) {
            return Err(StoreError::invalid_operation(format!(
                "a store named {name} already exists"
            )));
        }
        Ok(())
    }
}

fn store_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDescriptor, Handle, ModelDescriptor, Value, ValueType};
    use crate::types::{FieldId, LockId};
    use std::cell::Cell;

    const LABEL: FieldId = FieldId::new(1);

    #[derive(Default)]
    struct Tag {
        label: String,
    }

    impl Model for Tag {
        fn model_name(&self) -> &str {
            "tag"
        }
    }

    fn tag_store(db: &Database) -> Arc<ModelStore<Tag>> {
        let tags = db.create_model_store::<Tag>("tags").unwrap();
        tags.register_model(ModelDescriptor::new("tag", Tag::default).with_field(
            FieldDescriptor::new(
                LABEL,
                "label",
                ValueType::Text,
                |tag: &Tag| Value::from(tag.label.as_str()),
                |tag, value| {
                    tag.label = value.into_text()?;
                    Ok(())
                },
            ),
        ))
        .unwrap();
        tags.add_index(&[LABEL]).unwrap();
        tags
    }

    fn tag(label: &str) -> Handle<Tag> {
        Handle::new(Tag {
            label: label.to_string(),
        })
    }

    #[test]
    fn save_and_load_restore_every_store() {
        let dir = tempfile::tempdir().unwrap();

        let source = Database::new(Config::default());
        let tags = tag_store(&source);
        let links = source
            .create_relation_store("links", &tags, ErasePolicy::None, &tags, ErasePolicy::None)
            .unwrap();
        let red = tags.store(&tag("red")).unwrap();
        let blue = tags.store(&tag("blue")).unwrap();
        links.store(red, blue).unwrap();
        assert_eq!(source.save(dir.path()).unwrap(), 3);
        assert!(dir.path().join("tags.json").exists());
        assert!(dir.path().join("links.json").exists());

        let target = Database::new(Config::default());
        let loaded = tag_store(&target);
        let loaded_links = target
            .create_relation_store("links", &loaded, ErasePolicy::None, &loaded, ErasePolicy::None)
            .unwrap();
        let stats = target.load(dir.path()).unwrap();
        assert_eq!(stats.imported, 3);
        assert_eq!(stats.skipped, 0);

        let found = loaded.get(&[LABEL], "red").unwrap();
        assert_eq!(loaded.get_id(&found).unwrap(), red);
        assert_eq!(loaded_links.pairs().unwrap(), vec![(red, blue)]);
        assert_eq!(target.coordinator().active_transactions(), 0);
    }

    #[test]
    fn load_skips_stores_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(Config::default());
        let tags = tag_store(&db);
        tags.store(&tag("kept")).unwrap();

        let stats = db.load(dir.path()).unwrap();
        assert_eq!(stats, ImportStats::default());
        assert_eq!(tags.len().unwrap(), 1);
    }

    #[test]
    fn store_names_must_be_unique() {
        let db = Database::new(Config::default());
        let tags = db.create_model_store::<Tag>("tags").unwrap();
        assert!(db.create_model_store::<Tag>("tags").is_err());
        assert!(db
            .create_relation_store("tags", &tags, ErasePolicy::None, &tags, ErasePolicy::None)
            .is_err());
        db.create_relation_store("links", &tags, ErasePolicy::None, &tags, ErasePolicy::None)
            .unwrap();
        assert_eq!(db.store_names(), vec!["tags".to_string(), "links".to_string()]);
    }

    #[test]
    fn retry_stops_after_success() {
        let db = Database::new(Config::default());
        let calls = Cell::new(0);
        let result = db.retry_on_deadlock(5, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(StoreError::Deadlock {
                    resource: LockId::new(1),
                })
            } else {
                Ok(calls.get())
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn retry_gives_up_after_attempts() {
        let db = Database::new(Config::default());
        let calls = Cell::new(0);
        let result: StoreResult<()> = db.retry_on_deadlock(2, || {
            calls.set(calls.get() + 1);
            Err(StoreError::Deadlock {
                resource: LockId::new(1),
            })
        });
        assert!(result.unwrap_err().is_deadlock());
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn retry_inside_transaction_runs_once() {
        let db = Database::new(Config::default());
        let _txn = db.transaction();
        let calls = Cell::new(0);
        let result: StoreResult<()> = db.retry_on_deadlock(5, || {
            calls.set(calls.get() + 1);
            Err(StoreError::Deadlock {
                resource: LockId::new(1),
            })
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let db = Database::new(Config::default());
        let calls = Cell::new(0);
        let result: StoreResult<()> = db.retry_on_deadlock(5, || {
            calls.set(calls.get() + 1);
            Err(StoreError::WrongThread)
        });
        assert!(matches!(result, Err(StoreError::WrongThread)));
        assert_eq!(calls.get(), 1);
    }
}
