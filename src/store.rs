//! Repository abstraction and the in-memory document store.
//!
//! The service layer only talks to the [`Store`] and [`Repository`]
//! traits.  [`DocumentStore`] is the implementation shipped with the
//! engine: one collection per entity, each behind its own lock, with a
//! unique-key index.  The whole store can be written to and reloaded
//! from a JSON snapshot file.

use crate::error::{PayrollError, PayrollResult};
use crate::models::{Department, Employee, Id, Salary, Stored};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// A record type the store can hold.
pub trait Document: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Partial update applied by [`Repository::update`].
    type Patch: Send + Sync;
    /// Query used by [`Repository::find_many`].
    type Filter: Send + Sync;

    const COLLECTION: &'static str;

    /// Value that must be unique across the collection.
    fn unique_key(&self) -> String;

    /// Normalise derived fields and validate.  Runs before every write.
    fn prepare(&mut self) -> PayrollResult<()>;

    fn apply(&mut self, patch: &Self::Patch);

    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// Capability set over one collection.  Every method is atomic for the
/// records it touches.
pub trait Repository<T: Document>: Send + Sync {
    /// Validate and insert a new record.  The store allocates the id.
    fn insert(&self, doc: T) -> PayrollResult<Stored<T>>;

    fn find_by_id(&self, id: Id) -> PayrollResult<Option<Stored<T>>>;

    /// Matching records, oldest first.
    fn find_many(&self, filter: &T::Filter) -> PayrollResult<Vec<Stored<T>>>;

    fn count(&self, filter: &T::Filter) -> PayrollResult<usize>;

    /// Apply `patch` to one record, re-validate and persist it.
    fn update(&self, id: Id, patch: &T::Patch) -> PayrollResult<Stored<T>>;

    /// Apply `patch` to every matching record.  Either all of them are
    /// written or, if any fails validation or the unique-key check, none.
    fn update_many(&self, filter: &T::Filter, patch: &T::Patch) -> PayrollResult<Vec<Stored<T>>>;

    fn delete(&self, id: Id) -> PayrollResult<()>;
}

/// The three collections the payroll service works with.
pub trait Store: Send + Sync {
    fn departments(&self) -> &dyn Repository<Department>;
    fn employees(&self) -> &dyn Repository<Employee>;
    fn salaries(&self) -> &dyn Repository<Salary>;
}

// ── Collection ──────────────────────────────────────────────────────

struct Inner<T> {
    docs: BTreeMap<Id, Stored<T>>,
    /// unique key -> owning record
    keys: HashMap<String, Id>,
}

/// One in-memory collection of `T`.
pub struct Collection<T> {
    inner: RwLock<Inner<T>>,
}

impl<T: Document> Default for Collection<T> {
    fn default() -> Self {
        Collection {
            inner: RwLock::new(Inner {
                docs: BTreeMap::new(),
                keys: HashMap::new(),
            }),
        }
    }
}

impl<T: Document> Collection<T> {
    /// Build a collection from previously stored records, rebuilding the
    /// unique-key index.  Each record goes through [`Document::prepare`]
    /// so derived fields are recomputed rather than trusted.
    pub fn from_records(records: Vec<Stored<T>>) -> PayrollResult<Self> {
        let mut docs = BTreeMap::new();
        let mut keys = HashMap::new();
        for mut record in records {
            record.doc.prepare()?;
            let key = record.doc.unique_key();
            if keys.insert(key.clone(), record.id).is_some() {
                return Err(duplicate::<T>(&key));
            }
            docs.insert(record.id, record);
        }
        Ok(Collection {
            inner: RwLock::new(Inner { docs, keys }),
        })
    }

    pub fn records(&self) -> PayrollResult<Vec<Stored<T>>> {
        let inner = self.read()?;
        Ok(sorted(inner.docs.values().cloned().collect()))
    }

    fn read(&self) -> PayrollResult<RwLockReadGuard<'_, Inner<T>>> {
        self.inner
            .read()
            .map_err(|_| PayrollError::Storage(format!("{} lock poisoned", T::COLLECTION)))
    }

    fn write(&self) -> PayrollResult<RwLockWriteGuard<'_, Inner<T>>> {
        self.inner
            .write()
            .map_err(|_| PayrollError::Storage(format!("{} lock poisoned", T::COLLECTION)))
    }
}

fn duplicate<T: Document>(key: &str) -> PayrollError {
    PayrollError::DuplicateKey(format!("{} already contains '{}'", T::COLLECTION, key))
}

fn not_found<T: Document>(id: Id) -> PayrollError {
    PayrollError::NotFound(format!("{} record '{}' not found", T::COLLECTION, id))
}

fn sorted<T>(mut records: Vec<Stored<T>>) -> Vec<Stored<T>> {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    records
}

impl<T: Document> Repository<T> for Collection<T> {
    fn insert(&self, mut doc: T) -> PayrollResult<Stored<T>> {
        doc.prepare()?;
        let key = doc.unique_key();

        let mut inner = self.write()?;
        if inner.keys.contains_key(&key) {
            return Err(duplicate::<T>(&key));
        }
        let now = Utc::now();
        let record = Stored {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            doc,
        };
        inner.keys.insert(key, record.id);
        inner.docs.insert(record.id, record.clone());
        debug!(collection = T::COLLECTION, id = %record.id, "inserted");
        Ok(record)
    }

    fn find_by_id(&self, id: Id) -> PayrollResult<Option<Stored<T>>> {
        Ok(self.read()?.docs.get(&id).cloned())
    }

    fn find_many(&self, filter: &T::Filter) -> PayrollResult<Vec<Stored<T>>> {
        let inner = self.read()?;
        let matched = inner
            .docs
            .values()
            .filter(|r| r.doc.matches(filter))
            .cloned()
            .collect();
        Ok(sorted(matched))
    }

    fn count(&self, filter: &T::Filter) -> PayrollResult<usize> {
        let inner = self.read()?;
        Ok(inner.docs.values().filter(|r| r.doc.matches(filter)).count())
    }

    fn update(&self, id: Id, patch: &T::Patch) -> PayrollResult<Stored<T>> {
        let mut inner = self.write()?;
        let current = inner.docs.get(&id).ok_or_else(|| not_found::<T>(id))?;

        let old_key = current.doc.unique_key();
        let mut doc = current.doc.clone();
        doc.apply(patch);
        doc.prepare()?;
        let new_key = doc.unique_key();
        if new_key != old_key {
            if inner.keys.contains_key(&new_key) {
                return Err(duplicate::<T>(&new_key));
            }
            inner.keys.remove(&old_key);
            inner.keys.insert(new_key, id);
        }

        let record = inner.docs.get_mut(&id).ok_or_else(|| not_found::<T>(id))?;
        record.doc = doc;
        record.updated_at = Utc::now();
        debug!(collection = T::COLLECTION, %id, "updated");
        Ok(record.clone())
    }

    fn update_many(&self, filter: &T::Filter, patch: &T::Patch) -> PayrollResult<Vec<Stored<T>>> {
        let mut inner = self.write()?;

        let mut staged = Vec::new();
        for record in inner.docs.values().filter(|r| r.doc.matches(filter)) {
            let mut doc = record.doc.clone();
            doc.apply(patch);
            doc.prepare()?;
            staged.push((record.id, record.doc.unique_key(), doc));
        }

        let mut keys = inner.keys.clone();
        for (_, old_key, _) in &staged {
            keys.remove(old_key);
        }
        for (id, _, doc) in &staged {
            let key = doc.unique_key();
            if keys.insert(key.clone(), *id).is_some() {
                return Err(duplicate::<T>(&key));
            }
        }

        let now = Utc::now();
        let mut updated = Vec::with_capacity(staged.len());
        for (id, _, doc) in staged {
            if let Some(record) = inner.docs.get_mut(&id) {
                record.doc = doc;
                record.updated_at = now;
                updated.push(record.clone());
            }
        }
        inner.keys = keys;
        debug!(collection = T::COLLECTION, count = updated.len(), "batch updated");
        Ok(sorted(updated))
    }

    fn delete(&self, id: Id) -> PayrollResult<()> {
        let mut inner = self.write()?;
        let record = inner.docs.remove(&id).ok_or_else(|| not_found::<T>(id))?;
        inner.keys.remove(&record.doc.unique_key());
        debug!(collection = T::COLLECTION, %id, "deleted");
        Ok(())
    }
}

// ── DocumentStore ───────────────────────────────────────────────────

/// Serialised form of a [`DocumentStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub departments: Vec<Stored<Department>>,
    #[serde(default)]
    pub employees: Vec<Stored<Employee>>,
    #[serde(default)]
    pub salaries: Vec<Stored<Salary>>,
}

#[derive(Default)]
pub struct DocumentStore {
    departments: Collection<Department>,
    employees: Collection<Employee>,
    salaries: Collection<Salary>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: Snapshot) -> PayrollResult<Self> {
        Ok(DocumentStore {
            departments: Collection::from_records(snapshot.departments)?,
            employees: Collection::from_records(snapshot.employees)?,
            salaries: Collection::from_records(snapshot.salaries)?,
        })
    }

    /// Copy of every record.  Collections are read one after another, so
    /// the snapshot is consistent per collection only.
    pub fn snapshot(&self) -> PayrollResult<Snapshot> {
        Ok(Snapshot {
            departments: self.departments.records()?,
            employees: self.employees.records()?,
            salaries: self.salaries.records()?,
        })
    }

    /// Load a store from a JSON snapshot file.  A missing file yields an
    /// empty store.
    pub fn load(path: &Path) -> PayrollResult<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(Self::new());
        }
        let data = std::fs::read(path)
            .map_err(|e| PayrollError::Storage(format!("reading {}: {e}", path.display())))?;
        let snapshot: Snapshot = serde_json::from_slice(&data)
            .map_err(|e| PayrollError::Storage(format!("parsing {}: {e}", path.display())))?;
        info!(
            path = %path.display(),
            departments = snapshot.departments.len(),
            employees = snapshot.employees.len(),
            salaries = snapshot.salaries.len(),
            "snapshot loaded"
        );
        Self::from_snapshot(snapshot)
    }

    /// Write the store to `path`, replacing the file atomically.
    pub fn save(&self, path: &Path) -> PayrollResult<()> {
        let snapshot = self.snapshot()?;
        let data = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| PayrollError::Internal(e.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)
            .and_then(|_| std::fs::rename(&tmp, path))
            .map_err(|e| PayrollError::Storage(format!("writing {}: {e}", path.display())))?;
        info!(path = %path.display(), "snapshot saved");
        Ok(())
    }
}

impl Store for DocumentStore {
    fn departments(&self) -> &dyn Repository<Department> {
        &self.departments
    }

    fn employees(&self) -> &dyn Repository<Employee> {
        &self.employees
    }

    fn salaries(&self) -> &dyn Repository<Salary> {
        &self.salaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        DepartmentFilter, DepartmentPatch, Month, PaymentStatus, SalaryFilter, SalaryPatch,
    };

    fn department(code: &str) -> Department {
        Department {
            code: code.into(),
            name: format!("{code} department"),
            base_gross_salary: 1000.0,
        }
    }

    fn salary(employee: Id, month: Month, gross: f64) -> Salary {
        Salary {
            employee,
            gross_salary: gross,
            total_deduction: 0.0,
            net_salary: 0.0,
            month,
            year: 2024,
            status: PaymentStatus::Pending,
            payment_date: None,
        }
    }

    #[test]
    fn insert_allocates_id_and_timestamps() {
        let repo = Collection::<Department>::default();
        let stored = repo.insert(department("ENG")).unwrap();
        assert_eq!(stored.created_at, stored.updated_at);
        assert_eq!(repo.find_by_id(stored.id).unwrap().unwrap(), stored);
        assert!(repo.find_by_id(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn duplicate_code_is_rejected() {
        let repo = Collection::<Department>::default();
        repo.insert(department("ENG")).unwrap();
        let err = repo.insert(department("ENG")).unwrap_err();
        assert!(matches!(err, PayrollError::DuplicateKey(_)));
        assert_eq!(repo.count(&DepartmentFilter::default()).unwrap(), 1);
    }

    #[test]
    fn duplicate_salary_period_is_rejected() {
        let repo = Collection::<Salary>::default();
        let employee = Uuid::new_v4();
        repo.insert(salary(employee, Month::March, 100.0)).unwrap();
        let err = repo.insert(salary(employee, Month::March, 200.0)).unwrap_err();
        assert!(matches!(err, PayrollError::DuplicateKey(_)));
        repo.insert(salary(employee, Month::April, 200.0)).unwrap();
        repo.insert(salary(Uuid::new_v4(), Month::March, 200.0)).unwrap();
    }

    #[test]
    fn update_checks_uniqueness_against_other_records_only() {
        let repo = Collection::<Department>::default();
        let eng = repo.insert(department("ENG")).unwrap();
        repo.insert(department("OPS")).unwrap();

        let same_code = DepartmentPatch {
            code: Some("ENG".into()),
            name: Some("Engineering".into()),
            ..Default::default()
        };
        let updated = repo.update(eng.id, &same_code).unwrap();
        assert_eq!(updated.doc.name, "Engineering");
        assert!(updated.updated_at >= eng.updated_at);

        let clash = DepartmentPatch {
            code: Some("OPS".into()),
            ..Default::default()
        };
        assert!(matches!(repo.update(eng.id, &clash), Err(PayrollError::DuplicateKey(_))));

        let rename = DepartmentPatch {
            code: Some("RND".into()),
            ..Default::default()
        };
        repo.update(eng.id, &rename).unwrap();
        // the old code is free again
        repo.insert(department("ENG")).unwrap();
    }

    #[test]
    fn update_and_delete_unknown_id() {
        let repo = Collection::<Department>::default();
        let id = Uuid::new_v4();
        assert!(matches!(
            repo.update(id, &DepartmentPatch::default()),
            Err(PayrollError::NotFound(_))
        ));
        assert!(matches!(repo.delete(id), Err(PayrollError::NotFound(_))));
    }

    #[test]
    fn failed_update_leaves_record_untouched() {
        let repo = Collection::<Salary>::default();
        let stored = repo.insert(salary(Uuid::new_v4(), Month::May, 100.0)).unwrap();
        let patch = SalaryPatch {
            total_deduction: Some(150.0),
            ..Default::default()
        };
        assert!(matches!(
            repo.update(stored.id, &patch),
            Err(PayrollError::InvalidDeduction(_))
        ));
        assert_eq!(repo.find_by_id(stored.id).unwrap().unwrap(), stored);
    }

    #[test]
    fn update_many_is_all_or_nothing() {
        let repo = Collection::<Salary>::default();
        let small = repo.insert(salary(Uuid::new_v4(), Month::May, 200.0)).unwrap();
        repo.insert(salary(Uuid::new_v4(), Month::May, 500.0)).unwrap();

        let patch = SalaryPatch {
            total_deduction: Some(300.0),
            ..Default::default()
        };
        let filter = SalaryFilter {
            month: Some(Month::May),
            ..Default::default()
        };
        assert!(repo.update_many(&filter, &patch).is_err());
        let unchanged = repo.find_by_id(small.id).unwrap().unwrap();
        assert_eq!(unchanged.doc.total_deduction, 0.0);

        let patch = SalaryPatch {
            total_deduction: Some(50.0),
            ..Default::default()
        };
        let updated = repo.update_many(&filter, &patch).unwrap();
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|r| r.doc.net_salary == r.doc.gross_salary - 50.0));
    }

    #[test]
    fn find_many_filters_and_orders_by_creation() {
        let repo = Collection::<Salary>::default();
        let employee = Uuid::new_v4();
        let first = repo.insert(salary(employee, Month::January, 1.0)).unwrap();
        let second = repo.insert(salary(employee, Month::February, 2.0)).unwrap();
        repo.insert(salary(Uuid::new_v4(), Month::January, 3.0)).unwrap();

        let mine = repo
            .find_many(&SalaryFilter {
                employee: Some(employee),
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<Id> = mine.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[test]
    fn snapshot_round_trip_through_file() {
        let store = DocumentStore::new();
        let eng = store.departments().insert(department("ENG")).unwrap();
        store
            .salaries()
            .insert(salary(Uuid::new_v4(), Month::June, 10.0))
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payroll.json");
        store.save(&path).unwrap();

        let reloaded = DocumentStore::load(&path).unwrap();
        assert_eq!(reloaded.departments().find_by_id(eng.id).unwrap().unwrap(), eng);
        assert_eq!(reloaded.salaries().count(&SalaryFilter::default()).unwrap(), 1);
        // the unique index is rebuilt on load
        assert!(matches!(
            reloaded.departments().insert(department("ENG")),
            Err(PayrollError::DuplicateKey(_))
        ));
    }

    #[test]
    fn missing_snapshot_file_gives_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(store.departments().count(&DepartmentFilter::default()).unwrap(), 0);
    }

    #[test]
    fn loaded_records_have_derived_fields_recomputed() {
        let now = Utc::now();
        let mut stale = salary(Uuid::new_v4(), Month::June, 1000.0);
        stale.total_deduction = 100.0;
        stale.net_salary = 5000.0;
        let snapshot = Snapshot {
            salaries: vec![Stored {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                doc: stale,
            }],
            ..Default::default()
        };

        let store = DocumentStore::from_snapshot(snapshot).unwrap();
        let loaded = store.salaries().find_many(&SalaryFilter::default()).unwrap();
        assert_eq!(loaded[0].doc.net_salary, 900.0);
    }

    #[test]
    fn invalid_snapshot_record_is_rejected() {
        let now = Utc::now();
        let mut broken = salary(Uuid::new_v4(), Month::June, 100.0);
        broken.total_deduction = 200.0;
        let snapshot = Snapshot {
            salaries: vec![Stored {
                id: Uuid::new_v4(),
                created_at: now,
                updated_at: now,
                doc: broken,
            }],
            ..Default::default()
        };
        assert!(matches!(
            DocumentStore::from_snapshot(snapshot),
            Err(PayrollError::InvalidDeduction(_))
        ));
    }
}
