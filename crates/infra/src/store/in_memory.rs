use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use stockyard_core::{DomainError, MaterialCostId, ProjectId, Quantity};
use stockyard_invoicing::{
    CorrectionRecord, DefectRecord, DocumentId, InvoiceDocument, format_delivery_code,
};
use stockyard_ledger::{
    LedgerKey, LedgerSnapshot, Location, LockScope, SerialKey, SerialNumber,
};

use super::lock_table::LockTable;
use super::r#trait::{ChangeSet, DocumentFilter, InventoryStore, LockedState, StoreError, UnitOfWork};

#[derive(Debug, Default)]
struct State {
    amounts: HashMap<LedgerKey, Quantity>,
    serials: HashMap<SerialKey, SerialNumber>,
    documents: HashMap<DocumentId, InvoiceDocument>,
    /// Creation order.
    document_order: Vec<DocumentId>,
    codes: HashMap<(ProjectId, String), DocumentId>,
    counters: HashMap<(ProjectId, String), u64>,
    corrections: Vec<CorrectionRecord>,
    defects: BTreeMap<LedgerKey, Quantity>,
}

impl State {
    fn snapshot(&self, scope: &LockScope) -> LockedState {
        let mut ledger = LedgerSnapshot::default();
        for key in &scope.entries {
            let amount = self.amounts.get(key).copied().unwrap_or(Quantity::ZERO);
            ledger.amounts.insert(*key, amount);
        }
        for key in &scope.serials {
            ledger.serials.insert(key.clone(), self.serials.get(key).cloned());
        }
        let document = scope
            .document
            .and_then(|id| self.documents.get(&DocumentId::new(id)).cloned());
        LockedState { ledger, document }
    }

    fn apply(&mut self, changes: &ChangeSet) {
        for (key, amount) in &changes.ledger.amounts {
            self.amounts.insert(*key, *amount);
        }
        for key in &changes.ledger.removed_serials {
            self.serials.remove(key);
        }
        for serial in &changes.ledger.serials {
            self.serials.insert(serial.key(), serial.clone());
        }
        if let Some(doc) = &changes.document {
            self.documents.insert(doc.id_typed(), doc.clone());
        }
        self.corrections.extend(changes.corrections.iter().cloned());
        for defect in &changes.defects {
            let tally = self.defects.entry(defect.key).or_insert(Quantity::ZERO);
            *tally = tally.saturating_add(defect.quantity);
        }
    }

    fn next_counter(&mut self, project_id: ProjectId, counter: &str, count: u64) -> u64 {
        let next = self
            .counters
            .entry((project_id, counter.to_string()))
            .or_insert(0);
        let first = *next + 1;
        *next += count;
        first
    }
}

/// In-memory inventory store.
///
/// Intended for tests, dev and single-process deployments. Writers serialise
/// per key through a [`LockTable`]; the data tables sit behind one
/// `std::sync::RwLock` that is only held for short, non-async sections.
#[derive(Debug)]
pub struct InMemoryInventoryStore {
    state: RwLock<State>,
    locks: LockTable,
    lock_timeout: Duration,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(2000))
    }
}

impl InMemoryInventoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            locks: LockTable::new(),
            lock_timeout,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("read", "state lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("write", "state lock poisoned"))
    }

    /// Snapshot, run and apply one unit of work. Caller holds the scope's locks.
    fn run_locked(&self, scope: &LockScope, work: UnitOfWork) -> Result<ChangeSet, StoreError> {
        let locked = self.read()?.snapshot(scope);
        let changes = work(&locked)?;
        changes.check_scope(scope)?;
        self.write()?.apply(&changes);
        Ok(changes)
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn amount(&self, key: &LedgerKey) -> Result<Quantity, StoreError> {
        Ok(self.read()?.amounts.get(key).copied().unwrap_or(Quantity::ZERO))
    }

    async fn entries_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError> {
        let state = self.read()?;
        let mut entries: Vec<_> = state
            .amounts
            .iter()
            .filter(|(k, q)| k.project_id == project_id && k.location == location && !q.is_zero())
            .map(|(k, q)| (*k, *q))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        Ok(entries)
    }

    async fn entries_for_cost(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError> {
        let state = self.read()?;
        let mut entries: Vec<_> = state
            .amounts
            .iter()
            .filter(|(k, _)| k.project_id == project_id && k.material_cost_id == material_cost_id)
            .map(|(k, q)| (*k, *q))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        Ok(entries)
    }

    async fn serial(&self, key: &SerialKey) -> Result<Option<SerialNumber>, StoreError> {
        Ok(self.read()?.serials.get(key).cloned())
    }

    async fn serials_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<SerialNumber>, StoreError> {
        let state = self.read()?;
        let mut serials: Vec<_> = state
            .serials
            .values()
            .filter(|s| s.project_id == project_id && s.location == location && !s.is_written_off())
            .cloned()
            .collect();
        serials.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(serials)
    }

    async fn document(&self, id: DocumentId) -> Result<Option<InvoiceDocument>, StoreError> {
        Ok(self.read()?.documents.get(&id).cloned())
    }

    async fn document_by_code(
        &self,
        project_id: ProjectId,
        delivery_code: &str,
    ) -> Result<Option<InvoiceDocument>, StoreError> {
        let state = self.read()?;
        Ok(state
            .codes
            .get(&(project_id, delivery_code.to_string()))
            .and_then(|id| state.documents.get(id))
            .filter(|doc| DocumentFilter::default().matches(doc))
            .cloned())
    }

    async fn documents(
        &self,
        project_id: ProjectId,
        filter: &DocumentFilter,
    ) -> Result<Vec<InvoiceDocument>, StoreError> {
        let state = self.read()?;
        Ok(state
            .document_order
            .iter()
            .filter_map(|id| state.documents.get(id))
            .filter(|doc| doc.project_id() == Some(project_id) && filter.matches(doc))
            .cloned()
            .collect())
    }

    async fn corrections(&self, project_id: ProjectId) -> Result<Vec<CorrectionRecord>, StoreError> {
        Ok(self
            .read()?
            .corrections
            .iter()
            .filter(|c| c.project_id() == project_id)
            .cloned()
            .collect())
    }

    async fn defects_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<DefectRecord>, StoreError> {
        Ok(self
            .read()?
            .defects
            .iter()
            .filter(|(k, _)| k.project_id == project_id && k.location == location)
            .map(|(k, q)| DefectRecord {
                key: *k,
                quantity: *q,
            })
            .collect())
    }

    async fn next_delivery_code(
        &self,
        project_id: ProjectId,
        prefix: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.write()?;
        loop {
            let n = state.next_counter(project_id, prefix, 1);
            let code = format_delivery_code(prefix, n);
            if !state.codes.contains_key(&(project_id, code.clone())) {
                return Ok(code);
            }
        }
    }

    async fn reserve_sequence(
        &self,
        project_id: ProjectId,
        counter: &str,
        count: u64,
    ) -> Result<u64, StoreError> {
        Ok(self.write()?.next_counter(project_id, counter, count))
    }

    #[instrument(skip(self, doc), fields(document_id = %doc.id_typed(), delivery_code = doc.delivery_code()), err)]
    async fn insert_document(&self, doc: &InvoiceDocument) -> Result<(), StoreError> {
        let project_id = doc
            .project_id()
            .ok_or_else(|| DomainError::invariant("document has no project"))?;
        let mut state = self.write()?;
        if state.documents.contains_key(&doc.id_typed()) {
            return Err(DomainError::conflict(format!("document {} already exists", doc.id_typed())).into());
        }
        let code_key = (project_id, doc.delivery_code().to_string());
        if state.codes.contains_key(&code_key) {
            return Err(DomainError::conflict(format!(
                "delivery code {} is already used in project {project_id}",
                doc.delivery_code()
            ))
            .into());
        }
        state.codes.insert(code_key, doc.id_typed());
        state.document_order.push(doc.id_typed());
        state.documents.insert(doc.id_typed(), doc.clone());
        Ok(())
    }

    #[instrument(skip(self, scope, work), fields(keys = scope.entries.len(), serials = scope.serials.len()), err)]
    async fn transact(&self, scope: LockScope, work: UnitOfWork) -> Result<ChangeSet, StoreError> {
        let order = scope.lock_order();
        let result = match self.locks.acquire(&order, self.lock_timeout).await {
            Ok(guards) => {
                let result = self.run_locked(&scope, work);
                drop(guards);
                result
            }
            Err(e) => {
                warn!(error = %e, "lock acquisition failed");
                Err(e.into())
            }
        };
        // On every path: a failed unit must not leave its keys in the table.
        self.locks.prune();
        let changes = result?;

        debug!(
            entries = changes.ledger.amounts.len(),
            serials = changes.ledger.serials.len(),
            "unit of work committed"
        );
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_core::{AggregateId, LocationId};

    fn key(project: ProjectId) -> LedgerKey {
        LedgerKey::new(project, MaterialCostId::new(), Location::warehouse(LocationId::new()))
    }

    #[tokio::test]
    async fn failed_work_commits_nothing() {
        let store = InMemoryInventoryStore::default();
        let project = ProjectId::new();
        let k = key(project);

        let scope = LockScope::new().with_entry(k);
        let err = store
            .transact(
                scope,
                Box::new(move |_: &LockedState| Err(DomainError::validation("nope"))),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Validation(_))));
        assert_eq!(store.amount(&k).await.unwrap(), Quantity::ZERO);
    }

    #[tokio::test]
    async fn writes_outside_scope_are_rejected() {
        let store = InMemoryInventoryStore::default();
        let project = ProjectId::new();
        let locked = key(project);
        let unlocked = key(project);

        let err = store
            .transact(
                LockScope::new().with_entry(locked),
                Box::new(move |_: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut changes = ChangeSet::default();
                    changes
                        .ledger
                        .amounts
                        .insert(unlocked, Quantity::from_units(1));
                    Ok(changes)
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InvariantViolation(_))
        ));
        assert_eq!(store.amount(&unlocked).await.unwrap(), Quantity::ZERO);
    }

    #[tokio::test]
    async fn held_scope_makes_others_busy() {
        let store = std::sync::Arc::new(InMemoryInventoryStore::new(Duration::from_millis(30)));
        let doc = AggregateId::new();
        let order = LockScope::for_document(doc).lock_order();
        let held = store.locks.acquire(&order, Duration::from_millis(30)).await.unwrap();

        let err = store
            .transact(LockScope::for_document(doc), Box::new(|_: &LockedState| Ok(ChangeSet::default())))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Busy(_))));
        drop(held);
    }

    #[tokio::test]
    async fn failed_units_leave_no_lock_entries() {
        let store = InMemoryInventoryStore::new(Duration::from_millis(30));
        let project = ProjectId::new();
        let k = key(project);

        store
            .transact(
                LockScope::new().with_entry(k),
                Box::new(move |_: &LockedState| Err(DomainError::validation("nope"))),
            )
            .await
            .unwrap_err();
        assert!(store.locks.is_empty());

        let stray = key(project);
        store
            .transact(
                LockScope::new().with_entry(k),
                Box::new(move |_: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut changes = ChangeSet::default();
                    changes.ledger.amounts.insert(stray, Quantity::from_units(1));
                    Ok(changes)
                }),
            )
            .await
            .unwrap_err();
        assert!(store.locks.is_empty());

        let doc = AggregateId::new();
        let held = store
            .locks
            .acquire(&LockScope::for_document(doc).lock_order(), Duration::from_millis(30))
            .await
            .unwrap();
        let err = store
            .transact(
                LockScope::for_document(doc).with_entry(k),
                Box::new(|_: &LockedState| Ok(ChangeSet::default())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::Busy(_))));
        assert_eq!(store.locks.len(), 1);

        drop(held);
        store
            .transact(LockScope::for_document(doc), Box::new(|_: &LockedState| Ok(ChangeSet::default())))
            .await
            .unwrap();
        assert!(store.locks.is_empty());
    }

    #[tokio::test]
    async fn delivery_codes_skip_explicitly_used_ones() {
        let store = InMemoryInventoryStore::default();
        let project = ProjectId::new();
        store
            .write()
            .unwrap()
            .codes
            .insert((project, "IN-00001".into()), DocumentId::generate());

        assert_eq!(
            store.next_delivery_code(project, "IN").await.unwrap(),
            "IN-00002"
        );
        assert_eq!(
            store.next_delivery_code(project, "IN").await.unwrap(),
            "IN-00003"
        );
        assert_eq!(
            store.next_delivery_code(ProjectId::new(), "IN").await.unwrap(),
            "IN-00001"
        );
    }

    #[tokio::test]
    async fn sequences_are_reserved_in_blocks() {
        let store = InMemoryInventoryStore::default();
        let project = ProjectId::new();
        assert_eq!(store.reserve_sequence(project, "serial", 3).await.unwrap(), 1);
        assert_eq!(store.reserve_sequence(project, "serial", 2).await.unwrap(), 4);
    }
}
