use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockyard_core::{DomainError, MaterialCostId, ProjectId, Quantity};
use stockyard_invoicing::{
    CorrectionRecord, DefectRecord, DocumentId, DocumentKind, DocumentStatus, InvoiceDocument,
};
use stockyard_ledger::{
    LedgerChanges, LedgerKey, LedgerSnapshot, Location, LockScope, SerialKey, SerialNumber,
};

/// Storage operation error.
///
/// Domain failures raised inside a unit of work (and `Busy`/`Conflict` raised
/// by the store itself) travel as `Domain`. The other variants are
/// infrastructure failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("storage backend failure in {operation}: {message}")]
    Backend { operation: String, message: String },

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// What a unit of work sees once its locks are held.
#[derive(Debug, Clone, Default)]
pub struct LockedState {
    pub ledger: LedgerSnapshot,
    /// The scope's document, if the scope names one and it exists.
    pub document: Option<InvoiceDocument>,
}

/// Everything a unit of work wants written, atomically.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub ledger: LedgerChanges,
    /// New state of the scope's document.
    pub document: Option<InvoiceDocument>,
    pub corrections: Vec<CorrectionRecord>,
    pub defects: Vec<DefectRecord>,
}

impl ChangeSet {
    /// Reject writes outside the locked scope.
    pub fn check_scope(&self, scope: &LockScope) -> Result<(), DomainError> {
        for key in self.ledger.amounts.keys() {
            if !scope.entries.contains(key) {
                return Err(DomainError::invariant(format!(
                    "write to unlocked ledger entry {key}"
                )));
            }
        }
        for serial in &self.ledger.serials {
            if !scope.serials.contains(&serial.key()) {
                return Err(DomainError::invariant(format!(
                    "write to unlocked serial {}",
                    serial.key()
                )));
            }
        }
        for key in &self.ledger.removed_serials {
            if !scope.serials.contains(key) {
                return Err(DomainError::invariant(format!(
                    "removal of unlocked serial {key}"
                )));
            }
        }
        if let Some(doc) = &self.document {
            if scope.document != Some(doc.id_typed().0) {
                return Err(DomainError::invariant(format!(
                    "write to unlocked document {}",
                    doc.id_typed()
                )));
            }
        }
        for record in &self.corrections {
            if !scope.entries.contains(&record.key) {
                return Err(DomainError::invariant(format!(
                    "correction for unlocked ledger entry {}",
                    record.key
                )));
            }
        }
        Ok(())
    }
}

/// A unit of work: pure function from locked state to changes.
///
/// It runs while the store holds every lock of its scope, so it must not block.
pub type UnitOfWork = Box<dyn FnOnce(&LockedState) -> Result<ChangeSet, DomainError> + Send>;

/// Listing filter for documents. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    pub kind: Option<DocumentKind>,
    pub status: Option<DocumentStatus>,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &InvoiceDocument) -> bool {
        doc.status() != DocumentStatus::Deleted
            && self.kind.is_none_or(|k| doc.kind() == k)
            && self.status.is_none_or(|s| doc.status() == s)
    }
}

/// Transactional store for the ledger, the serial registry and documents.
///
/// ## Reads
///
/// Reads are lock-free and may observe a state that is about to change. They
/// are fine for display and pre-checks; anything that mutates must go through
/// [`InventoryStore::transact`], which re-reads under lock.
///
/// ## Writes
///
/// `transact()`:
/// - acquires every key of the scope in [`LockScope::lock_order`] order, giving
///   up with `DomainError::Busy` once the configured timeout elapses
/// - loads a snapshot of exactly those keys (missing entries read as zero,
///   missing serials as `None`)
/// - runs the unit of work
/// - writes the change set atomically, or nothing at all if the work failed
///
/// Once the change set is being written the operation is not cancellable.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Amount at one ledger entry (zero when the entry was never touched).
    async fn amount(&self, key: &LedgerKey) -> Result<Quantity, StoreError>;

    /// Non-zero entries at a location.
    async fn entries_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError>;

    /// Every entry (any location, any amount) of one material cost in a project.
    async fn entries_for_cost(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError>;

    async fn serial(&self, key: &SerialKey) -> Result<Option<SerialNumber>, StoreError>;

    /// Live (not written-off) serials resident at a location.
    async fn serials_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<SerialNumber>, StoreError>;

    /// Any document, deleted drafts included.
    async fn document(&self, id: DocumentId) -> Result<Option<InvoiceDocument>, StoreError>;

    /// Live document with a given delivery code.
    async fn document_by_code(
        &self,
        project_id: ProjectId,
        delivery_code: &str,
    ) -> Result<Option<InvoiceDocument>, StoreError>;

    /// Documents in creation order.
    async fn documents(
        &self,
        project_id: ProjectId,
        filter: &DocumentFilter,
    ) -> Result<Vec<InvoiceDocument>, StoreError>;

    /// Corrections in the order they were applied.
    async fn corrections(&self, project_id: ProjectId) -> Result<Vec<CorrectionRecord>, StoreError>;

    /// Defective quantity received per material cost at a location.
    async fn defects_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<DefectRecord>, StoreError>;

    /// Next unused `<prefix>-<NNNNN>` code for the project.
    async fn next_delivery_code(
        &self,
        project_id: ProjectId,
        prefix: &str,
    ) -> Result<String, StoreError>;

    /// Reserve `count` consecutive numbers from a named per-project counter.
    /// Returns the first one.
    async fn reserve_sequence(
        &self,
        project_id: ProjectId,
        counter: &str,
        count: u64,
    ) -> Result<u64, StoreError>;

    /// Persist a new draft. `Conflict` if the id or the delivery code is taken.
    async fn insert_document(&self, doc: &InvoiceDocument) -> Result<(), StoreError>;

    /// Run `work` under the locks of `scope` and commit what it returns.
    async fn transact(&self, scope: LockScope, work: UnitOfWork) -> Result<ChangeSet, StoreError>;
}

#[async_trait]
impl<S> InventoryStore for Arc<S>
where
    S: InventoryStore + ?Sized,
{
    async fn amount(&self, key: &LedgerKey) -> Result<Quantity, StoreError> {
        (**self).amount(key).await
    }

    async fn entries_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError> {
        (**self).entries_at(project_id, location).await
    }

    async fn entries_for_cost(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError> {
        (**self).entries_for_cost(project_id, material_cost_id).await
    }

    async fn serial(&self, key: &SerialKey) -> Result<Option<SerialNumber>, StoreError> {
        (**self).serial(key).await
    }

    async fn serials_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<SerialNumber>, StoreError> {
        (**self).serials_at(project_id, location).await
    }

    async fn document(&self, id: DocumentId) -> Result<Option<InvoiceDocument>, StoreError> {
        (**self).document(id).await
    }

    async fn document_by_code(
        &self,
        project_id: ProjectId,
        delivery_code: &str,
    ) -> Result<Option<InvoiceDocument>, StoreError> {
        (**self).document_by_code(project_id, delivery_code).await
    }

    async fn documents(
        &self,
        project_id: ProjectId,
        filter: &DocumentFilter,
    ) -> Result<Vec<InvoiceDocument>, StoreError> {
        (**self).documents(project_id, filter).await
    }

    async fn corrections(&self, project_id: ProjectId) -> Result<Vec<CorrectionRecord>, StoreError> {
        (**self).corrections(project_id).await
    }

    async fn defects_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<DefectRecord>, StoreError> {
        (**self).defects_at(project_id, location).await
    }

    async fn next_delivery_code(
        &self,
        project_id: ProjectId,
        prefix: &str,
    ) -> Result<String, StoreError> {
        (**self).next_delivery_code(project_id, prefix).await
    }

    async fn reserve_sequence(
        &self,
        project_id: ProjectId,
        counter: &str,
        count: u64,
    ) -> Result<u64, StoreError> {
        (**self).reserve_sequence(project_id, counter, count).await
    }

    async fn insert_document(&self, doc: &InvoiceDocument) -> Result<(), StoreError> {
        (**self).insert_document(doc).await
    }

    async fn transact(&self, scope: LockScope, work: UnitOfWork) -> Result<ChangeSet, StoreError> {
        (**self).transact(scope, work).await
    }
}
