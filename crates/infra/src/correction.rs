//! Reconciliation of recorded amounts against physical counts.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use stockyard_core::{CorrectionId, DomainError, MaterialCostId, ProjectId, Quantity, UserId};
use stockyard_events::EventBus;
use stockyard_invoicing::{CorrectionRecord, DocumentId};
use stockyard_ledger::{LedgerKey, LedgerTransaction, Location, LockScope, MaterialCatalog};

use crate::events::{InventoryEnvelope, correction_envelope, publish_all};
use crate::store::{ChangeSet, InventoryStore, LockedState};
use crate::workflow::WorkflowError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub project_id: ProjectId,
    pub material_cost_id: MaterialCostId,
    pub location: Location,
    pub observed: Quantity,
    pub operator: UserId,
    /// Document the count was taken for, if any.
    pub document_id: Option<DocumentId>,
}

pub struct CorrectionEngine<S, B> {
    store: S,
    bus: B,
    catalog: Arc<dyn MaterialCatalog>,
}

impl<S, B> CorrectionEngine<S, B>
where
    S: InventoryStore,
    B: EventBus<InventoryEnvelope>,
{
    pub fn new(store: S, bus: B, catalog: Arc<dyn MaterialCatalog>) -> Self {
        Self {
            store,
            bus,
            catalog,
        }
    }

    /// Bring the entry at `location` to the observed amount.
    ///
    /// Returns `None` when the count matches the books. Serial-tracked costs
    /// are refused with `NegativeResult`: their units are corrected by
    /// relocating or writing off serials.
    #[instrument(
        skip(self, request),
        fields(
            project_id = %request.project_id,
            material_cost_id = %request.material_cost_id,
            location = %request.location,
            observed = %request.observed
        ),
        err
    )]
    pub async fn reconcile(
        &self,
        request: ReconcileRequest,
    ) -> Result<Option<CorrectionRecord>, WorkflowError> {
        let (_, material) = self
            .catalog
            .resolve_in(request.material_cost_id, request.project_id)?;
        if material.serial_tracked {
            return Err(DomainError::negative_result(format!(
                "material {} is serial-tracked; reconcile it by serial code",
                material.name
            ))
            .into());
        }
        if !request.location.is_internal() {
            return Err(DomainError::validation(format!(
                "{} locations hold no countable stock",
                request.location.kind
            ))
            .into());
        }
        if let Some(document_id) = request.document_id {
            self.store
                .document(document_id)
                .await?
                .filter(|d| d.project_id() == Some(request.project_id))
                .ok_or_else(|| DomainError::not_found(format!("document {document_id}")))?;
        }

        let key = LedgerKey::new(request.project_id, request.material_cost_id, request.location);
        let observed = request.observed;
        let operator = request.operator;
        let document_id = request.document_id;

        let changes = self
            .store
            .transact(
                LockScope::new().with_entry(key),
                Box::new(move |locked: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut tx = LedgerTransaction::new(&locked.ledger, []);
                    let recorded = tx.amount(&key)?;
                    let delta = observed.value() - recorded.value();
                    if delta.is_zero() {
                        return Ok(ChangeSet::default());
                    }
                    tx.adjust(key, delta)?;
                    let record = CorrectionRecord {
                        id: CorrectionId::new(),
                        key,
                        document_id,
                        recorded,
                        observed,
                        delta,
                        operator,
                        created_at: Utc::now(),
                    };
                    Ok(ChangeSet {
                        ledger: tx.finish()?,
                        corrections: vec![record],
                        ..Default::default()
                    })
                }),
            )
            .await?;

        let Some(record) = changes.corrections.into_iter().next() else {
            info!("count matches the books; nothing to correct");
            return Ok(None);
        };
        info!(delta = %record.delta, correction_id = %record.id, "ledger corrected");
        publish_all(&self.bus, vec![correction_envelope(&record)]);
        Ok(Some(record))
    }

    /// Corrections of a project in the order they were applied.
    pub async fn corrections(&self, project_id: ProjectId) -> Result<Vec<CorrectionRecord>, WorkflowError> {
        Ok(self.store.corrections(project_id).await?)
    }
}
