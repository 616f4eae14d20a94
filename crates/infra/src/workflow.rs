//! Document confirmation workflow.
//!
//! Orchestrates the life of a movement document against the store, the
//! material catalog, proof storage and the event bus.
//!
//! ## Create
//!
//! ```text
//! request
//!   ↓ resolve lines (material-level lines are split across price variants)
//!   ↓ serial codes (generated for Input when none were supplied)
//!   ↓ availability pre-check at the source (lock-free read)
//!   ↓ delivery code (explicit and unique, or next from the counter)
//!   ↓ DraftDocument → aggregate → insert
//!   ↓ publish invoicing.document.drafted
//! ```
//!
//! ## Update
//!
//! Same resolution and pre-check as create, then the new body replaces the
//! draft's under the document lock. Kind and delivery code are fixed at
//! create.
//!
//! ## Confirm
//!
//! ```text
//! 1. read the draft, check proof requirement
//! 2. save the proof under <project>/<delivery code>      (no locks held)
//! 3. transact(lock scope of the document):
//!      re-check the document under lock
//!      ConfirmDocument → aggregate
//!      post every line on one LedgerTransaction
//!      finish (serial invariant)
//! 4. publish invoicing.document.confirmed + ledger.stock.moved
//! ```
//!
//! A failure anywhere in step 3 leaves the ledger, the serial registry and the
//! document untouched. Publication happens only after the commit; a failed
//! publication is logged and does not fail the call.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use stockyard_core::{
    Aggregate, AggregateRoot, DomainError, MaterialCostId, MaterialId, ProjectId, Quantity,
    UserId,
};
use stockyard_events::EventBus;
use stockyard_invoicing::{
    ConfirmDocument, DeleteDocument, DocumentCommand, DocumentConfirmed, DocumentDeleted,
    DocumentEdited, DocumentEvent, DocumentId, DocumentKind, DraftDocument, EditDocument,
    InvoiceDocument, LineItem, Participant, WriteOffReason, posting,
};
use stockyard_ledger::{
    Candidate, LedgerKey, LedgerTransaction, Location, LockScope, MaterialCatalog, allocate,
    generated_serial_code,
};

use crate::events::{InventoryEnvelope, document_envelope, movement_envelopes, publish_all};
use crate::proof::{ProofStorage, ProofStorageError, proof_key};
use crate::store::{ChangeSet, InventoryStore, LockedState, StoreError};

/// Service-level error.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Domain(DomainError),

    #[error(transparent)]
    Store(StoreError),

    #[error("proof storage failed: {0}")]
    Proof(#[from] ProofStorageError),
}

impl From<DomainError> for WorkflowError {
    fn from(value: DomainError) -> Self {
        WorkflowError::Domain(value)
    }
}

impl From<StoreError> for WorkflowError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Domain(e) => WorkflowError::Domain(e),
            other => WorkflowError::Store(other),
        }
    }
}

impl WorkflowError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            WorkflowError::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the caller can do something about it: fix the request, wait
    /// for stock, or retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            WorkflowError::Domain(e) => e.is_user_facing() || e.is_retryable(),
            WorkflowError::Store(StoreError::Backend { .. }) => true,
            WorkflowError::Store(_) => false,
            WorkflowError::Proof(ProofStorageError::Poisoned) => false,
            WorkflowError::Proof(_) => true,
        }
    }
}

/// What a line of a create request names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTarget {
    /// One exact price variant.
    Cost(MaterialCostId),
    /// Any price variants of a material, picked by the kind's allocation order.
    Material(MaterialId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRequest {
    pub target: LineTarget,
    pub quantity: Quantity,
    pub serial_codes: Vec<String>,
    pub defective: bool,
    pub note: Option<String>,
}

impl LineRequest {
    pub fn cost(material_cost_id: MaterialCostId, quantity: Quantity) -> Self {
        Self {
            target: LineTarget::Cost(material_cost_id),
            quantity,
            serial_codes: Vec::new(),
            defective: false,
            note: None,
        }
    }

    pub fn material(material_id: MaterialId, quantity: Quantity) -> Self {
        Self {
            target: LineTarget::Material(material_id),
            quantity,
            serial_codes: Vec::new(),
            defective: false,
            note: None,
        }
    }

    pub fn with_serials(mut self, codes: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.serial_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    pub fn defective(mut self) -> Self {
        self.defective = true;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateDocumentRequest {
    pub project_id: ProjectId,
    pub kind: DocumentKind,
    /// Assigned from the project counter when absent.
    pub delivery_code: Option<String>,
    pub source: Option<Location>,
    pub destination: Option<Location>,
    pub target_project: Option<ProjectId>,
    pub participants: Vec<Participant>,
    pub lines: Vec<LineRequest>,
    pub notes: Option<String>,
    pub write_off_reason: Option<WriteOffReason>,
    pub created_by: UserId,
}

impl CreateDocumentRequest {
    pub fn new(project_id: ProjectId, kind: DocumentKind, created_by: UserId) -> Self {
        Self {
            project_id,
            kind,
            delivery_code: None,
            source: None,
            destination: None,
            target_project: None,
            participants: Vec::new(),
            lines: Vec::new(),
            notes: None,
            write_off_reason: None,
            created_by,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    /// Proof file contents; required for Output, Return and WriteOff.
    pub proof: Option<Vec<u8>>,
    pub confirmed_by: UserId,
}

pub struct ConfirmationWorkflow<S, B> {
    store: S,
    bus: B,
    catalog: Arc<dyn MaterialCatalog>,
    proofs: Arc<dyn ProofStorage>,
}

impl<S, B> ConfirmationWorkflow<S, B> {
    pub fn new(
        store: S,
        bus: B,
        catalog: Arc<dyn MaterialCatalog>,
        proofs: Arc<dyn ProofStorage>,
    ) -> Self {
        Self {
            store,
            bus,
            catalog,
            proofs,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn catalog(&self) -> &Arc<dyn MaterialCatalog> {
        &self.catalog
    }
}

impl<S, B> ConfirmationWorkflow<S, B>
where
    S: InventoryStore,
    B: EventBus<InventoryEnvelope>,
{
    /// Validate a request and store it as a draft. The ledger is not touched.
    #[instrument(
        skip(self, request),
        fields(project_id = %request.project_id, kind = %request.kind),
        err
    )]
    pub async fn create(&self, request: CreateDocumentRequest) -> Result<InvoiceDocument, WorkflowError> {
        let result = self.create_inner(request).await;
        if let Err(e) = &result {
            log_failure("create", e);
        }
        result
    }

    async fn create_inner(&self, request: CreateDocumentRequest) -> Result<InvoiceDocument, WorkflowError> {
        if request.kind == DocumentKind::Correction {
            return Err(DomainError::validation(
                "correction documents are produced by reconciliation, not drafted",
            )
            .into());
        }

        let lines = self.resolve_lines(&request).await?;
        self.precheck_availability(&request, &lines).await?;

        let delivery_code = match request.delivery_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => {
                if self
                    .store
                    .document_by_code(request.project_id, code)
                    .await?
                    .is_some()
                {
                    return Err(DomainError::conflict(format!(
                        "delivery code {code} is already used in project {}",
                        request.project_id
                    ))
                    .into());
                }
                code.to_string()
            }
            Some(_) => return Err(DomainError::validation("delivery code must not be empty").into()),
            None => {
                self.store
                    .next_delivery_code(request.project_id, request.kind.delivery_prefix())
                    .await?
            }
        };

        let document_id = DocumentId::generate();
        let mut doc = InvoiceDocument::empty(document_id);
        let events = doc.execute(&DocumentCommand::Draft(DraftDocument {
            project_id: request.project_id,
            document_id,
            kind: request.kind,
            delivery_code,
            source: request.source,
            destination: request.destination,
            target_project: request.target_project,
            participants: request.participants,
            lines,
            notes: request.notes,
            write_off_reason: request.write_off_reason,
            created_by: request.created_by,
            occurred_at: Utc::now(),
        }))?;

        self.store.insert_document(&doc).await?;
        info!(
            document_id = %document_id,
            delivery_code = doc.delivery_code(),
            lines = doc.lines().len(),
            "document drafted"
        );

        let version = doc.version();
        publish_all(
            &self.bus,
            events
                .into_iter()
                .map(|event| document_envelope(event, version))
                .collect(),
        );
        Ok(doc)
    }

    /// Replace the body of a draft: locations, participants, lines, notes.
    #[instrument(
        skip(self, request),
        fields(project_id = %request.project_id, document_id = %document_id),
        err
    )]
    pub async fn update(
        &self,
        document_id: DocumentId,
        request: CreateDocumentRequest,
    ) -> Result<InvoiceDocument, WorkflowError> {
        let result = self.update_inner(document_id, request).await;
        if let Err(e) = &result {
            log_failure("update", e);
        }
        result
    }

    async fn update_inner(
        &self,
        document_id: DocumentId,
        request: CreateDocumentRequest,
    ) -> Result<InvoiceDocument, WorkflowError> {
        let draft = self.load_draft(request.project_id, document_id).await?;
        if request.kind != draft.kind() {
            return Err(DomainError::validation(format!(
                "document {} is {}; its kind cannot change",
                draft.delivery_code(),
                draft.kind()
            ))
            .into());
        }
        if request
            .delivery_code
            .as_deref()
            .is_some_and(|code| code.trim() != draft.delivery_code())
        {
            return Err(DomainError::validation(format!(
                "delivery code {} cannot change",
                draft.delivery_code()
            ))
            .into());
        }

        let lines = self.resolve_lines(&request).await?;
        self.precheck_availability(&request, &lines).await?;

        let command = EditDocument {
            project_id: request.project_id,
            document_id,
            source: request.source,
            destination: request.destination,
            target_project: request.target_project,
            participants: request.participants,
            lines,
            notes: request.notes,
            write_off_reason: request.write_off_reason,
            edited_by: request.created_by,
            occurred_at: Utc::now(),
        };
        let event = DocumentEdited {
            project_id: command.project_id,
            document_id,
            source: command.source,
            destination: command.destination,
            target_project: command.target_project,
            participants: command.participants.clone(),
            lines: command.lines.clone(),
            notes: command.notes.clone(),
            write_off_reason: command.write_off_reason,
            edited_by: command.edited_by,
            occurred_at: command.occurred_at,
        };

        let changes = self
            .store
            .transact(
                LockScope::for_document(document_id.0),
                Box::new(move |locked: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut doc = locked.document.clone().ok_or_else(|| {
                        DomainError::not_found(format!("document {document_id}"))
                    })?;
                    doc.execute(&DocumentCommand::Edit(command))?;
                    Ok(ChangeSet {
                        document: Some(doc),
                        ..Default::default()
                    })
                }),
            )
            .await?;

        let doc = changes
            .document
            .ok_or_else(|| DomainError::invariant("edit produced no document"))?;
        info!(
            delivery_code = doc.delivery_code(),
            lines = doc.lines().len(),
            "draft edited"
        );
        publish_all(
            &self.bus,
            vec![document_envelope(DocumentEvent::Edited(event), doc.version())],
        );
        Ok(doc)
    }

    /// Turn request lines into cost-level line items.
    async fn resolve_lines(&self, request: &CreateDocumentRequest) -> Result<Vec<LineItem>, WorkflowError> {
        let mut lines = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            match line.target {
                LineTarget::Cost(cost_id) => {
                    let (cost, material) = self.catalog.resolve_in(cost_id, request.project_id)?;
                    let codes = if material.serial_tracked
                        && request.kind == DocumentKind::Input
                        && line.serial_codes.is_empty()
                    {
                        self.generate_serials(request.project_id, cost.material_id, line.quantity)
                            .await?
                    } else {
                        if !material.serial_tracked && !line.serial_codes.is_empty() {
                            return Err(DomainError::validation(format!(
                                "material {} is not serial-tracked",
                                material.name
                            ))
                            .into());
                        }
                        if material.serial_tracked && line.serial_codes.is_empty() {
                            return Err(DomainError::validation(format!(
                                "material {} is serial-tracked; list the serial codes",
                                material.name
                            ))
                            .into());
                        }
                        line.serial_codes.clone()
                    };
                    lines.push(LineItem {
                        material_cost_id: cost_id,
                        quantity: line.quantity,
                        serial_codes: codes,
                        defective: line.defective,
                        note: line.note.clone(),
                    });
                }
                LineTarget::Material(material_id) => {
                    lines.extend(self.allocate_material_line(request, material_id, line).await?);
                }
            }
        }
        Ok(lines)
    }

    async fn allocate_material_line(
        &self,
        request: &CreateDocumentRequest,
        material_id: MaterialId,
        line: &LineRequest,
    ) -> Result<Vec<LineItem>, WorkflowError> {
        let order = request.kind.wiring().allocation.ok_or_else(|| {
            DomainError::validation(format!(
                "{} lines must name a material cost",
                request.kind
            ))
        })?;
        let source = request.source.ok_or_else(|| {
            DomainError::validation(format!("{} documents need a source", request.kind))
        })?;
        let material = self
            .catalog
            .material(material_id)
            .filter(|m| self.catalog.is_usable_in(m, request.project_id))
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "material {material_id} in project {}",
                    request.project_id
                ))
            })?;
        if material.serial_tracked {
            return Err(DomainError::validation(format!(
                "material {} is serial-tracked; name the cost and the serial codes",
                material.name
            ))
            .into());
        }
        if !line.serial_codes.is_empty() {
            return Err(DomainError::validation("material-level lines cannot carry serial codes").into());
        }

        let mut candidates = Vec::new();
        for cost in self.catalog.costs_of(material_id) {
            let available = self
                .store
                .amount(&LedgerKey::new(request.project_id, cost.id, source))
                .await?;
            candidates.push(Candidate { cost, available });
        }

        let parts = allocate(candidates, line.quantity, order, &source.to_string())?;
        debug!(material = %material.name, parts = parts.len(), "material line allocated");
        Ok(parts
            .into_iter()
            .map(|(cost_id, quantity)| LineItem {
                material_cost_id: cost_id,
                quantity,
                serial_codes: Vec::new(),
                defective: line.defective,
                note: line.note.clone(),
            })
            .collect())
    }

    async fn generate_serials(
        &self,
        project_id: ProjectId,
        material_id: MaterialId,
        quantity: Quantity,
    ) -> Result<Vec<String>, WorkflowError> {
        let count = quantity
            .value()
            .fract()
            .is_zero()
            .then(|| quantity.value().to_u64())
            .flatten()
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "serial-tracked amounts must be whole units (got {quantity})"
                ))
            })?;
        let first = self
            .store
            .reserve_sequence(project_id, &format!("serial:{material_id}"), count)
            .await?;
        Ok((first..first + count)
            .map(|seq| generated_serial_code(material_id, seq))
            .collect())
    }

    /// Lock-free check that the source holds enough of every cost. The
    /// authoritative check happens again under lock at confirmation.
    async fn precheck_availability(
        &self,
        request: &CreateDocumentRequest,
        lines: &[LineItem],
    ) -> Result<(), WorkflowError> {
        let Some(source) = request.source.filter(|_| request.kind.has_source()) else {
            return Ok(());
        };
        let mut requested: BTreeMap<MaterialCostId, Quantity> = BTreeMap::new();
        for line in lines {
            let total = requested.entry(line.material_cost_id).or_default();
            *total = total.checked_add(line.quantity)?;
        }
        for (cost_id, quantity) in requested {
            let available = self
                .store
                .amount(&LedgerKey::new(request.project_id, cost_id, source))
                .await?;
            if available < quantity {
                return Err(DomainError::insufficient_stock(
                    source.to_string(),
                    available.value(),
                    quantity.value(),
                )
                .into());
            }
        }
        Ok(())
    }

    /// Confirm a draft and move its stock in one atomic unit.
    #[instrument(
        skip(self, request),
        fields(project_id = %request.project_id, document_id = %request.document_id),
        err
    )]
    pub async fn confirm(&self, request: ConfirmRequest) -> Result<InvoiceDocument, WorkflowError> {
        let result = self.confirm_inner(request).await;
        if let Err(e) = &result {
            log_failure("confirm", e);
        }
        result
    }

    async fn confirm_inner(&self, request: ConfirmRequest) -> Result<InvoiceDocument, WorkflowError> {
        let draft = self.load_draft(request.project_id, request.document_id).await?;
        if draft.kind().requires_proof() && request.proof.is_none() {
            return Err(DomainError::validation(format!(
                "{} documents require a proof file to be confirmed",
                draft.kind()
            ))
            .into());
        }

        let proof = match request.proof {
            Some(bytes) => Some(
                self.proofs
                    .save(&proof_key(request.project_id, draft.delivery_code()), bytes)
                    .await?,
            ),
            None => None,
        };

        self.share_with_target(&draft)?;

        let scope = posting::lock_scope(&draft)?;
        let tracked: BTreeSet<MaterialCostId> =
            posting::serial_tracked_costs(&draft, self.catalog.as_ref())?;
        let catalog = Arc::clone(&self.catalog);
        let command = ConfirmDocument {
            project_id: request.project_id,
            document_id: request.document_id,
            proof,
            confirmed_by: request.confirmed_by,
            occurred_at: Utc::now(),
        };
        let confirmed_event = DocumentConfirmed {
            project_id: command.project_id,
            document_id: command.document_id,
            kind: draft.kind(),
            delivery_code: draft.delivery_code().to_string(),
            proof: command.proof.clone(),
            confirmed_by: command.confirmed_by,
            occurred_at: command.occurred_at,
        };

        let changes = self
            .store
            .transact(
                scope,
                Box::new(move |locked: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut doc = locked.document.clone().ok_or_else(|| {
                        DomainError::not_found(format!("document {}", command.document_id))
                    })?;
                    doc.execute(&DocumentCommand::Confirm(command))?;

                    let mut tx = LedgerTransaction::new(&locked.ledger, tracked);
                    let defects = posting::post(&doc, &mut tx, catalog.as_ref())?;
                    Ok(ChangeSet {
                        ledger: tx.finish()?,
                        document: Some(doc),
                        corrections: Vec::new(),
                        defects,
                    })
                }),
            )
            .await?;

        let doc = changes
            .document
            .clone()
            .ok_or_else(|| DomainError::invariant("confirmation produced no document"))?;
        info!(
            delivery_code = doc.delivery_code(),
            kind = %doc.kind(),
            movements = changes.ledger.movements.len(),
            "document confirmed"
        );

        let mut envelopes = vec![document_envelope(
            DocumentEvent::Confirmed(confirmed_event),
            doc.version(),
        )];
        envelopes.extend(movement_envelopes(
            request.project_id,
            request.document_id,
            &changes.ledger,
            doc.confirmed_at().unwrap_or_else(Utc::now),
        ));
        publish_all(&self.bus, envelopes);
        Ok(doc)
    }

    /// Make the transferred materials usable in the receiving project, so its
    /// own documents can move the stock on. Grants outlive a failed commit;
    /// they only widen what the receiving project may reference.
    fn share_with_target(&self, draft: &InvoiceDocument) -> Result<(), WorkflowError> {
        let Some(target) = draft.target_project() else {
            return Ok(());
        };
        let materials: BTreeSet<MaterialId> = draft
            .lines()
            .iter()
            .map(|line| {
                self.catalog
                    .resolve(line.material_cost_id)
                    .map(|(cost, _)| cost.material_id)
            })
            .collect::<Result<_, _>>()?;
        for material_id in materials {
            self.catalog.share(material_id, target)?;
        }
        debug!(target_project = %target, "transferred materials shared");
        Ok(())
    }

    /// Delete a draft. The delivery code stays reserved.
    #[instrument(
        skip(self),
        fields(project_id = %project_id, document_id = %document_id),
        err
    )]
    pub async fn delete(
        &self,
        project_id: ProjectId,
        document_id: DocumentId,
    ) -> Result<(), WorkflowError> {
        let command = DeleteDocument {
            project_id,
            document_id,
            occurred_at: Utc::now(),
        };
        let event = DocumentDeleted {
            project_id,
            document_id,
            occurred_at: command.occurred_at,
        };

        let result = self
            .store
            .transact(
                LockScope::for_document(document_id.0),
                Box::new(move |locked: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut doc = locked.document.clone().ok_or_else(|| {
                        DomainError::not_found(format!("document {document_id}"))
                    })?;
                    doc.execute(&DocumentCommand::Delete(command))?;
                    Ok(ChangeSet {
                        document: Some(doc),
                        ..Default::default()
                    })
                }),
            )
            .await
            .map_err(WorkflowError::from);

        let changes = match result {
            Ok(changes) => changes,
            Err(e) => {
                log_failure("delete", &e);
                return Err(e);
            }
        };
        let version = changes.document.as_ref().map(|d| d.version()).unwrap_or_default();
        info!("draft deleted");
        publish_all(
            &self.bus,
            vec![document_envelope(DocumentEvent::Deleted(event), version)],
        );
        Ok(())
    }

    async fn load_draft(
        &self,
        project_id: ProjectId,
        document_id: DocumentId,
    ) -> Result<InvoiceDocument, WorkflowError> {
        let doc = self
            .store
            .document(document_id)
            .await?
            .filter(|d| d.project_id() == Some(project_id))
            .ok_or_else(|| {
                DomainError::not_found(format!("document {document_id} in project {project_id}"))
            })?;
        if doc.status() != stockyard_invoicing::DocumentStatus::Draft {
            return Err(DomainError::invalid_state(format!(
                "document {} is {}",
                doc.delivery_code(),
                doc.status().as_str()
            ))
            .into());
        }
        Ok(doc)
    }
}

fn log_failure(operation: &str, error: &WorkflowError) {
    match error {
        WorkflowError::Domain(DomainError::InvariantViolation(msg)) => {
            error!(operation, msg = msg.as_str(), "invariant violation; transaction aborted");
        }
        WorkflowError::Domain(e @ (DomainError::Busy(_) | DomainError::InsufficientStock { .. })) => {
            warn!(operation, error = %e, "operation rejected");
        }
        WorkflowError::Domain(e) => debug!(operation, error = %e, "operation rejected"),
        other => error!(operation, error = %other, "operation failed"),
    }
}
