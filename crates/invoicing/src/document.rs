use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockyard_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, MaterialCostId, ProjectId, Quantity,
    UserId, WorkerId,
};
use stockyard_events::Event;
use stockyard_ledger::{LedgerKey, Location};

use crate::kind::{DocumentKind, ParticipantRole, WriteOffReason};

/// Document identifier (project-scoped via `project_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub AggregateId);

impl DocumentId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(AggregateId::new())
    }
}

impl core::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Document lifecycle. `Deleted` is a tombstone: the id stays known so that
/// later commands get `InvalidState` rather than `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Draft,
    Confirmed,
    Deleted,
}

impl DocumentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Draft => "draft",
            DocumentStatus::Confirmed => "confirmed",
            DocumentStatus::Deleted => "deleted",
        }
    }
}

/// A worker in a given role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub role: ParticipantRole,
    pub worker_id: WorkerId,
}

/// One line of a document. Serial-tracked lines enumerate their codes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub material_cost_id: MaterialCostId,
    pub quantity: Quantity,
    #[serde(default)]
    pub serial_codes: Vec<String>,
    /// Return lines only: the units came back broken.
    #[serde(default)]
    pub defective: bool,
    #[serde(default)]
    pub note: Option<String>,
}

impl LineItem {
    pub fn new(material_cost_id: MaterialCostId, quantity: Quantity) -> Self {
        Self {
            material_cost_id,
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
}

/// Where an uploaded proof file was stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofRef {
    pub key: String,
    pub uri: String,
    pub size: u64,
}

/// Aggregate root: InvoiceDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceDocument {
    id: DocumentId,
    project_id: Option<ProjectId>,
    kind: DocumentKind,
    delivery_code: String,
    status: DocumentStatus,
    source: Option<Location>,
    destination: Option<Location>,
    target_project: Option<ProjectId>,
    participants: Vec<Participant>,
    lines: Vec<LineItem>,
    notes: Option<String>,
    write_off_reason: Option<WriteOffReason>,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    confirmed_by: Option<UserId>,
    confirmed_at: Option<DateTime<Utc>>,
    proof: Option<ProofRef>,
    version: u64,
    created: bool,
}

impl InvoiceDocument {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: DocumentId) -> Self {
        Self {
            id,
            project_id: None,
            kind: DocumentKind::Input,
            delivery_code: String::new(),
            status: DocumentStatus::Draft,
            source: None,
            destination: None,
            target_project: None,
            participants: Vec::new(),
            lines: Vec::new(),
            notes: None,
            write_off_reason: None,
            created_by: None,
            created_at: None,
            confirmed_by: None,
            confirmed_at: None,
            proof: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> DocumentId {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn delivery_code(&self) -> &str {
        &self.delivery_code
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn source(&self) -> Option<Location> {
        self.source
    }

    pub fn destination(&self) -> Option<Location> {
        self.destination
    }

    pub fn target_project(&self) -> Option<ProjectId> {
        self.target_project
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn lines(&self) -> &[LineItem] {
        &self.lines
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn write_off_reason(&self) -> Option<WriteOffReason> {
        self.write_off_reason
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn confirmed_by(&self) -> Option<UserId> {
        self.confirmed_by
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn proof(&self) -> Option<&ProofRef> {
        self.proof.as_ref()
    }

    /// Project the destination belongs to (the target project for out-of-project transfers).
    pub fn destination_project(&self) -> Option<ProjectId> {
        self.target_project.or(self.project_id)
    }

    /// Ledger entry a line is taken from.
    pub fn source_key(&self, line: &LineItem) -> Option<LedgerKey> {
        let project = self.project_id?;
        self.source
            .map(|loc| LedgerKey::new(project, line.material_cost_id, loc))
    }

    /// Ledger entry a line is put into.
    pub fn destination_key(&self, line: &LineItem) -> Option<LedgerKey> {
        let project = self.destination_project()?;
        self.destination
            .map(|loc| LedgerKey::new(project, line.material_cost_id, loc))
    }
}

impl AggregateRoot for InvoiceDocument {
    type Id = DocumentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: DraftDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftDocument {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub delivery_code: String,
    pub source: Option<Location>,
    pub destination: Option<Location>,
    pub target_project: Option<ProjectId>,
    pub participants: Vec<Participant>,
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub write_off_reason: Option<WriteOffReason>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmDocument {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub proof: Option<ProofRef>,
    pub confirmed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: EditDocument. Replaces the editable body of a draft; the kind
/// and the delivery code stay as drafted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditDocument {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub source: Option<Location>,
    pub destination: Option<Location>,
    pub target_project: Option<ProjectId>,
    pub participants: Vec<Participant>,
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub write_off_reason: Option<WriteOffReason>,
    pub edited_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteDocument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteDocument {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentCommand {
    Draft(DraftDocument),
    Edit(EditDocument),
    Confirm(ConfirmDocument),
    Delete(DeleteDocument),
}

/// Event: DocumentDrafted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDrafted {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub delivery_code: String,
    pub source: Option<Location>,
    pub destination: Option<Location>,
    pub target_project: Option<ProjectId>,
    pub participants: Vec<Participant>,
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub write_off_reason: Option<WriteOffReason>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentEdited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEdited {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub source: Option<Location>,
    pub destination: Option<Location>,
    pub target_project: Option<ProjectId>,
    pub participants: Vec<Participant>,
    pub lines: Vec<LineItem>,
    pub notes: Option<String>,
    pub write_off_reason: Option<WriteOffReason>,
    pub edited_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentConfirmed {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub kind: DocumentKind,
    pub delivery_code: String,
    pub proof: Option<ProofRef>,
    pub confirmed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DocumentDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDeleted {
    pub project_id: ProjectId,
    pub document_id: DocumentId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    Drafted(DocumentDrafted),
    Edited(DocumentEdited),
    Confirmed(DocumentConfirmed),
    Deleted(DocumentDeleted),
}

impl DocumentEvent {
    pub fn project_id(&self) -> ProjectId {
        match self {
            DocumentEvent::Drafted(e) => e.project_id,
            DocumentEvent::Edited(e) => e.project_id,
            DocumentEvent::Confirmed(e) => e.project_id,
            DocumentEvent::Deleted(e) => e.project_id,
        }
    }

    pub fn document_id(&self) -> DocumentId {
        match self {
            DocumentEvent::Drafted(e) => e.document_id,
            DocumentEvent::Edited(e) => e.document_id,
            DocumentEvent::Confirmed(e) => e.document_id,
            DocumentEvent::Deleted(e) => e.document_id,
        }
    }
}

impl Event for DocumentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DocumentEvent::Drafted(_) => "invoicing.document.drafted",
            DocumentEvent::Edited(_) => "invoicing.document.edited",
            DocumentEvent::Confirmed(_) => "invoicing.document.confirmed",
            DocumentEvent::Deleted(_) => "invoicing.document.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            DocumentEvent::Drafted(e) => e.occurred_at,
            DocumentEvent::Edited(e) => e.occurred_at,
            DocumentEvent::Confirmed(e) => e.occurred_at,
            DocumentEvent::Deleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InvoiceDocument {
    type Command = DocumentCommand;
    type Event = DocumentEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DocumentEvent::Drafted(e) => {
                self.id = e.document_id;
                self.project_id = Some(e.project_id);
                self.kind = e.kind;
                self.delivery_code = e.delivery_code.clone();
                self.status = DocumentStatus::Draft;
                self.source = e.source;
                self.destination = e.destination;
                self.target_project = e.target_project;
                self.participants = e.participants.clone();
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
                self.write_off_reason = e.write_off_reason;
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            DocumentEvent::Edited(e) => {
                self.source = e.source;
                self.destination = e.destination;
                self.target_project = e.target_project;
                self.participants = e.participants.clone();
                self.lines = e.lines.clone();
                self.notes = e.notes.clone();
                self.write_off_reason = e.write_off_reason;
            }
            DocumentEvent::Confirmed(e) => {
                self.status = DocumentStatus::Confirmed;
                self.proof = e.proof.clone();
                self.confirmed_by = Some(e.confirmed_by);
                self.confirmed_at = Some(e.occurred_at);
            }
            DocumentEvent::Deleted(_) => {
                self.status = DocumentStatus::Deleted;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DocumentCommand::Draft(cmd) => self.handle_draft(cmd),
            DocumentCommand::Edit(cmd) => self.handle_edit(cmd),
            DocumentCommand::Confirm(cmd) => self.handle_confirm(cmd),
            DocumentCommand::Delete(cmd) => self.handle_delete(cmd),
        }
    }
}

impl InvoiceDocument {
    fn ensure_project(&self, project_id: ProjectId) -> Result<(), DomainError> {
        if self.project_id != Some(project_id) {
            return Err(DomainError::not_found(format!(
                "document {} in project {project_id}",
                self.id
            )));
        }
        Ok(())
    }

    fn ensure_document_id(&self, document_id: DocumentId) -> Result<(), DomainError> {
        if self.id != document_id {
            return Err(DomainError::invariant("document_id mismatch"));
        }
        Ok(())
    }

    fn ensure_draft(&self, action: &str) -> Result<(), DomainError> {
        match self.status {
            DocumentStatus::Draft => Ok(()),
            DocumentStatus::Confirmed => Err(DomainError::invalid_state(format!(
                "cannot {action} document {}: already confirmed",
                self.delivery_code
            ))),
            DocumentStatus::Deleted => Err(DomainError::invalid_state(format!(
                "cannot {action} document {}: deleted",
                self.delivery_code
            ))),
        }
    }

    fn handle_draft(&self, cmd: &DraftDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("document already exists"));
        }
        self.ensure_document_id(cmd.document_id)?;

        if cmd.kind == DocumentKind::Correction {
            return Err(DomainError::validation(
                "correction documents are produced by reconciliation, not drafted",
            ));
        }
        if cmd.delivery_code.trim().is_empty() {
            return Err(DomainError::validation("delivery code must not be empty"));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot draft a document without line items",
            ));
        }

        validate_wiring(
            cmd.kind,
            cmd.project_id,
            Route {
                source: cmd.source,
                destination: cmd.destination,
                target_project: cmd.target_project,
                write_off_reason: cmd.write_off_reason,
            },
        )?;
        validate_participants(cmd.kind, &cmd.participants)?;
        validate_lines(cmd.kind, &cmd.lines)?;

        Ok(vec![DocumentEvent::Drafted(DocumentDrafted {
            project_id: cmd.project_id,
            document_id: cmd.document_id,
            kind: cmd.kind,
            delivery_code: cmd.delivery_code.trim().to_string(),
            source: cmd.source,
            destination: cmd.destination,
            target_project: cmd.target_project,
            participants: cmd.participants.clone(),
            lines: cmd.lines.clone(),
            notes: cmd.notes.clone(),
            write_off_reason: cmd.write_off_reason,
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_edit(&self, cmd: &EditDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("document {}", cmd.document_id)));
        }
        self.ensure_project(cmd.project_id)?;
        self.ensure_document_id(cmd.document_id)?;
        self.ensure_draft("edit")?;

        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "cannot leave a document without line items",
            ));
        }
        validate_wiring(
            self.kind,
            cmd.project_id,
            Route {
                source: cmd.source,
                destination: cmd.destination,
                target_project: cmd.target_project,
                write_off_reason: cmd.write_off_reason,
            },
        )?;
        validate_participants(self.kind, &cmd.participants)?;
        validate_lines(self.kind, &cmd.lines)?;

        Ok(vec![DocumentEvent::Edited(DocumentEdited {
            project_id: cmd.project_id,
            document_id: cmd.document_id,
            source: cmd.source,
            destination: cmd.destination,
            target_project: cmd.target_project,
            participants: cmd.participants.clone(),
            lines: cmd.lines.clone(),
            notes: cmd.notes.clone(),
            write_off_reason: cmd.write_off_reason,
            edited_by: cmd.edited_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("document {}", cmd.document_id)));
        }
        self.ensure_project(cmd.project_id)?;
        self.ensure_document_id(cmd.document_id)?;
        self.ensure_draft("confirm")?;

        if self.kind.requires_proof() && cmd.proof.is_none() {
            return Err(DomainError::validation(format!(
                "{} documents require a proof file to be confirmed",
                self.kind
            )));
        }

        Ok(vec![DocumentEvent::Confirmed(DocumentConfirmed {
            project_id: cmd.project_id,
            document_id: cmd.document_id,
            kind: self.kind,
            delivery_code: self.delivery_code.clone(),
            proof: cmd.proof.clone(),
            confirmed_by: cmd.confirmed_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteDocument) -> Result<Vec<DocumentEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("document {}", cmd.document_id)));
        }
        self.ensure_project(cmd.project_id)?;
        self.ensure_document_id(cmd.document_id)?;
        self.ensure_draft("delete")?;

        Ok(vec![DocumentEvent::Deleted(DocumentDeleted {
            project_id: cmd.project_id,
            document_id: cmd.document_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn validate_location(
    what: &str,
    kind: DocumentKind,
    location: Option<Location>,
    allowed: &[stockyard_ledger::LocationType],
) -> Result<(), DomainError> {
    match (location, allowed.is_empty()) {
        (None, true) => Ok(()),
        (Some(loc), true) => Err(DomainError::validation(format!(
            "{kind} documents have no {what} (got {loc})"
        ))),
        (None, false) => Err(DomainError::validation(format!(
            "{kind} documents need a {what}"
        ))),
        (Some(loc), false) if allowed.contains(&loc.kind) => Ok(()),
        (Some(loc), false) => Err(DomainError::validation(format!(
            "{kind} documents cannot use a {} as {what}",
            loc.kind
        ))),
    }
}

/// Where a document moves stock, as drafted or edited.
struct Route {
    source: Option<Location>,
    destination: Option<Location>,
    target_project: Option<ProjectId>,
    write_off_reason: Option<WriteOffReason>,
}

fn validate_wiring(kind: DocumentKind, project_id: ProjectId, route: Route) -> Result<(), DomainError> {
    let wiring = kind.wiring();
    validate_location("source", kind, route.source, wiring.sources)?;
    validate_location("destination", kind, route.destination, wiring.destinations)?;

    match (wiring.crosses_projects, route.target_project) {
        (true, None) => {
            return Err(DomainError::validation(
                "out-of-project transfers need a target project",
            ));
        }
        (true, Some(target)) if target == project_id => {
            return Err(DomainError::validation(
                "target project must differ from the source project",
            ));
        }
        (false, Some(_)) => {
            return Err(DomainError::validation(format!(
                "{kind} documents have no target project"
            )));
        }
        _ => {}
    }

    match (kind, route.write_off_reason) {
        (DocumentKind::WriteOff, None) => Err(DomainError::validation(
            "write-off documents need a reason",
        )),
        (DocumentKind::WriteOff, Some(_)) | (_, None) => Ok(()),
        (_, Some(_)) => Err(DomainError::validation(format!(
            "{kind} documents have no write-off reason"
        ))),
    }
}

fn validate_participants(
    kind: DocumentKind,
    participants: &[Participant],
) -> Result<(), DomainError> {
    let present: BTreeSet<ParticipantRole> = participants.iter().map(|p| p.role).collect();
    let missing: Vec<String> = kind
        .wiring()
        .required_roles
        .iter()
        .filter(|role| !present.contains(role))
        .map(|role| format!("{role:?}"))
        .collect();
    if !missing.is_empty() {
        return Err(DomainError::validation(format!(
            "{kind} documents need participants: {}",
            missing.join(", ")
        )));
    }
    Ok(())
}

fn validate_lines(kind: DocumentKind, lines: &[LineItem]) -> Result<(), DomainError> {
    let mut codes = BTreeSet::new();
    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if line.quantity.is_zero() {
            return Err(DomainError::validation(format!(
                "line {line_no}: amount must be positive"
            )));
        }
        if line.defective && kind != DocumentKind::Return {
            return Err(DomainError::validation(format!(
                "line {line_no}: only returned material can be marked defective"
            )));
        }
        if line.serial_codes.is_empty() {
            continue;
        }
        let declared = line.quantity.value();
        if declared != rust_decimal::Decimal::from(line.serial_codes.len()) {
            return Err(DomainError::validation(format!(
                "line {line_no}: {} serial codes listed for an amount of {declared}",
                line.serial_codes.len()
            )));
        }
        for code in &line.serial_codes {
            if code.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "line {line_no}: empty serial code"
                )));
            }
            if !codes.insert(code.as_str()) {
                return Err(DomainError::validation(format!(
                    "serial code {code} appears more than once"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockyard_core::LocationId;
    use stockyard_ledger::LocationType;

    fn test_project_id() -> ProjectId {
        ProjectId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn participants(roles: &[ParticipantRole]) -> Vec<Participant> {
        roles
            .iter()
            .map(|role| Participant {
                role: *role,
                worker_id: WorkerId::new(),
            })
            .collect()
    }

    fn output_draft(project_id: ProjectId, document_id: DocumentId) -> DraftDocument {
        DraftDocument {
            project_id,
            document_id,
            kind: DocumentKind::Output,
            delivery_code: "OUT-00001".into(),
            source: Some(Location::warehouse(LocationId::new())),
            destination: Some(Location::team(LocationId::new())),
            target_project: None,
            participants: participants(&[
                ParticipantRole::WarehouseManager,
                ParticipantRole::Releaser,
                ParticipantRole::Recipient,
            ]),
            lines: vec![LineItem::new(
                MaterialCostId::new(),
                Quantity::new(dec!(3)).unwrap(),
            )],
            notes: None,
            write_off_reason: None,
            created_by: UserId::new(),
            occurred_at: test_time(),
        }
    }

    fn drafted(cmd: DraftDocument) -> InvoiceDocument {
        let mut doc = InvoiceDocument::empty(cmd.document_id);
        doc.execute(&DocumentCommand::Draft(cmd)).unwrap();
        doc
    }

    fn edit_of(doc: &InvoiceDocument) -> EditDocument {
        EditDocument {
            project_id: doc.project_id().unwrap(),
            document_id: doc.id_typed(),
            source: doc.source(),
            destination: doc.destination(),
            target_project: doc.target_project(),
            participants: doc.participants().to_vec(),
            lines: doc.lines().to_vec(),
            notes: doc.notes().map(str::to_string),
            write_off_reason: doc.write_off_reason(),
            edited_by: UserId::new(),
            occurred_at: test_time(),
        }
    }

    fn proof() -> ProofRef {
        ProofRef {
            key: "OUT-00001".into(),
            uri: "memory://OUT-00001".into(),
            size: 3,
        }
    }

    #[test]
    fn draft_emits_drafted_event() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let doc = InvoiceDocument::empty(document_id);
        let cmd = output_draft(project_id, document_id);

        let events = doc.handle(&DocumentCommand::Draft(cmd.clone())).unwrap();
        assert_eq!(events.len(), 1);
        match &events[0] {
            DocumentEvent::Drafted(e) => {
                assert_eq!(e.project_id, project_id);
                assert_eq!(e.kind, DocumentKind::Output);
                assert_eq!(e.lines, cmd.lines);
            }
            _ => panic!("Expected Drafted event"),
        }
    }

    #[test]
    fn confirm_requires_proof_for_output() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let doc = drafted(output_draft(project_id, document_id));

        let err = doc
            .handle(&DocumentCommand::Confirm(ConfirmDocument {
                project_id,
                document_id,
                proof: None,
                confirmed_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn second_confirmation_is_invalid_state() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut doc = drafted(output_draft(project_id, document_id));
        let confirm = DocumentCommand::Confirm(ConfirmDocument {
            project_id,
            document_id,
            proof: Some(proof()),
            confirmed_by: UserId::new(),
            occurred_at: test_time(),
        });

        doc.execute(&confirm).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Confirmed);
        assert!(doc.confirmed_at().is_some());
        assert_eq!(doc.version(), 2);

        let err = doc.handle(&confirm).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn confirmed_documents_cannot_be_deleted() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut doc = drafted(output_draft(project_id, document_id));
        doc.execute(&DocumentCommand::Confirm(ConfirmDocument {
            project_id,
            document_id,
            proof: Some(proof()),
            confirmed_by: UserId::new(),
            occurred_at: test_time(),
        }))
        .unwrap();

        let err = doc
            .handle(&DocumentCommand::Delete(DeleteDocument {
                project_id,
                document_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn deleted_draft_answers_invalid_state() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut doc = drafted(output_draft(project_id, document_id));
        let delete = DocumentCommand::Delete(DeleteDocument {
            project_id,
            document_id,
            occurred_at: test_time(),
        });
        doc.execute(&delete).unwrap();
        assert_eq!(doc.status(), DocumentStatus::Deleted);

        assert!(matches!(doc.handle(&delete), Err(DomainError::InvalidState(_))));
    }

    #[test]
    fn unknown_document_is_not_found() {
        let doc = InvoiceDocument::empty(DocumentId::generate());
        let err = doc
            .handle(&DocumentCommand::Delete(DeleteDocument {
                project_id: test_project_id(),
                document_id: *doc.id(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn drafts_can_be_edited_in_place() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut doc = drafted(output_draft(project_id, document_id));

        let mut edit = edit_of(&doc);
        edit.lines = vec![
            LineItem::new(MaterialCostId::new(), Quantity::new(dec!(1.5)).unwrap()),
            LineItem::new(MaterialCostId::new(), Quantity::new(dec!(2)).unwrap()),
        ];
        edit.destination = Some(Location::object(LocationId::new()));
        edit.notes = Some("second trip".into());
        let events = doc.execute(&DocumentCommand::Edit(edit.clone())).unwrap();

        assert_eq!(events[0].event_type(), "invoicing.document.edited");
        assert_eq!(doc.lines(), edit.lines.as_slice());
        assert_eq!(doc.destination(), edit.destination);
        assert_eq!(doc.notes(), Some("second trip"));
        assert_eq!(doc.kind(), DocumentKind::Output);
        assert_eq!(doc.delivery_code(), "OUT-00001");
        assert_eq!(doc.status(), DocumentStatus::Draft);
        assert_eq!(doc.version(), 2);
    }

    #[test]
    fn edits_are_validated_like_drafts() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let doc = drafted(output_draft(project_id, document_id));

        let mut edit = edit_of(&doc);
        edit.lines.clear();
        assert!(matches!(
            doc.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::Validation(_))
        ));

        let mut edit = edit_of(&doc);
        edit.participants = participants(&[ParticipantRole::Releaser]);
        assert!(matches!(
            doc.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::Validation(_))
        ));

        let mut edit = edit_of(&doc);
        edit.lines[0] = edit.lines[0].clone().with_serials(["A"]);
        assert!(matches!(
            doc.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::Validation(_))
        ));

        let mut edit = edit_of(&doc);
        edit.source = None;
        assert!(matches!(
            doc.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::Validation(_))
        ));

        let mut edit = edit_of(&doc);
        edit.project_id = ProjectId::new();
        assert!(matches!(
            doc.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn confirmed_and_deleted_documents_cannot_be_edited() {
        let project_id = test_project_id();
        let mut confirmed = drafted(output_draft(project_id, DocumentId::generate()));
        let edit = edit_of(&confirmed);
        confirmed
            .execute(&DocumentCommand::Confirm(ConfirmDocument {
                project_id,
                document_id: confirmed.id_typed(),
                proof: Some(proof()),
                confirmed_by: UserId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(matches!(
            confirmed.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::InvalidState(_))
        ));

        let mut deleted = drafted(output_draft(project_id, DocumentId::generate()));
        let edit = edit_of(&deleted);
        deleted
            .execute(&DocumentCommand::Delete(DeleteDocument {
                project_id,
                document_id: deleted.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert!(matches!(
            deleted.handle(&DocumentCommand::Edit(edit)),
            Err(DomainError::InvalidState(_))
        ));
    }

    #[test]
    fn wiring_is_enforced() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let doc = InvoiceDocument::empty(document_id);

        let mut cmd = output_draft(project_id, document_id);
        cmd.destination = Some(Location::warehouse(LocationId::new()));
        assert!(matches!(
            doc.handle(&DocumentCommand::Draft(cmd)),
            Err(DomainError::Validation(_))
        ));

        let mut cmd = output_draft(project_id, document_id);
        cmd.source = None;
        assert!(matches!(
            doc.handle(&DocumentCommand::Draft(cmd)),
            Err(DomainError::Validation(_))
        ));

        let mut cmd = output_draft(project_id, document_id);
        cmd.kind = DocumentKind::Correction;
        assert!(matches!(
            doc.handle(&DocumentCommand::Draft(cmd)),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn out_of_project_needs_a_distinct_target() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let doc = InvoiceDocument::empty(document_id);

        let mut cmd = output_draft(project_id, document_id);
        cmd.kind = DocumentKind::OutputOutOfProject;
        cmd.destination = Some(Location::warehouse(LocationId::new()));
        cmd.target_project = Some(project_id);
        assert!(doc.handle(&DocumentCommand::Draft(cmd.clone())).is_err());

        let target = ProjectId::new();
        cmd.target_project = Some(target);
        let doc = drafted(cmd);
        assert_eq!(doc.destination_project(), Some(target));
        let key = doc.destination_key(&doc.lines()[0]).unwrap();
        assert_eq!(key.project_id, target);
        assert_eq!(key.location.kind, LocationType::Warehouse);
    }

    #[test]
    fn missing_participants_are_listed() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut cmd = output_draft(project_id, document_id);
        cmd.participants = participants(&[ParticipantRole::Releaser]);
        let err = InvoiceDocument::empty(document_id)
            .handle(&DocumentCommand::Draft(cmd))
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("WarehouseManager"));
                assert!(msg.contains("Recipient"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn serial_codes_must_match_amount() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut cmd = output_draft(project_id, document_id);
        cmd.lines[0] = cmd.lines[0].clone().with_serials(["A", "B"]);
        assert!(matches!(
            InvoiceDocument::empty(document_id).handle(&DocumentCommand::Draft(cmd.clone())),
            Err(DomainError::Validation(_))
        ));

        cmd.lines[0] = cmd.lines[0].clone().with_serials(["A", "B", "A"]);
        assert!(matches!(
            InvoiceDocument::empty(document_id).handle(&DocumentCommand::Draft(cmd.clone())),
            Err(DomainError::Validation(_))
        ));

        cmd.lines[0] = cmd.lines[0].clone().with_serials(["A", "B", "C"]);
        assert!(InvoiceDocument::empty(document_id)
            .handle(&DocumentCommand::Draft(cmd))
            .is_ok());
    }

    #[test]
    fn only_returns_carry_defects_and_only_write_offs_carry_reasons() {
        let project_id = test_project_id();
        let document_id = DocumentId::generate();
        let mut cmd = output_draft(project_id, document_id);
        cmd.lines[0] = cmd.lines[0].clone().defective();
        assert!(InvoiceDocument::empty(document_id)
            .handle(&DocumentCommand::Draft(cmd))
            .is_err());

        let mut cmd = output_draft(project_id, document_id);
        cmd.write_off_reason = Some(WriteOffReason::Loss);
        assert!(InvoiceDocument::empty(document_id)
            .handle(&DocumentCommand::Draft(cmd))
            .is_err());
    }

    #[test]
    fn document_state_serializes() {
        let doc = drafted(output_draft(test_project_id(), DocumentId::generate()));
        let json = serde_json::to_string(&doc).unwrap();
        let back: InvoiceDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back, doc);
    }
}
