//! Invoicing domain module: movement documents.
//!
//! Documents are drafted without touching the ledger and confirmed exactly
//! once. Confirmation is translated into ledger operations by [`posting`];
//! the infra layer runs that translation under lock.

pub mod correction;
pub mod document;
pub mod kind;
pub mod posting;

pub use correction::{CorrectionRecord, DefectRecord};
pub use document::{
    ConfirmDocument, DeleteDocument, DocumentCommand, DocumentConfirmed, DocumentDeleted,
    DocumentDrafted, DocumentEdited, DocumentEvent, DocumentId, DocumentStatus, DraftDocument,
    EditDocument, InvoiceDocument, LineItem, Participant, ProofRef,
};
pub use kind::{DocumentKind, ParticipantRole, Wiring, WriteOffReason, format_delivery_code};
