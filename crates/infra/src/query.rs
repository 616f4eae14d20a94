//! Read-side queries over movement documents.

use stockyard_core::{DomainError, ProjectId};
use stockyard_invoicing::{DocumentId, DocumentKind, DocumentStatus, InvoiceDocument};

use crate::store::{DocumentFilter, InventoryStore};
use crate::workflow::WorkflowError;

/// Document lookups scoped to a project.
///
/// Reads are lock-free; a document being confirmed may still show as a draft.
pub struct DocumentQueries<S> {
    store: S,
}

impl<S> DocumentQueries<S>
where
    S: InventoryStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// By id. Deleted drafts are still returned, with status `Deleted`.
    pub async fn by_id(
        &self,
        project_id: ProjectId,
        document_id: DocumentId,
    ) -> Result<InvoiceDocument, WorkflowError> {
        self.store
            .document(document_id)
            .await?
            .filter(|d| d.project_id() == Some(project_id))
            .ok_or_else(|| {
                DomainError::not_found(format!("document {document_id} in project {project_id}"))
                    .into()
            })
    }

    pub async fn by_delivery_code(
        &self,
        project_id: ProjectId,
        delivery_code: &str,
    ) -> Result<InvoiceDocument, WorkflowError> {
        self.store
            .document_by_code(project_id, delivery_code.trim())
            .await?
            .ok_or_else(|| {
                DomainError::not_found(format!(
                    "document {delivery_code} in project {project_id}"
                ))
                .into()
            })
    }

    /// Live documents in creation order.
    pub async fn list(
        &self,
        project_id: ProjectId,
        kind: Option<DocumentKind>,
        status: Option<DocumentStatus>,
    ) -> Result<Vec<InvoiceDocument>, WorkflowError> {
        Ok(self
            .store
            .documents(project_id, &DocumentFilter { kind, status })
            .await?)
    }
}
