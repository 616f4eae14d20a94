//! Infrastructure layer: stores, proof storage, configuration and the
//! services that run documents and corrections against them.

pub mod bootstrap;
pub mod config;
pub mod correction;
pub mod events;
pub mod ledger;
pub mod proof;
pub mod query;
pub mod store;
pub mod workflow;

pub use bootstrap::{AppServices, InventoryServices, build_in_memory_services, build_services};
pub use config::InventorySettings;
pub use correction::{CorrectionEngine, ReconcileRequest};
pub use events::{InventoryEnvelope, InventoryEvent};
pub use ledger::LocationLedger;
pub use proof::{FsProofStorage, InMemoryProofStorage, ProofStorage, ProofStorageError};
pub use query::DocumentQueries;
pub use store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore, StoreError};
pub use workflow::{
    ConfirmRequest, ConfirmationWorkflow, CreateDocumentRequest, LineRequest, LineTarget,
    WorkflowError,
};
