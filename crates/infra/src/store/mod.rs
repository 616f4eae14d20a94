//! Transactional storage for the ledger, the serial registry and documents.
//!
//! Two backends implement [`InventoryStore`]: an in-process one for tests and
//! single-node use, and a Postgres one. Both lock the keys of a
//! [`stockyard_ledger::LockScope`] in the same global order and give up with
//! `DomainError::Busy` after the configured timeout.

pub mod in_memory;
pub mod lock_table;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryInventoryStore;
pub use lock_table::{LockGuards, LockTable};
pub use postgres::PostgresInventoryStore;
pub use r#trait::{ChangeSet, DocumentFilter, InventoryStore, LockedState, StoreError, UnitOfWork};
