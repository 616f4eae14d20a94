//! Ledger domain module.
//!
//! Pure bookkeeping of material amounts per location and of serial-numbered
//! units. Nothing here does IO: the infra layer locks, loads a snapshot, runs a
//! [`LedgerTransaction`] and persists its [`LedgerChanges`].

pub mod allocation;
pub mod events;
pub mod key;
pub mod location;
pub mod material;
pub mod serial;
pub mod transaction;

pub use allocation::{AllocationOrder, Candidate, allocate};
pub use events::{LedgerEvent, StockAdjusted, StockMoved};
pub use key::{LedgerKey, LockKey, LockScope, SerialKey};
pub use location::{Location, LocationType};
pub use material::{InMemoryMaterialCatalog, Material, MaterialCatalog, MaterialCost};
pub use serial::{SerialNumber, SerialStatus, generated_serial_code};
pub use transaction::{
    LedgerChanges, LedgerSnapshot, LedgerTransaction, StockAdjustment, StockMovement,
};
