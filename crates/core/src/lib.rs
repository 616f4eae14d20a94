//! `stockyard-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the error taxonomy, the decimal quantity type and the aggregate
//! traits shared by the ledger and invoicing crates.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;
pub mod quantity;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateId, CorrectionId, LocationId, MaterialCostId, MaterialId, ProjectId, UserId,
    WorkerId,
};
pub use quantity::Quantity;
pub use value_object::ValueObject;
