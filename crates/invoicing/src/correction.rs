//! Records left behind by reconciliation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockyard_core::{CorrectionId, MaterialCostId, ProjectId, Quantity, UserId};
use stockyard_ledger::{LedgerKey, Location};

use crate::document::DocumentId;

/// One applied correction: the ledger said `recorded`, the count said `observed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRecord {
    pub id: CorrectionId,
    pub key: LedgerKey,
    pub document_id: Option<DocumentId>,
    pub recorded: Quantity,
    pub observed: Quantity,
    pub delta: Decimal,
    pub operator: UserId,
    pub created_at: DateTime<Utc>,
}

impl CorrectionRecord {
    pub fn project_id(&self) -> ProjectId {
        self.key.project_id
    }

    pub fn material_cost_id(&self) -> MaterialCostId {
        self.key.material_cost_id
    }

    pub fn location(&self) -> Location {
        self.key.location
    }
}

/// Defective quantity taken back into a warehouse by one return line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefectRecord {
    pub key: LedgerKey,
    pub quantity: Quantity,
}
