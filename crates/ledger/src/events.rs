//! Ledger events, published after the store commits.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockyard_core::{AggregateId, CorrectionId, MaterialCostId, Quantity, UserId};
use stockyard_events::Event;

use crate::key::LedgerKey;

/// Event: StockMoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMoved {
    pub document_id: Option<AggregateId>,
    pub material_cost_id: MaterialCostId,
    pub from: Option<LedgerKey>,
    pub to: Option<LedgerKey>,
    pub quantity: Quantity,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub correction_id: CorrectionId,
    pub key: LedgerKey,
    pub delta: Decimal,
    pub resulting: Quantity,
    pub operator: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    StockMoved(StockMoved),
    StockAdjusted(StockAdjusted),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::StockMoved(_) => "ledger.stock.moved",
            LedgerEvent::StockAdjusted(_) => "ledger.stock.adjusted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::StockMoved(e) => e.occurred_at,
            LedgerEvent::StockAdjusted(e) => e.occurred_at,
        }
    }
}
