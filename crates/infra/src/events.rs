//! Event publication after commit.
//!
//! Document and ledger events share one bus message type so a single
//! subscriber sees them in commit order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use stockyard_core::{AggregateId, CorrectionId, ProjectId};
use stockyard_events::{Event, EventBus, EventEnvelope};
use stockyard_invoicing::{CorrectionRecord, DocumentEvent, DocumentId};
use stockyard_ledger::{LedgerChanges, LedgerEvent, StockAdjusted, StockMoved};

pub const DOCUMENT_AGGREGATE: &str = "invoicing.document";
pub const LEDGER_AGGREGATE: &str = "ledger.location";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stream", content = "event", rename_all = "snake_case")]
pub enum InventoryEvent {
    Document(DocumentEvent),
    Ledger(LedgerEvent),
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::Document(e) => e.event_type(),
            InventoryEvent::Ledger(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            InventoryEvent::Document(e) => e.version(),
            InventoryEvent::Ledger(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::Document(e) => e.occurred_at(),
            InventoryEvent::Ledger(e) => e.occurred_at(),
        }
    }
}

pub type InventoryEnvelope = EventEnvelope<InventoryEvent>;

/// Envelope for a document event. `version` is the document version after it.
pub fn document_envelope(event: DocumentEvent, version: u64) -> InventoryEnvelope {
    EventEnvelope::new(
        Uuid::now_v7(),
        event.project_id(),
        event.document_id().0,
        DOCUMENT_AGGREGATE,
        version,
        InventoryEvent::Document(event),
    )
}

/// One `StockMoved` envelope per movement of a confirmed document.
pub fn movement_envelopes(
    project_id: ProjectId,
    document_id: DocumentId,
    changes: &LedgerChanges,
    occurred_at: DateTime<Utc>,
) -> Vec<InventoryEnvelope> {
    changes
        .movements
        .iter()
        .enumerate()
        .map(|(i, movement)| {
            EventEnvelope::new(
                Uuid::now_v7(),
                project_id,
                document_id.0,
                LEDGER_AGGREGATE,
                i as u64 + 1,
                InventoryEvent::Ledger(LedgerEvent::StockMoved(StockMoved {
                    document_id: Some(document_id.0),
                    material_cost_id: movement.material_cost_id,
                    from: movement.from,
                    to: movement.to,
                    quantity: movement.quantity,
                    occurred_at,
                })),
            )
        })
        .collect()
}

/// `StockAdjusted` envelope for a correction.
pub fn correction_envelope(record: &CorrectionRecord) -> InventoryEnvelope {
    EventEnvelope::new(
        Uuid::now_v7(),
        record.project_id(),
        correction_aggregate(record.id),
        LEDGER_AGGREGATE,
        1,
        InventoryEvent::Ledger(LedgerEvent::StockAdjusted(StockAdjusted {
            correction_id: record.id,
            key: record.key,
            delta: record.delta,
            resulting: record.observed,
            operator: record.operator,
            occurred_at: record.created_at,
        })),
    )
}

fn correction_aggregate(id: CorrectionId) -> AggregateId {
    AggregateId::from_uuid(*id.as_uuid())
}

/// Publish committed envelopes. Failures are logged: the state they describe
/// is already durable and nothing can be rolled back.
pub fn publish_all<B>(bus: &B, envelopes: Vec<InventoryEnvelope>)
where
    B: EventBus<InventoryEnvelope>,
{
    for envelope in envelopes {
        let event_type = envelope.payload().event_type();
        if let Err(error) = bus.publish(envelope) {
            warn!(event_type, ?error, "event publication failed after commit");
        }
    }
}
