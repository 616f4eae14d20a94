//! Document kinds and the wiring table that drives the workflow.

use core::fmt;

use serde::{Deserialize, Serialize};

use stockyard_core::DomainError;
use stockyard_ledger::{AllocationOrder, LocationType};

/// The closed set of movement documents.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Input,
    Output,
    OutputOutOfProject,
    Return,
    WriteOff,
    Correction,
}

/// Role a worker plays on a document.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Releaser,
    Recipient,
    WarehouseManager,
    Driver,
    Supervisor,
}

/// Why stock left the books on a write-off.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOffReason {
    WriteOff,
    Loss,
}

/// Static per-kind rules.
#[derive(Debug)]
pub struct Wiring {
    /// Allowed source kinds; empty means the document has no source.
    pub sources: &'static [LocationType],
    /// Allowed destination kinds; empty means the document has no destination.
    pub destinations: &'static [LocationType],
    pub proof_required: bool,
    pub delivery_prefix: &'static str,
    pub required_roles: &'static [ParticipantRole],
    /// How material-level lines are split across costs; `None` if not allowed.
    pub allocation: Option<AllocationOrder>,
    /// Destination is a warehouse of another project.
    pub crosses_projects: bool,
}

use LocationType::{Object, Team, Warehouse};
use ParticipantRole::{Recipient, Releaser, WarehouseManager};

const INPUT: Wiring = Wiring {
    sources: &[],
    destinations: &[Warehouse],
    proof_required: false,
    delivery_prefix: "IN",
    required_roles: &[WarehouseManager, Releaser],
    allocation: None,
    crosses_projects: false,
};

const OUTPUT: Wiring = Wiring {
    sources: &[Warehouse],
    destinations: &[Team, Object],
    proof_required: true,
    delivery_prefix: "OUT",
    required_roles: &[WarehouseManager, Releaser, Recipient],
    allocation: Some(AllocationOrder::CheapestFirst),
    crosses_projects: false,
};

const OUTPUT_OUT_OF_PROJECT: Wiring = Wiring {
    sources: &[Warehouse],
    destinations: &[Warehouse],
    proof_required: false,
    delivery_prefix: "OUT",
    required_roles: &[Releaser],
    allocation: Some(AllocationOrder::CheapestFirst),
    crosses_projects: true,
};

const RETURN: Wiring = Wiring {
    sources: &[Team, Object],
    destinations: &[Warehouse],
    proof_required: true,
    delivery_prefix: "RET",
    required_roles: &[Recipient],
    allocation: Some(AllocationOrder::MostExpensiveFirst),
    crosses_projects: false,
};

const WRITE_OFF: Wiring = Wiring {
    sources: &[Team, Object, Warehouse],
    destinations: &[],
    proof_required: true,
    delivery_prefix: "WO",
    required_roles: &[Releaser],
    allocation: Some(AllocationOrder::CheapestFirst),
    crosses_projects: false,
};

const CORRECTION: Wiring = Wiring {
    sources: &[],
    destinations: &[],
    proof_required: false,
    delivery_prefix: "COR",
    required_roles: &[],
    allocation: None,
    crosses_projects: false,
};

impl DocumentKind {
    pub const ALL: [DocumentKind; 6] = [
        DocumentKind::Input,
        DocumentKind::Output,
        DocumentKind::OutputOutOfProject,
        DocumentKind::Return,
        DocumentKind::WriteOff,
        DocumentKind::Correction,
    ];

    pub fn wiring(self) -> &'static Wiring {
        match self {
            DocumentKind::Input => &INPUT,
            DocumentKind::Output => &OUTPUT,
            DocumentKind::OutputOutOfProject => &OUTPUT_OUT_OF_PROJECT,
            DocumentKind::Return => &RETURN,
            DocumentKind::WriteOff => &WRITE_OFF,
            DocumentKind::Correction => &CORRECTION,
        }
    }

    pub fn requires_proof(self) -> bool {
        self.wiring().proof_required
    }

    pub fn delivery_prefix(self) -> &'static str {
        self.wiring().delivery_prefix
    }

    /// Whether the source location is fixed up front (and can be pre-checked).
    pub fn has_source(self) -> bool {
        !self.wiring().sources.is_empty()
    }

    pub fn has_destination(self) -> bool {
        !self.wiring().destinations.is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Input => "input",
            DocumentKind::Output => "output",
            DocumentKind::OutputOutOfProject => "output_out_of_project",
            DocumentKind::Return => "return",
            DocumentKind::WriteOff => "write_off",
            DocumentKind::Correction => "correction",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown document kind: {s}")))
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<PREFIX>-<NNNNN>`, e.g. `OUT-00042`.
pub fn format_delivery_code(prefix: &str, sequence: u64) -> String {
    format!("{prefix}-{sequence:05}")
}
