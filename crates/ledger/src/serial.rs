//! Individually identified units.

use serde::{Deserialize, Serialize};

use stockyard_core::{Entity, MaterialCostId, MaterialId, ProjectId};

use crate::key::{LedgerKey, SerialKey};
use crate::location::{Location, LocationType};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialStatus {
    InStock,
    Issued,
    WrittenOff,
}

impl SerialStatus {
    /// Status a live serial has while resident at `kind`.
    pub fn for_location(kind: LocationType) -> Self {
        match kind {
            LocationType::Team | LocationType::Object => SerialStatus::Issued,
            _ => SerialStatus::InStock,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SerialStatus::InStock => "in_stock",
            SerialStatus::Issued => "issued",
            SerialStatus::WrittenOff => "written_off",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(SerialStatus::InStock),
            "issued" => Some(SerialStatus::Issued),
            "written_off" => Some(SerialStatus::WrittenOff),
            _ => None,
        }
    }
}

/// A serial-numbered unit and where it currently is.
///
/// A written-off serial keeps the location it was written off from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumber {
    pub project_id: ProjectId,
    pub code: String,
    pub material_id: MaterialId,
    pub material_cost_id: MaterialCostId,
    pub location: Location,
    pub status: SerialStatus,
}

impl SerialNumber {
    pub fn new(
        project_id: ProjectId,
        code: impl Into<String>,
        material_id: MaterialId,
        material_cost_id: MaterialCostId,
        location: Location,
    ) -> Self {
        Self {
            project_id,
            code: code.into(),
            material_id,
            material_cost_id,
            location,
            status: SerialStatus::for_location(location.kind),
        }
    }

    pub fn key(&self) -> SerialKey {
        SerialKey::new(self.project_id, self.code.clone())
    }

    /// Ledger entry this serial is counted in.
    pub fn ledger_key(&self) -> LedgerKey {
        LedgerKey::new(self.project_id, self.material_cost_id, self.location)
    }

    pub fn is_written_off(&self) -> bool {
        self.status == SerialStatus::WrittenOff
    }
}

impl Entity for SerialNumber {
    type Id = String;

    fn id(&self) -> &Self::Id {
        &self.code
    }
}

/// Code given to a serial when the caller supplied none: `SN-<material prefix>-<sequence>`.
pub fn generated_serial_code(material_id: MaterialId, sequence: u64) -> String {
    let simple = material_id.as_uuid().simple().to_string().to_uppercase();
    // v7 ids share their leading timestamp bits, so take the random tail.
    let prefix = &simple[simple.len() - 8..];
    format!("SN-{prefix}-{sequence:06}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockyard_core::LocationId;

    #[test]
    fn status_follows_location_kind() {
        assert_eq!(SerialStatus::for_location(LocationType::Warehouse), SerialStatus::InStock);
        assert_eq!(SerialStatus::for_location(LocationType::Team), SerialStatus::Issued);
        assert_eq!(SerialStatus::for_location(LocationType::Object), SerialStatus::Issued);
    }

    #[test]
    fn generated_codes_are_stable_and_padded() {
        let material = MaterialId::new();
        let a = generated_serial_code(material, 7);
        assert!(a.starts_with("SN-"));
        assert!(a.ends_with("-000007"));
        assert_eq!(a, generated_serial_code(material, 7));
        assert_ne!(a, generated_serial_code(material, 8));
    }

    #[test]
    fn ledger_key_uses_current_location() {
        let s = SerialNumber::new(
            ProjectId::new(),
            "SN-1",
            MaterialId::new(),
            MaterialCostId::new(),
            Location::warehouse(LocationId::new()),
        );
        assert_eq!(s.ledger_key().location, s.location);
        assert_eq!(s.status, SerialStatus::InStock);
    }
}
