//! Where stock can be.

use core::fmt;

use serde::{Deserialize, Serialize};

use stockyard_core::{DomainError, LocationId, ValueObject};

/// Kind of place a material can sit in (or leave through).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationType {
    Warehouse,
    Team,
    Object,
    WriteOff,
    Return,
    ExternalProject,
}

impl LocationType {
    pub const ALL: [LocationType; 6] = [
        LocationType::Warehouse,
        LocationType::Team,
        LocationType::Object,
        LocationType::WriteOff,
        LocationType::Return,
        LocationType::ExternalProject,
    ];

    /// Warehouses, teams and objects hold stock that counts towards a project's
    /// internal total. The other kinds are sinks.
    pub fn is_internal(self) -> bool {
        matches!(
            self,
            LocationType::Warehouse | LocationType::Team | LocationType::Object
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LocationType::Warehouse => "warehouse",
            LocationType::Team => "team",
            LocationType::Object => "object",
            LocationType::WriteOff => "write_off",
            LocationType::Return => "return",
            LocationType::ExternalProject => "external_project",
        }
    }

    pub fn parse(s: &str) -> Result<Self, DomainError> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown location type: {s}")))
    }
}

impl fmt::Display for LocationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque (kind, id) pair. The ledger never interprets the id.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub kind: LocationType,
    pub id: LocationId,
}

impl Location {
    pub fn new(kind: LocationType, id: LocationId) -> Self {
        Self { kind, id }
    }

    pub fn warehouse(id: LocationId) -> Self {
        Self::new(LocationType::Warehouse, id)
    }

    pub fn team(id: LocationId) -> Self {
        Self::new(LocationType::Team, id)
    }

    pub fn object(id: LocationId) -> Self {
        Self::new(LocationType::Object, id)
    }

    pub fn is_internal(&self) -> bool {
        self.kind.is_internal()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl ValueObject for Location {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_warehouse_team_object_are_internal() {
        let internal: Vec<_> = LocationType::ALL
            .into_iter()
            .filter(|k| k.is_internal())
            .collect();
        assert_eq!(
            internal,
            vec![LocationType::Warehouse, LocationType::Team, LocationType::Object]
        );
    }

    #[test]
    fn parse_accepts_stored_names() {
        for kind in LocationType::ALL {
            assert_eq!(LocationType::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(LocationType::parse("garage").is_err());
    }
}
