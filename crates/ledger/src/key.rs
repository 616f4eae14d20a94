//! Ledger keys and the lock scope derived from them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use stockyard_core::{AggregateId, MaterialCostId, ProjectId, ValueObject};

use crate::location::Location;

/// Identity of one ledger entry.
///
/// Field order matters: the derived `Ord` sorts by material cost, then
/// location, then project, which is the order locks are taken in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    pub material_cost_id: MaterialCostId,
    pub location: Location,
    pub project_id: ProjectId,
}

impl LedgerKey {
    pub fn new(project_id: ProjectId, material_cost_id: MaterialCostId, location: Location) -> Self {
        Self {
            material_cost_id,
            location,
            project_id,
        }
    }
}

impl core::fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}@{} (project {})",
            self.material_cost_id, self.location, self.project_id
        )
    }
}

impl ValueObject for LedgerKey {}

/// Identity of a serial number: codes are unique per project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SerialKey {
    pub project_id: ProjectId,
    pub code: String,
}

impl SerialKey {
    pub fn new(project_id: ProjectId, code: impl Into<String>) -> Self {
        Self {
            project_id,
            code: code.into(),
        }
    }
}

impl core::fmt::Display for SerialKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} (project {})", self.code, self.project_id)
    }
}

/// One lockable resource. Variant order is acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Document(AggregateId),
    Entry(LedgerKey),
    Serial(SerialKey),
}

/// Everything a unit of work needs exclusive access to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockScope {
    pub document: Option<AggregateId>,
    pub entries: BTreeSet<LedgerKey>,
    pub serials: BTreeSet<SerialKey>,
}

impl LockScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_document(document: AggregateId) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }

    pub fn with_entry(mut self, key: LedgerKey) -> Self {
        self.entries.insert(key);
        self
    }

    pub fn add_entry(&mut self, key: LedgerKey) {
        self.entries.insert(key);
    }

    pub fn add_serial(&mut self, key: SerialKey) {
        self.serials.insert(key);
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_none() && self.entries.is_empty() && self.serials.is_empty()
    }

    /// Keys in deterministic acquisition order.
    pub fn lock_order(&self) -> Vec<LockKey> {
        let mut keys = Vec::with_capacity(
            usize::from(self.document.is_some()) + self.entries.len() + self.serials.len(),
        );
        keys.extend(self.document.map(LockKey::Document));
        keys.extend(self.entries.iter().copied().map(LockKey::Entry));
        keys.extend(self.serials.iter().cloned().map(LockKey::Serial));
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationType;
    use stockyard_core::LocationId;

    #[test]
    fn lock_order_is_document_then_entries_then_serials() {
        let project = ProjectId::new();
        let doc = AggregateId::new();
        let a = LedgerKey::new(project, MaterialCostId::new(), Location::warehouse(LocationId::new()));
        let b = LedgerKey::new(
            project,
            MaterialCostId::new(),
            Location::new(LocationType::Team, LocationId::new()),
        );

        let mut scope = LockScope::for_document(doc);
        scope.add_serial(SerialKey::new(project, "SN-2"));
        scope.add_serial(SerialKey::new(project, "SN-1"));
        scope.add_entry(b);
        scope.add_entry(a);

        let order = scope.lock_order();
        assert_eq!(order.len(), 5);
        assert_eq!(order[0], LockKey::Document(doc));
        assert_eq!(order[1], LockKey::Entry(a.min(b)));
        assert_eq!(order[2], LockKey::Entry(a.max(b)));
        assert_eq!(order[3], LockKey::Serial(SerialKey::new(project, "SN-1")));
        assert_eq!(order[4], LockKey::Serial(SerialKey::new(project, "SN-2")));

        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, order);
    }

    #[test]
    fn keys_sort_by_cost_before_location() {
        let project = ProjectId::new();
        let low = MaterialCostId::new();
        let high = MaterialCostId::new();
        let w = Location::warehouse(LocationId::new());
        let t = Location::team(LocationId::new());
        assert!(LedgerKey::new(project, low, t) < LedgerKey::new(project, high, w));
    }
}
