//! Staged ledger mutations against a locked snapshot.
//!
//! A [`LedgerTransaction`] never touches storage. The store locks the keys of a
//! [`LockScope`](crate::key::LockScope), loads a [`LedgerSnapshot`] for them,
//! lets the caller stage moves, adjustments and serial operations, and writes
//! back the resulting [`LedgerChanges`] only if every step succeeded.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockyard_core::{DomainError, DomainResult, MaterialCostId, MaterialId, ProjectId, Quantity};

use crate::key::{LedgerKey, SerialKey};
use crate::location::Location;
use crate::serial::{SerialNumber, SerialStatus};

/// State of the locked keys at the start of a unit of work.
///
/// Every entry key in scope is present (zero when the store had no row), and
/// every serial key in scope maps to `None` when the code is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub amounts: BTreeMap<LedgerKey, Quantity>,
    pub serials: BTreeMap<SerialKey, Option<SerialNumber>>,
}

impl LedgerSnapshot {
    pub fn amount(&self, key: &LedgerKey) -> Option<Quantity> {
        self.amounts.get(key).copied()
    }
}

/// One recorded movement between two ledger entries (either side may be absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub material_cost_id: MaterialCostId,
    pub from: Option<LedgerKey>,
    pub to: Option<LedgerKey>,
    pub quantity: Quantity,
}

/// One recorded adjustment of a single entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub key: LedgerKey,
    pub recorded: Quantity,
    pub delta: Decimal,
    pub resulting: Quantity,
}

/// Result of a successful transaction, ready to be written back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerChanges {
    /// New absolute amount for every touched entry.
    pub amounts: BTreeMap<LedgerKey, Quantity>,
    /// Serials to insert or update.
    pub serials: Vec<SerialNumber>,
    /// Serials that left their project (out-of-project transfers).
    pub removed_serials: Vec<SerialKey>,
    pub movements: Vec<StockMovement>,
    pub adjustments: Vec<StockAdjustment>,
}

impl LedgerChanges {
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty() && self.serials.is_empty() && self.removed_serials.is_empty()
    }
}

/// Working set for one atomic unit of ledger work.
#[derive(Debug)]
pub struct LedgerTransaction<'a> {
    snapshot: &'a LedgerSnapshot,
    serial_tracked: BTreeSet<MaterialCostId>,

    amounts: BTreeMap<LedgerKey, Quantity>,
    amount_deltas: BTreeMap<LedgerKey, Decimal>,
    serial_deltas: BTreeMap<LedgerKey, i64>,

    serials: BTreeMap<SerialKey, Option<SerialNumber>>,

    movements: Vec<StockMovement>,
    adjustments: Vec<StockAdjustment>,
}

impl<'a> LedgerTransaction<'a> {
    /// `serial_tracked` lists the material costs whose amounts must stay equal
    /// to their serial counts.
    pub fn new(
        snapshot: &'a LedgerSnapshot,
        serial_tracked: impl IntoIterator<Item = MaterialCostId>,
    ) -> Self {
        Self {
            snapshot,
            serial_tracked: serial_tracked.into_iter().collect(),
            amounts: BTreeMap::new(),
            amount_deltas: BTreeMap::new(),
            serial_deltas: BTreeMap::new(),
            serials: BTreeMap::new(),
            movements: Vec::new(),
            adjustments: Vec::new(),
        }
    }

    /// Current (staged) amount at `key`.
    pub fn amount(&self, key: &LedgerKey) -> DomainResult<Quantity> {
        if let Some(q) = self.amounts.get(key) {
            return Ok(*q);
        }
        self.snapshot
            .amount(key)
            .ok_or_else(|| DomainError::invariant(format!("ledger entry {key} is not locked")))
    }

    /// Current (staged) serial record, `None` when the code is unknown.
    pub fn serial(&self, key: &SerialKey) -> DomainResult<Option<&SerialNumber>> {
        if let Some(s) = self.serials.get(key) {
            return Ok(s.as_ref());
        }
        self.snapshot
            .serials
            .get(key)
            .map(Option::as_ref)
            .ok_or_else(|| DomainError::invariant(format!("serial {key} is not locked")))
    }

    fn existing_serial(&self, key: &SerialKey) -> DomainResult<SerialNumber> {
        self.serial(key)?
            .cloned()
            .ok_or_else(|| DomainError::not_found(format!("serial {key}")))
    }

    fn set_amount(&mut self, key: LedgerKey, value: Quantity, delta: Decimal) {
        self.amounts.insert(key, value);
        *self.amount_deltas.entry(key).or_default() += delta;
    }

    fn bump_serial_count(&mut self, key: LedgerKey, delta: i64) {
        *self.serial_deltas.entry(key).or_default() += delta;
    }

    /// Move `quantity` of one material cost from `from` to `to`.
    ///
    /// `from = None` brings stock in; `to = None` takes it out of the books.
    pub fn move_stock(
        &mut self,
        from: Option<LedgerKey>,
        to: Option<LedgerKey>,
        quantity: Quantity,
    ) -> DomainResult<()> {
        if quantity.is_zero() {
            return Err(DomainError::validation("moved amount must be positive"));
        }
        let material_cost_id = match (&from, &to) {
            (None, None) => {
                return Err(DomainError::validation(
                    "a movement needs a source or a destination",
                ));
            }
            (Some(f), Some(t)) if f == t => {
                return Err(DomainError::validation(format!(
                    "source and destination are the same entry ({f})"
                )));
            }
            (Some(f), Some(t)) if f.material_cost_id != t.material_cost_id => {
                return Err(DomainError::invariant(
                    "source and destination name different material costs",
                ));
            }
            (Some(f), _) => f.material_cost_id,
            (None, Some(t)) => t.material_cost_id,
        };

        // Read both sides before staging anything so a failure leaves no trace.
        let from_state = match from {
            Some(key) => {
                let available = self.amount(&key)?;
                let remaining = available.checked_sub(quantity).ok_or_else(|| {
                    DomainError::insufficient_stock(
                        key.to_string(),
                        available.value(),
                        quantity.value(),
                    )
                })?;
                Some((key, remaining))
            }
            None => None,
        };
        let to_state = match to {
            Some(key) => Some((key, self.amount(&key)?.checked_add(quantity)?)),
            None => None,
        };

        if let Some((key, remaining)) = from_state {
            self.set_amount(key, remaining, -quantity.value());
        }
        if let Some((key, next)) = to_state {
            self.set_amount(key, next, quantity.value());
        }
        self.movements.push(StockMovement {
            material_cost_id,
            from,
            to,
            quantity,
        });
        Ok(())
    }

    /// Apply a signed correction to one entry.
    pub fn adjust(&mut self, key: LedgerKey, delta: Decimal) -> DomainResult<StockAdjustment> {
        let recorded = self.amount(&key)?;
        let resulting = recorded.apply_delta(delta).map_err(|e| match e {
            DomainError::NegativeResult(_) => DomainError::negative_result(format!(
                "adjusting {key} by {delta} would go below zero (recorded {recorded})"
            )),
            other => other,
        })?;
        self.set_amount(key, resulting, delta);
        let adjustment = StockAdjustment {
            key,
            recorded,
            delta,
            resulting,
        };
        self.adjustments.push(adjustment.clone());
        Ok(adjustment)
    }

    /// Register a new serial at `location`. Only stock-bringing-in work does this.
    pub fn allocate_serial(
        &mut self,
        project_id: ProjectId,
        code: impl Into<String>,
        material_id: MaterialId,
        material_cost_id: MaterialCostId,
        location: Location,
    ) -> DomainResult<()> {
        let serial = SerialNumber::new(project_id, code, material_id, material_cost_id, location);
        let key = serial.key();
        if self.serial(&key)?.is_some() {
            return Err(DomainError::conflict(format!("serial {key} already exists")));
        }
        self.bump_serial_count(serial.ledger_key(), 1);
        self.serials.insert(key, Some(serial));
        Ok(())
    }

    /// Move a live serial to another location, possibly in another project.
    pub fn relocate_serial(
        &mut self,
        key: &SerialKey,
        to_project: ProjectId,
        to: Location,
    ) -> DomainResult<()> {
        let mut serial = self.existing_serial(key)?;
        if serial.is_written_off() {
            return Err(DomainError::invalid_state(format!(
                "serial {key} is written off"
            )));
        }
        self.bump_serial_count(serial.ledger_key(), -1);

        if to_project != serial.project_id {
            let target = SerialKey::new(to_project, serial.code.clone());
            if self.serial(&target)?.is_some() {
                return Err(DomainError::conflict(format!(
                    "serial {target} already exists"
                )));
            }
            self.serials.insert(key.clone(), None);
            serial.project_id = to_project;
        }

        serial.location = to;
        serial.status = SerialStatus::for_location(to.kind);
        self.bump_serial_count(serial.ledger_key(), 1);
        self.serials.insert(serial.key(), Some(serial));
        Ok(())
    }

    /// Terminal: the serial keeps its last location and never counts again.
    pub fn write_off_serial(&mut self, key: &SerialKey) -> DomainResult<()> {
        let mut serial = self.existing_serial(key)?;
        if serial.is_written_off() {
            return Err(DomainError::invalid_state(format!(
                "serial {key} is already written off"
            )));
        }
        self.bump_serial_count(serial.ledger_key(), -1);
        serial.status = SerialStatus::WrittenOff;
        self.serials.insert(key.clone(), Some(serial));
        Ok(())
    }

    /// Check the serial invariant on every touched entry and produce the change set.
    ///
    /// The invariant held before the transaction (every entry was written by a
    /// transaction that passed this check), so comparing deltas is enough.
    pub fn finish(self) -> DomainResult<LedgerChanges> {
        let touched: BTreeSet<LedgerKey> = self
            .amount_deltas
            .keys()
            .chain(self.serial_deltas.keys())
            .copied()
            .collect();
        for key in &touched {
            if !self.serial_tracked.contains(&key.material_cost_id) {
                if self.serial_deltas.get(key).is_some_and(|d| *d != 0) {
                    return Err(DomainError::invariant(format!(
                        "serials moved for {key}, which is not serial-tracked"
                    )));
                }
                continue;
            }
            let amount_delta = self.amount_deltas.get(key).copied().unwrap_or_default();
            let serial_delta = Decimal::from(self.serial_deltas.get(key).copied().unwrap_or(0));
            if amount_delta != serial_delta {
                return Err(DomainError::invariant(format!(
                    "amount change {amount_delta} at {key} does not match serial change {serial_delta}"
                )));
            }
        }

        let mut serials = Vec::new();
        let mut removed_serials = Vec::new();
        for (key, serial) in self.serials {
            match serial {
                Some(s) => serials.push(s),
                None => removed_serials.push(key),
            }
        }

        Ok(LedgerChanges {
            amounts: self.amounts,
            serials,
            removed_serials,
            movements: self.movements,
            adjustments: self.adjustments,
        })
    }
}
