//! Translating a confirmed document into ledger operations.

use std::collections::BTreeSet;

use stockyard_core::{DomainError, DomainResult, MaterialCostId};
use stockyard_ledger::{LedgerTransaction, LockScope, MaterialCatalog, SerialKey};

use crate::correction::DefectRecord;
use crate::document::{InvoiceDocument, LineItem};
use crate::kind::DocumentKind;

/// Everything confirming `doc` needs to lock: the document itself, every
/// source and destination entry, and every serial code (in both projects for
/// out-of-project transfers).
pub fn lock_scope(doc: &InvoiceDocument) -> DomainResult<LockScope> {
    let project = doc
        .project_id()
        .ok_or_else(|| DomainError::invariant("document has no project"))?;
    let mut scope = LockScope::for_document(doc.id_typed().0);
    for line in doc.lines() {
        if let Some(key) = doc.source_key(line) {
            scope.add_entry(key);
        }
        if let Some(key) = doc.destination_key(line) {
            scope.add_entry(key);
        }
        for code in &line.serial_codes {
            scope.add_serial(SerialKey::new(project, code.clone()));
            if let Some(target) = doc.target_project() {
                scope.add_serial(SerialKey::new(target, code.clone()));
            }
        }
    }
    Ok(scope)
}

/// Material costs on `doc` whose material is serial-tracked.
pub fn serial_tracked_costs(
    doc: &InvoiceDocument,
    catalog: &dyn MaterialCatalog,
) -> DomainResult<BTreeSet<MaterialCostId>> {
    let mut tracked = BTreeSet::new();
    for line in doc.lines() {
        let (_, material) = catalog.resolve(line.material_cost_id)?;
        if material.serial_tracked {
            tracked.insert(line.material_cost_id);
        }
    }
    Ok(tracked)
}

/// Stage every line of `doc` on `tx`. Returns the defect tally entries.
pub fn post(
    doc: &InvoiceDocument,
    tx: &mut LedgerTransaction<'_>,
    catalog: &dyn MaterialCatalog,
) -> DomainResult<Vec<DefectRecord>> {
    let mut defects = Vec::new();
    for line in doc.lines() {
        post_line(doc, line, tx, catalog)?;
        if line.defective {
            let key = doc
                .destination_key(line)
                .ok_or_else(|| DomainError::invariant("defective line without destination"))?;
            defects.push(DefectRecord {
                key,
                quantity: line.quantity,
            });
        }
    }
    Ok(defects)
}

fn post_line(
    doc: &InvoiceDocument,
    line: &LineItem,
    tx: &mut LedgerTransaction<'_>,
    catalog: &dyn MaterialCatalog,
) -> DomainResult<()> {
    let project = doc
        .project_id()
        .ok_or_else(|| DomainError::invariant("document has no project"))?;
    let from = doc.source_key(line);
    let to = doc.destination_key(line);

    tx.move_stock(from, to, line.quantity)?;

    if line.serial_codes.is_empty() {
        return Ok(());
    }
    let (cost, _) = catalog.resolve(line.material_cost_id)?;

    for code in &line.serial_codes {
        let key = SerialKey::new(project, code.clone());

        if doc.kind() == DocumentKind::Input {
            let dest = to.ok_or_else(|| DomainError::invariant("input without destination"))?;
            tx.allocate_serial(project, code.clone(), cost.material_id, cost.id, dest.location)?;
            continue;
        }

        let serial = tx
            .serial(&key)?
            .ok_or_else(|| DomainError::not_found(format!("serial {key}")))?;
        if serial.is_written_off() {
            return Err(DomainError::invalid_state(format!("serial {key} is written off")));
        }
        if serial.material_cost_id != line.material_cost_id {
            return Err(DomainError::validation(format!(
                "serial {key} belongs to another material cost"
            )));
        }
        if Some(serial.ledger_key()) != from {
            return Err(DomainError::invalid_state(format!(
                "serial {key} is not at {}",
                from.map(|k| k.location.to_string()).unwrap_or_default()
            )));
        }

        match to {
            Some(dest) => tx.relocate_serial(&key, dest.project_id, dest.location)?,
            None => tx.write_off_serial(&key)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentCommand, DocumentId, DraftDocument, Participant};
    use crate::kind::{ParticipantRole, WriteOffReason};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use stockyard_core::{
        Aggregate, LocationId, MaterialId, ProjectId, Quantity, UserId, WorkerId,
    };
    use stockyard_ledger::{
        InMemoryMaterialCatalog, LedgerSnapshot, Location, Material, MaterialCost, SerialNumber,
        SerialStatus,
    };

    struct World {
        project: ProjectId,
        catalog: InMemoryMaterialCatalog,
        bulk: MaterialCostId,
        serial: MaterialCostId,
        serial_material: MaterialId,
        warehouse: Location,
        team: Location,
    }

    fn world() -> World {
        let project = ProjectId::new();
        let catalog = InMemoryMaterialCatalog::new();
        let mut ids = Vec::new();
        for tracked in [false, true] {
            let material = Material {
                id: MaterialId::new(),
                project_id: project,
                name: "m".into(),
                unit: "pcs".into(),
                serial_tracked: tracked,
            };
            let cost =
                MaterialCost::new(MaterialCostId::new(), material.id, dec!(1), dec!(1), dec!(1))
                    .unwrap();
            ids.push((material.id, cost.id));
            catalog.register_material(material).unwrap();
            catalog.register_cost(cost).unwrap();
        }
        World {
            project,
            catalog,
            bulk: ids[0].1,
            serial: ids[1].1,
            serial_material: ids[1].0,
            warehouse: Location::warehouse(LocationId::new()),
            team: Location::team(LocationId::new()),
        }
    }

    fn all_roles() -> Vec<Participant> {
        [
            ParticipantRole::Releaser,
            ParticipantRole::Recipient,
            ParticipantRole::WarehouseManager,
        ]
        .into_iter()
        .map(|role| Participant {
            role,
            worker_id: WorkerId::new(),
        })
        .collect()
    }

    fn doc(
        w: &World,
        kind: DocumentKind,
        source: Option<Location>,
        destination: Option<Location>,
        lines: Vec<LineItem>,
    ) -> InvoiceDocument {
        let id = DocumentId::generate();
        let mut doc = InvoiceDocument::empty(id);
        doc.execute(&DocumentCommand::Draft(DraftDocument {
            project_id: w.project,
            document_id: id,
            kind,
            delivery_code: "X-00001".into(),
            source,
            destination,
            target_project: None,
            participants: all_roles(),
            lines,
            notes: None,
            write_off_reason: (kind == DocumentKind::WriteOff).then_some(WriteOffReason::Loss),
            created_by: UserId::new(),
            occurred_at: Utc::now(),
        }))
        .unwrap();
        doc
    }

    fn snapshot_for(doc: &InvoiceDocument, existing: &[(SerialNumber, u64)]) -> LedgerSnapshot {
        let scope = lock_scope(doc).unwrap();
        let mut snap = LedgerSnapshot::default();
        for key in scope.entries {
            snap.amounts.insert(key, Quantity::ZERO);
        }
        for key in scope.serials {
            snap.serials.insert(key, None);
        }
        for (serial, _) in existing {
            snap.serials.insert(serial.key(), Some(serial.clone()));
        }
        for (serial, amount) in existing {
            snap.amounts
                .insert(serial.ledger_key(), Quantity::from_units(*amount));
        }
        snap
    }

    #[test]
    fn input_allocates_serials_at_destination() {
        let w = world();
        let d = doc(
            &w,
            DocumentKind::Input,
            None,
            Some(w.warehouse),
            vec![
                LineItem::new(w.serial, Quantity::from_units(2)).with_serials(["S1", "S2"]),
                LineItem::new(w.bulk, Quantity::from_units(10)),
            ],
        );
        let snap = snapshot_for(&d, &[]);
        let tracked = serial_tracked_costs(&d, &w.catalog).unwrap();
        let mut tx = LedgerTransaction::new(&snap, tracked);
        post(&d, &mut tx, &w.catalog).unwrap();
        let changes = tx.finish().unwrap();

        assert_eq!(changes.serials.len(), 2);
        assert!(changes.serials.iter().all(|s| s.status == SerialStatus::InStock));
        assert_eq!(changes.movements.len(), 2);
    }

    #[test]
    fn output_rejects_serial_not_at_source() {
        let w = world();
        let elsewhere = Location::warehouse(LocationId::new());
        let serial = SerialNumber::new(w.project, "S1", w.serial_material, w.serial, elsewhere);
        let d = doc(
            &w,
            DocumentKind::Output,
            Some(w.warehouse),
            Some(w.team),
            vec![LineItem::new(w.serial, Quantity::from_units(1)).with_serials(["S1"])],
        );
        let mut snap = snapshot_for(&d, &[(serial, 1)]);
        snap.amounts.insert(
            d.source_key(&d.lines()[0]).unwrap(),
            Quantity::from_units(1),
        );
        let mut tx = LedgerTransaction::new(&snap, [w.serial]);
        let err = post(&d, &mut tx, &w.catalog).unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[test]
    fn write_off_marks_serial_and_return_tallies_defects() {
        let w = world();
        let serial = SerialNumber::new(w.project, "S1", w.serial_material, w.serial, w.team);

        let d = doc(
            &w,
            DocumentKind::WriteOff,
            Some(w.team),
            None,
            vec![LineItem::new(w.serial, Quantity::from_units(1)).with_serials(["S1"])],
        );
        let snap = snapshot_for(&d, &[(serial, 1)]);
        let mut tx = LedgerTransaction::new(&snap, [w.serial]);
        post(&d, &mut tx, &w.catalog).unwrap();
        let changes = tx.finish().unwrap();
        assert_eq!(changes.serials[0].status, SerialStatus::WrittenOff);

        let r = doc(
            &w,
            DocumentKind::Return,
            Some(w.team),
            Some(w.warehouse),
            vec![LineItem::new(w.bulk, Quantity::from_units(4)).defective()],
        );
        let mut snap = snapshot_for(&r, &[]);
        snap.amounts
            .insert(r.source_key(&r.lines()[0]).unwrap(), Quantity::from_units(4));
        let mut tx = LedgerTransaction::new(&snap, []);
        let defects = post(&r, &mut tx, &w.catalog).unwrap();
        assert_eq!(defects.len(), 1);
        assert_eq!(defects[0].key.location, w.warehouse);
        assert_eq!(defects[0].quantity, Quantity::from_units(4));
    }
}
