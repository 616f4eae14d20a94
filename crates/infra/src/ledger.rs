//! Location ledger facade.
//!
//! Reads go straight to the store. Writes build a one-shot
//! [`LedgerTransaction`] and run it through [`InventoryStore::transact`], so
//! they take the same locks as document confirmation.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::instrument;

use stockyard_core::{DomainError, MaterialCostId, ProjectId, Quantity};
use stockyard_invoicing::DefectRecord;
use stockyard_ledger::{
    LedgerKey, LedgerTransaction, Location, LockScope, MaterialCatalog, SerialNumber,
    StockMovement,
};

use crate::store::{ChangeSet, InventoryStore, LockedState, StoreError};

pub struct LocationLedger<S> {
    store: S,
    catalog: Arc<dyn MaterialCatalog>,
}

impl<S> LocationLedger<S>
where
    S: InventoryStore,
{
    pub fn new(store: S, catalog: Arc<dyn MaterialCatalog>) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Amount of one material cost at one location; zero when never touched.
    pub async fn get_amount(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
        location: Location,
    ) -> Result<Quantity, StoreError> {
        self.store
            .amount(&LedgerKey::new(project_id, material_cost_id, location))
            .await
    }

    pub async fn entries_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<(MaterialCostId, Quantity)>, StoreError> {
        Ok(self
            .store
            .entries_at(project_id, location)
            .await?
            .into_iter()
            .map(|(key, amount)| (key.material_cost_id, amount))
            .collect())
    }

    /// Sum over warehouses, teams and objects of the project.
    pub async fn internal_total(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
    ) -> Result<Quantity, StoreError> {
        let entries = self.store.entries_for_cost(project_id, material_cost_id).await?;
        Ok(Quantity::checked_sum(
            entries
                .into_iter()
                .filter(|(key, _)| key.location.is_internal())
                .map(|(_, amount)| amount),
        )?)
    }

    pub async fn serials_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<String>, StoreError> {
        Ok(self
            .store
            .serials_at(project_id, location)
            .await?
            .into_iter()
            .map(|s| s.code)
            .collect())
    }

    pub async fn serial(
        &self,
        project_id: ProjectId,
        code: &str,
    ) -> Result<Option<SerialNumber>, StoreError> {
        self.store
            .serial(&stockyard_ledger::SerialKey::new(project_id, code))
            .await
    }

    pub async fn defects_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<DefectRecord>, StoreError> {
        self.store.defects_at(project_id, location).await
    }

    /// Move bulk stock between two entries of one project.
    ///
    /// Serial-tracked costs are rejected: their units move on documents that
    /// name the codes.
    #[instrument(skip(self), fields(project_id = %project_id, material_cost_id = %material_cost_id), err)]
    pub async fn move_stock(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
        from: Option<Location>,
        to: Option<Location>,
        quantity: Quantity,
    ) -> Result<StockMovement, StoreError> {
        self.ensure_bulk(material_cost_id)?;
        let from = from.map(|loc| LedgerKey::new(project_id, material_cost_id, loc));
        let to = to.map(|loc| LedgerKey::new(project_id, material_cost_id, loc));

        let mut scope = LockScope::new();
        scope.entries.extend(from.iter().chain(to.iter()).copied());

        let changes = self
            .store
            .transact(
                scope,
                Box::new(move |locked: &LockedState| -> Result<ChangeSet, DomainError> {
                    let mut tx = LedgerTransaction::new(&locked.ledger, BTreeSet::new());
                    tx.move_stock(from, to, quantity)?;
                    Ok(ChangeSet {
                        ledger: tx.finish()?,
                        ..Default::default()
                    })
                }),
            )
            .await?;

        changes
            .ledger
            .movements
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::invariant("movement was not recorded").into())
    }

    fn ensure_bulk(&self, material_cost_id: MaterialCostId) -> Result<(), DomainError> {
        let (_, material) = self.catalog.resolve(material_cost_id)?;
        if material.serial_tracked {
            return Err(DomainError::negative_result(format!(
                "material {} is serial-tracked; move its units by serial code",
                material.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryInventoryStore;
    use rust_decimal_macros::dec;
    use stockyard_core::{LocationId, MaterialId};
    use stockyard_ledger::{InMemoryMaterialCatalog, Material, MaterialCost};

    struct Fixture {
        ledger: LocationLedger<InMemoryInventoryStore>,
        project: ProjectId,
        cost: MaterialCostId,
        serial_cost: MaterialCostId,
        warehouse: Location,
        team: Location,
    }

    fn fixture() -> Fixture {
        let project = ProjectId::new();
        let catalog = InMemoryMaterialCatalog::new();
        let mut costs = Vec::new();
        for serial_tracked in [false, true] {
            let material = MaterialId::new();
            catalog
                .register_material(Material {
                    id: material,
                    project_id: project,
                    name: if serial_tracked { "drill" } else { "cable" }.into(),
                    unit: "pcs".into(),
                    serial_tracked,
                })
                .unwrap();
            let cost =
                MaterialCost::new(MaterialCostId::new(), material, dec!(1), dec!(1), dec!(1)).unwrap();
            costs.push(cost.id);
            catalog.register_cost(cost).unwrap();
        }
        Fixture {
            ledger: LocationLedger::new(InMemoryInventoryStore::default(), Arc::new(catalog)),
            project,
            cost: costs[0],
            serial_cost: costs[1],
            warehouse: Location::warehouse(LocationId::new()),
            team: Location::team(LocationId::new()),
        }
    }

    #[tokio::test]
    async fn move_conserves_and_rejects_shortfall() {
        let f = fixture();
        f.ledger
            .move_stock(f.project, f.cost, None, Some(f.warehouse), Quantity::from_units(10))
            .await
            .unwrap();
        f.ledger
            .move_stock(f.project, f.cost, Some(f.warehouse), Some(f.team), Quantity::from_units(4))
            .await
            .unwrap();

        let err = f
            .ledger
            .move_stock(f.project, f.cost, Some(f.team), Some(f.warehouse), Quantity::from_units(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::InsufficientStock { .. })));

        assert_eq!(
            f.ledger.get_amount(f.project, f.cost, f.warehouse).await.unwrap(),
            Quantity::from_units(6)
        );
        assert_eq!(
            f.ledger.get_amount(f.project, f.cost, f.team).await.unwrap(),
            Quantity::from_units(4)
        );
        assert_eq!(
            f.ledger.internal_total(f.project, f.cost).await.unwrap(),
            Quantity::from_units(10)
        );
    }

    #[tokio::test]
    async fn serial_tracked_costs_cannot_move_in_bulk() {
        let f = fixture();
        let err = f
            .ledger
            .move_stock(f.project, f.serial_cost, None, Some(f.warehouse), Quantity::from_units(1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::NegativeResult(_))));
    }

    #[tokio::test]
    async fn entries_at_lists_non_zero_amounts() {
        let f = fixture();
        f.ledger
            .move_stock(f.project, f.cost, None, Some(f.warehouse), Quantity::from_units(2))
            .await
            .unwrap();
        f.ledger
            .move_stock(f.project, f.cost, Some(f.warehouse), Some(f.team), Quantity::from_units(2))
            .await
            .unwrap();

        assert!(f.ledger.entries_at(f.project, f.warehouse).await.unwrap().is_empty());
        assert_eq!(
            f.ledger.entries_at(f.project, f.team).await.unwrap(),
            vec![(f.cost, Quantity::from_units(2))]
        );
    }
}
