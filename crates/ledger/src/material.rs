//! Materials, their price variants, and the catalog that resolves them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockyard_core::quantity::round_amount;
use stockyard_core::{DomainError, DomainResult, Entity, MaterialCostId, MaterialId, ProjectId};

/// A catalog entry. Serial-tracked materials are counted unit by unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Material {
    pub id: MaterialId,
    pub project_id: ProjectId,
    pub name: String,
    pub unit: String,
    pub serial_tracked: bool,
}

impl Entity for Material {
    type Id = MaterialId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// A priced variant of a material. The ledger keys on this, not on the material.
///
/// Immutable once referenced by a ledger entry or a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialCost {
    pub id: MaterialCostId,
    pub material_id: MaterialId,
    pub cost_prime: Decimal,
    pub cost_m19: Decimal,
    pub cost_with_customer: Decimal,
}

impl MaterialCost {
    pub fn new(
        id: MaterialCostId,
        material_id: MaterialId,
        cost_prime: Decimal,
        cost_m19: Decimal,
        cost_with_customer: Decimal,
    ) -> DomainResult<Self> {
        for (name, value) in [
            ("cost_prime", cost_prime),
            ("cost_m19", cost_m19),
            ("cost_with_customer", cost_with_customer),
        ] {
            if value.is_sign_negative() && !value.is_zero() {
                return Err(DomainError::validation(format!("{name} must not be negative")));
            }
        }
        Ok(Self {
            id,
            material_id,
            cost_prime: round_amount(cost_prime),
            cost_m19: round_amount(cost_m19),
            cost_with_customer: round_amount(cost_with_customer),
        })
    }
}

impl Entity for MaterialCost {
    type Id = MaterialCostId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Read access to material reference data.
pub trait MaterialCatalog: Send + Sync {
    fn material(&self, id: MaterialId) -> Option<Material>;

    fn material_cost(&self, id: MaterialCostId) -> Option<MaterialCost>;

    /// All price variants of a material, in no particular order.
    fn costs_of(&self, material_id: MaterialId) -> Vec<MaterialCost>;

    /// Resolve a cost together with its material.
    fn resolve(&self, id: MaterialCostId) -> DomainResult<(MaterialCost, Material)> {
        let cost = self
            .material_cost(id)
            .ok_or_else(|| DomainError::not_found(format!("material cost {id}")))?;
        let material = self.material(cost.material_id).ok_or_else(|| {
            DomainError::invariant(format!(
                "material cost {id} references unknown material {}",
                cost.material_id
            ))
        })?;
        Ok((cost, material))
    }

    /// Whether documents of `project` may reference `material`.
    ///
    /// The owning project always may. Others only once they were granted the
    /// material with [`MaterialCatalog::share`].
    fn is_usable_in(&self, material: &Material, project: ProjectId) -> bool {
        material.project_id == project
    }

    /// Let `project` post against `material_id` and all of its costs. Called
    /// when stock is transferred into a project that does not own the material.
    /// Granting twice is a no-op.
    fn share(&self, material_id: MaterialId, project: ProjectId) -> DomainResult<()>;

    /// Resolve a cost for use inside `project`. A cost the project can't see
    /// is `NotFound`, the same as one that doesn't exist.
    fn resolve_in(
        &self,
        id: MaterialCostId,
        project: ProjectId,
    ) -> DomainResult<(MaterialCost, Material)> {
        let (cost, material) = self.resolve(id)?;
        if !self.is_usable_in(&material, project) {
            return Err(DomainError::not_found(format!(
                "material cost {id} in project {project}"
            )));
        }
        Ok((cost, material))
    }
}

#[derive(Debug, Default)]
struct CatalogState {
    materials: BTreeMap<MaterialId, Material>,
    costs: BTreeMap<MaterialCostId, MaterialCost>,
    shared: BTreeSet<(MaterialId, ProjectId)>,
}

/// In-process catalog, used by tests and single-node deployments that load
/// reference data at startup.
#[derive(Debug, Default)]
pub struct InMemoryMaterialCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryMaterialCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update a material.
    pub fn register_material(&self, material: Material) -> DomainResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        state.materials.insert(material.id, material);
        Ok(())
    }

    /// Register a new cost. Existing costs cannot be replaced.
    pub fn register_cost(&self, cost: MaterialCost) -> DomainResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        if !state.materials.contains_key(&cost.material_id) {
            return Err(DomainError::not_found(format!("material {}", cost.material_id)));
        }
        if state.costs.contains_key(&cost.id) {
            return Err(DomainError::conflict(format!(
                "material cost {} already registered",
                cost.id
            )));
        }
        state.costs.insert(cost.id, cost);
        Ok(())
    }
}

impl MaterialCatalog for InMemoryMaterialCatalog {
    fn material(&self, id: MaterialId) -> Option<Material> {
        self.state.read().ok()?.materials.get(&id).cloned()
    }

    fn material_cost(&self, id: MaterialCostId) -> Option<MaterialCost> {
        self.state.read().ok()?.costs.get(&id).cloned()
    }

    fn costs_of(&self, material_id: MaterialId) -> Vec<MaterialCost> {
        match self.state.read() {
            Ok(state) => state
                .costs
                .values()
                .filter(|c| c.material_id == material_id)
                .cloned()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn is_usable_in(&self, material: &Material, project: ProjectId) -> bool {
        material.project_id == project
            || self
                .state
                .read()
                .is_ok_and(|state| state.shared.contains(&(material.id, project)))
    }

    fn share(&self, material_id: MaterialId, project: ProjectId) -> DomainResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| DomainError::invariant("catalog lock poisoned"))?;
        let owner = state
            .materials
            .get(&material_id)
            .map(|m| m.project_id)
            .ok_or_else(|| DomainError::not_found(format!("material {material_id}")))?;
        if owner != project {
            state.shared.insert((material_id, project));
        }
        Ok(())
    }
}
