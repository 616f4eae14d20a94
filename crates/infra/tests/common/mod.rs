#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use stockyard_core::{LocationId, MaterialCostId, MaterialId, ProjectId, Quantity, UserId, WorkerId};
use stockyard_events::{EventBus, InMemoryEventBus, Subscription};
use stockyard_infra::{
    ConfirmRequest, ConfirmationWorkflow, CorrectionEngine, CreateDocumentRequest,
    DocumentQueries, InMemoryInventoryStore, InMemoryProofStorage, InventoryEnvelope,
    LineRequest, LocationLedger, WorkflowError,
};
use stockyard_invoicing::{DocumentKind, InvoiceDocument, Participant, WriteOffReason};
use stockyard_ledger::{InMemoryMaterialCatalog, Location, Material, MaterialCatalog, MaterialCost};

pub type Store = Arc<InMemoryInventoryStore>;
pub type Bus = Arc<InMemoryEventBus<InventoryEnvelope>>;

pub struct World {
    pub project: ProjectId,
    pub other_project: ProjectId,
    pub user: UserId,
    pub catalog: Arc<InMemoryMaterialCatalog>,
    pub store: Store,
    pub bus: Bus,
    pub proofs: Arc<InMemoryProofStorage>,
    pub workflow: ConfirmationWorkflow<Store, Bus>,
    pub ledger: LocationLedger<Store>,
    pub corrections: CorrectionEngine<Store, Bus>,
    pub queries: DocumentQueries<Store>,
    pub warehouse: Location,
    pub other_warehouse: Location,
    pub team: Location,
    pub object: Location,
}

impl World {
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(2))
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        stockyard_observability::init_for_tests();

        let catalog = Arc::new(InMemoryMaterialCatalog::new());
        let dyn_catalog: Arc<dyn MaterialCatalog> = catalog.clone();
        let store: Store = Arc::new(InMemoryInventoryStore::new(lock_timeout));
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let proofs = Arc::new(InMemoryProofStorage::new());

        Self {
            project: ProjectId::new(),
            other_project: ProjectId::new(),
            user: UserId::new(),
            workflow: ConfirmationWorkflow::new(
                store.clone(),
                bus.clone(),
                dyn_catalog.clone(),
                proofs.clone(),
            ),
            ledger: LocationLedger::new(store.clone(), dyn_catalog.clone()),
            corrections: CorrectionEngine::new(store.clone(), bus.clone(), dyn_catalog),
            queries: DocumentQueries::new(store.clone()),
            catalog,
            store,
            bus,
            proofs,
            warehouse: Location::warehouse(LocationId::new()),
            other_warehouse: Location::warehouse(LocationId::new()),
            team: Location::team(LocationId::new()),
            object: Location::object(LocationId::new()),
        }
    }

    pub fn subscribe(&self) -> Subscription<InventoryEnvelope> {
        self.bus.subscribe()
    }

    /// Register a material with one cost per price (prices double as all three cost columns).
    pub fn material(&self, name: &str, serial_tracked: bool, prices: &[Decimal]) -> (MaterialId, Vec<MaterialCostId>) {
        let id = MaterialId::new();
        self.catalog
            .register_material(Material {
                id,
                project_id: self.project,
                name: name.to_string(),
                unit: "pcs".to_string(),
                serial_tracked,
            })
            .unwrap();
        let costs = prices
            .iter()
            .map(|price| {
                let cost = MaterialCost::new(MaterialCostId::new(), id, *price, *price, *price).unwrap();
                let cost_id = cost.id;
                self.catalog.register_cost(cost).unwrap();
                cost_id
            })
            .collect();
        (id, costs)
    }

    /// A bulk material with a single cost.
    pub fn bulk_cost(&self, name: &str) -> MaterialCostId {
        self.material(name, false, &[Decimal::ONE]).1[0]
    }

    pub fn participants(kind: DocumentKind) -> Vec<Participant> {
        kind.wiring()
            .required_roles
            .iter()
            .map(|role| Participant {
                role: *role,
                worker_id: WorkerId::new(),
            })
            .collect()
    }

    /// A well-formed request for `kind`; callers set locations and lines.
    pub fn request(&self, kind: DocumentKind) -> CreateDocumentRequest {
        let mut request = CreateDocumentRequest::new(self.project, kind, self.user);
        request.participants = Self::participants(kind);
        if kind == DocumentKind::WriteOff {
            request.write_off_reason = Some(WriteOffReason::WriteOff);
        }
        if kind == DocumentKind::OutputOutOfProject {
            request.target_project = Some(self.other_project);
        }
        request
    }

    pub fn routed(
        &self,
        kind: DocumentKind,
        source: Option<Location>,
        destination: Option<Location>,
        lines: Vec<LineRequest>,
    ) -> CreateDocumentRequest {
        let mut request = self.request(kind);
        request.source = source;
        request.destination = destination;
        request.lines = lines;
        request
    }

    pub fn confirm_request(&self, doc: &InvoiceDocument) -> ConfirmRequest {
        ConfirmRequest {
            project_id: self.project,
            document_id: doc.id_typed(),
            proof: doc
                .kind()
                .requires_proof()
                .then(|| format!("signed {}", doc.delivery_code()).into_bytes()),
            confirmed_by: self.user,
        }
    }

    pub async fn confirm(&self, doc: &InvoiceDocument) -> Result<InvoiceDocument, WorkflowError> {
        self.workflow.confirm(self.confirm_request(doc)).await
    }

    /// Create and confirm in one go.
    pub async fn post(&self, request: CreateDocumentRequest) -> Result<InvoiceDocument, WorkflowError> {
        let draft = self.workflow.create(request).await?;
        self.confirm(&draft).await
    }

    pub async fn receive(&self, cost: MaterialCostId, units: u64) -> InvoiceDocument {
        self.post(self.routed(
            DocumentKind::Input,
            None,
            Some(self.warehouse),
            vec![LineRequest::cost(cost, Quantity::from_units(units))],
        ))
        .await
        .unwrap()
    }

    pub async fn issue(&self, cost: MaterialCostId, units: u64, to: Location) -> Result<InvoiceDocument, WorkflowError> {
        self.post(self.routed(
            DocumentKind::Output,
            Some(self.warehouse),
            Some(to),
            vec![LineRequest::cost(cost, Quantity::from_units(units))],
        ))
        .await
    }

    pub async fn amount(&self, cost: MaterialCostId, location: Location) -> Quantity {
        self.ledger.get_amount(self.project, cost, location).await.unwrap()
    }

    pub async fn total(&self, cost: MaterialCostId) -> Quantity {
        self.ledger.internal_total(self.project, cost).await.unwrap()
    }
}

pub fn units(n: u64) -> Quantity {
    Quantity::from_units(n)
}
