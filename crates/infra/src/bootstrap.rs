//! Service wiring from [`InventorySettings`].
//!
//! `build_services` installs tracing with the configured `log_filter`, then
//! picks Postgres when `database_url` is set and the in-memory store
//! otherwise. Both variants share one event bus type.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use stockyard_events::InMemoryEventBus;
use stockyard_ledger::MaterialCatalog;

use crate::config::InventorySettings;
use crate::correction::CorrectionEngine;
use crate::events::InventoryEnvelope;
use crate::ledger::LocationLedger;
use crate::proof::{FsProofStorage, InMemoryProofStorage, ProofStorage};
use crate::query::DocumentQueries;
use crate::store::{InMemoryInventoryStore, InventoryStore, PostgresInventoryStore};
use crate::workflow::ConfirmationWorkflow;

pub type SharedBus = Arc<InMemoryEventBus<InventoryEnvelope>>;

/// Everything a caller needs to drive documents against one store.
pub struct InventoryServices<S> {
    pub store: S,
    pub bus: SharedBus,
    pub workflow: ConfirmationWorkflow<S, SharedBus>,
    pub corrections: CorrectionEngine<S, SharedBus>,
    pub ledger: LocationLedger<S>,
    pub queries: DocumentQueries<S>,
}

impl<S: InventoryStore + Clone> InventoryServices<S> {
    pub fn new(store: S, catalog: Arc<dyn MaterialCatalog>, proofs: Arc<dyn ProofStorage>) -> Self {
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());
        Self {
            workflow: ConfirmationWorkflow::new(store.clone(), bus.clone(), catalog.clone(), proofs),
            corrections: CorrectionEngine::new(store.clone(), bus.clone(), catalog.clone()),
            ledger: LocationLedger::new(store.clone(), catalog),
            queries: DocumentQueries::new(store.clone()),
            store,
            bus,
        }
    }
}

pub enum AppServices {
    InMemory(InventoryServices<Arc<InMemoryInventoryStore>>),
    Persistent(InventoryServices<Arc<PostgresInventoryStore>>),
}

impl AppServices {
    pub fn is_persistent(&self) -> bool {
        matches!(self, AppServices::Persistent(_))
    }
}

pub async fn build_services(
    settings: &InventorySettings,
    catalog: Arc<dyn MaterialCatalog>,
) -> anyhow::Result<AppServices> {
    stockyard_observability::init_with_filter(&settings.log_filter);
    match settings.database_url.as_deref() {
        Some(url) => Ok(AppServices::Persistent(
            build_persistent_services(settings, url, catalog).await?,
        )),
        None => Ok(AppServices::InMemory(build_in_memory_services(settings, catalog))),
    }
}

/// Dev/test wiring: nothing touches disk.
pub fn build_in_memory_services(
    settings: &InventorySettings,
    catalog: Arc<dyn MaterialCatalog>,
) -> InventoryServices<Arc<InMemoryInventoryStore>> {
    let store = Arc::new(InMemoryInventoryStore::new(settings.lock_timeout()));
    info!(lock_timeout_ms = settings.lock_timeout_ms, "using in-memory inventory store");
    InventoryServices::new(store, catalog, Arc::new(InMemoryProofStorage::new()))
}

async fn build_persistent_services(
    settings: &InventorySettings,
    url: &str,
    catalog: Arc<dyn MaterialCatalog>,
) -> anyhow::Result<InventoryServices<Arc<PostgresInventoryStore>>> {
    let store = PostgresInventoryStore::connect(
        url,
        settings.database_max_connections,
        settings.lock_timeout(),
    )
    .await
    .context("failed to connect to Postgres")?;
    store
        .ensure_schema()
        .await
        .context("failed to apply inventory schema")?;

    tokio::fs::create_dir_all(&settings.proof_dir)
        .await
        .with_context(|| format!("failed to create proof dir {}", settings.proof_dir.display()))?;

    info!(
        max_connections = settings.database_max_connections,
        proof_dir = %settings.proof_dir.display(),
        "using postgres inventory store"
    );
    Ok(InventoryServices::new(
        Arc::new(store),
        catalog,
        Arc::new(FsProofStorage::new(settings.proof_dir.clone())),
    ))
}
