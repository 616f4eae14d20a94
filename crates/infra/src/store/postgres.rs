//! Postgres-backed inventory store.
//!
//! Every unit of work runs in one transaction:
//!
//! 1. `SET LOCAL lock_timeout` to the configured bound
//! 2. row locks in `LockScope::lock_order()` order: the document row, then
//!    ledger rows (inserted as zero first if missing), then serial rows
//! 3. the unit of work runs against the locked rows
//! 4. the change set is written and the transaction commits
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | Meaning | Mapped to |
//! |---|---|---|
//! | `55P03` | lock_not_available (lock_timeout hit) | `DomainError::Busy` |
//! | `40P01` | deadlock_detected | `DomainError::Busy` |
//! | `40001` | serialization_failure | `DomainError::Busy` |
//! | `23505` | unique_violation | `DomainError::Conflict` |
//! | `23514` | check_violation (negative amount) | `DomainError::InvariantViolation` |
//! | other | | `StoreError::Backend` |

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use stockyard_core::{
    AggregateId, CorrectionId, DomainError, LocationId, MaterialCostId, MaterialId, ProjectId, Quantity,
    UserId,
};
use stockyard_invoicing::{
    CorrectionRecord, DefectRecord, DocumentId, InvoiceDocument, format_delivery_code,
};
use stockyard_ledger::{
    LedgerKey, LedgerSnapshot, Location, LocationType, LockKey, LockScope, SerialKey,
    SerialNumber, SerialStatus,
};

use super::r#trait::{ChangeSet, DocumentFilter, InventoryStore, LockedState, StoreError, UnitOfWork};

const SCHEMA: &str = include_str!("../../migrations/0001_inventory_ledger.sql");

/// Postgres-backed inventory store.
#[derive(Debug, Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresInventoryStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Open a pool against `url`.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        lock_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_document(
        tx: &mut Transaction<'_, Postgres>,
        id: DocumentId,
    ) -> Result<Option<InvoiceDocument>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE id = $1 FOR UPDATE")
            .bind(id.0.as_uuid())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("lock_document", e))?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn lock_entry(
        tx: &mut Transaction<'_, Postgres>,
        key: &LedgerKey,
    ) -> Result<Quantity, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_entries (project_id, material_cost_id, location_kind, location_id, amount)
            VALUES ($1, $2, $3, $4, 0)
            ON CONFLICT (project_id, material_cost_id, location_kind, location_id) DO NOTHING
            "#,
        )
        .bind(key.project_id.as_uuid())
        .bind(key.material_cost_id.as_uuid())
        .bind(key.location.kind.as_str())
        .bind(key.location.id.as_uuid())
        .execute(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;

        let amount: Decimal = sqlx::query_scalar(
            r#"
            SELECT amount FROM ledger_entries
            WHERE project_id = $1 AND material_cost_id = $2 AND location_kind = $3 AND location_id = $4
            FOR UPDATE
            "#,
        )
        .bind(key.project_id.as_uuid())
        .bind(key.material_cost_id.as_uuid())
        .bind(key.location.kind.as_str())
        .bind(key.location.id.as_uuid())
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_ledger_entry", e))?;

        quantity(amount)
    }

    async fn lock_serial(
        tx: &mut Transaction<'_, Postgres>,
        key: &SerialKey,
    ) -> Result<Option<SerialNumber>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, code, material_id, material_cost_id, location_kind, location_id, status
            FROM serial_numbers
            WHERE project_id = $1 AND code = $2
            FOR UPDATE
            "#,
        )
        .bind(key.project_id.as_uuid())
        .bind(&key.code)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| map_sqlx_error("lock_serial", e))?;
        row.map(|r| serial_from_row(&r)).transpose()
    }

    async fn write_changes(
        tx: &mut Transaction<'_, Postgres>,
        changes: &ChangeSet,
    ) -> Result<(), StoreError> {
        for (key, amount) in &changes.ledger.amounts {
            sqlx::query(
                r#"
                UPDATE ledger_entries SET amount = $5, updated_at = NOW()
                WHERE project_id = $1 AND material_cost_id = $2 AND location_kind = $3 AND location_id = $4
                "#,
            )
            .bind(key.project_id.as_uuid())
            .bind(key.material_cost_id.as_uuid())
            .bind(key.location.kind.as_str())
            .bind(key.location.id.as_uuid())
            .bind(amount.value())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_ledger_entry", e))?;
        }

        for key in &changes.ledger.removed_serials {
            sqlx::query("DELETE FROM serial_numbers WHERE project_id = $1 AND code = $2")
                .bind(key.project_id.as_uuid())
                .bind(&key.code)
                .execute(&mut **tx)
                .await
                .map_err(|e| map_sqlx_error("delete_serial", e))?;
        }

        for serial in &changes.ledger.serials {
            sqlx::query(
                r#"
                INSERT INTO serial_numbers
                    (project_id, code, material_id, material_cost_id, location_kind, location_id, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (project_id, code) DO UPDATE SET
                    material_cost_id = EXCLUDED.material_cost_id,
                    location_kind = EXCLUDED.location_kind,
                    location_id = EXCLUDED.location_id,
                    status = EXCLUDED.status,
                    updated_at = NOW()
                "#,
            )
            .bind(serial.project_id.as_uuid())
            .bind(&serial.code)
            .bind(serial.material_id.as_uuid())
            .bind(serial.material_cost_id.as_uuid())
            .bind(serial.location.kind.as_str())
            .bind(serial.location.id.as_uuid())
            .bind(serial.status.as_str())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("upsert_serial", e))?;
        }

        if let Some(doc) = &changes.document {
            sqlx::query(
                r#"
                UPDATE documents SET status = $2, confirmed_at = $3, body = $4
                WHERE id = $1
                "#,
            )
            .bind(doc.id_typed().0.as_uuid())
            .bind(doc.status().as_str())
            .bind(doc.confirmed_at())
            .bind(document_body(doc)?)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("update_document", e))?;
        }

        for c in &changes.corrections {
            sqlx::query(
                r#"
                INSERT INTO corrections
                    (id, project_id, material_cost_id, location_kind, location_id, document_id,
                     recorded, observed, delta, operator_id, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(c.id.as_uuid())
            .bind(c.key.project_id.as_uuid())
            .bind(c.key.material_cost_id.as_uuid())
            .bind(c.key.location.kind.as_str())
            .bind(c.key.location.id.as_uuid())
            .bind(c.document_id.map(|d| *d.0.as_uuid()))
            .bind(c.recorded.value())
            .bind(c.observed.value())
            .bind(c.delta)
            .bind(c.operator.as_uuid())
            .bind(c.created_at)
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("insert_correction", e))?;
        }

        for d in &changes.defects {
            sqlx::query(
                r#"
                INSERT INTO defect_tally (project_id, material_cost_id, location_kind, location_id, quantity)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (project_id, material_cost_id, location_kind, location_id)
                DO UPDATE SET quantity = defect_tally.quantity + EXCLUDED.quantity
                "#,
            )
            .bind(d.key.project_id.as_uuid())
            .bind(d.key.material_cost_id.as_uuid())
            .bind(d.key.location.kind.as_str())
            .bind(d.key.location.id.as_uuid())
            .bind(d.quantity.value())
            .execute(&mut **tx)
            .await
            .map_err(|e| map_sqlx_error("tally_defect", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn amount(&self, key: &LedgerKey) -> Result<Quantity, StoreError> {
        let amount: Option<Decimal> = sqlx::query_scalar(
            r#"
            SELECT amount FROM ledger_entries
            WHERE project_id = $1 AND material_cost_id = $2 AND location_kind = $3 AND location_id = $4
            "#,
        )
        .bind(key.project_id.as_uuid())
        .bind(key.material_cost_id.as_uuid())
        .bind(key.location.kind.as_str())
        .bind(key.location.id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("amount", e))?;
        amount.map(quantity).unwrap_or(Ok(Quantity::ZERO))
    }

    async fn entries_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, material_cost_id, location_kind, location_id, amount
            FROM ledger_entries
            WHERE project_id = $1 AND location_kind = $2 AND location_id = $3 AND amount > 0
            ORDER BY material_cost_id
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(location.kind.as_str())
        .bind(location.id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries_at", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn entries_for_cost(
        &self,
        project_id: ProjectId,
        material_cost_id: MaterialCostId,
    ) -> Result<Vec<(LedgerKey, Quantity)>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, material_cost_id, location_kind, location_id, amount
            FROM ledger_entries
            WHERE project_id = $1 AND material_cost_id = $2
            ORDER BY location_kind, location_id
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(material_cost_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("entries_for_cost", e))?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn serial(&self, key: &SerialKey) -> Result<Option<SerialNumber>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT project_id, code, material_id, material_cost_id, location_kind, location_id, status
            FROM serial_numbers
            WHERE project_id = $1 AND code = $2
            "#,
        )
        .bind(key.project_id.as_uuid())
        .bind(&key.code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("serial", e))?;
        row.map(|r| serial_from_row(&r)).transpose()
    }

    async fn serials_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<SerialNumber>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, code, material_id, material_cost_id, location_kind, location_id, status
            FROM serial_numbers
            WHERE project_id = $1 AND location_kind = $2 AND location_id = $3
              AND status <> 'written_off'
            ORDER BY code
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(location.kind.as_str())
        .bind(location.id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("serials_at", e))?;
        rows.iter().map(serial_from_row).collect()
    }

    async fn document(&self, id: DocumentId) -> Result<Option<InvoiceDocument>, StoreError> {
        let row = sqlx::query("SELECT body FROM documents WHERE id = $1")
            .bind(id.0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("document", e))?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn document_by_code(
        &self,
        project_id: ProjectId,
        delivery_code: &str,
    ) -> Result<Option<InvoiceDocument>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT body FROM documents
            WHERE project_id = $1 AND delivery_code = $2 AND status <> 'deleted'
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(delivery_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("document_by_code", e))?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn documents(
        &self,
        project_id: ProjectId,
        filter: &DocumentFilter,
    ) -> Result<Vec<InvoiceDocument>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT body FROM documents
            WHERE project_id = $1
              AND status <> 'deleted'
              AND ($2::text IS NULL OR kind = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY seq
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(filter.status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("documents", e))?;
        rows.iter().map(document_from_row).collect()
    }

    async fn corrections(&self, project_id: ProjectId) -> Result<Vec<CorrectionRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, material_cost_id, location_kind, location_id, document_id,
                   recorded, observed, delta, operator_id, created_at
            FROM corrections
            WHERE project_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(project_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("corrections", e))?;
        rows.iter().map(correction_from_row).collect()
    }

    async fn defects_at(
        &self,
        project_id: ProjectId,
        location: Location,
    ) -> Result<Vec<DefectRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT project_id, material_cost_id, location_kind, location_id, quantity AS amount
            FROM defect_tally
            WHERE project_id = $1 AND location_kind = $2 AND location_id = $3
            ORDER BY material_cost_id
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(location.kind.as_str())
        .bind(location.id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("defects_at", e))?;
        rows.iter()
            .map(|r| entry_from_row(r).map(|(key, quantity)| DefectRecord { key, quantity }))
            .collect()
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    async fn next_delivery_code(
        &self,
        project_id: ProjectId,
        prefix: &str,
    ) -> Result<String, StoreError> {
        loop {
            let n = self.reserve_sequence(project_id, prefix, 1).await?;
            let code = format_delivery_code(prefix, n);
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS (SELECT 1 FROM documents WHERE project_id = $1 AND delivery_code = $2)",
            )
            .bind(project_id.as_uuid())
            .bind(&code)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("check_delivery_code", e))?;
            if !taken {
                return Ok(code);
            }
        }
    }

    async fn reserve_sequence(
        &self,
        project_id: ProjectId,
        counter: &str,
        count: u64,
    ) -> Result<u64, StoreError> {
        let count = i64::try_from(count)
            .map_err(|_| DomainError::validation("sequence block too large"))?;
        let last: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO document_counters (project_id, counter, last_value)
            VALUES ($1, $2, $3)
            ON CONFLICT (project_id, counter)
            DO UPDATE SET last_value = document_counters.last_value + EXCLUDED.last_value
            RETURNING last_value
            "#,
        )
        .bind(project_id.as_uuid())
        .bind(counter)
        .bind(count)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("reserve_sequence", e))?;
        Ok((last - count + 1) as u64)
    }

    #[instrument(skip(self, doc), fields(document_id = %doc.id_typed(), delivery_code = doc.delivery_code()), err)]
    async fn insert_document(&self, doc: &InvoiceDocument) -> Result<(), StoreError> {
        let project_id = doc
            .project_id()
            .ok_or_else(|| DomainError::invariant("document has no project"))?;
        sqlx::query(
            r#"
            INSERT INTO documents (id, project_id, kind, delivery_code, status, created_at, confirmed_at, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(doc.id_typed().0.as_uuid())
        .bind(project_id.as_uuid())
        .bind(doc.kind().as_str())
        .bind(doc.delivery_code())
        .bind(doc.status().as_str())
        .bind(doc.created_at().unwrap_or_else(Utc::now))
        .bind(doc.confirmed_at())
        .bind(document_body(doc)?)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_document", e))?;
        Ok(())
    }

    #[instrument(
        skip(self, scope, work),
        fields(keys = scope.entries.len(), serials = scope.serials.len()),
        err
    )]
    async fn transact(&self, scope: LockScope, work: UnitOfWork) -> Result<ChangeSet, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // SET does not take bind parameters; the value is an integer we format ourselves.
        let timeout_ms = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;

        let mut locked = LockedState {
            ledger: LedgerSnapshot::default(),
            document: None,
        };
        for key in scope.lock_order() {
            match key {
                LockKey::Document(id) => {
                    locked.document = Self::lock_document(&mut tx, DocumentId::new(id)).await?;
                }
                LockKey::Entry(key) => {
                    let amount = Self::lock_entry(&mut tx, &key).await?;
                    locked.ledger.amounts.insert(key, amount);
                }
                LockKey::Serial(key) => {
                    let serial = Self::lock_serial(&mut tx, &key).await?;
                    locked.ledger.serials.insert(key, serial);
                }
            }
        }

        // Dropping `tx` on the error paths rolls back.
        let changes = work(&locked)?;
        changes.check_scope(&scope)?;
        Self::write_changes(&mut tx, &changes).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        debug!(entries = changes.ledger.amounts.len(), "unit of work committed");
        Ok(changes)
    }
}

fn quantity(amount: Decimal) -> Result<Quantity, StoreError> {
    Quantity::new(amount).map_err(|e| StoreError::Corrupt(format!("ledger amount {amount}: {e}")))
}

fn document_body(doc: &InvoiceDocument) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(doc)
        .map_err(|e| StoreError::Corrupt(format!("document serialization failed: {e}")))
}

fn document_from_row(row: &PgRow) -> Result<InvoiceDocument, StoreError> {
    let body: serde_json::Value = row
        .try_get("body")
        .map_err(|e| StoreError::Corrupt(format!("document row: {e}")))?;
    serde_json::from_value(body).map_err(|e| StoreError::Corrupt(format!("document body: {e}")))
}

fn location_from_row(row: &PgRow) -> Result<Location, StoreError> {
    let kind: String = row
        .try_get("location_kind")
        .map_err(|e| StoreError::Corrupt(format!("location_kind: {e}")))?;
    let id: Uuid = row
        .try_get("location_id")
        .map_err(|e| StoreError::Corrupt(format!("location_id: {e}")))?;
    let kind = LocationType::parse(&kind).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(Location::new(kind, LocationId::from_uuid(id)))
}

fn uuid_column(row: &PgRow, column: &str) -> Result<Uuid, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn decimal_column(row: &PgRow, column: &str) -> Result<Decimal, StoreError> {
    row.try_get(column)
        .map_err(|e| StoreError::Corrupt(format!("{column}: {e}")))
}

fn entry_from_row(row: &PgRow) -> Result<(LedgerKey, Quantity), StoreError> {
    let key = LedgerKey::new(
        ProjectId::from_uuid(uuid_column(row, "project_id")?),
        MaterialCostId::from_uuid(uuid_column(row, "material_cost_id")?),
        location_from_row(row)?,
    );
    Ok((key, quantity(decimal_column(row, "amount")?)?))
}

fn serial_from_row(row: &PgRow) -> Result<SerialNumber, StoreError> {
    let code: String = row
        .try_get("code")
        .map_err(|e| StoreError::Corrupt(format!("code: {e}")))?;
    let status: String = row
        .try_get("status")
        .map_err(|e| StoreError::Corrupt(format!("status: {e}")))?;
    let status = SerialStatus::parse(&status)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown serial status {status}")))?;
    Ok(SerialNumber {
        project_id: ProjectId::from_uuid(uuid_column(row, "project_id")?),
        code,
        material_id: MaterialId::from_uuid(uuid_column(row, "material_id")?),
        material_cost_id: MaterialCostId::from_uuid(uuid_column(row, "material_cost_id")?),
        location: location_from_row(row)?,
        status,
    })
}

fn correction_from_row(row: &PgRow) -> Result<CorrectionRecord, StoreError> {
    let document_id: Option<Uuid> = row
        .try_get("document_id")
        .map_err(|e| StoreError::Corrupt(format!("document_id: {e}")))?;
    let created_at: DateTime<Utc> = row
        .try_get("created_at")
        .map_err(|e| StoreError::Corrupt(format!("created_at: {e}")))?;
    Ok(CorrectionRecord {
        id: CorrectionId::from_uuid(uuid_column(row, "id")?),
        key: LedgerKey::new(
            ProjectId::from_uuid(uuid_column(row, "project_id")?),
            MaterialCostId::from_uuid(uuid_column(row, "material_cost_id")?),
            location_from_row(row)?,
        ),
        document_id: document_id.map(|id| DocumentId::new(AggregateId::from_uuid(id))),
        recorded: quantity(decimal_column(row, "recorded")?)?,
        observed: quantity(decimal_column(row, "observed")?)?,
        delta: decimal_column(row, "delta")?,
        operator: UserId::from_uuid(uuid_column(row, "operator_id")?),
        created_at,
    })
}

/// Map SQLx errors into store errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("40P01") | Some("40001") => {
                    warn!(operation, "lock wait aborted");
                    DomainError::busy(msg).into()
                }
                Some("23505") => DomainError::conflict(msg).into(),
                Some("23514") => DomainError::invariant(msg).into(),
                _ => StoreError::backend(operation, msg),
            }
        }
        sqlx::Error::PoolClosed => StoreError::backend(operation, "connection pool closed"),
        sqlx::Error::PoolTimedOut => {
            DomainError::busy(format!("connection pool exhausted in {operation}")).into()
        }
        other => StoreError::backend(operation, other.to_string()),
    }
}
