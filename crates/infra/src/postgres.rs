//! Postgres-backed stock ledger and alert store.
//!
//! ## Atomicity
//!
//! `append()` runs in one transaction:
//! 1. `UPDATE inventory_records ... WHERE id = $1 AND version = $expected`
//! 2. `INSERT INTO stock_movements ...` for each movement
//! 3. commit
//!
//! The conditional UPDATE takes the row lock, so a concurrent writer that read
//! the same version blocks until this transaction ends and then matches zero
//! rows. Zero rows means either the record is gone (`NotFound`) or someone
//! else committed first (`Concurrency`). Either way nothing is inserted.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | LedgerError |
//! |------------|----------------------|-------------|
//! | Database (unique violation) | `23505` | `Concurrency` (`DuplicateRecord` on create) |
//! | Database (check violation) | `23514` | `InvalidAppend` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / RowNotFound / other | N/A | `Backend` |
//!
//! ## Alert dedup
//!
//! A partial unique index on `(inventory_id, alert_type) WHERE status = 'active'`
//! backs `raise_if_absent`, which inserts with `ON CONFLICT DO NOTHING`.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use stockroom_core::{AggregateRoot, AlertId, ExpectedVersion, InventoryId, MovementId, ProductId, UserId};
use stockroom_inventory::{
    AlertCandidate, AlertStatus, AlertType, InventoryRecord, MovementType, RecordSettings, RecordSnapshot,
    RecordedMovement, StockAlert, StockMovement,
};

use crate::alerts::{AlertFilter, AlertStore};
use crate::config::DatabaseConfig;
use crate::ledger::{LedgerError, StockLedger, validate_append};

/// Schema applied by [`PostgresStockLedger::migrate`]; idempotent.
pub const SCHEMA: &str = include_str!("../migrations/0001_stock_ledger.sql");

const RECORD_COLUMNS: &str = "id, product_id, quantity, reserved_quantity, low_stock_threshold, \
     reorder_quantity, max_stock_level, location, batch_number, last_restocked, created_at, updated_at, version";

const MOVEMENT_COLUMNS: &str = "id, inventory_id, sequence, movement_type, quantity, on_hand_delta, \
     reserved_delta, previous_quantity, new_quantity, reference, note, created_by, created_at";

const ALERT_COLUMNS: &str =
    "id, inventory_id, alert_type, message, status, resolved_by, created_at, resolved_at";

/// Postgres-backed ledger. Also stores alerts, sharing the pool.
///
/// `Send + Sync`; clones share the same pool.
#[derive(Debug, Clone)]
pub struct PostgresStockLedger {
    pool: Arc<PgPool>,
}

impl PostgresStockLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist yet.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), LedgerError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    async fn fetch_records(&self, filter: &str, id: Option<Uuid>) -> Result<Vec<InventoryRecord>, LedgerError> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM inventory_records {filter} ORDER BY id ASC");
        let rows = sqlx::query(&sql)
            .bind(id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_records", e))?;

        rows.iter()
            .map(|row| {
                RecordRow::from_row(row)
                    .map_err(|e| LedgerError::Backend(format!("failed to decode record row: {e}")))?
                    .try_into()
            })
            .collect()
    }
}

#[async_trait]
impl StockLedger for PostgresStockLedger {
    #[instrument(skip(self, record), fields(inventory_id = %record.id_typed(), product_id = %record.product_id()), err)]
    async fn create(&self, record: &InventoryRecord) -> Result<(), LedgerError> {
        if !record.is_created() {
            return Err(LedgerError::InvalidAppend(format!(
                "record {} was never created",
                record.id_typed()
            )));
        }

        let s = record.snapshot();
        sqlx::query(
            r#"
            INSERT INTO inventory_records (
                id, product_id, quantity, reserved_quantity, low_stock_threshold, reorder_quantity,
                max_stock_level, location, batch_number, last_restocked, created_at, updated_at, version
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(s.id.as_uuid())
        .bind(s.product_id.as_uuid())
        .bind(to_db(s.quantity)?)
        .bind(to_db(s.reserved_quantity)?)
        .bind(to_db(s.settings.low_stock_threshold)?)
        .bind(to_db(s.settings.reorder_quantity)?)
        .bind(s.settings.max_stock_level.map(to_db).transpose()?)
        .bind(&s.settings.location)
        .bind(&s.settings.batch_number)
        .bind(s.last_restocked)
        .bind(s.created_at)
        .bind(s.updated_at)
        .bind(to_db(s.version)?)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicateRecord(s.product_id)
            } else {
                map_sqlx_error("create_record", e)
            }
        })?;

        Ok(())
    }

    async fn load(&self, id: InventoryId) -> Result<Option<InventoryRecord>, LedgerError> {
        Ok(self.fetch_records("WHERE id = $1", Some(*id.as_uuid())).await?.pop())
    }

    async fn find_by_product(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, LedgerError> {
        Ok(self
            .fetch_records("WHERE product_id = $1", Some(*product_id.as_uuid()))
            .await?
            .pop())
    }

    #[instrument(
        skip(self, record, movements),
        fields(
            inventory_id = %record.id_typed(),
            version = record.version(),
            expected_version = ?expected,
            movement_count = movements.len()
        ),
        err
    )]
    async fn append(
        &self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
        movements: Vec<StockMovement>,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        let first_sequence = validate_append(record, &movements)?;
        let id = record.id_typed();
        let s = record.snapshot();
        let ExpectedVersion::Exact(expected_version) = expected;
        let expected_db = to_db(expected_version)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let updated = sqlx::query(
            r#"
            UPDATE inventory_records SET
                quantity = $2,
                reserved_quantity = $3,
                low_stock_threshold = $4,
                reorder_quantity = $5,
                max_stock_level = $6,
                location = $7,
                batch_number = $8,
                last_restocked = $9,
                updated_at = $10,
                version = $11
            WHERE id = $1
              AND version < $11
              AND version = $12
            "#,
        )
        .bind(id.as_uuid())
        .bind(to_db(s.quantity)?)
        .bind(to_db(s.reserved_quantity)?)
        .bind(to_db(s.settings.low_stock_threshold)?)
        .bind(to_db(s.settings.reorder_quantity)?)
        .bind(s.settings.max_stock_level.map(to_db).transpose()?)
        .bind(&s.settings.location)
        .bind(&s.settings.batch_number)
        .bind(s.last_restocked)
        .bind(s.updated_at)
        .bind(to_db(s.version)?)
        .bind(expected_db)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("update_record", e))?;

        if updated.rows_affected() == 0 {
            let current: Option<i64> = sqlx::query_scalar("SELECT version FROM inventory_records WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("check_version", e))?;
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;

            return Err(match current {
                None => LedgerError::NotFound(id),
                Some(current) => LedgerError::Concurrency(format!(
                    "expected {expected:?}, found {current} (writing version {})",
                    s.version
                )),
            });
        }

        let mut recorded = Vec::with_capacity(movements.len());
        for (offset, movement) in movements.into_iter().enumerate() {
            let sequence = first_sequence + offset as u64;
            let movement_id: i64 = sqlx::query_scalar(
                r#"
                INSERT INTO stock_movements (
                    inventory_id, sequence, movement_type, quantity, on_hand_delta, reserved_delta,
                    previous_quantity, new_quantity, reference, note, created_by, created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING id
                "#,
            )
            .bind(id.as_uuid())
            .bind(to_db(sequence)?)
            .bind(movement.movement_type.as_str())
            .bind(movement.quantity)
            .bind(movement.on_hand_delta)
            .bind(movement.reserved_delta)
            .bind(to_db(movement.previous_quantity)?)
            .bind(to_db(movement.new_quantity)?)
            .bind(&movement.reference)
            .bind(&movement.note)
            .bind(movement.created_by.map(|u| *u.as_uuid()))
            .bind(movement.created_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LedgerError::Concurrency(format!("sequence {sequence} already exists for {id}"))
                } else {
                    map_sqlx_error("insert_movement", e)
                }
            })?;

            recorded.push(RecordedMovement {
                id: MovementId::new(from_db(movement_id)?),
                inventory_id: id,
                sequence,
                movement,
            });
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("movement_count", recorded.len());
        Ok(recorded)
    }

    async fn history(
        &self,
        id: InventoryId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        let sql = format!(
            "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
             WHERE inventory_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2) \
             ORDER BY sequence ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(since)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("history", e))?;
        decode_movements(&rows)
    }

    async fn records(&self) -> Result<Vec<InventoryRecord>, LedgerError> {
        self.fetch_records("WHERE $1::UUID IS NULL", None).await
    }

    async fn recent_movements(&self, limit: usize) -> Result<Vec<RecordedMovement>, LedgerError> {
        let sql = format!("SELECT {MOVEMENT_COLUMNS} FROM stock_movements ORDER BY id DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("recent_movements", e))?;
        decode_movements(&rows)
    }
}

#[async_trait]
impl AlertStore for PostgresStockLedger {
    #[instrument(
        skip(self, candidate),
        fields(inventory_id = %candidate.inventory_id, alert_type = %candidate.alert_type),
        err
    )]
    async fn raise_if_absent(
        &self,
        candidate: AlertCandidate,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, LedgerError> {
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO stock_alerts (inventory_id, alert_type, message, status, created_at)
            VALUES ($1, $2, $3, 'active', $4)
            ON CONFLICT (inventory_id, alert_type) WHERE status = 'active' DO NOTHING
            RETURNING id
            "#,
        )
        .bind(candidate.inventory_id.as_uuid())
        .bind(candidate.alert_type.as_str())
        .bind(&candidate.message)
        .bind(at)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("raise_alert", e))?;

        match id {
            Some(id) => Ok(Some(StockAlert::raise(AlertId::new(from_db(id)?), candidate, at))),
            None => Ok(None),
        }
    }

    async fn get(&self, id: AlertId) -> Result<Option<StockAlert>, LedgerError> {
        let sql = format!("SELECT {ALERT_COLUMNS} FROM stock_alerts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(to_db(id.get())?)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_alert", e))?;
        row.as_ref().map(decode_alert).transpose()
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id, status = %alert.status), err)]
    async fn transition(&self, alert: &StockAlert, from: AlertStatus) -> Result<bool, LedgerError> {
        let updated = sqlx::query(
            r#"
            UPDATE stock_alerts
            SET status = $2, resolved_by = $3, resolved_at = $4
            WHERE id = $1 AND status = $5
            "#,
        )
        .bind(to_db(alert.id.get())?)
        .bind(alert.status.as_str())
        .bind(alert.resolved_by.map(|u| *u.as_uuid()))
        .bind(alert.resolved_at)
        .bind(from.as_str())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("transition_alert", e))?;
        Ok(updated.rows_affected() == 1)
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, LedgerError> {
        let sql = format!(
            "SELECT {ALERT_COLUMNS} FROM stock_alerts \
             WHERE ($1::UUID IS NULL OR inventory_id = $1) \
               AND ($2::TEXT IS NULL OR alert_type = $2) \
               AND ($3::TEXT IS NULL OR status = $3) \
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(filter.inventory_id.map(|id| *id.as_uuid()))
            .bind(filter.alert_type.map(AlertType::as_str))
            .bind(filter.status.map(AlertStatus::as_str))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_alerts", e))?;
        rows.iter().map(decode_alert).collect()
    }
}

/// Map SQLx errors to ledger errors.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => LedgerError::Concurrency(msg),
                Some("23514") => LedgerError::InvalidAppend(msg),
                _ => LedgerError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => LedgerError::Backend(format!("connection pool closed in {operation}")),
        sqlx::Error::RowNotFound => LedgerError::Backend(format!("unexpected row not found in {operation}")),
        other => LedgerError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Check if an error is a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

fn to_db(value: u64) -> Result<i64, LedgerError> {
    i64::try_from(value).map_err(|_| LedgerError::InvalidAppend(format!("{value} exceeds BIGINT range")))
}

fn from_db(value: i64) -> Result<u64, LedgerError> {
    u64::try_from(value).map_err(|_| LedgerError::Backend(format!("negative value {value} in a count column")))
}

fn decode_movements(rows: &[PgRow]) -> Result<Vec<RecordedMovement>, LedgerError> {
    rows.iter()
        .map(|row| {
            MovementRow::from_row(row)
                .map_err(|e| LedgerError::Backend(format!("failed to decode movement row: {e}")))?
                .try_into()
        })
        .collect()
}

fn decode_alert(row: &PgRow) -> Result<StockAlert, LedgerError> {
    AlertRow::from_row(row)
        .map_err(|e| LedgerError::Backend(format!("failed to decode alert row: {e}")))?
        .try_into()
}

// SQLx row types

#[derive(Debug)]
struct RecordRow {
    id: Uuid,
    product_id: Uuid,
    quantity: i64,
    reserved_quantity: i64,
    low_stock_threshold: i64,
    reorder_quantity: i64,
    max_stock_level: Option<i64>,
    location: Option<String>,
    batch_number: Option<String>,
    last_restocked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
}

impl<'r> FromRow<'r, PgRow> for RecordRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RecordRow {
            id: row.try_get("id")?,
            product_id: row.try_get("product_id")?,
            quantity: row.try_get("quantity")?,
            reserved_quantity: row.try_get("reserved_quantity")?,
            low_stock_threshold: row.try_get("low_stock_threshold")?,
            reorder_quantity: row.try_get("reorder_quantity")?,
            max_stock_level: row.try_get("max_stock_level")?,
            location: row.try_get("location")?,
            batch_number: row.try_get("batch_number")?,
            last_restocked: row.try_get("last_restocked")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            version: row.try_get("version")?,
        })
    }
}

impl TryFrom<RecordRow> for InventoryRecord {
    type Error = LedgerError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(InventoryRecord::from_snapshot(RecordSnapshot {
            id: InventoryId::from_uuid(row.id),
            product_id: ProductId::from_uuid(row.product_id),
            quantity: from_db(row.quantity)?,
            reserved_quantity: from_db(row.reserved_quantity)?,
            settings: RecordSettings {
                low_stock_threshold: from_db(row.low_stock_threshold)?,
                reorder_quantity: from_db(row.reorder_quantity)?,
                max_stock_level: row.max_stock_level.map(from_db).transpose()?,
                location: row.location,
                batch_number: row.batch_number,
            },
            last_restocked: row.last_restocked,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: from_db(row.version)?,
        }))
    }
}

#[derive(Debug)]
struct MovementRow {
    id: i64,
    inventory_id: Uuid,
    sequence: i64,
    movement_type: String,
    quantity: i64,
    on_hand_delta: i64,
    reserved_delta: i64,
    previous_quantity: i64,
    new_quantity: i64,
    reference: String,
    note: Option<String>,
    created_by: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for MovementRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(MovementRow {
            id: row.try_get("id")?,
            inventory_id: row.try_get("inventory_id")?,
            sequence: row.try_get("sequence")?,
            movement_type: row.try_get("movement_type")?,
            quantity: row.try_get("quantity")?,
            on_hand_delta: row.try_get("on_hand_delta")?,
            reserved_delta: row.try_get("reserved_delta")?,
            previous_quantity: row.try_get("previous_quantity")?,
            new_quantity: row.try_get("new_quantity")?,
            reference: row.try_get("reference")?,
            note: row.try_get("note")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl TryFrom<MovementRow> for RecordedMovement {
    type Error = LedgerError;

    fn try_from(row: MovementRow) -> Result<Self, Self::Error> {
        let inventory_id = InventoryId::from_uuid(row.inventory_id);
        let movement_type =
            MovementType::from_str(&row.movement_type).map_err(|e| LedgerError::Backend(e.to_string()))?;

        Ok(RecordedMovement {
            id: MovementId::new(from_db(row.id)?),
            inventory_id,
            sequence: from_db(row.sequence)?,
            movement: StockMovement {
                inventory_id,
                movement_type,
                quantity: row.quantity,
                on_hand_delta: row.on_hand_delta,
                reserved_delta: row.reserved_delta,
                previous_quantity: from_db(row.previous_quantity)?,
                new_quantity: from_db(row.new_quantity)?,
                reference: row.reference,
                note: row.note,
                created_by: row.created_by.map(UserId::from_uuid),
                created_at: row.created_at,
            },
        })
    }
}

#[derive(Debug)]
struct AlertRow {
    id: i64,
    inventory_id: Uuid,
    alert_type: String,
    message: String,
    status: String,
    resolved_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for AlertRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AlertRow {
            id: row.try_get("id")?,
            inventory_id: row.try_get("inventory_id")?,
            alert_type: row.try_get("alert_type")?,
            message: row.try_get("message")?,
            status: row.try_get("status")?,
            resolved_by: row.try_get("resolved_by")?,
            created_at: row.try_get("created_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}

impl TryFrom<AlertRow> for StockAlert {
    type Error = LedgerError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let backend = |e: stockroom_inventory::StockError| LedgerError::Backend(e.to_string());
        Ok(StockAlert {
            id: AlertId::new(from_db(row.id)?),
            inventory_id: InventoryId::from_uuid(row.inventory_id),
            alert_type: AlertType::from_str(&row.alert_type).map_err(backend)?,
            message: row.message,
            status: AlertStatus::from_str(&row.status).map_err(backend)?,
            resolved_by: row.resolved_by.map(UserId::from_uuid),
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}
