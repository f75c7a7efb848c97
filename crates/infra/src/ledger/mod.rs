//! Storage boundary for inventory records and their movement ledger.
//!
//! A [`StockLedger`] persists two things that must never disagree:
//!
//! 1. the current [`InventoryRecord`] state (stored as a snapshot row)
//! 2. the append-only list of [`StockMovement`]s that produced it
//!
//! Both are written by a single [`StockLedger::append`] call, which is atomic:
//! the record row is replaced only if it is still at the expected version, and
//! the movements are appended in the same unit of work. Readers never observe
//! a balance without its movement, or a movement without its balance.
//!
//! ## Sequence numbers
//!
//! Every movement carries the record version it produced (`sequence`). A
//! record at version `v` that appends `n` movements in one call gets sequences
//! `v - n + 1 ..= v`. Movement ids are a ledger-wide auto-increment.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockroom_core::{AggregateRoot, ExpectedVersion, InventoryId, ProductId};
use stockroom_inventory::{InventoryRecord, RecordedMovement, StockError, StockMovement};

pub mod in_memory;

pub use in_memory::InMemoryStockLedger;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The stored record moved past the expected version.
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("inventory record already exists for product {0}")]
    DuplicateRecord(ProductId),

    #[error("inventory record not found: {0}")]
    NotFound(InventoryId),

    /// The batch does not describe a valid write for the record.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<LedgerError> for StockError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::Concurrency(msg) => StockError::ConcurrencyConflict(msg),
            LedgerError::DuplicateRecord(product_id) => StockError::DuplicateRecord(product_id),
            LedgerError::NotFound(id) => StockError::record_not_found(id),
            LedgerError::InvalidAppend(msg) => StockError::mismatch(msg),
            LedgerError::Backend(msg) => StockError::Storage(msg),
        }
    }
}

/// Persistence for inventory records and the movement ledger.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Insert a freshly created record (version >= 1, no movements yet).
    ///
    /// Fails with [`LedgerError::DuplicateRecord`] if the product already has one.
    async fn create(&self, record: &InventoryRecord) -> Result<(), LedgerError>;

    async fn load(&self, id: InventoryId) -> Result<Option<InventoryRecord>, LedgerError>;

    async fn find_by_product(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, LedgerError>;

    /// Replace the record state and append `movements` atomically.
    ///
    /// `record` is the state *after* the movements were applied. The write only
    /// happens if the stored version satisfies `expected`; otherwise
    /// [`LedgerError::Concurrency`] is returned and nothing changes.
    async fn append(
        &self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
        movements: Vec<StockMovement>,
    ) -> Result<Vec<RecordedMovement>, LedgerError>;

    /// Movements of one record in sequence order, optionally from `since` on.
    async fn history(
        &self,
        id: InventoryId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordedMovement>, LedgerError>;

    /// Every record, ordered by id.
    async fn records(&self) -> Result<Vec<InventoryRecord>, LedgerError>;

    /// The latest movements across all records, newest first.
    async fn recent_movements(&self, limit: usize) -> Result<Vec<RecordedMovement>, LedgerError>;
}

#[async_trait]
impl<S> StockLedger for Arc<S>
where
    S: StockLedger + ?Sized,
{
    async fn create(&self, record: &InventoryRecord) -> Result<(), LedgerError> {
        (**self).create(record).await
    }

    async fn load(&self, id: InventoryId) -> Result<Option<InventoryRecord>, LedgerError> {
        (**self).load(id).await
    }

    async fn find_by_product(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, LedgerError> {
        (**self).find_by_product(product_id).await
    }

    async fn append(
        &self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
        movements: Vec<StockMovement>,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        (**self).append(record, expected, movements).await
    }

    async fn history(
        &self,
        id: InventoryId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        (**self).history(id, since).await
    }

    async fn records(&self) -> Result<Vec<InventoryRecord>, LedgerError> {
        (**self).records().await
    }

    async fn recent_movements(&self, limit: usize) -> Result<Vec<RecordedMovement>, LedgerError> {
        (**self).recent_movements(limit).await
    }
}

/// Checks shared by every backend before a batch is written.
///
/// Returns the sequence number of the first movement in the batch.
pub(crate) fn validate_append(record: &InventoryRecord, movements: &[StockMovement]) -> Result<u64, LedgerError> {
    let id = record.id_typed();
    let count = movements.len() as u64;

    if !record.is_created() {
        return Err(LedgerError::InvalidAppend(format!("record {id} was never created")));
    }
    if record.version() < count {
        return Err(LedgerError::InvalidAppend(format!(
            "record {id} at version {} cannot carry {count} movements",
            record.version()
        )));
    }

    for (idx, movement) in movements.iter().enumerate() {
        if movement.inventory_id != id {
            return Err(LedgerError::InvalidAppend(format!(
                "batch contains a movement for another record (index {idx})"
            )));
        }
        movement
            .check_consistency()
            .map_err(|e| LedgerError::InvalidAppend(format!("index {idx}: {e}")))?;
    }

    Ok(record.version() - count + 1)
}

/// Keep the movements at or after `since`.
pub(crate) fn since_filter(since: Option<DateTime<Utc>>) -> impl Fn(&RecordedMovement) -> bool {
    move |entry| since.is_none_or(|at| entry.movement.created_at >= at)
}
