//! Read-only views for dashboards and reports.
//!
//! Every call reads the latest committed record rows; a multi-record view is
//! not a consistent snapshot across records. Stock levels use the *available*
//! quantity (on hand minus reserved).

use std::collections::BTreeSet;

use serde::Serialize;

use stockroom_core::InventoryId;
use stockroom_inventory::{InventoryRecord, RecordedMovement, StockResult};

use crate::alerts::{AlertFilter, AlertStore};
use crate::ledger::StockLedger;

/// Headline numbers for the inventory dashboard.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    pub total_records: usize,
    pub low_stock: usize,
    pub out_of_stock: usize,
    pub active_alerts: usize,
    pub total_on_hand: u64,
    pub total_reserved: u64,
    pub total_available: u64,
}

/// Lifetime stock flow of one record.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MovementTotals {
    /// Received, returned and positive adjustments.
    pub stock_in: u64,
    /// Consumed and reserved.
    pub stock_out: u64,
    pub movements: usize,
}

pub struct InventoryQueries<L, A> {
    ledger: L,
    alerts: A,
}

impl<L, A> InventoryQueries<L, A>
where
    L: StockLedger,
    A: AlertStore,
{
    pub fn new(ledger: L, alerts: A) -> Self {
        Self { ledger, alerts }
    }

    async fn filtered(&self, keep: impl Fn(&InventoryRecord) -> bool) -> StockResult<Vec<InventoryRecord>> {
        let mut records = self.ledger.records().await?;
        records.retain(|r| keep(r));
        Ok(records)
    }

    /// In stock but at or below the threshold.
    pub async fn low_stock(&self) -> StockResult<Vec<InventoryRecord>> {
        self.filtered(InventoryRecord::is_low_stock).await
    }

    pub async fn out_of_stock(&self) -> StockResult<Vec<InventoryRecord>> {
        self.filtered(InventoryRecord::is_stock_out).await
    }

    pub async fn in_stock(&self) -> StockResult<Vec<InventoryRecord>> {
        self.filtered(|r| !r.is_stock_out()).await
    }

    /// Out of stock or low.
    pub async fn needs_restock(&self) -> StockResult<Vec<InventoryRecord>> {
        self.filtered(InventoryRecord::needs_restock).await
    }

    pub async fn by_location(&self, location: &str) -> StockResult<Vec<InventoryRecord>> {
        self.filtered(|r| r.location() == Some(location)).await
    }

    /// Distinct storage locations, sorted.
    pub async fn locations(&self) -> StockResult<Vec<String>> {
        let records = self.ledger.records().await?;
        let locations: BTreeSet<String> = records
            .iter()
            .filter_map(|r| r.location().map(str::to_string))
            .collect();
        Ok(locations.into_iter().collect())
    }

    pub async fn total_available_stock(&self) -> StockResult<u64> {
        let records = self.ledger.records().await?;
        Ok(records.iter().map(InventoryRecord::available_quantity).sum())
    }

    pub async fn summary(&self) -> StockResult<InventorySummary> {
        let records = self.ledger.records().await?;
        let active_alerts = self.alerts.list(&AlertFilter::active()).await?.len();

        let mut summary = InventorySummary {
            total_records: records.len(),
            active_alerts,
            ..InventorySummary::default()
        };
        for record in &records {
            summary.low_stock += usize::from(record.is_low_stock());
            summary.out_of_stock += usize::from(record.is_stock_out());
            summary.total_on_hand += record.quantity();
            summary.total_reserved += record.reserved_quantity();
            summary.total_available += record.available_quantity();
        }
        Ok(summary)
    }

    pub async fn movement_totals(&self, id: InventoryId) -> StockResult<MovementTotals> {
        let history = self.ledger.history(id, None).await?;
        Ok(MovementTotals {
            stock_in: history.iter().map(|e| e.movement.stock_in()).sum(),
            stock_out: history.iter().map(|e| e.movement.stock_out()).sum(),
            movements: history.len(),
        })
    }

    /// Latest ledger entries across all records, newest first.
    pub async fn recent_movements(&self, limit: usize) -> StockResult<Vec<RecordedMovement>> {
        Ok(self.ledger.recent_movements(limit).await?)
    }
}
