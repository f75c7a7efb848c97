//! Threshold alert engine.
//!
//! Alerts are derived from committed record state: after every mutation the
//! service hands the new record to [`StockAlertEngine::evaluate`], which raises
//! an alert for each breach that does not already have an active one. Alerts
//! never close on their own when stock recovers; closing is always an explicit
//! `resolve` or `dismiss`.

use chrono::Utc;
use tracing::{debug, info, instrument};

use stockroom_core::{AlertId, InventoryId, UserId};
use stockroom_inventory::{AlertStatus, InventoryRecord, StockAlert, StockError, StockResult, evaluate};

pub mod store;

pub use store::{AlertFilter, AlertStore, InMemoryAlertStore};

#[derive(Debug)]
pub struct StockAlertEngine<A> {
    store: A,
}

impl<A> StockAlertEngine<A> {
    pub fn new(store: A) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &A {
        &self.store
    }
}

impl<A> StockAlertEngine<A>
where
    A: AlertStore,
{
    /// Raise alerts for every breach in `record` that is not already active.
    ///
    /// Returns only the alerts created by this call.
    #[instrument(skip(self, record), fields(inventory_id = %record.id_typed()))]
    pub async fn evaluate(&self, record: &InventoryRecord) -> StockResult<Vec<StockAlert>> {
        let mut raised = Vec::new();
        let now = Utc::now();

        for candidate in evaluate(record) {
            let alert_type = candidate.alert_type;
            match self.store.raise_if_absent(candidate, now).await? {
                Some(alert) => {
                    info!(alert_id = %alert.id, alert_type = %alert.alert_type, "stock alert raised");
                    raised.push(alert);
                }
                None => debug!(%alert_type, "active alert already present"),
            }
        }

        Ok(raised)
    }

    pub async fn alert(&self, id: AlertId) -> StockResult<StockAlert> {
        self.store.get(id).await?.ok_or(StockError::AlertNotFound(id))
    }

    /// Close an active alert as handled.
    #[instrument(skip(self), fields(alert_id = %id))]
    pub async fn resolve(&self, id: AlertId, by: Option<UserId>) -> StockResult<StockAlert> {
        let mut alert = self.alert(id).await?;
        alert.resolve(by, Utc::now())?;
        self.commit_transition(alert).await
    }

    /// Close an active alert without handling it.
    #[instrument(skip(self), fields(alert_id = %id))]
    pub async fn dismiss(&self, id: AlertId) -> StockResult<StockAlert> {
        let mut alert = self.alert(id).await?;
        alert.dismiss()?;
        self.commit_transition(alert).await
    }

    async fn commit_transition(&self, alert: StockAlert) -> StockResult<StockAlert> {
        if self.store.transition(&alert, AlertStatus::Active).await? {
            info!(alert_id = %alert.id, status = %alert.status, "stock alert closed");
            return Ok(alert);
        }

        // Lost the race to another close; report what actually happened.
        let current = self.alert(alert.id).await?;
        Err(StockError::AlertClosed {
            id: current.id,
            status: current.status,
        })
    }

    pub async fn active_alerts(&self) -> StockResult<Vec<StockAlert>> {
        Ok(self.store.list(&AlertFilter::active()).await?)
    }

    /// Every alert of one record, any status, newest first.
    pub async fn alerts_for(&self, inventory_id: InventoryId) -> StockResult<Vec<StockAlert>> {
        Ok(self.store.list(&AlertFilter::for_record(inventory_id)).await?)
    }

    pub async fn list(&self, filter: &AlertFilter) -> StockResult<Vec<StockAlert>> {
        Ok(self.store.list(filter).await?)
    }
}
