use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockroom_core::{AlertId, InventoryId};
use stockroom_inventory::{AlertCandidate, AlertStatus, AlertType, StockAlert};

use crate::ledger::LedgerError;

/// Optional criteria for listing alerts; `None` matches everything.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AlertFilter {
    pub inventory_id: Option<InventoryId>,
    pub alert_type: Option<AlertType>,
    pub status: Option<AlertStatus>,
}

impl AlertFilter {
    pub fn active() -> Self {
        Self {
            status: Some(AlertStatus::Active),
            ..Self::default()
        }
    }

    pub fn for_record(inventory_id: InventoryId) -> Self {
        Self {
            inventory_id: Some(inventory_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, alert: &StockAlert) -> bool {
        self.inventory_id.is_none_or(|id| alert.inventory_id == id)
            && self.alert_type.is_none_or(|t| alert.alert_type == t)
            && self.status.is_none_or(|s| alert.status == s)
    }
}

/// Persistence for stock alerts.
///
/// At most one *active* alert may exist per `(inventory_id, alert_type)`.
/// Implementations enforce this with a conditional insert, so concurrent
/// evaluations of the same breach create exactly one alert.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Insert an active alert unless one of the same type is already active
    /// for the record. Returns the new alert, or `None` when deduplicated.
    async fn raise_if_absent(
        &self,
        candidate: AlertCandidate,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, LedgerError>;

    async fn get(&self, id: AlertId) -> Result<Option<StockAlert>, LedgerError>;

    /// Persist `alert`'s new status only if the stored alert is still in `from`.
    ///
    /// Returns `false` when someone else changed the alert first.
    async fn transition(&self, alert: &StockAlert, from: AlertStatus) -> Result<bool, LedgerError>;

    /// Matching alerts, newest first.
    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, LedgerError>;
}

#[async_trait]
impl<S> AlertStore for Arc<S>
where
    S: AlertStore + ?Sized,
{
    async fn raise_if_absent(
        &self,
        candidate: AlertCandidate,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, LedgerError> {
        (**self).raise_if_absent(candidate, at).await
    }

    async fn get(&self, id: AlertId) -> Result<Option<StockAlert>, LedgerError> {
        (**self).get(id).await
    }

    async fn transition(&self, alert: &StockAlert, from: AlertStatus) -> Result<bool, LedgerError> {
        (**self).transition(alert, from).await
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, LedgerError> {
        (**self).list(filter).await
    }
}

#[derive(Debug, Default)]
struct AlertTable {
    rows: Vec<StockAlert>,
    next_id: u64,
}

/// In-memory alert store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryAlertStore {
    table: RwLock<AlertTable>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Backend("lock poisoned".to_string())
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn raise_if_absent(
        &self,
        candidate: AlertCandidate,
        at: DateTime<Utc>,
    ) -> Result<Option<StockAlert>, LedgerError> {
        let mut table = self.table.write().map_err(poisoned)?;
        let duplicate = table.rows.iter().any(|a| {
            a.is_active() && a.inventory_id == candidate.inventory_id && a.alert_type == candidate.alert_type
        });
        if duplicate {
            return Ok(None);
        }

        table.next_id += 1;
        let alert = StockAlert::raise(AlertId::new(table.next_id), candidate, at);
        table.rows.push(alert.clone());
        Ok(Some(alert))
    }

    async fn get(&self, id: AlertId) -> Result<Option<StockAlert>, LedgerError> {
        let table = self.table.read().map_err(poisoned)?;
        Ok(table.rows.iter().find(|a| a.id == id).cloned())
    }

    async fn transition(&self, alert: &StockAlert, from: AlertStatus) -> Result<bool, LedgerError> {
        let mut table = self.table.write().map_err(poisoned)?;
        match table.rows.iter_mut().find(|a| a.id == alert.id) {
            Some(stored) if stored.status == from => {
                *stored = alert.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: &AlertFilter) -> Result<Vec<StockAlert>, LedgerError> {
        let table = self.table.read().map_err(poisoned)?;
        let mut alerts: Vec<StockAlert> = table.rows.iter().filter(|a| filter.matches(a)).cloned().collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(alerts)
    }
}
