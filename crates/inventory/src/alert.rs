//! Threshold alerts derived from inventory record state.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{AlertId, InventoryId, UserId};
use stockroom_events::Event;

use crate::error::{StockError, StockResult};
use crate::record::InventoryRecord;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    OutOfStock,
    OverStock,
}

impl AlertType {
    pub const ALL: [AlertType; 3] = [AlertType::LowStock, AlertType::OutOfStock, AlertType::OverStock];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::OutOfStock => "out_of_stock",
            AlertType::OverStock => "over_stock",
        }
    }
}

impl core::fmt::Display for AlertType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StockError::Validation(format!("unknown alert type '{s}'")))
    }
}

/// Alert lifecycle: `active → {resolved, dismissed}`; closed states are final.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Resolved,
    Dismissed,
}

impl AlertStatus {
    pub const ALL: [AlertStatus; 3] = [AlertStatus::Active, AlertStatus::Resolved, AlertStatus::Dismissed];

    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Active => "active",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Dismissed => "dismissed",
        }
    }
}

impl core::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StockError::Validation(format!("unknown alert status '{s}'")))
    }
}

/// A threshold breach that should have an active alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub inventory_id: InventoryId,
    pub alert_type: AlertType,
    pub message: String,
}

/// Breaches present in the record's current state.
///
/// Out-of-stock wins over low-stock; over-stock is checked independently and
/// only when the record has a `max_stock_level`. Recovery produces nothing:
/// closing an alert is always an explicit action.
pub fn evaluate(record: &InventoryRecord) -> Vec<AlertCandidate> {
    let mut candidates = Vec::new();
    let inventory_id = record.id_typed();

    if record.is_stock_out() {
        candidates.push(AlertCandidate {
            inventory_id,
            alert_type: AlertType::OutOfStock,
            message: format!("Out of stock for product {}.", record.product_id()),
        });
    } else if record.is_low_stock() {
        candidates.push(AlertCandidate {
            inventory_id,
            alert_type: AlertType::LowStock,
            message: format!(
                "Low stock for product {}: {} left (threshold {}).",
                record.product_id(),
                record.available_quantity(),
                record.low_stock_threshold()
            ),
        });
    }

    if let Some(max) = record.settings().max_stock_level.filter(|_| record.is_over_stock()) {
        candidates.push(AlertCandidate {
            inventory_id,
            alert_type: AlertType::OverStock,
            message: format!(
                "Over stock for product {}: {} on hand exceeds maximum {max}.",
                record.product_id(),
                record.quantity()
            ),
        });
    }

    candidates
}

/// A stock alert row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAlert {
    pub id: AlertId,
    pub inventory_id: InventoryId,
    pub alert_type: AlertType,
    pub message: String,
    pub status: AlertStatus,
    pub resolved_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl StockAlert {
    pub fn raise(id: AlertId, candidate: AlertCandidate, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            inventory_id: candidate.inventory_id,
            alert_type: candidate.alert_type,
            message: candidate.message,
            status: AlertStatus::Active,
            resolved_by: None,
            created_at,
            resolved_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AlertStatus::Active
    }

    fn ensure_active(&self) -> StockResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StockError::AlertClosed {
                id: self.id,
                status: self.status,
            })
        }
    }

    pub fn resolve(&mut self, by: Option<UserId>, at: DateTime<Utc>) -> StockResult<()> {
        self.ensure_active()?;
        self.status = AlertStatus::Resolved;
        self.resolved_by = by;
        self.resolved_at = Some(at);
        Ok(())
    }

    pub fn dismiss(&mut self) -> StockResult<()> {
        self.ensure_active()?;
        self.status = AlertStatus::Dismissed;
        Ok(())
    }
}

/// Alert lifecycle facts, published for notification consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertEvent {
    AlertRaised(StockAlert),
    AlertResolved(StockAlert),
    AlertDismissed { alert: StockAlert, occurred_at: DateTime<Utc> },
}

impl AlertEvent {
    pub fn alert(&self) -> &StockAlert {
        match self {
            AlertEvent::AlertRaised(a) | AlertEvent::AlertResolved(a) => a,
            AlertEvent::AlertDismissed { alert, .. } => alert,
        }
    }
}

impl Event for AlertEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AlertEvent::AlertRaised(_) => "inventory.alert.raised",
            AlertEvent::AlertResolved(_) => "inventory.alert.resolved",
            AlertEvent::AlertDismissed { .. } => "inventory.alert.dismissed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            AlertEvent::AlertRaised(a) => a.created_at,
            AlertEvent::AlertResolved(a) => a.resolved_at.unwrap_or(a.created_at),
            AlertEvent::AlertDismissed { occurred_at, .. } => *occurred_at,
        }
    }
}
