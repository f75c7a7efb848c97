//! Inventory stock accounting domain.
//!
//! Business rules for on-hand stock, reservations, the movement ledger and
//! threshold alerts, implemented as deterministic domain logic (no IO, no
//! storage, no clocks). Timestamps arrive on commands.

pub mod alert;
pub mod error;
pub mod movement;
pub mod record;

pub use alert::{AlertCandidate, AlertEvent, AlertStatus, AlertType, StockAlert, evaluate};
pub use error::{StockError, StockResult};
pub use movement::{Balance, MovementType, RecordedMovement, StockMovement, reconcile, replay};
pub use record::{
    AdjustStock, CreateRecord, InventoryCommand, InventoryEvent, InventoryRecord, MovementRequest,
    RecordCreated, RecordSettings, RecordSnapshot, SettingsUpdated, UpdateSettings,
};
