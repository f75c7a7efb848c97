//! Infrastructure layer: ledger storage, the transactional stock service,
//! alert engine, read-side queries and configuration.

pub mod alerts;
pub mod authz;
pub mod config;
pub mod ledger;
pub mod postgres;
pub mod query;
pub mod service;


pub use alerts::{AlertFilter, AlertStore, InMemoryAlertStore, StockAlertEngine};
pub use authz::{Actor, AllowAll, OperationGuard, PermissionGuard, StockOperation};
pub use config::{DatabaseConfig, RecordDefaults, RetryConfig, StockConfig};
pub use ledger::{InMemoryStockLedger, LedgerError, StockLedger};
pub use postgres::PostgresStockLedger;
pub use query::{InventoryQueries, InventorySummary, MovementTotals};
pub use service::{StockContext, StockOutcome, StockService};
