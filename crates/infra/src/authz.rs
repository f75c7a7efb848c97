//! Authorization seam for stock operations.
//!
//! Who may do what is decided by the embedding application. The service only
//! asks an [`OperationGuard`] before running a mutation. Permissions are opaque
//! strings such as `"inventory.adjust"`; `"*"` grants everything.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use stockroom_core::UserId;
use stockroom_inventory::StockError;

/// The caller of a stock operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub permissions: Vec<String>,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            permissions: Vec::new(),
        }
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == "*" || p == permission)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    CreateRecord,
    UpdateSettings,
    Reserve,
    Release,
    Consume,
    AddStock,
    ReturnStock,
    Adjust,
    ResolveAlert,
    DismissAlert,
}

impl StockOperation {
    /// Permission string required for the operation.
    pub fn permission(self) -> &'static str {
        match self {
            StockOperation::CreateRecord => "inventory.create",
            StockOperation::UpdateSettings => "inventory.settings",
            StockOperation::Reserve => "inventory.reserve",
            StockOperation::Release => "inventory.release",
            StockOperation::Consume => "inventory.consume",
            StockOperation::AddStock => "inventory.add",
            StockOperation::ReturnStock => "inventory.return",
            StockOperation::Adjust => "inventory.adjust",
            StockOperation::ResolveAlert => "inventory.alerts.resolve",
            StockOperation::DismissAlert => "inventory.alerts.dismiss",
        }
    }
}

impl core::fmt::Display for StockOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.permission())
    }
}

/// Decides whether an actor may run an operation.
pub trait OperationGuard: Send + Sync {
    fn check(&self, actor: Option<&Actor>, operation: StockOperation) -> Result<(), StockError>;
}

/// Lets every call through; for embedders that authorize upstream.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl OperationGuard for AllowAll {
    fn check(&self, _actor: Option<&Actor>, _operation: StockOperation) -> Result<(), StockError> {
        Ok(())
    }
}

/// Requires an identified actor holding the operation's permission.
///
/// Operations listed as `open` skip the check entirely.
#[derive(Debug, Default, Clone)]
pub struct PermissionGuard {
    open: HashSet<StockOperation>,
}

impl PermissionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_anyone(mut self, operation: StockOperation) -> Self {
        self.open.insert(operation);
        self
    }
}

impl OperationGuard for PermissionGuard {
    fn check(&self, actor: Option<&Actor>, operation: StockOperation) -> Result<(), StockError> {
        if self.open.contains(&operation) {
            return Ok(());
        }

        match actor {
            Some(actor) if actor.has_permission(operation.permission()) => Ok(()),
            Some(actor) => Err(StockError::Unauthorized(format!(
                "user {} lacks '{}'",
                actor.user_id,
                operation.permission()
            ))),
            None => Err(StockError::Unauthorized(format!(
                "anonymous caller cannot perform '{}'",
                operation.permission()
            ))),
        }
    }
}
