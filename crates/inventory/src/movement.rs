//! Stock movements: the immutable ledger entries behind every balance change.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{InventoryId, MovementId, UserId};

use crate::error::{StockError, StockResult};
use crate::record::InventoryRecord;

/// Kind of balance change a movement records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    /// Units received (restock).
    In,
    /// Units shipped against an order (consumption).
    Out,
    /// Direct correction after a stock count.
    Adjustment,
    /// Units returned to stock.
    Return,
    /// Units earmarked for an unfulfilled order.
    Reserved,
    /// A reservation given back.
    Released,
}

impl MovementType {
    pub const ALL: [MovementType; 6] = [
        MovementType::In,
        MovementType::Out,
        MovementType::Adjustment,
        MovementType::Return,
        MovementType::Reserved,
        MovementType::Released,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::In => "in",
            MovementType::Out => "out",
            MovementType::Adjustment => "adjustment",
            MovementType::Return => "return",
            MovementType::Reserved => "reserved",
            MovementType::Released => "released",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| StockError::Validation(format!("unknown movement type '{s}'")))
    }
}

/// One balance-changing event, as written to the ledger.
///
/// `quantity` follows the audit convention: positive for additions, negative
/// for stock leaving, the magnitude for reservation changes, and the signed
/// delta for adjustments. `on_hand_delta`/`reserved_delta` are the exact
/// effects on the two balances, which is what replay uses.
///
/// `previous_quantity`/`new_quantity` snapshot the *available* quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub inventory_id: InventoryId,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub on_hand_delta: i64,
    pub reserved_delta: i64,
    pub previous_quantity: u64,
    pub new_quantity: u64,
    pub reference: String,
    pub note: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Check that the recorded numbers agree with the movement type and with
    /// each other (`new_quantity` must follow from `previous_quantity`).
    pub fn check_consistency(&self) -> StockResult<()> {
        let fail = |why: &str| {
            Err(StockError::mismatch(format!(
                "{} movement on {}: {why}",
                self.movement_type, self.inventory_id
            )))
        };

        match self.movement_type {
            MovementType::In | MovementType::Return => {
                if self.quantity <= 0 || self.on_hand_delta != self.quantity || self.reserved_delta != 0 {
                    return fail("expected a positive on-hand addition");
                }
            }
            MovementType::Out => {
                if self.quantity >= 0 || self.on_hand_delta != self.quantity {
                    return fail("expected a negative on-hand removal");
                }
                if self.reserved_delta > 0 || self.reserved_delta < self.quantity {
                    return fail("reservation drawn down by more than the consumed amount");
                }
            }
            MovementType::Adjustment => {
                if self.on_hand_delta != self.quantity || self.reserved_delta != 0 {
                    return fail("adjustment must only change on-hand stock");
                }
            }
            MovementType::Reserved => {
                if self.quantity <= 0 || self.on_hand_delta != 0 || self.reserved_delta != self.quantity {
                    return fail("expected a positive reservation");
                }
            }
            MovementType::Released => {
                if self.quantity < 0 || self.on_hand_delta != 0 || self.reserved_delta != -self.quantity {
                    return fail("expected a reservation release");
                }
            }
        }

        let expected = self.previous_quantity as i128 + self.on_hand_delta as i128 - self.reserved_delta as i128;
        if expected != self.new_quantity as i128 {
            return fail(&format!(
                "available {} -> {} does not follow from the deltas",
                self.previous_quantity, self.new_quantity
            ));
        }

        Ok(())
    }

    /// Units counted as "stock in" for dashboard totals.
    pub fn stock_in(&self) -> u64 {
        match self.movement_type {
            MovementType::In | MovementType::Return | MovementType::Adjustment if self.quantity > 0 => {
                self.quantity.unsigned_abs()
            }
            _ => 0,
        }
    }

    /// Units counted as "stock out" (consumed or reserved) for dashboard totals.
    pub fn stock_out(&self) -> u64 {
        match self.movement_type {
            MovementType::Out | MovementType::Reserved => self.quantity.unsigned_abs(),
            _ => 0,
        }
    }
}

/// A movement as persisted: the ledger assigns the id and the stream position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedMovement {
    /// Global auto-increment across the whole ledger.
    pub id: MovementId,
    pub inventory_id: InventoryId,
    /// Record version produced by this movement.
    pub sequence: u64,
    pub movement: StockMovement,
}

/// On-hand and reserved balances rebuilt from movements.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub quantity: u64,
    pub reserved_quantity: u64,
}

impl Balance {
    pub fn available(&self) -> u64 {
        self.quantity.saturating_sub(self.reserved_quantity)
    }

    /// Apply one movement, verifying its snapshots against the running balance.
    pub fn apply(&mut self, movement: &StockMovement) -> StockResult<()> {
        movement.check_consistency()?;

        if movement.previous_quantity != self.available() {
            return Err(StockError::mismatch(format!(
                "movement recorded available {} but replay has {}",
                movement.previous_quantity,
                self.available()
            )));
        }

        let quantity = self
            .quantity
            .checked_add_signed(movement.on_hand_delta)
            .ok_or_else(|| StockError::mismatch("on-hand quantity would go negative"))?;
        let reserved_quantity = self
            .reserved_quantity
            .checked_add_signed(movement.reserved_delta)
            .ok_or_else(|| StockError::mismatch("reserved quantity would go negative"))?;

        if reserved_quantity > quantity {
            return Err(StockError::mismatch(format!(
                "reserved {reserved_quantity} exceeds on-hand {quantity}"
            )));
        }

        self.quantity = quantity;
        self.reserved_quantity = reserved_quantity;
        Ok(())
    }
}

/// Replay movements oldest-first from an empty balance.
pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> StockResult<Balance> {
    let mut balance = Balance::default();
    for movement in movements {
        balance.apply(movement)?;
    }
    Ok(balance)
}

/// Verify that a record's full history reproduces its current balances.
pub fn reconcile(record: &InventoryRecord, history: &[RecordedMovement]) -> StockResult<Balance> {
    let mut last = 0u64;
    for entry in history {
        if entry.inventory_id != record.id_typed() || entry.movement.inventory_id != record.id_typed() {
            return Err(StockError::mismatch(format!(
                "movement {} belongs to another record",
                entry.id
            )));
        }
        if entry.sequence <= last {
            return Err(StockError::mismatch(format!(
                "non-monotonic sequence in history (last={last}, found={})",
                entry.sequence
            )));
        }
        last = entry.sequence;
    }

    let balance = replay(history.iter().map(|e| &e.movement))?;
    if balance.quantity != record.quantity() || balance.reserved_quantity != record.reserved_quantity() {
        return Err(StockError::mismatch(format!(
            "replayed quantity={} reserved={} but record holds quantity={} reserved={}",
            balance.quantity,
            balance.reserved_quantity,
            record.quantity(),
            record.reserved_quantity()
        )));
    }
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn movement(
        movement_type: MovementType,
        quantity: i64,
        on_hand_delta: i64,
        reserved_delta: i64,
        previous_quantity: u64,
        new_quantity: u64,
    ) -> StockMovement {
        StockMovement {
            inventory_id: InventoryId::new(),
            movement_type,
            quantity,
            on_hand_delta,
            reserved_delta,
            previous_quantity,
            new_quantity,
            reference: "test".to_string(),
            note: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn movement_types_parse_from_their_names() {
        for t in MovementType::ALL {
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
        assert!("damaged".parse::<MovementType>().is_err());
    }

    #[test]
    fn replay_rebuilds_balances() {
        let history = vec![
            movement(MovementType::In, 10, 10, 0, 0, 10),
            movement(MovementType::Reserved, 3, 0, 3, 10, 7),
            movement(MovementType::Out, -3, -3, -3, 7, 7),
            movement(MovementType::Reserved, 2, 0, 2, 7, 5),
            movement(MovementType::Released, 2, 0, -2, 5, 7),
        ];

        let balance = replay(&history).unwrap();
        assert_eq!(balance, Balance { quantity: 7, reserved_quantity: 0 });
    }

    #[test]
    fn replay_rejects_snapshot_drift() {
        let history = vec![
            movement(MovementType::In, 10, 10, 0, 0, 10),
            // previous_quantity should be 10
            movement(MovementType::Reserved, 3, 0, 3, 9, 6),
        ];

        let err = replay(&history).unwrap_err();
        assert_eq!(err.kind(), "ledger_mismatch");
    }

    #[test]
    fn inconsistent_entries_are_rejected() {
        // An `in` movement that claims to touch reservations.
        assert!(movement(MovementType::In, 5, 5, 1, 0, 4).check_consistency().is_err());
        // Consumption drawing down more reservation than it consumed.
        assert!(movement(MovementType::Out, -1, -1, -2, 0, 1).check_consistency().is_err());
        // new_quantity not derivable from previous_quantity.
        assert!(movement(MovementType::Adjustment, -2, -2, 0, 10, 7).check_consistency().is_err());
    }

    #[test]
    fn dashboard_totals_follow_movement_direction() {
        assert_eq!(movement(MovementType::In, 4, 4, 0, 0, 4).stock_in(), 4);
        assert_eq!(movement(MovementType::Adjustment, -2, -2, 0, 4, 2).stock_in(), 0);
        assert_eq!(movement(MovementType::Out, -3, -3, 0, 3, 0).stock_out(), 3);
        assert_eq!(movement(MovementType::Reserved, 1, 0, 1, 3, 2).stock_out(), 1);
        assert_eq!(movement(MovementType::Released, 1, 0, -1, 2, 3).stock_out(), 0);
    }
}
