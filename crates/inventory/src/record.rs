use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockroom_core::{Aggregate, AggregateRoot, InventoryId, ProductId, UserId};
use stockroom_events::Event;

use crate::error::{StockError, StockResult};
use crate::movement::{MovementType, StockMovement};

/// Tunable, non-balance attributes of an inventory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSettings {
    pub low_stock_threshold: u64,
    /// Suggested restock amount; must be positive.
    pub reorder_quantity: u64,
    /// On-hand level above which an `over_stock` alert is raised.
    pub max_stock_level: Option<u64>,
    pub location: Option<String>,
    /// Batch/lot label for traceability.
    pub batch_number: Option<String>,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            low_stock_threshold: 5,
            reorder_quantity: 10,
            max_stock_level: None,
            location: None,
            batch_number: None,
        }
    }
}

impl RecordSettings {
    pub fn validate(&self) -> StockResult<()> {
        if self.reorder_quantity == 0 {
            return Err(StockError::Validation("reorder_quantity must be positive".into()));
        }
        if let Some(max) = self.max_stock_level {
            if max <= self.low_stock_threshold {
                return Err(StockError::Validation(format!(
                    "max_stock_level ({max}) must exceed low_stock_threshold ({})",
                    self.low_stock_threshold
                )));
            }
        }
        if matches!(&self.location, Some(l) if l.trim().is_empty()) {
            return Err(StockError::Validation("location cannot be blank".into()));
        }
        Ok(())
    }
}

/// Plain-data form of an [`InventoryRecord`], as stored by a ledger backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: InventoryId,
    pub product_id: ProductId,
    pub quantity: u64,
    pub reserved_quantity: u64,
    pub settings: RecordSettings,
    pub last_restocked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
}

/// Aggregate root: the current stock position of one product.
///
/// Balances only change by applying [`InventoryEvent::StockMoved`], so every
/// change has a ledger entry by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryRecord {
    id: InventoryId,
    product_id: ProductId,
    quantity: u64,
    reserved_quantity: u64,
    settings: RecordSettings,
    last_restocked: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    created: bool,
}

impl InventoryRecord {
    /// Not-yet-created instance, the starting point for `CreateRecord`.
    pub fn empty(id: InventoryId, product_id: ProductId) -> Self {
        Self {
            id,
            product_id,
            quantity: 0,
            reserved_quantity: 0,
            settings: RecordSettings::default(),
            last_restocked: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            version: 0,
            created: false,
        }
    }

    /// Rebuild a committed record from storage.
    pub fn from_snapshot(snapshot: RecordSnapshot) -> Self {
        Self {
            id: snapshot.id,
            product_id: snapshot.product_id,
            quantity: snapshot.quantity,
            reserved_quantity: snapshot.reserved_quantity,
            settings: snapshot.settings,
            last_restocked: snapshot.last_restocked,
            created_at: snapshot.created_at,
            updated_at: snapshot.updated_at,
            version: snapshot.version,
            created: true,
        }
    }

    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot {
            id: self.id,
            product_id: self.product_id,
            quantity: self.quantity,
            reserved_quantity: self.reserved_quantity,
            settings: self.settings.clone(),
            last_restocked: self.last_restocked,
            created_at: self.created_at,
            updated_at: self.updated_at,
            version: self.version,
        }
    }

    pub fn id_typed(&self) -> InventoryId {
        self.id
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Total physical units on hand.
    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    /// Units committed to unfulfilled orders.
    pub fn reserved_quantity(&self) -> u64 {
        self.reserved_quantity
    }

    pub fn settings(&self) -> &RecordSettings {
        &self.settings
    }

    pub fn low_stock_threshold(&self) -> u64 {
        self.settings.low_stock_threshold
    }

    pub fn reorder_quantity(&self) -> u64 {
        self.settings.reorder_quantity
    }

    pub fn location(&self) -> Option<&str> {
        self.settings.location.as_deref()
    }

    pub fn last_restocked(&self) -> Option<DateTime<Utc>> {
        self.last_restocked
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn available_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.reserved_quantity)
    }

    pub fn is_stock_out(&self) -> bool {
        self.available_quantity() == 0
    }

    pub fn is_low_stock(&self) -> bool {
        let available = self.available_quantity();
        available > 0 && available <= self.settings.low_stock_threshold
    }

    pub fn needs_restock(&self) -> bool {
        self.is_low_stock() || self.is_stock_out()
    }

    pub fn is_over_stock(&self) -> bool {
        matches!(self.settings.max_stock_level, Some(max) if self.quantity > max)
    }
}

impl AggregateRoot for InventoryRecord {
    type Id = InventoryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateRecord (one per product, at product creation time).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRecord {
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub settings: RecordSettings,
    pub occurred_at: DateTime<Utc>,
}

/// Shared shape of reserve / release / consume / add / return commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRequest {
    pub quantity: u64,
    /// Correlation id, typically an order number.
    pub reference: String,
    pub note: Option<String>,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (direct correction after a count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub new_quantity: u64,
    pub reason: String,
    pub note: Option<String>,
    pub actor: Option<UserId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateSettings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateSettings {
    pub settings: RecordSettings,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    Create(CreateRecord),
    Reserve(MovementRequest),
    Release(MovementRequest),
    Consume(MovementRequest),
    AddStock(MovementRequest),
    ReturnStock(MovementRequest),
    Adjust(AdjustStock),
    UpdateSettings(UpdateSettings),
}

/// Event: RecordCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCreated {
    pub inventory_id: InventoryId,
    pub product_id: ProductId,
    pub settings: RecordSettings,
    pub occurred_at: DateTime<Utc>,
}

/// Event: SettingsUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsUpdated {
    pub inventory_id: InventoryId,
    pub settings: RecordSettings,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    RecordCreated(RecordCreated),
    SettingsUpdated(SettingsUpdated),
    StockMoved(StockMovement),
}

impl InventoryEvent {
    pub fn movement(&self) -> Option<&StockMovement> {
        match self {
            InventoryEvent::StockMoved(m) => Some(m),
            _ => None,
        }
    }
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::RecordCreated(_) => "inventory.record.created",
            InventoryEvent::SettingsUpdated(_) => "inventory.record.settings_updated",
            InventoryEvent::StockMoved(m) => match m.movement_type {
                MovementType::In => "inventory.stock.in",
                MovementType::Out => "inventory.stock.out",
                MovementType::Adjustment => "inventory.stock.adjusted",
                MovementType::Return => "inventory.stock.returned",
                MovementType::Reserved => "inventory.stock.reserved",
                MovementType::Released => "inventory.stock.released",
            },
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::RecordCreated(e) => e.occurred_at,
            InventoryEvent::SettingsUpdated(e) => e.occurred_at,
            InventoryEvent::StockMoved(m) => m.created_at,
        }
    }
}

impl Aggregate for InventoryRecord {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = StockError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::RecordCreated(e) => {
                self.id = e.inventory_id;
                self.product_id = e.product_id;
                self.settings = e.settings.clone();
                self.quantity = 0;
                self.reserved_quantity = 0;
                self.created_at = e.occurred_at;
                self.updated_at = e.occurred_at;
                self.created = true;
            }
            InventoryEvent::SettingsUpdated(e) => {
                self.settings = e.settings.clone();
                self.updated_at = e.occurred_at;
            }
            InventoryEvent::StockMoved(m) => {
                // handle() only emits movements that keep both balances in range.
                self.quantity = self.quantity.saturating_add_signed(m.on_hand_delta);
                self.reserved_quantity = self.reserved_quantity.saturating_add_signed(m.reserved_delta);
                if m.movement_type == MovementType::In {
                    self.last_restocked = Some(m.created_at);
                }
                self.updated_at = m.created_at;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if !self.created && !matches!(command, InventoryCommand::Create(_)) {
            return Err(StockError::record_not_found(self.id));
        }

        let event = match command {
            InventoryCommand::Create(cmd) => return self.handle_create(cmd),
            InventoryCommand::Reserve(req) => self.handle_reserve(req)?,
            InventoryCommand::Release(req) => self.handle_release(req)?,
            InventoryCommand::Consume(req) => self.handle_consume(req)?,
            InventoryCommand::AddStock(req) => self.handle_receive(MovementType::In, req)?,
            InventoryCommand::ReturnStock(req) => self.handle_receive(MovementType::Return, req)?,
            InventoryCommand::Adjust(cmd) => self.handle_adjust(cmd)?,
            InventoryCommand::UpdateSettings(cmd) => {
                cmd.settings.validate()?;
                InventoryEvent::SettingsUpdated(SettingsUpdated {
                    inventory_id: self.id,
                    settings: cmd.settings.clone(),
                    occurred_at: cmd.occurred_at,
                })
            }
        };

        Ok(vec![event])
    }
}

impl InventoryRecord {
    fn handle_create(&self, cmd: &CreateRecord) -> StockResult<Vec<InventoryEvent>> {
        if self.created {
            return Err(StockError::DuplicateRecord(self.product_id));
        }
        if cmd.inventory_id != self.id || cmd.product_id != self.product_id {
            return Err(StockError::Validation("record identity mismatch".into()));
        }
        cmd.settings.validate()?;

        Ok(vec![InventoryEvent::RecordCreated(RecordCreated {
            inventory_id: cmd.inventory_id,
            product_id: cmd.product_id,
            settings: cmd.settings.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, req: &MovementRequest) -> StockResult<InventoryEvent> {
        let amount = positive(req.quantity)?;
        let available = self.available_quantity();
        if req.quantity > available {
            return Err(StockError::InsufficientStock {
                requested: req.quantity,
                available,
            });
        }

        Ok(self.movement(MovementType::Reserved, amount, 0, amount, req.reference.clone(), req.note.clone(), req.actor, req.occurred_at))
    }

    fn handle_release(&self, req: &MovementRequest) -> StockResult<InventoryEvent> {
        positive(req.quantity)?;
        let released = signed(req.quantity.min(self.reserved_quantity))?;
        let note = req.note.clone().or_else(|| {
            (released.unsigned_abs() < req.quantity).then(|| {
                format!("requested release of {} capped at reserved amount", req.quantity)
            })
        });

        Ok(self.movement(MovementType::Released, released, 0, -released, req.reference.clone(), note, req.actor, req.occurred_at))
    }

    fn handle_consume(&self, req: &MovementRequest) -> StockResult<InventoryEvent> {
        let amount = positive(req.quantity)?;
        if req.quantity > self.quantity {
            return Err(StockError::InvalidConsumption {
                requested: req.quantity,
                on_hand: self.quantity,
            });
        }
        let from_reservation = signed(req.quantity.min(self.reserved_quantity))?;

        Ok(self.movement(MovementType::Out, -amount, -amount, -from_reservation, req.reference.clone(), req.note.clone(), req.actor, req.occurred_at))
    }

    fn handle_receive(&self, movement_type: MovementType, req: &MovementRequest) -> StockResult<InventoryEvent> {
        let amount = positive(req.quantity)?;
        if self.quantity.checked_add(req.quantity).and_then(|q| i64::try_from(q).ok()).is_none() {
            return Err(StockError::invalid_quantity("on-hand quantity would overflow"));
        }

        Ok(self.movement(movement_type, amount, amount, 0, req.reference.clone(), req.note.clone(), req.actor, req.occurred_at))
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> StockResult<InventoryEvent> {
        if cmd.new_quantity < self.reserved_quantity {
            return Err(StockError::ReservationViolation {
                requested: cmd.new_quantity,
                reserved: self.reserved_quantity,
            });
        }
        let delta = signed(cmd.new_quantity)? - signed(self.quantity)?;
        let note = match &cmd.note {
            Some(extra) => format!("stock adjusted from {} to {}. {extra}", self.quantity, cmd.new_quantity),
            None => format!("stock adjusted from {} to {}", self.quantity, cmd.new_quantity),
        };

        Ok(self.movement(MovementType::Adjustment, delta, delta, 0, cmd.reason.clone(), Some(note), cmd.actor, cmd.occurred_at))
    }

    #[allow(clippy::too_many_arguments)]
    fn movement(
        &self,
        movement_type: MovementType,
        quantity: i64,
        on_hand_delta: i64,
        reserved_delta: i64,
        reference: String,
        note: Option<String>,
        created_by: Option<UserId>,
        created_at: DateTime<Utc>,
    ) -> InventoryEvent {
        let previous_quantity = self.available_quantity();
        let new_on_hand = self.quantity.saturating_add_signed(on_hand_delta);
        let new_reserved = self.reserved_quantity.saturating_add_signed(reserved_delta);

        InventoryEvent::StockMoved(StockMovement {
            inventory_id: self.id,
            movement_type,
            quantity,
            on_hand_delta,
            reserved_delta,
            previous_quantity,
            new_quantity: new_on_hand.saturating_sub(new_reserved),
            reference,
            note,
            created_by,
            created_at,
        })
    }
}

fn positive(quantity: u64) -> StockResult<i64> {
    if quantity == 0 {
        return Err(StockError::invalid_quantity("quantity must be positive"));
    }
    signed(quantity)
}

fn signed(quantity: u64) -> StockResult<i64> {
    i64::try_from(quantity).map_err(|_| StockError::invalid_quantity(format!("{quantity} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{Balance, replay};
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn run(record: &mut InventoryRecord, command: InventoryCommand) -> StockResult<Vec<InventoryEvent>> {
        stockroom_events::execute(record, &command)
    }

    fn request(quantity: u64, reference: &str) -> MovementRequest {
        MovementRequest {
            quantity,
            reference: reference.to_string(),
            note: None,
            actor: None,
            occurred_at: test_time(),
        }
    }

    fn adjust(new_quantity: u64) -> InventoryCommand {
        InventoryCommand::Adjust(AdjustStock {
            new_quantity,
            reason: "cycle count".to_string(),
            note: None,
            actor: None,
            occurred_at: test_time(),
        })
    }

    fn created_record(threshold: u64) -> InventoryRecord {
        let id = InventoryId::new();
        let product_id = ProductId::new();
        let mut record = InventoryRecord::empty(id, product_id);
        run(
            &mut record,
            InventoryCommand::Create(CreateRecord {
                inventory_id: id,
                product_id,
                settings: RecordSettings {
                    low_stock_threshold: threshold,
                    ..RecordSettings::default()
                },
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        record
    }

    fn stocked_record(quantity: u64, threshold: u64) -> InventoryRecord {
        let mut record = created_record(threshold);
        if quantity > 0 {
            run(&mut record, InventoryCommand::AddStock(request(quantity, "initial"))).unwrap();
        }
        record
    }

    fn only_movement(events: &[InventoryEvent]) -> &StockMovement {
        assert_eq!(events.len(), 1);
        events[0].movement().expect("expected a stock movement")
    }

    #[test]
    fn reserve_then_consume_scenario() {
        let mut record = stocked_record(10, 5);

        let events = run(&mut record, InventoryCommand::Reserve(request(3, "ORD1"))).unwrap();
        let reserved = only_movement(&events).clone();
        assert_eq!(record.quantity(), 10);
        assert_eq!(record.reserved_quantity(), 3);
        assert_eq!(record.available_quantity(), 7);
        assert_eq!(reserved.movement_type, MovementType::Reserved);
        assert_eq!(reserved.quantity, 3);
        assert_eq!((reserved.previous_quantity, reserved.new_quantity), (10, 7));

        let events = run(&mut record, InventoryCommand::Consume(request(3, "ORD1"))).unwrap();
        let out = only_movement(&events);
        assert_eq!(record.quantity(), 7);
        assert_eq!(record.reserved_quantity(), 0);
        assert_eq!(record.available_quantity(), 7);
        assert_eq!(out.movement_type, MovementType::Out);
        assert_eq!(out.quantity, -3);
        assert_eq!((out.previous_quantity, out.new_quantity), (7, 7));
    }

    #[test]
    fn reserve_beyond_available_is_rejected_without_change() {
        let mut record = stocked_record(2, 5);
        run(&mut record, InventoryCommand::Reserve(request(2, "ORD0"))).unwrap();
        let before = record.clone();

        let err = run(&mut record, InventoryCommand::Reserve(request(1, "ORD2"))).unwrap_err();
        assert_eq!(err, StockError::InsufficientStock { requested: 1, available: 0 });
        assert_eq!(record, before);
    }

    #[test]
    fn over_consumption_fails_loudly() {
        let mut record = stocked_record(4, 1);
        let err = run(&mut record, InventoryCommand::Consume(request(5, "ORD9"))).unwrap_err();
        assert_eq!(err, StockError::InvalidConsumption { requested: 5, on_hand: 4 });
        assert_eq!(record.quantity(), 4);
    }

    #[test]
    fn consume_without_reservation_only_draws_on_hand() {
        let mut record = stocked_record(6, 1);
        run(&mut record, InventoryCommand::Reserve(request(2, "ORD1"))).unwrap();

        let events = run(&mut record, InventoryCommand::Consume(request(5, "ORD2"))).unwrap();
        let out = only_movement(&events);
        assert_eq!(out.reserved_delta, -2);
        assert_eq!(record.quantity(), 1);
        assert_eq!(record.reserved_quantity(), 0);
    }

    #[test]
    fn release_is_capped_at_reserved_amount() {
        let mut record = stocked_record(10, 5);
        run(&mut record, InventoryCommand::Reserve(request(2, "ORD1"))).unwrap();

        let events = run(&mut record, InventoryCommand::Release(request(5, "ORD1"))).unwrap();
        let released = only_movement(&events);
        assert_eq!(released.quantity, 2);
        assert!(released.note.as_deref().unwrap_or_default().contains("capped"));
        assert_eq!(record.reserved_quantity(), 0);

        // Releasing again is harmless.
        let events = run(&mut record, InventoryCommand::Release(request(1, "ORD1"))).unwrap();
        assert_eq!(only_movement(&events).quantity, 0);
        assert_eq!(record.reserved_quantity(), 0);
    }

    #[test]
    fn adjust_below_reserved_is_a_reservation_violation() {
        let mut record = stocked_record(10, 5);
        run(&mut record, InventoryCommand::Reserve(request(4, "ORD1"))).unwrap();

        let err = run(&mut record, adjust(3)).unwrap_err();
        assert_eq!(err, StockError::ReservationViolation { requested: 3, reserved: 4 });

        let events = run(&mut record, adjust(6)).unwrap();
        let adj = only_movement(&events);
        assert_eq!(adj.quantity, -4);
        assert_eq!(adj.reference, "cycle count");
        assert_eq!(record.quantity(), 6);
        assert_eq!(record.available_quantity(), 2);
    }

    #[test]
    fn add_stock_stamps_last_restocked_but_returns_do_not() {
        let mut record = created_record(5);
        assert!(record.last_restocked().is_none());

        run(&mut record, InventoryCommand::ReturnStock(request(2, "RMA-1"))).unwrap();
        assert!(record.last_restocked().is_none());
        assert_eq!(record.quantity(), 2);

        run(&mut record, InventoryCommand::AddStock(request(8, "PO-7"))).unwrap();
        assert!(record.last_restocked().is_some());
        assert_eq!(record.quantity(), 10);
    }

    #[test]
    fn zero_quantities_are_invalid() {
        let mut record = stocked_record(3, 1);
        for command in [
            InventoryCommand::Reserve(request(0, "x")),
            InventoryCommand::Release(request(0, "x")),
            InventoryCommand::Consume(request(0, "x")),
            InventoryCommand::AddStock(request(0, "x")),
            InventoryCommand::ReturnStock(request(0, "x")),
        ] {
            let err = run(&mut record, command).unwrap_err();
            assert_eq!(err.kind(), "invalid_quantity");
        }
    }

    #[test]
    fn operations_on_an_uncreated_record_are_not_found() {
        let mut record = InventoryRecord::empty(InventoryId::new(), ProductId::new());
        let err = run(&mut record, InventoryCommand::AddStock(request(1, "x"))).unwrap_err();
        assert_eq!(err.kind(), "record_not_found");
    }

    #[test]
    fn a_record_can_only_be_created_once() {
        let mut record = created_record(5);
        let (inventory_id, product_id) = (record.id_typed(), record.product_id());
        let err = run(
            &mut record,
            InventoryCommand::Create(CreateRecord {
                inventory_id,
                product_id,
                settings: RecordSettings::default(),
                occurred_at: test_time(),
            }),
        )
        .unwrap_err();
        assert_eq!(err, StockError::DuplicateRecord(product_id));
    }

    #[test]
    fn derived_stock_flags() {
        let record = stocked_record(0, 5);
        assert!(record.is_stock_out() && record.needs_restock() && !record.is_low_stock());

        let record = stocked_record(5, 5);
        assert!(record.is_low_stock() && record.needs_restock() && !record.is_stock_out());

        let record = stocked_record(6, 5);
        assert!(!record.needs_restock());
    }

    #[test]
    fn settings_are_validated() {
        let mut record = created_record(5);
        let bad = InventoryCommand::UpdateSettings(UpdateSettings {
            settings: RecordSettings {
                reorder_quantity: 0,
                ..RecordSettings::default()
            },
            occurred_at: test_time(),
        });
        assert_eq!(run(&mut record, bad).unwrap_err().kind(), "validation");

        let good = InventoryCommand::UpdateSettings(UpdateSettings {
            settings: RecordSettings {
                low_stock_threshold: 2,
                max_stock_level: Some(50),
                location: Some("A-01".into()),
                ..RecordSettings::default()
            },
            occurred_at: test_time(),
        });
        let events = run(&mut record, good).unwrap();
        assert!(events[0].movement().is_none());
        assert_eq!(record.location(), Some("A-01"));
        assert_eq!(record.low_stock_threshold(), 2);
    }

    #[test]
    fn snapshot_restores_an_identical_record() {
        let mut record = stocked_record(9, 3);
        run(&mut record, InventoryCommand::Reserve(request(4, "ORD1"))).unwrap();

        let restored = InventoryRecord::from_snapshot(record.snapshot());
        assert_eq!(restored, record);
    }

    #[test]
    fn movement_events_have_stable_type_names() {
        let mut record = stocked_record(5, 1);
        let events = run(&mut record, InventoryCommand::Reserve(request(1, "ORD1"))).unwrap();
        assert_eq!(events[0].event_type(), "inventory.stock.reserved");

        let json = serde_json::to_value(&events[0]).unwrap();
        let back: InventoryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, events[0]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Reserve(u64),
        Release(u64),
        Consume(u64),
        Add(u64),
        Return(u64),
        Adjust(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1u64..20).prop_map(Op::Reserve),
            (1u64..20).prop_map(Op::Release),
            (1u64..20).prop_map(Op::Consume),
            (1u64..30).prop_map(Op::Add),
            (1u64..10).prop_map(Op::Return),
            (0u64..40).prop_map(Op::Adjust),
        ]
    }

    fn command_for(op: &Op) -> InventoryCommand {
        match *op {
            Op::Reserve(q) => InventoryCommand::Reserve(request(q, "ORD")),
            Op::Release(q) => InventoryCommand::Release(request(q, "ORD")),
            Op::Consume(q) => InventoryCommand::Consume(request(q, "ORD")),
            Op::Add(q) => InventoryCommand::AddStock(request(q, "PO")),
            Op::Return(q) => InventoryCommand::ReturnStock(request(q, "RMA")),
            Op::Adjust(q) => adjust(q),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever mix of operations succeeds or fails, the balances
        /// stay in range and replaying the emitted movements reproduces them.
        #[test]
        fn ledger_reconciles_after_any_operation_sequence(
            ops in prop::collection::vec(op_strategy(), 1..60)
        ) {
            let mut record = created_record(5);
            let mut ledger: Vec<StockMovement> = Vec::new();

            for op in &ops {
                let before = record.clone();
                match run(&mut record, command_for(op)) {
                    Ok(events) => {
                        for ev in &events {
                            if let Some(m) = ev.movement() {
                                prop_assert!(m.check_consistency().is_ok());
                                ledger.push(m.clone());
                            }
                        }
                    }
                    Err(_) => prop_assert_eq!(&record, &before),
                }

                prop_assert!(record.reserved_quantity() <= record.quantity());

                let balance = replay(&ledger).unwrap();
                prop_assert_eq!(
                    balance,
                    Balance { quantity: record.quantity(), reserved_quantity: record.reserved_quantity() }
                );
            }
        }

        /// Property: reserve(n) then release(n) restores reserved and available.
        #[test]
        fn reserve_release_symmetry(stock in 1u64..500, n in 1u64..500) {
            let mut record = stocked_record(stock, 5);
            let reserved_before = record.reserved_quantity();
            let available_before = record.available_quantity();

            if run(&mut record, InventoryCommand::Reserve(request(n, "ORD"))).is_ok() {
                run(&mut record, InventoryCommand::Release(request(n, "ORD"))).unwrap();
            }

            prop_assert_eq!(record.reserved_quantity(), reserved_before);
            prop_assert_eq!(record.available_quantity(), available_before);
        }
    }
}
