//! Transactional stock service: the single entry point for balance changes.
//!
//! Every mutation runs the same pipeline:
//!
//! ```text
//! guard check
//!   ↓
//! 1. load record (with its version)
//!   ↓
//! 2. decide + apply (pure domain logic, produces movement events)
//!   ↓
//! 3. ledger.append(record, Exact(version), movements)   ← atomic CAS + append
//!   ↓ conflict? sleep(backoff × attempt), back to 1 (capped)
//! 4. evaluate alerts on the committed state
//!   ↓
//! 5. publish envelopes to the bus (best-effort)
//! ```
//!
//! ## Consistency strategy
//!
//! Optimistic concurrency: no lock is held while deciding. The ledger only
//! accepts the write if the record is still at the version that was read, so
//! two interleaved operations on one record can never both commit against the
//! same state. The loser re-reads and re-decides, which means a reservation
//! that raced for the last unit fails with `InsufficientStock` rather than
//! overbooking. Retries are capped by `retry.max_attempts`; exhausting them
//! yields [`StockError::ConcurrencyConflict`], which callers may retry.
//!
//! Operations on different records touch different rows and never conflict.
//!
//! ## After commit
//!
//! Alert evaluation and publication happen after the write is durable. Their
//! failures are logged and never undo or fail the committed mutation; alerts
//! can be recomputed with [`StockService::reevaluate_alerts`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use stockroom_core::{AggregateRoot, AlertId, ExpectedVersion, InventoryId, ProductId};
use stockroom_events::{Event, EventBus, EventEnvelope, execute};
use stockroom_inventory::{
    AdjustStock, AlertEvent, Balance, CreateRecord, InventoryCommand, InventoryEvent, InventoryRecord,
    MovementRequest, RecordSettings, RecordedMovement, StockAlert, StockError, StockMovement, StockResult,
    UpdateSettings, reconcile,
};

use crate::alerts::{AlertStore, StockAlertEngine};
use crate::authz::{Actor, AllowAll, OperationGuard, StockOperation};
use crate::config::{RecordDefaults, RetryConfig, StockConfig};
use crate::ledger::{LedgerError, StockLedger};

/// Stream type stamped on inventory record envelopes.
pub const RECORD_STREAM: &str = "inventory.record";
/// Stream type stamped on alert envelopes.
pub const ALERT_STREAM: &str = "inventory.alert";

/// Audit context supplied by the caller of a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockContext {
    /// Correlation string, typically an order or purchase-order id. For
    /// `adjust` it is the reason for the correction.
    pub reference: String,
    pub note: Option<String>,
    pub actor: Option<Actor>,
}

impl StockContext {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            ..Self::default()
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn by(mut self, actor: Actor) -> Self {
        self.actor = Some(actor);
        self
    }

    fn request(&self, quantity: u64, occurred_at: DateTime<Utc>) -> MovementRequest {
        MovementRequest {
            quantity,
            reference: self.reference.clone(),
            note: self.note.clone(),
            actor: self.actor.as_ref().map(|a| a.user_id),
            occurred_at,
        }
    }
}

/// Result of a committed mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockOutcome {
    /// Record state as committed.
    pub record: InventoryRecord,
    /// The ledger entry written, if the operation moves stock.
    pub movement: Option<RecordedMovement>,
    /// Alerts newly raised by this mutation.
    pub raised_alerts: Vec<StockAlert>,
}

pub struct StockService<L, A, B> {
    ledger: L,
    alerts: StockAlertEngine<A>,
    bus: B,
    guard: Arc<dyn OperationGuard>,
    retry: RetryConfig,
    defaults: RecordDefaults,
}

impl<L, A, B> StockService<L, A, B> {
    pub fn new(ledger: L, alert_store: A, bus: B, config: &StockConfig) -> Self {
        Self {
            ledger,
            alerts: StockAlertEngine::new(alert_store),
            bus,
            guard: Arc::new(AllowAll),
            retry: config.retry,
            defaults: config.defaults,
        }
    }

    pub fn with_guard(mut self, guard: impl OperationGuard + 'static) -> Self {
        self.guard = Arc::new(guard);
        self
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn alerts(&self) -> &StockAlertEngine<A> {
        &self.alerts
    }
}

impl<L, A, B> StockService<L, A, B>
where
    L: StockLedger,
    A: AlertStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Create the inventory record of a product. Without explicit settings the
    /// configured default thresholds apply.
    ///
    /// Alerts are not evaluated here: a fresh record starts at zero stock but
    /// raises `out_of_stock` only on its first mutation or an explicit
    /// [`reevaluate_alerts`](Self::reevaluate_alerts).
    #[instrument(skip(self, settings, ctx), fields(product_id = %product_id))]
    pub async fn create_record(
        &self,
        product_id: ProductId,
        settings: Option<RecordSettings>,
        ctx: &StockContext,
    ) -> StockResult<InventoryRecord> {
        self.guard.check(ctx.actor.as_ref(), StockOperation::CreateRecord)?;

        let id = InventoryId::new();
        let mut record = InventoryRecord::empty(id, product_id);
        let command = InventoryCommand::Create(CreateRecord {
            inventory_id: id,
            product_id,
            settings: settings.unwrap_or_else(|| self.defaults.settings()),
            occurred_at: Utc::now(),
        });
        let events = execute(&mut record, &command)?;

        self.ledger.create(&record).await?;
        info!(inventory_id = %id, "inventory record created");

        self.publish_record_events(&record, &events);
        Ok(record)
    }

    pub async fn record(&self, id: InventoryId) -> StockResult<InventoryRecord> {
        self.ledger
            .load(id)
            .await?
            .ok_or_else(|| StockError::record_not_found(id))
    }

    pub async fn record_for_product(&self, product_id: ProductId) -> StockResult<InventoryRecord> {
        self.ledger
            .find_by_product(product_id)
            .await?
            .ok_or_else(|| StockError::record_not_found(format!("product {product_id}")))
    }

    /// Earmark `quantity` available units. Fails with `InsufficientStock`
    /// (and changes nothing) if fewer are available.
    #[instrument(skip(self, ctx), fields(inventory_id = %id, reference = %ctx.reference))]
    pub async fn reserve(&self, id: InventoryId, quantity: u64, ctx: &StockContext) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::Reserve, ctx, |now| {
            InventoryCommand::Reserve(ctx.request(quantity, now))
        })
        .await
    }

    /// Boolean form of [`reserve`](Self::reserve): `false` means insufficient stock.
    pub async fn try_reserve(&self, id: InventoryId, quantity: u64, ctx: &StockContext) -> StockResult<bool> {
        match self.reserve(id, quantity, ctx).await {
            Ok(_) => Ok(true),
            Err(StockError::InsufficientStock { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Give back up to `quantity` reserved units; over-release is capped.
    #[instrument(skip(self, ctx), fields(inventory_id = %id, reference = %ctx.reference))]
    pub async fn release(&self, id: InventoryId, quantity: u64, ctx: &StockContext) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::Release, ctx, |now| {
            InventoryCommand::Release(ctx.request(quantity, now))
        })
        .await
    }

    /// Ship `quantity` units, drawing down the reservation first.
    #[instrument(skip(self, ctx), fields(inventory_id = %id, reference = %ctx.reference))]
    pub async fn consume(&self, id: InventoryId, quantity: u64, ctx: &StockContext) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::Consume, ctx, |now| {
            InventoryCommand::Consume(ctx.request(quantity, now))
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(inventory_id = %id, reference = %ctx.reference))]
    pub async fn add_stock(&self, id: InventoryId, quantity: u64, ctx: &StockContext) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::AddStock, ctx, |now| {
            InventoryCommand::AddStock(ctx.request(quantity, now))
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(inventory_id = %id, reference = %ctx.reference))]
    pub async fn return_stock(&self, id: InventoryId, quantity: u64, ctx: &StockContext) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::ReturnStock, ctx, |now| {
            InventoryCommand::ReturnStock(ctx.request(quantity, now))
        })
        .await
    }

    /// Set on-hand stock to `new_quantity` after a count. `ctx.reference` is
    /// recorded as the reason.
    #[instrument(skip(self, ctx), fields(inventory_id = %id, reason = %ctx.reference))]
    pub async fn adjust(&self, id: InventoryId, new_quantity: u64, ctx: &StockContext) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::Adjust, ctx, |now| {
            InventoryCommand::Adjust(AdjustStock {
                new_quantity,
                reason: ctx.reference.clone(),
                note: ctx.note.clone(),
                actor: ctx.actor.as_ref().map(|a| a.user_id),
                occurred_at: now,
            })
        })
        .await
    }

    /// Receive the record's configured `reorder_quantity`.
    pub async fn restock_to_reorder_quantity(&self, id: InventoryId, ctx: &StockContext) -> StockResult<StockOutcome> {
        let record = self.record(id).await?;
        self.add_stock(id, record.reorder_quantity(), ctx).await
    }

    /// Receive `quantity` units on each record independently; one failure
    /// does not affect the others.
    pub async fn add_stock_bulk(
        &self,
        ids: &[InventoryId],
        quantity: u64,
        ctx: &StockContext,
    ) -> Vec<(InventoryId, StockResult<StockOutcome>)> {
        let mut results = Vec::with_capacity(ids.len());
        for &id in ids {
            results.push((id, self.add_stock(id, quantity, ctx).await));
        }
        results
    }

    #[instrument(skip(self, settings, ctx), fields(inventory_id = %id))]
    pub async fn update_settings(
        &self,
        id: InventoryId,
        settings: RecordSettings,
        ctx: &StockContext,
    ) -> StockResult<StockOutcome> {
        self.mutate(id, StockOperation::UpdateSettings, ctx, |now| {
            InventoryCommand::UpdateSettings(UpdateSettings {
                settings: settings.clone(),
                occurred_at: now,
            })
        })
        .await
    }

    /// Ledger entries of one record, oldest first.
    pub async fn history(&self, id: InventoryId, since: Option<DateTime<Utc>>) -> StockResult<Vec<RecordedMovement>> {
        if self.ledger.load(id).await?.is_none() {
            return Err(StockError::record_not_found(id));
        }
        Ok(self.ledger.history(id, since).await?)
    }

    /// Replay the record's full history and check it reproduces the balances.
    #[instrument(skip(self), fields(inventory_id = %id))]
    pub async fn verify_ledger(&self, id: InventoryId) -> StockResult<Balance> {
        let record = self.record(id).await?;
        let history = self.ledger.history(id, None).await?;
        reconcile(&record, &history).inspect_err(|err| error!(error = %err, "ledger does not reconcile"))
    }

    /// Run alert evaluation against the current committed state.
    pub async fn reevaluate_alerts(&self, id: InventoryId) -> StockResult<Vec<StockAlert>> {
        let record = self.record(id).await?;
        let raised = self.alerts.evaluate(&record).await?;
        self.publish_alerts(raised.iter().cloned().map(AlertEvent::AlertRaised));
        Ok(raised)
    }

    #[instrument(skip(self, ctx), fields(alert_id = %id))]
    pub async fn resolve_alert(&self, id: AlertId, ctx: &StockContext) -> StockResult<StockAlert> {
        self.guard.check(ctx.actor.as_ref(), StockOperation::ResolveAlert)?;
        let alert = self.alerts.resolve(id, ctx.actor.as_ref().map(|a| a.user_id)).await?;
        self.publish_alerts([AlertEvent::AlertResolved(alert.clone())]);
        Ok(alert)
    }

    #[instrument(skip(self, ctx), fields(alert_id = %id))]
    pub async fn dismiss_alert(&self, id: AlertId, ctx: &StockContext) -> StockResult<StockAlert> {
        self.guard.check(ctx.actor.as_ref(), StockOperation::DismissAlert)?;
        let alert = self.alerts.dismiss(id).await?;
        self.publish_alerts([AlertEvent::AlertDismissed {
            alert: alert.clone(),
            occurred_at: Utc::now(),
        }]);
        Ok(alert)
    }

    async fn mutate(
        &self,
        id: InventoryId,
        operation: StockOperation,
        ctx: &StockContext,
        command: impl Fn(DateTime<Utc>) -> InventoryCommand,
    ) -> StockResult<StockOutcome> {
        self.guard.check(ctx.actor.as_ref(), operation)?;

        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            let mut record = self.record(id).await?;
            let expected = record.version();

            let events = match execute(&mut record, &command(Utc::now())) {
                Ok(events) => events,
                Err(err) => {
                    log_rejection(id, operation, &err);
                    return Err(err);
                }
            };
            let movements: Vec<StockMovement> = events.iter().filter_map(|e| e.movement().cloned()).collect();

            match self
                .ledger
                .append(&record, ExpectedVersion::Exact(expected), movements)
                .await
            {
                Ok(recorded) => return Ok(self.after_commit(record, &events, recorded).await),
                Err(LedgerError::Concurrency(reason)) => {
                    warn!(inventory_id = %id, %operation, attempt, max_attempts, %reason, "version conflict");
                    if attempt < max_attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(StockError::ConcurrencyConflict(format!(
            "{operation} on {id} gave up after {max_attempts} attempts"
        )))
    }

    async fn after_commit(
        &self,
        record: InventoryRecord,
        events: &[InventoryEvent],
        recorded: Vec<RecordedMovement>,
    ) -> StockOutcome {
        for entry in &recorded {
            let m = &entry.movement;
            info!(
                inventory_id = %entry.inventory_id,
                movement_id = %entry.id,
                sequence = entry.sequence,
                movement_type = %m.movement_type,
                quantity = m.quantity,
                previous_available = m.previous_quantity,
                new_available = m.new_quantity,
                reference = %m.reference,
                "stock movement committed"
            );
        }
        self.publish_record_events(&record, events);

        let raised_alerts = match self.alerts.evaluate(&record).await {
            Ok(raised) => raised,
            Err(err) => {
                error!(
                    inventory_id = %record.id_typed(),
                    error = %err,
                    "alert evaluation failed after commit"
                );
                Vec::new()
            }
        };
        self.publish_alerts(raised_alerts.iter().cloned().map(AlertEvent::AlertRaised));

        StockOutcome {
            record,
            movement: recorded.into_iter().next_back(),
            raised_alerts,
        }
    }

    fn publish_record_events(&self, record: &InventoryRecord, events: &[InventoryEvent]) {
        let first_sequence = record.version() + 1 - events.len() as u64;
        for (offset, event) in events.iter().enumerate() {
            self.publish(
                *record.id_typed().as_uuid(),
                RECORD_STREAM,
                first_sequence + offset as u64,
                event,
            );
        }
    }

    fn publish_alerts(&self, events: impl IntoIterator<Item = AlertEvent>) {
        for event in events {
            let alert = event.alert();
            self.publish(*alert.inventory_id.as_uuid(), ALERT_STREAM, alert.id.get(), &event);
        }
    }

    fn publish<E>(&self, stream_id: Uuid, stream_type: &str, sequence: u64, event: &E)
    where
        E: Event + Serialize,
    {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(event_type = event.event_type(), error = %err, "event not serializable; skipped publication");
                return;
            }
        };

        let envelope = EventEnvelope::new(
            Uuid::now_v7(),
            stream_id,
            stream_type,
            sequence,
            event.event_type(),
            event.occurred_at(),
            payload,
        );
        if let Err(err) = self.bus.publish(envelope) {
            warn!(event_type = event.event_type(), error = ?err, "event publication failed");
        }
    }
}

fn log_rejection(id: InventoryId, operation: StockOperation, err: &StockError) {
    match err {
        StockError::InvalidConsumption { requested, on_hand } => error!(
            inventory_id = %id,
            requested,
            on_hand,
            "consumption exceeds on-hand stock; upstream reservation workflow is inconsistent"
        ),
        _ => debug!(inventory_id = %id, %operation, kind = err.kind(), error = %err, "operation rejected"),
    }
}
