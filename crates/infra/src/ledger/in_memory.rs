use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stockroom_core::{AggregateRoot, ExpectedVersion, InventoryId, MovementId, ProductId};
use stockroom_inventory::{InventoryRecord, RecordedMovement, StockMovement};

use super::{LedgerError, StockLedger, since_filter, validate_append};

#[derive(Debug)]
struct Slot {
    record: InventoryRecord,
    movements: Vec<RecordedMovement>,
}

#[derive(Debug, Default)]
struct Index {
    slots: HashMap<InventoryId, Arc<Mutex<Slot>>>,
    by_product: HashMap<ProductId, InventoryId>,
}

/// In-memory stock ledger.
///
/// Intended for tests/dev. Each record has its own slot lock, so writes to
/// different records never wait on each other; the index lock is only held
/// for lookups and record creation.
#[derive(Debug, Default)]
pub struct InMemoryStockLedger {
    index: RwLock<Index>,
    next_movement_id: AtomicU64,
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Backend("lock poisoned".to_string())
}

impl InMemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: InventoryId) -> Result<Option<Arc<Mutex<Slot>>>, LedgerError> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.slots.get(&id).cloned())
    }

    fn all_slots(&self) -> Result<Vec<Arc<Mutex<Slot>>>, LedgerError> {
        let index = self.index.read().map_err(poisoned)?;
        Ok(index.slots.values().cloned().collect())
    }
}

#[async_trait]
impl StockLedger for InMemoryStockLedger {
    async fn create(&self, record: &InventoryRecord) -> Result<(), LedgerError> {
        if !record.is_created() {
            return Err(LedgerError::InvalidAppend(format!(
                "record {} was never created",
                record.id_typed()
            )));
        }

        let mut index = self.index.write().map_err(poisoned)?;
        if index.by_product.contains_key(&record.product_id()) {
            return Err(LedgerError::DuplicateRecord(record.product_id()));
        }
        if index.slots.contains_key(&record.id_typed()) {
            return Err(LedgerError::Concurrency(format!(
                "record {} already exists",
                record.id_typed()
            )));
        }

        index.by_product.insert(record.product_id(), record.id_typed());
        index.slots.insert(
            record.id_typed(),
            Arc::new(Mutex::new(Slot {
                record: record.clone(),
                movements: Vec::new(),
            })),
        );
        Ok(())
    }

    async fn load(&self, id: InventoryId) -> Result<Option<InventoryRecord>, LedgerError> {
        match self.slot(id)? {
            Some(slot) => Ok(Some(slot.lock().map_err(poisoned)?.record.clone())),
            None => Ok(None),
        }
    }

    async fn find_by_product(&self, product_id: ProductId) -> Result<Option<InventoryRecord>, LedgerError> {
        let id = {
            let index = self.index.read().map_err(poisoned)?;
            index.by_product.get(&product_id).copied()
        };
        match id {
            Some(id) => self.load(id).await,
            None => Ok(None),
        }
    }

    async fn append(
        &self,
        record: &InventoryRecord,
        expected: ExpectedVersion,
        movements: Vec<StockMovement>,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        let first_sequence = validate_append(record, &movements)?;
        let id = record.id_typed();
        let slot = self.slot(id)?.ok_or(LedgerError::NotFound(id))?;

        // Version check and write happen under the same slot lock.
        let mut slot = slot.lock().map_err(poisoned)?;
        let current = slot.record.version();
        expected
            .check(current)
            .map_err(|err| LedgerError::Concurrency(err.to_string()))?;
        if record.version() <= current {
            return Err(LedgerError::InvalidAppend(format!(
                "record version {} does not advance stored version {current}",
                record.version()
            )));
        }

        let recorded: Vec<RecordedMovement> = movements
            .into_iter()
            .enumerate()
            .map(|(offset, movement)| RecordedMovement {
                id: MovementId::new(self.next_movement_id.fetch_add(1, Ordering::Relaxed) + 1),
                inventory_id: id,
                sequence: first_sequence + offset as u64,
                movement,
            })
            .collect();

        slot.record = record.clone();
        slot.movements.extend(recorded.iter().cloned());
        Ok(recorded)
    }

    async fn history(
        &self,
        id: InventoryId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RecordedMovement>, LedgerError> {
        let Some(slot) = self.slot(id)? else {
            return Ok(Vec::new());
        };
        let slot = slot.lock().map_err(poisoned)?;
        Ok(slot.movements.iter().filter(|e| since_filter(since)(e)).cloned().collect())
    }

    async fn records(&self) -> Result<Vec<InventoryRecord>, LedgerError> {
        let mut records = Vec::new();
        for slot in self.all_slots()? {
            records.push(slot.lock().map_err(poisoned)?.record.clone());
        }
        records.sort_by_key(|r| r.id_typed());
        Ok(records)
    }

    async fn recent_movements(&self, limit: usize) -> Result<Vec<RecordedMovement>, LedgerError> {
        let mut movements = Vec::new();
        for slot in self.all_slots()? {
            let slot = slot.lock().map_err(poisoned)?;
            movements.extend(slot.movements.iter().rev().take(limit).cloned());
        }
        movements.sort_by(|a, b| b.id.cmp(&a.id));
        movements.truncate(limit);
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::Aggregate;
    use stockroom_inventory::{CreateRecord, InventoryCommand, MovementRequest, RecordSettings};

    fn created() -> InventoryRecord {
        let id = InventoryId::new();
        let product_id = ProductId::new();
        let mut record = InventoryRecord::empty(id, product_id);
        let command = InventoryCommand::Create(CreateRecord {
            inventory_id: id,
            product_id,
            settings: RecordSettings::default(),
            occurred_at: Utc::now(),
        });
        for event in record.handle(&command).unwrap() {
            record.apply(&event);
        }
        record
    }

    fn add(record: &mut InventoryRecord, quantity: u64) -> Vec<StockMovement> {
        let command = InventoryCommand::AddStock(MovementRequest {
            quantity,
            reference: "PO-1".into(),
            note: None,
            actor: None,
            occurred_at: Utc::now(),
        });
        let events = stockroom_events::execute(record, &command).unwrap();
        events.iter().filter_map(|e| e.movement().cloned()).collect()
    }

    #[tokio::test]
    async fn append_assigns_sequences_and_global_ids() {
        let ledger = InMemoryStockLedger::new();
        let mut a = created();
        let mut b = created();
        ledger.create(&a).await.unwrap();
        ledger.create(&b).await.unwrap();

        let movements = add(&mut a, 10);
        let first = ledger.append(&a, ExpectedVersion::Exact(1), movements).await.unwrap();
        let movements = add(&mut b, 4);
        let second = ledger.append(&b, ExpectedVersion::Exact(1), movements).await.unwrap();
        let movements = add(&mut a, 1);
        let third = ledger.append(&a, ExpectedVersion::Exact(2), movements).await.unwrap();

        assert_eq!(first[0].sequence, 2);
        assert_eq!(third[0].sequence, 3);
        assert_eq!(first[0].id, MovementId::new(1));
        assert_eq!(second[0].id, MovementId::new(2));
        assert_eq!(third[0].id, MovementId::new(3));

        let stored = ledger.load(a.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.quantity(), 11);
        assert_eq!(ledger.history(a.id_typed(), None).await.unwrap().len(), 2);

        let recent = ledger.recent_movements(2).await.unwrap();
        assert_eq!(recent.iter().map(|m| m.id.get()).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[tokio::test]
    async fn stale_version_is_rejected_without_side_effects() {
        let ledger = InMemoryStockLedger::new();
        let mut record = created();
        ledger.create(&record).await.unwrap();

        let mut stale = record.clone();
        let movements = add(&mut record, 5);
        ledger.append(&record, ExpectedVersion::Exact(1), movements).await.unwrap();

        let movements = add(&mut stale, 7);
        let err = ledger
            .append(&stale, ExpectedVersion::Exact(1), movements)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Concurrency("stale version: expected Exact(1), found 2".to_string())
        );

        let stored = ledger.load(record.id_typed()).await.unwrap().unwrap();
        assert_eq!(stored.quantity(), 5);
        assert_eq!(ledger.history(record.id_typed(), None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn one_record_per_product() {
        let ledger = InMemoryStockLedger::new();
        let record = created();
        ledger.create(&record).await.unwrap();

        let mut twin = InventoryRecord::empty(InventoryId::new(), record.product_id());
        let command = InventoryCommand::Create(CreateRecord {
            inventory_id: twin.id_typed(),
            product_id: record.product_id(),
            settings: RecordSettings::default(),
            occurred_at: Utc::now(),
        });
        stockroom_events::execute(&mut twin, &command).unwrap();

        let err = ledger.create(&twin).await.unwrap_err();
        assert_eq!(err, LedgerError::DuplicateRecord(record.product_id()));

        let found = ledger.find_by_product(record.product_id()).await.unwrap().unwrap();
        assert_eq!(found.id_typed(), record.id_typed());
    }

    #[tokio::test]
    async fn movements_for_another_record_are_refused() {
        let ledger = InMemoryStockLedger::new();
        let mut record = created();
        let other = created();
        ledger.create(&record).await.unwrap();

        let mut movements = add(&mut record, 3);
        movements[0].inventory_id = other.id_typed();

        let err = ledger
            .append(&record, ExpectedVersion::Exact(1), movements)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAppend(_)));
    }
}
