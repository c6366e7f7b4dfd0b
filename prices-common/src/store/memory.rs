use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{ItemStore, ItemTransaction, StoreError, StoreResult};
use crate::item::{FilterParams, IdPolicy, Item};

const UNIQUE_ID_VIOLATION: &str = "duplicate key value violates unique constraint on id";

#[derive(Default)]
struct Rows {
    items: Vec<Item>,
    ids: HashSet<i64>,
    next_id: i64,
}

fn id_conflict(id: i64) -> StoreError {
    StoreError::Constraint {
        id,
        reason: UNIQUE_ID_VIOLATION.to_owned(),
    }
}

/// An ItemStore keeping every row in process memory.
/// Writes are staged per transaction and only become visible on commit, so a failed or dropped
/// transaction leaves no trace. The id column stays unique like a primary key would.
#[derive(Clone, Default)]
pub struct MemoryItemStore {
    rows: Arc<Mutex<Rows>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store already holding `items`, as if committed by an earlier request.
    pub fn with_items(items: Vec<Item>) -> Self {
        let ids = items.iter().map(|item| item.id).collect();
        let next_id = items.iter().map(|item| item.id).max().unwrap_or_default();
        Self {
            rows: Arc::new(Mutex::new(Rows {
                items,
                ids,
                next_id,
            })),
        }
    }

    /// Snapshot of the committed rows.
    pub fn items(&self) -> Vec<Item> {
        self.lock()
            .map(|rows| rows.items.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|rows| rows.items.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Rows>> {
        self.rows
            .lock()
            .map_err(|_| StoreError::Unavailable("poisoned MemoryItemStore mutex".to_owned()))
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    async fn begin(&self) -> StoreResult<Box<dyn ItemTransaction>> {
        Ok(Box::new(MemoryItemTransaction {
            store: self.clone(),
            staged: Vec::new(),
            staged_ids: HashSet::new(),
        }))
    }

    async fn sum_price(&self) -> StoreResult<Decimal> {
        // Decimal addition panics once the sum no longer fits in 96 bits.
        self.lock()?
            .items
            .iter()
            .try_fold(Decimal::ZERO, |sum, item| sum.checked_add(item.price))
            .ok_or_else(|| StoreError::Unavailable("sum of prices overflows".to_owned()))
    }

    async fn count_distinct_categories(&self) -> StoreResult<i64> {
        let rows = self.lock()?;
        let categories: HashSet<&str> = rows
            .items
            .iter()
            .map(|item| item.category.as_str())
            .collect();

        Ok(i64::try_from(categories.len()).unwrap_or(i64::MAX))
    }

    async fn fetch_filtered(&self, filter: &FilterParams) -> StoreResult<Vec<Item>> {
        let mut items: Vec<Item> = self
            .lock()?
            .items
            .iter()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by_key(|item| item.id);

        Ok(items)
    }
}

pub struct MemoryItemTransaction {
    store: MemoryItemStore,
    staged: Vec<Item>,
    staged_ids: HashSet<i64>,
}

#[async_trait]
impl ItemTransaction for MemoryItemTransaction {
    async fn load_all(&mut self) -> StoreResult<Vec<Item>> {
        let mut items = self.store.lock()?.items.clone();
        items.extend(self.staged.iter().cloned());

        Ok(items)
    }

    async fn insert(&mut self, item: &Item, ids: IdPolicy) -> StoreResult<()> {
        let mut rows = self.store.lock()?;
        let mut item = item.clone();

        match ids {
            IdPolicy::CallerSupplied => {
                if rows.ids.contains(&item.id) || self.staged_ids.contains(&item.id) {
                    return Err(id_conflict(item.id));
                }
            }
            IdPolicy::StoreAssigned => {
                rows.next_id = rows
                    .next_id
                    .checked_add(1)
                    .ok_or_else(|| StoreError::Unavailable("ran out of ids".to_owned()))?;
                item.id = rows.next_id;
            }
        }

        self.staged_ids.insert(item.id);
        self.staged.push(item);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryItemTransaction {
            store,
            staged,
            staged_ids,
        } = *self;
        let mut rows = store.lock()?;

        // Transactions run concurrently and only check committed rows on insert.
        if let Some(id) = staged_ids.iter().find(|id| rows.ids.contains(id)) {
            return Err(id_conflict(*id));
        }

        let next_id = staged_ids.iter().copied().max().unwrap_or_default();
        rows.next_id = rows.next_id.max(next_id);
        rows.ids.extend(staged_ids);
        rows.items.extend(staged);

        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}
