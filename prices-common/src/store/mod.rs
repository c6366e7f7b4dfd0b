//! Persistence boundary for price items.
//!
//! The pipeline only talks to the store through [`ItemStore`] and [`ItemTransaction`], so the
//! process can run against Postgres or the in-memory store without the pipeline knowing.
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::item::{FilterParams, IdPolicy, Item};

pub mod memory;
pub mod postgres;

pub use memory::MemoryItemStore;
pub use postgres::PgItemStore;

/// Enumeration of errors for operations with an ItemStore.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    Connection { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    Query { command: String, error: sqlx::Error },
    #[error("item {id} violates a store constraint: {reason}")]
    Constraint { id: i64, reason: String },
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Check the store is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Open a transaction. Dropping it without calling `commit` discards its writes.
    async fn begin(&self) -> StoreResult<Box<dyn ItemTransaction>>;

    /// Sum of all stored prices, zero for an empty store.
    async fn sum_price(&self) -> StoreResult<Decimal>;

    async fn count_distinct_categories(&self) -> StoreResult<i64>;

    /// Items inside both inclusive ranges of `filter`, ordered by id.
    async fn fetch_filtered(&self, filter: &FilterParams) -> StoreResult<Vec<Item>>;
}

#[async_trait]
pub trait ItemTransaction: Send {
    /// Every stored item, as seen by this transaction.
    async fn load_all(&mut self) -> StoreResult<Vec<Item>>;

    async fn insert(&mut self, item: &Item, ids: IdPolicy) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;

    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}
