use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::{Connection, Transaction};

use super::{ItemStore, ItemTransaction, StoreError, StoreResult};
use crate::item::{FilterParams, IdPolicy, Item};

/// An ItemStore backed by the `prices` table in PostgreSQL.
#[derive(Clone)]
pub struct PgItemStore {
    pool: PgPool,
}

impl PgItemStore {
    /// Initialize a new PgItemStore with its own connection pool.
    pub async fn new(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| StoreError::Connection { error })?;

        Ok(Self { pool })
    }

    /// Initialize a PgItemStore from an existing pool.
    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> StoreError + '_ {
    move |error| StoreError::Query {
        command: command.to_owned(),
        error,
    }
}

#[async_trait]
impl ItemStore for PgItemStore {
    async fn ping(&self) -> StoreResult<()> {
        let mut connection = self
            .pool
            .acquire()
            .await
            .map_err(|error| StoreError::Connection { error })?;

        connection
            .ping()
            .await
            .map_err(|error| StoreError::Connection { error })
    }

    async fn begin(&self) -> StoreResult<Box<dyn ItemTransaction>> {
        let txn = self
            .pool
            .begin()
            .await
            .map_err(|error| StoreError::Connection { error })?;

        Ok(Box::new(PgItemTransaction { txn }))
    }

    async fn sum_price(&self) -> StoreResult<Decimal> {
        sqlx::query_scalar("SELECT COALESCE(SUM(price), 0) FROM prices")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("SELECT SUM"))
    }

    async fn count_distinct_categories(&self) -> StoreResult<i64> {
        sqlx::query_scalar("SELECT COUNT(DISTINCT category) FROM prices")
            .fetch_one(&self.pool)
            .await
            .map_err(query_error("SELECT COUNT"))
    }

    async fn fetch_filtered(&self, filter: &FilterParams) -> StoreResult<Vec<Item>> {
        sqlx::query_as(
            r#"
SELECT
    id, name, category, price, create_date
FROM
    prices
WHERE
    create_date BETWEEN $1 AND $2
    AND price >= $3
    AND price <= $4
ORDER BY
    id
            "#,
        )
        .bind(filter.start)
        .bind(filter.end)
        .bind(Decimal::from(filter.min_price))
        .bind(Decimal::from(filter.max_price))
        .fetch_all(&self.pool)
        .await
        .map_err(query_error("SELECT"))
    }
}

/// A transaction on the `prices` table. sqlx rolls it back when dropped uncommitted.
pub struct PgItemTransaction {
    txn: Transaction<'static, Postgres>,
}

#[async_trait]
impl ItemTransaction for PgItemTransaction {
    async fn load_all(&mut self) -> StoreResult<Vec<Item>> {
        sqlx::query_as("SELECT id, name, category, price, create_date FROM prices")
            .fetch_all(&mut *self.txn)
            .await
            .map_err(query_error("SELECT"))
    }

    async fn insert(&mut self, item: &Item, ids: IdPolicy) -> StoreResult<()> {
        let query = match ids {
            IdPolicy::CallerSupplied => sqlx::query::<Postgres>(
                r#"
INSERT INTO prices (id, name, category, price, create_date)
VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(item.id),
            IdPolicy::StoreAssigned => sqlx::query::<Postgres>(
                "INSERT INTO prices (name, category, price, create_date) VALUES ($1, $2, $3, $4)",
            ),
        };

        query
            .bind(&item.name)
            .bind(&item.category)
            .bind(item.price)
            .bind(item.created_at)
            .execute(&mut *self.txn)
            .await
            .map_err(|error| match error.as_database_error() {
                Some(db_error) if db_error.is_unique_violation() => StoreError::Constraint {
                    id: item.id,
                    reason: db_error.message().to_owned(),
                },
                _ => StoreError::Query {
                    command: "INSERT".to_owned(),
                    error,
                },
            })?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.txn.commit().await.map_err(query_error("COMMIT"))
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.txn.rollback().await.map_err(query_error("ROLLBACK"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn item(id: i64, category: &str, price: Decimal, day: u32) -> Item {
        Item {
            id,
            name: format!("item-{}", id),
            category: category.to_owned(),
            price,
            created_at: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
        }
    }

    async fn insert_committed(store: &PgItemStore, items: &[Item], ids: IdPolicy) {
        let mut txn = store.begin().await.expect("failed to begin transaction");
        for item in items {
            txn.insert(item, ids).await.expect("failed to insert item");
        }
        txn.commit().await.expect("failed to commit transaction");
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running postgres, see DATABASE_URL"]
    async fn test_insert_and_aggregate(db: PgPool) {
        let store = PgItemStore::new_from_pool(db);
        store.ping().await.expect("failed to ping");

        insert_committed(
            &store,
            &[
                item(1, "fruit", Decimal::new(150, 2), 1),
                item(2, "fruit", Decimal::new(225, 2), 2),
                item(3, "dairy", Decimal::new(1, 2), 3),
            ],
            IdPolicy::CallerSupplied,
        )
        .await;

        assert_eq!(store.sum_price().await.unwrap(), Decimal::new(376, 2));
        assert_eq!(store.count_distinct_categories().await.unwrap(), 2);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running postgres, see DATABASE_URL"]
    async fn test_empty_store_aggregates(db: PgPool) {
        let store = PgItemStore::new_from_pool(db);

        assert_eq!(store.sum_price().await.unwrap(), Decimal::ZERO);
        assert_eq!(store.count_distinct_categories().await.unwrap(), 0);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running postgres, see DATABASE_URL"]
    async fn test_dropped_transaction_rolls_back(db: PgPool) {
        let store = PgItemStore::new_from_pool(db);

        {
            let mut txn = store.begin().await.unwrap();
            txn.insert(&item(1, "fruit", Decimal::ONE, 1), IdPolicy::CallerSupplied)
                .await
                .unwrap();
        }

        let mut txn = store.begin().await.unwrap();
        assert!(txn.load_all().await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running postgres, see DATABASE_URL"]
    async fn test_duplicate_id_is_a_constraint_error(db: PgPool) {
        let store = PgItemStore::new_from_pool(db);
        insert_committed(&store, &[item(1, "fruit", Decimal::ONE, 1)], IdPolicy::CallerSupplied)
            .await;

        let mut txn = store.begin().await.unwrap();
        let err = txn
            .insert(&item(1, "fruit", Decimal::TWO, 2), IdPolicy::CallerSupplied)
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Constraint { id: 1, .. }));
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running postgres, see DATABASE_URL"]
    async fn test_store_assigned_ids(db: PgPool) {
        let store = PgItemStore::new_from_pool(db);
        insert_committed(
            &store,
            &[item(7, "fruit", Decimal::ONE, 1), item(7, "fruit", Decimal::TWO, 2)],
            IdPolicy::StoreAssigned,
        )
        .await;

        let mut txn = store.begin().await.unwrap();
        let mut ids: Vec<i64> = txn
            .load_all()
            .await
            .unwrap()
            .iter()
            .map(|item| item.id)
            .collect();
        ids.sort();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[sqlx::test(migrations = "../migrations")]
    #[ignore = "requires a running postgres, see DATABASE_URL"]
    async fn test_fetch_filtered(db: PgPool) {
        let store = PgItemStore::new_from_pool(db);
        insert_committed(
            &store,
            &[
                item(1, "fruit", Decimal::new(5, 0), 1),
                item(2, "fruit", Decimal::new(50, 0), 10),
                item(3, "fruit", Decimal::new(500, 0), 20),
            ],
            IdPolicy::CallerSupplied,
        )
        .await;

        let filter = FilterParams::from_query(Some("2024-01-05"), None, Some("10"), None);
        let items = store.fetch_filtered(&filter).await.unwrap();
        let ids: Vec<i64> = items.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![2, 3]);

        let inverted = FilterParams::from_query(None, None, Some("100"), Some("50"));
        assert!(store.fetch_filtered(&inverted).await.unwrap().is_empty());
    }
}
