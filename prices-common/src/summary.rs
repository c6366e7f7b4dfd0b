use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::warn;

use crate::store::ItemStore;

/// Round to cents, ties away from zero. Every aggregate price goes through here.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Store-wide aggregates read after the write. `None` means the query failed: aggregates are
/// informational, so a failure is logged and reported as unavailable instead of failing the
/// request.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Aggregates {
    pub total_categories: Option<i64>,
    pub total_price: Option<Decimal>,
}

impl Aggregates {
    pub async fn collect(store: &dyn ItemStore) -> Self {
        let total_price = match store.sum_price().await {
            Ok(sum) => Some(round_cents(sum)),
            Err(e) => {
                warn!("failed to retrieve total price: {}", e);
                metrics::counter!("prices_aggregate_failures_total", "aggregate" => "total_price")
                    .increment(1);
                None
            }
        };

        let total_categories = match store.count_distinct_categories().await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("failed to retrieve total categories: {}", e);
                metrics::counter!(
                    "prices_aggregate_failures_total",
                    "aggregate" => "total_categories"
                )
                .increment(1);
                None
            }
        };

        Self {
            total_categories,
            total_price,
        }
    }
}

/// The response to one ingestion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestionSummary {
    /// Data rows read from the CSV, header excluded.
    pub total_count: usize,
    pub duplicates_count: usize,
    /// Items inserted by this request.
    pub total_items: usize,
    pub invalid_count: usize,
    pub total_categories: Option<i64>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub total_price: Option<Decimal>,
}
