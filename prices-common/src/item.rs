use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

/// Calendar date format used on the CSV wire in both directions.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column order of the price-list CSV, header included on read and write.
pub const CSV_HEADER: [&str; 5] = ["id", "name", "category", "price", "create_date"];

/// One validated price-list record.
/// Items are never mutated once created: re-ingesting the same record is a duplicate,
/// not an update.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Item {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub price: Decimal,
    #[sqlx(rename = "create_date")]
    pub created_at: NaiveDate,
}

/// Who owns the `id` column, fixed per deployment.
/// CallerSupplied: the id read from the CSV is inserted as is.
/// StoreAssigned: the store generates the id, the CSV id is only validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdPolicy {
    CallerSupplied,
    StoreAssigned,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseIdPolicyError(pub String);

impl fmt::Display for ParseIdPolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid id policy, expected 'caller' or 'store'", self.0)
    }
}

impl FromStr for IdPolicy {
    type Err = ParseIdPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "caller" => Ok(IdPolicy::CallerSupplied),
            "store" => Ok(IdPolicy::StoreAssigned),
            invalid => Err(ParseIdPolicyError(invalid.to_owned())),
        }
    }
}

/// Read-path query: inclusive date range and inclusive price range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterParams {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub min_price: i64,
    pub max_price: i64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(1970, 1, 1).expect("1970-01-01 is a valid date"),
            end: NaiveDate::from_ymd_opt(5999, 1, 1).expect("5999-01-01 is a valid date"),
            min_price: 0,
            max_price: i64::MAX,
        }
    }
}

impl FilterParams {
    /// Build filters from raw query values. Every bound falls back to its default on its own
    /// when absent, unparsable or, for prices, negative.
    pub fn from_query(
        start: Option<&str>,
        end: Option<&str>,
        min: Option<&str>,
        max: Option<&str>,
    ) -> Self {
        let defaults = Self::default();

        Self {
            start: start.and_then(parse_date).unwrap_or(defaults.start),
            end: end.and_then(parse_date).unwrap_or(defaults.end),
            min_price: min.and_then(parse_bound).unwrap_or(defaults.min_price),
            max_price: max.and_then(parse_bound).unwrap_or(defaults.max_price),
        }
    }

    pub fn matches(&self, item: &Item) -> bool {
        item.created_at >= self.start
            && item.created_at <= self.end
            && item.price >= Decimal::from(self.min_price)
            && item.price <= Decimal::from(self.max_price)
    }
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

fn parse_bound(value: &str) -> Option<i64> {
    value.parse::<i64>().ok().filter(|bound| *bound >= 0)
}
