//! Decode the price-list CSV and validate each row into an [`Item`].
//!
//! Structural CSV problems abort the request. Field problems only reject the row: the row is
//! counted, logged with its reason and left out of the batch.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use csv::StringRecord;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::item::{Item, CSV_HEADER, DATE_FORMAT};

const ID: usize = 0;
const NAME: usize = 1;
const CATEGORY: usize = 2;
const PRICE: usize = 3;
const CREATED_AT: usize = 4;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("csv holds no header row")]
    MissingHeader,
    #[error("csv row {line} has {found} columns, expected {expected}")]
    ColumnCount {
        line: u64,
        found: usize,
        expected: usize,
    },
    #[error("failed to read csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Why a row was left out of the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectionReason {
    NotANumber,
    EmptyName,
    EmptyCategory,
    InvalidPrice,
    InvalidDate,
    FutureDate,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::NotANumber => "not_a_number",
            RejectionReason::EmptyName => "empty_name",
            RejectionReason::EmptyCategory => "empty_category",
            RejectionReason::InvalidPrice => "invalid_price",
            RejectionReason::InvalidDate => "invalid_date",
            RejectionReason::FutureDate => "future_date",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of "today" for the future-date check.
pub trait Clock {
    fn today(&self) -> NaiveDate;
}

#[derive(Clone, Debug, Default)]
pub struct SystemClock {}

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

#[derive(Clone, Debug)]
pub struct FixedClock {
    pub today: NaiveDate,
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.today
    }
}

/// Outcome of validating every data row of one CSV.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ValidatedBatch {
    pub items: Vec<Item>,
    /// Data rows presented to validation, header excluded.
    pub rows_read: usize,
    pub rejections: BTreeMap<RejectionReason, usize>,
}

impl ValidatedBatch {
    pub fn rejected(&self) -> usize {
        self.rejections.values().sum()
    }
}

/// Decode all data rows. The header row is required and always skipped.
pub fn read_records(content: &[u8]) -> Result<Vec<StringRecord>, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(content);

    if reader.headers()?.is_empty() {
        return Err(ParseError::MissingHeader);
    }

    let records = reader.records().collect::<Result<Vec<_>, _>>()?;

    for record in &records {
        if record.len() != CSV_HEADER.len() {
            return Err(ParseError::ColumnCount {
                line: record.position().map(|p| p.line()).unwrap_or_default(),
                found: record.len(),
                expected: CSV_HEADER.len(),
            });
        }
    }

    Ok(records)
}

/// Validate a single data row, checking fields in column order.
pub fn parse_row(record: &StringRecord, today: NaiveDate) -> Result<Item, RejectionReason> {
    let field = |index: usize| record.get(index).unwrap_or_default();

    let id = field(ID)
        .parse::<i64>()
        .map_err(|_| RejectionReason::NotANumber)?;

    let name = field(NAME);
    if name.is_empty() {
        return Err(RejectionReason::EmptyName);
    }

    let category = field(CATEGORY);
    if category.is_empty() {
        return Err(RejectionReason::EmptyCategory);
    }

    let price = Decimal::from_str(field(PRICE))
        .ok()
        .filter(|price| price.is_sign_positive() && !price.is_zero())
        .ok_or(RejectionReason::InvalidPrice)?;

    let created_at = NaiveDate::parse_from_str(field(CREATED_AT), DATE_FORMAT)
        .map_err(|_| RejectionReason::InvalidDate)?;
    if created_at > today {
        return Err(RejectionReason::FutureDate);
    }

    Ok(Item {
        id,
        name: name.to_owned(),
        category: category.to_owned(),
        price,
        created_at,
    })
}

/// Validate every record, keeping valid items in their original order.
pub fn validate_records(records: &[StringRecord], today: NaiveDate) -> ValidatedBatch {
    let mut batch = ValidatedBatch {
        rows_read: records.len(),
        ..Default::default()
    };

    for record in records {
        match parse_row(record, today) {
            Ok(item) => batch.items.push(item),
            Err(reason) => {
                warn!(
                    "rejected row: {} : id {:?} : {:?}",
                    reason,
                    record.get(ID).unwrap_or_default(),
                    record
                );
                metrics::counter!("prices_rows_rejected_total", "reason" => reason.as_str())
                    .increment(1);
                *batch.rejections.entry(reason).or_default() += 1;
            }
        }
    }

    info!(
        "read {} records, {} incorrect",
        batch.rows_read,
        batch.rejected()
    );

    batch
}
