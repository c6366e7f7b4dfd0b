use std::io::{Cursor, Write};

use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::item::{Item, CSV_HEADER, DATE_FORMAT};
use crate::store::StoreError;
use crate::summary::round_cents;

/// Name of the single entry in an export archive.
pub const EXPORT_ENTRY_NAME: &str = "data.csv";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("failed to read items: {0}")]
    Store(#[from] StoreError),
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to write zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("failed to flush export: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize items in the ingestion column order, so an export can be uploaded again as is.
/// Prices are written in cents: a stored price with more than two decimals comes back rounded
/// when the export is ingested again.
pub fn write_csv(items: &[Item]) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for item in items {
        writer.write_record([
            item.id.to_string(),
            item.name.clone(),
            item.category.clone(),
            format!("{:.2}", round_cents(item.price)),
            item.created_at.format(DATE_FORMAT).to_string(),
        ])?;
    }

    writer.into_inner().map_err(|e| ExportError::Io(e.into_error()))
}

pub fn package_zip(csv: &[u8]) -> Result<Vec<u8>, ExportError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(EXPORT_ENTRY_NAME, options)?;
    zip.write_all(csv)?;

    Ok(zip.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{extract, select_csv_entry, ArchiveKind};
    use crate::validation::{parse_row, read_records, RejectionReason};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn item(id: i64, name: &str, price: &str) -> Item {
        Item {
            id,
            name: name.to_owned(),
            category: "fruit".to_owned(),
            price: Decimal::from_str(price).unwrap(),
            created_at: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        }
    }

    #[test]
    fn test_empty_export_is_header_only() {
        let csv = write_csv(&[]).unwrap();

        assert_eq!(
            String::from_utf8(csv).unwrap(),
            "id,name,category,price,create_date\n"
        );
    }

    #[test]
    fn test_prices_are_written_with_two_decimals() {
        let csv = write_csv(&[item(1, "apple", "1.5"), item(2, "pear", "3")]).unwrap();

        assert_eq!(
            String::from_utf8(csv).unwrap(),
            [
                "id,name,category,price,create_date\n",
                "1,apple,fruit,1.50,2024-03-09\n",
                "2,pear,fruit,3.00,2024-03-09\n",
            ]
            .concat()
        );
    }

    #[test]
    fn test_fields_with_commas_are_quoted() {
        let csv = write_csv(&[item(1, "apples, red", "2.25")]).unwrap();

        assert!(String::from_utf8(csv)
            .unwrap()
            .contains("1,\"apples, red\",fruit,2.25,2024-03-09"));
    }

    #[test]
    fn test_export_can_be_ingested_again() {
        let items = vec![item(1, "apple", "1.10"), item(2, "apples, red", "20.05")];
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let archive = package_zip(&write_csv(&items).unwrap()).unwrap();
        let entries = extract(&archive, "data.zip", ArchiveKind::Zip).unwrap();
        let (name, content) = select_csv_entry(&entries).unwrap();
        let parsed: Vec<Item> = read_records(content)
            .unwrap()
            .iter()
            .map(|record| parse_row(record, today).unwrap())
            .collect();

        assert_eq!(name, EXPORT_ENTRY_NAME);
        assert_eq!(parsed, items);
    }

    #[test]
    fn test_sub_cent_prices_are_exported_rounded() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let items = vec![item(1, "apple", "1.255"), item(2, "pear", "0.004")];

        let csv = write_csv(&items).unwrap();
        let parsed: Vec<Result<Item, RejectionReason>> = read_records(&csv)
            .unwrap()
            .iter()
            .map(|record| parse_row(record, today))
            .collect();

        assert_eq!(
            parsed[0].as_ref().map(|apple| apple.price),
            Ok(Decimal::from_str("1.26").unwrap())
        );
        // A price below half a cent exports as zero and no longer validates.
        assert_eq!(parsed[1], Err(RejectionReason::InvalidPrice));
    }
}
