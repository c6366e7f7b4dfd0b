use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::item::Item;

/// Which fields decide that a candidate is already stored.
/// Id: two items sharing an id are the same record, whatever their other fields say.
/// Tuple: two items are the same record when name, category, price and date all match,
/// so a renamed or re-priced row is new. Ids are then assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupKey {
    Id,
    Tuple,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseDedupKeyError(pub String);

impl fmt::Display for ParseDedupKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not a valid dedup key, expected 'id' or 'tuple'", self.0)
    }
}

impl FromStr for DedupKey {
    type Err = ParseDedupKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "id" => Ok(DedupKey::Id),
            "tuple" => Ok(DedupKey::Tuple),
            invalid => Err(ParseDedupKeyError(invalid.to_owned())),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Hash)]
enum IdentityKey {
    Id(i64),
    Tuple(String, String, Decimal, NaiveDate),
}

impl DedupKey {
    fn identity(&self, item: &Item) -> IdentityKey {
        match self {
            DedupKey::Id => IdentityKey::Id(item.id),
            DedupKey::Tuple => IdentityKey::Tuple(
                item.name.clone(),
                item.category.clone(),
                // 1.5 and 1.50 are the same price.
                item.price.normalize(),
                item.created_at,
            ),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Deduplicated {
    pub unique: Vec<Item>,
    pub duplicate_count: usize,
}

/// Split `candidates` into items to insert and a duplicate count, preserving candidate order.
/// A candidate repeating an earlier candidate of the same batch is a duplicate too.
pub fn dedupe(candidates: Vec<Item>, existing: &[Item], key: DedupKey) -> Deduplicated {
    let total = candidates.len();
    let mut seen: HashSet<IdentityKey> = existing.iter().map(|item| key.identity(item)).collect();

    let unique: Vec<Item> = candidates
        .into_iter()
        .filter(|item| seen.insert(key.identity(item)))
        .collect();

    Deduplicated {
        duplicate_count: total - unique.len(),
        unique,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, name: &str, price: Decimal) -> Item {
        Item {
            id,
            name: name.to_owned(),
            category: "fruit".to_owned(),
            price,
            created_at: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        }
    }

    #[test]
    fn test_dedup_key_from_str() {
        assert_eq!("id".parse::<DedupKey>(), Ok(DedupKey::Id));
        assert_eq!("TUPLE".parse::<DedupKey>(), Ok(DedupKey::Tuple));
        assert!("name".parse::<DedupKey>().is_err());
    }

    #[test]
    fn test_dedupe_by_id() {
        let existing = vec![item(1, "apple", Decimal::ONE)];
        let candidates = vec![
            item(2, "pear", Decimal::ONE),
            item(1, "renamed apple", Decimal::TWO),
            item(3, "plum", Decimal::ONE),
        ];

        let result = dedupe(candidates, &existing, DedupKey::Id);

        assert_eq!(result.duplicate_count, 1);
        let ids: Vec<i64> = result.unique.iter().map(|item| item.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[test]
    fn test_dedupe_by_tuple() {
        let existing = vec![item(1, "apple", Decimal::new(150, 2))];
        let candidates = vec![
            item(9, "apple", Decimal::new(15, 1)),
            item(1, "apple", Decimal::TWO),
        ];

        let result = dedupe(candidates, &existing, DedupKey::Tuple);

        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.unique, vec![item(1, "apple", Decimal::TWO)]);
    }

    #[test]
    fn test_dedupe_within_batch() {
        let candidates = vec![
            item(1, "apple", Decimal::ONE),
            item(1, "apple", Decimal::ONE),
            item(2, "pear", Decimal::ONE),
        ];

        let result = dedupe(candidates, &[], DedupKey::Id);

        assert_eq!(result.duplicate_count, 1);
        assert_eq!(result.unique.len(), 2);
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let existing = vec![item(1, "apple", Decimal::ONE), item(4, "fig", Decimal::TEN)];
        let candidates = vec![
            item(1, "apple", Decimal::ONE),
            item(2, "pear", Decimal::ONE),
            item(2, "pear", Decimal::ONE),
            item(3, "plum", Decimal::TWO),
        ];

        for key in [DedupKey::Id, DedupKey::Tuple] {
            let first = dedupe(candidates.clone(), &existing, key);
            let second = dedupe(first.unique.clone(), &existing, key);

            assert_eq!(second.unique, first.unique);
            assert_eq!(second.duplicate_count, 0);
        }
    }

    #[test]
    fn test_dedupe_empty_candidates() {
        let result = dedupe(vec![], &[item(1, "apple", Decimal::ONE)], DedupKey::Id);

        assert!(result.unique.is_empty());
        assert_eq!(result.duplicate_count, 0);
    }
}
