//! Flattened tabular form of canonical records.
//!
//! List-valued fields are joined into one cell with [`LIST_DELIMITER`].
//! A delimiter or escape character inside an element is prefixed with
//! [`ESCAPE_CHAR`], so [`split_list`] recovers the original elements.

use crate::constants::{DATA_SOURCE_FIELD, ESCAPE_CHAR, LIST_DELIMITER, PROCESSED_AT_FIELD, SCRAPED_AT_FIELD};
use crate::domain::canonical::{format_timestamp, is_provenance_field};
use crate::domain::CanonicalRecord;

pub fn join_list(items: &[String]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(LIST_DELIMITER);
        }
        for c in item.chars() {
            if c == LIST_DELIMITER || c == ESCAPE_CHAR {
                out.push(ESCAPE_CHAR);
            }
            out.push(c);
        }
    }
    out
}

/// Inverse of [`join_list`]. An empty cell is an empty list.
pub fn split_list(cell: &str) -> Vec<String> {
    if cell.is_empty() {
        return Vec::new();
    }
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE_CHAR {
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == LIST_DELIMITER {
            items.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    items.push(current);
    items
}

/// Headers and rows for a set of records. Columns are the union of field
/// names in first-seen order, followed by the provenance columns. A record
/// without a column gets an empty cell. Fields named like a provenance
/// column are left out.
pub fn flatten(records: &[CanonicalRecord]) -> (Vec<String>, Vec<Vec<String>>) {
    let mut headers: Vec<String> = Vec::new();
    for record in records {
        for name in record.field_names().filter(|n| !is_provenance_field(n)) {
            if !headers.iter().any(|h| h == name) {
                headers.push(name.to_string());
            }
        }
    }

    let rows = records
        .iter()
        .map(|record| {
            let mut row: Vec<String> = headers
                .iter()
                .map(|h| record.get(h).map(|v| v.to_cell()).unwrap_or_default())
                .collect();
            row.push(record.provenance.data_source.clone());
            row.push(format_timestamp(&record.provenance.scraped_at));
            row.push(format_timestamp(&record.provenance.processed_at));
            row
        })
        .collect();

    headers.push(DATA_SOURCE_FIELD.to_string());
    headers.push(SCRAPED_AT_FIELD.to_string());
    headers.push(PROCESSED_AT_FIELD.to_string());
    (headers, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalValue, Provenance};
    use chrono::Utc;

    #[test]
    fn test_join_uses_documented_delimiter() {
        let items = vec!["chest".to_string(), "triceps".to_string()];
        assert_eq!(join_list(&items), "chest|triceps");
    }

    #[test]
    fn test_delimiter_inside_element_survives() {
        let items = vec!["a|b".to_string(), "c\\d".to_string(), "".to_string(), "e".to_string()];
        let cell = join_list(&items);
        assert_eq!(cell, "a\\|b|c\\\\d||e");
        assert_eq!(split_list(&cell), items);
    }

    #[test]
    fn test_empty_cell_is_empty_list() {
        assert!(split_list("").is_empty());
        assert_eq!(join_list(&[]), "");
    }

    #[test]
    fn test_flatten_unions_columns() {
        let now = Utc::now();
        let prov = Provenance {
            data_source: "src".to_string(),
            scraped_at: now,
            processed_at: now,
        };
        let a = CanonicalRecord::new(
            vec![("id".to_string(), CanonicalValue::Text("1".to_string()))],
            prov.clone(),
        );
        let b = CanonicalRecord::new(
            vec![
                ("id".to_string(), CanonicalValue::Text("2".to_string())),
                ("tags".to_string(), CanonicalValue::List(vec!["x".to_string(), "y".to_string()])),
            ],
            prov,
        );

        let (headers, rows) = flatten(&[a, b]);
        assert_eq!(&headers[..2], &["id".to_string(), "tags".to_string()]);
        assert_eq!(headers.len(), 5);
        assert_eq!(rows[0][1], "");
        assert_eq!(rows[1][1], "x|y");
        assert_eq!(rows[1][2], "src");
    }

    #[test]
    fn test_flatten_keeps_one_column_per_provenance_name() {
        let now = Utc::now();
        let record = CanonicalRecord::new(
            vec![
                ("id".to_string(), CanonicalValue::Text("1".to_string())),
                ("processed_at".to_string(), CanonicalValue::Text("stale".to_string())),
            ],
            Provenance {
                data_source: "src".to_string(),
                scraped_at: now,
                processed_at: now,
            },
        );
        let (headers, rows) = flatten(&[record]);
        assert_eq!(headers, vec!["id", "data_source", "scraped_at", "processed_at"]);
        assert_eq!(rows[0].len(), headers.len());
        assert_ne!(rows[0][3], "stale");
    }
}
