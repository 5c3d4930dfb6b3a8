use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::constants::{DATA_SOURCE_FIELD, PROCESSED_AT_FIELD, SCRAPED_AT_FIELD};
use crate::domain::{parse_timestamp, MalformedInput, RawBatch, RawEntry, RawRecord, RawValue, SourceMetadata};
use crate::error::SourceError;
use crate::pipeline::ingestion::SourceSettings;

fn unreadable(origin: &str, detail: impl Into<String>) -> SourceError {
    SourceError::Unreadable {
        origin: origin.to_string(),
        detail: detail.into(),
    }
}

/// Provenance columns from a previous export are re-stamped on the next run.
fn strip_provenance(record: &mut RawRecord) {
    record.remove(DATA_SOURCE_FIELD);
    record.remove(SCRAPED_AT_FIELD);
    record.remove(PROCESSED_AT_FIELD);
}

/// Decode a JSON payload.
///
/// The payload is either a top-level array of records, or an object holding
/// the array under `records_key` (or under its first array-valued key when no
/// key is given). An object payload may carry `metadata.source` and
/// `metadata.scraped_at`, which override `origin` and `fetched_at`.
pub fn load_json(
    bytes: &[u8],
    origin: &str,
    records_key: Option<&str>,
    fetched_at: DateTime<Utc>,
) -> Result<RawBatch, SourceError> {
    let document: Value = serde_json::from_slice(bytes).map_err(|e| unreadable(origin, e.to_string()))?;

    let mut source = SourceMetadata::new(origin, fetched_at);
    let items = match &document {
        Value::Array(items) => items,
        Value::Object(object) => {
            apply_metadata(object, &mut source);
            find_records(object, records_key).ok_or_else(|| match records_key {
                Some(key) => unreadable(origin, format!("no array under key '{}'", key)),
                None => unreadable(origin, "object payload holds no records array"),
            })?
        }
        _ => return Err(unreadable(origin, "payload is neither an array nor an object")),
    };

    if items.is_empty() {
        return Err(SourceError::Empty {
            origin: source.origin,
        });
    }

    let entries = items
        .iter()
        .enumerate()
        .map(|(position, item)| match item {
            Value::Object(object) => match RawRecord::from_json_object(position, object) {
                Ok(mut record) => {
                    strip_provenance(&mut record);
                    RawEntry::Record(record)
                }
                Err(bad) => RawEntry::Malformed(bad),
            },
            _ => RawEntry::Malformed(MalformedInput {
                position,
                detail: "entry is not an object".to_string(),
            }),
        })
        .collect::<Vec<_>>();

    debug!(origin = %source.origin, entries = entries.len(), "Loaded JSON payload");
    Ok(RawBatch::new(source, entries))
}

fn apply_metadata(object: &Map<String, Value>, source: &mut SourceMetadata) {
    let Some(Value::Object(metadata)) = object.get("metadata") else {
        return;
    };
    if let Some(name) = metadata.get("source").and_then(Value::as_str) {
        source.origin = name.to_string();
    }
    if let Some(ts) = metadata.get(SCRAPED_AT_FIELD).and_then(Value::as_str) {
        match parse_timestamp(ts) {
            Some(ts) => source.fetched_at = ts,
            None => warn!("Ignoring unparseable metadata.scraped_at '{}'", ts),
        }
    }
}

fn find_records<'a>(object: &'a Map<String, Value>, records_key: Option<&str>) -> Option<&'a Vec<Value>> {
    match records_key {
        Some(key) => object.get(key).and_then(Value::as_array),
        None => object
            .iter()
            .filter(|(k, _)| k.as_str() != "metadata")
            .find_map(|(_, v)| v.as_array()),
    }
}

/// `"Weight (kg)"` becomes `"weight_(kg)"`.
pub fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

/// Decode a delimited payload with a header row.
///
/// Every cell is read as text; the validator resolves types. Empty cells are
/// absent. Rows with the wrong number of cells or invalid UTF-8 become
/// malformed entries.
pub fn load_csv(bytes: &[u8], settings: &SourceSettings, fetched_at: DateTime<Utc>) -> Result<RawBatch, SourceError> {
    let origin = settings.origin.as_str();
    let delimiter = u8::try_from(settings.delimiter)
        .map_err(|_| unreadable(origin, format!("delimiter '{}' is not a single byte", settings.delimiter)))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| unreadable(origin, e.to_string()))?
        .iter()
        .map(|h| {
            if settings.normalize_headers {
                normalize_header(h)
            } else {
                h.trim().to_string()
            }
        })
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(unreadable(origin, "missing header row"));
    }

    let mut entries = Vec::new();
    for (position, row) in reader.byte_records().enumerate() {
        let entry = match row {
            Ok(row) if row.len() != headers.len() => RawEntry::Malformed(MalformedInput {
                position,
                detail: format!("expected {} cells, found {}", headers.len(), row.len()),
            }),
            Ok(row) => csv_row(position, &headers, &row),
            Err(e) => RawEntry::Malformed(MalformedInput {
                position,
                detail: e.to_string(),
            }),
        };
        entries.push(entry);
    }

    if entries.is_empty() {
        return Err(SourceError::Empty {
            origin: origin.to_string(),
        });
    }

    debug!(origin = %origin, entries = entries.len(), columns = headers.len(), "Loaded delimited payload");
    Ok(RawBatch::new(SourceMetadata::new(origin, fetched_at), entries))
}

fn csv_row(position: usize, headers: &[String], row: &csv::ByteRecord) -> RawEntry {
    let mut record = RawRecord::new(position);
    for (header, cell) in headers.iter().zip(row.iter()) {
        let Ok(cell) = std::str::from_utf8(cell) else {
            return RawEntry::Malformed(MalformedInput {
                position,
                detail: format!("column '{}' is not valid UTF-8", header),
            });
        };
        if header == SCRAPED_AT_FIELD {
            match parse_timestamp(cell) {
                Some(ts) => record.scraped_at = Some(ts),
                None if !cell.trim().is_empty() => {
                    warn!(position, "Dropping unparseable scraped_at cell '{}'", cell);
                }
                None => {}
            }
            continue;
        }
        let value = if cell.trim().is_empty() {
            RawValue::Absent
        } else {
            RawValue::Text(cell.to_string())
        };
        record.insert(header, value);
    }
    strip_provenance(&mut record);
    RawEntry::Record(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ingestion::SourceFormat;

    fn csv_settings() -> SourceSettings {
        let mut settings = SourceSettings::new("gym_members", SourceFormat::Csv);
        settings.normalize_headers = true;
        settings
    }

    #[test]
    fn test_top_level_array() {
        let json = br#"[{"id": "a", "name": "Squat"}, {"id": "b", "name": "Lunge"}]"#;
        let batch = load_json(json, "ExerciseDB", None, Utc::now()).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.source.origin, "ExerciseDB");
    }

    #[test]
    fn test_object_with_metadata() {
        let json = br#"{
            "metadata": {"source": "ExerciseDB API", "scraped_at": "2025-01-02 03:04:05"},
            "exercises": [{"id": "a", "name": "Squat"}]
        }"#;
        let batch = load_json(json, "fallback", Some("exercises"), Utc::now()).unwrap();
        assert_eq!(batch.source.origin, "ExerciseDB API");
        assert_eq!(batch.source.fetched_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");
    }

    #[test]
    fn test_first_array_used_without_key() {
        let json = br#"{"metadata": {}, "items": [{"id": "a"}]}"#;
        assert_eq!(load_json(json, "x", None, Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_non_object_entries_are_malformed() {
        let json = br#"[{"id": "a"}, 42, {"id": {"nested": true}}]"#;
        let batch = load_json(json, "x", None, Utc::now()).unwrap();
        assert!(matches!(batch.entries[0], RawEntry::Record(_)));
        assert!(matches!(batch.entries[1], RawEntry::Malformed(_)));
        assert!(matches!(batch.entries[2], RawEntry::Malformed(_)));
    }

    #[test]
    fn test_empty_and_unreadable_payloads() {
        assert!(matches!(load_json(b"[]", "x", None, Utc::now()), Err(SourceError::Empty { .. })));
        assert!(matches!(
            load_json(b"{not json", "x", None, Utc::now()),
            Err(SourceError::Unreadable { .. })
        ));
        assert!(matches!(
            load_json(br#"{"a": []}"#, "x", Some("records"), Utc::now()),
            Err(SourceError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_csv_headers_are_normalized() {
        let csv = b"Age,Gender,Weight (kg)\n56,Male,88.3\n";
        let batch = load_csv(csv, &csv_settings(), Utc::now()).unwrap();
        let RawEntry::Record(record) = &batch.entries[0] else {
            panic!("expected a record");
        };
        assert_eq!(record.get("weight_(kg)"), &RawValue::Text("88.3".to_string()));
        assert_eq!(record.get("gender"), &RawValue::Text("Male".to_string()));
    }

    #[test]
    fn test_csv_short_row_is_malformed() {
        let csv = b"age,gender\n56,Male\n40\n";
        let batch = load_csv(csv, &csv_settings(), Utc::now()).unwrap();
        assert_eq!(batch.len(), 2);
        assert!(matches!(batch.entries[1], RawEntry::Malformed(_)));
    }

    #[test]
    fn test_csv_empty_cells_are_absent() {
        let csv = b"age,gender\n56,\n";
        let batch = load_csv(csv, &csv_settings(), Utc::now()).unwrap();
        let RawEntry::Record(record) = &batch.entries[0] else {
            panic!("expected a record");
        };
        assert_eq!(record.get("gender"), &RawValue::Absent);
    }

    #[test]
    fn test_csv_without_rows_is_empty() {
        assert!(matches!(
            load_csv(b"age,gender\n", &csv_settings(), Utc::now()),
            Err(SourceError::Empty { .. })
        ));
    }

    #[test]
    fn test_exported_provenance_is_restamped() {
        let csv = b"id,data_source,scraped_at,processed_at\n\
                    a,old,2025-01-01T00:00:00.000000Z,2025-01-02T00:00:00.000000Z\n";
        let batch = load_csv(csv, &csv_settings(), Utc::now()).unwrap();
        let RawEntry::Record(record) = &batch.entries[0] else {
            panic!("expected a record");
        };
        assert_eq!(record.len(), 1);
        assert!(record.scraped_at.is_some());
    }

    #[test]
    fn test_naive_record_scraped_at_exports_once() {
        use crate::pipeline::tabular::flatten;
        use crate::Pipeline;
        use crate::pipeline::processing::validate::{FieldKind, FieldRuleSpec};

        let json = br#"[{"id":"a","name":"Squat","scraped_at":"2025-01-02 03:04:05"}]"#;
        let batch = load_json(json, "x", None, Utc::now()).unwrap();
        let pipeline = Pipeline::builder("exercises")
            .fields(vec![
                FieldRuleSpec::new("id", FieldKind::Text).required(),
                FieldRuleSpec::new("name", FieldKind::Text).required(),
            ])
            .build()
            .unwrap();
        let report = pipeline.run(batch).unwrap();
        let record = &report.records[0];
        assert_eq!(record.provenance.scraped_at.to_rfc3339(), "2025-01-02T03:04:05+00:00");

        let text = serde_json::to_string(record).unwrap();
        assert_eq!(text.matches("\"scraped_at\"").count(), 1);
        assert!(text.contains("\"scraped_at\":\"2025-01-02T03:04:05.000000Z\""));

        let (headers, _) = flatten(&report.records);
        assert_eq!(headers.iter().filter(|h| h.as_str() == SCRAPED_AT_FIELD).count(), 1);
    }

    #[test]
    fn test_csv_unparseable_scraped_at_is_dropped() {
        let fetched = Utc::now();
        let csv = b"id,scraped_at\na,yesterday\nb,2025-01-02T03:04:05.5\n";
        let batch = load_csv(csv, &csv_settings(), fetched).unwrap();
        let RawEntry::Record(first) = &batch.entries[0] else {
            panic!("expected a record");
        };
        assert_eq!(first.len(), 1);
        assert!(first.scraped_at.is_none());
        let RawEntry::Record(second) = &batch.entries[1] else {
            panic!("expected a record");
        };
        assert_eq!(second.scraped_at.unwrap().to_rfc3339(), "2025-01-02T03:04:05.500+00:00");
    }
}
