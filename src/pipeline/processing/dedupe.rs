use std::collections::HashSet;

use crate::constants::IDENTITY_SEPARATOR;
use crate::domain::CanonicalRecord;
use crate::error::ConfigError;
use crate::pipeline::processing::validate::FieldRuleSet;

/// The fields whose combined values identify one real-world entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityKey {
    fields: Vec<String>,
}

impl IdentityKey {
    /// Build a key over `fields`, each of which must be a required field so
    /// every accepted record carries it.
    pub fn compile(fields: &[String], rules: &FieldRuleSet) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::InvalidRule {
                rule: "identity".to_string(),
                detail: "an identity key needs at least one field".to_string(),
            });
        }
        for field in fields {
            match rules.get(field) {
                Some(rule) if rule.required => {}
                _ => return Err(ConfigError::IdentityFieldNotRequired(field.clone())),
            }
        }
        Ok(Self { fields: fields.to_vec() })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// The key string for a record, or `None` if a component is missing.
    pub fn key_of(&self, record: &CanonicalRecord) -> Option<String> {
        let mut key = String::new();
        for (i, field) in self.fields.iter().enumerate() {
            let value = record.get(field)?;
            if i > 0 {
                key.push(IDENTITY_SEPARATOR);
            }
            key.push_str(&value.to_cell());
        }
        Some(key)
    }
}

/// Survivors of deduplication and how many records were dropped
#[derive(Debug, Clone)]
pub struct DedupeOutcome {
    pub records: Vec<CanonicalRecord>,
    pub removed: usize,
}

/// Trait for collapsing records that describe the same entity
pub trait Deduplicator {
    fn dedupe(&self, records: Vec<CanonicalRecord>) -> DedupeOutcome;
}

/// Keeps the first record seen for each key. Each configured key is applied
/// as its own pass, in order.
#[derive(Debug, Clone)]
pub struct KeyDeduplicator {
    keys: Vec<IdentityKey>,
}

impl KeyDeduplicator {
    pub fn new(keys: Vec<IdentityKey>) -> Self {
        Self { keys }
    }

    /// The primary key, used as the persistence upsert key
    pub fn primary(&self) -> Option<&IdentityKey> {
        self.keys.first()
    }
}

impl Deduplicator for KeyDeduplicator {
    fn dedupe(&self, records: Vec<CanonicalRecord>) -> DedupeOutcome {
        let input = records.len();
        let mut survivors = records;
        for key in &self.keys {
            let mut seen = HashSet::new();
            survivors.retain(|record| match key.key_of(record) {
                Some(k) => seen.insert(k),
                None => true,
            });
        }
        DedupeOutcome {
            removed: input - survivors.len(),
            records: survivors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CanonicalValue, Provenance};
    use crate::pipeline::processing::validate::{FieldKind, FieldRuleSpec};
    use chrono::{TimeZone, Utc};

    fn rules() -> FieldRuleSet {
        FieldRuleSet::compile(&[
            FieldRuleSpec::new("id", FieldKind::Text).required(),
            FieldRuleSpec::new("name", FieldKind::Text).required(),
            FieldRuleSpec::new("notes", FieldKind::Text),
        ])
        .unwrap()
    }

    fn record(id: &str, name: &str, day: u32) -> CanonicalRecord {
        let at = Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap();
        CanonicalRecord::new(
            vec![
                ("id".to_string(), CanonicalValue::Text(id.to_string())),
                ("name".to_string(), CanonicalValue::Text(name.to_string())),
            ],
            Provenance {
                data_source: "test".to_string(),
                scraped_at: at,
                processed_at: at,
            },
        )
    }

    fn key(fields: &[&str]) -> IdentityKey {
        let fields: Vec<String> = fields.iter().map(|f| f.to_string()).collect();
        IdentityKey::compile(&fields, &rules()).unwrap()
    }

    #[test]
    fn test_first_record_wins() {
        let dedup = KeyDeduplicator::new(vec![key(&["id"])]);
        let out = dedup.dedupe(vec![record("a", "push-up", 1), record("a", "push-up", 2)]);
        assert_eq!(out.removed, 1);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].provenance.scraped_at.format("%d").to_string(), "01");
    }

    #[test]
    fn test_successive_passes() {
        let dedup = KeyDeduplicator::new(vec![key(&["id"]), key(&["name"])]);
        let out = dedup.dedupe(vec![
            record("a", "squat", 1),
            record("b", "squat", 1),
            record("c", "lunge", 1),
            record("a", "other", 1),
        ]);
        let ids: Vec<&str> = out.records.iter().map(|r| r.get("id").unwrap().as_text().unwrap()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(out.removed, 2);
    }

    #[test]
    fn test_composite_key_components_stay_apart() {
        let dedup = KeyDeduplicator::new(vec![key(&["id", "name"])]);
        let out = dedup.dedupe(vec![record("ab", "c", 1), record("a", "bc", 1)]);
        assert_eq!(out.removed, 0);
    }

    #[test]
    fn test_identity_must_be_required() {
        let err = IdentityKey::compile(&["notes".to_string()], &rules()).unwrap_err();
        assert_eq!(err, ConfigError::IdentityFieldNotRequired("notes".to_string()));
        let err = IdentityKey::compile(&["missing".to_string()], &rules()).unwrap_err();
        assert_eq!(err, ConfigError::IdentityFieldNotRequired("missing".to_string()));
    }
}
