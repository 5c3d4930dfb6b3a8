use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::domain::CanonicalValue;
use crate::pipeline::processing::validate::{CaseRule, FieldRuleSet, ValidatedRecord};

/// A validated record whose text values are in canonical form
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub position: usize,
    pub scraped_at: Option<DateTime<Utc>>,
    pub fields: Vec<(String, CanonicalValue)>,
}

impl NormalizedRecord {
    pub fn get(&self, field: &str) -> Option<&CanonicalValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }
}

/// Trait for turning validated records into canonical representations.
/// Normalization never fails.
pub trait Normalizer {
    fn normalize(&self, record: ValidatedRecord) -> NormalizedRecord;
}

#[derive(Debug, Clone)]
struct TextRule {
    case: CaseRule,
    aliases: BTreeMap<String, String>,
}

impl TextRule {
    fn apply(&self, value: &str) -> String {
        let normalized = self.case.apply(value);
        match self.aliases.get(&normalized) {
            Some(canonical) => canonical.clone(),
            None => normalized,
        }
    }
}

/// Normalizer using the case and alias settings declared on each field rule
#[derive(Debug, Clone)]
pub struct RuleNormalizer {
    rules: HashMap<String, TextRule>,
    passthrough: TextRule,
}

impl RuleNormalizer {
    pub fn new(field_rules: &FieldRuleSet) -> Self {
        let rules = field_rules
            .rules()
            .iter()
            .map(|r| {
                (
                    r.name.clone(),
                    TextRule {
                        case: r.case,
                        aliases: r.aliases.clone(),
                    },
                )
            })
            .collect();
        Self {
            rules,
            passthrough: TextRule {
                case: CaseRule::Lower,
                aliases: BTreeMap::new(),
            },
        }
    }

    /// Case handling for fields no rule declares
    pub fn with_passthrough_case(mut self, case: CaseRule) -> Self {
        self.passthrough.case = case;
        self
    }

    fn rule_for(&self, field: &str) -> &TextRule {
        self.rules.get(field).unwrap_or(&self.passthrough)
    }
}

impl Normalizer for RuleNormalizer {
    fn normalize(&self, record: ValidatedRecord) -> NormalizedRecord {
        let fields = record
            .fields
            .into_iter()
            .map(|(name, value)| {
                let rule = self.rule_for(&name);
                let value = match value {
                    CanonicalValue::Text(s) => CanonicalValue::Text(rule.apply(&s)),
                    CanonicalValue::List(items) => {
                        CanonicalValue::List(items.iter().map(|item| rule.apply(item)).collect())
                    }
                    other => other,
                };
                (name, value)
            })
            .collect();

        NormalizedRecord {
            position: record.position,
            scraped_at: record.scraped_at,
            fields,
        }
    }
}
