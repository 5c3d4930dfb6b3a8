//! Declarative enrichment: derived fields computed from normalized ones.

mod derive;
pub mod plan;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::constants::DEFAULT_FALLBACK_LABEL;
use crate::domain::{CanonicalRecord, CanonicalValue, Provenance, SourceMetadata};
use crate::error::ConfigError;
use crate::pipeline::processing::normalize::NormalizedRecord;
use crate::pipeline::processing::validate::FieldRuleSet;

/// One term of a weighted sum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedTerm {
    pub field: String,
    pub weight: f64,
}

/// Upper (exclusive) bound of a bucket and the label it assigns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketBound {
    pub below: f64,
    pub label: String,
}

/// A classification label. Matches when any of `fields` contains one of
/// `keywords` as a substring, or equals one of `values`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRule {
    pub label: String,
    pub fields: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub values: Vec<String>,
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK_LABEL.to_string()
}

/// Enrichment rule descriptor, as written in a domain config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnrichRuleSpec {
    /// Duplicate-free union of list fields, in first-seen order
    Union { output: String, sources: Vec<String> },
    /// Number of elements of a list field
    Count { output: String, source: String },
    /// Categorical value mapped onto an integer scale
    Ordinal {
        output: String,
        source: String,
        scale: BTreeMap<String, i64>,
    },
    WeightedSum {
        output: String,
        terms: Vec<WeightedTerm>,
        #[serde(default)]
        round: Option<u32>,
    },
    Ratio {
        output: String,
        numerator: String,
        denominator: String,
        #[serde(default)]
        round: Option<u32>,
    },
    /// True when the source is present and not a "no requirement" value
    Flag {
        output: String,
        source: String,
        #[serde(default)]
        none_values: Vec<String>,
    },
    Bucket {
        output: String,
        source: String,
        bounds: Vec<BucketBound>,
        otherwise: String,
    },
    Classify {
        output: String,
        labels: Vec<LabelRule>,
        #[serde(default = "default_fallback")]
        fallback: String,
    },
}

impl EnrichRuleSpec {
    pub fn output(&self) -> &str {
        match self {
            EnrichRuleSpec::Union { output, .. }
            | EnrichRuleSpec::Count { output, .. }
            | EnrichRuleSpec::Ordinal { output, .. }
            | EnrichRuleSpec::WeightedSum { output, .. }
            | EnrichRuleSpec::Ratio { output, .. }
            | EnrichRuleSpec::Flag { output, .. }
            | EnrichRuleSpec::Bucket { output, .. }
            | EnrichRuleSpec::Classify { output, .. } => output,
        }
    }

    /// Every field this rule reads
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            EnrichRuleSpec::Union { sources, .. } => sources.iter().map(String::as_str).collect(),
            EnrichRuleSpec::Count { source, .. }
            | EnrichRuleSpec::Ordinal { source, .. }
            | EnrichRuleSpec::Flag { source, .. }
            | EnrichRuleSpec::Bucket { source, .. } => vec![source.as_str()],
            EnrichRuleSpec::WeightedSum { terms, .. } => terms.iter().map(|t| t.field.as_str()).collect(),
            EnrichRuleSpec::Ratio { numerator, denominator, .. } => vec![numerator.as_str(), denominator.as_str()],
            EnrichRuleSpec::Classify { labels, .. } => {
                let mut inputs: Vec<&str> = Vec::new();
                for field in labels.iter().flat_map(|l| l.fields.iter()) {
                    if !inputs.contains(&field.as_str()) {
                        inputs.push(field);
                    }
                }
                inputs
            }
        }
    }

    fn invalid(&self, detail: &str) -> ConfigError {
        ConfigError::InvalidRule {
            rule: self.output().to_string(),
            detail: detail.to_string(),
        }
    }

    /// Checks that do not depend on other rules.
    fn check(&self) -> Result<(), ConfigError> {
        if self.output().trim().is_empty() {
            return Err(self.invalid("output name is empty"));
        }
        match self {
            EnrichRuleSpec::Union { sources, .. } if sources.len() < 2 => {
                Err(self.invalid("a union needs at least two source fields"))
            }
            EnrichRuleSpec::Ordinal { scale, .. } if scale.is_empty() => Err(self.invalid("ordinal scale is empty")),
            EnrichRuleSpec::WeightedSum { terms, .. } if terms.is_empty() => {
                Err(self.invalid("a weighted sum needs at least one term"))
            }
            EnrichRuleSpec::Bucket { bounds, otherwise, .. } => {
                if otherwise.trim().is_empty() {
                    return Err(self.invalid("bucket 'otherwise' label is empty"));
                }
                if bounds.windows(2).any(|w| w[0].below >= w[1].below) {
                    return Err(self.invalid("bucket bounds must be strictly increasing"));
                }
                Ok(())
            }
            EnrichRuleSpec::Classify { labels, fallback, .. } => {
                if fallback.trim().is_empty() {
                    return Err(self.invalid("classification fallback label is empty"));
                }
                for label in labels {
                    if label.label.trim().is_empty() {
                        return Err(self.invalid("classification label is empty"));
                    }
                    if label.fields.is_empty() || (label.keywords.is_empty() && label.values.is_empty()) {
                        return Err(self.invalid(&format!(
                            "label '{}' needs fields and at least one keyword or value",
                            label.label
                        )));
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Lower-case configured match values so they compare against
    /// normalized text.
    fn normalized(&self) -> Self {
        let lower = |values: &[String]| values.iter().map(|v| v.trim().to_lowercase()).collect::<Vec<_>>();
        match self {
            EnrichRuleSpec::Ordinal { output, source, scale } => EnrichRuleSpec::Ordinal {
                output: output.clone(),
                source: source.clone(),
                scale: scale.iter().map(|(k, v)| (k.trim().to_lowercase(), *v)).collect(),
            },
            EnrichRuleSpec::Flag { output, source, none_values } => EnrichRuleSpec::Flag {
                output: output.clone(),
                source: source.clone(),
                none_values: lower(none_values),
            },
            EnrichRuleSpec::Classify { output, labels, fallback } => EnrichRuleSpec::Classify {
                output: output.clone(),
                labels: labels
                    .iter()
                    .map(|l| LabelRule {
                        label: l.label.clone(),
                        fields: l.fields.clone(),
                        keywords: lower(&l.keywords),
                        values: lower(&l.values),
                    })
                    .collect(),
                fallback: fallback.clone(),
            },
            other => other.clone(),
        }
    }
}

/// Enrichment rules compiled into evaluation order
#[derive(Debug, Clone, Default)]
pub struct EnrichmentRuleSet {
    rules: Vec<EnrichRuleSpec>,
}

impl EnrichmentRuleSet {
    /// Validate the rules against the declared fields and sort them by
    /// dependency.
    pub fn compile(specs: &[EnrichRuleSpec], fields: &FieldRuleSet) -> Result<Self, ConfigError> {
        for spec in specs {
            spec.check()?;
        }
        let base: HashSet<&str> = fields.rules().iter().map(|r| r.name.as_str()).collect();
        let shapes: Vec<plan::RuleShape<'_>> = specs
            .iter()
            .map(|s| plan::RuleShape {
                output: s.output(),
                inputs: s.inputs(),
            })
            .collect();
        let ordered = plan::order(&base, &shapes)?;
        Ok(Self {
            rules: ordered.into_iter().map(|i| specs[i].normalized()).collect(),
        })
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[EnrichRuleSpec] {
        &self.rules
    }

    pub fn outputs(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(EnrichRuleSpec::output)
    }
}

/// Trait for extending normalized records with derived attributes
pub trait Enricher {
    /// Append derived fields and stamp provenance. `processed_at` is the
    /// wall-clock time the caller observed for this record.
    fn enrich(&self, record: NormalizedRecord, source: &SourceMetadata, processed_at: DateTime<Utc>) -> CanonicalRecord;
}

/// Enricher that evaluates an [`EnrichmentRuleSet`]
#[derive(Debug, Clone)]
pub struct RuleEnricher {
    rules: EnrichmentRuleSet,
}

impl RuleEnricher {
    pub fn new(rules: EnrichmentRuleSet) -> Self {
        Self { rules }
    }
}

impl Enricher for RuleEnricher {
    fn enrich(
        &self,
        record: NormalizedRecord,
        source: &SourceMetadata,
        processed_at: DateTime<Utc>,
    ) -> CanonicalRecord {
        let mut fields: Vec<(String, CanonicalValue)> = record.fields;
        for rule in self.rules.rules() {
            // A re-imported export carries stale derived values
            fields.retain(|(name, _)| name != rule.output());
            if let Some(value) = derive::evaluate(rule, &fields) {
                fields.push((rule.output().to_string(), value));
            }
        }

        CanonicalRecord::new(
            fields,
            Provenance {
                data_source: source.origin.clone(),
                scraped_at: record.scraped_at.unwrap_or(source.fetched_at),
                processed_at,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::validate::{FieldKind, FieldRuleSpec};
    use chrono::TimeZone;

    fn field_rules() -> FieldRuleSet {
        FieldRuleSet::compile(&[
            FieldRuleSpec::new("name", FieldKind::Text).required(),
            FieldRuleSpec::new("level", FieldKind::Text),
            FieldRuleSpec::new("category", FieldKind::Text),
            FieldRuleSpec::new("equipment", FieldKind::Text),
            FieldRuleSpec::new("primaryMuscles", FieldKind::List),
            FieldRuleSpec::new("secondaryMuscles", FieldKind::List),
            FieldRuleSpec::new("instructions", FieldKind::List),
        ])
        .unwrap()
    }

    fn exercise_enrichment() -> Vec<EnrichRuleSpec> {
        vec![
            EnrichRuleSpec::Count {
                output: "muscle_count".to_string(),
                source: "all_muscles".to_string(),
            },
            EnrichRuleSpec::Union {
                output: "all_muscles".to_string(),
                sources: vec!["primaryMuscles".to_string(), "secondaryMuscles".to_string()],
            },
            EnrichRuleSpec::Ordinal {
                output: "difficulty_score".to_string(),
                source: "level".to_string(),
                scale: [("Beginner", 1), ("intermediate", 2), ("expert", 3)]
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
            },
            EnrichRuleSpec::Count {
                output: "instruction_count".to_string(),
                source: "instructions".to_string(),
            },
            EnrichRuleSpec::WeightedSum {
                output: "complexity_score".to_string(),
                terms: vec![
                    WeightedTerm {
                        field: "difficulty_score".to_string(),
                        weight: 1.0,
                    },
                    WeightedTerm {
                        field: "instruction_count".to_string(),
                        weight: 0.1,
                    },
                ],
                round: Some(2),
            },
            EnrichRuleSpec::Flag {
                output: "requires_equipment".to_string(),
                source: "equipment".to_string(),
                none_values: vec!["body only".to_string(), "none".to_string()],
            },
            EnrichRuleSpec::Classify {
                output: "movement_type".to_string(),
                labels: vec![
                    LabelRule {
                        label: "push".to_string(),
                        fields: vec!["name".to_string()],
                        keywords: vec!["push".to_string(), "press".to_string()],
                        values: vec![],
                    },
                    LabelRule {
                        label: "pull".to_string(),
                        fields: vec!["name".to_string()],
                        keywords: vec!["pull".to_string(), "row".to_string()],
                        values: vec![],
                    },
                    LabelRule {
                        label: "cardio".to_string(),
                        fields: vec!["category".to_string()],
                        keywords: vec![],
                        values: vec!["cardio".to_string()],
                    },
                ],
                fallback: "other".to_string(),
            },
        ]
    }

    fn normalized(fields: Vec<(&str, CanonicalValue)>) -> NormalizedRecord {
        NormalizedRecord {
            position: 0,
            scraped_at: None,
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }

    fn text(s: &str) -> CanonicalValue {
        CanonicalValue::Text(s.to_string())
    }

    fn list(items: &[&str]) -> CanonicalValue {
        CanonicalValue::List(items.iter().map(|s| s.to_string()).collect())
    }

    fn source() -> SourceMetadata {
        SourceMetadata::new("ExerciseDB", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_rules_sorted_by_dependency() {
        let set = EnrichmentRuleSet::compile(&exercise_enrichment(), &field_rules()).unwrap();
        let outputs: Vec<&str> = set.outputs().collect();
        let union_at = outputs.iter().position(|o| *o == "all_muscles").unwrap();
        let count_at = outputs.iter().position(|o| *o == "muscle_count").unwrap();
        assert!(union_at < count_at);
    }

    #[test]
    fn test_exercise_derivations() {
        let set = EnrichmentRuleSet::compile(&exercise_enrichment(), &field_rules()).unwrap();
        let enricher = RuleEnricher::new(set);
        let record = normalized(vec![
            ("name", text("barbell bench press")),
            ("level", text("expert")),
            ("category", text("strength")),
            ("equipment", text("barbell")),
            ("primaryMuscles", list(&["chest", "triceps"])),
            ("secondaryMuscles", list(&["triceps", "shoulders"])),
            ("instructions", list(&["a", "b", "c"])),
        ]);
        let now = Utc::now();
        let out = enricher.enrich(record, &source(), now);

        assert_eq!(out.get("all_muscles"), Some(&list(&["chest", "triceps", "shoulders"])));
        assert_eq!(out.get("muscle_count"), Some(&CanonicalValue::Integer(3)));
        assert_eq!(out.get("difficulty_score"), Some(&CanonicalValue::Integer(3)));
        assert_eq!(out.get("complexity_score"), Some(&CanonicalValue::Number(3.3)));
        assert_eq!(out.get("requires_equipment"), Some(&CanonicalValue::Bool(true)));
        assert_eq!(out.get("movement_type"), Some(&text("push")));
        assert_eq!(out.provenance.processed_at, now);
        assert_eq!(out.provenance.data_source, "ExerciseDB");
    }

    #[test]
    fn test_original_fields_come_first() {
        let set = EnrichmentRuleSet::compile(&exercise_enrichment(), &field_rules()).unwrap();
        let out = RuleEnricher::new(set).enrich(
            normalized(vec![("name", text("plank")), ("category", text("strength"))]),
            &source(),
            Utc::now(),
        );
        let names: Vec<&str> = out.field_names().collect();
        assert_eq!(&names[..2], &["name", "category"]);
        assert_eq!(out.get("movement_type"), Some(&text("other")));
        assert_eq!(out.get("requires_equipment"), Some(&CanonicalValue::Bool(false)));
    }

    #[test]
    fn test_category_value_label() {
        let set = EnrichmentRuleSet::compile(&exercise_enrichment(), &field_rules()).unwrap();
        let out = RuleEnricher::new(set).enrich(
            normalized(vec![("name", text("jogging")), ("category", text("cardio"))]),
            &source(),
            Utc::now(),
        );
        assert_eq!(out.get("movement_type"), Some(&text("cardio")));
    }

    #[test]
    fn test_unknown_reference_fails_compile() {
        let specs = vec![EnrichRuleSpec::Count {
            output: "n".to_string(),
            source: "nope".to_string(),
        }];
        assert!(matches!(
            EnrichmentRuleSet::compile(&specs, &field_rules()),
            Err(ConfigError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_single_source_union_fails_compile() {
        let specs = vec![EnrichRuleSpec::Union {
            output: "all".to_string(),
            sources: vec!["primaryMuscles".to_string()],
        }];
        assert!(matches!(
            EnrichmentRuleSet::compile(&specs, &field_rules()),
            Err(ConfigError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_record_scrape_time_wins_over_batch() {
        let set = EnrichmentRuleSet::compile(&[], &field_rules()).unwrap();
        let scraped = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut record = normalized(vec![("name", text("plank"))]);
        record.scraped_at = Some(scraped);
        let out = RuleEnricher::new(set).enrich(record, &source(), Utc::now());
        assert_eq!(out.provenance.scraped_at, scraped);
    }

    #[test]
    fn test_stale_derived_value_is_replaced() {
        let set = EnrichmentRuleSet::compile(&exercise_enrichment(), &field_rules()).unwrap();
        let out = RuleEnricher::new(set).enrich(
            normalized(vec![
                ("name", text("plank")),
                ("primaryMuscles", list(&["abdominals"])),
                ("muscle_count", text("7")),
            ]),
            &source(),
            Utc::now(),
        );
        assert_eq!(out.get("muscle_count"), Some(&CanonicalValue::Integer(1)));
        assert_eq!(out.field_names().filter(|n| *n == "muscle_count").count(), 1);
    }
}
