use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::constants::{INVALID_TYPE, MALFORMED_INPUT, MISSING_FIELD, OUT_OF_RANGE};
use crate::domain::{CanonicalValue, RawRecord, RawValue};
use crate::error::ConfigError;
use crate::pipeline::tabular;

/// The value shape a field is resolved into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Text,
    Number,
    Bool,
    List,
}

/// Case handling applied to text values during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseRule {
    #[default]
    Lower,
    Preserve,
}

impl CaseRule {
    pub fn apply(&self, value: &str) -> String {
        match self {
            CaseRule::Lower => value.trim().to_lowercase(),
            CaseRule::Preserve => value.trim().to_string(),
        }
    }
}

/// Declarative description of one field, as written in a domain config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldRuleSpec {
    pub name: String,
    #[serde(default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    /// Allowed values for an enumerated text field
    #[serde(default)]
    pub allowed: Option<Vec<String>>,
    /// Substituted when an enumerated value is missing or outside `allowed`
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub case: CaseRule,
    /// Spelling variants mapped onto a canonical value
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl FieldRuleSpec {
    pub fn new(name: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn allowed(mut self, values: &[&str], default: &str) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self.default = Some(default.to_string());
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn preserve_case(mut self) -> Self {
        self.case = CaseRule::Preserve;
        self
    }

    pub fn alias(mut self, from: &str, to: &str) -> Self {
        self.aliases.insert(from.to_string(), to.to_string());
        self
    }
}

/// A compiled field rule. Allowed values, defaults and aliases are stored
/// already normalized.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub allowed: Option<HashSet<String>>,
    pub default: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub case: CaseRule,
    pub aliases: BTreeMap<String, String>,
}

impl FieldRule {
    fn compile(spec: &FieldRuleSpec) -> Result<Self, ConfigError> {
        let case = spec.case;
        let aliases: BTreeMap<String, String> = spec
            .aliases
            .iter()
            .map(|(k, v)| (case.apply(k), case.apply(v)))
            .collect();

        let allowed = spec
            .allowed
            .as_ref()
            .map(|values| values.iter().map(|v| case.apply(v)).collect::<HashSet<_>>());
        let default = spec.default.as_deref().map(|d| case.apply(d));

        if let Some(allowed) = &allowed {
            if spec.kind != FieldKind::Text {
                return Err(ConfigError::InvalidRule {
                    rule: spec.name.clone(),
                    detail: "allowed values are only supported on text fields".to_string(),
                });
            }
            match &default {
                None => {
                    return Err(ConfigError::MissingDefault {
                        field: spec.name.clone(),
                    })
                }
                Some(d) if !allowed.contains(d) => {
                    return Err(ConfigError::DefaultNotAllowed {
                        field: spec.name.clone(),
                        default: d.clone(),
                    })
                }
                Some(_) => {}
            }
        } else if default.is_some() {
            return Err(ConfigError::InvalidRule {
                rule: spec.name.clone(),
                detail: "a default requires a set of allowed values".to_string(),
            });
        }

        if spec.min.is_some() || spec.max.is_some() {
            if spec.kind != FieldKind::Number {
                return Err(ConfigError::InvalidRange {
                    field: spec.name.clone(),
                    detail: "ranges apply to number fields only".to_string(),
                });
            }
            if let (Some(min), Some(max)) = (spec.min, spec.max) {
                if min > max {
                    return Err(ConfigError::InvalidRange {
                        field: spec.name.clone(),
                        detail: format!("min {} is greater than max {}", min, max),
                    });
                }
            }
        }

        Ok(Self {
            name: spec.name.clone(),
            kind: spec.kind,
            required: spec.required,
            allowed,
            default,
            min: spec.min,
            max: spec.max,
            case,
            aliases,
        })
    }

    /// Whether a text value, once normalized and alias-mapped, falls in the
    /// allowed set. Fields without an allowed set accept everything.
    fn accepts(&self, value: &str) -> bool {
        let Some(allowed) = &self.allowed else {
            return true;
        };
        let normalized = self.case.apply(value);
        let canonical = self.aliases.get(&normalized).unwrap_or(&normalized);
        allowed.contains(canonical)
    }

    fn in_range(&self, n: f64) -> bool {
        self.min.map_or(true, |min| n >= min) && self.max.map_or(true, |max| n <= max)
    }
}

/// Ordered set of compiled field rules for one record domain
#[derive(Debug, Clone, Default)]
pub struct FieldRuleSet {
    rules: Vec<FieldRule>,
}

impl FieldRuleSet {
    pub fn compile(specs: &[FieldRuleSpec]) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(specs.len());
        for spec in specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::DuplicateField(spec.name.clone()));
            }
            rules.push(FieldRule::compile(spec)?);
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[FieldRule] {
        &self.rules
    }

    pub fn get(&self, name: &str) -> Option<&FieldRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    pub fn declares(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

/// Why a record was rejected
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    MissingField(String),
    InvalidType(String),
    OutOfRange(String),
    MalformedInput,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::MissingField(field) => write!(f, "{}:{}", MISSING_FIELD, field),
            RejectionReason::InvalidType(field) => write!(f, "{}:{}", INVALID_TYPE, field),
            RejectionReason::OutOfRange(field) => write!(f, "{}:{}", OUT_OF_RANGE, field),
            RejectionReason::MalformedInput => write!(f, "{}", MALFORMED_INPUT),
        }
    }
}

/// A field whose enumerated value was replaced by the configured default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultSubstitution {
    pub field: String,
    /// The default written into the record
    pub value: String,
    /// The value found in the source, if any
    pub original: Option<String>,
}

/// A record whose loose values have been resolved into typed values
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    pub position: usize,
    pub scraped_at: Option<DateTime<Utc>>,
    pub fields: Vec<(String, CanonicalValue)>,
}

impl ValidatedRecord {
    pub fn get(&self, field: &str) -> Option<&CanonicalValue> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }
}

/// Exactly one terminal classification per record
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Accepted(ValidatedRecord),
    AcceptedWithDefault(ValidatedRecord, Vec<DefaultSubstitution>),
    Rejected(RejectionReason),
}

impl ValidationOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, ValidationOutcome::Rejected(_))
    }

    pub fn substitutions(&self) -> &[DefaultSubstitution] {
        match self {
            ValidationOutcome::AcceptedWithDefault(_, subs) => subs,
            _ => &[],
        }
    }

    /// The validated record for accepted outcomes
    pub fn into_record(self) -> Option<ValidatedRecord> {
        match self {
            ValidationOutcome::Accepted(r) | ValidationOutcome::AcceptedWithDefault(r, _) => Some(r),
            ValidationOutcome::Rejected(_) => None,
        }
    }
}

/// Trait for classifying raw records against a rule set
pub trait Validator {
    fn validate(&self, raw: &RawRecord) -> ValidationOutcome;
}

/// Validator driven by a compiled [`FieldRuleSet`]
#[derive(Debug, Clone)]
pub struct RuleValidator {
    rules: FieldRuleSet,
}

impl RuleValidator {
    pub fn new(rules: FieldRuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &FieldRuleSet {
        &self.rules
    }
}

fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

/// Resolve a non-empty raw value into the declared kind.
fn resolve(kind: FieldKind, value: &RawValue) -> Option<CanonicalValue> {
    match (kind, value) {
        (FieldKind::Text, RawValue::Text(s)) => Some(CanonicalValue::Text(s.clone())),
        (FieldKind::Text, RawValue::Number(n)) => Some(CanonicalValue::Text(render_number(*n))),
        (FieldKind::Text, RawValue::Bool(b)) => Some(CanonicalValue::Text(b.to_string())),

        (FieldKind::Number, RawValue::Number(n)) if n.is_finite() => Some(CanonicalValue::Number(*n)),
        (FieldKind::Number, RawValue::Text(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(CanonicalValue::Number),

        (FieldKind::Bool, RawValue::Bool(b)) => Some(CanonicalValue::Bool(*b)),
        (FieldKind::Bool, RawValue::Text(s)) => parse_bool(s).map(CanonicalValue::Bool),
        (FieldKind::Bool, RawValue::Number(n)) if *n == 0.0 || *n == 1.0 => Some(CanonicalValue::Bool(*n == 1.0)),

        (FieldKind::List, RawValue::List(items)) => Some(CanonicalValue::List(items.clone())),
        (FieldKind::List, RawValue::Text(s)) => Some(CanonicalValue::List(tabular::split_list(s))),

        _ => None,
    }
}

/// Typed form of a field no rule mentions. Absent values are dropped.
fn passthrough(value: &RawValue) -> Option<CanonicalValue> {
    match value {
        RawValue::Text(s) => Some(CanonicalValue::Text(s.clone())),
        RawValue::Number(n) => Some(CanonicalValue::Number(*n)),
        RawValue::Bool(b) => Some(CanonicalValue::Bool(*b)),
        RawValue::List(items) => Some(CanonicalValue::List(items.clone())),
        RawValue::Absent => None,
    }
}

fn raw_text(value: &RawValue) -> Option<String> {
    match value {
        RawValue::Text(s) => Some(s.clone()),
        RawValue::Number(n) => Some(render_number(*n)),
        RawValue::Bool(b) => Some(b.to_string()),
        RawValue::List(items) => Some(tabular::join_list(items)),
        RawValue::Absent => None,
    }
}

impl Validator for RuleValidator {
    fn validate(&self, raw: &RawRecord) -> ValidationOutcome {
        let mut fields = Vec::with_capacity(raw.len() + self.rules.rules.len());
        let mut substitutions = Vec::new();

        for rule in &self.rules.rules {
            let value = raw.get(&rule.name);

            if value.is_empty() {
                if rule.required {
                    return ValidationOutcome::Rejected(RejectionReason::MissingField(rule.name.clone()));
                }
                if let Some(default) = &rule.default {
                    substitutions.push(DefaultSubstitution {
                        field: rule.name.clone(),
                        value: default.clone(),
                        original: None,
                    });
                    fields.push((rule.name.clone(), CanonicalValue::Text(default.clone())));
                } else if rule.kind == FieldKind::List {
                    fields.push((rule.name.clone(), CanonicalValue::List(Vec::new())));
                }
                continue;
            }

            let Some(typed) = resolve(rule.kind, value) else {
                return ValidationOutcome::Rejected(RejectionReason::InvalidType(rule.name.clone()));
            };

            let typed = match typed {
                CanonicalValue::Number(n) if !rule.in_range(n) => {
                    return ValidationOutcome::Rejected(RejectionReason::OutOfRange(rule.name.clone()));
                }
                CanonicalValue::Text(s) if !rule.accepts(&s) => {
                    // `accepts` is only false for enumerated rules, which always carry a default
                    let default = rule.default.clone().unwrap_or_default();
                    substitutions.push(DefaultSubstitution {
                        field: rule.name.clone(),
                        value: default.clone(),
                        original: raw_text(value),
                    });
                    CanonicalValue::Text(default)
                }
                other => other,
            };
            fields.push((rule.name.clone(), typed));
        }

        for (name, value) in raw.fields() {
            if self.rules.declares(name) {
                continue;
            }
            if let Some(typed) = passthrough(value) {
                fields.push((name.to_string(), typed));
            }
        }

        let record = ValidatedRecord {
            position: raw.position,
            scraped_at: raw.scraped_at,
            fields,
        };
        if substitutions.is_empty() {
            ValidationOutcome::Accepted(record)
        } else {
            ValidationOutcome::AcceptedWithDefault(record, substitutions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise_rules() -> FieldRuleSet {
        FieldRuleSet::compile(&[
            FieldRuleSpec::new("id", FieldKind::Text).required().preserve_case(),
            FieldRuleSpec::new("name", FieldKind::Text).required(),
            FieldRuleSpec::new("level", FieldKind::Text)
                .allowed(&["beginner", "intermediate", "expert"], "intermediate"),
            FieldRuleSpec::new("category", FieldKind::Text).required(),
            FieldRuleSpec::new("primaryMuscles", FieldKind::List).required(),
            FieldRuleSpec::new("secondaryMuscles", FieldKind::List),
        ])
        .unwrap()
    }

    fn push_up() -> RawRecord {
        RawRecord::new(0)
            .with("id", "Push_Up")
            .with("name", "Push-Up")
            .with("level", "beginner")
            .with("category", "strength")
            .with("primaryMuscles", vec!["chest"])
    }

    #[test]
    fn test_clean_record_is_accepted() {
        let validator = RuleValidator::new(exercise_rules());
        let outcome = validator.validate(&push_up());
        let ValidationOutcome::Accepted(record) = outcome else {
            panic!("expected Accepted, got {:?}", outcome);
        };
        assert_eq!(record.get("secondaryMuscles"), Some(&CanonicalValue::List(vec![])));
    }

    #[test]
    fn test_unknown_level_is_defaulted() {
        let validator = RuleValidator::new(exercise_rules());
        let outcome = validator.validate(&push_up().with("level", "advanced"));

        let ValidationOutcome::AcceptedWithDefault(record, subs) = outcome else {
            panic!("expected AcceptedWithDefault");
        };
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].field, "level");
        assert_eq!(subs[0].value, "intermediate");
        assert_eq!(subs[0].original.as_deref(), Some("advanced"));
        assert_eq!(record.get("level"), Some(&CanonicalValue::Text("intermediate".to_string())));
    }

    #[test]
    fn test_enumerated_comparison_ignores_case() {
        let validator = RuleValidator::new(exercise_rules());
        let outcome = validator.validate(&push_up().with("level", "  Expert "));
        assert!(matches!(outcome, ValidationOutcome::Accepted(_)));
    }

    #[test]
    fn test_missing_enumerated_field_is_defaulted() {
        let validator = RuleValidator::new(exercise_rules());
        let mut raw = push_up();
        raw.insert("level", RawValue::Absent);
        let outcome = validator.validate(&raw);
        assert_eq!(outcome.substitutions()[0].original, None);
    }

    #[test]
    fn test_first_missing_required_field_is_reported() {
        let validator = RuleValidator::new(exercise_rules());
        let raw = RawRecord::new(0).with("id", "x").with("level", "beginner");
        assert_eq!(
            validator.validate(&raw),
            ValidationOutcome::Rejected(RejectionReason::MissingField("name".to_string()))
        );
    }

    #[test]
    fn test_blank_string_and_empty_list_count_as_missing() {
        let validator = RuleValidator::new(exercise_rules());
        let blank = push_up().with("name", "   ");
        assert_eq!(
            validator.validate(&blank),
            ValidationOutcome::Rejected(RejectionReason::MissingField("name".to_string()))
        );
        let no_muscles = push_up().with("primaryMuscles", RawValue::List(vec![]));
        assert_eq!(
            validator.validate(&no_muscles),
            ValidationOutcome::Rejected(RejectionReason::MissingField("primaryMuscles".to_string()))
        );
    }

    #[test]
    fn test_number_range_and_text_coercion() {
        let rules =
            FieldRuleSet::compile(&[FieldRuleSpec::new("age", FieldKind::Number).required().range(15.0, 100.0)])
                .unwrap();
        let validator = RuleValidator::new(rules);

        let ok = validator.validate(&RawRecord::new(0).with("age", "42"));
        assert_eq!(ok.into_record().unwrap().get("age"), Some(&CanonicalValue::Number(42.0)));

        let young = validator.validate(&RawRecord::new(0).with("age", 12.0));
        assert_eq!(young, ValidationOutcome::Rejected(RejectionReason::OutOfRange("age".to_string())));

        let garbage = validator.validate(&RawRecord::new(0).with("age", "forty"));
        assert_eq!(garbage, ValidationOutcome::Rejected(RejectionReason::InvalidType("age".to_string())));
    }

    #[test]
    fn test_list_field_accepts_flattened_cell() {
        let validator = RuleValidator::new(exercise_rules());
        let outcome = validator.validate(&push_up().with("secondaryMuscles", "shoulders|triceps"));
        let record = outcome.into_record().unwrap();
        assert_eq!(
            record.get("secondaryMuscles"),
            Some(&CanonicalValue::List(vec!["shoulders".to_string(), "triceps".to_string()]))
        );
    }

    #[test]
    fn test_alias_counts_as_allowed() {
        let rules = FieldRuleSet::compile(&[FieldRuleSpec::new("gender", FieldKind::Text)
            .allowed(&["m", "f"], "f")
            .alias("male", "m")
            .alias("female", "f")])
        .unwrap();
        let validator = RuleValidator::new(rules);
        assert!(matches!(
            validator.validate(&RawRecord::new(0).with("gender", "Male")),
            ValidationOutcome::Accepted(_)
        ));
    }

    #[test]
    fn test_undeclared_fields_pass_through() {
        let validator = RuleValidator::new(exercise_rules());
        let record = validator
            .validate(&push_up().with("images", vec!["a.jpg"]))
            .into_record()
            .unwrap();
        assert_eq!(record.get("images"), Some(&CanonicalValue::List(vec!["a.jpg".to_string()])));
    }

    #[test]
    fn test_default_outside_allowed_set_fails_compile() {
        let err = FieldRuleSet::compile(&[FieldRuleSpec::new("level", FieldKind::Text).allowed(&["beginner"], "pro")])
            .unwrap_err();
        assert!(matches!(err, ConfigError::DefaultNotAllowed { .. }));
    }

    #[test]
    fn test_duplicate_field_fails_compile() {
        let spec = FieldRuleSpec::new("id", FieldKind::Text);
        let err = FieldRuleSet::compile(&[spec.clone(), spec]).unwrap_err();
        assert_eq!(err, ConfigError::DuplicateField("id".to_string()));
    }

    #[test]
    fn test_rejection_reason_labels() {
        assert_eq!(RejectionReason::MissingField("name".to_string()).to_string(), "missing-field:name");
        assert_eq!(RejectionReason::MalformedInput.to_string(), "malformed-input");
    }
}
