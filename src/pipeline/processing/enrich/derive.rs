use crate::domain::CanonicalValue;

use super::EnrichRuleSpec;

fn lookup<'a>(fields: &'a [(String, CanonicalValue)], name: &str) -> Option<&'a CanonicalValue> {
    fields.iter().find(|(k, _)| k == name).map(|(_, v)| v)
}

fn numeric(fields: &[(String, CanonicalValue)], name: &str) -> Option<f64> {
    lookup(fields, name).and_then(CanonicalValue::as_f64)
}

fn round_to(value: f64, digits: Option<u32>) -> f64 {
    match digits {
        Some(d) => {
            let factor = 10f64.powi(d as i32);
            (value * factor).round() / factor
        }
        None => value,
    }
}

/// Text views of a field used for keyword and value matching
fn texts(value: Option<&CanonicalValue>) -> Vec<String> {
    match value {
        Some(CanonicalValue::Text(s)) => vec![s.to_lowercase()],
        Some(CanonicalValue::List(items)) => items.iter().map(|i| i.to_lowercase()).collect(),
        _ => Vec::new(),
    }
}

/// Evaluate one rule against the fields computed so far. `None` leaves the
/// output absent.
pub(super) fn evaluate(rule: &EnrichRuleSpec, fields: &[(String, CanonicalValue)]) -> Option<CanonicalValue> {
    match rule {
        EnrichRuleSpec::Union { sources, .. } => {
            let mut union: Vec<String> = Vec::new();
            for source in sources {
                if let Some(items) = lookup(fields, source).and_then(CanonicalValue::as_list) {
                    for item in items {
                        if !union.contains(item) {
                            union.push(item.clone());
                        }
                    }
                }
            }
            Some(CanonicalValue::List(union))
        }
        EnrichRuleSpec::Count { source, .. } => match lookup(fields, source) {
            Some(CanonicalValue::List(items)) => Some(CanonicalValue::Integer(items.len() as i64)),
            None => Some(CanonicalValue::Integer(0)),
            Some(_) => None,
        },
        EnrichRuleSpec::Ordinal { source, scale, .. } => lookup(fields, source)
            .and_then(CanonicalValue::as_text)
            .and_then(|s| scale.get(&s.trim().to_lowercase()))
            .map(|v| CanonicalValue::Integer(*v)),
        EnrichRuleSpec::WeightedSum { terms, round, .. } => {
            let mut sum = 0.0;
            for term in terms {
                sum += numeric(fields, &term.field)? * term.weight;
            }
            Some(CanonicalValue::Number(round_to(sum, *round)))
        }
        EnrichRuleSpec::Ratio {
            numerator,
            denominator,
            round,
            ..
        } => {
            let n = numeric(fields, numerator)?;
            let d = numeric(fields, denominator)?;
            if d == 0.0 {
                return None;
            }
            Some(CanonicalValue::Number(round_to(n / d, *round)))
        }
        EnrichRuleSpec::Flag { source, none_values, .. } => {
            let present = match lookup(fields, source) {
                None => false,
                Some(CanonicalValue::Text(s)) => {
                    let s = s.trim().to_lowercase();
                    !s.is_empty() && !none_values.contains(&s)
                }
                Some(CanonicalValue::List(items)) => items
                    .iter()
                    .any(|i| !none_values.contains(&i.trim().to_lowercase())),
                Some(CanonicalValue::Bool(b)) => *b,
                Some(_) => true,
            };
            Some(CanonicalValue::Bool(present))
        }
        EnrichRuleSpec::Bucket {
            source, bounds, otherwise, ..
        } => {
            let value = numeric(fields, source)?;
            let label = bounds
                .iter()
                .find(|b| value < b.below)
                .map(|b| b.label.as_str())
                .unwrap_or(otherwise);
            Some(CanonicalValue::Text(label.to_string()))
        }
        EnrichRuleSpec::Classify { labels, fallback, .. } => {
            for label in labels {
                let matched = label.fields.iter().any(|field| {
                    texts(lookup(fields, field)).iter().any(|text| {
                        label.keywords.iter().any(|k| text.contains(k.as_str()))
                            || label.values.iter().any(|v| v == text)
                    })
                });
                if matched {
                    return Some(CanonicalValue::Text(label.label.clone()));
                }
            }
            Some(CanonicalValue::Text(fallback.clone()))
        }
    }
}
