//! Evaluation order for enrichment rules.
//!
//! Rules are sorted so each one runs after every rule producing a field it
//! reads. Among rules that are ready at the same time, declaration order
//! wins, which keeps the order stable across runs.

use std::collections::{HashMap, HashSet};

use crate::error::ConfigError;

/// The fields one rule reads and the field it writes
#[derive(Debug, Clone)]
pub struct RuleShape<'a> {
    pub output: &'a str,
    pub inputs: Vec<&'a str>,
}

/// Returns rule indices in evaluation order.
pub fn order(base_fields: &HashSet<&str>, rules: &[RuleShape<'_>]) -> Result<Vec<usize>, ConfigError> {
    let mut producers: HashMap<&str, usize> = HashMap::new();
    for (i, rule) in rules.iter().enumerate() {
        if base_fields.contains(rule.output) {
            return Err(ConfigError::ShadowedField(rule.output.to_string()));
        }
        if producers.insert(rule.output, i).is_some() {
            return Err(ConfigError::DuplicateOutput(rule.output.to_string()));
        }
    }

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(rules.len());
    for rule in rules {
        let mut rule_deps = Vec::new();
        for input in &rule.inputs {
            if base_fields.contains(input) {
                continue;
            }
            match producers.get(input) {
                Some(&j) => rule_deps.push(j),
                None => {
                    return Err(ConfigError::UnknownField {
                        rule: rule.output.to_string(),
                        field: input.to_string(),
                    })
                }
            }
        }
        deps.push(rule_deps);
    }

    let mut done = vec![false; rules.len()];
    let mut ordered = Vec::with_capacity(rules.len());
    while ordered.len() < rules.len() {
        let next = (0..rules.len()).find(|&i| !done[i] && deps[i].iter().all(|&d| done[d]));
        match next {
            Some(i) => {
                done[i] = true;
                ordered.push(i);
            }
            None => return Err(ConfigError::CircularDependency(find_cycle(rules, &deps, &done))),
        }
    }
    Ok(ordered)
}

/// Walk unfinished dependencies until a rule repeats. Every unfinished rule
/// has at least one unfinished dependency, so the walk always closes a loop.
fn find_cycle(rules: &[RuleShape<'_>], deps: &[Vec<usize>], done: &[bool]) -> Vec<String> {
    let Some(start) = (0..rules.len()).find(|&i| !done[i]) else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        let Some(&next) = deps[current].iter().find(|&&d| !done[d]) else {
            break;
        };
        if let Some(pos) = path.iter().position(|&p| p == next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| rules[i].output.to_string()).collect();
            cycle.push(rules[next].output.to_string());
            return cycle;
        }
        path.push(next);
        current = next;
    }
    path.iter().map(|&i| rules[i].output.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape<'a>(output: &'a str, inputs: &[&'a str]) -> RuleShape<'a> {
        RuleShape {
            output,
            inputs: inputs.to_vec(),
        }
    }

    #[test]
    fn test_declaration_order_kept_when_independent() {
        let base: HashSet<&str> = ["level", "equipment"].into_iter().collect();
        let rules = vec![shape("difficulty", &["level"]), shape("requires_equipment", &["equipment"])];
        assert_eq!(order(&base, &rules).unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_dependencies_run_first() {
        let base: HashSet<&str> = ["primary", "secondary"].into_iter().collect();
        let rules = vec![
            shape("count", &["all"]),
            shape("all", &["primary", "secondary"]),
        ];
        assert_eq!(order(&base, &rules).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let base: HashSet<&str> = HashSet::new();
        let rules = vec![shape("a", &["b"]), shape("b", &["a"])];
        let err = order(&base, &rules).unwrap_err();
        assert_eq!(
            err,
            ConfigError::CircularDependency(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let base: HashSet<&str> = HashSet::new();
        let rules = vec![shape("a", &["a"])];
        assert!(matches!(order(&base, &rules), Err(ConfigError::CircularDependency(_))));
    }

    #[test]
    fn test_unknown_input_is_rejected() {
        let base: HashSet<&str> = ["level"].into_iter().collect();
        let rules = vec![shape("score", &["levle"])];
        assert_eq!(
            order(&base, &rules).unwrap_err(),
            ConfigError::UnknownField {
                rule: "score".to_string(),
                field: "levle".to_string()
            }
        );
    }

    #[test]
    fn test_output_cannot_shadow_base_field() {
        let base: HashSet<&str> = ["level"].into_iter().collect();
        let rules = vec![shape("level", &[])];
        assert_eq!(order(&base, &rules).unwrap_err(), ConfigError::ShadowedField("level".to_string()));
    }
}
