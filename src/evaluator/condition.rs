use serde_json::Value;

use crate::schema::{Condition, ConditionLogic, ConditionOperator};

use super::operators;

/// Evaluate a condition tree against a field lookup.
///
/// The node's own test runs first; each nested condition is then folded in
/// using that child's `logic` connective (default AND), short-circuited left
/// to right.  A lookup returning `None` means the field is absent.
pub fn evaluate_condition<F>(cond: &Condition, lookup: &mut F) -> bool
where
    F: FnMut(&str) -> Option<Value>,
{
    let mut result = evaluate_leaf(cond, lookup);
    for child in &cond.conditions {
        match child.logic.unwrap_or(ConditionLogic::And) {
            ConditionLogic::And => {
                if !result {
                    return false;
                }
                result = evaluate_condition(child, lookup);
            }
            ConditionLogic::Or => {
                if result {
                    return true;
                }
                result = evaluate_condition(child, lookup);
            }
        }
    }
    result
}

fn evaluate_leaf<F>(cond: &Condition, lookup: &mut F) -> bool
where
    F: FnMut(&str) -> Option<Value>,
{
    let actual = lookup(&cond.field);
    let expected = &cond.value;

    // Existence checks do not need a resolved value.
    match cond.operator {
        ConditionOperator::Exists => return actual.is_some_and(|v| !v.is_null()),
        ConditionOperator::NotExists => return !actual.is_some_and(|v| !v.is_null()),
        _ => {}
    }

    let actual = actual.unwrap_or(Value::Null);
    match cond.operator {
        ConditionOperator::Equals => operators::equal(&actual, expected),
        ConditionOperator::NotEquals => !operators::equal(&actual, expected),
        ConditionOperator::Contains => operators::contains(&actual, expected),
        ConditionOperator::NotContains => !operators::contains(&actual, expected),
        ConditionOperator::StartsWith => operators::starts_with(&actual, expected),
        ConditionOperator::EndsWith => operators::ends_with(&actual, expected),
        ConditionOperator::GreaterThan => {
            operators::compare(&actual, expected) == Some(std::cmp::Ordering::Greater)
        }
        ConditionOperator::LessThan => {
            operators::compare(&actual, expected) == Some(std::cmp::Ordering::Less)
        }
        ConditionOperator::GreaterThanOrEqual => matches!(
            operators::compare(&actual, expected),
            Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
        ),
        ConditionOperator::LessThanOrEqual => matches!(
            operators::compare(&actual, expected),
            Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
        ),
        ConditionOperator::In => operators::value_in(&actual, expected),
        ConditionOperator::NotIn => !operators::value_in(&actual, expected),
        ConditionOperator::Regex => operators::matches_regex(&actual, expected),
        ConditionOperator::IsEmpty => operators::is_empty(&actual),
        ConditionOperator::IsNotEmpty => !operators::is_empty(&actual),
        ConditionOperator::Exists | ConditionOperator::NotExists => unreachable!(),
    }
}

/// Resolve a dotted field path ("payload.from.address") inside a JSON value.
pub fn lookup_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part)?,
            Value::Array(arr) => {
                let idx: usize = part.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload() -> Value {
        json!({
            "subject": "Weekly report ready",
            "from": {"address": "reports@example.com"},
            "attachments": ["a.pdf", "b.csv"],
            "size": 2048
        })
    }

    fn eval(cond: Condition) -> bool {
        let data = payload();
        evaluate_condition(&cond, &mut |field| lookup_path(&data, field))
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
            logic: None,
            conditions: Vec::new(),
        }
    }

    #[test]
    fn test_equals() {
        assert!(eval(cond(
            "subject",
            ConditionOperator::Equals,
            json!("Weekly report ready")
        )));
        assert!(eval(cond(
            "subject",
            ConditionOperator::NotEquals,
            json!("other")
        )));
    }

    #[test]
    fn test_contains_and_affixes() {
        assert!(eval(cond("subject", ConditionOperator::Contains, json!("report"))));
        assert!(eval(cond(
            "subject",
            ConditionOperator::NotContains,
            json!("invoice")
        )));
        assert!(eval(cond(
            "subject",
            ConditionOperator::StartsWith,
            json!("Weekly")
        )));
        assert!(eval(cond("subject", ConditionOperator::EndsWith, json!("ready"))));
    }

    #[test]
    fn test_numeric_comparisons() {
        assert!(eval(cond("size", ConditionOperator::GreaterThan, json!(1024))));
        assert!(eval(cond("size", ConditionOperator::LessThan, json!(4096))));
        assert!(eval(cond(
            "size",
            ConditionOperator::GreaterThanOrEqual,
            json!(2048)
        )));
        assert!(eval(cond(
            "size",
            ConditionOperator::LessThanOrEqual,
            json!(2048)
        )));
    }

    #[test]
    fn test_membership() {
        assert!(eval(cond(
            "from.address",
            ConditionOperator::In,
            json!(["reports@example.com", "noreply@example.com"])
        )));
        assert!(eval(cond(
            "from.address",
            ConditionOperator::NotIn,
            json!(["spam@example.com"])
        )));
    }

    #[test]
    fn test_existence() {
        assert!(eval(cond("from.address", ConditionOperator::Exists, json!(null))));
        assert!(eval(cond("cc", ConditionOperator::NotExists, json!(null))));
        assert!(!eval(cond("cc", ConditionOperator::Exists, json!(null))));
    }

    #[test]
    fn test_emptiness_and_regex() {
        assert!(eval(cond("attachments", ConditionOperator::IsNotEmpty, json!(null))));
        assert!(!eval(cond("attachments", ConditionOperator::IsEmpty, json!(null))));
        assert!(eval(cond(
            "from.address",
            ConditionOperator::Regex,
            json!(r"^reports@.*\.com$")
        )));
    }

    #[test]
    fn test_nested_and_short_circuit() {
        // subject contains "report" AND size > 10000 -> false
        let c = Condition {
            conditions: vec![cond("size", ConditionOperator::GreaterThan, json!(10000))],
            ..cond("subject", ConditionOperator::Contains, json!("report"))
        };
        assert!(!eval(c));
    }

    #[test]
    fn test_nested_or() {
        // subject contains "invoice" OR size > 1024 -> true
        let mut child = cond("size", ConditionOperator::GreaterThan, json!(1024));
        child.logic = Some(ConditionLogic::Or);
        let c = Condition {
            conditions: vec![child],
            ..cond("subject", ConditionOperator::Contains, json!("invoice"))
        };
        assert!(eval(c));
    }

    #[test]
    fn test_default_logic_is_and() {
        let child = cond("size", ConditionOperator::GreaterThan, json!(1024));
        assert!(child.logic.is_none());
        let c = Condition {
            conditions: vec![child],
            ..cond("subject", ConditionOperator::Contains, json!("report"))
        };
        assert!(eval(c));
    }

    #[test]
    fn test_lookup_path() {
        let data = payload();
        assert_eq!(
            lookup_path(&data, "from.address"),
            Some(json!("reports@example.com"))
        );
        assert_eq!(lookup_path(&data, "attachments.0"), Some(json!("a.pdf")));
        assert_eq!(lookup_path(&data, "missing.field"), None);
    }

    #[test]
    fn test_missing_field_comparisons_fail_closed() {
        assert!(!eval(cond("missing", ConditionOperator::Equals, json!("x"))));
        assert!(!eval(cond("missing", ConditionOperator::GreaterThan, json!(1))));
        assert!(eval(cond("missing", ConditionOperator::IsEmpty, json!(null))));
    }
}
