//! Pure comparison operator helpers over `serde_json::Value`.
//!
//! Cross-type coercion rules: numeric comparisons accept numeric strings,
//! boolean/string equality accepts "true"/"false", and `contains` works on
//! both strings and arrays.

use serde_json::Value;

pub fn equal(value: &Value, target: &Value) -> bool {
    if value == target {
        return true;
    }
    match (value, target) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            match s.parse::<f64>() {
                Ok(parsed) => Some(parsed) == n.as_f64(),
                Err(_) => false,
            }
        }
        (Value::Bool(b), Value::String(s)) | (Value::String(s), Value::Bool(b)) => {
            match s.to_lowercase().as_str() {
                "true" => *b,
                "false" => !*b,
                _ => false,
            }
        }
        _ => false,
    }
}

pub fn contains(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::String(s), Value::String(t)) => s.contains(t.as_str()),
        (Value::String(s), Value::Number(n)) => s.contains(&n.to_string()),
        (Value::Array(arr), target) => arr.iter().any(|v| equal(v, target)),
        _ => false,
    }
}

pub fn starts_with(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::String(s), Value::String(t)) => s.starts_with(t.as_str()),
        _ => false,
    }
}

pub fn ends_with(value: &Value, target: &Value) -> bool {
    match (value, target) {
        (Value::String(s), Value::String(t)) => s.ends_with(t.as_str()),
        _ => false,
    }
}

/// Numeric comparison; `None` when either side is not coercible to f64.
pub fn compare(value: &Value, target: &Value) -> Option<std::cmp::Ordering> {
    let a = as_f64(value)?;
    let b = as_f64(target)?;
    a.partial_cmp(&b)
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

/// Membership: target is the candidate list.
pub fn value_in(value: &Value, target: &Value) -> bool {
    match target {
        Value::Array(arr) => arr.iter().any(|v| equal(value, v)),
        Value::String(s) => match value {
            Value::String(v) => s.split(',').map(str::trim).any(|item| item == v),
            _ => false,
        },
        _ => false,
    }
}

pub fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(arr) => arr.is_empty(),
        Value::Object(obj) => obj.is_empty(),
        _ => false,
    }
}

pub fn matches_regex(value: &Value, pattern: &Value) -> bool {
    let (Value::String(s), Value::String(p)) = (value, pattern) else {
        return false;
    };
    match regex::Regex::new(p) {
        Ok(re) => re.is_match(s),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equal_cross_type() {
        assert!(equal(&json!("42"), &json!(42)));
        assert!(equal(&json!(42), &json!("42")));
        assert!(equal(&json!("true"), &json!(true)));
        assert!(!equal(&json!("yes"), &json!(true)));
        assert!(equal(&json!(1.0), &json!(1)));
    }

    #[test]
    fn test_contains_string_and_array() {
        assert!(contains(&json!("hello world"), &json!("world")));
        assert!(!contains(&json!("hello world"), &json!("xyz")));
        assert!(contains(&json!([1, 2, 3]), &json!(2)));
        assert!(contains(&json!(["a", "b"]), &json!("a")));
        assert!(!contains(&json!([1, 2, 3]), &json!(4)));
    }

    #[test]
    fn test_starts_ends_with() {
        assert!(starts_with(&json!("hello world"), &json!("hello")));
        assert!(ends_with(&json!("hello world"), &json!("world")));
        assert!(!starts_with(&json!(42), &json!("4")));
    }

    #[test]
    fn test_compare_numeric_coercion() {
        use std::cmp::Ordering;
        assert_eq!(compare(&json!(10), &json!(5)), Some(Ordering::Greater));
        assert_eq!(compare(&json!("42"), &json!("10")), Some(Ordering::Greater));
        assert_eq!(compare(&json!("abc"), &json!(1)), None);
    }

    #[test]
    fn test_value_in() {
        assert!(value_in(&json!("b"), &json!(["a", "b", "c"])));
        assert!(!value_in(&json!("d"), &json!(["a", "b", "c"])));
        assert!(value_in(&json!(2), &json!([1, 2, 3])));
        assert!(value_in(&json!("b"), &json!("a, b, c")));
    }

    #[test]
    fn test_is_empty_various_types() {
        assert!(is_empty(&json!(null)));
        assert!(is_empty(&json!("")));
        assert!(is_empty(&json!([])));
        assert!(is_empty(&json!({})));
        assert!(!is_empty(&json!("hello")));
        assert!(!is_empty(&json!(0)));
    }

    #[test]
    fn test_matches_regex() {
        assert!(matches_regex(&json!("order-1234"), &json!(r"^order-\d+$")));
        assert!(!matches_regex(&json!("order-x"), &json!(r"^order-\d+$")));
        // Invalid patterns never match instead of erroring the dispatch.
        assert!(!matches_regex(&json!("x"), &json!("(")));
    }
}
