//! Lenient field coercion for reporting exports.
//!
//! Ad platforms export counters as numbers, numeric strings ("1,204"),
//! blanks, or garbage. A malformed counter must never halt computation,
//! so every counter is coerced to a finite, non-negative value.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Clamp a float into the valid counter domain: finite and >= 0.
pub fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        0.0
    }
}

/// Best-effort numeric reading of a JSON value; unreadable input is 0.
pub fn value_to_f64(value: &Value) -> f64 {
    let raw = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => {
            let cleaned: String = s.trim().chars().filter(|c| *c != ',').collect();
            cleaned.parse::<f64>().unwrap_or(0.0)
        }
        _ => 0.0,
    };
    non_negative(raw)
}

pub fn value_to_u64(value: &Value) -> u64 {
    let v = value_to_f64(value).trunc();
    if v >= u64::MAX as f64 {
        u64::MAX
    } else {
        v as u64
    }
}

/// Trimmed, non-empty string or `None`.
pub fn clean_name(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(value_to_f64).unwrap_or(0.0))
}

pub fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(value_to_u64).unwrap_or(0))
}

/// Optional label: empty or whitespace-only strings become `None`,
/// numeric labels (some exports emit numeric account ids) become strings.
pub fn optional_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => clean_name(Some(&s)),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Required label that tolerates null/missing/numeric input; blank becomes "".
pub fn lenient_name<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_name(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_f64() {
        assert_eq!(value_to_f64(&json!(12.5)), 12.5);
        assert_eq!(value_to_f64(&json!("1,204.5")), 1204.5);
        assert_eq!(value_to_f64(&json!(" 7 ")), 7.0);
        assert_eq!(value_to_f64(&json!("n/a")), 0.0);
        assert_eq!(value_to_f64(&json!(-3.0)), 0.0);
        assert_eq!(value_to_f64(&json!(null)), 0.0);
        assert_eq!(value_to_f64(&json!(true)), 0.0);
        assert_eq!(value_to_f64(&json!([1, 2])), 0.0);
    }

    #[test]
    fn test_value_to_u64_truncates() {
        assert_eq!(value_to_u64(&json!(12.9)), 12);
        assert_eq!(value_to_u64(&json!("300")), 300);
        assert_eq!(value_to_u64(&json!("NaN")), 0);
    }

    #[test]
    fn test_non_negative() {
        assert_eq!(non_negative(f64::NAN), 0.0);
        assert_eq!(non_negative(f64::INFINITY), 0.0);
        assert_eq!(non_negative(-0.5), 0.0);
        assert_eq!(non_negative(4.0), 4.0);
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name(Some("  Spring Sale ")), Some("Spring Sale".into()));
        assert_eq!(clean_name(Some("   ")), None);
        assert_eq!(clean_name(None), None);
    }
}
