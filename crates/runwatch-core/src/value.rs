//! Field coercion for loosely typed upstream JSON.
//!
//! The backend emits numbers as strings, booleans as `0`/`1` and timestamps
//! with or without an offset. Every helper here returns `None` on a shape it
//! cannot use instead of failing.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|v| v.is_finite()),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

pub fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed.parse::<u64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite() && *v >= 0.0)
                    .map(|v| v as u64)
            })
        }
        _ => None,
    }
}

pub fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|v| v != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "ok" | "success" => Some(true),
            "0" | "false" | "no" | "failed" | "error" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn as_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(as_string).collect(),
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Parses RFC 3339, offset-less ISO 8601 (taken as UTC) or epoch milliseconds.
pub fn as_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(text) => parse_timestamp(text),
        Value::Number(number) => number
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Read-only view over a payload map that looks up the first present key
/// among camelCase / snake_case spellings.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn value(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter()
            .filter_map(|key| self.map.get(*key))
            .find(|value| !value.is_null())
    }

    pub fn string(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .filter_map(|key| self.map.get(*key))
            .filter_map(as_string)
            .find(|text| !text.trim().is_empty())
    }

    pub fn f64(&self, keys: &[&str]) -> Option<f64> {
        keys.iter()
            .filter_map(|key| self.map.get(*key))
            .find_map(as_f64)
    }

    pub fn u64(&self, keys: &[&str]) -> Option<u64> {
        keys.iter()
            .filter_map(|key| self.map.get(*key))
            .find_map(as_u64)
    }

    pub fn bool(&self, keys: &[&str]) -> Option<bool> {
        keys.iter()
            .filter_map(|key| self.map.get(*key))
            .find_map(as_bool)
    }

    pub fn list(&self, keys: &[&str]) -> Vec<String> {
        self.value(keys).map(as_string_list).unwrap_or_default()
    }

    pub fn objects(&self, keys: &[&str]) -> Vec<&'a Map<String, Value>> {
        match self.value(keys) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
            _ => Vec::new(),
        }
    }

    pub fn object(&self, keys: &[&str]) -> Option<&'a Map<String, Value>> {
        self.value(keys).and_then(Value::as_object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_accept_strings_and_reject_garbage() {
        assert_eq!(as_f64(&json!("12.5")), Some(12.5));
        assert_eq!(as_f64(&json!({"x": 1})), None);
        assert_eq!(as_u64(&json!(-4)), None);
        assert_eq!(as_u64(&json!("7")), Some(7));
        assert_eq!(as_u64(&json!(7.9)), Some(7));
    }

    #[test]
    fn timestamps_without_offset_are_utc() {
        let parsed = parse_timestamp("2026-02-07T21:00:00.250000").expect("naive timestamp");
        assert_eq!(parsed.timestamp_millis() % 1000, 250);
        let with_offset = parse_timestamp("2026-02-07T22:00:00+01:00").expect("rfc3339");
        assert_eq!(with_offset, parse_timestamp("2026-02-07T21:00:00").expect("naive"));
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn fields_prefer_first_present_key() {
        let payload = json!({"agent_id": "b", "agentId": "a", "count": "3"});
        let map = payload.as_object().expect("object");
        let fields = Fields::new(map);
        assert_eq!(fields.string(&["agentId", "agent_id"]).as_deref(), Some("a"));
        assert_eq!(fields.u64(&["count"]), Some(3));
        assert_eq!(fields.f64(&["missing"]), None);
    }
}
