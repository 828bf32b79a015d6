//! Strips anything that looks like a secret out of a JSON payload before
//! it's attached to an audit record, per spec.md §4.12 ("records are
//! redacted of secrets before emission").

use serde_json::Value;

const SENSITIVE_KEY_FRAGMENTS: &[&str] =
    &["password", "secret", "token", "api_key", "apikey", "authorization", "access_key", "private_key"];

fn is_sensitive_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|fragment| lower.contains(fragment))
}

pub fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if is_sensitive_key(key) {
                    redacted.insert(key.clone(), Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key.clone(), redact(val));
                }
            }
            Value::Object(redacted)
        },
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn redacts_sensitive_keys_at_any_depth() {
        let input = json!({
            "documentId": "d1",
            "auth": {"apiKey": "sk-live-abc", "nested": {"password": "hunter2"}},
        });
        let redacted = redact(&input);
        assert_eq!(redacted["documentId"], json!("d1"));
        assert_eq!(redacted["auth"]["apiKey"], json!("[REDACTED]"));
        assert_eq!(redacted["auth"]["nested"]["password"], json!("[REDACTED]"));
    }

    #[test]
    fn leaves_ordinary_values_untouched() {
        let input = json!({"range": "A1:B2", "values": [1, 2, 3]});
        assert_eq!(redact(&input), input);
    }
}
