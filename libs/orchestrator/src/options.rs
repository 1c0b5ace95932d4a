//! Install option merging.

use serde_json::{json, Value};
use svc_names::ServiceName;

/// Deep-merge `overlay` onto `base`.
///
/// Nested objects merge key by key; for any other value the overlay wins.
pub fn merge_options(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                let next = match merged.get(key) {
                    Some(existing) => merge_options(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        (_, Value::Null) => base.clone(),
        (_, other) => other.clone(),
    }
}

/// Options addressing the installed instance by its (possibly foldered) name.
pub fn service_name_options(name: &ServiceName) -> Value {
    json!({ "service": { "name": name.as_str() } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_nested() {
        let base = json!({
            "service": { "name": "kafka", "security": { "kerberos": { "enabled": false } } },
            "brokers": { "count": 3 }
        });
        let overlay = json!({
            "service": { "security": { "kerberos": { "enabled": true, "realm": "LOCAL" } } },
        });

        let merged = merge_options(&base, &overlay);
        assert_eq!(
            merged,
            json!({
                "service": {
                    "name": "kafka",
                    "security": { "kerberos": { "enabled": true, "realm": "LOCAL" } }
                },
                "brokers": { "count": 3 }
            })
        );
    }

    #[test]
    fn test_overlay_scalar_wins() {
        let merged = merge_options(&json!({ "a": { "b": 1 } }), &json!({ "a": 7 }));
        assert_eq!(merged, json!({ "a": 7 }));
    }

    #[test]
    fn test_null_overlay_keeps_base() {
        let base = json!({ "a": 1 });
        assert_eq!(merge_options(&base, &Value::Null), base);
    }

    #[test]
    fn test_service_name_options() {
        let name = ServiceName::parse("/test/integration/cassandra").unwrap();
        assert_eq!(
            service_name_options(&name),
            json!({ "service": { "name": "/test/integration/cassandra" } })
        );
    }
}
