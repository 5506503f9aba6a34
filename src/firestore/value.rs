//! Conversion between plain JSON and Firestore REST typed values.

use serde_json::{json, Map, Number, Value};

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                json!({ "integerValue": i.to_string() })
            } else if let Some(u) = n.as_u64() {
                json!({ "integerValue": u.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or_default() })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}

pub fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Decodes one typed value. Timestamps and references come back as strings,
/// geo points as `{latitude, longitude}`.
pub fn decode_value(value: &Value) -> Value {
    let Some(obj) = value.as_object() else {
        return Value::Null;
    };
    let Some((kind, inner)) = obj.iter().next() else {
        return Value::Null;
    };
    match kind.as_str() {
        "nullValue" => Value::Null,
        "booleanValue" => Value::Bool(inner.as_bool().unwrap_or(false)),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                other => other.as_i64(),
            };
            parsed.map(|i| Value::Number(i.into())).unwrap_or(Value::Null)
        }
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner.clone(),
        "geoPointValue" => json!({
            "latitude": inner.get("latitude").cloned().unwrap_or(json!(0.0)),
            "longitude": inner.get("longitude").cloned().unwrap_or(json!(0.0)),
        }),
        "arrayValue" => Value::Array(
            inner
                .get("values")
                .and_then(Value::as_array)
                .map(|values| values.iter().map(decode_value).collect())
                .unwrap_or_default(),
        ),
        "mapValue" => Value::Object(
            inner
                .get("fields")
                .and_then(Value::as_object)
                .map(decode_fields)
                .unwrap_or_default(),
        ),
        _ => Value::Null,
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect()
}

/// Field paths that are not plain identifiers must be backtick quoted in
/// update masks.
pub fn quote_field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_are_sent_as_strings() {
        assert_eq!(encode_value(&json!(42)), json!({ "integerValue": "42" }));
        assert_eq!(decode_value(&json!({ "integerValue": "42" })), json!(42));
    }

    #[test]
    fn nested_document_decodes() {
        let typed = json!({
            "name": { "stringValue": "Chez Nous" },
            "latitude": { "doubleValue": 48.85 },
            "has_terrace": { "booleanValue": true },
            "moments": { "arrayValue": { "values": [ { "stringValue": "Brunch" } ] } },
            "hours_structured": { "mapValue": { "fields": {
                "Lundi": { "mapValue": { "fields": { "closed": { "booleanValue": true } } } }
            } } },
            "favorite_count": { "nullValue": null },
            "server_timestamp": { "timestampValue": "2025-01-01T10:00:00Z" }
        });
        let decoded = decode_fields(typed.as_object().unwrap());
        assert_eq!(decoded["name"], json!("Chez Nous"));
        assert_eq!(decoded["latitude"], json!(48.85));
        assert_eq!(decoded["moments"], json!(["Brunch"]));
        assert_eq!(decoded["hours_structured"]["Lundi"]["closed"], json!(true));
        assert_eq!(decoded["favorite_count"], Value::Null);
        assert_eq!(decoded["server_timestamp"], json!("2025-01-01T10:00:00Z"));
    }

    #[test]
    fn empty_array_value_decodes_to_empty_list() {
        assert_eq!(decode_value(&json!({ "arrayValue": {} })), json!([]));
    }

    #[test]
    fn field_paths_are_quoted_when_needed() {
        assert_eq!(quote_field_path("favorite_count"), "favorite_count");
        assert_eq!(quote_field_path("Spécialité_TAG"), "`Spécialité_TAG`");
        assert_eq!(quote_field_path("Lignes 2 "), "`Lignes 2 `");
        assert_eq!(quote_field_path("1st"), "`1st`");
    }
}
