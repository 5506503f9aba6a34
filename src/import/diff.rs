use serde::Serialize;
use serde_json::Value;

use crate::firestore::Fields;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Change {
    Create,
    Update { changed_fields: Vec<String> },
    Unchanged,
}

impl Change {
    pub fn label(&self) -> &'static str {
        match self {
            Change::Create => "Création",
            Change::Update { .. } => "Mise à jour",
            Change::Unchanged => "Inchangé",
        }
    }

    pub fn needs_write(&self) -> bool {
        !matches!(self, Change::Unchanged)
    }
}

/// Numbers compare by value so an integer read back from Firestore equals
/// the float that was written.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Compares the fields an import would write against the stored document.
/// Fields the import does not write (such as `favorite_count`) are ignored.
pub fn diff_fields(record: &Fields, existing: Option<&Fields>) -> Change {
    let Some(existing) = existing else {
        return Change::Create;
    };
    let changed_fields: Vec<String> = record
        .iter()
        .filter(|(key, value)| {
            !existing
                .get(key.as_str())
                .is_some_and(|current| values_equal(value, current))
        })
        .map(|(key, _)| key.clone())
        .collect();
    if changed_fields.is_empty() {
        Change::Unchanged
    } else {
        Change::Update { changed_fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn missing_document_is_created() {
        assert_eq!(diff_fields(&fields(json!({"name": "A"})), None), Change::Create);
    }

    #[test]
    fn extra_stored_fields_are_ignored() {
        let record = fields(json!({"name": "A", "latitude": 48.0, "tags": ["x"]}));
        let stored = fields(json!({"name": "A", "latitude": 48, "tags": ["x"], "favorite_count": 3}));
        assert_eq!(diff_fields(&record, Some(&stored)), Change::Unchanged);
    }

    #[test]
    fn changed_fields_are_listed() {
        let record = fields(json!({"name": "B", "hours": {"Lundi": {"closed": true}}, "phone": ""}));
        let stored = fields(json!({"name": "A", "hours": {"Lundi": {"closed": false}}}));
        let Change::Update { mut changed_fields } = diff_fields(&record, Some(&stored)) else {
            panic!("expected an update");
        };
        changed_fields.sort();
        assert_eq!(changed_fields, vec!["hours", "name", "phone"]);
        assert!(Change::Create.needs_write());
        assert!(!Change::Unchanged.needs_write());
    }
}
