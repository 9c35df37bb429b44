//! Tagged property values extracted from element property sets.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A single extracted property value.
///
/// Serializes externally tagged (`{"number": 2.5}`). Deserialization also
/// accepts the raw forms found in source documents: bare strings, numbers
/// and booleans, and `{"ref": "<id>"}` for references. Anything else is
/// kept verbatim as `Unknown`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Reference(String),
    Unknown(String),
}

impl PropertyValue {
    pub fn from_raw(value: &Value) -> Self {
        match value {
            Value::String(s) => PropertyValue::Text(s.clone()),
            Value::Bool(b) => PropertyValue::Boolean(*b),
            Value::Number(n) => match n.as_f64() {
                Some(f) => PropertyValue::Number(f),
                None => PropertyValue::Unknown(n.to_string()),
            },
            Value::Object(map) if map.len() == 1 => {
                let Some((key, inner)) = map.iter().next() else {
                    return PropertyValue::Unknown(value.to_string());
                };
                match (key.as_str(), inner) {
                    ("text", Value::String(s)) => PropertyValue::Text(s.clone()),
                    ("number", Value::Number(n)) => match n.as_f64() {
                        Some(f) => PropertyValue::Number(f),
                        None => PropertyValue::Unknown(n.to_string()),
                    },
                    ("boolean", Value::Bool(b)) => PropertyValue::Boolean(*b),
                    ("reference" | "ref", Value::String(s)) => PropertyValue::Reference(s.clone()),
                    ("unknown", Value::String(s)) => PropertyValue::Unknown(s.clone()),
                    _ => PropertyValue::Unknown(value.to_string()),
                }
            }
            other => PropertyValue::Unknown(other.to_string()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, PropertyValue::Unknown(_))
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(PropertyValue::from_raw(&value))
    }
}

/// A named group of properties attached to an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_primitives() {
        assert_eq!(
            PropertyValue::from_raw(&json!("Concrete")),
            PropertyValue::Text("Concrete".to_string())
        );
        assert_eq!(PropertyValue::from_raw(&json!(2.5)), PropertyValue::Number(2.5));
        assert_eq!(PropertyValue::from_raw(&json!(true)), PropertyValue::Boolean(true));
    }

    #[test]
    fn test_raw_reference() {
        assert_eq!(
            PropertyValue::from_raw(&json!({"ref": "2O2Fr$t4X7Zf8NOew3FLOH"})),
            PropertyValue::Reference("2O2Fr$t4X7Zf8NOew3FLOH".to_string())
        );
    }

    #[test]
    fn test_unparseable_values_are_unknown() {
        assert!(PropertyValue::from_raw(&json!(null)).is_unknown());
        assert!(PropertyValue::from_raw(&json!([1, 2])).is_unknown());
        assert!(PropertyValue::from_raw(&json!({"a": 1, "b": 2})).is_unknown());
    }

    #[test]
    fn test_serialized_form_reads_back() {
        let values = vec![
            PropertyValue::Text("x".to_string()),
            PropertyValue::Number(-4.0),
            PropertyValue::Boolean(false),
            PropertyValue::Reference("abc".to_string()),
            PropertyValue::Unknown("[1]".to_string()),
        ];
        let json = serde_json::to_string(&values).unwrap();
        let back: Vec<PropertyValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, values);
    }

    #[test]
    fn test_property_set_deserializes_raw_document_form() {
        let set: PropertySet = serde_json::from_value(json!({
            "name": "Pset_WallCommon",
            "properties": {"IsExternal": true, "FireRating": "F90", "Width": 0.3}
        }))
        .unwrap();
        assert_eq!(set.properties.len(), 3);
        assert_eq!(set.properties["IsExternal"], PropertyValue::Boolean(true));
    }
}
