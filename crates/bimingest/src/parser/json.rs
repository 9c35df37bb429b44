//! JSON building-model documents.
//!
//! A document is a single object with optional `spatial`, `materials`,
//! `types`, `systems` and `elements` arrays. A missing collection is empty;
//! a collection that is present but not an array cannot be read at all.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::{
    Collection, ElementRecord, EntityError, EntityIter, MaterialRecord, ModelParser, ParseContext,
    ParseError, SpatialNode, SystemRecord, TypeRecord,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonModelParser;

impl JsonModelParser {
    pub fn new() -> Self {
        Self
    }
}

impl ModelParser for JsonModelParser {
    fn open(&self, bytes: &[u8]) -> Result<Box<dyn ParseContext>, ParseError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| ParseError::Malformed(format!("invalid JSON: {}", e)))?;

        match value {
            Value::Object(root) => Ok(Box::new(JsonModel { root })),
            other => Err(ParseError::Malformed(format!(
                "expected a JSON object at the document root, found {}",
                value_kind(&other)
            ))),
        }
    }
}

struct JsonModel {
    root: Map<String, Value>,
}

impl JsonModel {
    fn collection<T: DeserializeOwned + 'static>(
        &self,
        collection: Collection,
    ) -> Result<EntityIter<'_, T>, ParseError> {
        match self.root.get(collection.key()) {
            None | Some(Value::Null) => Ok(Box::new(std::iter::empty())),
            Some(Value::Array(items)) => Ok(Box::new(items.iter().map(decode_entity::<T>))),
            Some(other) => Err(ParseError::Unreadable {
                collection,
                reason: format!("expected an array, found {}", value_kind(other)),
            }),
        }
    }
}

fn decode_entity<T: DeserializeOwned>(item: &Value) -> Result<T, EntityError> {
    if item.is_null() {
        return Err(EntityError::missing("entity record is null"));
    }

    T::deserialize(item).map_err(|e| {
        let mut err = EntityError::corrupt(e.to_string());
        if let Some(id) = item.get("global_id").and_then(Value::as_str) {
            err = err.with_id(id);
        }
        if let Some(ty) = item.get("type").and_then(Value::as_str) {
            err = err.with_type(ty);
        }
        err
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl ParseContext for JsonModel {
    fn spatial_hierarchy(&self) -> Result<EntityIter<'_, SpatialNode>, ParseError> {
        self.collection(Collection::Spatial)
    }

    fn materials(&self) -> Result<EntityIter<'_, MaterialRecord>, ParseError> {
        self.collection(Collection::Materials)
    }

    fn types(&self) -> Result<EntityIter<'_, TypeRecord>, ParseError> {
        self.collection(Collection::Types)
    }

    fn systems(&self) -> Result<EntityIter<'_, SystemRecord>, ParseError> {
        self.collection(Collection::Systems)
    }

    fn elements(&self) -> Result<EntityIter<'_, ElementRecord>, ParseError> {
        self.collection(Collection::Elements)
    }
}
