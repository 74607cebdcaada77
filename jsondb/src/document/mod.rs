// Document model - an identifier plus a schema-less field map

pub mod callback;

use crate::config::IdStrategy;
use crate::error::{JsonDbError, Result};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

pub use callback::{callback_ref, parse_callback_ref, Callback, CallbackRegistry};

/// Name of the identifier field every document carries.
pub const ID_FIELD: &str = "id";

/// Field that holds a scalar or sequence input after normalization.
pub const VALUE_FIELD: &str = "value";

const LEGACY_FUNCTION_PREFIX: &str = "/Function(";
const LEGACY_FUNCTION_SUFFIX: &str = ")/";

/// A stored record. `fields["id"]` always equals `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    fields: Map<String, Value>,
}

impl Document {
    /// Build a document from any JSON value, generating a UUID if no id is present.
    pub fn new(data: impl Into<Value>) -> Result<Self> {
        Self::from_value(data.into(), IdStrategy::default())
    }

    /// Build a document, using `strategy` when the input carries no usable id.
    ///
    /// Non-object inputs are wrapped as `{ "value": <input> }`. A string or
    /// numeric `id` is kept (numbers are stored in their decimal string form);
    /// a missing, null or empty `id` is generated. Any other `id` type is rejected.
    pub fn from_value(data: Value, strategy: IdStrategy) -> Result<Self> {
        let fields = normalize(data);
        let id = match fields.get(ID_FIELD) {
            None | Some(Value::Null) => strategy.generate(),
            Some(Value::String(s)) if s.is_empty() => strategy.generate(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(JsonDbError::InvalidId(other.to_string())),
        };

        // id goes first so files read naturally
        let mut ordered = Map::with_capacity(fields.len() + 1);
        ordered.insert(ID_FIELD.to_string(), Value::String(id.clone()));
        for (key, value) in fields {
            if key != ID_FIELD {
                ordered.insert(key, value);
            }
        }

        Ok(Document {
            id,
            fields: ordered,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The whole field map, identifier included.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The wrapped input of a document built from a scalar or sequence.
    pub fn value(&self) -> Option<&Value> {
        self.get(VALUE_FIELD)
    }

    /// String field, or `default` when absent or not a string.
    pub fn get_string(&self, key: &str, default: &str) -> String {
        match self.get(key) {
            Some(Value::String(s)) => s.clone(),
            _ => default.to_string(),
        }
    }

    /// Integer field, or `default` when absent or not an integer.
    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key).and_then(Value::as_i64).unwrap_or(default)
    }

    /// True if `key` is present with a non-null value.
    pub fn has_field(&self, key: &str) -> bool {
        matches!(self.get(key), Some(v) if !v.is_null())
    }

    /// True if the document carries anything besides its identifier.
    pub fn has_payload(&self) -> bool {
        self.fields.keys().any(|k| k != ID_FIELD)
    }

    /// Field map with `update` laid over it. The identifier is never overwritten.
    pub fn merged(&self, update: &Map<String, Value>) -> Map<String, Value> {
        let mut merged = self.fields.clone();
        for (key, value) in update {
            if key != ID_FIELD {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }

    /// Resolve a `/Callback(name)/` field against an explicit registry.
    pub fn callback<'r>(&self, key: &str, registry: &'r CallbackRegistry) -> Option<&'r Callback> {
        let name = self.get(key)?.as_str().and_then(parse_callback_ref)?;
        registry.get(name)
    }

    /// Resolve and call a callback field with this document.
    pub fn invoke(&self, key: &str, registry: &CallbackRegistry) -> Option<Value> {
        self.callback(key, registry).map(|callback| callback(self))
    }

    /// Fields holding source text stored by older writers. These stay strings.
    pub fn legacy_function_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, v)| {
                v.as_str().is_some_and(|s| {
                    s.starts_with(LEGACY_FUNCTION_PREFIX) && s.ends_with(LEGACY_FUNCTION_SUFFIX)
                })
            })
            .map(|(k, _)| k.as_str())
            .collect()
    }

    /// Serialize the field map to its storage form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.fields)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.fields)?)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        Value::Object(doc.fields)
    }
}

/// Anything a collection accepts as an insert payload.
pub trait IntoDocument {
    fn into_document(self, strategy: IdStrategy) -> Result<Document>;
}

impl IntoDocument for Document {
    fn into_document(self, _strategy: IdStrategy) -> Result<Document> {
        Ok(self)
    }
}

impl IntoDocument for &Document {
    fn into_document(self, _strategy: IdStrategy) -> Result<Document> {
        Ok(self.clone())
    }
}

impl IntoDocument for Value {
    fn into_document(self, strategy: IdStrategy) -> Result<Document> {
        Document::from_value(self, strategy)
    }
}

impl IntoDocument for Map<String, Value> {
    fn into_document(self, strategy: IdStrategy) -> Result<Document> {
        Document::from_value(Value::Object(self), strategy)
    }
}

/// Objects pass through; every other value becomes `{ "value": <input> }`.
pub(crate) fn normalize(data: Value) -> Map<String, Value> {
    match data {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert(VALUE_FIELD.to_string(), other);
            map
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_generates_id_when_absent() {
        let doc = Document::new(json!({"name": "Alice"})).unwrap();
        assert_eq!(doc.id().len(), 36);
        assert_eq!(doc.get("id"), Some(&Value::String(doc.id().to_string())));
        assert_eq!(doc.get_string("name", ""), "Alice");
    }

    #[test]
    fn test_keeps_existing_id() {
        let doc = Document::new(json!({"id": "user-1", "name": "Alice"})).unwrap();
        assert_eq!(doc.id(), "user-1");
        let keys: Vec<&str> = doc.fields().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["id", "name"]);
    }

    #[test]
    fn test_id_moved_to_front() {
        let doc = Document::new(json!({"name": "Bob", "id": "b"})).unwrap();
        assert_eq!(doc.fields().keys().next().map(String::as_str), Some("id"));
    }

    #[test]
    fn test_numeric_id_stored_as_string() {
        let doc = Document::new(json!({"id": 7, "name": "x"})).unwrap();
        assert_eq!(doc.id(), "7");
        assert_eq!(doc.get("id"), Some(&json!("7")));
    }

    #[test]
    fn test_empty_or_null_id_regenerated() {
        let a = Document::new(json!({"id": "", "n": 1})).unwrap();
        let b = Document::new(json!({"id": null, "n": 1})).unwrap();
        assert!(!a.id().is_empty());
        assert!(!b.id().is_empty());
    }

    #[test]
    fn test_invalid_id_rejected() {
        let err = Document::new(json!({"id": {"nested": true}})).unwrap_err();
        assert!(matches!(err, JsonDbError::InvalidId(_)));
        assert!(Document::new(json!({"id": [1, 2]})).is_err());
    }

    #[test]
    fn test_scalars_are_wrapped() {
        let doc = Document::new(json!("hello")).unwrap();
        assert_eq!(doc.value(), Some(&json!("hello")));
        assert!(doc.has_payload());

        let doc = Document::new(json!([1, 2, 3])).unwrap();
        assert_eq!(doc.value(), Some(&json!([1, 2, 3])));

        let doc = Document::new(json!(42)).unwrap();
        assert_eq!(doc.get_int("value", -1), 42);
    }

    #[test]
    fn test_id_strategy_used() {
        let doc = Document::from_value(json!({"a": 1}), IdStrategy::Ulid).unwrap();
        assert_eq!(doc.id().len(), 26);
    }

    #[test]
    fn test_typed_getters_fall_back() {
        let doc = Document::new(json!({"name": "a", "age": 30, "ratio": 0.5})).unwrap();
        assert_eq!(doc.get_string("missing", "dflt"), "dflt");
        assert_eq!(doc.get_string("age", "dflt"), "dflt");
        assert_eq!(doc.get_int("age", -1), 30);
        assert_eq!(doc.get_int("name", -1), -1);
        assert_eq!(doc.get_int("ratio", -1), -1);
    }

    #[test]
    fn test_has_payload() {
        let doc = Document::new(json!({"id": "only"})).unwrap();
        assert!(!doc.has_payload());
        let doc = Document::new(json!({})).unwrap();
        assert!(!doc.has_payload());
    }

    #[test]
    fn test_has_field_ignores_null() {
        let doc = Document::new(json!({"a": null, "b": false})).unwrap();
        assert!(!doc.has_field("a"));
        assert!(doc.has_field("b"));
        assert!(!doc.has_field("c"));
    }

    #[test]
    fn test_merged_never_rewrites_id() {
        let doc = Document::new(json!({"id": "x", "a": 1, "b": 2})).unwrap();
        let update = json!({"id": "y", "b": 3, "c": 4});
        let merged = doc.merged(update.as_object().unwrap());
        assert_eq!(
            Value::Object(merged),
            json!({"id": "x", "a": 1, "b": 3, "c": 4})
        );
    }

    #[test]
    fn test_serializes_as_field_map() {
        let doc = Document::new(json!({"id": "d1", "tags": ["a"]})).unwrap();
        assert_eq!(doc.to_json().unwrap(), r#"{"id":"d1","tags":["a"]}"#);
        assert_eq!(serde_json::to_value(&doc).unwrap(), json!({"id": "d1", "tags": ["a"]}));
    }

    #[test]
    fn test_legacy_function_fields_detected() {
        let doc = Document::new(json!({
            "name": "x",
            "run": "/Function(() => 1)/",
        }))
        .unwrap();
        assert_eq!(doc.legacy_function_fields(), vec!["run"]);
        assert_eq!(doc.get_string("run", ""), "/Function(() => 1)/");
    }

    #[test]
    fn test_into_document_keeps_document_id() {
        let doc = Document::new(json!({"id": "keep", "a": 1})).unwrap();
        let again = (&doc).into_document(IdStrategy::Nanoid).unwrap();
        assert_eq!(again, doc);
    }
}
