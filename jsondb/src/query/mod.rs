use crate::document::{normalize, Document, ID_FIELD};
use serde_json::{Map, Number, Value};

/// A conjunction of `field == value` constraints.
///
/// An empty query matches every document. A field that is absent or null in
/// the document never matches, whatever the expected value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    constraints: Map<String, Value>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// The empty query.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::new().field(ID_FIELD, Value::String(id.into()))
    }

    /// Add a constraint, replacing any earlier one on the same field.
    pub fn field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = constraint_value(&field, value.into());
        self.constraints.insert(field, value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> &Map<String, Value> {
        &self.constraints
    }

    pub fn matches(&self, doc: &Document) -> bool {
        if self.is_empty() {
            return true;
        }
        self.constraints.iter().all(|(field, expected)| match doc.get(field) {
            Some(actual) if !actual.is_null() => strict_eq(actual, expected),
            _ => false,
        })
    }
}

impl From<Map<String, Value>> for Query {
    fn from(constraints: Map<String, Value>) -> Self {
        constraints.into_iter().collect()
    }
}

/// Objects become constraints, `null` is the empty query, and any other
/// value is treated like a document payload: `{ "value": <input> }`.
impl From<Value> for Query {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Query::all(),
            other => Query::from(normalize(other)),
        }
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Query::new(), |query, (k, v)| query.field(k, v))
    }
}

/// Documents store numeric identifiers as their decimal string, so an id
/// constraint is converted the same way.
fn constraint_value(field: &str, value: Value) -> Value {
    match value {
        Value::Number(n) if field == ID_FIELD => Value::String(n.to_string()),
        other => other,
    }
}

/// True if every named field is present with a non-null value.
pub fn contains_fields<S: AsRef<str>>(doc: &Document, fields: &[S]) -> bool {
    fields.iter().all(|field| doc.has_field(field.as_ref()))
}

/// Type-and-value equality.
///
/// Numbers compare by value regardless of their integer or float
/// representation (`1` equals `1.0`); strings never equal numbers; objects and
/// arrays compare structurally.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => number_eq(x, y),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| strict_eq(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| strict_eq(x, y)))
        }
        _ => a == b,
    }
}

fn number_eq(x: &Number, y: &Number) -> bool {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) {
        return a == b;
    }
    match (x.as_f64(), y.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
