//! Dynamic values.
//!
//! Component state is dynamically shaped: objects gain keys, arrays grow
//! and shrink. [`Value`] is the value model the reactive wrapper operates
//! on. Containers are shared handles, so cloning a `Value` never copies an
//! object or array.

use std::fmt;
use std::rc::Rc;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

use super::context::untracked;
use super::observer::{Observer, ReactiveArray, ReactiveObject};

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(ReactiveArray),
    Object(ReactiveObject),
}

impl Value {
    /// Identity comparison used to decide whether a write changes anything.
    ///
    /// Primitives compare by value, with `NaN` equal to itself; containers
    /// compare by identity.
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// True for arrays and objects.
    pub fn is_object(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ReactiveObject> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ReactiveArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The reactive wrapper attached to this value, if any.
    pub fn observer(&self) -> Option<Observer> {
        match self {
            Value::Array(a) => a.observer(),
            Value::Object(o) => o.observer(),
            _ => None,
        }
    }

    /// Convert to JSON without tracking any reads.
    pub fn to_json(&self) -> serde_json::Value {
        untracked(|| self.to_json_inner())
    }

    fn to_json_inner(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(a) => {
                serde_json::Value::Array(a.to_vec().iter().map(Value::to_json_inner).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_inner()))
                    .collect(),
            ),
        }
    }

    /// Short human-readable rendering, used in diagnostics and text nodes.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(_) | Value::Object(_) => self.to_json().to_string(),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Array(a) => a.fmt(f),
            Value::Object(o) => o.fmt(f),
        }
    }
}

impl PartialEq for Value {
    /// Structural equality; containers compare by content, reading untracked.
    fn eq(&self, other: &Self) -> bool {
        untracked(|| structural_eq(self, other))
    }
}

fn structural_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.ptr_eq(b) || {
                let (a, b) = (a.items_untracked(), b.items_untracked());
                a.len() == b.len() && a.iter().zip(&b).all(|(x, y)| structural_eq(x, y))
            }
        }
        (Value::Object(a), Value::Object(b)) => {
            a.ptr_eq(b)
                || (a.len() == b.len()
                    && a.entries().iter().all(|(key, x)| {
                        b.get_untracked(key).is_some_and(|y| structural_eq(x, &y))
                    }))
        }
        _ => false,
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(a) => {
                let items = untracked(|| a.to_vec());
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in &items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(o) => {
                let entries = untracked(|| o.entries());
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in &entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<ReactiveArray> for Value {
    fn from(a: ReactiveArray) -> Self {
        Value::Array(a)
    }
}

impl From<ReactiveObject> for Value {
    fn from(o: ReactiveObject) -> Self {
        Value::Object(o)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(ReactiveArray::from(items))
    }
}

impl From<serde_json::Value> for Value {
    /// Builds fresh, unobserved containers.
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nan_is_the_same_value_as_nan() {
        assert!(Value::from(f64::NAN).same_value(&Value::from(f64::NAN)));
        assert!(!Value::from(1.0).same_value(&Value::from(2.0)));
        assert!(!Value::from(1.0).same_value(&Value::from("1")));
    }

    #[test]
    fn containers_compare_by_identity() {
        let a = Value::from(json!({ "x": 1 }));
        let b = Value::from(json!({ "x": 1 }));

        assert!(a.same_value(&a.clone()));
        assert!(!a.same_value(&b));
        // Structural equality still holds.
        assert_eq!(a, b);
    }

    #[test]
    fn equality_is_structural_without_json_coercion() {
        assert_ne!(Value::from(f64::NAN), Value::Null);
        assert_ne!(Value::from(f64::INFINITY), Value::Null);
        assert_ne!(Value::from(f64::NAN), Value::from(f64::NAN));
        assert_eq!(Value::from(json!({ "a": 1, "b": [true] })), Value::from(json!({ "b": [true], "a": 1 })));
        assert_ne!(Value::from(json!([1, 2])), Value::from(json!([1, 2, 3])));
        assert_ne!(Value::from(json!({ "a": 1 })), Value::from(json!({ "b": 1 })));
    }

    #[test]
    fn json_conversion_preserves_shape() {
        let source = json!({ "name": "todo", "tags": ["a", "b"], "done": false, "n": 2.5 });
        assert_eq!(Value::from(source.clone()).to_json(), source);
    }

    #[test]
    fn serializes_through_serde() {
        let value = Value::from(json!({ "items": [1, 2] }));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"items":[1.0,2.0]}"#);
    }

    #[test]
    fn display_string_for_text_nodes() {
        assert_eq!(Value::from(3.0).to_display_string(), "3");
        assert_eq!(Value::from(0.5).to_display_string(), "0.5");
        assert_eq!(Value::Null.to_display_string(), "");
    }
}
