//! # Request Values and Structural Ordering
//!
//! Consumers describe the resource they need with a [`Value`]: an arbitrarily
//! nested, JSON-like document. Two requests address the *same* resource when
//! they are structurally equal, regardless of how each was built.
//!
//! [`compare`] is a total order over every variant, so a plain `BTreeMap<Value, _>`
//! can serve as the resource cache. Values of different kinds are ranked by
//! their kind first:
//!
//! ```text
//! null < number < string < object < array < boolean < date < regex < undefined
//! ```
//!
//! Within a kind, numbers, strings, booleans and dates use their natural order,
//! arrays compare lexicographically (shorter prefix first), and objects compare
//! as the key-sorted sequence of their `(key, value)` pairs.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

/// A structured request (or resolved result) value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The explicit absence of a value.
    Null,
    /// Any numeric value. `NaN` sorts after every other number.
    Number(f64),
    /// A UTF-8 string.
    String(String),
    /// A plain map of string keys to values. Keys are kept sorted.
    Object(BTreeMap<String, Value>),
    /// An ordered list of values.
    Array(Vec<Value>),
    /// A boolean.
    Bool(bool),
    /// A point in time.
    Date(DateTime<Utc>),
    /// A regular expression literal, ordered by its `/source/flags` form.
    Regex {
        /// The pattern body.
        source: String,
        /// Flags such as `i` or `g`.
        flags: String,
    },
    /// A missing field, distinct from `Null`.
    Undefined,
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Object(_) => 3,
            Value::Array(_) => 4,
            Value::Bool(_) => 5,
            Value::Date(_) => 6,
            Value::Regex { .. } => 7,
            Value::Undefined => 8,
        }
    }

    /// Human readable name of the variant, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Bool(_) => "boolean",
            Value::Date(_) => "date",
            Value::Regex { .. } => "regex",
            Value::Undefined => "undefined",
        }
    }

    /// Returns `true` for `Null` and `Undefined`.
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Null | Value::Undefined)
    }

    /// Looks up a field of an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(map) => map.get(key),
            _ => None,
        }
    }

    /// Builds an object value from `(key, value)` pairs.
    pub fn object<I, K, V>(pairs: I) -> Value
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Object(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a regular expression value.
    pub fn regex(source: impl Into<String>, flags: impl Into<String>) -> Value {
        Value::Regex {
            source: source.into(),
            flags: flags.into(),
        }
    }

    fn regex_literal(source: &str, flags: &str) -> String {
        format!("/{}/{}", source, flags)
    }
}

/// Total order over [`Value`]s.
///
/// `compare(a, b) == Ordering::Equal` exactly when `a` and `b` are deeply equal.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(*x, *y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Object(x), Value::Object(y)) => compare_pairs(x, y),
        (Value::Array(x), Value::Array(y)) => compare_sequences(x, y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Date(x), Value::Date(y)) => x.cmp(y),
        (
            Value::Regex { source: xs, flags: xf },
            Value::Regex { source: ys, flags: yf },
        ) => Value::regex_literal(xs, xf).cmp(&Value::regex_literal(ys, yf)),
        // Different kinds, or two nulls / two undefineds.
        _ => a.rank().cmp(&b.rank()),
    }
}

fn compare_numbers(x: f64, y: f64) -> Ordering {
    match (x.is_nan(), y.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
    }
}

fn compare_sequences(x: &[Value], y: &[Value]) -> Ordering {
    for (left, right) in x.iter().zip(y) {
        let result = compare(left, right);
        if result != Ordering::Equal {
            return result;
        }
    }
    x.len().cmp(&y.len())
}

// Objects behave like arrays of `[key, value]` pairs sorted by key.
fn compare_pairs(x: &BTreeMap<String, Value>, y: &BTreeMap<String, Value>) -> Ordering {
    for ((left_key, left), (right_key, right)) in x.iter().zip(y) {
        let result = left_key.cmp(right_key).then_with(|| compare(left, right));
        if result != Ordering::Equal {
            return result;
        }
    }
    x.len().cmp(&y.len())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        compare(self, other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(self, other)
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null | Value::Undefined => serializer.serialize_unit(),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(item)?;
                }
                out.end()
            }
            Value::Date(date) => {
                let mut out = serializer.serialize_map(Some(1))?;
                out.serialize_entry("$date", &date.timestamp_millis())?;
                out.end()
            }
            Value::Regex { source, flags } => {
                serializer.serialize_str(&Value::regex_literal(source, flags))
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    /// Converts plain JSON. An object of the exact shape `{"$date": <millis>}`
    /// becomes a [`Value::Date`].
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(date) = map
                        .get("$date")
                        .and_then(serde_json::Value::as_i64)
                        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                    {
                        return Value::Date(date);
                    }
                }
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
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

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(date: DateTime<Utc>) -> Self {
        Value::Date(date)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Object(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    fn date(ms: i64) -> Value {
        Value::Date(Utc.timestamp_millis_opt(ms).unwrap())
    }

    #[test]
    fn ranks_kinds_in_fixed_order() {
        let ladder = vec![
            Value::Null,
            v(json!(1)),
            v(json!("a")),
            v(json!({})),
            v(json!([])),
            v(json!(true)),
            date(0),
            Value::regex("", ""),
            Value::Undefined,
        ];
        for pair in ladder.windows(2) {
            assert_eq!(compare(&pair[0], &pair[1]), Ordering::Less, "{:?} < {:?}", pair[0], pair[1]);
            assert_eq!(compare(&pair[1], &pair[0]), Ordering::Greater);
        }
        let names: Vec<&str> = ladder.iter().map(Value::kind).collect();
        assert_eq!(
            names,
            ["null", "number", "string", "object", "array", "boolean", "date", "regex", "undefined"]
        );
    }

    #[test]
    fn compares_scalars_naturally() {
        assert_eq!(compare(&v(json!(1)), &v(json!(2))), Ordering::Less);
        assert_eq!(compare(&v(json!("b")), &v(json!("a"))), Ordering::Greater);
        assert_eq!(compare(&v(json!(false)), &v(json!(true))), Ordering::Less);
        assert_eq!(compare(&date(1_546_300_800_000), &date(1_546_387_200_000)), Ordering::Less);
        assert_eq!(compare(&Value::regex("a", ""), &Value::regex("b", "")), Ordering::Less);
    }

    #[test]
    fn nan_is_equal_to_itself_and_above_other_numbers() {
        let nan = Value::Number(f64::NAN);
        assert_eq!(compare(&nan, &nan), Ordering::Equal);
        assert_eq!(compare(&v(json!(1e300)), &nan), Ordering::Less);
        assert_eq!(compare(&Value::Number(-0.0), &Value::Number(0.0)), Ordering::Equal);
    }

    #[test]
    fn compares_arrays_lexicographically() {
        assert_eq!(compare(&v(json!([])), &v(json!([]))), Ordering::Equal);
        assert_eq!(compare(&v(json!([])), &v(json!([1]))), Ordering::Less);
        assert_eq!(compare(&v(json!([1, 2, 3])), &v(json!([1, 2, 4]))), Ordering::Less);
        assert_eq!(compare(&v(json!([1, 2])), &v(json!([1, 2, 3]))), Ordering::Less);
        assert_eq!(compare(&v(json!([[1], [2], [3]])), &v(json!([[1], [2], [3]]))), Ordering::Equal);
    }

    #[test]
    fn compares_objects_by_sorted_pairs() {
        assert_eq!(compare(&v(json!({})), &v(json!({}))), Ordering::Equal);
        assert_eq!(
            compare(&v(json!({"a": 1, "b": 2})), &v(json!({"a": 1, "b": 3}))),
            Ordering::Less
        );
        assert_eq!(
            compare(&v(json!({"a": 1, "b": 1})), &v(json!({"a": 1, "c": 1}))),
            Ordering::Less
        );
        assert_eq!(
            compare(&v(json!({"a": 1})), &v(json!({"a": 1, "b": 1}))),
            Ordering::Less
        );
    }

    #[test]
    fn equality_ignores_construction_order() {
        let left = v(json!({"name": "todos", "params": {"x": 1, "y": [1, {"z": null}]}}));
        let right = Value::object([
            (
                "params",
                Value::object([
                    ("y", Value::Array(vec![Value::from(1), Value::object([("z", Value::Null)])])),
                    ("x", Value::from(1)),
                ]),
            ),
            ("name", Value::from("todos")),
        ]);
        assert_eq!(compare(&left, &right), Ordering::Equal);
        assert_eq!(left, right);
        assert_eq!(compare(&left, &left.clone()), Ordering::Equal);
    }

    #[test]
    fn converts_ejson_dates() {
        let value = v(json!({"at": {"$date": 1000}}));
        assert_eq!(value.get("at"), Some(&date(1000)));
        assert_eq!(serde_json::to_value(&value).unwrap(), json!({"at": {"$date": 1000}}));
    }

    #[test]
    fn serializes_undefined_as_null() {
        let value = Value::object([("a", Value::Undefined)]);
        assert_eq!(value.to_string(), r#"{"a":null}"#);
    }
}
