// Value serializer
//
// Turns runtime values into depth-bounded JSON snapshots for display. The
// depth bound also makes cyclic object graphs finite.

use crate::types::SerializedValue;
use rquickjs::{Coerced, Exception, Type, Value};
use serde_json::{Map, Number};

pub const DEFAULT_MAX_DEPTH: usize = 3;
/// Array elements past this index are dropped
pub const MAX_ARRAY_ITEMS: usize = 100;
/// Object keys past this count are dropped
pub const MAX_OBJECT_KEYS: usize = 50;

pub const COLLAPSED_OBJECT: &str = "[Object]";
pub const COLLAPSED_ARRAY: &str = "[Array]";

/// One level of a value, as seen by the serializer
pub enum Shape<N> {
    Scalar(SerializedValue),
    Function(String),
    Array(Vec<Result<N, String>>),
    Object(Vec<(String, Result<N, String>)>),
    /// Container beyond the depth bound; children were not enumerated
    Collapsed(Container),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Array,
    Object,
}

/// Values the serializer can walk.
///
/// `expand` is false once the depth bound is reached, in which case
/// containers must answer `Shape::Collapsed` without touching their children.
pub trait Inspect: Sized {
    fn inspect(&self, expand: bool) -> Shape<Self>;
}

pub fn serialize<V: Inspect>(value: &V, max_depth: usize) -> SerializedValue {
    serialize_level(value, 1, max_depth)
}

fn serialize_level<V: Inspect>(value: &V, level: usize, max_depth: usize) -> SerializedValue {
    match value.inspect(level <= max_depth) {
        Shape::Scalar(v) => v,
        Shape::Function(name) => SerializedValue::String(function_placeholder(&name)),
        Shape::Collapsed(Container::Array) => SerializedValue::String(COLLAPSED_ARRAY.to_string()),
        Shape::Collapsed(Container::Object) => {
            SerializedValue::String(COLLAPSED_OBJECT.to_string())
        }
        Shape::Array(items) => SerializedValue::Array(
            items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|item| match item {
                    Ok(v) => serialize_level(v, level + 1, max_depth),
                    Err(message) => SerializedValue::String(error_placeholder(message)),
                })
                .collect(),
        ),
        Shape::Object(props) => {
            let mut map = Map::new();
            for (key, prop) in props.iter().take(MAX_OBJECT_KEYS) {
                let value = match prop {
                    Ok(v) => serialize_level(v, level + 1, max_depth),
                    Err(message) => SerializedValue::String(error_placeholder(message)),
                };
                map.insert(key.clone(), value);
            }
            SerializedValue::Object(map)
        }
    }
}

pub fn function_placeholder(name: &str) -> String {
    let name = if name.is_empty() { "anonymous" } else { name };
    format!("[Function: {}]", name)
}

pub fn error_placeholder(message: &str) -> String {
    format!("[Error: {}]", message)
}

/// JSON number for an f64; integral values come out as integers, and
/// non-finite values as their JS spelling.
pub fn number_value(n: f64) -> SerializedValue {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return SerializedValue::Number(Number::from(n as i64));
    }
    match Number::from_f64(n) {
        Some(num) => SerializedValue::Number(num),
        None if n.is_nan() => SerializedValue::String("NaN".to_string()),
        None if n > 0.0 => SerializedValue::String("Infinity".to_string()),
        None => SerializedValue::String("-Infinity".to_string()),
    }
}

impl Inspect for SerializedValue {
    fn inspect(&self, expand: bool) -> Shape<Self> {
        match self {
            SerializedValue::Array(_) if !expand => Shape::Collapsed(Container::Array),
            SerializedValue::Object(_) if !expand => Shape::Collapsed(Container::Object),
            SerializedValue::Array(items) => Shape::Array(
                items
                    .iter()
                    .take(MAX_ARRAY_ITEMS)
                    .cloned()
                    .map(Ok)
                    .collect(),
            ),
            SerializedValue::Object(map) => Shape::Object(
                map.iter()
                    .take(MAX_OBJECT_KEYS)
                    .map(|(k, v)| (k.clone(), Ok(v.clone())))
                    .collect(),
            ),
            scalar => Shape::Scalar(scalar.clone()),
        }
    }
}

impl<'js> Inspect for Value<'js> {
    fn inspect(&self, expand: bool) -> Shape<Self> {
        match self.type_of() {
            Type::Uninitialized | Type::Undefined | Type::Null => {
                Shape::Scalar(SerializedValue::Null)
            }
            Type::Bool => Shape::Scalar(SerializedValue::Bool(self.as_bool().unwrap_or(false))),
            Type::Int => Shape::Scalar(SerializedValue::from(self.as_int().unwrap_or(0))),
            Type::Float => Shape::Scalar(number_value(self.as_float().unwrap_or(f64::NAN))),
            Type::String => Shape::Scalar(SerializedValue::String(
                self.as_string()
                    .and_then(|s| s.to_string().ok())
                    .unwrap_or_default(),
            )),
            Type::Symbol => Shape::Scalar(SerializedValue::String("[Symbol]".to_string())),
            Type::BigInt => Shape::Scalar(SerializedValue::String(format!(
                "{}n",
                coerce_string(self)
            ))),
            Type::Function | Type::Constructor => Shape::Function(function_name(self)),
            Type::Exception => Shape::Scalar(SerializedValue::String(describe_error(self))),
            Type::Array if !expand => Shape::Collapsed(Container::Array),
            Type::Array => match self.as_array() {
                Some(array) => {
                    let len = array.len().min(MAX_ARRAY_ITEMS);
                    Shape::Array(
                        (0..len)
                            .map(|i| {
                                array
                                    .get::<Value<'js>>(i)
                                    .map_err(|e| crate::sandbox::error_message(self.ctx(), e))
                            })
                            .collect(),
                    )
                }
                None => Shape::Scalar(SerializedValue::Null),
            },
            _ if is_error_object(self) => {
                Shape::Scalar(SerializedValue::String(describe_error(self)))
            }
            _ if !expand => Shape::Collapsed(Container::Object),
            _ => match self.as_object() {
                Some(object) => {
                    let mut props = Vec::new();
                    for key in object.keys::<String>().take(MAX_OBJECT_KEYS) {
                        let Ok(key) = key else {
                            continue;
                        };
                        let prop = object
                            .get::<_, Value<'js>>(key.as_str())
                            .map_err(|e| crate::sandbox::error_message(self.ctx(), e));
                        props.push((key, prop));
                    }
                    Shape::Object(props)
                }
                None => Shape::Scalar(SerializedValue::String(coerce_string(self))),
            },
        }
    }
}

fn function_name(value: &Value<'_>) -> String {
    value
        .as_object()
        .and_then(|f| f.get::<_, Option<String>>("name").ok().flatten())
        .unwrap_or_default()
}

pub(crate) fn is_error_object(value: &Value<'_>) -> bool {
    value
        .as_object()
        .is_some_and(|object| Exception::from_object(object.clone()).is_some())
}

pub(crate) fn describe_error(value: &Value<'_>) -> String {
    let Some(object) = value.as_object() else {
        return coerce_string(value);
    };
    let name = object
        .get::<_, Option<String>>("name")
        .ok()
        .flatten()
        .unwrap_or_else(|| "Error".to_string());
    match Exception::from_object(object.clone()).and_then(|e| e.message()) {
        Some(message) if !message.is_empty() => format!("{}: {}", name, message),
        _ => name,
    }
}

/// `String(value)` as JS would compute it, or a marker when that throws
pub(crate) fn coerce_string(value: &Value<'_>) -> String {
    match value.get::<Coerced<String>>() {
        Ok(Coerced(s)) => s,
        Err(e) => {
            let _ = crate::sandbox::error_message(value.ctx(), e);
            "[Unprintable]".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};
    use serde_json::json;

    fn depth(value: &SerializedValue) -> usize {
        match value {
            SerializedValue::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
            SerializedValue::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    fn with_js<R>(source: &str, f: impl FnOnce(&Value<'_>) -> R) -> R {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let value: Value = ctx.eval(source).unwrap();
            f(&value)
        })
    }

    #[test]
    fn test_json_depth_bound() {
        let nested = json!({ "a": { "b": { "c": { "d": { "e": 1 } } } } });
        let out = serialize(&nested, 3);
        assert_eq!(depth(&out), 3);
        assert_eq!(out["a"]["b"]["c"], json!(COLLAPSED_OBJECT));
    }

    #[test]
    fn test_zero_depth_collapses_top_level() {
        assert_eq!(serialize(&json!([1, 2]), 0), json!(COLLAPSED_ARRAY));
        assert_eq!(serialize(&json!(7), 0), json!(7));
    }

    #[test]
    fn test_array_capped_at_limit() {
        let big: Vec<u32> = (0..200).collect();
        let out = serialize(&json!(big), 3);
        assert_eq!(out.as_array().unwrap().len(), MAX_ARRAY_ITEMS);
        assert_eq!(out[99], json!(99));
    }

    #[test]
    fn test_object_keys_capped_at_limit() {
        let mut map = Map::new();
        for i in 0..80 {
            map.insert(format!("k{:02}", i), json!(i));
        }
        let out = serialize(&SerializedValue::Object(map), 3);
        assert_eq!(out.as_object().unwrap().len(), MAX_OBJECT_KEYS);
    }

    #[test]
    fn test_number_value() {
        assert_eq!(number_value(3.0), json!(3));
        assert_eq!(number_value(0.5), json!(0.5));
        assert_eq!(number_value(f64::NAN), json!("NaN"));
        assert_eq!(number_value(f64::NEG_INFINITY), json!("-Infinity"));
    }

    #[test]
    fn test_js_cycle_is_bounded() {
        let out = with_js("const a = { name: 'a' }; a.self = a; a", |v| serialize(v, 3));
        assert_eq!(out["name"], json!("a"));
        assert_eq!(out["self"]["self"]["self"], json!(COLLAPSED_OBJECT));
        assert_eq!(depth(&out), 3);
    }

    #[test]
    fn test_js_array_of_200_keeps_100() {
        let out = with_js("Array.from({ length: 200 }, (_, i) => i)", |v| serialize(v, 3));
        assert_eq!(out.as_array().unwrap().len(), 100);
    }

    #[test]
    fn test_js_functions_are_named_placeholders() {
        let out = with_js(
            "({ named: function greet() {}, anon: (() => () => 1)() })",
            |v| serialize(v, 3),
        );
        assert_eq!(out["named"], json!("[Function: greet]"));
        assert_eq!(out["anon"], json!("[Function: anonymous]"));
    }

    #[test]
    fn test_js_throwing_getter_only_affects_that_property() {
        let out = with_js(
            "({ ok: 1, get bad() { throw new Error('boom'); }, after: 'x' })",
            |v| serialize(v, 3),
        );
        assert_eq!(out["ok"], json!(1));
        assert_eq!(out["after"], json!("x"));
        let bad = out["bad"].as_str().unwrap();
        assert!(bad.starts_with("[Error: "), "got {}", bad);
        assert!(bad.contains("boom"));
    }

    #[test]
    fn test_js_error_value() {
        let out = with_js("new TypeError('nope')", |v| serialize(v, 3));
        assert_eq!(out, json!("TypeError: nope"));
    }
}
