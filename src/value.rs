//! Decoded notification payloads.
//!
//! A [`Value`] is what a [`Decoder`](crate::decode::Decoder) produces from the raw
//! payload string of a notification, and what subscriber callbacks receive.

use serde::{Deserialize, Serialize};

/// A decoded payload value.
///
/// Covers literal primitives and nested sequences/mappings of literals.
/// Mappings keep insertion order and allow any value as key.
///
/// # Examples
///
/// ```
/// use pgnotifier::Value;
///
/// let list = Value::List(vec![Value::Int(1), Value::Int(2)]);
/// assert!(list.is_list());
/// assert_eq!(list.len(), Some(2));
/// assert_eq!(list.to_string(), "[1, 2]");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// `None`.
    None,
    /// `True` / `False`.
    Bool(bool),
    /// Integer within the `i64` range.
    Int(i64),
    /// Integer outside the `i64` range, as canonical decimal text with an
    /// optional leading `-`.
    BigInt(String),
    /// Floating point number.
    Float(f64),
    /// Text string.
    String(String),
    /// Byte string (`b'...'`).
    Bytes(Vec<u8>),
    /// List, in order.
    List(Vec<Value>),
    /// Tuple, in order.
    Tuple(Vec<Value>),
    /// Set, deduplicated, in first-seen order.
    Set(Vec<Value>),
    /// Mapping, in insertion order.
    Dict(Vec<(Value, Value)>),
}

#[allow(missing_docs)]
impl Value {
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub const fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    /// True for integers of any size.
    pub const fn is_int(&self) -> bool {
        matches!(self, Self::Int(_) | Self::BigInt(_))
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float(_))
    }

    pub const fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub const fn is_list(&self) -> bool {
        matches!(self, Self::List(_))
    }

    pub const fn is_dict(&self) -> bool {
        matches!(self, Self::Dict(_))
    }

    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub const fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Decimal text of an integer too large for `i64`.
    pub fn as_big_int(&self) -> Option<&str> {
        match self {
            Self::BigInt(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of a list, tuple or set.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Self::List(v) | Self::Tuple(v) | Self::Set(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Value, Value)]> {
        match self {
            Self::Dict(v) => Some(v),
            _ => None,
        }
    }

    /// Looks up a string key in a dict. Returns the last matching entry, since a
    /// repeated key in a literal overwrites the earlier one.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?
            .iter()
            .rev()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Number of elements for containers, `None` for scalars.
    #[must_use]
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::List(v) | Self::Tuple(v) | Self::Set(v) => Some(v.len()),
            Self::Dict(v) => Some(v.len()),
            Self::String(v) => Some(v.chars().count()),
            Self::Bytes(v) => Some(v.len()),
            _ => None,
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::BigInt(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Set(_) => "set",
            Self::Dict(_) => "dict",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::None
    }
}

fn write_seq(f: &mut std::fmt::Formatter<'_>, items: &[Value]) -> std::fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

// Single quotes unless the text contains a single quote and no double quote.
fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double {
        '"'
    } else {
        '\''
    }
}

fn write_str_repr(f: &mut std::fmt::Formatter<'_>, s: &str) -> std::fmt::Result {
    use std::fmt::Write;

    let quote = pick_quote(s.contains('\''), s.contains('"'));
    f.write_char(quote)?;
    for c in s.chars() {
        match c {
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            c if c == quote => write!(f, "\\{c}")?,
            c if c.is_control() => match u32::from(c) {
                n if n < 0x100 => write!(f, "\\x{n:02x}")?,
                n => write!(f, "\\u{n:04x}")?,
            },
            c => f.write_char(c)?,
        }
    }
    f.write_char(quote)
}

fn write_bytes_repr(f: &mut std::fmt::Formatter<'_>, bytes: &[u8]) -> std::fmt::Result {
    use std::fmt::Write;

    let quote = pick_quote(bytes.contains(&b'\''), bytes.contains(&b'"'));
    f.write_char('b')?;
    f.write_char(quote)?;
    for &b in bytes {
        match b {
            b'\\' => f.write_str("\\\\")?,
            b'\n' => f.write_str("\\n")?,
            b'\r' => f.write_str("\\r")?,
            b'\t' => f.write_str("\\t")?,
            b if char::from(b) == quote => write!(f, "\\{}", char::from(b))?,
            0x20..=0x7e => f.write_char(char::from(b))?,
            b => write!(f, "\\x{b:02x}")?,
        }
    }
    f.write_char(quote)
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::BigInt(v) => f.write_str(v),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write_str_repr(f, v),
            Self::Bytes(v) => write_bytes_repr(f, v),
            Self::List(v) => {
                f.write_str("[")?;
                write_seq(f, v)?;
                f.write_str("]")
            }
            Self::Tuple(v) => {
                f.write_str("(")?;
                write_seq(f, v)?;
                if v.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::Set(v) if v.is_empty() => f.write_str("set()"),
            Self::Set(v) => {
                f.write_str("{")?;
                write_seq(f, v)?;
                f.write_str("}")
            }
            Self::Dict(v) => {
                f.write_str("{")?;
                for (i, (k, val)) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {val}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// Convenient From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Self::None,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => Self::Int(i),
                (None, Some(u)) => Self::BigInt(u.to_string()),
                (None, None) => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            serde_json::Value::Object(map) => {
                Self::Dict(map.into_iter().map(|(k, v)| (Self::String(k), Self::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_int() {
        let val = Value::Int(42);
        assert!(val.is_int());
        assert_eq!(val.as_int(), Some(42));
        assert_eq!(val.as_float(), Some(42.0)); // Int can be read as float
        assert_eq!(val.type_name(), "int");
    }

    #[test]
    fn test_value_string() {
        let val = Value::from("hello");
        assert!(val.is_string());
        assert_eq!(val.as_str(), Some("hello"));
        assert_eq!(val.len(), Some(5));
    }

    #[test]
    fn test_value_dict_get_last_wins() {
        let val = Value::Dict(vec![
            (Value::from("id"), Value::Int(1)),
            (Value::from("op"), Value::from("insert")),
            (Value::from("id"), Value::Int(2)),
        ]);
        assert_eq!(val.get("id"), Some(&Value::Int(2)));
        assert_eq!(val.get("op").and_then(Value::as_str), Some("insert"));
        assert!(val.get("missing").is_none());
        assert!(Value::Int(1).get("id").is_none());
    }

    #[test]
    fn test_value_display_python_style() {
        let val = Value::Dict(vec![(
            Value::from("k"),
            Value::Tuple(vec![Value::None, Value::Bool(true), Value::Float(2.0)]),
        )]);
        assert_eq!(val.to_string(), "{'k': (None, True, 2.0)}");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).to_string(), "(1,)");
        assert_eq!(Value::Set(vec![]).to_string(), "set()");
    }

    #[test]
    fn test_string_repr_quoting() {
        assert_eq!(Value::from("it's").to_string(), r#""it's""#);
        assert_eq!(Value::from(r#"say "hi""#).to_string(), r#"'say "hi"'"#);
        assert_eq!(Value::from(r#"it's "x""#).to_string(), r#"'it\'s "x"'"#);
        assert_eq!(Value::from("a\nb\\c").to_string(), r"'a\nb\\c'");
        assert_eq!(Value::from("\u{1}é").to_string(), r"'\x01é'");
        assert_eq!(Value::Bytes(b"a'\xff".to_vec()).to_string(), r#"b"a'\xff""#);
    }

    #[test]
    fn test_big_int() {
        let val = Value::BigInt("-12345678901234567890".to_string());
        assert!(val.is_int());
        assert_eq!(val.as_int(), None);
        assert_eq!(val.as_big_int(), Some("-12345678901234567890"));
        assert_eq!(val.type_name(), "int");
        assert_eq!(val.to_string(), "-12345678901234567890");

        let json: serde_json::Value = serde_json::from_str("18446744073709551615").unwrap();
        assert_eq!(Value::from(json), Value::BigInt("18446744073709551615".to_string()));
    }

    #[test]
    fn test_value_from_json() {
        let json: serde_json::Value = serde_json::json!({"id": 7, "tags": ["a", null], "ratio": 0.5});
        let val = Value::from(json);
        assert_eq!(val.get("id"), Some(&Value::Int(7)));
        assert_eq!(
            val.get("tags"),
            Some(&Value::List(vec![Value::from("a"), Value::None]))
        );
        assert_eq!(val.get("ratio").and_then(Value::as_float), Some(0.5));
    }

    #[test]
    fn test_value_from_vec() {
        let val = Value::from(vec![1, 2, 3]);
        assert_eq!(val.as_seq().map(<[Value]>::len), Some(3));
        assert_eq!(val.to_string(), "[1, 2, 3]");
    }

    #[test]
    fn test_value_serde_tagged() {
        let val = Value::List(vec![Value::Int(1)]);
        let json = serde_json::to_string(&val).unwrap();
        assert!(json.contains("\"type\":\"list\""));
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, val);
    }
}
