//! Report parameter values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A bound parameter value, as it arrives in request JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<ParamValue>),
}

/// Parameter map, keyed by name.
pub type Params = BTreeMap<String, ParamValue>;

impl ParamValue {
    /// Null, empty text, or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            ParamValue::Null => true,
            ParamValue::Text(s) => s.is_empty(),
            ParamValue::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ParamValue::List(_))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Stable text form: integers in decimal, booleans as `0`/`1`, floats in
    /// shortest round-trip form, lists comma-joined.
    pub fn canonical(&self) -> String {
        match self {
            ParamValue::Null => String::new(),
            ParamValue::Bool(true) => "1".to_string(),
            ParamValue::Bool(false) => "0".to_string(),
            ParamValue::Int(n) => n.to_string(),
            ParamValue::Float(f) => {
                let mut buf = ryu::Buffer::new();
                buf.format(*f).to_string()
            }
            ParamValue::Text(s) => s.clone(),
            ParamValue::List(items) => items
                .iter()
                .map(ParamValue::canonical)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Type-tagged form for cache keys: `i:7`, `b:1`, `f:0.5`, `s:text`,
    /// `l:[..]`.
    ///
    /// Values that bind differently never share a key form, so `Int(1)`,
    /// `Text("1")` and `Bool(true)` differ, as do `List(["a", "b"])` and
    /// `Text("a,b")`. Text is escaped so list elements cannot run together.
    pub fn key_form(&self) -> String {
        match self {
            ParamValue::Null => "n:".to_string(),
            ParamValue::Bool(_) => format!("b:{}", self.canonical()),
            ParamValue::Int(n) => format!("i:{}", n),
            ParamValue::Float(_) => format!("f:{}", self.canonical()),
            ParamValue::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push_str("s:");
                for c in s.chars() {
                    if matches!(c, '\\' | ',' | '[' | ']') {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out
            }
            ParamValue::List(items) => {
                let inner: Vec<String> = items.iter().map(ParamValue::key_form).collect();
                format!("l:[{}]", inner.join(","))
            }
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<i64> for ParamValue {
    fn from(n: i64) -> Self {
        ParamValue::Int(n)
    }
}

impl From<u64> for ParamValue {
    fn from(n: u64) -> Self {
        i64::try_from(n)
            .map(ParamValue::Int)
            .unwrap_or(ParamValue::Float(n as f64))
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl<T: Into<ParamValue>> From<Vec<T>> for ParamValue {
    fn from(items: Vec<T>) -> Self {
        ParamValue::List(items.into_iter().map(Into::into).collect())
    }
}

/// Request parameters layered over a definition's defaults.
pub fn merge_params(defaults: &Params, request: &Params) -> Params {
    let mut merged = defaults.clone();
    merged.extend(request.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
