//! Scalar values carried by parameter grids and result rows

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Tagged scalar: the cell type of grids, parameter sets and result rows.
///
/// Numeric values compare across tags, so `Int(3) == Float(3.0)`, and the
/// `Hash` impl agrees with that. Stores that widen integer columns to floats
/// therefore still deduplicate against integer grids. `NaN` equals `NaN` so
/// that `Eq` is lawful for exclusion sets.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Missing cell (only produced when reading rows)
    #[default]
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
}

impl Value {
    /// Short type name, used in schema inference and error messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
        }
    }

    /// True for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view; integral floats convert.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) => integral(*f),
            _ => None,
        }
    }

    /// Float view of any numeric value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// String view.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Parse a text cell (CSV import): int, then float, then bool, else string.
    /// Empty text is `Null`.
    #[must_use]
    pub fn parse_cell(text: &str) -> Self {
        if text.is_empty() {
            return Self::Null;
        }
        if let Ok(i) = text.parse::<i64>() {
            return Self::Int(i);
        }
        if let Ok(f) = text.parse::<f64>() {
            return Self::Float(f);
        }
        match text {
            "true" | "True" => Self::Bool(true),
            "false" | "False" => Self::Bool(false),
            _ => Self::Str(text.to_string()),
        }
    }
}

/// `Some(i)` when `f` is an integer representable as `i64`.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Int(i), Self::Float(f)) | (Self::Float(f), Self::Int(i)) => {
                integral(*f) == Some(*i)
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            Self::Int(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            Self::Float(f) => {
                if let Some(i) = integral(*f) {
                    2u8.hash(state);
                    i.hash(state);
                } else {
                    3u8.hash(state);
                    let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
                    bits.hash(state);
                }
            }
            Self::Str(s) => {
                4u8.hash(state);
                s.hash(state);
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            // Debug keeps the trailing ".0" so floats stay floats through CSV
            Self::Float(x) => write!(f, "{x:?}"),
            Self::Str(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Self::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(v: &Value) -> u64 {
        let mut h = DefaultHasher::new();
        v.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_numeric_cross_tag_equality() {
        assert_eq!(Value::Int(3), Value::Float(3.0));
        assert_eq!(hash_of(&Value::Int(3)), hash_of(&Value::Float(3.0)));
        assert_ne!(Value::Int(3), Value::Float(3.5));
        assert_ne!(Value::Int(1), Value::Bool(true));
    }

    #[test]
    fn test_nan_is_reflexive() {
        let nan = Value::Float(f64::NAN);
        assert_eq!(nan, nan.clone());
        assert_eq!(hash_of(&nan), hash_of(&Value::Float(-f64::NAN)));
    }

    #[test]
    fn test_negative_zero() {
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
        assert_eq!(hash_of(&Value::Float(-0.0)), hash_of(&Value::Int(0)));
    }

    #[test]
    fn test_json_untagged() {
        let values: Vec<Value> = serde_json::from_str(r#"[1, 2.5, "a", true, null]"#).unwrap();
        assert!(matches!(values[0], Value::Int(1)));
        assert!(matches!(values[1], Value::Float(_)));
        assert_eq!(values[2].as_str(), Some("a"));
        assert_eq!(values[3].as_bool(), Some(true));
        assert!(values[4].is_null());
    }

    #[test]
    fn test_parse_cell() {
        assert_eq!(Value::parse_cell("42"), Value::Int(42));
        assert!(matches!(Value::parse_cell("0.5"), Value::Float(_)));
        assert_eq!(Value::parse_cell("True"), Value::Bool(true));
        assert_eq!(Value::parse_cell("Gaussian"), Value::from("Gaussian"));
        assert!(Value::parse_cell("").is_null());
    }

    #[test]
    fn test_display_keeps_float_marker() {
        assert_eq!(Value::Float(1.0).to_string(), "1.0");
        assert_eq!(Value::Int(1).to_string(), "1");
    }
}
