//! Resolved tag values, and the lazy wrapper that defers out-of-line values.

use crate::tags::Type;

/// A resolved TIFF tag value.
///
/// `count == 1` values collapse to the bare scalar variant rather than a one-element `List`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Byte(u8),
    Signed(i32),
    Short(u16),
    Unsigned(u32),
    Rational(u32, u32),
    SRational(i32, i32),
    Float(f32),
    Double(f64),
    Ascii(String),
    List(Vec<Value>),
}

impl Value {
    /// Interpret this value as a single `u32`, widening from any of the unsigned integer
    /// variants. Used by tile-index math, which only ever deals in `u32`-sized counts.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Byte(v) => Some(*v as u32),
            Value::Short(v) => Some(*v as u32),
            Value::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    /// Interpret this value as a `Vec<u32>`, whether it was stored as a list or a lone scalar.
    pub fn as_u32_list(&self) -> Option<Vec<u32>> {
        match self {
            Value::List(items) => items.iter().map(Value::as_u32).collect(),
            other => other.as_u32().map(|v| vec![v]),
        }
    }

    /// Interpret this value as an `f64` list (used by `ModelPixelScale`/`ModelTiepoint`).
    pub fn as_f64_list(&self) -> Option<Vec<f64>> {
        match self {
            Value::List(items) => items.iter().map(Value::as_f64).collect(),
            other => other.as_f64().map(|v| vec![v]),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(v) => Some(*v),
            Value::Float(v) => Some(*v as f64),
            Value::Unsigned(v) => Some(*v as f64),
            Value::Short(v) => Some(*v as f64),
            Value::Byte(v) => Some(*v as f64),
            Value::Signed(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Interpret this value as an owned string (`Ascii` only).
    pub fn as_ascii(&self) -> Option<&str> {
        match self {
            Value::Ascii(s) => Some(s),
            _ => None,
        }
    }
}

/// A tag's in-memory value: either resolved, or deferred pending a later chunk fetch.
///
/// There is no reverse transition from `Resolved` back to `Deferred`.
#[derive(Debug, Clone)]
pub enum TagValue {
    Resolved(Value),
    Deferred {
        offset: u64,
        r#type: Type,
        count: u32,
    },
}

impl TagValue {
    /// The resolved value, if this tag has already been fetched.
    pub fn resolved(&self) -> Option<&Value> {
        match self {
            TagValue::Resolved(v) => Some(v),
            TagValue::Deferred { .. } => None,
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, TagValue::Deferred { .. })
    }
}
