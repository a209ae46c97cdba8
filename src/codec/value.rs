//! Typed field values carried in header and context maps.

use std::collections::BTreeMap;
use std::fmt;

/// Map from short field tag (or user key) to value.
///
/// Ordered so that encoding is deterministic.
pub type FieldMap = BTreeMap<String, FieldValue>;

/// A single tagged value.
///
/// The variant is the wire type: a `Long` is always encoded as a 64-bit
/// integer, a `Byte` as 8 bits, and so on, so decoding gives back exactly
/// the variant that was encoded.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Byte(i8),
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Map(FieldMap),
}

/// The wire type of a [`FieldValue`], without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Bool,
    Byte,
    Int,
    Long,
    Double,
    Str,
    Map,
}

impl ValueKind {
    /// Short lowercase name, used in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::Bool => "bool",
            ValueKind::Byte => "byte",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Double => "double",
            ValueKind::Str => "string",
            ValueKind::Map => "map",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FieldValue {
    /// Wire type of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            FieldValue::Bool(_) => ValueKind::Bool,
            FieldValue::Byte(_) => ValueKind::Byte,
            FieldValue::Int(_) => ValueKind::Int,
            FieldValue::Long(_) => ValueKind::Long,
            FieldValue::Double(_) => ValueKind::Double,
            FieldValue::Str(_) => ValueKind::Str,
            FieldValue::Map(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            FieldValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_byte(&self) -> Option<i8> {
        match self {
            FieldValue::Byte(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            FieldValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Whether this value may appear in a subscription filter map.
    pub fn is_filter_value(&self) -> bool {
        matches!(
            self,
            FieldValue::Str(_) | FieldValue::Int(_) | FieldValue::Long(_) | FieldValue::Bool(_)
        )
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i8> for FieldValue {
    fn from(v: i8) -> Self {
        FieldValue::Byte(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Long(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<FieldMap> for FieldValue {
    fn from(v: FieldMap) -> Self {
        FieldValue::Map(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_variant() {
        assert_eq!(FieldValue::from(1i32).kind(), ValueKind::Int);
        assert_eq!(FieldValue::from(1i64).kind(), ValueKind::Long);
        assert_eq!(FieldValue::from(1i8).kind(), ValueKind::Byte);
        assert_eq!(FieldValue::from("x").kind(), ValueKind::Str);
        assert_eq!(FieldValue::from(FieldMap::new()).kind(), ValueKind::Map);
    }

    #[test]
    fn test_filter_values() {
        assert!(FieldValue::from("a").is_filter_value());
        assert!(FieldValue::from(3i32).is_filter_value());
        assert!(FieldValue::from(3i64).is_filter_value());
        assert!(FieldValue::from(true).is_filter_value());
        assert!(!FieldValue::from(1.5).is_filter_value());
        assert!(!FieldValue::from(1i8).is_filter_value());
        assert!(!FieldValue::from(FieldMap::new()).is_filter_value());
    }

    #[test]
    fn test_accessors() {
        assert_eq!(FieldValue::Long(7).as_long(), Some(7));
        assert_eq!(FieldValue::Int(7).as_long(), None);
        assert_eq!(FieldValue::Str("dev".into()).as_str(), Some("dev"));
        assert_eq!(FieldValue::Byte(-1).as_byte(), Some(-1));
    }
}
