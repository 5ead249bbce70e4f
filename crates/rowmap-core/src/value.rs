//! Dynamic SQL values.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A dynamically-typed SQL value.
///
/// This enum represents every value a cursor can hand back and every value a
/// parameter can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    /// Exact decimal kept as its text form
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    /// Days since the Unix epoch
    Date(i32),
    /// Microseconds since midnight
    Time(i64),
    /// Microseconds since the Unix epoch
    Timestamp(i64),
    /// Microseconds since the Unix epoch, UTC
    TimestampTz(i64),
    Uuid([u8; 16]),
    Json(serde_json::Value),
    /// Native array parameter or column
    Array(Vec<Value>),
}

impl Value {
    /// Check if this value is NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get the type name of this value.
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOLEAN",
            Value::TinyInt(_) => "TINYINT",
            Value::SmallInt(_) => "SMALLINT",
            Value::Int(_) => "INTEGER",
            Value::BigInt(_) => "BIGINT",
            Value::Float(_) => "REAL",
            Value::Double(_) => "DOUBLE",
            Value::Decimal(_) => "DECIMAL",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "BLOB",
            Value::Date(_) => "DATE",
            Value::Time(_) => "TIME",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
            Value::Uuid(_) => "UUID",
            Value::Json(_) => "JSON",
            Value::Array(_) => "ARRAY",
        }
    }

    /// Integers read as `!= 0`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            Value::TinyInt(v) => Some(*v != 0),
            Value::SmallInt(v) => Some(*v != 0),
            Value::Int(v) => Some(*v != 0),
            Value::BigInt(v) => Some(*v != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(v) => Some(i64::from(*v)),
            Value::SmallInt(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::BigInt(v) => Some(*v),
            Value::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Numeric variants and parsable decimals as `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            Value::TinyInt(v) => Some(f64::from(*v)),
            Value::SmallInt(v) => Some(f64::from(*v)),
            Value::Int(v) => Some(f64::from(*v)),
            Value::BigInt(v) => Some(*v as f64),
            Value::Decimal(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Decimal(s) => Some(s),
            _ => None,
        }
    }

    /// Blob bytes, or the UTF-8 bytes of text.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Render the value for diagnostics: `<null>` or `{value} - {TYPE}`.
    pub fn describe(&self) -> String {
        match self {
            Value::Null => "<null>".to_string(),
            other => format!("{} - {}", other, other.type_name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(v) => fmt::Display::fmt(v, f),
            Value::TinyInt(v) => fmt::Display::fmt(v, f),
            Value::SmallInt(v) => fmt::Display::fmt(v, f),
            Value::Int(v) | Value::Date(v) => fmt::Display::fmt(v, f),
            Value::BigInt(v) | Value::Time(v) | Value::Timestamp(v) | Value::TimestampTz(v) => {
                fmt::Display::fmt(v, f)
            }
            Value::Float(v) => fmt::Display::fmt(v, f),
            Value::Double(v) => fmt::Display::fmt(v, f),
            Value::Decimal(s) | Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Uuid(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if matches!(i, 4 | 6 | 8 | 10) {
                        write!(f, "-")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            Value::Json(v) => write!(f, "{}", v),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => |$v:ident| $body:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $body
                }
            }
        )*
    };
}

// Unsigned integers widen to the next signed variant.
value_from! {
    bool => |v| Value::Bool(v),
    i8 => |v| Value::TinyInt(v),
    i16 => |v| Value::SmallInt(v),
    i32 => |v| Value::Int(v),
    i64 => |v| Value::BigInt(v),
    u8 => |v| Value::SmallInt(i16::from(v)),
    u16 => |v| Value::Int(i32::from(v)),
    u32 => |v| Value::BigInt(i64::from(v)),
    f32 => |v| Value::Float(v),
    f64 => |v| Value::Double(v),
    char => |v| Value::Text(v.to_string()),
    String => |v| Value::Text(v),
    &str => |v| Value::Text(v.to_owned()),
    Vec<u8> => |v| Value::Bytes(v),
    &[u8] => |v| Value::Bytes(v.to_vec()),
    [u8; 16] => |v| Value::Uuid(v),
    serde_json::Value => |v| Value::Json(v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_integers() {
        assert_eq!(Value::from(1i8), Value::TinyInt(1));
        assert_eq!(Value::from(1i16), Value::SmallInt(1));
        assert_eq!(Value::from(1i32), Value::Int(1));
        assert_eq!(Value::from(1i64), Value::BigInt(1));
        assert_eq!(Value::from(7u8), Value::SmallInt(7));
        assert_eq!(Value::from(7u32), Value::BigInt(7));
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(Some(5i32)), Value::Int(5));
        assert_eq!(Value::from(None::<i32>), Value::Null);
    }

    #[test]
    fn test_as_helpers() {
        assert_eq!(Value::Int(3).as_i64(), Some(3));
        assert_eq!(Value::Bool(true).as_i64(), Some(1));
        assert_eq!(Value::Decimal("2.5".into()).as_f64(), Some(2.5));
        assert_eq!(Value::Text("x".into()).as_str(), Some("x"));
        assert_eq!(Value::Text("x".into()).as_i64(), None);
    }

    #[test]
    fn test_describe() {
        assert_eq!(Value::Null.describe(), "<null>");
        assert_eq!(Value::Text("abc".into()).describe(), "abc - TEXT");
        assert_eq!(Value::Int(4).describe(), "4 - INTEGER");
    }

    #[test]
    fn test_uuid_display() {
        let mut bytes = [0u8; 16];
        bytes[0] = 0xab;
        bytes[15] = 0x01;
        assert_eq!(
            Value::Uuid(bytes).to_string(),
            "ab000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn test_serde_roundtrip_tagged() {
        let json = serde_json::to_string(&Value::Int(9)).unwrap();
        assert_eq!(json, r#"{"Int":9}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Value::Int(9));
    }
}
