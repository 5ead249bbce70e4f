//! Untyped row representation and value extraction.

use crate::Result;
use crate::error::{Error, TypeError};
use crate::value::Value;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::sync::Arc;

/// Column names shared across all rows of one result shape.
///
/// This struct is wrapped in `Arc` so every row decoded from the same shape
/// shares one name table. Lookups are case-insensitive and a duplicated name
/// resolves to its first occurrence.
#[derive(Debug, Clone)]
pub struct ColumnInfo {
    /// Column names in order
    names: Vec<String>,
    /// Lowercased name -> first index
    name_to_index: HashMap<String, usize>,
}

impl ColumnInfo {
    pub fn new(names: Vec<String>) -> Self {
        let mut name_to_index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            name_to_index.entry(name.to_lowercase()).or_insert(i);
        }
        Self {
            names,
            name_to_index,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// First index carrying `name`, ignoring case.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(&name.to_lowercase()).copied()
    }

    pub fn name_at(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(|n| n.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    fn push(&mut self, name: String) -> usize {
        let index = self.names.len();
        self.name_to_index.entry(name.to_lowercase()).or_insert(index);
        self.names.push(name);
        index
    }
}

/// An untyped row: a shared name table plus this row's values.
///
/// Removing a value leaves a tombstone; the value array never shrinks, so
/// indexes stay aligned with the shared name table. Setting a name the table
/// does not know appends a column to this row's private copy of the table.
#[derive(Debug, Clone)]
pub struct Row {
    /// Column values in order; `None` marks a removed value
    values: Vec<Option<Value>>,
    /// Shared column metadata
    columns: Arc<ColumnInfo>,
}

impl Row {
    /// A row owning its own name table. Cursors use [`Row::with_columns`].
    pub fn new(names: Vec<String>, values: Vec<Value>) -> Self {
        Self::with_columns(Arc::new(ColumnInfo::new(names)), values)
    }

    pub fn with_columns(columns: Arc<ColumnInfo>, values: Vec<Value>) -> Self {
        Self {
            values: values.into_iter().map(Some).collect(),
            columns,
        }
    }

    pub fn column_info(&self) -> Arc<ColumnInfo> {
        Arc::clone(&self.columns)
    }

    /// Number of value slots, tombstones included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Removed values read as `None`.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// Case-insensitive; the first column with the name wins.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let index = self.columns.index_of(name)?;
        self.get(index)
    }

    /// True while the named column holds a value (not a tombstone).
    pub fn contains_column(&self, name: &str) -> bool {
        self.get_by_name(name).is_some()
    }

    /// Set a value by name, appending a column when the name is unknown.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        if let Some(index) = self.columns.index_of(name) {
            if index < self.values.len() {
                self.values[index] = Some(value);
                return;
            }
        }
        let index = Arc::make_mut(&mut self.columns).push(name.to_string());
        self.values.resize(index, None);
        self.values.push(Some(value));
    }

    /// Remove a value by name, leaving a tombstone. Returns the removed value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.columns.index_of(name)?;
        self.values.get_mut(index).and_then(Option::take)
    }

    /// Typed read of the value at `index`.
    pub fn get_as<T: FromValue>(&self, index: usize) -> Result<T> {
        match self.get(index) {
            Some(value) => T::from_value(value),
            None => Err(mismatch(
                std::any::type_name::<T>(),
                format!("no value at index {} of {}", index, self.len()),
            )),
        }
    }

    /// Typed read by column name; conversion errors carry the column.
    pub fn get_named<T: FromValue>(&self, name: &str) -> Result<T> {
        let Some(value) = self.get_by_name(name) else {
            return Err(mismatch(std::any::type_name::<T>(), format!("no column '{}'", name))
                .with_column(name));
        };
        T::from_value(value).map_err(|err| err.with_column(name))
    }

    /// `(name, value)` pairs in column order, tombstones skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
            .filter_map(|(name, value)| value.as_ref().map(|v| (name, v)))
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Conversion out of a [`Value`].
///
/// Implementations accept the exact variant first, then widening and
/// range-checked narrowing between numeric variants, and finally parse text.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self>;

    /// The value a NULL stands for when a constructor argument requires one.
    fn null_default() -> Option<Self> {
        None
    }
}

fn mismatch(expected: &'static str, actual: String) -> Error {
    Error::Type(TypeError {
        expected,
        actual,
        column: None,
        rust_type: Some(expected),
    })
}

fn type_error(expected: &'static str, value: &Value) -> Error {
    mismatch(expected, value.type_name().to_string())
}

/// Integral view of a value, used by every integer conversion.
#[allow(clippy::cast_possible_truncation)]
fn integral(value: &Value, expected: &'static str) -> Result<i128> {
    match value {
        Value::Bool(v) => Ok(i128::from(*v)),
        Value::TinyInt(v) => Ok(i128::from(*v)),
        Value::SmallInt(v) => Ok(i128::from(*v)),
        Value::Int(v) => Ok(i128::from(*v)),
        Value::BigInt(v) => Ok(i128::from(*v)),
        Value::Float(_) | Value::Double(_) => {
            let f = value.as_f64().unwrap_or(f64::NAN);
            if f.is_finite() && f.fract() == 0.0 {
                Ok(f as i128)
            } else {
                Err(mismatch(expected, format!("fractional {}", f)))
            }
        }
        Value::Decimal(s) | Value::Text(s) => {
            let trimmed = s.trim();
            let digits = match trimmed.split_once('.') {
                Some((int, frac)) if frac.bytes().all(|b| b == b'0') => int,
                _ => trimmed,
            };
            digits
                .parse::<i128>()
                .map_err(|_| mismatch(expected, format!("text '{}'", s)))
        }
        other => Err(type_error(expected, other)),
    }
}

macro_rules! impl_from_value_integer {
    ($($ty:ty),* $(,)?) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: &Value) -> Result<Self> {
                    let wide = integral(value, stringify!($ty))?;
                    <$ty>::try_from(wide)
                        .map_err(|_| mismatch(stringify!($ty), format!("{} (out of range)", wide)))
                }

                fn null_default() -> Option<Self> {
                    Some(0)
                }
            }
        )*
    };
}

impl_from_value_integer!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self> {
        match (value.as_f64(), value) {
            (Some(v), _) => Ok(v),
            (None, Value::Text(s)) => s.trim().parse().map_err(|_| type_error("f64", value)),
            (None, Value::Bool(flag)) => Ok(f64::from(u8::from(*flag))),
            (None, other) => Err(type_error("f64", other)),
        }
    }

    fn null_default() -> Option<Self> {
        Some(0.0)
    }
}

impl FromValue for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn from_value(value: &Value) -> Result<Self> {
        if let Value::Float(v) = value {
            return Ok(*v);
        }
        let wide = f64::from_value(value).map_err(|_| type_error("f32", value))?;
        let narrow = wide as f32;
        if narrow.is_infinite() && wide.is_finite() {
            return Err(mismatch("f32", format!("{} (out of range)", wide)));
        }
        Ok(narrow)
    }

    fn null_default() -> Option<Self> {
        Some(0.0)
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self> {
        if let Some(v) = value.as_bool() {
            return Ok(v);
        }
        match value {
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" => Ok(false),
                _ => Err(type_error("bool", value)),
            },
            other => Err(type_error("bool", other)),
        }
    }

    fn null_default() -> Option<Self> {
        Some(false)
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Text(s) | Value::Decimal(s) => Ok(s.clone()),
            Value::Null | Value::Bytes(_) | Value::Array(_) => Err(type_error("String", value)),
            other => Ok(other.to_string()),
        }
    }

    fn null_default() -> Option<Self> {
        Some(String::new())
    }
}

impl FromValue for char {
    fn from_value(value: &Value) -> Result<Self> {
        let mut chars = value
            .as_str()
            .ok_or_else(|| type_error("char", value))?
            .chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(c),
            _ => Err(mismatch("char", format!("'{}' (not one character)", value))),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: &Value) -> Result<Self> {
        value
            .as_bytes()
            .map(<[u8]>::to_vec)
            .ok_or_else(|| type_error("Vec<u8>", value))
    }

    fn null_default() -> Option<Self> {
        Some(Vec::new())
    }
}

impl FromValue for [u8; 16] {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Uuid(bytes) => Ok(*bytes),
            Value::Bytes(b) => {
                <[u8; 16]>::try_from(b.as_slice()).map_err(|_| type_error("uuid", value))
            }
            Value::Text(s) => parse_uuid(s).ok_or_else(|| type_error("uuid", value)),
            other => Err(type_error("uuid", other)),
        }
    }
}

fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let hex: Vec<u8> = text.bytes().filter(|b| *b != b'-').collect();
    if hex.len() != 32 {
        return None;
    }
    let mut out = [0u8; 16];
    for (i, pair) in hex.chunks(2).enumerate() {
        let s = std::str::from_utf8(pair).ok()?;
        out[i] = u8::from_str_radix(s, 16).ok()?;
    }
    Some(out)
}

impl FromValue for serde_json::Value {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s)
                .map_err(|e| mismatch("JSON", format!("malformed text ({})", e))),
            other => Err(type_error("JSON", other)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self> {
        Ok(value.clone())
    }

    fn null_default() -> Option<Self> {
        Some(Value::Null)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            v => T::from_value(v).map(Some),
        }
    }

    fn null_default() -> Option<Self> {
        Some(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["Id".into(), "Name".into(), "id".into()],
            vec![Value::Int(1), Value::Text("ann".into()), Value::Int(99)],
        )
    }

    #[test]
    fn test_lookup_is_case_insensitive_first_wins() {
        let row = sample();
        assert_eq!(row.get_by_name("ID"), Some(&Value::Int(1)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Text("ann".into())));
        assert_eq!(row.get(2), Some(&Value::Int(99)));
    }

    #[test]
    fn test_remove_leaves_tombstone() {
        let mut row = sample();
        assert_eq!(row.remove("Name"), Some(Value::Text("ann".into())));
        assert_eq!(row.len(), 3);
        assert!(!row.contains_column("name"));
        assert_eq!(row.get(2), Some(&Value::Int(99)));
        assert_eq!(row.remove("Name"), None);
    }

    #[test]
    fn test_set_appends_without_touching_shared_table() {
        let shared = Arc::new(ColumnInfo::new(vec!["A".into()]));
        let mut first = Row::with_columns(Arc::clone(&shared), vec![Value::Int(1)]);
        let second = Row::with_columns(Arc::clone(&shared), vec![Value::Int(2)]);

        first.set("B", 5i32);
        first.set("a", 7i32);

        assert_eq!(first.get_by_name("b"), Some(&Value::Int(5)));
        assert_eq!(first.get_by_name("A"), Some(&Value::Int(7)));
        assert_eq!(shared.len(), 1);
        assert!(second.get_by_name("B").is_none());
    }

    #[test]
    fn test_serialize_skips_tombstones() {
        let mut row = sample();
        row.remove("Name");
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, serde_json::json!({"Id": {"Int": 1}, "id": {"Int": 99}}));
    }

    #[test]
    fn test_integer_widening_and_narrowing() {
        assert_eq!(i64::from_value(&Value::Int(5)).unwrap(), 5);
        assert_eq!(i16::from_value(&Value::BigInt(300)).unwrap(), 300);
        assert!(i8::from_value(&Value::BigInt(300)).is_err());
        assert_eq!(u8::from_value(&Value::Double(12.0)).unwrap(), 12);
        assert!(u8::from_value(&Value::Double(12.5)).is_err());
    }

    #[test]
    fn test_text_fallbacks() {
        assert_eq!(i32::from_value(&Value::Text(" 42 ".into())).unwrap(), 42);
        assert_eq!(i64::from_value(&Value::Decimal("10.00".into())).unwrap(), 10);
        assert!(bool::from_value(&Value::Text("TRUE".into())).unwrap());
        assert_eq!(f64::from_value(&Value::Text("2.25".into())).unwrap(), 2.25);
        assert_eq!(String::from_value(&Value::Int(7)).unwrap(), "7");
    }

    #[test]
    fn test_char_requires_single_character() {
        assert_eq!(char::from_value(&Value::Text("x".into())).unwrap(), 'x');
        assert!(char::from_value(&Value::Text("xy".into())).is_err());
    }

    #[test]
    fn test_option_and_null_defaults() {
        assert_eq!(Option::<i32>::from_value(&Value::Null).unwrap(), None);
        assert_eq!(Option::<i32>::from_value(&Value::Int(3)).unwrap(), Some(3));
        assert!(i32::from_value(&Value::Null).is_err());
        assert_eq!(i32::null_default(), Some(0));
        assert_eq!(char::null_default(), None);
    }

    #[test]
    fn test_uuid_from_text() {
        let parsed = <[u8; 16]>::from_value(&Value::Text(
            "ab000000-0000-0000-0000-000000000001".into(),
        ))
        .unwrap();
        assert_eq!(parsed[0], 0xab);
        assert_eq!(parsed[15], 0x01);
    }

    #[test]
    fn test_get_named_reports_column() {
        let row = sample();
        let err = row.get_named::<bool>("Name").unwrap_err();
        match err {
            Error::Type(te) => assert_eq!(te.column.as_deref(), Some("Name")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
