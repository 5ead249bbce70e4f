//! Storage kinds and runtime type identity.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::value::Value;

/// Native parameter storage kinds, as understood by command implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbType {
    Byte,
    SByte,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Single,
    Double,
    Decimal,
    Boolean,
    String,
    StringFixedLength,
    AnsiString,
    AnsiStringFixedLength,
    Guid,
    Date,
    DateTime,
    DateTimeOffset,
    Time,
    Binary,
    Json,
    /// Inferred from the runtime value at bind time
    Object,
}

impl DbType {
    /// Infer the storage kind of a runtime value.
    ///
    /// `Null` maps to `Object` so that a command implementation can pick its own default.
    pub const fn for_value(value: &Value) -> DbType {
        match value {
            Value::Null | Value::Array(_) => DbType::Object,
            Value::Bool(_) => DbType::Boolean,
            Value::TinyInt(_) => DbType::SByte,
            Value::SmallInt(_) => DbType::Int16,
            Value::Int(_) => DbType::Int32,
            Value::BigInt(_) => DbType::Int64,
            Value::Float(_) => DbType::Single,
            Value::Double(_) => DbType::Double,
            Value::Decimal(_) => DbType::Decimal,
            Value::Text(_) => DbType::String,
            Value::Bytes(_) => DbType::Binary,
            Value::Date(_) => DbType::Date,
            Value::Time(_) => DbType::Time,
            Value::Timestamp(_) => DbType::DateTime,
            Value::TimestampTz(_) => DbType::DateTimeOffset,
            Value::Uuid(_) => DbType::Guid,
            Value::Json(_) => DbType::Json,
        }
    }

    /// Check if this kind holds character data.
    pub const fn is_text(self) -> bool {
        matches!(
            self,
            DbType::String
                | DbType::StringFixedLength
                | DbType::AnsiString
                | DbType::AnsiStringFixedLength
        )
    }

    /// Check if this kind is numeric.
    pub const fn is_numeric(self) -> bool {
        matches!(
            self,
            DbType::Byte
                | DbType::SByte
                | DbType::Int16
                | DbType::UInt16
                | DbType::Int32
                | DbType::UInt32
                | DbType::Int64
                | DbType::UInt64
                | DbType::Single
                | DbType::Double
                | DbType::Decimal
        )
    }
}

/// Trait for types that have a declared native storage kind.
pub trait TypeInfo {
    /// The storage kind used when this type is bound as a parameter.
    const DB_TYPE: DbType;

    /// Whether this type is nullable by default.
    const NULLABLE: bool = false;
}

impl TypeInfo for i8 {
    const DB_TYPE: DbType = DbType::SByte;
}

impl TypeInfo for u8 {
    const DB_TYPE: DbType = DbType::Byte;
}

impl TypeInfo for i16 {
    const DB_TYPE: DbType = DbType::Int16;
}

impl TypeInfo for u16 {
    const DB_TYPE: DbType = DbType::UInt16;
}

impl TypeInfo for i32 {
    const DB_TYPE: DbType = DbType::Int32;
}

impl TypeInfo for u32 {
    const DB_TYPE: DbType = DbType::UInt32;
}

impl TypeInfo for i64 {
    const DB_TYPE: DbType = DbType::Int64;
}

impl TypeInfo for u64 {
    const DB_TYPE: DbType = DbType::UInt64;
}

impl TypeInfo for f32 {
    const DB_TYPE: DbType = DbType::Single;
}

impl TypeInfo for f64 {
    const DB_TYPE: DbType = DbType::Double;
}

impl TypeInfo for bool {
    const DB_TYPE: DbType = DbType::Boolean;
}

impl TypeInfo for String {
    const DB_TYPE: DbType = DbType::String;
}

impl TypeInfo for char {
    const DB_TYPE: DbType = DbType::StringFixedLength;
}

impl TypeInfo for Vec<u8> {
    const DB_TYPE: DbType = DbType::Binary;
}

impl TypeInfo for [u8; 16] {
    const DB_TYPE: DbType = DbType::Guid;
}

impl TypeInfo for serde_json::Value {
    const DB_TYPE: DbType = DbType::Json;
}

impl TypeInfo for Value {
    const DB_TYPE: DbType = DbType::Object;
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    const DB_TYPE: DbType = T::DB_TYPE;
    const NULLABLE: bool = true;
}

/// Runtime identity of a Rust type, with its name kept for diagnostics.
///
/// Equality and hashing use only the `TypeId`.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn id(&self) -> TypeId {
        self.id
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.name)
    }
}
