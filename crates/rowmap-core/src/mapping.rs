//! Target type metadata for row materialization.
//!
//! A target type describes itself through [`Mapped::mapping`]:
//!
//! - [`Mapping::Scalar`] - one column converted to the whole value
//! - [`Mapping::Record`] - a [`TypeMap`] of members and constructors
//! - [`Mapping::Dynamic`] - an untyped [`Row`]
//!
//! `#[derive(Mapped)]` builds the `TypeMap` for structs; it can also be built
//! by hand, and a custom [`TypeResolver`] may replace it per type.

use std::any::Any;
use std::sync::Arc;

use crate::connection::RowCursor;
use crate::error::{DecodeError, Error, Result, TypeError};
use crate::handler::{TypeHandlers, ValueConverter, converter};
use crate::row::{FromValue, Row};
use crate::types::{DbType, TypeKey};
use crate::value::Value;

/// A type rows can be materialized into.
pub trait Mapped: Sized + Send + 'static {
    /// Untyped rows split left-to-right in multi-mapping.
    const DYNAMIC: bool = false;

    fn mapping() -> Mapping<Self>;
}

/// How a target type is built from columns.
pub enum Mapping<T> {
    Scalar(ScalarMap<T>),
    Record(TypeMap<T>),
    Dynamic(fn(Row) -> T),
}

/// Single-column conversion for scalar targets.
pub struct ScalarMap<T> {
    bind: fn(&TypeHandlers) -> ValueConverter<T>,
    null_default: fn() -> Option<T>,
}

impl<T: FromValue + Send + 'static> ScalarMap<T> {
    pub fn new() -> Self {
        Self {
            bind: converter::<T>,
            null_default: T::null_default,
        }
    }
}

impl<T: FromValue + Send + 'static> Default for ScalarMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ScalarMap<T> {
    /// Compile the conversion against the registered handlers.
    pub fn converter(&self, handlers: &TypeHandlers) -> ValueConverter<T> {
        (self.bind)(handlers)
    }

    /// What a NULL column reads as, when the type has such a value.
    pub fn null_default(&self) -> Option<T> {
        (self.null_default)()
    }
}

/// Writes one converted column into a target under construction.
pub type Setter<T> = Arc<dyn Fn(&mut T, &Value) -> Result<()> + Send + Sync>;

/// One settable member of a record type.
pub struct MemberMap<T> {
    name: &'static str,
    column: Option<&'static str>,
    member_type: TypeKey,
    bind: Arc<dyn Fn(&TypeHandlers) -> Setter<T> + Send + Sync>,
}

impl<T> Clone for MemberMap<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            column: self.column,
            member_type: self.member_type,
            bind: Arc::clone(&self.bind),
        }
    }
}

impl<T: 'static> MemberMap<T> {
    pub fn new<M>(name: &'static str, set: fn(&mut T, M)) -> Self
    where
        M: FromValue + Send + 'static,
    {
        let bind = Arc::new(move |handlers: &TypeHandlers| -> Setter<T> {
            let convert = converter::<M>(handlers);
            Arc::new(move |target: &mut T, value: &Value| {
                set(target, convert(value)?);
                Ok(())
            })
        });
        Self {
            name,
            column: None,
            member_type: TypeKey::of::<M>(),
            bind,
        }
    }
}

impl<T> MemberMap<T> {
    /// Bind this member to an explicitly named column.
    #[must_use]
    pub fn with_column(mut self, column: &'static str) -> Self {
        self.column = Some(column);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The column this member reads: the override, else the member name.
    pub fn column(&self) -> &'static str {
        self.column.unwrap_or(self.name)
    }

    pub fn member_type(&self) -> TypeKey {
        self.member_type
    }

    /// Compile the setter against the registered handlers.
    pub fn setter(&self, handlers: &TypeHandlers) -> Setter<T> {
        (self.bind)(handlers)
    }
}

/// A constructor taking one argument per named parameter.
pub struct ConstructorMap<T> {
    params: Vec<&'static str>,
    build: Arc<dyn Fn(&mut ArgReader<'_>) -> Result<T> + Send + Sync>,
}

impl<T> Clone for ConstructorMap<T> {
    fn clone(&self) -> Self {
        Self {
            params: self.params.clone(),
            build: Arc::clone(&self.build),
        }
    }
}

impl<T> ConstructorMap<T> {
    pub fn new<F>(params: &[&'static str], build: F) -> Self
    where
        F: Fn(&mut ArgReader<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            params: params.to_vec(),
            build: Arc::new(build),
        }
    }

    pub fn params(&self) -> &[&'static str] {
        &self.params
    }

    /// Shared handle to the build function.
    pub fn build_fn(&self) -> Arc<dyn Fn(&mut ArgReader<'_>) -> Result<T> + Send + Sync> {
        Arc::clone(&self.build)
    }
}

/// Supplies constructor arguments from the current row, in parameter order.
pub struct ArgReader<'a> {
    cursor: &'a dyn RowCursor,
    columns: &'a [usize],
    handlers: &'a TypeHandlers,
    position: usize,
}

impl<'a> ArgReader<'a> {
    /// `columns[i]` is the cursor column for constructor parameter `i`.
    pub fn new(cursor: &'a dyn RowCursor, columns: &'a [usize], handlers: &'a TypeHandlers) -> Self {
        Self {
            cursor,
            columns,
            handlers,
            position: 0,
        }
    }

    /// Convert the next argument.
    ///
    /// NULL becomes the type's null default; a type without one is a decode error.
    #[allow(clippy::result_large_err)]
    pub fn take<M>(&mut self) -> Result<M>
    where
        M: FromValue + Send + 'static,
    {
        let index = *self.columns.get(self.position).ok_or_else(|| {
            Error::Custom(format!(
                "constructor requested argument {} but only {} are bound",
                self.position + 1,
                self.columns.len()
            ))
        })?;
        self.position += 1;

        let value = self.cursor.get_value(index);
        let converted = if value.is_null() {
            M::null_default().ok_or_else(|| {
                Error::Type(TypeError {
                    expected: std::any::type_name::<M>(),
                    actual: "NULL".to_string(),
                    column: None,
                    rust_type: Some(std::any::type_name::<M>()),
                })
            })
        } else {
            convert_with::<M>(self.handlers, &value)
        };
        converted.map_err(|err| decode_error(self.cursor, index, &value, err))
    }
}

fn convert_with<M>(handlers: &TypeHandlers, value: &Value) -> Result<M>
where
    M: FromValue + Send + 'static,
{
    if handlers.is_empty() {
        return M::from_value(value);
    }
    match handlers.get(TypeKey::of::<M>()) {
        Some(handler) => handler
            .parse_erased(value)?
            .downcast::<M>()
            .map(|boxed| *boxed)
            .map_err(|_| Error::Custom("type handler returned another type".to_string())),
        None => M::from_value(value),
    }
}

/// Attribute a conversion failure to a column of the current row.
///
/// Errors that already carry a column are passed through unchanged.
pub fn decode_error(cursor: &dyn RowCursor, index: usize, value: &Value, source: Error) -> Error {
    if source.is_decode() {
        return source;
    }
    let column_name = if index < cursor.field_count() {
        cursor.field_name(index).to_string()
    } else {
        format!("#{}", index)
    };
    Error::Decode(DecodeError {
        column_index: index,
        column_name,
        value: value.describe(),
        source: Box::new(source),
    })
}

/// Maps result columns onto the members and constructors of `T`.
pub trait TypeResolver<T>: Send + Sync {
    fn type_name(&self) -> &str;

    /// Always build with the default constructor and then set members.
    fn construct_then_set(&self) -> bool;

    fn default_constructor(&self) -> Option<fn() -> T>;

    /// A constructor whose parameters cover exactly the bound columns.
    fn find_constructor(&self, names: &[&str], types: &[Option<DbType>]) -> Option<&ConstructorMap<T>>;

    /// The column (index into `names`) feeding constructor parameter `param`.
    fn constructor_parameter_column(
        &self,
        ctor: &ConstructorMap<T>,
        param: usize,
        names: &[&str],
    ) -> Option<usize>;

    /// The member a column name binds to.
    fn find_member(&self, column: &str) -> Option<&MemberMap<T>>;
}

/// Default resolver: case-insensitive names with per-member column overrides.
pub struct TypeMap<T> {
    type_name: &'static str,
    members: Vec<MemberMap<T>>,
    constructors: Vec<ConstructorMap<T>>,
    default_ctor: Option<fn() -> T>,
    construct_then_set: bool,
}

impl<T> Clone for TypeMap<T> {
    fn clone(&self) -> Self {
        Self {
            type_name: self.type_name,
            members: self.members.clone(),
            constructors: self.constructors.clone(),
            default_ctor: self.default_ctor,
            construct_then_set: self.construct_then_set,
        }
    }
}

impl<T: 'static> TypeMap<T> {
    pub fn new() -> Self {
        Self {
            type_name: std::any::type_name::<T>(),
            members: Vec::new(),
            constructors: Vec::new(),
            default_ctor: None,
            construct_then_set: false,
        }
    }

    /// Add a member read from the column of the same name.
    #[must_use]
    pub fn member<M>(self, name: &'static str, set: fn(&mut T, M)) -> Self
    where
        M: FromValue + Send + 'static,
    {
        self.push_member(MemberMap::new(name, set))
    }

    #[must_use]
    pub fn push_member(mut self, member: MemberMap<T>) -> Self {
        self.members.push(member);
        self
    }

    #[must_use]
    pub fn constructor<F>(mut self, params: &[&'static str], build: F) -> Self
    where
        F: Fn(&mut ArgReader<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.constructors.push(ConstructorMap::new(params, build));
        self
    }

    #[must_use]
    pub fn default_constructor(mut self, ctor: fn() -> T) -> Self {
        self.default_ctor = Some(ctor);
        self
    }

    /// Prefer default construction plus member setters even when a
    /// constructor would match.
    #[must_use]
    pub fn construct_then_set(mut self) -> Self {
        self.construct_then_set = true;
        self
    }
}

impl<T: 'static> Default for TypeMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TypeMap<T> {
    pub fn members(&self) -> &[MemberMap<T>] {
        &self.members
    }

    pub fn constructors(&self) -> &[ConstructorMap<T>] {
        &self.constructors
    }
}

impl<T: Send + 'static> TypeResolver<T> for TypeMap<T> {
    fn type_name(&self) -> &str {
        self.type_name
    }

    fn construct_then_set(&self) -> bool {
        self.construct_then_set
    }

    fn default_constructor(&self) -> Option<fn() -> T> {
        self.default_ctor
    }

    fn find_constructor(&self, names: &[&str], _types: &[Option<DbType>]) -> Option<&ConstructorMap<T>> {
        self.constructors.iter().find(|ctor| {
            ctor.params.len() == names.len()
                && ctor
                    .params
                    .iter()
                    .all(|p| names.iter().any(|n| n.eq_ignore_ascii_case(p)))
                && names
                    .iter()
                    .all(|n| ctor.params.iter().any(|p| p.eq_ignore_ascii_case(n)))
        })
    }

    fn constructor_parameter_column(
        &self,
        ctor: &ConstructorMap<T>,
        param: usize,
        names: &[&str],
    ) -> Option<usize> {
        let wanted = ctor.params.get(param)?;
        names.iter().position(|n| n.eq_ignore_ascii_case(wanted))
    }

    fn find_member(&self, column: &str) -> Option<&MemberMap<T>> {
        self.members
            .iter()
            .find(|m| m.column().eq_ignore_ascii_case(column))
    }
}

/// A resolver stored in configuration, erased over its target type.
pub type ErasedResolver = Arc<dyn Any + Send + Sync>;

macro_rules! impl_mapped_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Mapped for $ty {
                fn mapping() -> Mapping<Self> {
                    Mapping::Scalar(ScalarMap::new())
                }
            }
        )*
    };
}

impl_mapped_scalar!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    u64,
    isize,
    usize,
    f32,
    f64,
    char,
    String,
    Vec<u8>,
    [u8; 16],
    serde_json::Value,
    Value,
);

impl<T: FromValue + Send + 'static> Mapped for Option<T> {
    fn mapping() -> Mapping<Self> {
        Mapping::Scalar(ScalarMap::new())
    }
}

impl Mapped for Row {
    const DYNAMIC: bool = true;

    fn mapping() -> Mapping<Self> {
        Mapping::Dynamic(|row| row)
    }
}
