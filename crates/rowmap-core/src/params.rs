//! Parameter object metadata.
//!
//! A parameter type lists its members through [`ToParams::param_map`]; each
//! member value describes itself through [`ToParam`] as a scalar, a list to be
//! expanded, or a [`CustomParameter`]. `#[derive(Params)]` builds the map for
//! structs, and [`DynamicParams`] is a runtime name/value bag.

use std::any::Any;
use std::sync::Arc;

use crate::connection::{BindTarget, CustomParameter, Parameter, ParameterDirection};
use crate::error::{ConfigErrorKind, Error, Result};
use crate::types::{DbType, TypeInfo, TypeKey};
use crate::value::Value;

/// What a member contributes to a command.
pub enum ParamValue<'a> {
    Value(Value),
    /// Expanded into one parameter per element
    List(Vec<Value>),
    Custom(&'a dyn CustomParameter),
}

/// Declared shape of a member type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Scalar(DbType),
    List,
    Custom,
}

/// A value usable as a single parameter member.
pub trait ToParam: Send + Sync + 'static {
    fn param_kind() -> ParamKind
    where
        Self: Sized;

    fn to_param(&self) -> ParamValue<'_>;
}

macro_rules! impl_to_param_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToParam for $ty {
                fn param_kind() -> ParamKind {
                    ParamKind::Scalar(<$ty as TypeInfo>::DB_TYPE)
                }

                fn to_param(&self) -> ParamValue<'_> {
                    ParamValue::Value(Value::from(self.clone()))
                }
            }
        )*
    };
}

impl_to_param_scalar!(
    bool,
    i8,
    i16,
    i32,
    i64,
    u8,
    u16,
    u32,
    f32,
    f64,
    char,
    String,
    Vec<u8>,
    [u8; 16],
    serde_json::Value,
);

impl ToParam for Value {
    fn param_kind() -> ParamKind {
        ParamKind::Scalar(DbType::Object)
    }

    fn to_param(&self) -> ParamValue<'_> {
        match self {
            Value::Array(items) => ParamValue::List(items.clone()),
            other => ParamValue::Value(other.clone()),
        }
    }
}

impl<T: ToParam> ToParam for Option<T> {
    fn param_kind() -> ParamKind {
        T::param_kind()
    }

    fn to_param(&self) -> ParamValue<'_> {
        match self {
            Some(v) => v.to_param(),
            None => ParamValue::Value(Value::Null),
        }
    }
}

/// An element of a list member (every scalar except bytes, which bind as binary).
pub trait ListElement: Send + Sync + 'static {
    fn to_list_value(&self) -> Value;
}

macro_rules! impl_list_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ListElement for $ty {
                fn to_list_value(&self) -> Value {
                    Value::from(self.clone())
                }
            }
        )*
    };
}

impl_list_element!(bool, i8, i16, i32, i64, u16, u32, f32, f64, char, String, [u8; 16], Value);

impl<T: ListElement> ListElement for Option<T> {
    fn to_list_value(&self) -> Value {
        self.as_ref().map_or(Value::Null, ListElement::to_list_value)
    }
}

impl<T: ListElement> ToParam for Vec<T> {
    fn param_kind() -> ParamKind {
        ParamKind::List
    }

    fn to_param(&self) -> ParamValue<'_> {
        ParamValue::List(self.iter().map(ListElement::to_list_value).collect())
    }
}

/// Reads one member of a parameter object.
pub trait MemberReader<T>: Send + Sync {
    fn read<'a>(&self, target: &'a T) -> ParamValue<'a>;

    /// The member itself, for type handlers.
    fn read_any<'a>(&self, target: &'a T) -> &'a dyn Any;
}

struct FieldReader<T, M> {
    get: for<'a> fn(&'a T) -> &'a M,
}

impl<T: 'static, M: ToParam> MemberReader<T> for FieldReader<T, M> {
    fn read<'a>(&self, target: &'a T) -> ParamValue<'a> {
        (self.get)(target).to_param()
    }

    fn read_any<'a>(&self, target: &'a T) -> &'a dyn Any {
        (self.get)(target)
    }
}

/// One member of a parameter object.
pub struct ParamMember<T> {
    name: &'static str,
    member_type: TypeKey,
    kind: ParamKind,
    reader: Arc<dyn MemberReader<T>>,
}

impl<T> Clone for ParamMember<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            member_type: self.member_type,
            kind: self.kind,
            reader: Arc::clone(&self.reader),
        }
    }
}

impl<T: 'static> ParamMember<T> {
    pub fn new<M: ToParam>(name: &'static str, get: for<'a> fn(&'a T) -> &'a M) -> Self {
        Self {
            name,
            member_type: TypeKey::of::<M>(),
            kind: M::param_kind(),
            reader: Arc::new(FieldReader { get }),
        }
    }
}

impl<T> ParamMember<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn member_type(&self) -> TypeKey {
        self.member_type
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn read<'a>(&self, target: &'a T) -> ParamValue<'a> {
        self.reader.read(target)
    }

    pub fn read_any<'a>(&self, target: &'a T) -> &'a dyn Any {
        self.reader.read_any(target)
    }
}

/// One runtime entry of a dynamic parameter source.
pub struct DynamicEntry<'a> {
    pub name: &'a str,
    pub value: ParamValue<'a>,
    pub db_type: Option<DbType>,
    pub direction: ParameterDirection,
    pub size: Option<i32>,
}

/// Lists the runtime entries of a dynamic parameter source.
pub type DynamicEntries<T> = for<'a> fn(&'a T) -> Vec<DynamicEntry<'a>>;

/// The members of a parameter type.
pub struct ParamMap<T> {
    members: Vec<ParamMember<T>>,
    constructor: Option<Vec<&'static str>>,
    dynamic: Option<DynamicEntries<T>>,
}

impl<T> Clone for ParamMap<T> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
            constructor: self.constructor.clone(),
            dynamic: self.dynamic,
        }
    }
}

impl<T: 'static> ParamMap<T> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            constructor: None,
            dynamic: None,
        }
    }

    /// A source whose entries are only known per instance.
    pub fn dynamic(entries: DynamicEntries<T>) -> Self {
        Self {
            members: Vec::new(),
            constructor: None,
            dynamic: Some(entries),
        }
    }

    #[must_use]
    pub fn member<M: ToParam>(mut self, name: &'static str, get: for<'a> fn(&'a T) -> &'a M) -> Self {
        self.members.push(ParamMember::new(name, get));
        self
    }

    #[must_use]
    pub fn push_member(mut self, member: ParamMember<T>) -> Self {
        self.members.push(member);
        self
    }

    /// Declare positional intent: members bind in this order.
    #[must_use]
    pub fn constructor(mut self, params: &[&'static str]) -> Self {
        self.constructor = Some(params.to_vec());
        self
    }
}

impl<T: 'static> Default for ParamMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ParamMap<T> {
    pub fn members(&self) -> &[ParamMember<T>] {
        &self.members
    }

    pub fn constructor_order(&self) -> Option<&[&'static str]> {
        self.constructor.as_deref()
    }

    pub fn dynamic_entries(&self) -> Option<DynamicEntries<T>> {
        self.dynamic
    }
}

/// A parameter object.
pub trait ToParams: Send + Sync + 'static {
    fn param_map() -> ParamMap<Self>
    where
        Self: Sized;

    /// A multi-row batch: one execution per element.
    fn is_batch(&self) -> bool {
        false
    }
}

impl ToParams for () {
    fn param_map() -> ParamMap<Self> {
        ParamMap::new()
    }
}

impl<P: ToParams> ToParams for Vec<P> {
    fn param_map() -> ParamMap<Self> {
        ParamMap::new()
    }

    fn is_batch(&self) -> bool {
        true
    }
}

/// A string parameter with explicit storage hints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbString {
    pub value: Option<String>,
    pub is_ansi: bool,
    pub is_fixed_length: bool,
    /// Declared length; `None` picks the default for the value
    pub length: Option<i32>,
}

impl DbString {
    /// Size used for values up to this many characters when no length is set.
    pub const DEFAULT_LENGTH: usize = 4000;

    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            is_ansi: false,
            is_fixed_length: false,
            length: None,
        }
    }

    #[must_use]
    pub fn ansi(mut self) -> Self {
        self.is_ansi = true;
        self
    }

    #[must_use]
    pub fn fixed_length(mut self, length: i32) -> Self {
        self.is_fixed_length = true;
        self.length = Some(length);
        self
    }

    pub fn db_type(&self) -> DbType {
        match (self.is_ansi, self.is_fixed_length) {
            (true, true) => DbType::AnsiStringFixedLength,
            (true, false) => DbType::AnsiString,
            (false, true) => DbType::StringFixedLength,
            (false, false) => DbType::String,
        }
    }
}

impl CustomParameter for DbString {
    fn add_parameter(&self, target: &mut dyn BindTarget, name: &str) -> Result<()> {
        if self.is_fixed_length && self.length.is_none() {
            return Err(Error::config(
                ConfigErrorKind::InvalidParameter,
                "if specifying a fixed length string, a length must also be specified",
            ));
        }
        let size = match (self.length, &self.value) {
            (Some(len), _) => len,
            (None, Some(v)) if v.chars().count() <= Self::DEFAULT_LENGTH => 4000,
            (None, _) => -1,
        };
        let param = Parameter::new(name, self.value.clone())
            .with_db_type(self.db_type())
            .with_size(size);
        target.parameters_mut().add(param);
        Ok(())
    }
}

impl ToParam for DbString {
    fn param_kind() -> ParamKind {
        ParamKind::Custom
    }

    fn to_param(&self) -> ParamValue<'_> {
        ParamValue::Custom(self)
    }
}

#[derive(Clone)]
enum DynamicValue {
    Value(Value),
    List(Vec<Value>),
    Custom(Arc<dyn CustomParameter>),
}

#[derive(Clone)]
struct DynamicParam {
    name: String,
    value: DynamicValue,
    db_type: Option<DbType>,
    direction: ParameterDirection,
    size: Option<i32>,
}

/// A runtime bag of named parameters.
///
/// Names may be given with or without a `@`, `:` or `?` prefix.
#[derive(Clone, Default)]
pub struct DynamicParams {
    params: Vec<DynamicParam>,
}

impl DynamicParams {
    pub fn new() -> Self {
        Self::default()
    }

    fn clean(name: &str) -> String {
        name.trim_start_matches(['@', ':', '?']).to_string()
    }

    fn push(&mut self, param: DynamicParam) {
        match self
            .params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&param.name))
        {
            Some(existing) => *existing = param,
            None => self.params.push(param),
        }
    }

    /// Add (or replace) a scalar parameter. `Value::Array` is expanded as a list.
    pub fn add(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let value = match value.into() {
            Value::Array(items) => DynamicValue::List(items),
            other => DynamicValue::Value(other),
        };
        self.push(DynamicParam {
            name: Self::clean(name),
            value,
            db_type: None,
            direction: ParameterDirection::Input,
            size: None,
        });
        self
    }

    /// Add a parameter with explicit storage hints.
    pub fn add_typed(
        &mut self,
        name: &str,
        value: impl Into<Value>,
        db_type: DbType,
        direction: ParameterDirection,
        size: Option<i32>,
    ) -> &mut Self {
        self.push(DynamicParam {
            name: Self::clean(name),
            value: DynamicValue::Value(value.into()),
            db_type: Some(db_type),
            direction,
            size,
        });
        self
    }

    pub fn add_list<T: ListElement>(&mut self, name: &str, items: &[T]) -> &mut Self {
        self.push(DynamicParam {
            name: Self::clean(name),
            value: DynamicValue::List(items.iter().map(ListElement::to_list_value).collect()),
            db_type: None,
            direction: ParameterDirection::Input,
            size: None,
        });
        self
    }

    pub fn add_custom(&mut self, name: &str, param: impl CustomParameter + 'static) -> &mut Self {
        self.push(DynamicParam {
            name: Self::clean(name),
            value: DynamicValue::Custom(Arc::new(param)),
            db_type: None,
            direction: ParameterDirection::Input,
            size: None,
        });
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    fn entries(&self) -> Vec<DynamicEntry<'_>> {
        self.params
            .iter()
            .map(|p| DynamicEntry {
                name: &p.name,
                value: match &p.value {
                    DynamicValue::Value(v) => ParamValue::Value(v.clone()),
                    DynamicValue::List(items) => ParamValue::List(items.clone()),
                    DynamicValue::Custom(c) => ParamValue::Custom(c.as_ref()),
                },
                db_type: p.db_type,
                direction: p.direction,
                size: p.size,
            })
            .collect()
    }
}

impl ToParams for DynamicParams {
    fn param_map() -> ParamMap<Self> {
        ParamMap::dynamic(DynamicParams::entries)
    }
}
