//! Custom type handlers.
//!
//! A handler owns both directions for one Rust type: writing a parameter and
//! parsing a column value. When a handler is registered for a type it takes
//! precedence over the built-in `FromValue` table and the declared `DbType`.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::connection::Parameter;
use crate::error::{Error, Result, TypeError};
use crate::row::FromValue;
use crate::types::TypeKey;
use crate::value::Value;

/// Two-way conversion for one Rust type.
pub trait TypeHandler<T>: Send + Sync + 'static {
    /// Populate the parameter (value, db type, size) from a member value.
    fn set_value(&self, parameter: &mut Parameter, value: &T);

    /// Parse a non-null column value.
    #[allow(clippy::result_large_err)]
    fn parse(&self, value: &Value) -> Result<T>;
}

/// Type-erased handler, stored in [`TypeHandlers`].
pub trait ErasedTypeHandler: Send + Sync {
    fn handled_type(&self) -> TypeKey;

    fn set_value_erased(&self, parameter: &mut Parameter, value: &dyn Any) -> Result<()>;

    fn parse_erased(&self, value: &Value) -> Result<Box<dyn Any + Send>>;
}

struct Typed<T, H> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> ErasedTypeHandler for Typed<T, H>
where
    T: Send + 'static,
    H: TypeHandler<T>,
{
    fn handled_type(&self) -> TypeKey {
        TypeKey::of::<T>()
    }

    fn set_value_erased(&self, parameter: &mut Parameter, value: &dyn Any) -> Result<()> {
        let typed = value.downcast_ref::<T>().ok_or_else(|| {
            Error::Type(TypeError {
                expected: std::any::type_name::<T>(),
                actual: "value of another type".to_string(),
                column: Some(parameter.name.clone()),
                rust_type: Some(std::any::type_name::<T>()),
            })
        })?;
        self.handler.set_value(parameter, typed);
        Ok(())
    }

    fn parse_erased(&self, value: &Value) -> Result<Box<dyn Any + Send>> {
        let parsed = self.handler.parse(value)?;
        Ok(Box::new(parsed))
    }
}

/// Registry of handlers keyed by the handled type.
#[derive(Clone, Default)]
pub struct TypeHandlers {
    handlers: HashMap<TypeKey, Arc<dyn ErasedTypeHandler>>,
}

impl TypeHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `T`.
    pub fn register<T, H>(&mut self, handler: H)
    where
        T: Send + 'static,
        H: TypeHandler<T>,
    {
        self.handlers.insert(
            TypeKey::of::<T>(),
            Arc::new(Typed {
                handler,
                _marker: PhantomData,
            }),
        );
    }

    pub fn remove(&mut self, key: TypeKey) -> bool {
        self.handlers.remove(&key).is_some()
    }

    pub fn get(&self, key: TypeKey) -> Option<&Arc<dyn ErasedTypeHandler>> {
        self.handlers.get(&key)
    }

    pub fn contains(&self, key: TypeKey) -> bool {
        self.handlers.contains_key(&key)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl fmt::Debug for TypeHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.handlers.keys().map(TypeKey::name))
            .finish()
    }
}

/// A column-to-member conversion chosen once per compiled plan.
pub type ValueConverter<M> = Arc<dyn Fn(&Value) -> Result<M> + Send + Sync>;

/// Choose the conversion for `M`: its registered handler, else `FromValue`.
///
/// NULL never reaches a handler; it is always converted through `FromValue`.
pub fn converter<M>(handlers: &TypeHandlers) -> ValueConverter<M>
where
    M: FromValue + Send + 'static,
{
    match handlers.get(TypeKey::of::<M>()) {
        Some(handler) => {
            let handler = Arc::clone(handler);
            Arc::new(move |value: &Value| {
                if value.is_null() {
                    return M::from_value(value);
                }
                handler
                    .parse_erased(value)?
                    .downcast::<M>()
                    .map(|boxed| *boxed)
                    .map_err(|_| {
                        Error::Type(TypeError {
                            expected: std::any::type_name::<M>(),
                            actual: "handler returned another type".to_string(),
                            column: None,
                            rust_type: Some(std::any::type_name::<M>()),
                        })
                    })
            })
        }
        None => Arc::new(|value: &Value| M::from_value(value)),
    }
}
