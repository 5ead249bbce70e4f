//! Core types and traits for rowmap.
//!
//! This crate provides the foundations the mapper is built on:
//!
//! - `Value` and the untyped `Row`, plus `FromValue` conversions
//! - `RowCursor`, `Command` and `Connection` driver capabilities
//! - `Mapped` / `TypeMap` / `TypeResolver` target type metadata
//! - `ToParams` / `ToParam` parameter metadata, `DbString` and `DynamicParams`
//! - `TypeHandler` custom conversions
//! - an in-memory scripted driver in [`memory`]

pub mod connection;
pub mod error;
pub mod handler;
pub mod mapping;
pub mod memory;
pub mod params;
pub mod row;
pub mod types;
pub mod value;

pub use connection::{
    BindTarget, Command, CommandKind, Connection, CustomParameter, Parameter,
    ParameterCollection, ParameterDirection, RowCursor,
};
pub use error::{
    CommandError, ConfigError, ConfigErrorKind, DecodeError, Error, Result, TypeError, UsageError,
    UsageErrorKind,
};
pub use handler::{ErasedTypeHandler, TypeHandler, TypeHandlers, ValueConverter, converter};
pub use mapping::{
    ArgReader, ConstructorMap, ErasedResolver, Mapped, Mapping, MemberMap, ScalarMap, Setter,
    TypeMap, TypeResolver, decode_error,
};
pub use params::{
    DbString, DynamicEntries, DynamicEntry, DynamicParams, ListElement, ParamKind, ParamMap,
    ParamMember, ParamValue, ToParam, ToParams,
};
pub use row::{ColumnInfo, FromValue, Row};
pub use types::{DbType, TypeInfo, TypeKey};
pub use value::Value;
