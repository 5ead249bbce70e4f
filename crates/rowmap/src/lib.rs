//! rowmap - shape-aware row materialization and parameter binding.
//!
//! rowmap sits on top of any driver implementing the capabilities in
//! [`rowmap_core`] and provides:
//!
//! - Typed queries that turn result rows into structs, scalars or untyped [`Row`]s
//! - Parameter binding from plain structs or [`DynamicParams`], with list
//!   expansion, `{=name}` literal inlining and `?name?` pseudo-positional tokens
//! - Multi-mapping one row into several objects split on marker columns
//! - Sequential reading of multiple result sets through [`GridReader`]
//! - A plan cache keyed by command identity, so binders and row deserializers
//!   are built once per command and result shape
//!
//! # Quick Start
//!
//! ```ignore
//! use rowmap::prelude::*;
//!
//! #[derive(Mapped, Default, Debug)]
//! struct Post {
//!     id: i64,
//!     title: String,
//!     owner_id: Option<i64>,
//! }
//!
//! #[derive(Params)]
//! struct ByOwner {
//!     owner_id: i64,
//! }
//!
//! fn load(mapper: &Mapper, conn: &impl Connection) -> Result<Vec<Post>> {
//!     mapper.query::<Post, _, _>(
//!         conn,
//!         "select id, title, owner_id from posts where owner_id = @owner_id",
//!         &ByOwner { owner_id: 7 },
//!     )
//! }
//! ```
//!
//! # Configuration
//!
//! Type handlers, type maps and resolvers are registered on a [`Mapper`].
//! Each change publishes a fresh immutable [`MapperConfig`] and purges the
//! plans that may depend on it; queries already running keep the snapshot
//! they started with.

pub mod binder;
pub mod cache;
pub mod chain;
pub mod command;
pub mod config;
pub mod deserialize;
pub mod grid;
pub mod identity;
pub mod mapper;
pub mod multimap;
pub mod shape;
pub mod sql;

pub use binder::{ParamBinder, compile_binder, format_literal};
pub use cache::{CacheEntry, CachedSql, DeserializerSlot, PlanCache, PurgeListener};
pub use chain::MapChain;
pub use command::{CommandDefinition, CommandFlags};
pub use config::{MapperConfig, MapperSettings};
pub use deserialize::{Deserializer, compile_deserializer};
pub use grid::{GridIter, GridReader, GridState};
pub use identity::{Identity, IdentityPolicy, TextComparison};
pub use mapper::{Mapper, QueryIter};
pub use multimap::{MultiMapped, Segment, SegmentKind, Skip, split_columns};

pub use rowmap_core::{
    BindTarget, ColumnInfo, Command, CommandKind, Connection, CustomParameter, DbString, DbType,
    DynamicParams, Error, FromValue, Mapped, Mapping, Parameter, ParameterCollection,
    ParameterDirection, Result, Row, RowCursor, ToParam, ToParams, TypeHandler, TypeInfo, TypeKey,
    TypeMap, TypeResolver, Value,
};
pub use rowmap_core::{ConfigErrorKind, UsageErrorKind};

pub use rowmap_macros::{Mapped, Params, SqlEnum};

/// The types most callers need.
pub mod prelude {
    pub use crate::{
        CommandDefinition, Connection, DbString, DynamicParams, Error, GridReader, Mapped, Mapper,
        MapperSettings, Params, Result, Row, Skip, SqlEnum, ToParams, TypeHandler, Value,
    };
}

#[cfg(test)]
mod derive_tests {
    use super::*;
    use rowmap_core::memory::{MemoryConnection, ResultSet};

    #[derive(Mapped, Debug, Default, PartialEq)]
    struct Post {
        id: i64,
        #[rowmap(column = "Title")]
        heading: String,
        owner_id: Option<i64>,
    }

    #[derive(Params)]
    struct ByOwner {
        owner_id: i64,
        #[rowmap(skip)]
        _unused: String,
    }

    #[derive(SqlEnum, Debug, Clone, Copy, PartialEq)]
    #[repr(u8)]
    enum Status {
        Active = 1,
        Retired = 2,
    }

    #[test]
    fn test_prelude_covers_quick_start() {
        use crate::prelude::*;
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_result(
            ResultSet::new(["id", "title", "owner_id"]).row([
                Value::BigInt(1),
                Value::Text("hello".into()),
                Value::Null,
            ]),
        );

        let posts: Vec<Post> = mapper
            .query(
                &conn,
                "select id, title, owner_id from posts where owner_id = @owner_id",
                &ByOwner {
                    owner_id: 7,
                    _unused: String::new(),
                },
            )
            .unwrap();

        assert_eq!(
            posts,
            vec![Post {
                id: 1,
                heading: "hello".into(),
                owner_id: None
            }]
        );
        let executed = conn.executed();
        assert_eq!(executed[0].parameters.len(), 1);
        assert_eq!(executed[0].parameters[0].name, "owner_id");
        assert_eq!(executed[0].parameters[0].value, Value::BigInt(7));
    }

    #[test]
    fn test_sql_enum_reads_number_or_name() {
        assert_eq!(Status::from_value(&Value::Int(2)).unwrap(), Status::Retired);
        assert_eq!(
            Status::from_value(&Value::Text("active".into())).unwrap(),
            Status::Active
        );
        assert!(Status::from_value(&Value::Int(9)).is_err());
        assert_eq!(<Status as TypeInfo>::DB_TYPE, DbType::Byte);
    }
}
