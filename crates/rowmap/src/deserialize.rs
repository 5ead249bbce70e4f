//! Deserializer compilation.
//!
//! A deserializer is built once per (target type, column range, shape) and
//! then applied to every row the cursor yields. All lookups by name, resolver
//! decisions and converter selection happen here; the returned closure only
//! indexes columns and converts values.

use std::sync::{Arc, OnceLock};

use rowmap_core::{
    ArgReader, ColumnInfo, ConfigErrorKind, DbType, Error, Mapped, Mapping, Result, Row,
    RowCursor, ScalarMap, Setter, TypeHandlers, TypeMap, TypeResolver, decode_error,
};

use crate::config::MapperConfig;
use crate::shape::column_names;

/// Decodes the current row of a cursor into one value.
///
/// `None` is only produced when the deserializer was compiled with
/// `absent_if_first_null` and the first bound column is NULL.
pub type Deserializer<T> = Arc<dyn Fn(&dyn RowCursor) -> Result<Option<T>> + Send + Sync>;

/// Compile a deserializer for `T` over columns `start..start + length`.
///
/// `length` of `None` binds every column from `start` to the end of the row.
pub fn compile_deserializer<T: Mapped>(
    cursor: &dyn RowCursor,
    start: usize,
    length: Option<usize>,
    absent_if_first_null: bool,
    config: &MapperConfig,
) -> Result<Deserializer<T>> {
    let count = cursor.field_count();
    let length = length.unwrap_or_else(|| count.saturating_sub(start));
    if length == 0 || start + length > count {
        return Err(Error::config(
            ConfigErrorKind::NoColumns,
            "No columns were selected",
        ));
    }

    match T::mapping() {
        Mapping::Dynamic(build) => Ok(compile_dynamic(start, length, absent_if_first_null, build)),
        Mapping::Scalar(scalar) => Ok(compile_scalar(
            scalar,
            start,
            absent_if_first_null,
            config.handlers(),
        )),
        Mapping::Record(type_map) => {
            compile_record(cursor, start, length, absent_if_first_null, type_map, config)
        }
    }
}

fn compile_dynamic<T: Send + 'static>(
    start: usize,
    length: usize,
    absent_if_first_null: bool,
    build: fn(Row) -> T,
) -> Deserializer<T> {
    tracing::debug!(start, length, "compiled dynamic row deserializer");
    let table: Arc<OnceLock<Arc<ColumnInfo>>> = Arc::new(OnceLock::new());
    Arc::new(move |cursor: &dyn RowCursor| {
        if absent_if_first_null && cursor.get_value(start).is_null() {
            return Ok(None);
        }
        let columns = Arc::clone(
            table.get_or_init(|| Arc::new(ColumnInfo::new(column_names(cursor, start, length)))),
        );
        let values = (start..start + length).map(|i| cursor.get_value(i)).collect();
        Ok(Some(build(Row::with_columns(columns, values))))
    })
}

fn compile_scalar<T: Send + 'static>(
    scalar: ScalarMap<T>,
    index: usize,
    absent_if_first_null: bool,
    handlers: &TypeHandlers,
) -> Deserializer<T> {
    tracing::debug!(
        target_type = std::any::type_name::<T>(),
        column = index,
        "compiled scalar deserializer"
    );
    let convert = scalar.converter(handlers);
    Arc::new(move |cursor: &dyn RowCursor| {
        let value = cursor.get_value(index);
        if value.is_null() {
            if absent_if_first_null {
                return Ok(None);
            }
            if let Some(default) = scalar.null_default() {
                return Ok(Some(default));
            }
        }
        convert(&value)
            .map(Some)
            .map_err(|err| decode_error(cursor, index, &value, err))
    })
}

fn compile_record<T: Mapped>(
    cursor: &dyn RowCursor,
    start: usize,
    length: usize,
    absent_if_first_null: bool,
    type_map: TypeMap<T>,
    config: &MapperConfig,
) -> Result<Deserializer<T>> {
    let resolver: Arc<dyn TypeResolver<T>> = match config.resolver::<T>() {
        Some(custom) => custom,
        None => Arc::new(type_map),
    };
    let names = column_names(cursor, start, length);
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let types: Vec<Option<DbType>> = (start..start + length).map(|i| cursor.field_type(i)).collect();

    if !resolver.construct_then_set() {
        if let Some(ctor) = resolver.find_constructor(&name_refs, &types) {
            let columns = (0..ctor.params().len())
                .map(|param| {
                    resolver
                        .constructor_parameter_column(ctor, param, &name_refs)
                        .map(|offset| start + offset)
                        .ok_or_else(|| {
                            Error::config(
                                ConfigErrorKind::NoConstructor,
                                format!(
                                    "constructor parameter '{}' of {} has no matching column",
                                    ctor.params()[param],
                                    resolver.type_name()
                                ),
                            )
                        })
                })
                .collect::<Result<Vec<usize>>>()?;
            tracing::debug!(
                target_type = resolver.type_name(),
                columns = ?name_refs,
                "compiled constructor deserializer"
            );
            let build = ctor.build_fn();
            let handlers = config.handlers().clone();
            return Ok(Arc::new(move |cursor: &dyn RowCursor| {
                if absent_if_first_null && cursor.get_value(start).is_null() {
                    return Ok(None);
                }
                let mut args = ArgReader::new(cursor, &columns, &handlers);
                build(&mut args).map(Some)
            }));
        }
    }

    let Some(construct) = resolver.default_constructor() else {
        return Err(Error::config(
            ConfigErrorKind::NoConstructor,
            format!(
                "A parameterless default constructor or one matching signature ({}) is required for {} materialization",
                describe_signature(&name_refs, &types),
                resolver.type_name()
            ),
        ));
    };

    let setters: Vec<(usize, Setter<T>)> = name_refs
        .iter()
        .enumerate()
        .filter_map(|(offset, name)| {
            resolver
                .find_member(name)
                .map(|member| (start + offset, member.setter(config.handlers())))
        })
        .collect();
    tracing::debug!(
        target_type = resolver.type_name(),
        columns = ?name_refs,
        bound = setters.len(),
        "compiled member deserializer"
    );

    Ok(Arc::new(move |cursor: &dyn RowCursor| {
        if absent_if_first_null && cursor.get_value(start).is_null() {
            return Ok(None);
        }
        let mut target = construct();
        for (index, set) in &setters {
            let value = cursor.get_value(*index);
            if value.is_null() {
                continue;
            }
            set(&mut target, &value).map_err(|err| decode_error(cursor, *index, &value, err))?;
        }
        Ok(Some(target))
    }))
}

fn describe_signature(names: &[&str], types: &[Option<DbType>]) -> String {
    names
        .iter()
        .zip(types)
        .map(|(name, ty)| match ty {
            Some(ty) => format!("{:?} {}", ty, name),
            None => (*name).to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmap_core::memory::{MemoryCursor, ResultSet};
    use rowmap_core::Value;

    #[derive(Debug, Default, PartialEq)]
    struct Post {
        id: i64,
        title: String,
        views: Option<i32>,
    }

    impl Mapped for Post {
        fn mapping() -> Mapping<Self> {
            Mapping::Record(
                TypeMap::<Self>::new()
                    .member::<i64>("id", |p, v| p.id = v)
                    .member::<String>("title", |p, v| p.title = v)
                    .member::<Option<i32>>("views", |p, v| p.views = v)
                    .default_constructor(Post::default),
            )
        }
    }

    #[derive(Debug, PartialEq)]
    struct Point {
        x: i32,
        y: i32,
    }

    impl Mapped for Point {
        fn mapping() -> Mapping<Self> {
            Mapping::Record(TypeMap::<Self>::new().constructor(&["x", "y"], |args| {
                Ok(Point {
                    x: args.take()?,
                    y: args.take()?,
                })
            }))
        }
    }

    fn cursor(set: ResultSet) -> MemoryCursor {
        let mut cursor = MemoryCursor::new(vec![set]);
        assert!(cursor.read().unwrap());
        cursor
    }

    #[test]
    fn test_setter_path_skips_unknown_and_null() {
        let c = cursor(
            ResultSet::new(["ID", "Title", "Extra", "Views"])
                .row([Value::BigInt(7), Value::Text("hi".into()), Value::Int(1), Value::Null]),
        );
        let d = compile_deserializer::<Post>(&c, 0, None, false, &MapperConfig::default()).unwrap();
        assert_eq!(
            d(&c).unwrap(),
            Some(Post {
                id: 7,
                title: "hi".into(),
                views: None,
            })
        );
    }

    #[test]
    fn test_constructor_path_matches_any_order() {
        let c = cursor(ResultSet::new(["Y", "X"]).row([Value::Int(2), Value::Int(1)]));
        let d = compile_deserializer::<Point>(&c, 0, None, false, &MapperConfig::default()).unwrap();
        assert_eq!(d(&c).unwrap(), Some(Point { x: 1, y: 2 }));
    }

    #[test]
    fn test_no_constructor() {
        let c = cursor(ResultSet::new(["x"]).row([Value::Int(2)]));
        let err = compile_deserializer::<Point>(&c, 0, None, false, &MapperConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::NoConstructor));
        assert!(err.to_string().contains("matching signature (Int32 x)"));
    }

    #[test]
    fn test_empty_range_is_no_columns() {
        let c = cursor(ResultSet::new(["x"]).row([Value::Int(2)]));
        let err = compile_deserializer::<i32>(&c, 1, None, false, &MapperConfig::default())
            .err()
            .unwrap();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::NoColumns));
    }

    #[test]
    fn test_scalar_null_and_absent() {
        let c = cursor(ResultSet::new(["n"]).row([Value::Null]));
        let config = MapperConfig::default();
        let d = compile_deserializer::<i64>(&c, 0, None, false, &config).unwrap();
        assert_eq!(d(&c).unwrap(), Some(0));
        let d = compile_deserializer::<Option<i64>>(&c, 0, None, false, &config).unwrap();
        assert_eq!(d(&c).unwrap(), Some(None));
        let d = compile_deserializer::<i64>(&c, 0, None, true, &config).unwrap();
        assert_eq!(d(&c).unwrap(), None);
    }

    #[test]
    fn test_decode_error_names_column() {
        let c = cursor(ResultSet::new(["id", "title"]).row([Value::Text("abc".into()), Value::Null]));
        let d = compile_deserializer::<Post>(&c, 0, None, false, &MapperConfig::default()).unwrap();
        let err = d(&c).unwrap_err();
        assert!(err.is_decode());
        assert_eq!(err.to_string(), "Error parsing column 0 (id=abc - TEXT)");
    }

    #[test]
    fn test_dynamic_rows_share_names() {
        let mut c = MemoryCursor::new(vec![
            ResultSet::new(["a", "b", "c"])
                .row([Value::Int(1), Value::Int(2), Value::Int(3)])
                .row([Value::Int(4), Value::Int(5), Value::Int(6)]),
        ]);
        let config = MapperConfig::default();
        assert!(c.read().unwrap());
        let d = compile_deserializer::<Row>(&c, 1, Some(2), false, &config).unwrap();
        let first = d(&c).unwrap().unwrap();
        assert!(c.read().unwrap());
        let second = d(&c).unwrap().unwrap();

        assert_eq!(first.column_info().names(), &["b".to_string(), "c".to_string()]);
        assert!(Arc::ptr_eq(&first.column_info(), &second.column_info()));
        assert_eq!(second.get_by_name("C"), Some(&Value::Int(6)));
    }

    #[test]
    fn test_construct_then_set_flag() {
        #[derive(Debug, Default, PartialEq)]
        struct Flagged {
            x: i32,
            from_ctor: bool,
        }
        impl Mapped for Flagged {
            fn mapping() -> Mapping<Self> {
                Mapping::Record(
                    TypeMap::<Self>::new()
                        .member::<i32>("x", |f, v| f.x = v)
                        .constructor(&["x"], |args| {
                            Ok(Flagged {
                                x: args.take()?,
                                from_ctor: true,
                            })
                        })
                        .default_constructor(Flagged::default)
                        .construct_then_set(),
                )
            }
        }
        let c = cursor(ResultSet::new(["x"]).row([Value::Int(3)]));
        let d = compile_deserializer::<Flagged>(&c, 0, None, false, &MapperConfig::default()).unwrap();
        assert_eq!(
            d(&c).unwrap(),
            Some(Flagged {
                x: 3,
                from_ctor: false,
            })
        );
    }
}
