//! Multi-mapping: one row, several objects.
//!
//! The columns of a joined row are split into consecutive segments, one per
//! target type, at the columns named by `split_on`. Each segment gets its own
//! deserializer; the results are handed to a combinator as a tuple.

use std::sync::Arc;

use rowmap_core::{ConfigErrorKind, Error, Mapped, Mapping, Result, RowCursor, TypeKey};

use crate::cache::{ErasedDeserializer, erase_deserializer, typed_deserializer};
use crate::config::MapperConfig;
use crate::deserialize::{Deserializer, compile_deserializer};

/// How a multi-map target consumes columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Typed,
    /// Untyped rows; a dynamic first target splits left to right
    Dynamic,
    /// Consumes nothing
    Skip,
}

/// A run of columns bound to one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub length: usize,
}

/// Placeholder target for a position whose columns are not mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Skip;

impl Mapped for Skip {
    fn mapping() -> Mapping<Self> {
        Mapping::Dynamic(|_| Skip)
    }
}

fn ambiguous(split: &str) -> Error {
    Error::config(
        ConfigErrorKind::AmbiguousSplit,
        format!(
            "Multi-map error: split_on column '{}' was not found; ensure you set the split_on parameter if you have keys other than Id",
            split
        ),
    )
}

fn next_split_forward(start: usize, split: &str, names: &[String]) -> Result<usize> {
    if start == names.len() {
        return Err(ambiguous(split));
    }
    if split == "*" {
        return Ok(start + 1);
    }
    Ok((start + 1..names.len())
        .find(|&i| names[i].eq_ignore_ascii_case(split))
        .unwrap_or(names.len()))
}

fn next_split_backward(start: usize, split: &str, names: &[String]) -> Result<usize> {
    if split == "*" {
        return start.checked_sub(1).ok_or_else(|| ambiguous(split));
    }
    (1..start)
        .rev()
        .find(|&i| names[i].eq_ignore_ascii_case(split))
        .ok_or_else(|| ambiguous(split))
}

/// Split `names` into one segment per target.
///
/// The result is aligned with `targets`; skipped targets get `None`. When the
/// first target is dynamic the row is walked left to right and the walk stops
/// at the first skipped target. Otherwise the row is walked right to left so a
/// column named like a later split marker stays with its own object.
pub fn split_columns(
    targets: &[SegmentKind],
    split_on: &str,
    names: &[String],
) -> Result<Vec<Option<Segment>>> {
    if names.is_empty() {
        return Err(Error::config(
            ConfigErrorKind::NoColumns,
            "No columns were selected",
        ));
    }
    let splits: Vec<&str> = split_on.split(',').map(str::trim).collect();
    let multi = splits.len() > 1;
    let mut segments = vec![None; targets.len()];

    if targets.first() == Some(&SegmentKind::Dynamic) {
        let mut position = 0;
        let mut index = 0;
        for (i, kind) in targets.iter().enumerate() {
            if *kind == SegmentKind::Skip {
                break;
            }
            let split = next_split_forward(position, splits[index], names)?;
            if multi && index < splits.len() - 1 {
                index += 1;
            }
            segments[i] = Some(Segment {
                start: position,
                length: split - position,
            });
            position = split;
        }
    } else {
        let mut position = names.len();
        let mut index = splits.len() - 1;
        for (i, kind) in targets.iter().enumerate().rev() {
            if *kind == SegmentKind::Skip {
                continue;
            }
            let mut split = 0;
            if i > 0 {
                split = next_split_backward(position, splits[index], names)?;
                if multi && index > 0 {
                    index -= 1;
                }
            }
            segments[i] = Some(Segment {
                start: split,
                length: position - split,
            });
            position = split;
        }
    }
    Ok(segments)
}

fn kind_of<T: Mapped>() -> SegmentKind {
    if TypeKey::of::<T>() == TypeKey::of::<Skip>() {
        SegmentKind::Skip
    } else if T::DYNAMIC {
        SegmentKind::Dynamic
    } else {
        SegmentKind::Typed
    }
}

fn compile_segment<T: Mapped>(
    cursor: &dyn RowCursor,
    segment: Option<Segment>,
    absent_if_first_null: bool,
    config: &MapperConfig,
) -> Result<ErasedDeserializer> {
    let deserializer: Deserializer<T> = match segment {
        Some(segment) => compile_deserializer::<T>(
            cursor,
            segment.start,
            Some(segment.length),
            absent_if_first_null,
            config,
        )?,
        None => Arc::new(|_: &dyn RowCursor| Ok(None)),
    };
    Ok(erase_deserializer(deserializer))
}

fn read_segment<T: Mapped>(
    deserializer: Option<&ErasedDeserializer>,
    cursor: &dyn RowCursor,
) -> Result<Option<T>> {
    let deserializer = deserializer
        .and_then(typed_deserializer::<T>)
        .ok_or_else(|| {
            Error::Custom(format!(
                "no multi-map deserializer for {}",
                std::any::type_name::<T>()
            ))
        })?;
    deserializer(cursor)
}

/// A tuple of target types read from one row.
///
/// The first element is always present; later elements are `None` when the
/// first column of their segment is NULL, which is how an outer-joined row
/// with no match arrives.
pub trait MultiMapped: 'static {
    type Output;

    fn segment_kinds() -> Vec<SegmentKind>;

    fn type_keys() -> Vec<TypeKey>;

    /// One deserializer per target, in target order.
    fn compile(
        cursor: &dyn RowCursor,
        segments: &[Option<Segment>],
        config: &MapperConfig,
    ) -> Result<Vec<ErasedDeserializer>>;

    fn read(deserializers: &[ErasedDeserializer], cursor: &dyn RowCursor) -> Result<Self::Output>;
}

macro_rules! impl_multi_mapped {
    ($first:ident, $($rest:ident),+) => {
        impl<$first: Mapped, $($rest: Mapped),+> MultiMapped for ($first, $($rest),+) {
            type Output = ($first, $(Option<$rest>),+);

            fn segment_kinds() -> Vec<SegmentKind> {
                vec![kind_of::<$first>(), $(kind_of::<$rest>()),+]
            }

            fn type_keys() -> Vec<TypeKey> {
                vec![TypeKey::of::<$first>(), $(TypeKey::of::<$rest>()),+]
            }

            fn compile(
                cursor: &dyn RowCursor,
                segments: &[Option<Segment>],
                config: &MapperConfig,
            ) -> Result<Vec<ErasedDeserializer>> {
                let mut segments = segments.iter().copied();
                Ok(vec![
                    compile_segment::<$first>(cursor, segments.next().flatten(), false, config)?,
                    $(compile_segment::<$rest>(cursor, segments.next().flatten(), true, config)?),+
                ])
            }

            fn read(
                deserializers: &[ErasedDeserializer],
                cursor: &dyn RowCursor,
            ) -> Result<Self::Output> {
                let mut parts = deserializers.iter();
                let first = read_segment::<$first>(parts.next(), cursor)?.ok_or_else(|| {
                    Error::Custom(format!(
                        "multi-map produced no {}",
                        std::any::type_name::<$first>()
                    ))
                })?;
                Ok((first, $(read_segment::<$rest>(parts.next(), cursor)?),+))
            }
        }
    };
}

impl_multi_mapped!(A, B);
impl_multi_mapped!(A, B, C);
impl_multi_mapped!(A, B, C, D);
impl_multi_mapped!(A, B, C, D, E);
impl_multi_mapped!(A, B, C, D, E, F);
impl_multi_mapped!(A, B, C, D, E, F, G);

#[cfg(test)]
mod tests {
    use super::*;
    use rowmap_core::memory::{MemoryCursor, ResultSet};
    use rowmap_core::{Row, Value};

    use super::SegmentKind::{Dynamic, Skip as Skipped, Typed};

    fn names(cols: &[&str]) -> Vec<String> {
        cols.iter().map(|c| c.to_string()).collect()
    }

    fn seg(start: usize, length: usize) -> Option<Segment> {
        Some(Segment { start, length })
    }

    #[test]
    fn test_split_on_id() {
        let cols = names(&["Id", "Name", "Id", "Title", "Id", "Body"]);
        let segments = split_columns(&[Typed, Typed, Typed], "Id", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 2), seg(2, 2), seg(4, 2)]);
    }

    #[test]
    fn test_split_is_case_insensitive_and_trims() {
        let cols = names(&["id", "Name", "PostId", "Title", "userid"]);
        let segments = split_columns(&[Typed, Typed, Typed], " PostId , UserId ", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 2), seg(2, 2), seg(4, 1)]);
    }

    #[test]
    fn test_first_marker_is_reused() {
        let cols = names(&["Id", "A", "Id", "B", "Id", "C"]);
        let segments = split_columns(&[Typed, Typed, Typed], "Id,Id", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 2), seg(2, 2), seg(4, 2)]);
    }

    #[test]
    fn test_star_splits_single_columns() {
        let cols = names(&["a", "b", "c"]);
        let segments = split_columns(&[Typed, Typed, Typed], "*", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 1), seg(1, 1), seg(2, 1)]);
    }

    #[test]
    fn test_missing_marker_is_ambiguous() {
        let cols = names(&["Id", "Name", "Title"]);
        let err = split_columns(&[Typed, Typed], "PostId", &cols).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::AmbiguousSplit));
        assert!(err.to_string().contains("keys other than Id"));
    }

    #[test]
    fn test_no_columns() {
        let err = split_columns(&[Typed, Typed], "Id", &[]).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::NoColumns));
    }

    #[test]
    fn test_trailing_skip_is_ignored() {
        let cols = names(&["Id", "x", "Id", "y"]);
        let segments = split_columns(&[Typed, Typed, Skipped], "Id", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 2), seg(2, 2), None]);
    }

    #[test]
    fn test_dynamic_first_walks_left_to_right() {
        let cols = names(&["Id", "a", "Id", "b"]);
        let segments = split_columns(&[Dynamic, Typed], "Id", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 2), seg(2, 2)]);

        let segments = split_columns(&[Dynamic, Typed, Skipped], "Id", &cols).unwrap();
        assert_eq!(segments, vec![seg(0, 2), seg(2, 2), None]);

        let err = split_columns(&[Dynamic, Typed], "Id", &names(&["a", "b"])).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::AmbiguousSplit));
    }

    #[test]
    fn test_segment_kinds() {
        assert_eq!(<(i64, Row)>::segment_kinds(), vec![Typed, Dynamic]);
        assert_eq!(<(Row, i64, Skip)>::segment_kinds(), vec![Dynamic, Typed, Skipped]);
        assert_eq!(<(i64, String)>::type_keys(), vec![TypeKey::of::<i64>(), TypeKey::of::<String>()]);
    }

    #[test]
    fn test_outer_join_child_is_none() {
        let mut cursor = MemoryCursor::new(vec![
            ResultSet::new(["Id", "Id"])
                .row([Value::BigInt(1), Value::Text("a".into())])
                .row([Value::BigInt(2), Value::Null]),
        ]);
        let cols = names(&["Id", "Id"]);
        let segments = split_columns(&<(i64, String)>::segment_kinds(), "Id", &cols).unwrap();
        let config = MapperConfig::default();

        assert!(cursor.read().unwrap());
        let parts = <(i64, String)>::compile(&cursor, &segments, &config).unwrap();
        assert_eq!(<(i64, String)>::read(&parts, &cursor).unwrap(), (1, Some("a".to_string())));
        assert!(cursor.read().unwrap());
        assert_eq!(<(i64, String)>::read(&parts, &cursor).unwrap(), (2, None));
    }

    #[test]
    fn test_skip_position_reads_none() {
        let mut cursor = MemoryCursor::new(vec![
            ResultSet::new(["Id", "Id"]).row([Value::BigInt(1), Value::BigInt(2)]),
        ]);
        let cols = names(&["Id", "Id"]);
        let segments = split_columns(&<(i64, i64, Skip)>::segment_kinds(), "Id", &cols).unwrap();
        let config = MapperConfig::default();

        assert!(cursor.read().unwrap());
        let parts = <(i64, i64, Skip)>::compile(&cursor, &segments, &config).unwrap();
        assert_eq!(<(i64, i64, Skip)>::read(&parts, &cursor).unwrap(), (1, Some(2), None));
    }
}
