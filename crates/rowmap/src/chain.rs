//! Parent/child stitching across grid results.
//!
//! ```ignore
//! let mut grid = mapper.query_multiple(&conn, "select * from posts; select * from comments", &())?;
//! let posts = grid
//!     .start_map::<Post>()?
//!     .next_many(|p: &Post| p.id, |c: &Comment| c.post_id, |p, comments| p.comments = comments)?
//!     .end();
//! ```
//!
//! Every parent whose key matches receives its own copy of the group.

use std::collections::HashMap;
use std::hash::Hash;

use rowmap_core::{Command, Error, Mapped, Result, UsageErrorKind};

use crate::grid::GridReader;
use crate::multimap::MultiMapped;

/// Parents read from one grid result, waiting for their children.
pub struct MapChain<'g, 'm, T, C: Command> {
    grid: &'g mut GridReader<'m, C>,
    parents: Vec<T>,
}

fn group_by<U, K, F>(children: Vec<U>, key: F) -> HashMap<K, Vec<U>>
where
    K: Eq + Hash,
    F: Fn(&U) -> K,
{
    let mut groups: HashMap<K, Vec<U>> = HashMap::new();
    for child in children {
        groups.entry(key(&child)).or_default().push(child);
    }
    groups
}

fn duplicate_child<U>() -> Error {
    Error::usage(
        UsageErrorKind::DuplicateChild,
        format!(
            "More than one {} row was found for a single-child key",
            std::any::type_name::<U>()
        ),
    )
}

impl<'g, 'm, T, C: Command> MapChain<'g, 'm, T, C> {
    pub(crate) fn new(grid: &'g mut GridReader<'m, C>, parents: Vec<T>) -> Self {
        Self { grid, parents }
    }

    /// Read the next result and attach each group of children to every parent
    /// with the same key. Parents without children get an empty list.
    pub fn next_many<U, K, PK, CK, A>(
        mut self,
        parent_key: PK,
        child_key: CK,
        attach: A,
    ) -> Result<Self>
    where
        U: Mapped + Clone,
        K: Eq + Hash,
        PK: Fn(&T) -> K,
        CK: Fn(&U) -> K,
        A: FnMut(&mut T, Vec<U>),
    {
        let children = self.grid.read::<U>()?;
        Ok(self.stitch_many(children, parent_key, child_key, attach))
    }

    /// [`next_many`](Self::next_many) over a multi-mapped result: each child
    /// is built from one row by `map`, as in [`GridReader::read_map`].
    pub fn next_many_map<M, U, F, K, PK, CK, A>(
        mut self,
        split_on: Option<&str>,
        map: F,
        parent_key: PK,
        child_key: CK,
        attach: A,
    ) -> Result<Self>
    where
        M: MultiMapped,
        F: FnMut(M::Output) -> U,
        U: Clone,
        K: Eq + Hash,
        PK: Fn(&T) -> K,
        CK: Fn(&U) -> K,
        A: FnMut(&mut T, Vec<U>),
    {
        let children = self.grid.read_map::<M, U, F>(split_on, map)?;
        Ok(self.stitch_many(children, parent_key, child_key, attach))
    }

    /// Read the next result and attach at most one child per parent key.
    ///
    /// A key with more than one child row is an error.
    pub fn next_single<U, K, PK, CK, A>(
        mut self,
        parent_key: PK,
        child_key: CK,
        attach: A,
    ) -> Result<Self>
    where
        U: Mapped + Clone,
        K: Eq + Hash,
        PK: Fn(&T) -> K,
        CK: Fn(&U) -> K,
        A: FnMut(&mut T, Option<U>),
    {
        let children = self.grid.read::<U>()?;
        self.stitch_single(children, parent_key, child_key, attach)
    }

    /// [`next_single`](Self::next_single) over a multi-mapped result.
    pub fn next_single_map<M, U, F, K, PK, CK, A>(
        mut self,
        split_on: Option<&str>,
        map: F,
        parent_key: PK,
        child_key: CK,
        attach: A,
    ) -> Result<Self>
    where
        M: MultiMapped,
        F: FnMut(M::Output) -> U,
        U: Clone,
        K: Eq + Hash,
        PK: Fn(&T) -> K,
        CK: Fn(&U) -> K,
        A: FnMut(&mut T, Option<U>),
    {
        let children = self.grid.read_map::<M, U, F>(split_on, map)?;
        self.stitch_single(children, parent_key, child_key, attach)
    }

    fn stitch_many<U, K, PK, CK, A>(
        mut self,
        children: Vec<U>,
        parent_key: PK,
        child_key: CK,
        mut attach: A,
    ) -> Self
    where
        U: Clone,
        K: Eq + Hash,
        PK: Fn(&T) -> K,
        CK: Fn(&U) -> K,
        A: FnMut(&mut T, Vec<U>),
    {
        let groups = group_by(children, child_key);
        for parent in &mut self.parents {
            let children = groups.get(&parent_key(parent)).cloned().unwrap_or_default();
            attach(parent, children);
        }
        self
    }

    fn stitch_single<U, K, PK, CK, A>(
        mut self,
        children: Vec<U>,
        parent_key: PK,
        child_key: CK,
        mut attach: A,
    ) -> Result<Self>
    where
        U: Clone,
        K: Eq + Hash,
        PK: Fn(&T) -> K,
        CK: Fn(&U) -> K,
        A: FnMut(&mut T, Option<U>),
    {
        let groups = group_by(children, child_key);
        if groups.values().any(|children| children.len() > 1) {
            return Err(duplicate_child::<U>());
        }
        for parent in &mut self.parents {
            let child = groups
                .get(&parent_key(parent))
                .and_then(|children| children.first().cloned());
            attach(parent, child);
        }
        Ok(self)
    }

    /// The parents with every child attached.
    pub fn end(self) -> Vec<T> {
        self.parents
    }
}

#[cfg(test)]
mod tests {
    use crate::grid::GridState;
    use crate::mapper::Mapper;
    use rowmap_core::memory::{MemoryConnection, ResultSet};
    use rowmap_core::{Row, UsageErrorKind, Value};

    fn key(row: &Row) -> i64 {
        row.get_named::<i64>("id").unwrap_or_default()
    }

    fn parent_id(row: &Row) -> i64 {
        row.get_named::<i64>("parent_id").unwrap_or_default()
    }

    #[test]
    fn test_next_many_and_single() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_results(vec![
            ResultSet::new(["id"]).row([Value::BigInt(1)]).row([Value::BigInt(2)]),
            ResultSet::new(["parent_id", "n"])
                .row([Value::BigInt(1), Value::Int(10)])
                .row([Value::BigInt(1), Value::Int(11)])
                .row([Value::BigInt(3), Value::Int(30)]),
            ResultSet::new(["parent_id", "label"]).row([Value::BigInt(2), Value::Text("b".into())]),
        ]);

        let mut grid = mapper.query_multiple(&conn, "select ...", &()).unwrap();
        let mut many: Vec<(i64, usize)> = Vec::new();
        let mut single: Vec<(i64, bool)> = Vec::new();
        let parents = grid
            .start_map::<Row>()
            .unwrap()
            .next_many(key, parent_id, |p: &mut Row, children: Vec<Row>| {
                many.push((key(p), children.len()));
            })
            .unwrap()
            .next_single(key, parent_id, |p: &mut Row, child: Option<Row>| {
                single.push((key(p), child.is_some()));
            })
            .unwrap()
            .end();

        assert_eq!(parents.len(), 2);
        assert_eq!(many, vec![(1, 2), (2, 0)]);
        assert_eq!(single, vec![(1, false), (2, true)]);
    }

    #[test]
    fn test_next_single_duplicate() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_results(vec![
            ResultSet::new(["id"]).row([Value::BigInt(1)]),
            ResultSet::new(["parent_id"])
                .row([Value::BigInt(1)])
                .row([Value::BigInt(1)]),
        ]);

        let mut grid = mapper.query_multiple(&conn, "select ...", &()).unwrap();
        let err = grid
            .start_map::<Row>()
            .unwrap()
            .next_single(key, parent_id, |_: &mut Row, _: Option<Row>| {})
            .err()
            .unwrap();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::DuplicateChild));
    }

    #[test]
    fn test_parents_sharing_a_key_each_get_the_children() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_results(vec![
            ResultSet::new(["id"]).row([Value::BigInt(1)]).row([Value::BigInt(1)]),
            ResultSet::new(["parent_id", "n"])
                .row([Value::BigInt(1), Value::Int(10)])
                .row([Value::BigInt(1), Value::Int(11)]),
            ResultSet::new(["parent_id"]).row([Value::BigInt(1)]),
        ]);

        let mut grid = mapper.query_multiple(&conn, "select ...", &()).unwrap();
        let mut counts = Vec::new();
        let mut singles = Vec::new();
        grid.start_map::<Row>()
            .unwrap()
            .next_many(key, parent_id, |_: &mut Row, children: Vec<Row>| {
                counts.push(children.len());
            })
            .unwrap()
            .next_single(key, parent_id, |_: &mut Row, child: Option<Row>| {
                singles.push(child.is_some());
            })
            .unwrap();

        assert_eq!(counts, vec![2, 2]);
        assert_eq!(singles, vec![true, true]);
    }

    #[test]
    fn test_next_many_map_reads_children_through_multi_map() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_results(vec![
            ResultSet::new(["id"]).row([Value::BigInt(1)]).row([Value::BigInt(2)]),
            ResultSet::new(["parent_id", "body", "id", "name"])
                .row([
                    Value::BigInt(1),
                    Value::Text("x".into()),
                    Value::BigInt(7),
                    Value::Text("ann".into()),
                ])
                .row([Value::BigInt(2), Value::Text("y".into()), Value::Null, Value::Null]),
        ]);

        let mut grid = mapper.query_multiple(&conn, "select ...", &()).unwrap();
        let mut authors: Vec<(i64, Vec<Option<String>>)> = Vec::new();
        grid.start_map::<Row>()
            .unwrap()
            .next_many_map::<(Row, Row), _, _, _, _, _, _>(
                Some("id"),
                |(comment, author): (Row, Option<Row>)| {
                    let name = author.and_then(|a| a.get_named::<String>("name").ok());
                    (parent_id(&comment), name)
                },
                key,
                |child: &(i64, Option<String>)| child.0,
                |p: &mut Row, children: Vec<(i64, Option<String>)>| {
                    authors.push((key(p), children.into_iter().map(|c| c.1).collect()));
                },
            )
            .unwrap();

        assert_eq!(
            authors,
            vec![(1, vec![Some("ann".to_string())]), (2, vec![None])]
        );
        assert_eq!(grid.state(), GridState::Consumed(1));
    }
}
