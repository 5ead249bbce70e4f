//! Sequential reading of multiple result sets.
//!
//! A [`GridReader`] owns the command and cursor of one execution and hands
//! out its result sets strictly in order. Each result has its own plan
//! identity (the base identity plus the result index), so different results of
//! the same command cache their deserializers independently.

use std::sync::Arc;

use rowmap_core::{Command, Error, Mapped, Result, RowCursor, TypeKey, UsageErrorKind};

use crate::cache::ErasedBinder;
use crate::chain::MapChain;
use crate::config::MapperConfig;
use crate::deserialize::Deserializer;
use crate::identity::Identity;
use crate::mapper::Mapper;
use crate::multimap::MultiMapped;

/// Where a [`GridReader`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    /// Result `i` is current and not yet read.
    Pending(usize),
    /// Rows of result `i` were partially read.
    Reading(usize),
    /// Every row of result `i` was read.
    Consumed(usize),
    /// No results remain; the cursor and command are released.
    Exhausted,
}

fn disposed() -> Error {
    Error::usage(
        UsageErrorKind::ReaderDisposed,
        "The reader has been disposed; this can happen after all data has been consumed",
    )
}

fn grid_index(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// Reads the result sets of one command in order.
pub struct GridReader<'m, C: Command> {
    mapper: &'m Mapper,
    config: Arc<MapperConfig>,
    command: Option<C>,
    cursor: Option<C::Cursor>,
    identity: Identity,
    add_to_cache: bool,
    binder: Option<ErasedBinder>,
    state: GridState,
}

impl<'m, C: Command> GridReader<'m, C> {
    pub(crate) fn new(
        mapper: &'m Mapper,
        config: Arc<MapperConfig>,
        command: C,
        cursor: C::Cursor,
        identity: Identity,
        add_to_cache: bool,
        binder: Option<ErasedBinder>,
    ) -> Self {
        Self {
            mapper,
            config,
            command: Some(command),
            cursor: Some(cursor),
            identity,
            add_to_cache,
            binder,
            state: GridState::Pending(0),
        }
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    /// Whether every result has been read and the cursor released.
    pub fn is_consumed(&self) -> bool {
        self.state == GridState::Exhausted
    }

    /// Check that `requested` (or the next result) may be read and make it current.
    fn begin(&mut self, requested: Option<usize>) -> Result<usize> {
        let next = match self.state {
            GridState::Exhausted => return Err(disposed()),
            GridState::Reading(_) => {
                return Err(Error::usage(
                    UsageErrorKind::ResultNotConsumed,
                    "Query results must be consumed in the correct order, and each result can only be consumed once",
                ));
            }
            GridState::Pending(i) => i,
            GridState::Consumed(i) => i + 1,
        };
        if let Some(index) = requested {
            if index != next {
                return Err(Error::usage(
                    UsageErrorKind::ResultOutOfOrder,
                    format!("Result {} was requested but result {} is next", index, next),
                ));
            }
        }
        if let GridState::Consumed(i) = self.state {
            if !self.advance(i)? {
                return Err(disposed());
            }
        }
        Ok(next)
    }

    /// Move from result `current` to the next one; `false` when none remain.
    fn advance(&mut self, current: usize) -> Result<bool> {
        let cursor = self.cursor.as_mut().ok_or_else(disposed)?;
        match cursor.next_result() {
            Ok(true) => {
                tracing::trace!(index = current + 1, "grid advanced");
                self.state = GridState::Pending(current + 1);
                Ok(true)
            }
            Ok(false) => {
                tracing::trace!(results = current + 1, "grid exhausted");
                self.release(false);
                Ok(false)
            }
            Err(e) => {
                self.release(true);
                Err(e)
            }
        }
    }

    /// Close the cursor and drop the command, cancelling first when asked.
    fn release(&mut self, cancel: bool) {
        if let Some(mut cursor) = self.cursor.take() {
            if cancel && !cursor.is_closed() {
                if let Some(command) = self.command.as_mut() {
                    tracing::warn!(state = ?self.state, "cancelling grid command");
                    command.cancel();
                }
            }
            cursor.close();
        }
        self.command = None;
        self.state = GridState::Exhausted;
    }

    fn finish<T>(&mut self, index: usize, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.state = GridState::Consumed(index);
                Ok(value)
            }
            Err(e) => {
                self.release(true);
                Err(e)
            }
        }
    }

    fn deserializer<T: Mapped>(&self, index: usize) -> Result<Option<Deserializer<T>>> {
        let cursor = self.cursor.as_ref().ok_or_else(disposed)?;
        if cursor.field_count() == 0 {
            return Ok(None);
        }
        let identity = self
            .identity
            .for_grid(TypeKey::of::<T>(), grid_index(index));
        let entry = self
            .mapper
            .grid_entry(&identity, self.add_to_cache, self.binder.clone())?;
        self.mapper
            .row_deserializer::<T>(&entry, cursor, &self.config)
            .map(Some)
    }

    fn read_rows<T: Mapped>(&mut self, index: usize) -> Result<Vec<T>> {
        let Some(deserializer) = self.deserializer::<T>(index)? else {
            return Ok(Vec::new());
        };
        let cursor = self.cursor.as_mut().ok_or_else(disposed)?;
        let mut rows = Vec::new();
        while cursor.read()? {
            if let Some(row) = deserializer(&*cursor)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Buffer every row of the next result as `T`.
    pub fn read<T: Mapped>(&mut self) -> Result<Vec<T>> {
        let index = self.begin(None)?;
        self.state = GridState::Reading(index);
        let rows = self.read_rows::<T>(index);
        self.finish(index, rows)
    }

    /// Buffer result `index`, which must be the next unread result.
    pub fn read_result<T: Mapped>(&mut self, index: usize) -> Result<Vec<T>> {
        let index = self.begin(Some(index))?;
        self.state = GridState::Reading(index);
        let rows = self.read_rows::<T>(index);
        self.finish(index, rows)
    }

    /// Read the next result and return its first row, if any.
    pub fn read_first<T: Mapped>(&mut self) -> Result<Option<T>> {
        Ok(self.read::<T>()?.into_iter().next())
    }

    /// Stream the next result.
    ///
    /// Dropping the iterator before its end leaves the result partially read;
    /// call [`next_result`](Self::next_result) to discard the rest.
    pub fn read_iter<T: Mapped>(&mut self) -> Result<GridIter<'_, 'm, T, C>> {
        let index = self.begin(None)?;
        self.state = GridState::Reading(index);
        let deserializer = match self.deserializer::<T>(index) {
            Ok(deserializer) => deserializer,
            Err(e) => return self.finish(index, Err(e)),
        };
        Ok(GridIter {
            grid: self,
            deserializer,
            index,
            done: false,
        })
    }

    /// Read the next result as multi-mapped rows combined with `map`.
    pub fn read_map<M, R, F>(&mut self, split_on: Option<&str>, mut map: F) -> Result<Vec<R>>
    where
        M: MultiMapped,
        F: FnMut(M::Output) -> R,
    {
        let index = self.begin(None)?;
        self.state = GridState::Reading(index);
        let split_on = split_on.unwrap_or(&self.config.settings().split_on).to_string();
        let rows = self.read_mapped::<M, R, F>(index, &split_on, &mut map);
        self.finish(index, rows)
    }

    fn read_mapped<M, R, F>(&mut self, index: usize, split_on: &str, map: &mut F) -> Result<Vec<R>>
    where
        M: MultiMapped,
        F: FnMut(M::Output) -> R,
    {
        let cursor = self.cursor.as_mut().ok_or_else(disposed)?;
        if cursor.field_count() == 0 {
            return Ok(Vec::new());
        }
        let keys = M::type_keys();
        let primary = keys.first().copied().unwrap_or_else(TypeKey::of::<M>);
        let identity = self.identity.for_grid_multi(
            primary,
            keys.get(1..).unwrap_or_default(),
            grid_index(index),
        );
        let entry = self
            .mapper
            .grid_entry(&identity, self.add_to_cache, self.binder.clone())?;
        let parts = self
            .mapper
            .multi_deserializers::<M>(&entry, &*cursor, split_on, &self.config)?;
        let mut rows = Vec::new();
        while cursor.read()? {
            rows.push(map(M::read(&parts, &*cursor)?));
        }
        Ok(rows)
    }

    /// Read the next result as parents of a [`MapChain`].
    pub fn start_map<T: Mapped>(&mut self) -> Result<MapChain<'_, 'm, T, C>> {
        let parents = self.read::<T>()?;
        Ok(MapChain::new(self, parents))
    }

    /// Discard whatever remains of the current result and move to the next.
    ///
    /// Returns `false` once no results remain.
    pub fn next_result(&mut self) -> Result<bool> {
        match self.state {
            GridState::Exhausted => Ok(false),
            GridState::Pending(i) | GridState::Reading(i) | GridState::Consumed(i) => {
                self.advance(i)
            }
        }
    }
}

impl<C: Command> Drop for GridReader<'_, C> {
    fn drop(&mut self) {
        if self.cursor.is_none() {
            return;
        }
        // Read to the end of the last result: nothing left to cancel.
        if let GridState::Consumed(i) = self.state {
            if let Ok(false) = self.advance(i) {
                return;
            }
        }
        self.release(true);
    }
}

/// Rows of one grid result, streamed.
pub struct GridIter<'g, 'm, T, C: Command> {
    grid: &'g mut GridReader<'m, C>,
    deserializer: Option<Deserializer<T>>,
    index: usize,
    done: bool,
}

impl<T, C: Command> Iterator for GridIter<'_, '_, T, C> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        if self.done {
            return None;
        }
        let Some(deserializer) = self.deserializer.as_ref() else {
            self.done = true;
            self.grid.state = GridState::Consumed(self.index);
            return None;
        };
        let outcome = loop {
            let Some(cursor) = self.grid.cursor.as_mut() else {
                break Err(disposed());
            };
            match cursor.read() {
                Ok(true) => match deserializer(&*cursor) {
                    Ok(Some(row)) => return Some(Ok(row)),
                    Ok(None) => continue,
                    Err(e) => break Err(e),
                },
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.done = true;
        self.grid.finish(self.index, outcome).err().map(Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmap_core::Value;
    use rowmap_core::memory::{MemoryConnection, ResultSet};

    fn three_results(conn: &MemoryConnection) {
        conn.push_results(vec![
            ResultSet::new(["a"]).row([Value::BigInt(1)]).row([Value::BigInt(2)]),
            ResultSet::new(["b"]).row([Value::Text("x".into())]),
            ResultSet::new(["c"]).row([Value::Bool(true)]),
        ]);
    }

    #[test]
    fn test_reads_in_order() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        three_results(&conn);

        let mut grid = mapper.query_multiple(&conn, "select a; select b; select c", &()).unwrap();
        assert_eq!(grid.read::<i64>().unwrap(), vec![1, 2]);
        assert_eq!(grid.read::<String>().unwrap(), vec!["x".to_string()]);
        assert_eq!(grid.read_result::<bool>(2).unwrap(), vec![true]);
        assert_eq!(grid.state(), GridState::Consumed(2));

        let err = grid.read::<i64>().unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::ReaderDisposed));
        assert!(grid.is_consumed());
        drop(grid);
        assert_eq!(conn.cancellations(), 0);
        assert_eq!(conn.closed_cursors(), 1);
    }

    #[test]
    fn test_out_of_order() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        three_results(&conn);

        let mut grid = mapper.query_multiple(&conn, "select a; select b; select c", &()).unwrap();
        let err = grid.read_result::<String>(1).unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::ResultOutOfOrder));
        assert_eq!(grid.state(), GridState::Pending(0));
        assert_eq!(grid.read_result::<i64>(0).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_partial_iteration_blocks_next_read() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        three_results(&conn);

        let mut grid = mapper.query_multiple(&conn, "select a; select b; select c", &()).unwrap();
        {
            let mut rows = grid.read_iter::<i64>().unwrap();
            assert_eq!(rows.next().unwrap().unwrap(), 1);
        }
        assert_eq!(grid.state(), GridState::Reading(0));
        let err = grid.read::<String>().unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::ResultNotConsumed));

        assert!(grid.next_result().unwrap());
        assert_eq!(grid.read::<String>().unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_full_iteration_consumes() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        three_results(&conn);

        let mut grid = mapper.query_multiple(&conn, "select a; select b; select c", &()).unwrap();
        let rows: Vec<i64> = grid.read_iter::<i64>().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(rows, vec![1, 2]);
        assert_eq!(grid.state(), GridState::Consumed(0));
    }

    #[test]
    fn test_drop_with_unread_results_cancels() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        three_results(&conn);

        let mut grid = mapper.query_multiple(&conn, "select a; select b; select c", &()).unwrap();
        grid.read::<i64>().unwrap();
        drop(grid);
        assert_eq!(conn.cancellations(), 1);
        assert_eq!(conn.closed_cursors(), 1);
    }

    #[test]
    fn test_grid_results_cache_separately() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        three_results(&conn);
        three_results(&conn);

        for _ in 0..2 {
            let mut grid = mapper.query_multiple(&conn, "select a; select b; select c", &()).unwrap();
            grid.read::<i64>().unwrap();
            grid.read::<String>().unwrap();
            grid.read::<bool>().unwrap();
        }
        assert_eq!(mapper.cache().compile_count(), 3);
    }
}
