//! The mapper facade.
//!
//! [`Mapper`] ties the pieces together: it builds an [`Identity`] for each
//! call, fetches or builds the cached plan, binds parameters, executes the
//! command and materializes rows with the deserializer compiled for the
//! cursor's current shape.
//!
//! # Example
//!
//! ```ignore
//! use rowmap::prelude::*;
//!
//! #[derive(Mapped, Default)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! #[derive(Params)]
//! struct ById {
//!     id: i64,
//! }
//!
//! let mapper = Mapper::new();
//! let users: Vec<User> = mapper.query(&conn, "select id, name from users where id = @id", &ById { id: 1 })?;
//! ```

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use rowmap_core::{
    BindTarget, Command, ConfigErrorKind, Connection, DbType, DynamicParams, Error, FromValue,
    Mapped, Result, RowCursor, ToParams, TypeHandler, TypeKey, TypeResolver, converter,
};

use crate::binder::compile_binder;
use crate::cache::{
    CacheEntry, CachedSql, DeserializerSlot, ErasedBinder, ErasedDeserializer, PlanCache,
    erase_binder, erase_deserializer,
};
use crate::command::CommandDefinition;
use crate::config::{MapperConfig, MapperSettings};
use crate::deserialize::{Deserializer, compile_deserializer};
use crate::grid::GridReader;
use crate::identity::Identity;
use crate::multimap::{MultiMapped, split_columns};
use crate::shape::{column_names, fingerprint};

/// Binds, executes and materializes commands, caching compiled plans.
///
/// A mapper is `Send + Sync` and meant to be shared; configuration changes
/// swap in a new snapshot and invalidate the affected plans.
pub struct Mapper {
    config: RwLock<Arc<MapperConfig>>,
    cache: PlanCache,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("config", &self.config())
            .field("cache", &self.cache)
            .finish()
    }
}

impl Mapper {
    pub fn new() -> Self {
        Self::with_settings(MapperSettings::default())
    }

    pub fn with_settings(settings: MapperSettings) -> Self {
        Self {
            cache: PlanCache::new(settings.sweep_every, settings.hit_floor),
            config: RwLock::new(Arc::new(MapperConfig::new(settings))),
        }
    }

    /// The current configuration snapshot.
    pub fn config(&self) -> Arc<MapperConfig> {
        Arc::clone(&self.config.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Register a callback run once per full cache purge.
    pub fn on_purge<F>(&self, listener: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cache.add_purge_listener(Arc::new(listener));
    }

    pub fn purge_query_cache(&self) {
        self.cache.purge_all();
    }

    /// Cached statements with at most `ignore_hit_count_above` hits, most used first.
    pub fn cached_sql(&self, ignore_hit_count_above: Option<u64>) -> Vec<CachedSql> {
        self.cache.cached_sql(ignore_hit_count_above)
    }

    pub fn cached_sql_count(&self) -> usize {
        self.cache.len()
    }

    fn update<F: FnOnce(&mut MapperConfig)>(&self, change: F) {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = MapperConfig::clone(&guard);
        change(&mut next);
        *guard = Arc::new(next);
    }

    /// Use `handler` for members and columns of type `T`.
    pub fn add_type_handler<T, H>(&self, handler: H)
    where
        T: Send + 'static,
        H: TypeHandler<T>,
    {
        self.update(|config| config.register_handler::<T, H>(handler));
        tracing::debug!(handled_type = std::any::type_name::<T>(), "type handler added");
        self.cache.purge_all();
    }

    /// Bind members of type `T` with storage kind `db_type`.
    pub fn add_type_map<T: 'static>(&self, db_type: DbType) {
        self.update(|config| config.map_type(TypeKey::of::<T>(), db_type));
        tracing::debug!(mapped_type = std::any::type_name::<T>(), ?db_type, "type map added");
        self.cache.purge_all();
    }

    /// Remove every type handler and type map override.
    pub fn reset_type_handlers(&self) {
        self.update(MapperConfig::reset_handlers);
        self.cache.purge_all();
    }

    /// Resolve constructors and members of `T` through `resolver`.
    pub fn set_type_resolver<T, R>(&self, resolver: R)
    where
        T: 'static,
        R: TypeResolver<T> + 'static,
    {
        self.update(|config| config.set_resolver::<T>(Arc::new(resolver)));
        self.cache.purge_by_type(TypeKey::of::<T>());
    }

    fn identity<C, P>(
        &self,
        conn: &C,
        command: &CommandDefinition,
        config: &MapperConfig,
        primary: Option<TypeKey>,
        secondary: &[TypeKey],
    ) -> Identity
    where
        C: Connection,
        P: 'static,
    {
        let base = command
            .identity(conn.scope_key(), config.settings().identity)
            .with_primary(primary)
            .with_secondary(secondary);
        let params = TypeKey::of::<P>();
        if params == TypeKey::of::<DynamicParams>() {
            base.for_dynamic_parameters(params)
        } else {
            base.with_params(Some(params))
        }
    }

    fn plan<P: ToParams>(
        &self,
        identity: &Identity,
        params: &P,
        add_to_cache: bool,
        config: &MapperConfig,
    ) -> Result<Arc<CacheEntry>> {
        self.cache
            .get_or_build(identity, Some(params as &dyn ToParams), add_to_cache, || {
                Ok(Some(erase_binder(compile_binder::<P>(identity, config)?)))
            })
    }

    /// The entry of one grid result.
    ///
    /// A grid result identity only differs from a plain query's by its target
    /// types, so the entry carries the binder of the command that opened the
    /// grid.
    pub(crate) fn grid_entry(
        &self,
        identity: &Identity,
        add_to_cache: bool,
        binder: Option<ErasedBinder>,
    ) -> Result<Arc<CacheEntry>> {
        self.cache.get_or_build(identity, None, add_to_cache, || Ok(binder))
    }

    /// The deserializer for `T` over the cursor's current shape, compiled on a miss.
    pub(crate) fn row_deserializer<T: Mapped>(
        &self,
        entry: &CacheEntry,
        cursor: &dyn RowCursor,
        config: &MapperConfig,
    ) -> Result<Deserializer<T>> {
        let shape = fingerprint(cursor);
        if let Some(deserializer) = entry.slot_for(shape).and_then(|slot| slot.primary::<T>()) {
            return Ok(deserializer);
        }
        let deserializer = compile_deserializer::<T>(cursor, 0, None, false, config)?;
        self.cache.record_compile();
        entry.set_slot(DeserializerSlot::new(
            shape,
            erase_deserializer(Arc::clone(&deserializer)),
            Vec::new(),
        ));
        Ok(deserializer)
    }

    /// The per-segment deserializers for `M` over the cursor's current shape.
    pub(crate) fn multi_deserializers<M: MultiMapped>(
        &self,
        entry: &CacheEntry,
        cursor: &dyn RowCursor,
        split_on: &str,
        config: &MapperConfig,
    ) -> Result<Vec<ErasedDeserializer>> {
        let mut state = DefaultHasher::new();
        fingerprint(cursor).hash(&mut state);
        split_on.hash(&mut state);
        let shape = state.finish();
        if let Some(slot) = entry.slot_for(shape) {
            return Ok(slot.all());
        }

        let names = column_names(cursor, 0, cursor.field_count());
        let segments = split_columns(&M::segment_kinds(), split_on, &names)?;
        let parts = M::compile(cursor, &segments, config)?;
        for _ in segments.iter().flatten() {
            self.cache.record_compile();
        }
        let mut iter = parts.iter().cloned();
        if let Some(primary) = iter.next() {
            entry.set_slot(DeserializerSlot::new(shape, primary, iter.collect()));
        }
        Ok(parts)
    }

    /// Run a query and buffer every row of the first result as `T`.
    pub fn query<T, P, C>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        params: &P,
    ) -> Result<Vec<T>>
    where
        T: Mapped,
        P: ToParams,
        C: Connection,
    {
        let command = command.into();
        let config = self.config();
        let identity =
            self.identity::<C, P>(conn, &command, &config, Some(TypeKey::of::<T>()), &[]);
        let entry = self.plan(&identity, params, command.add_to_cache(), &config)?;

        let mut cmd = command.setup(conn)?;
        bind(&entry, &mut cmd, params)?;
        tracing::trace!(sql = cmd.command_text(), "executing query");
        let mut cursor = cmd.execute_reader()?;

        let rows = self.read_rows::<T, C::Command>(&entry, &mut cursor, &config);
        release(&mut cmd, &mut cursor, rows)
    }

    fn read_rows<T: Mapped, C: Command>(
        &self,
        entry: &CacheEntry,
        cursor: &mut C::Cursor,
        config: &MapperConfig,
    ) -> Result<Vec<T>> {
        if cursor.field_count() == 0 {
            return Ok(Vec::new());
        }
        let deserializer = self.row_deserializer::<T>(entry, &*cursor, config)?;
        let mut rows = Vec::new();
        while cursor.read()? {
            if let Some(row) = deserializer(&*cursor)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Run a query and stream the first result as `T`.
    ///
    /// The iterator owns the command and cursor; dropping it early cancels the
    /// command. With [`CommandDefinition::buffered`] every row is read first.
    pub fn query_iter<T, P, C>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        params: &P,
    ) -> Result<QueryIter<T, C::Command>>
    where
        T: Mapped,
        P: ToParams,
        C: Connection,
    {
        let command = command.into();
        let config = self.config();
        let identity =
            self.identity::<C, P>(conn, &command, &config, Some(TypeKey::of::<T>()), &[]);
        let entry = self.plan(&identity, params, command.add_to_cache(), &config)?;

        let mut cmd = command.setup(conn)?;
        bind(&entry, &mut cmd, params)?;
        tracing::trace!(sql = cmd.command_text(), "executing streaming query");
        let mut cursor = cmd.execute_reader()?;

        if command.flags().buffered {
            let rows = self.read_rows::<T, C::Command>(&entry, &mut cursor, &config);
            let rows = release(&mut cmd, &mut cursor, rows)?;
            return Ok(QueryIter {
                state: IterState::Buffered(rows.into_iter()),
            });
        }

        if cursor.field_count() == 0 {
            release(&mut cmd, &mut cursor, Ok(()))?;
            return Ok(QueryIter {
                state: IterState::Done,
            });
        }
        let deserializer = match self.row_deserializer::<T>(&entry, &cursor, &config) {
            Ok(deserializer) => deserializer,
            Err(e) => return release(&mut cmd, &mut cursor, Err(e)),
        };
        Ok(QueryIter {
            state: IterState::Streaming {
                command: cmd,
                cursor,
                deserializer,
            },
        })
    }

    /// Run a query whose rows hold several objects and combine each row with `map`.
    ///
    /// `split_on` defaults to the configured split marker.
    pub fn query_map<M, R, P, C, F>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        params: &P,
        split_on: Option<&str>,
        mut map: F,
    ) -> Result<Vec<R>>
    where
        M: MultiMapped,
        P: ToParams,
        C: Connection,
        F: FnMut(M::Output) -> R,
    {
        let command = command.into();
        let config = self.config();
        let keys = M::type_keys();
        let identity = self.identity::<C, P>(
            conn,
            &command,
            &config,
            keys.first().copied(),
            keys.get(1..).unwrap_or_default(),
        );
        let entry = self.plan(&identity, params, command.add_to_cache(), &config)?;
        let split_on = split_on.unwrap_or(&config.settings().split_on).to_string();

        let mut cmd = command.setup(conn)?;
        bind(&entry, &mut cmd, params)?;
        tracing::trace!(sql = cmd.command_text(), split_on = %split_on, "executing multi-map query");
        let mut cursor = cmd.execute_reader()?;

        let rows = self.read_mapped::<M, R, C::Command, F>(&entry, &mut cursor, &split_on, &config, &mut map);
        release(&mut cmd, &mut cursor, rows)
    }

    fn read_mapped<M, R, C, F>(
        &self,
        entry: &CacheEntry,
        cursor: &mut C::Cursor,
        split_on: &str,
        config: &MapperConfig,
        map: &mut F,
    ) -> Result<Vec<R>>
    where
        M: MultiMapped,
        C: Command,
        F: FnMut(M::Output) -> R,
    {
        if cursor.field_count() == 0 {
            return Ok(Vec::new());
        }
        let parts = self.multi_deserializers::<M>(entry, &*cursor, split_on, config)?;
        let mut rows = Vec::new();
        while cursor.read()? {
            rows.push(map(M::read(&parts, &*cursor)?));
        }
        Ok(rows)
    }

    /// Run a command producing several result sets and read them in order.
    pub fn query_multiple<P, C>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        params: &P,
    ) -> Result<GridReader<'_, C::Command>>
    where
        P: ToParams,
        C: Connection,
    {
        let command = command.into();
        let config = self.config();
        let identity = self.identity::<C, P>(conn, &command, &config, None, &[]);
        let entry = self.plan(&identity, params, command.add_to_cache(), &config)?;

        let mut cmd = command.setup(conn)?;
        bind(&entry, &mut cmd, params)?;
        tracing::trace!(sql = cmd.command_text(), "executing grid query");
        let cursor = cmd.execute_reader()?;
        Ok(GridReader::new(
            self,
            config,
            cmd,
            cursor,
            identity,
            command.add_to_cache(),
            entry.erased_binder(),
        ))
    }

    /// Execute a command and return the number of affected rows.
    pub fn execute<P, C>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        params: &P,
    ) -> Result<u64>
    where
        P: ToParams,
        C: Connection,
    {
        let command = command.into();
        let config = self.config();
        let identity = self.identity::<C, P>(conn, &command, &config, None, &[]);
        let entry = self.plan(&identity, params, command.add_to_cache(), &config)?;

        let mut cmd = command.setup(conn)?;
        bind(&entry, &mut cmd, params)?;
        tracing::trace!(sql = cmd.command_text(), "executing command");
        cmd.execute_non_query()
    }

    /// Execute a command once per element of `items` and sum the affected rows.
    ///
    /// One command is reused: its text is restored and its parameters cleared
    /// before each element is bound.
    pub fn execute_many<P, C>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        items: &[P],
    ) -> Result<u64>
    where
        P: ToParams,
        C: Connection,
    {
        let Some(first) = items.first() else {
            return Ok(0);
        };
        let command = command.into();
        let config = self.config();
        let identity = self.identity::<C, P>(conn, &command, &config, None, &[]);
        let entry = self.plan(&identity, first, command.add_to_cache(), &config)?;

        let mut cmd = command.setup(conn)?;
        let mut total = 0;
        for item in items {
            cmd.set_command_text(command.sql().to_string());
            cmd.parameters_mut().clear();
            bind(&entry, &mut cmd, item)?;
            total += cmd.execute_non_query()?;
        }
        tracing::trace!(sql = command.sql(), executions = items.len(), total, "executed batch");
        Ok(total)
    }

    /// Execute a command and convert the first column of the first row.
    ///
    /// NULL (or no row) becomes the type's null default when it has one.
    pub fn execute_scalar<T, P, C>(
        &self,
        conn: &C,
        command: impl Into<CommandDefinition>,
        params: &P,
    ) -> Result<T>
    where
        T: FromValue + Send + 'static,
        P: ToParams,
        C: Connection,
    {
        let command = command.into();
        let config = self.config();
        let identity = self.identity::<C, P>(conn, &command, &config, None, &[]);
        let entry = self.plan(&identity, params, command.add_to_cache(), &config)?;

        let mut cmd = command.setup(conn)?;
        bind(&entry, &mut cmd, params)?;
        tracing::trace!(sql = cmd.command_text(), "executing scalar");
        let value = cmd.execute_scalar()?;
        if value.is_null() {
            if let Some(default) = T::null_default() {
                return Ok(default);
            }
        }
        converter::<T>(config.handlers())(&value)
    }
}

fn bind<P: 'static>(entry: &CacheEntry, target: &mut dyn BindTarget, params: &P) -> Result<()> {
    match entry.binder::<P>() {
        Some(binder) => binder(target, params),
        None => Err(Error::config(
            ConfigErrorKind::InvalidParameter,
            format!(
                "The cached plan has no parameter binder for {}",
                std::any::type_name::<P>()
            ),
        )),
    }
}

/// Drain remaining results and close the cursor.
///
/// On failure the command is cancelled first and the read error is returned unchanged.
pub(crate) fn release<C: Command, T>(
    command: &mut C,
    cursor: &mut C::Cursor,
    outcome: Result<T>,
) -> Result<T> {
    let outcome = outcome.and_then(|value| {
        while cursor.next_result()? {}
        Ok(value)
    });
    if outcome.is_err() && !cursor.is_closed() {
        tracing::warn!("cancelling command after a failed read");
        command.cancel();
    }
    cursor.close();
    outcome
}

enum IterState<T, C: Command> {
    Streaming {
        command: C,
        cursor: C::Cursor,
        deserializer: Deserializer<T>,
    },
    Buffered(std::vec::IntoIter<T>),
    Done,
}

/// Rows of a streaming query.
pub struct QueryIter<T, C: Command> {
    state: IterState<T, C>,
}

impl<T, C: Command> Iterator for QueryIter<T, C> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        let outcome = loop {
            match &mut self.state {
                IterState::Buffered(rows) => return rows.next().map(Ok),
                IterState::Done => return None,
                IterState::Streaming {
                    cursor,
                    deserializer,
                    ..
                } => match cursor.read() {
                    Ok(true) => match deserializer(&*cursor) {
                        Ok(Some(row)) => return Some(Ok(row)),
                        Ok(None) => continue,
                        Err(e) => break Err(e),
                    },
                    Ok(false) => break Ok(()),
                    Err(e) => break Err(e),
                },
            }
        };

        match std::mem::replace(&mut self.state, IterState::Done) {
            IterState::Streaming {
                mut command,
                mut cursor,
                ..
            } => release(&mut command, &mut cursor, outcome).err().map(Err),
            _ => None,
        }
    }
}

impl<T, C: Command> Drop for QueryIter<T, C> {
    fn drop(&mut self) {
        if let IterState::Streaming {
            command, cursor, ..
        } = &mut self.state
        {
            if !cursor.is_closed() {
                tracing::warn!("cancelling command of a partially read query");
                command.cancel();
            }
            cursor.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowmap_core::memory::{MemoryConnection, ResultSet};
    use rowmap_core::{UsageErrorKind, Value};

    #[test]
    fn test_mapper_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Mapper>();
    }

    #[test]
    fn test_query_scalars_and_reuse() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        for _ in 0..2 {
            conn.push_result(
                ResultSet::new(["n"])
                    .row([Value::BigInt(1)])
                    .row([Value::BigInt(2)]),
            );
        }

        let first: Vec<i64> = mapper.query(&conn, "select n from t", &()).unwrap();
        let second: Vec<i64> = mapper.query(&conn, "select n from t", &()).unwrap();
        assert_eq!(first, vec![1, 2]);
        assert_eq!(second, vec![1, 2]);
        assert_eq!(mapper.cache().compile_count(), 1);
        assert_eq!(mapper.cached_sql_count(), 1);
        assert_eq!(conn.closed_cursors(), 2);
    }

    #[test]
    fn test_zero_field_cursor_yields_nothing() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_result(ResultSet::empty());
        let rows: Vec<i64> = mapper.query(&conn, "update t set x = 1", &()).unwrap();
        assert!(rows.is_empty());
        assert_eq!(mapper.cache().compile_count(), 0);
    }

    #[test]
    fn test_execute_rejects_batch() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        let err = mapper
            .execute(&conn, "insert into t values (@a)", &vec![()])
            .unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::MultiExecNotAllowed));
        assert!(conn.executed().is_empty());
    }

    #[test]
    fn test_execute_scalar_null_default() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_scalar(Value::Null);
        conn.push_scalar(Value::BigInt(9));
        let n: i64 = mapper.execute_scalar(&conn, "select max(id) from t", &()).unwrap();
        assert_eq!(n, 0);
        let n: Option<i64> = mapper.execute_scalar(&conn, "select max(id) from t", &()).unwrap();
        assert_eq!(n, Some(9));
    }

    #[test]
    fn test_binderless_entry_refuses_to_bind() {
        let entry = CacheEntry::new(None);
        let mut cmd = rowmap_core::memory::MemoryCommand::detached("select @id");
        let err = bind(&entry, &mut cmd, &()).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidParameter));
    }

    #[test]
    fn test_failed_read_cancels_and_keeps_error() {
        let mapper = Mapper::new();
        let conn = MemoryConnection::new("db");
        conn.push_result(ResultSet::new(["n"]).row([Value::Text("x".into())]));
        let err = mapper.query::<i64, _, _>(&conn, "select n", &()).unwrap_err();
        assert!(err.is_decode());
        assert_eq!(conn.cancellations(), 1);
        assert_eq!(conn.closed_cursors(), 1);
    }
}
