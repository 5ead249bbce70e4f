//! Plan caching for compiled binders and deserializers.
//!
//! Plans are keyed by [`Identity`]. The map is append-mostly: readers take a
//! shared lock and see either no entry or a fully built one. Every
//! `sweep_every` insertions the cache drops entries that were never reused.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rowmap_core::{Error, Result, ToParams, TypeKey, UsageErrorKind};

use crate::binder::ParamBinder;
use crate::deserialize::Deserializer;
use crate::identity::Identity;

/// A compiled binder, erased over its parameter type.
pub type ErasedBinder = Arc<dyn Any + Send + Sync>;

/// A compiled deserializer, erased over its target type.
pub type ErasedDeserializer = Arc<dyn Any + Send + Sync>;

/// Called once per [`PlanCache::purge_all`].
pub type PurgeListener = Arc<dyn Fn() + Send + Sync>;

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Erase a binder for storage in a [`CacheEntry`].
pub fn erase_binder<P: 'static>(binder: ParamBinder<P>) -> ErasedBinder {
    Arc::new(binder)
}

/// Erase a deserializer for storage in a [`DeserializerSlot`].
pub fn erase_deserializer<T: 'static>(deserializer: Deserializer<T>) -> ErasedDeserializer {
    Arc::new(deserializer)
}

/// Recover a typed deserializer.
pub fn typed_deserializer<T: 'static>(erased: &ErasedDeserializer) -> Option<Deserializer<T>> {
    erased.downcast_ref::<Deserializer<T>>().cloned()
}

/// The deserializers compiled for one column shape.
pub struct DeserializerSlot {
    shape: u64,
    primary: ErasedDeserializer,
    secondary: Vec<ErasedDeserializer>,
}

impl DeserializerSlot {
    pub fn new(shape: u64, primary: ErasedDeserializer, secondary: Vec<ErasedDeserializer>) -> Self {
        Self {
            shape,
            primary,
            secondary,
        }
    }

    pub fn shape(&self) -> u64 {
        self.shape
    }

    pub fn primary<T: 'static>(&self) -> Option<Deserializer<T>> {
        typed_deserializer(&self.primary)
    }

    /// Every deserializer, primary first.
    pub fn all(&self) -> Vec<ErasedDeserializer> {
        std::iter::once(Arc::clone(&self.primary))
            .chain(self.secondary.iter().cloned())
            .collect()
    }
}

/// One cached plan.
pub struct CacheEntry {
    hits: AtomicU64,
    binder: Option<ErasedBinder>,
    slot: RwLock<Option<Arc<DeserializerSlot>>>,
}

impl CacheEntry {
    pub fn new(binder: Option<ErasedBinder>) -> Self {
        Self {
            hits: AtomicU64::new(0),
            binder,
            slot: RwLock::new(None),
        }
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// The binder for parameter type `P`.
    pub fn binder<P: 'static>(&self) -> Option<ParamBinder<P>> {
        self.binder
            .as_ref()
            .and_then(|b| b.downcast_ref::<ParamBinder<P>>())
            .cloned()
    }

    /// The binder still erased, for entries that share it.
    pub fn erased_binder(&self) -> Option<ErasedBinder> {
        self.binder.clone()
    }

    /// The current deserializer slot, if any shape has been compiled.
    pub fn slot(&self) -> Option<Arc<DeserializerSlot>> {
        read(&self.slot).clone()
    }

    /// The current slot when it was built for `shape`.
    pub fn slot_for(&self, shape: u64) -> Option<Arc<DeserializerSlot>> {
        self.slot().filter(|slot| slot.shape == shape)
    }

    /// Replace the slot wholesale.
    pub fn set_slot(&self, slot: DeserializerSlot) -> Arc<DeserializerSlot> {
        let slot = Arc::new(slot);
        *write(&self.slot) = Some(Arc::clone(&slot));
        slot
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("hits", &self.hits())
            .field("has_binder", &self.binder.is_some())
            .field("shape", &self.slot().map(|s| s.shape))
            .finish()
    }
}

/// One row of [`PlanCache::cached_sql`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedSql {
    pub sql: String,
    pub scope: String,
    pub hits: u64,
}

/// Concurrent `Identity -> CacheEntry` store.
pub struct PlanCache {
    entries: RwLock<HashMap<Identity, Arc<CacheEntry>>>,
    insertions: AtomicU64,
    compiles: AtomicU64,
    sweep_every: u64,
    hit_floor: u64,
    listeners: RwLock<Vec<PurgeListener>>,
}

impl PlanCache {
    pub fn new(sweep_every: u64, hit_floor: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            insertions: AtomicU64::new(0),
            compiles: AtomicU64::new(0),
            sweep_every: sweep_every.max(1),
            hit_floor,
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Get the entry for `identity`, building and inserting it on a miss.
    ///
    /// The binder is only built on a miss. A multi-row batch can never be the
    /// example of a plan. When two callers race on the same identity the first
    /// insertion wins and both receive it.
    pub fn get_or_build<F>(
        &self,
        identity: &Identity,
        example_params: Option<&dyn ToParams>,
        add_to_cache: bool,
        build_binder: F,
    ) -> Result<Arc<CacheEntry>>
    where
        F: FnOnce() -> Result<Option<ErasedBinder>>,
    {
        if let Some(entry) = read(&self.entries).get(identity) {
            entry.hit();
            return Ok(Arc::clone(entry));
        }

        if example_params.is_some_and(|p| p.is_batch()) {
            return Err(Error::usage(
                UsageErrorKind::MultiExecNotAllowed,
                "An enumerable sequence of parameters (arrays, lists, etc) is not allowed in this context",
            ));
        }

        let entry = Arc::new(CacheEntry::new(build_binder()?));
        if !add_to_cache {
            return Ok(entry);
        }

        let mut entries = write(&self.entries);
        if let Some(existing) = entries.get(identity) {
            return Ok(Arc::clone(existing));
        }
        // The new entry is never part of the sweep that its insertion triggers.
        let count = self.insertions.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.sweep_every == 0 {
            self.sweep(&mut entries);
        }
        entries.insert(identity.clone(), Arc::clone(&entry));
        Ok(entry)
    }

    /// Look up an entry without counting a hit.
    pub fn peek(&self, identity: &Identity) -> Option<Arc<CacheEntry>> {
        read(&self.entries).get(identity).cloned()
    }

    fn sweep(&self, entries: &mut HashMap<Identity, Arc<CacheEntry>>) {
        let before = entries.len();
        entries.retain(|_, entry| entry.hits() > self.hit_floor);
        tracing::debug!(
            removed = before - entries.len(),
            remaining = entries.len(),
            "plan cache sweep"
        );
    }

    /// Register a listener notified on every [`purge_all`](Self::purge_all).
    pub fn add_purge_listener(&self, listener: PurgeListener) {
        write(&self.listeners).push(listener);
    }

    /// Remove every entry and notify purge listeners once.
    pub fn purge_all(&self) {
        let removed = {
            let mut entries = write(&self.entries);
            let n = entries.len();
            entries.clear();
            n
        };
        tracing::debug!(removed, "plan cache purged");
        let listeners = read(&self.listeners).clone();
        for listener in listeners {
            listener();
        }
    }

    /// Remove entries whose primary target type is `key`.
    pub fn purge_by_type(&self, key: TypeKey) {
        let mut entries = write(&self.entries);
        let before = entries.len();
        entries.retain(|identity, _| identity.primary() != Some(key));
        tracing::debug!(
            target_type = key.name(),
            removed = before - entries.len(),
            "plan cache purged by type"
        );
    }

    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        read(&self.entries).is_empty()
    }

    /// Cached statements with at most `ignore_hit_count_above` hits, most used first.
    pub fn cached_sql(&self, ignore_hit_count_above: Option<u64>) -> Vec<CachedSql> {
        let limit = ignore_hit_count_above.unwrap_or(u64::MAX);
        let mut rows: Vec<CachedSql> = read(&self.entries)
            .iter()
            .map(|(identity, entry)| CachedSql {
                sql: identity.sql().to_string(),
                scope: identity.scope().to_string(),
                hits: entry.hits(),
            })
            .filter(|row| row.hits <= limit)
            .collect();
        rows.sort_by(|a, b| b.hits.cmp(&a.hits).then_with(|| a.sql.cmp(&b.sql)));
        rows
    }

    /// Count one deserializer compilation.
    pub fn record_compile(&self) {
        self.compiles.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of deserializers compiled since this cache was created.
    pub fn compile_count(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(1000, 0)
    }
}

impl std::fmt::Debug for PlanCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanCache")
            .field("len", &self.len())
            .field("compiles", &self.compile_count())
            .field("sweep_every", &self.sweep_every)
            .field("hit_floor", &self.hit_floor)
            .finish()
    }
}
