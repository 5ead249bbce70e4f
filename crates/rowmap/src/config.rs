//! Mapper configuration.
//!
//! [`MapperConfig`] is an immutable snapshot: the [`Mapper`](crate::Mapper)
//! clones it, applies a change and swaps the new snapshot in, so compiled plans
//! always see one consistent configuration. [`MapperSettings`] holds the plain
//! tunables and can be loaded from JSON.

use std::collections::HashMap;
use std::sync::Arc;

use rowmap_core::{
    DbType, Error, ErasedResolver, Result, TypeHandler, TypeHandlers, TypeKey, TypeResolver,
};
use serde::{Deserialize, Serialize};

use crate::identity::IdentityPolicy;

/// Plain mapper tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperSettings {
    /// Sweep the plan cache after this many insertions.
    pub sweep_every: u64,
    /// A sweep removes entries with at most this many hits.
    pub hit_floor: u64,
    /// Split-on used by multi-mapping when the caller passes none.
    pub split_on: String,
    /// Size given to text parameters up to this many characters; longer text gets -1.
    pub string_length: usize,
    /// How identities compare SQL text and connection scopes.
    pub identity: IdentityPolicy,
}

impl Default for MapperSettings {
    fn default() -> Self {
        Self {
            sweep_every: 1000,
            hit_floor: 0,
            split_on: "Id".to_string(),
            string_length: 4000,
            identity: IdentityPolicy::default(),
        }
    }
}

impl MapperSettings {
    /// Parse settings from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(text)
            .map_err(|e| Error::Custom(format!("invalid mapper settings: {}", e)))?;
        if settings.sweep_every == 0 {
            return Err(Error::Custom(
                "invalid mapper settings: sweep_every must be at least 1".to_string(),
            ));
        }
        Ok(settings)
    }
}

/// One configuration snapshot.
#[derive(Clone, Default)]
pub struct MapperConfig {
    settings: MapperSettings,
    handlers: TypeHandlers,
    type_map: HashMap<TypeKey, DbType>,
    resolvers: HashMap<TypeKey, ErasedResolver>,
}

impl MapperConfig {
    pub fn new(settings: MapperSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &MapperSettings {
        &self.settings
    }

    pub fn handlers(&self) -> &TypeHandlers {
        &self.handlers
    }

    /// The storage kind override for a member type, if any.
    pub fn db_type_for(&self, key: TypeKey) -> Option<DbType> {
        self.type_map.get(&key).copied()
    }

    /// The resolver registered for `T`, if any.
    pub fn resolver<T: 'static>(&self) -> Option<Arc<dyn TypeResolver<T>>> {
        self.resolvers
            .get(&TypeKey::of::<T>())
            .and_then(|erased| erased.downcast_ref::<Arc<dyn TypeResolver<T>>>())
            .cloned()
    }

    pub(crate) fn register_handler<T, H>(&mut self, handler: H)
    where
        T: Send + 'static,
        H: TypeHandler<T>,
    {
        self.type_map.remove(&TypeKey::of::<T>());
        self.handlers.register::<T, H>(handler);
    }

    pub(crate) fn map_type(&mut self, key: TypeKey, db_type: DbType) {
        self.handlers.remove(key);
        self.type_map.insert(key, db_type);
    }

    pub(crate) fn set_resolver<T: 'static>(&mut self, resolver: Arc<dyn TypeResolver<T>>) {
        self.resolvers
            .insert(TypeKey::of::<T>(), Arc::new(resolver) as ErasedResolver);
    }

    pub(crate) fn reset_handlers(&mut self) {
        self.handlers.clear();
        self.type_map.clear();
    }
}

impl std::fmt::Debug for MapperConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapperConfig")
            .field("settings", &self.settings)
            .field("handlers", &self.handlers)
            .field("type_map", &self.type_map)
            .field("resolvers", &self.resolvers.keys().collect::<Vec<_>>())
            .finish()
    }
}
