//! Cache keys for compiled plans.
//!
//! An [`Identity`] captures everything that decides how a command is bound and
//! how its rows are decoded: the SQL text, the command kind, the connection
//! scope, the target and parameter types and the grid position. The hash is
//! computed once at construction.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rowmap_core::{CommandKind, TypeKey};
use serde::{Deserialize, Serialize};

/// How SQL text or a connection scope is compared inside an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextComparison {
    #[default]
    Ordinal,
    OrdinalIgnoreCase,
}

impl TextComparison {
    fn text_eq(self, a: &str, b: &str) -> bool {
        match self {
            TextComparison::Ordinal => a == b,
            TextComparison::OrdinalIgnoreCase => a.eq_ignore_ascii_case(b),
        }
    }

    fn hash_into<H: Hasher>(self, text: &str, state: &mut H) {
        match self {
            TextComparison::Ordinal => text.hash(state),
            TextComparison::OrdinalIgnoreCase => {
                for b in text.bytes() {
                    state.write_u8(b.to_ascii_lowercase());
                }
                state.write_u8(0xff);
            }
        }
    }
}

/// Per-field text comparison of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityPolicy {
    pub sql: TextComparison,
    pub scope: TextComparison,
}

/// Immutable, hashable plan cache key.
#[derive(Clone)]
pub struct Identity {
    sql: Arc<str>,
    kind: CommandKind,
    scope: Arc<str>,
    primary: Option<TypeKey>,
    params: Option<TypeKey>,
    secondary: Arc<[TypeKey]>,
    grid_index: i32,
    policy: IdentityPolicy,
    hash: u64,
}

impl Identity {
    /// An identity for a simple query with no target or parameter types yet.
    pub fn new(sql: &str, kind: CommandKind, scope: &str, policy: IdentityPolicy) -> Self {
        Self {
            sql: Arc::from(sql),
            kind,
            scope: Arc::from(scope),
            primary: None,
            params: None,
            secondary: Arc::from(Vec::new()),
            grid_index: 0,
            policy,
            hash: 0,
        }
        .rehash()
    }

    #[must_use]
    pub fn with_primary(mut self, primary: Option<TypeKey>) -> Self {
        self.primary = primary;
        self.rehash()
    }

    #[must_use]
    pub fn with_params(mut self, params: Option<TypeKey>) -> Self {
        self.params = params;
        self.rehash()
    }

    #[must_use]
    pub fn with_secondary(mut self, secondary: &[TypeKey]) -> Self {
        self.secondary = Arc::from(secondary);
        self.rehash()
    }

    /// The identity of result `grid_index` of a grid read into `primary`.
    pub fn for_grid(&self, primary: TypeKey, grid_index: i32) -> Self {
        Self {
            primary: Some(primary),
            secondary: Arc::from(Vec::new()),
            grid_index,
            ..self.clone()
        }
        .rehash()
    }

    /// The identity of a multi-mapped grid read.
    pub fn for_grid_multi(&self, primary: TypeKey, secondary: &[TypeKey], grid_index: i32) -> Self {
        Self {
            primary: Some(primary),
            secondary: Arc::from(secondary),
            grid_index,
            ..self.clone()
        }
        .rehash()
    }

    /// The identity used for a runtime parameter bag of type `params`.
    pub fn for_dynamic_parameters(&self, params: TypeKey) -> Self {
        Self {
            params: Some(params),
            grid_index: -1,
            ..self.clone()
        }
        .rehash()
    }

    fn rehash(mut self) -> Self {
        let mut state = DefaultHasher::new();
        self.policy.sql.hash_into(&self.sql, &mut state);
        self.kind.hash(&mut state);
        self.policy.scope.hash_into(&self.scope, &mut state);
        self.primary.hash(&mut state);
        self.params.hash(&mut state);
        self.secondary.hash(&mut state);
        self.grid_index.hash(&mut state);
        self.policy.hash(&mut state);
        self.hash = state.finish();
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn primary(&self) -> Option<TypeKey> {
        self.primary
    }

    pub fn params(&self) -> Option<TypeKey> {
        self.params
    }

    pub fn secondary(&self) -> &[TypeKey] {
        &self.secondary
    }

    pub fn grid_index(&self) -> i32 {
        self.grid_index
    }

    pub fn hash_code(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.kind == other.kind
            && self.grid_index == other.grid_index
            && self.primary == other.primary
            && self.params == other.params
            && self.secondary == other.secondary
            && self.policy == other.policy
            && self.policy.sql.text_eq(&self.sql, &other.sql)
            && self.policy.scope.text_eq(&self.scope, &other.scope)
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("sql", &self.sql)
            .field("kind", &self.kind)
            .field("scope", &self.scope)
            .field("primary", &self.primary)
            .field("params", &self.params)
            .field("secondary", &self.secondary)
            .field("grid_index", &self.grid_index)
            .finish()
    }
}
