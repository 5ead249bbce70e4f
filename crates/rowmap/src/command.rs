//! Command definitions.

use rowmap_core::{BindTarget, Command, CommandKind, Connection, Result};

use crate::identity::{Identity, IdentityPolicy};

/// Execution flags of a [`CommandDefinition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags {
    /// Read every row before an iterator is returned, releasing the cursor early.
    pub buffered: bool,
    /// Build plans for this command without adding them to the plan cache.
    pub no_cache: bool,
}

/// Everything needed to create and run one command.
///
/// `&str` and `String` convert into a text command with default flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandDefinition {
    sql: String,
    kind: CommandKind,
    timeout: Option<u32>,
    flags: CommandFlags,
}

impl CommandDefinition {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            kind: CommandKind::Text,
            timeout: None,
            flags: CommandFlags::default(),
        }
    }

    /// A call to the stored procedure `name`.
    pub fn stored_procedure(name: impl Into<String>) -> Self {
        Self {
            kind: CommandKind::StoredProcedure,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    #[must_use]
    pub fn buffered(mut self) -> Self {
        self.flags.buffered = true;
        self
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.flags.no_cache = true;
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn timeout(&self) -> Option<u32> {
        self.timeout
    }

    pub fn flags(&self) -> CommandFlags {
        self.flags
    }

    pub fn add_to_cache(&self) -> bool {
        !self.flags.no_cache
    }

    /// The base identity of this command on connection scope `scope`.
    pub fn identity(&self, scope: &str, policy: IdentityPolicy) -> Identity {
        Identity::new(&self.sql, self.kind, scope, policy)
    }

    /// Create a command on `conn` carrying this definition's text, kind and timeout.
    pub fn setup<C: Connection>(&self, conn: &C) -> Result<C::Command> {
        let mut command = conn.create_command()?;
        command.set_command_text(self.sql.clone());
        command.set_command_kind(self.kind);
        command.set_timeout(self.timeout);
        Ok(command)
    }
}

impl From<&str> for CommandDefinition {
    fn from(sql: &str) -> Self {
        Self::new(sql)
    }
}

impl From<String> for CommandDefinition {
    fn from(sql: String) -> Self {
        Self::new(sql)
    }
}

impl From<&String> for CommandDefinition {
    fn from(sql: &String) -> Self {
        Self::new(sql.as_str())
    }
}
