//! Command, cursor and connection capabilities.
//!
//! This module defines the seams between the mapper and a database driver:
//!
//! - [`RowCursor`] - forward-only reader over one or more result sets
//! - [`BindTarget`] - the part of a command a parameter binder may touch
//! - [`Command`] - an executable command producing counts, scalars or cursors
//! - [`Connection`] - a source of commands plus the scope discriminator used in cache keys
//! - [`CustomParameter`] - a parameter value that adds itself to a command
//!
//! Opening, closing and pooling connections are the driver's concern.

use crate::error::Result;
use crate::types::DbType;
use crate::value::Value;

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandKind {
    /// Ad-hoc SQL text
    #[default]
    Text,
    /// Name of a stored procedure
    StoredProcedure,
}

/// Parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// One named command parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    /// Name without a placeholder prefix
    pub name: String,
    pub value: Value,
    /// `None` leaves the choice to the driver
    pub db_type: Option<DbType>,
    pub direction: ParameterDirection,
    /// Declared size; `-1` means unbounded
    pub size: Option<i32>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            db_type: None,
            direction: ParameterDirection::Input,
            size: None,
        }
    }

    #[must_use]
    pub fn with_db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Ordered parameter collection owned by a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterCollection {
    items: Vec<Parameter>,
}

impl ParameterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter, replacing any existing parameter with the same name.
    pub fn add(&mut self, parameter: Parameter) {
        match self.position(&parameter.name) {
            Some(i) => self.items[i] = parameter,
            None => self.items.push(parameter),
        }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.position(name).map(|i| &self.items[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Parameter> {
        self.position(name).map(move |i| &mut self.items[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        self.position(name).map(|i| self.items.remove(i))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }

    /// Take every parameter out, leaving the collection empty.
    pub fn drain(&mut self) -> Vec<Parameter> {
        std::mem::take(&mut self.items)
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// Forward-only reader over the result sets of one executed command.
pub trait RowCursor {
    /// Number of columns in the current result set (0 when it has no shape).
    fn field_count(&self) -> usize;

    /// Name of the column at `index` in the current result set.
    fn field_name(&self, index: usize) -> &str;

    /// Native storage kind of the column, when the driver reports one.
    fn field_type(&self, index: usize) -> Option<DbType>;

    /// Value of the column at `index` in the current row.
    fn get_value(&self, index: usize) -> Value;

    /// Advance to the next row. Returns `Err(Error::Cancelled)` after cancellation.
    fn read(&mut self) -> Result<bool>;

    /// Advance to the next result set.
    fn next_result(&mut self) -> Result<bool>;

    fn is_closed(&self) -> bool;

    /// Release the cursor. Further reads report no rows.
    fn close(&mut self);
}

/// The part of a command a parameter binder may modify.
pub trait BindTarget {
    fn command_text(&self) -> &str;

    fn set_command_text(&mut self, text: String);

    fn command_kind(&self) -> CommandKind;

    fn parameters(&self) -> &ParameterCollection;

    fn parameters_mut(&mut self) -> &mut ParameterCollection;

    /// Whether one parameter may carry a whole list (`Value::Array`).
    fn supports_arrays(&self) -> bool {
        false
    }
}

/// An executable command.
pub trait Command: BindTarget {
    type Cursor: RowCursor;

    fn set_command_kind(&mut self, kind: CommandKind);

    /// Timeout in seconds; `None` uses the driver default.
    fn set_timeout(&mut self, seconds: Option<u32>);

    /// Execute and return the number of affected rows.
    fn execute_non_query(&mut self) -> Result<u64>;

    /// Execute and return the first column of the first row.
    fn execute_scalar(&mut self) -> Result<Value>;

    /// Execute and return a cursor over the produced result sets.
    fn execute_reader(&mut self) -> Result<Self::Cursor>;

    /// Request best-effort cancellation of an executing command.
    fn cancel(&mut self);
}

/// A source of commands.
pub trait Connection {
    type Command: Command;

    /// Discriminator distinguishing connections whose plans must not be shared
    /// (typically the connection string).
    fn scope_key(&self) -> &str;

    fn create_command(&self) -> Result<Self::Command>;
}

/// A parameter value that adds itself to a command.
pub trait CustomParameter: Send + Sync {
    fn add_parameter(&self, target: &mut dyn BindTarget, name: &str) -> Result<()>;
}
