//! A scripted in-memory driver.
//!
//! [`MemoryConnection`] replays queued responses (result sets, affected-row
//! counts, scalars, failures) in order and records every executed command,
//! cancellation and cursor close. It implements the same traits a real driver
//! does, so mapper behavior can be exercised without a database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::connection::{
    BindTarget, Command, CommandKind, Connection, Parameter, ParameterCollection, RowCursor,
};
use crate::error::{Error, Result};
use crate::types::DbType;
use crate::value::Value;

/// One scripted result set.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    columns: Vec<String>,
    types: Vec<Option<DbType>>,
    rows: Vec<Vec<Value>>,
}

impl ResultSet {
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        Self {
            types: vec![None; columns.len()],
            columns,
            rows: Vec::new(),
        }
    }

    /// A result set without columns (a statement that returns no rows).
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn row<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.rows.push(values.into_iter().map(Into::into).collect());
        self
    }

    /// Declare column types instead of inferring them from the first row.
    #[must_use]
    pub fn with_types<I: IntoIterator<Item = DbType>>(mut self, types: I) -> Self {
        for (slot, ty) in self.types.iter_mut().zip(types) {
            *slot = Some(ty);
        }
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    fn column_type(&self, index: usize) -> Option<DbType> {
        if let Some(Some(ty)) = self.types.get(index) {
            return Some(*ty);
        }
        self.rows
            .iter()
            .filter_map(|r| r.get(index))
            .find(|v| !v.is_null())
            .map(DbType::for_value)
    }
}

#[derive(Debug, Clone)]
enum Response {
    Rows(Vec<ResultSet>),
    Affected(u64),
    Scalar(Value),
    Fail(String),
}

/// A command as it was executed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedCommand {
    pub text: String,
    pub kind: CommandKind,
    pub parameters: Vec<Parameter>,
    pub timeout: Option<u32>,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<VecDeque<Response>>,
    log: Mutex<Vec<ExecutedCommand>>,
    cancellations: AtomicUsize,
    closed_cursors: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connection that replays scripted responses.
#[derive(Debug, Clone)]
pub struct MemoryConnection {
    scope: String,
    supports_arrays: bool,
    shared: Arc<Shared>,
}

impl MemoryConnection {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            supports_arrays: false,
            shared: Arc::new(Shared::default()),
        }
    }

    /// Commands from this connection accept `Value::Array` parameters.
    #[must_use]
    pub fn with_array_support(mut self) -> Self {
        self.supports_arrays = true;
        self
    }

    fn push(&self, response: Response) -> &Self {
        lock(&self.shared.script).push_back(response);
        self
    }

    /// Queue a response made of one or more result sets.
    pub fn push_results(&self, sets: Vec<ResultSet>) -> &Self {
        self.push(Response::Rows(sets))
    }

    /// Queue a single result set.
    pub fn push_result(&self, set: ResultSet) -> &Self {
        self.push(Response::Rows(vec![set]))
    }

    pub fn push_affected(&self, rows: u64) -> &Self {
        self.push(Response::Affected(rows))
    }

    pub fn push_scalar(&self, value: impl Into<Value>) -> &Self {
        self.push(Response::Scalar(value.into()))
    }

    /// Queue a driver failure.
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.push(Response::Fail(message.into()))
    }

    /// Every command executed so far, in order.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        lock(&self.shared.log).clone()
    }

    pub fn cancellations(&self) -> usize {
        self.shared.cancellations.load(Ordering::SeqCst)
    }

    pub fn closed_cursors(&self) -> usize {
        self.shared.closed_cursors.load(Ordering::SeqCst)
    }

    /// Responses not yet consumed.
    pub fn pending(&self) -> usize {
        lock(&self.shared.script).len()
    }
}

impl Connection for MemoryConnection {
    type Command = MemoryCommand;

    fn scope_key(&self) -> &str {
        &self.scope
    }

    fn create_command(&self) -> Result<MemoryCommand> {
        Ok(MemoryCommand {
            text: String::new(),
            kind: CommandKind::Text,
            parameters: ParameterCollection::new(),
            timeout: None,
            supports_arrays: self.supports_arrays,
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: Some(Arc::clone(&self.shared)),
        })
    }
}

/// A command of a [`MemoryConnection`].
#[derive(Debug)]
pub struct MemoryCommand {
    text: String,
    kind: CommandKind,
    parameters: ParameterCollection,
    timeout: Option<u32>,
    supports_arrays: bool,
    cancelled: Arc<AtomicBool>,
    shared: Option<Arc<Shared>>,
}

impl MemoryCommand {
    /// A command with no connection; executing it fails.
    pub fn detached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: CommandKind::Text,
            parameters: ParameterCollection::new(),
            timeout: None,
            supports_arrays: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: None,
        }
    }

    fn next_response(&mut self) -> Result<Response> {
        let shared = self
            .shared
            .as_ref()
            .ok_or_else(|| Error::command("command is not attached to a connection"))?;
        lock(&shared.log).push(ExecutedCommand {
            text: self.text.clone(),
            kind: self.kind,
            parameters: self.parameters.iter().cloned().collect(),
            timeout: self.timeout,
        });
        tracing::trace!(sql = %self.text, params = self.parameters.len(), "memory command executed");
        let response = lock(&shared.script)
            .pop_front()
            .ok_or_else(|| Error::command(format!("no scripted response for: {}", self.text)))?;
        match response {
            Response::Fail(message) => Err(Error::command(message)),
            other => Ok(other),
        }
    }
}

impl BindTarget for MemoryCommand {
    fn command_text(&self) -> &str {
        &self.text
    }

    fn set_command_text(&mut self, text: String) {
        self.text = text;
    }

    fn command_kind(&self) -> CommandKind {
        self.kind
    }

    fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    fn supports_arrays(&self) -> bool {
        self.supports_arrays
    }
}

impl Command for MemoryCommand {
    type Cursor = MemoryCursor;

    fn set_command_kind(&mut self, kind: CommandKind) {
        self.kind = kind;
    }

    fn set_timeout(&mut self, seconds: Option<u32>) {
        self.timeout = seconds;
    }

    fn execute_non_query(&mut self) -> Result<u64> {
        match self.next_response()? {
            Response::Affected(rows) => Ok(rows),
            _ => Ok(0),
        }
    }

    fn execute_scalar(&mut self) -> Result<Value> {
        match self.next_response()? {
            Response::Scalar(value) => Ok(value),
            Response::Rows(sets) => Ok(sets
                .first()
                .and_then(|s| s.rows.first())
                .and_then(|r| r.first())
                .cloned()
                .unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        }
    }

    fn execute_reader(&mut self) -> Result<MemoryCursor> {
        let sets = match self.next_response()? {
            Response::Rows(sets) => sets,
            _ => Vec::new(),
        };
        Ok(MemoryCursor {
            sets,
            set_index: 0,
            row_index: None,
            closed: false,
            cancelled: Arc::clone(&self.cancelled),
            shared: self.shared.clone(),
        })
    }

    fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(shared) = &self.shared {
            shared.cancellations.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Cursor over scripted result sets.
#[derive(Debug)]
pub struct MemoryCursor {
    sets: Vec<ResultSet>,
    set_index: usize,
    row_index: Option<usize>,
    closed: bool,
    cancelled: Arc<AtomicBool>,
    shared: Option<Arc<Shared>>,
}

impl MemoryCursor {
    /// A standalone cursor, positioned before the first row of the first set.
    pub fn new(sets: Vec<ResultSet>) -> Self {
        Self {
            sets,
            set_index: 0,
            row_index: None,
            closed: false,
            cancelled: Arc::new(AtomicBool::new(false)),
            shared: None,
        }
    }

    fn current_set(&self) -> Option<&ResultSet> {
        if self.closed {
            return None;
        }
        self.sets.get(self.set_index)
    }
}

impl RowCursor for MemoryCursor {
    fn field_count(&self) -> usize {
        self.current_set().map_or(0, |s| s.columns.len())
    }

    fn field_name(&self, index: usize) -> &str {
        self.current_set()
            .and_then(|s| s.columns.get(index))
            .map_or("", String::as_str)
    }

    fn field_type(&self, index: usize) -> Option<DbType> {
        self.current_set().and_then(|s| s.column_type(index))
    }

    fn get_value(&self, index: usize) -> Value {
        self.current_set()
            .zip(self.row_index)
            .and_then(|(s, r)| s.rows.get(r))
            .and_then(|row| row.get(index))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn read(&mut self) -> Result<bool> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::Cancelled);
        }
        let Some(len) = self.current_set().map(|s| s.rows.len()) else {
            return Ok(false);
        };
        let next = self.row_index.map_or(0, |r| r + 1);
        self.row_index = Some(next.min(len));
        Ok(next < len)
    }

    fn next_result(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.set_index += 1;
        self.row_index = None;
        Ok(self.set_index < self.sets.len())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            if let Some(shared) = &self.shared {
                shared.closed_cursors.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

impl Drop for MemoryCursor {
    fn drop(&mut self) {
        self.close();
    }
}
