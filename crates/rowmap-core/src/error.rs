//! Error types for rowmap operations.

use std::fmt;

/// The primary error type for all rowmap operations.
#[derive(Debug)]
pub enum Error {
    /// Mapping configuration problems (split markers, constructors, unsupported types)
    Config(ConfigError),
    /// A column value could not be converted while materializing a row
    Decode(DecodeError),
    /// The API was used out of order or with an unsupported argument
    Usage(UsageError),
    /// Raw value conversion failure
    Type(TypeError),
    /// Failure reported by the underlying command/cursor implementation
    Command(CommandError),
    /// The cursor observed cancellation
    Cancelled,
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub kind: ConfigErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    /// A split-on marker could not be located
    AmbiguousSplit,
    /// A segment or result set contained no columns
    NoColumns,
    /// No constructor strategy applies to the target type
    NoConstructor,
    /// A value cannot be used in the requested position
    UnsupportedType,
    /// A parameter object is internally inconsistent
    InvalidParameter,
}

/// A conversion failure attributed to one column of the current row.
#[derive(Debug)]
pub struct DecodeError {
    pub column_index: usize,
    pub column_name: String,
    /// `<null>` or `{value} - {TYPE}`
    pub value: String,
    pub source: Box<Error>,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// The grid reader has already released its cursor
    ReaderDisposed,
    /// A result index other than the next unread one was requested
    ResultOutOfOrder,
    /// The current result was started but not read to the end
    ResultNotConsumed,
    /// A multi-row batch was supplied where a single parameter object is required
    MultiExecNotAllowed,
    /// A pseudo-positional parameter was referenced more than once
    DuplicatePositional,
    /// A single-child map found more than one child for a key
    DuplicateChild,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
    pub rust_type: Option<&'static str>,
}

#[derive(Debug)]
pub struct CommandError {
    pub message: String,
    pub sql: Option<String>,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a configuration error.
    pub fn config(kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        Error::Config(ConfigError {
            kind,
            message: message.into(),
        })
    }

    /// Build a usage error.
    pub fn usage(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            kind,
            message: message.into(),
        })
    }

    /// Build a command error without an underlying cause.
    pub fn command(message: impl Into<String>) -> Self {
        Error::Command(CommandError {
            message: message.into(),
            sql: None,
            source: None,
        })
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Error::Usage(_))
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode(_))
    }

    /// Configuration error kind, if this is one.
    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self {
            Error::Config(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Usage error kind, if this is one.
    pub fn usage_kind(&self) -> Option<UsageErrorKind> {
        match self {
            Error::Usage(e) => Some(e.kind),
            _ => None,
        }
    }

    /// Attach a column name to a conversion error that has none yet.
    #[must_use]
    pub fn with_column(mut self, name: &str) -> Self {
        if let Error::Type(te) = &mut self {
            te.column.get_or_insert_with(|| name.to_string());
        }
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Decode(e) => fmt::Display::fmt(e, f),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Type(e) => write!(f, "Type error: {}", e),
            Error::Command(e) => write!(f, "Command error: {}", e.message),
            Error::Cancelled => f.write_str("Operation cancelled"),
            Error::Custom(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Decode(e) => Some(e.source.as_ref()),
            Error::Command(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error parsing column {} ({}={})",
            self.column_index, self.column_name, self.value
        )
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Display for TypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}", self.expected)?;
        if let Some(column) = &self.column {
            write!(f, " in column '{}'", column)?;
        }
        write!(f, ", found {}", self.actual)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sql {
            Some(sql) => write!(f, "{} (sql: {})", self.message, sql),
            None => f.write_str(&self.message),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<DecodeError> for Error {
    fn from(err: DecodeError) -> Self {
        Error::Decode(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<TypeError> for Error {
    fn from(err: TypeError) -> Self {
        Error::Type(err)
    }
}

impl From<CommandError> for Error {
    fn from(err: CommandError) -> Self {
        Error::Command(err)
    }
}

/// Result type alias for rowmap operations.
pub type Result<T> = std::result::Result<T, Error>;
