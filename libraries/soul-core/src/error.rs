/// Core error types for Soul DB
use crate::types::PropKind;
use thiserror::Error;

/// Result type alias using `SoulError`
pub type Result<T> = std::result::Result<T, SoulError>;

/// Core error type shared by the database and its collaborators
#[derive(Error, Debug)]
pub enum SoulError {
    /// A file or directory could not be stat'ed or opened
    #[error("Cannot access {uri}: {reason}")]
    AccessError { uri: String, reason: String },

    /// The tag reader declined the file
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A value does not match the property's declared kind
    #[error("Type mismatch on {property}: expected {expected}, found {found}")]
    TypeMismatch {
        property: &'static str,
        expected: PropKind,
        found: PropKind,
    },

    /// Writing tags or the database failed
    #[error("Save failed: {0}")]
    SaveError(String),

    /// Property name not in the descriptor table
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// Entry type name not registered
    #[error("Unknown entry type: {0}")]
    UnknownEntryType(String),

    /// Text could not be decoded into a property value
    #[error("Invalid {kind} value: {value:?}")]
    InvalidValue { kind: String, value: String },

    /// Malformed query
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl SoulError {
    /// Create an access error
    pub fn access(uri: impl Into<String>, reason: impl ToString) -> Self {
        Self::AccessError {
            uri: uri.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a save error
    pub fn save(msg: impl Into<String>) -> Self {
        Self::SaveError(msg.into())
    }

    /// Create an unsupported format error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create an invalid value error
    pub fn invalid_value(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Programmer errors that abort debug builds
    pub fn is_programmer_error(&self) -> bool {
        matches!(self, Self::TypeMismatch { .. })
    }
}
