//! Error types for the database engine

use crate::entry::EntryId;
use crate::models::{BrowserId, ModelId, PropertyModelId};
use thiserror::Error;

/// Database errors
#[derive(Debug, Error)]
pub enum DbError {
    /// Schema, collaborator and query errors
    #[error(transparent)]
    Core(#[from] soul_core::SoulError),

    /// `insert` called twice for the same entry
    #[error("Entry {0} already inserted")]
    AlreadyInserted(EntryId),

    /// Another entry already owns the location
    #[error("Location {location} already used by entry {existing}")]
    DuplicateLocation { location: String, existing: EntryId },

    /// Id does not refer to a live entry
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Property cannot be set directly
    #[error("Property {0} is derived and cannot be set")]
    ReadOnlyProperty(&'static str),

    /// Property does not exist on this entry type
    #[error("Property {property} is not carried by {entry_type} entries")]
    NotApplicable {
        property: &'static str,
        entry_type: String,
    },

    /// Query model id is unknown
    #[error("Query model not found: {0}")]
    ModelNotFound(ModelId),

    /// Property model id is unknown
    #[error("Property model not found: {0}")]
    PropertyModelNotFound(PropertyModelId),

    /// Browser id is unknown
    #[error("Browser not found: {0}")]
    BrowserNotFound(BrowserId),

    /// Browser has fewer levels than requested
    #[error("Browser {browser} has no level {level}")]
    BrowserLevel { browser: BrowserId, level: usize },

    /// The coordinator is shutting down
    #[error("Database is shutting down")]
    ShuttingDown,

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Worker thread could not be started
    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl DbError {
    /// Programmer errors that abort debug builds
    pub fn is_programmer_error(&self) -> bool {
        match self {
            Self::AlreadyInserted(_) => true,
            Self::Core(e) => e.is_programmer_error(),
            _ => false,
        }
    }
}

impl From<DbError> for soul_core::SoulError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Core(e) => e,
            other => soul_core::SoulError::Other(other.to_string()),
        }
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, DbError>;
