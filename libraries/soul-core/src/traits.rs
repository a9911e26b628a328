/// Collaborator traits
///
/// The database never touches files or tags itself. Background workers call
/// these traits and hand the outcomes back to the mutating thread.
use crate::error::Result;
use crate::types::{EntryRecord, FileStat, MetadataLoad, PropType, Value};

/// Tag reader/writer
///
/// Implementations are called from the serial action worker only, so they
/// need not be safe against concurrent use of the same file.
pub trait MetadataReader: Send + Sync {
    /// Read the tags of the file at `uri`
    ///
    /// # Errors
    /// `UnsupportedFormat` if the file is not a media file this reader
    /// understands, `AccessError` if it cannot be opened
    fn load(&self, uri: &str) -> Result<MetadataLoad>;

    /// Write `fields` into the tags of the file at `uri`
    ///
    /// # Errors
    /// `SaveError` if the tags could not be written
    fn save(&self, uri: &str, fields: &[(PropType, Value)]) -> Result<()>;
}

/// File system access
pub trait FileIo: Send + Sync {
    /// Size and modification time of the file at `uri`
    ///
    /// # Errors
    /// `AccessError` if the file is missing or unreadable
    fn stat(&self, uri: &str) -> Result<FileStat>;

    /// Whether `uri` (file or directory) exists
    fn exists(&self, uri: &str) -> bool;

    /// Media files below the directory at `uri`, recursively
    fn list_files(&self, uri: &str) -> Result<Vec<String>>;
}

/// Persistence primitive
///
/// Only round-trip fidelity is required: every record passed to `save` must
/// come back equal from the next `load`.
pub trait StorageBackend: Send + Sync {
    /// Replace the stored database with `records`
    fn save(&self, records: &[EntryRecord]) -> Result<()>;

    /// Read every stored record
    fn load(&self) -> Result<Vec<EntryRecord>>;
}
