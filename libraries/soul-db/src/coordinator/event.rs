//! Outcomes delivered back to the mutating thread

use crate::entry::EntryId;
use crate::models::ModelId;
use crate::monitor::WatcherEvent;
use soul_core::types::{EntryRecord, FileStat, MetadataLoad, PropType, Value};
use soul_core::SoulError;

/// A queued result for the mutating thread
#[derive(Debug)]
pub enum Event {
    /// Result of a stat action
    Stat {
        uri: String,
        result: Result<FileStat, SoulError>,
        /// Whether the entry's mount point still exists, checked on failure
        mount_present: bool,
    },
    /// Result of a metadata load action
    MetadataLoaded {
        uri: String,
        stat: Option<FileStat>,
        result: Result<MetadataLoad, SoulError>,
    },
    /// Result of a tag sync action
    TagsSynced {
        uri: String,
        result: Result<(), SoulError>,
    },
    /// Property change queued from another thread
    EntrySet {
        id: EntryId,
        prop: PropType,
        value: Value,
    },
    /// Files found below a scanned directory
    ScanResult {
        uri: String,
        result: Result<Vec<String>, SoulError>,
    },
    /// Debounced change reported by a directory monitor
    FileChanged(WatcherEvent),
    /// Records read by a load worker
    LoadComplete(Result<Vec<EntryRecord>, SoulError>),
    /// Outcome of a save worker
    SaveComplete(Result<(), SoulError>),
    /// Full query finished; `None` when it was cancelled
    QueryFinished {
        model: ModelId,
        generation: u64,
        results: Option<Vec<EntryId>>,
    },
    /// An ephemeral worker has finished
    ThreadExited,
}

impl Event {
    /// Events that mutate the store and must wait for the read lock
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Stat { .. }
                | Self::MetadataLoaded { .. }
                | Self::EntrySet { .. }
                | Self::ScanResult { .. }
                | Self::FileChanged(_)
                | Self::LoadComplete(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Stat { .. } => "stat",
            Self::MetadataLoaded { .. } => "metadata-loaded",
            Self::TagsSynced { .. } => "tags-synced",
            Self::EntrySet { .. } => "entry-set",
            Self::ScanResult { .. } => "scan-result",
            Self::FileChanged(_) => "file-changed",
            Self::LoadComplete(_) => "load-complete",
            Self::SaveComplete(_) => "save-complete",
            Self::QueryFinished { .. } => "query-finished",
            Self::ThreadExited => "thread-exited",
        }
    }
}
