//! Background I/O requests

use soul_core::types::{PropType, Value};

/// What the action worker should do with a URI
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Stat the file; `mountpoint` is checked when the stat fails
    Stat { mountpoint: Option<String> },
    /// Stat the file and read its tags
    LoadMetadata,
    /// Write tag values back into the file
    SyncTags(Vec<(PropType, Value)>),
}

/// A queued request for the serial action worker
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub uri: String,
}

impl Action {
    pub fn stat(uri: impl Into<String>, mountpoint: Option<String>) -> Self {
        Self {
            kind: ActionKind::Stat { mountpoint },
            uri: uri.into(),
        }
    }

    pub fn load_metadata(uri: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::LoadMetadata,
            uri: uri.into(),
        }
    }

    pub fn sync_tags(uri: impl Into<String>, fields: Vec<(PropType, Value)>) -> Self {
        Self {
            kind: ActionKind::SyncTags(fields),
            uri: uri.into(),
        }
    }
}
