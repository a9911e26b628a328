/// Data exchanged with the I/O collaborators
use crate::types::{EntryType, PropType, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result of reading a file's tags
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataLoad {
    /// MIME type reported by the tag reader
    pub mime: String,
    /// Typed fields found in the file
    pub fields: Vec<(PropType, Value)>,
}

impl MetadataLoad {
    /// Create an empty result with a MIME type
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: mime.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field, builder style
    pub fn with(mut self, prop: PropType, value: impl Into<Value>) -> Self {
        self.fields.push((prop, value.into()));
        self
    }

    /// Value of a field, if present
    pub fn get(&self, prop: PropType) -> Option<&Value> {
        self.fields.iter().find(|(p, _)| *p == prop).map(|(_, v)| v)
    }
}

/// File information returned by a stat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStat {
    /// Size in bytes
    pub size: u64,
    /// Modification time, seconds since the Unix epoch
    pub mtime: u64,
}

/// Persisted form of one entry
///
/// Properties are stored by external name using the value text encoding,
/// so records stay readable and survive property table reordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    /// Entry category
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    /// Unique location
    pub location: String,
    /// Non-default persistent properties
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl EntryRecord {
    /// Create a record without properties
    pub fn new(entry_type: EntryType, location: impl Into<String>) -> Self {
        Self {
            entry_type,
            location: location.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Store a property using its text encoding
    pub fn insert(&mut self, prop: PropType, value: &Value) {
        self.properties
            .insert(prop.name().to_string(), value.to_text());
    }
}
