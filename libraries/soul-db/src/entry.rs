//! Entries, entry ids and change notifications

use crate::error::{DbError, Result};
use serde::{Deserialize, Serialize};
use soul_core::types::{EntryType, PropType, Slot, Value, SEARCH_FIELDS};
use std::fmt;
use std::sync::Arc;

/// Stable handle to an entry
///
/// Ids are slab indices plus a generation; an id whose slot has been reused
/// no longer resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId {
    index: u32,
    generation: u32,
}

impl EntryId {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// One metadata record
///
/// Entries are immutable once shared: the store mutates through
/// `Arc::make_mut`, so snapshots handed to models and workers never change
/// underneath them.
#[derive(Debug, Clone)]
pub struct Entry {
    entry_type: EntryType,
    props: Box<[Value]>,
    extension: Option<Box<[Value]>>,
}

impl Entry {
    pub(crate) fn new(entry_type: EntryType, location: &str) -> Self {
        let props: Box<[Value]> = PropType::all()
            .filter_map(|p| match p.slot() {
                Slot::Common(_) => Some(Value::default_for(p.kind())),
                _ => None,
            })
            .collect();
        let extension = entry_type.has_extension().then(|| {
            PropType::all()
                .filter(|p| p.is_type_specific())
                .map(|p| Value::default_for(p.kind()))
                .collect()
        });

        let mut entry = Self {
            entry_type: entry_type.clone(),
            props,
            extension,
        };
        entry.apply(PropType::Type, Value::EntryType(entry_type));
        entry.apply(PropType::Location, Value::string(location));
        entry
    }

    /// Entry category
    pub fn entry_type(&self) -> &EntryType {
        &self.entry_type
    }

    /// Unique location
    pub fn location(&self) -> &str {
        self.str_value(PropType::Location)
    }

    /// Whether the entry carries the extension block
    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Stored value of a property, `None` for synthetic properties and for
    /// extension properties of entries without an extension block
    pub fn peek(&self, prop: PropType) -> Option<&Value> {
        match prop.slot() {
            Slot::Common(i) => self.props.get(i),
            Slot::Extension(i) => self.extension.as_ref().and_then(|ext| ext.get(i)),
            Slot::Synthetic => None,
        }
    }

    /// Value of a property; missing values read as the kind's default
    pub fn get(&self, prop: PropType) -> Value {
        if prop == PropType::SearchMatch {
            return Value::string(self.search_text());
        }
        self.peek(prop)
            .cloned()
            .unwrap_or_else(|| Value::default_for(prop.kind()))
    }

    /// Text of a string property, empty for anything else
    pub fn str_value(&self, prop: PropType) -> &str {
        self.peek(prop).and_then(Value::as_str).unwrap_or("")
    }

    /// Integer or timestamp property, 0 for anything else
    pub fn u64_value(&self, prop: PropType) -> u64 {
        self.peek(prop).and_then(Value::as_u64).unwrap_or(0)
    }

    /// Double property, 0.0 for anything else
    pub fn f64_value(&self, prop: PropType) -> f64 {
        self.peek(prop).and_then(Value::as_f64).unwrap_or(0.0)
    }

    /// Boolean property, false for anything else
    pub fn bool_value(&self, prop: PropType) -> bool {
        self.peek(prop).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Folded text searched by `SearchMatch`
    pub fn search_text(&self) -> String {
        SEARCH_FIELDS
            .iter()
            .map(|p| self.str_value(*p))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Set a property while the entry is being constructed
    ///
    /// Intended for entry type hooks; the store's `set` is the normal path.
    pub fn set_initial(&mut self, prop: PropType, value: Value) -> Result<()> {
        self.check_settable(prop, &value)?;
        self.apply(prop, value);
        Ok(())
    }

    pub(crate) fn check_settable(&self, prop: PropType, value: &Value) -> Result<()> {
        prop.check(value)?;
        if prop.is_derived() {
            return Err(DbError::ReadOnlyProperty(prop.name()));
        }
        if prop.is_type_specific() && self.extension.is_none() {
            return Err(DbError::NotApplicable {
                property: prop.name(),
                entry_type: self.entry_type.name().to_string(),
            });
        }
        Ok(())
    }

    /// Store a value and refresh its mirrors, returning the previous value
    pub(crate) fn apply(&mut self, prop: PropType, value: Value) -> Value {
        for mirror in prop.mirrors() {
            if let (Some(role), Slot::Common(i)) = (mirror.mirror_role(), mirror.slot()) {
                self.props[i] = role.derive(&value);
            }
        }
        let slot = match prop.slot() {
            Slot::Common(i) => self.props.get_mut(i),
            Slot::Extension(i) => self.extension.as_mut().and_then(|ext| ext.get_mut(i)),
            Slot::Synthetic => None,
        };
        match slot {
            Some(slot) => std::mem::replace(slot, value),
            None => Value::default_for(prop.kind()),
        }
    }
}

/// One recorded property change
#[derive(Debug, Clone, PartialEq)]
pub struct EntryChange {
    /// Changed property
    pub prop: PropType,
    /// Value before the change
    pub old: Value,
    /// Value after the change
    pub new: Value,
}

/// Notification emitted by the store
///
/// Every variant carries a snapshot of the entry so receivers can read it
/// even after the store has dropped it.
#[derive(Debug, Clone)]
pub enum EntryNotification {
    /// Entry became visible at commit
    Added { id: EntryId, entry: Arc<Entry> },
    /// Batched changes flushed at commit
    Changed {
        id: EntryId,
        entry: Arc<Entry>,
        changes: Arc<[EntryChange]>,
    },
    /// Entry is being deleted
    Deleted { id: EntryId, entry: Arc<Entry> },
}

impl EntryNotification {
    /// Id of the entry concerned
    pub fn id(&self) -> EntryId {
        match self {
            Self::Added { id, .. } | Self::Changed { id, .. } | Self::Deleted { id, .. } => *id,
        }
    }

    /// Entry snapshot
    pub fn entry(&self) -> &Arc<Entry> {
        match self {
            Self::Added { entry, .. } | Self::Changed { entry, .. } | Self::Deleted { entry, .. } => {
                entry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_entry_has_defaults_and_location() {
        let entry = Entry::new(EntryType::Song, "file:///a.mp3");
        assert_eq!(entry.location(), "file:///a.mp3");
        assert_eq!(entry.get(PropType::Type), Value::EntryType(EntryType::Song));
        assert_eq!(entry.get(PropType::Title), Value::from(""));
        assert_eq!(entry.get(PropType::PlayCount), Value::ULong(0));
        assert_eq!(entry.get(PropType::LastPlayedStr), Value::from(""));
        assert!(!entry.has_extension());
    }

    #[test]
    fn apply_updates_mirrors() {
        let mut entry = Entry::new(EntryType::Song, "file:///a.mp3");
        let old = entry.apply(PropType::Artist, Value::from("The Émigrés"));
        assert_eq!(old, Value::from(""));
        assert_eq!(entry.str_value(PropType::ArtistFolded), "the emigres");
        assert_eq!(entry.str_value(PropType::ArtistSortKey), "emigres");

        entry.apply(PropType::LastPlayed, Value::Timestamp(0));
        assert_eq!(entry.str_value(PropType::LastPlayedStr), "Never");
    }

    #[test]
    fn extension_only_for_podcasts() {
        let mut song = Entry::new(EntryType::Song, "file:///a.mp3");
        assert!(matches!(
            song.set_initial(PropType::Status, Value::ULong(1)),
            Err(DbError::NotApplicable { .. })
        ));
        assert!(song.peek(PropType::Status).is_none());
        assert_eq!(song.get(PropType::Status), Value::ULong(0));

        let mut post = Entry::new(EntryType::PodcastPost, "http://x/ep1.mp3");
        post.set_initial(PropType::Status, Value::ULong(100)).unwrap();
        assert_eq!(post.u64_value(PropType::Status), 100);
    }

    #[test]
    fn derived_properties_are_read_only() {
        let mut entry = Entry::new(EntryType::Song, "file:///a.mp3");
        assert!(matches!(
            entry.set_initial(PropType::TitleFolded, Value::from("x")),
            Err(DbError::ReadOnlyProperty(_))
        ));
        assert!(matches!(
            entry.set_initial(PropType::SearchMatch, Value::from("x")),
            Err(DbError::ReadOnlyProperty(_))
        ));
    }

    #[test]
    fn search_text_joins_folded_fields() {
        let mut entry = Entry::new(EntryType::Song, "file:///a.mp3");
        entry.apply(PropType::Title, Value::from("Hey Jude"));
        entry.apply(PropType::Artist, Value::from("Beatles"));
        assert_eq!(entry.search_text(), "hey jude beatles");
        assert_eq!(entry.get(PropType::SearchMatch), Value::from("hey jude beatles"));
    }
}
