//! Entry type hooks and the type registry
//!
//! Per-type behaviour (construction defaults, teardown, how to play an entry,
//! whether tags may be written back) is a capability set looked up by type
//! rather than a subclass.

use crate::entry::Entry;
use soul_core::types::{EntryType, PropType, Value, PODCAST_STATUS_COMPLETE, PODCAST_STATUS_WAITING};
use soul_core::SoulError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Behaviour attached to an entry type
pub trait EntryTypeHooks: Send + Sync {
    /// Called once after allocation, before the entry is visible
    fn post_create(&self, _entry: &mut Entry) {}

    /// Called when the entry is finalized
    fn pre_destroy(&self, _entry: &Entry) {}

    /// URI a player should open, `None` if the entry is not playable
    fn playback_uri(&self, entry: &Entry) -> Option<String> {
        Some(entry.location().to_string())
    }

    /// Whether edited tags may be written back to the file
    fn can_sync_metadata(&self, _entry: &Entry) -> bool {
        false
    }
}

struct SongHooks;

impl EntryTypeHooks for SongHooks {
    fn can_sync_metadata(&self, _entry: &Entry) -> bool {
        true
    }
}

struct StreamHooks;

impl EntryTypeHooks for StreamHooks {}

struct PodcastFeedHooks;

impl EntryTypeHooks for PodcastFeedHooks {
    fn playback_uri(&self, _entry: &Entry) -> Option<String> {
        None
    }
}

struct PodcastPostHooks;

impl EntryTypeHooks for PodcastPostHooks {
    fn post_create(&self, entry: &mut Entry) {
        if let Err(e) = entry.set_initial(PropType::Status, Value::ULong(PODCAST_STATUS_WAITING)) {
            warn!("Failed to initialise podcast status: {}", e);
        }
    }

    /// Downloaded posts play from the local copy kept in the mountpoint
    fn playback_uri(&self, entry: &Entry) -> Option<String> {
        let local = entry.str_value(PropType::Mountpoint);
        if entry.u64_value(PropType::Status) == PODCAST_STATUS_COMPLETE && !local.is_empty() {
            Some(local.to_string())
        } else {
            Some(entry.location().to_string())
        }
    }
}

struct UnplayableHooks;

impl EntryTypeHooks for UnplayableHooks {
    fn playback_uri(&self, _entry: &Entry) -> Option<String> {
        None
    }
}

/// Hooks for every known entry type
pub struct EntryTypeRegistry {
    hooks: HashMap<EntryType, Arc<dyn EntryTypeHooks>>,
}

impl EntryTypeRegistry {
    /// Registry with the built-in types
    pub fn new() -> Self {
        let mut hooks: HashMap<EntryType, Arc<dyn EntryTypeHooks>> = HashMap::new();
        hooks.insert(EntryType::Song, Arc::new(SongHooks));
        hooks.insert(EntryType::RadioStation, Arc::new(StreamHooks));
        hooks.insert(EntryType::PodcastFeed, Arc::new(PodcastFeedHooks));
        hooks.insert(EntryType::PodcastPost, Arc::new(PodcastPostHooks));
        hooks.insert(EntryType::ImportError, Arc::new(UnplayableHooks));
        hooks.insert(EntryType::Ignore, Arc::new(UnplayableHooks));
        Self { hooks }
    }

    /// Register an application-defined type
    pub fn register(
        &mut self,
        name: &str,
        hooks: Arc<dyn EntryTypeHooks>,
    ) -> soul_core::Result<EntryType> {
        let entry_type = EntryType::from_name(name);
        if entry_type.is_builtin() || self.hooks.contains_key(&entry_type) {
            return Err(SoulError::Other(format!(
                "entry type {} is already registered",
                name
            )));
        }
        debug!("Registered entry type {}", name);
        self.hooks.insert(entry_type.clone(), hooks);
        Ok(entry_type)
    }

    /// Whether `entry_type` is known
    pub fn contains(&self, entry_type: &EntryType) -> bool {
        self.hooks.contains_key(entry_type)
    }

    /// Resolve a type name to a registered type
    pub fn resolve(&self, name: &str) -> soul_core::Result<EntryType> {
        let entry_type = EntryType::from_name(name);
        if self.contains(&entry_type) {
            Ok(entry_type)
        } else {
            Err(SoulError::UnknownEntryType(name.to_string()))
        }
    }

    /// Hooks of a registered type
    pub fn hooks(&self, entry_type: &EntryType) -> soul_core::Result<&Arc<dyn EntryTypeHooks>> {
        self.hooks
            .get(entry_type)
            .ok_or_else(|| SoulError::UnknownEntryType(entry_type.name().to_string()))
    }
}

impl Default for EntryTypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
