//! Entry store
//!
//! Owns every entry in a slab addressed by [`EntryId`]. All mutation goes
//! through `&mut self`, so the store is only ever touched by the thread that
//! owns the [`Database`](crate::Database).
//!
//! Changes to inserted entries are not announced immediately: `set` records
//! a diff on the entry and [`EntryStore::commit`] turns staged inserts and
//! recorded diffs into notifications in one batch. Deletion is the exception
//! and produces its notification straight away.

use crate::entry::{Entry, EntryChange, EntryId, EntryNotification};
use crate::entry_type::{EntryTypeHooks, EntryTypeRegistry};
use crate::error::{DbError, Result};
use soul_core::types::{EntryRecord, EntryType, PropKind, PropType, Value};
use soul_core::SoulError;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

struct Live {
    entry: Arc<Entry>,
    refcount: u32,
    staged: bool,
    inserted: bool,
    deleted: bool,
    changes: Vec<EntryChange>,
}

struct SlabSlot {
    generation: u32,
    live: Option<Live>,
}

/// Abort debug builds on caller bugs, hand the error back in release builds
fn programmer_error(err: DbError) -> DbError {
    if cfg!(debug_assertions) {
        panic!("{}", err);
    }
    err
}

/// Owner of all entries
pub struct EntryStore {
    slots: Vec<SlabSlot>,
    free: Vec<u32>,
    by_location: HashMap<String, EntryId>,
    staged: Vec<EntryId>,
    changed: Vec<EntryId>,
    types: EntryTypeRegistry,
    dirty: bool,
}

impl EntryStore {
    /// Create an empty store with the built-in entry types
    pub fn new() -> Self {
        Self::with_types(EntryTypeRegistry::new())
    }

    /// Create an empty store with a prepared type registry
    pub fn with_types(types: EntryTypeRegistry) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            by_location: HashMap::new(),
            staged: Vec::new(),
            changed: Vec::new(),
            types,
            dirty: false,
        }
    }

    /// Registered entry types
    pub fn types(&self) -> &EntryTypeRegistry {
        &self.types
    }

    /// Register an application-defined entry type
    pub fn register_type(&mut self, name: &str, hooks: Arc<dyn EntryTypeHooks>) -> Result<EntryType> {
        Ok(self.types.register(name, hooks)?)
    }

    /// Allocate an entry with default property values
    ///
    /// The entry is reachable by id and location but invisible to models
    /// until it is inserted and committed. Fails with `DuplicateLocation`
    /// without creating anything if the location is taken.
    pub fn allocate(&mut self, entry_type: EntryType, location: &str) -> Result<EntryId> {
        if let Some(&existing) = self.by_location.get(location) {
            return Err(DbError::DuplicateLocation {
                location: location.to_string(),
                existing,
            });
        }
        let hooks = Arc::clone(self.types.hooks(&entry_type)?);

        let mut entry = Entry::new(entry_type, location);
        hooks.post_create(&mut entry);

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(SlabSlot {
                    generation: 0,
                    live: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = EntryId::new(index, slot.generation);
        slot.live = Some(Live {
            entry: Arc::new(entry),
            refcount: 1,
            staged: false,
            inserted: false,
            deleted: false,
            changes: Vec::new(),
        });
        self.by_location.insert(location.to_string(), id);
        trace!("Allocated entry {} at {}", id, location);
        Ok(id)
    }

    /// Stage an allocated entry for the next commit
    pub fn insert(&mut self, id: EntryId) -> Result<()> {
        let live = self.live_mut(id)?;
        if live.deleted {
            return Err(DbError::EntryNotFound(id));
        }
        if live.inserted || live.staged {
            return Err(programmer_error(DbError::AlreadyInserted(id)));
        }
        live.staged = true;
        self.staged.push(id);
        Ok(())
    }

    /// Set a property
    ///
    /// Mirrored properties are refreshed immediately. For inserted entries
    /// with `notify` set, the change is recorded and announced by the next
    /// commit.
    pub fn set(&mut self, id: EntryId, prop: PropType, value: Value, notify: bool) -> Result<()> {
        {
            let live = self.live(id)?;
            if live.deleted {
                return Err(DbError::EntryNotFound(id));
            }
            if let Err(err) = live.entry.check_settable(prop, &value) {
                return Err(if err.is_programmer_error() {
                    programmer_error(err)
                } else {
                    err
                });
            }
        }
        match prop {
            PropType::Type => return Err(DbError::ReadOnlyProperty(prop.name())),
            PropType::Location => self.relocate(id, value.as_str().unwrap_or_default())?,
            _ => {}
        }

        let live = self.live_mut(id)?;
        let old = Arc::make_mut(&mut live.entry).apply(prop, value.clone());
        let record = live.inserted && notify;
        let first_change = record && live.changes.is_empty();
        if record {
            live.changes.push(EntryChange {
                prop,
                old,
                new: value,
            });
        }
        if live.inserted {
            self.dirty = true;
        }
        if first_change {
            self.changed.push(id);
        }
        Ok(())
    }

    /// Set a property without recording a change
    pub fn set_nonotify(&mut self, id: EntryId, prop: PropType, value: Value) -> Result<()> {
        self.set(id, prop, value, false)
    }

    fn relocate(&mut self, id: EntryId, location: &str) -> Result<()> {
        match self.by_location.get(location) {
            Some(&existing) if existing == id => return Ok(()),
            Some(&existing) => {
                return Err(DbError::DuplicateLocation {
                    location: location.to_string(),
                    existing,
                })
            }
            None => {}
        }
        let old = self.live(id)?.entry.location().to_string();
        self.by_location.remove(&old);
        self.by_location.insert(location.to_string(), id);
        Ok(())
    }

    /// Value of a property
    pub fn get(&self, id: EntryId, prop: PropType) -> Result<Value> {
        Ok(self.live(id)?.entry.get(prop))
    }

    fn get_kind(&self, id: EntryId, prop: PropType, kind: PropKind) -> Result<Value> {
        if prop.kind() != kind {
            return Err(programmer_error(
                SoulError::TypeMismatch {
                    property: prop.name(),
                    expected: prop.kind(),
                    found: kind,
                }
                .into(),
            ));
        }
        self.get(id, prop)
    }

    /// String property; `TypeMismatch` for other kinds
    pub fn get_string(&self, id: EntryId, prop: PropType) -> Result<Arc<str>> {
        match self.get_kind(id, prop, PropKind::String)? {
            Value::String(s) => Ok(s),
            _ => Ok(Arc::from("")),
        }
    }

    /// Unsigned integer property; `TypeMismatch` for other kinds
    pub fn get_ulong(&self, id: EntryId, prop: PropType) -> Result<u64> {
        Ok(self
            .get_kind(id, prop, PropKind::ULong)?
            .as_u64()
            .unwrap_or(0))
    }

    /// Timestamp property; `TypeMismatch` for other kinds
    pub fn get_timestamp(&self, id: EntryId, prop: PropType) -> Result<u64> {
        Ok(self
            .get_kind(id, prop, PropKind::Timestamp)?
            .as_u64()
            .unwrap_or(0))
    }

    /// Double property; `TypeMismatch` for other kinds
    pub fn get_double(&self, id: EntryId, prop: PropType) -> Result<f64> {
        Ok(self
            .get_kind(id, prop, PropKind::Double)?
            .as_f64()
            .unwrap_or(0.0))
    }

    /// Boolean property; `TypeMismatch` for other kinds
    pub fn get_boolean(&self, id: EntryId, prop: PropType) -> Result<bool> {
        Ok(self
            .get_kind(id, prop, PropKind::Boolean)?
            .as_bool()
            .unwrap_or(false))
    }

    /// Snapshot of an entry
    pub fn entry(&self, id: EntryId) -> Result<Arc<Entry>> {
        Ok(Arc::clone(&self.live(id)?.entry))
    }

    /// Delete an entry
    ///
    /// The returned notification is built before the entry is removed and
    /// carries its last state. The location is released at once; the slot is
    /// freed when the last reference is dropped.
    pub fn delete(&mut self, id: EntryId) -> Result<EntryNotification> {
        let live = self.live_mut(id)?;
        if live.deleted {
            return Err(DbError::EntryNotFound(id));
        }
        let notification = EntryNotification::Deleted {
            id,
            entry: Arc::clone(&live.entry),
        };
        live.deleted = true;
        live.staged = false;
        live.changes.clear();
        let location = live.entry.location().to_string();

        if self.by_location.get(&location) == Some(&id) {
            self.by_location.remove(&location);
        }
        self.staged.retain(|s| *s != id);
        self.changed.retain(|c| *c != id);
        self.dirty = true;
        debug!("Deleted entry {} ({})", id, location);

        self.entry_unref(id)?;
        Ok(notification)
    }

    /// Delete every entry of a type
    pub fn delete_by_type(&mut self, entry_type: &EntryType) -> Vec<EntryNotification> {
        let ids: Vec<EntryId> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let live = slot.live.as_ref()?;
                (!live.deleted && live.entry.entry_type() == entry_type)
                    .then(|| EntryId::new(index as u32, slot.generation))
            })
            .collect();
        ids.into_iter().filter_map(|id| self.delete(id).ok()).collect()
    }

    /// Flush staged inserts and recorded changes into notifications
    pub fn commit(&mut self) -> Vec<EntryNotification> {
        let mut notifications = Vec::new();

        for id in std::mem::take(&mut self.staged) {
            let Ok(live) = self.live_mut(id) else { continue };
            if live.deleted || !live.staged {
                continue;
            }
            live.staged = false;
            live.inserted = true;
            notifications.push(EntryNotification::Added {
                id,
                entry: Arc::clone(&live.entry),
            });
            self.dirty = true;
        }

        for id in std::mem::take(&mut self.changed) {
            let Ok(live) = self.live_mut(id) else { continue };
            if live.deleted || live.changes.is_empty() {
                continue;
            }
            let changes = std::mem::take(&mut live.changes);
            notifications.push(EntryNotification::Changed {
                id,
                entry: Arc::clone(&live.entry),
                changes: changes.into(),
            });
        }

        if !notifications.is_empty() {
            trace!("Commit produced {} notifications", notifications.len());
        }
        notifications
    }

    /// Take a reference on an entry
    pub fn entry_ref(&mut self, id: EntryId) -> Result<()> {
        let live = self.live_mut(id)?;
        live.refcount += 1;
        Ok(())
    }

    /// Drop a reference; the last one finalizes the entry and frees its slot
    pub fn entry_unref(&mut self, id: EntryId) -> Result<()> {
        let live = self.live_mut(id)?;
        live.refcount = live.refcount.saturating_sub(1);
        if live.refcount == 0 {
            self.finalize(id);
        }
        Ok(())
    }

    fn finalize(&mut self, id: EntryId) {
        let Some(slot) = self.slots.get_mut(id.index()) else {
            return;
        };
        let Some(live) = slot.live.take() else { return };
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);

        if !live.deleted {
            let location = live.entry.location();
            if self.by_location.get(location) == Some(&id) {
                self.by_location.remove(location);
            }
            self.staged.retain(|s| *s != id);
            self.changed.retain(|c| *c != id);
        }
        if let Ok(hooks) = self.types.hooks(live.entry.entry_type()) {
            hooks.pre_destroy(&live.entry);
        }
        trace!("Finalized entry {}", id);
    }

    /// Current reference count, `None` once finalized
    pub fn refcount(&self, id: EntryId) -> Option<u32> {
        self.live(id).ok().map(|l| l.refcount)
    }

    /// Entry owning `location`
    pub fn lookup_by_location(&self, location: &str) -> Option<EntryId> {
        self.by_location.get(location).copied()
    }

    /// Whether the id refers to an entry that has not been deleted
    pub fn contains(&self, id: EntryId) -> bool {
        self.live(id).map(|l| !l.deleted).unwrap_or(false)
    }

    /// Whether the entry has been committed
    pub fn is_inserted(&self, id: EntryId) -> bool {
        self.live(id).map(|l| l.inserted && !l.deleted).unwrap_or(false)
    }

    /// Committed entries
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Arc<Entry>)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let live = slot.live.as_ref()?;
            (live.inserted && !live.deleted)
                .then(|| (EntryId::new(index as u32, slot.generation), &live.entry))
        })
    }

    /// Owned copy of every committed entry, for handing to a worker
    pub fn snapshot(&self) -> Vec<(EntryId, Arc<Entry>)> {
        self.iter().map(|(id, e)| (id, Arc::clone(e))).collect()
    }

    /// Number of committed entries
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there are changes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Persistent form of every committed entry
    ///
    /// Values equal to what a fresh entry of the same type starts with are
    /// left out; loading recreates them through the type's hooks.
    pub fn to_records(&self) -> Vec<EntryRecord> {
        let mut fresh: HashMap<EntryType, Entry> = HashMap::new();
        self.iter()
            .map(|(_, entry)| {
                let template = fresh
                    .entry(entry.entry_type().clone())
                    .or_insert_with(|| self.fresh_entry(entry.entry_type()));
                let mut record = EntryRecord::new(entry.entry_type().clone(), entry.location());
                for prop in PropType::all().filter(|p| p.is_persistent()) {
                    if let Some(value) = entry.peek(prop) {
                        if template.peek(prop) != Some(value) {
                            record.insert(prop, value);
                        }
                    }
                }
                record
            })
            .collect()
    }

    /// An entry as `allocate` would create it
    fn fresh_entry(&self, entry_type: &EntryType) -> Entry {
        let mut entry = Entry::new(entry_type.clone(), "");
        if let Ok(hooks) = self.types.hooks(entry_type) {
            hooks.post_create(&mut entry);
        }
        entry
    }

    /// URI to play for an entry
    pub fn playback_uri(&self, id: EntryId) -> Result<Option<String>> {
        let entry = &self.live(id)?.entry;
        Ok(self.types.hooks(entry.entry_type())?.playback_uri(entry))
    }

    /// Whether tags of the entry may be written back
    pub fn can_sync_metadata(&self, id: EntryId) -> Result<bool> {
        let entry = &self.live(id)?.entry;
        Ok(self.types.hooks(entry.entry_type())?.can_sync_metadata(entry))
    }

    fn live(&self, id: EntryId) -> Result<&Live> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.live.as_ref())
            .ok_or(DbError::EntryNotFound(id))
    }

    fn live_mut(&mut self, id: EntryId) -> Result<&mut Live> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation())
            .and_then(|slot| slot.live.as_mut())
            .ok_or(DbError::EntryNotFound(id))
    }
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(store: &mut EntryStore, location: &str) -> EntryId {
        let id = store.allocate(EntryType::Song, location).unwrap();
        store.insert(id).unwrap();
        id
    }

    #[test]
    fn allocate_rejects_duplicate_location() {
        let mut store = EntryStore::new();
        let first = store.allocate(EntryType::Song, "file:///a.mp3").unwrap();
        let err = store.allocate(EntryType::Song, "file:///a.mp3").unwrap_err();
        assert!(matches!(err, DbError::DuplicateLocation { existing, .. } if existing == first));
        assert_eq!(store.lookup_by_location("file:///a.mp3"), Some(first));
    }

    #[test]
    fn allocate_unknown_custom_type_fails() {
        let mut store = EntryStore::new();
        let err = store
            .allocate(EntryType::from_name("audiobook"), "file:///b.m4b")
            .unwrap_err();
        assert!(matches!(err, DbError::Core(SoulError::UnknownEntryType(_))));
        assert!(store.lookup_by_location("file:///b.m4b").is_none());
    }

    #[test]
    fn uninserted_entries_are_invisible() {
        let mut store = EntryStore::new();
        let id = store.allocate(EntryType::Song, "file:///a.mp3").unwrap();
        store
            .set(id, PropType::Title, Value::from("A"), true)
            .unwrap();
        assert!(store.commit().is_empty());
        assert_eq!(store.len(), 0);
        assert_eq!(store.get(id, PropType::Title).unwrap(), Value::from("A"));
    }

    #[test]
    fn commit_announces_inserts_once() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        let notes = store.commit();
        assert_eq!(notes.len(), 1);
        assert!(matches!(&notes[0], EntryNotification::Added { id: added, .. } if *added == id));
        assert!(store.commit().is_empty());
        assert!(store.is_inserted(id));
    }

    #[test]
    fn changes_are_batched_until_commit() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.commit();

        store.set(id, PropType::Title, Value::from("A"), true).unwrap();
        store.set(id, PropType::Genre, Value::from("Rock"), true).unwrap();
        store.set(id, PropType::Title, Value::from("B"), true).unwrap();

        let notes = store.commit();
        assert_eq!(notes.len(), 1);
        let EntryNotification::Changed { changes, entry, .. } = &notes[0] else {
            panic!("expected change notification");
        };
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].old, Value::from(""));
        assert_eq!(changes[2].old, Value::from("A"));
        assert_eq!(changes[2].new, Value::from("B"));
        assert_eq!(entry.str_value(PropType::TitleFolded), "b");
    }

    #[test]
    fn nonotify_changes_are_not_recorded() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.commit();
        store
            .set_nonotify(id, PropType::PlayCount, Value::ULong(3))
            .unwrap();
        assert!(store.commit().is_empty());
        assert_eq!(store.get_ulong(id, PropType::PlayCount).unwrap(), 3);
    }

    #[test]
    fn insert_twice_is_an_error() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.insert(id)));
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        } else {
            assert!(matches!(result, Ok(Err(DbError::AlreadyInserted(_)))));
        }
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.set(id, PropType::Title, Value::ULong(1), true)
        }));
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        } else {
            assert!(matches!(
                result,
                Ok(Err(DbError::Core(SoulError::TypeMismatch { .. })))
            ));
        }
    }

    #[test]
    fn typed_getter_checks_kind() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.get_ulong(id, PropType::Title)));
        if cfg!(debug_assertions) {
            assert!(result.is_err());
        } else {
            assert!(matches!(result, Ok(Err(_))));
        }
        assert_eq!(&*store.get_string(id, PropType::Location).unwrap(), "file:///a.mp3");
    }

    #[test]
    fn delete_releases_location_and_slot() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.commit();

        let note = store.delete(id).unwrap();
        assert!(matches!(note, EntryNotification::Deleted { .. }));
        assert_eq!(note.entry().location(), "file:///a.mp3");
        assert!(store.is_dirty());
        assert!(store.lookup_by_location("file:///a.mp3").is_none());
        assert!(store.refcount(id).is_none());
        assert!(matches!(store.get(id, PropType::Title), Err(DbError::EntryNotFound(_))));

        let reused = song(&mut store, "file:///a.mp3");
        assert_ne!(reused, id);
        assert!(!store.contains(id));
    }

    #[test]
    fn references_keep_deleted_entries_readable() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.commit();
        store.entry_ref(id).unwrap();

        store.delete(id).unwrap();
        assert_eq!(store.refcount(id), Some(1));
        assert!(!store.contains(id));
        assert_eq!(store.get(id, PropType::Location).unwrap(), Value::from("file:///a.mp3"));

        store.entry_unref(id).unwrap();
        assert!(store.refcount(id).is_none());
    }

    #[test]
    fn delete_drops_pending_changes() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.commit();
        store.set(id, PropType::Title, Value::from("A"), true).unwrap();
        store.delete(id).unwrap();
        assert!(store.commit().is_empty());
    }

    #[test]
    fn changing_location_updates_index() {
        let mut store = EntryStore::new();
        let a = song(&mut store, "file:///a.mp3");
        song(&mut store, "file:///b.mp3");
        store.commit();

        store
            .set(a, PropType::Location, Value::from("file:///c.mp3"), true)
            .unwrap();
        assert_eq!(store.lookup_by_location("file:///c.mp3"), Some(a));
        assert!(store.lookup_by_location("file:///a.mp3").is_none());
        assert!(matches!(
            store.set(a, PropType::Location, Value::from("file:///b.mp3"), true),
            Err(DbError::DuplicateLocation { .. })
        ));
    }

    #[test]
    fn delete_by_type_only_touches_that_type() {
        let mut store = EntryStore::new();
        song(&mut store, "file:///a.mp3");
        let radio = store
            .allocate(EntryType::RadioStation, "http://radio/stream")
            .unwrap();
        store.insert(radio).unwrap();
        store.commit();

        let notes = store.delete_by_type(&EntryType::RadioStation);
        assert_eq!(notes.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn records_skip_defaults_and_mirrors() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.set(id, PropType::Title, Value::from("A"), false).unwrap();
        store.set(id, PropType::Rating, Value::Double(4.5), false).unwrap();
        store.commit();

        let records = store.to_records();
        assert_eq!(records.len(), 1);
        let props = &records[0].properties;
        assert_eq!(props.get("title").map(String::as_str), Some("A"));
        assert_eq!(props.get("rating").map(String::as_str), Some("4.5"));
        assert!(!props.contains_key("title-folded"));
        assert!(!props.contains_key("play-count"));
    }

    #[test]
    fn records_keep_values_a_fresh_entry_lacks() {
        let mut store = EntryStore::new();
        let id = song(&mut store, "file:///a.mp3");
        store.set(id, PropType::TrackGain, Value::Double(-0.0), false).unwrap();
        let post = store.allocate(EntryType::PodcastPost, "http://feed.example/1.mp3").unwrap();
        store.set(post, PropType::Status, Value::ULong(0), false).unwrap();
        store.insert(post).unwrap();
        store.commit();

        let records = store.to_records();
        let song_record = records.iter().find(|r| r.location == "file:///a.mp3").unwrap();
        assert_eq!(song_record.properties.get("replaygain-track-gain").map(String::as_str), Some("-0"));
        let post_record = records.iter().find(|r| r.entry_type == EntryType::PodcastPost).unwrap();
        // A new post starts out waiting, so an explicit zero must be kept
        assert_eq!(post_record.properties.get("status").map(String::as_str), Some("0"));
    }
}
