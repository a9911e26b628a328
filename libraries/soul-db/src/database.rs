//! Database context handle
//!
//! [`Database`] owns the store, the live models and the coordinator. It is
//! the only thing that mutates entries, so it must stay on one thread; the
//! owner drives it by calling [`Database::poll`] from its scheduler tick.
//!
//! ```text
//!  set/insert/delete ──> EntryStore ──commit()──> notifications
//!                                                    │
//!             ┌──────────────────────────────────────┘
//!             ▼
//!  root QueryModels ──> PropertyModels ──> browser selections
//!             │
//!             └──> child QueryModels ──> ...
//! ```

use crate::config::DbConfig;
use crate::coordinator::{Action, Coordinator, Event};
use crate::entry::{Entry, EntryId, EntryNotification};
use crate::entry_type::EntryTypeHooks;
use crate::error::{DbError, Result};
use crate::models::{
    Browser, BrowserId, BrowserLevel, ModelDelta, ModelId, PropertyModel, PropertyModelId,
    PropertyRow, QueryModel, RowUpdate, SortOrder,
};
use crate::monitor::{path_to_uri, DirectoryMonitor, WatcherEvent};
use crate::persist::JsonFileBackend;
use crate::query::{now_secs, Query};
use crate::signals::{DbSignal, SignalHub};
use crate::store::EntryStore;
use crossbeam_channel::{Receiver, Sender};
use soul_core::types::{EntryRecord, EntryType, FileStat, MetadataLoad, PropType, Value};
use soul_core::{FileIo, MetadataReader, SoulError, StorageBackend};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Tag fields written back by [`Database::sync_tags`]
const TAG_FIELDS: [PropType; 17] = [
    PropType::Title,
    PropType::Artist,
    PropType::Album,
    PropType::AlbumArtist,
    PropType::Genre,
    PropType::Composer,
    PropType::TrackNumber,
    PropType::TrackTotal,
    PropType::DiscNumber,
    PropType::DiscTotal,
    PropType::Date,
    PropType::Comment,
    PropType::Bpm,
    PropType::MusicbrainzTrackId,
    PropType::MusicbrainzArtistId,
    PropType::MusicbrainzAlbumId,
    PropType::MusicbrainzAlbumArtistId,
];

/// Longest single wait inside [`Database::wait_idle`]
const IDLE_WAIT_SLICE: Duration = Duration::from_millis(50);

/// Collaborators the database reaches through traits
#[derive(Clone)]
pub struct Services {
    pub reader: Arc<dyn MetadataReader>,
    pub file_io: Arc<dyn FileIo>,
    /// Backend for `save`/`load`; a JSON file backend is created from
    /// `storage.database_path` when this is `None`
    pub storage: Option<Arc<dyn StorageBackend>>,
}

impl Services {
    pub fn new(reader: Arc<dyn MetadataReader>, file_io: Arc<dyn FileIo>) -> Self {
        Self {
            reader,
            file_io,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// Sends property changes to the database from any thread
///
/// Changes are queued as events and applied by the next [`Database::poll`],
/// after any save or full query holding the read lock has finished.
#[derive(Clone)]
pub struct QueueHandle {
    events: Sender<Event>,
}

impl QueueHandle {
    /// Queue `prop = value` on an entry
    pub fn set(&self, id: EntryId, prop: PropType, value: Value) -> Result<()> {
        prop.check(&value)?;
        if prop.is_derived() {
            return Err(DbError::ReadOnlyProperty(prop.name()));
        }
        self.events
            .send(Event::EntrySet { id, prop, value })
            .map_err(|_| DbError::ShuttingDown)
    }
}

/// The metadata database
pub struct Database {
    config: DbConfig,
    store: EntryStore,
    coordinator: Coordinator,
    signals: SignalHub,
    models: BTreeMap<ModelId, QueryModel>,
    property_models: HashMap<PropertyModelId, PropertyModel>,
    browsers: BTreeMap<BrowserId, Browser>,
    next_id: u64,
    query_generation: u64,
    file_io: Arc<dyn FileIo>,
    storage: Option<Arc<dyn StorageBackend>>,
    monitor: Option<DirectoryMonitor>,
    /// Mutating events that arrived while the read lock was held
    deferred: VecDeque<Event>,
    save_in_flight: bool,
    save_requested: bool,
    /// Browser levels whose selection lost a value
    pending_rebuilds: Vec<(BrowserId, usize)>,
    /// Nesting of `publish`; rebuilds wait for the outermost call
    publish_depth: usize,
    rebuilding: bool,
    shut_down: bool,
}

impl Database {
    /// Open a database and start its action worker
    pub fn new(config: DbConfig, services: Services) -> Result<Self> {
        config.validate()?;

        let storage = match (services.storage, &config.storage.database_path) {
            (Some(storage), _) => Some(storage),
            (None, Some(path)) => {
                Some(Arc::new(JsonFileBackend::new(path)) as Arc<dyn StorageBackend>)
            }
            (None, None) => None,
        };
        let file_io = Arc::clone(&services.file_io);
        let coordinator = Coordinator::start(services.reader, services.file_io, config.pop_timeout())?;

        info!(
            "Opened database (persistence: {})",
            config
                .storage
                .database_path
                .as_ref()
                .map_or_else(|| "custom or none".to_string(), |p| p.display().to_string())
        );

        Ok(Self {
            config,
            store: EntryStore::new(),
            coordinator,
            signals: SignalHub::new(),
            models: BTreeMap::new(),
            property_models: HashMap::new(),
            browsers: BTreeMap::new(),
            next_id: 0,
            query_generation: 0,
            file_io,
            storage,
            monitor: None,
            deferred: VecDeque::new(),
            save_in_flight: false,
            save_requested: false,
            pending_rebuilds: Vec::new(),
            publish_depth: 0,
            rebuilding: false,
            shut_down: false,
        })
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Read access to the entries
    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Receive every signal emitted from now on
    pub fn subscribe(&mut self) -> Receiver<DbSignal> {
        self.signals.subscribe()
    }

    /// Handle for queueing changes from other threads
    pub fn queue_handle(&self) -> QueueHandle {
        QueueHandle {
            events: self.coordinator.event_sender(),
        }
    }

    /// Whether a save or full query currently holds the read lock
    pub fn is_read_only(&self) -> bool {
        self.coordinator.read_lock().is_held()
    }

    // ===== Entries =====

    /// Register an application-defined entry type
    pub fn register_entry_type(
        &mut self,
        name: &str,
        hooks: Arc<dyn EntryTypeHooks>,
    ) -> Result<EntryType> {
        self.store.register_type(name, hooks)
    }

    pub fn allocate(&mut self, entry_type: EntryType, location: &str) -> Result<EntryId> {
        self.store.allocate(entry_type, location)
    }

    pub fn insert(&mut self, id: EntryId) -> Result<()> {
        self.store.insert(id)
    }

    pub fn get(&self, id: EntryId, prop: PropType) -> Result<Value> {
        self.store.get(id, prop)
    }

    pub fn entry(&self, id: EntryId) -> Result<Arc<Entry>> {
        self.store.entry(id)
    }

    /// Set a property; the change is announced by the next commit
    pub fn set(&mut self, id: EntryId, prop: PropType, value: impl Into<Value>) -> Result<()> {
        self.store.set(id, prop, value.into(), true)
    }

    /// Set a property without announcing it
    pub fn set_nonotify(
        &mut self,
        id: EntryId,
        prop: PropType,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.store.set_nonotify(id, prop, value.into())
    }

    /// Delete an entry; models see the removal immediately
    pub fn delete(&mut self, id: EntryId) -> Result<()> {
        let notification = self.store.delete(id)?;
        self.deliver(vec![notification]);
        Ok(())
    }

    /// Delete every entry of a type, returning how many were removed
    pub fn delete_by_type(&mut self, entry_type: &EntryType) -> usize {
        let notifications = self.store.delete_by_type(entry_type);
        let count = notifications.len();
        self.deliver(notifications);
        count
    }

    /// Announce staged inserts and recorded changes
    pub fn commit(&mut self) {
        let notifications = self.store.commit();
        self.deliver(notifications);
    }

    fn deliver(&mut self, notifications: Vec<EntryNotification>) {
        if notifications.is_empty() {
            return;
        }
        let now = now_secs();
        self.publish_depth += 1;
        for notification in notifications {
            self.signals.emit(match &notification {
                EntryNotification::Added { id, .. } => DbSignal::EntryAdded(*id),
                EntryNotification::Changed { id, changes, .. } => DbSignal::EntryChanged {
                    id: *id,
                    changes: Arc::clone(changes),
                },
                EntryNotification::Deleted { id, .. } => DbSignal::EntryDeleted(*id),
            });

            let delta = ModelDelta::from(notification);
            let roots: Vec<ModelId> = self
                .models
                .values()
                .filter(|m| m.base().is_none())
                .map(QueryModel::id)
                .collect();
            for root in roots {
                self.apply_to_model(root, std::slice::from_ref(&delta), now);
            }
        }
        self.publish_depth -= 1;
        self.run_pending_rebuilds();
    }

    fn apply_to_model(&mut self, id: ModelId, deltas: &[ModelDelta], now: u64) {
        let Some(model) = self.models.get_mut(&id) else {
            return;
        };
        let updates: Vec<RowUpdate> = deltas.iter().flat_map(|d| model.apply(d, now)).collect();
        self.publish(id, updates);
    }

    /// Announce row changes of a model and push them downstream
    ///
    /// Browser levels that lost a selected value are rebuilt once the
    /// outermost call has finished.
    fn publish(&mut self, model: ModelId, updates: Vec<RowUpdate>) {
        if updates.is_empty() {
            return;
        }
        self.publish_depth += 1;
        self.publish_rows(model, updates);
        self.publish_depth -= 1;
        if self.publish_depth == 0 {
            self.run_pending_rebuilds();
        }
    }

    /// Rows hold a store reference while they are in a model; it is released
    /// only after every downstream model has seen the removal.
    fn publish_rows(&mut self, model: ModelId, updates: Vec<RowUpdate>) {
        let Some((children, property_models)) = self
            .models
            .get(&model)
            .map(|m| (m.children.clone(), m.property_models.clone()))
        else {
            return;
        };

        let mut deltas = Vec::with_capacity(updates.len());
        for RowUpdate { index, delta } in updates {
            let id = delta.id();
            let signal = match &delta {
                ModelDelta::Inserted { .. } => {
                    if let Err(e) = self.store.entry_ref(id) {
                        warn!("Row {} of {} has no store entry: {}", id, model, e);
                    }
                    DbSignal::RowInserted { model, index, id }
                }
                ModelDelta::Changed { .. } => DbSignal::RowChanged { model, index, id },
                ModelDelta::Removed { .. } => DbSignal::RowDeleted { model, index, id },
            };
            self.signals.emit(signal);
            deltas.push(delta);
        }

        for property_model in property_models {
            self.apply_to_property_model(property_model, &deltas);
        }
        let now = now_secs();
        for child in children {
            self.apply_to_model(child, &deltas, now);
        }

        for delta in &deltas {
            if let ModelDelta::Removed { id, .. } = delta {
                self.release_row(*id);
            }
        }
    }

    fn release_row(&mut self, id: EntryId) {
        if let Err(e) = self.store.entry_unref(id) {
            warn!("Failed to release row reference on {}: {}", id, e);
        }
    }

    fn apply_to_property_model(&mut self, id: PropertyModelId, deltas: &[ModelDelta]) {
        let Some(property_model) = self.property_models.get_mut(&id) else {
            return;
        };
        let signals: Vec<DbSignal> = deltas.iter().flat_map(|d| property_model.apply(d)).collect();
        for signal in signals {
            if let DbSignal::PropertyPreRowDeletion {
                model,
                row: PropertyRow::Value(value),
            } = &signal
            {
                self.deselect(*model, value);
            }
            self.signals.emit(signal);
        }
    }

    /// Drop a vanishing value from any browser selection bound to `model`
    fn deselect(&mut self, model: PropertyModelId, value: &Value) {
        for browser in self.browsers.values_mut() {
            if let Some(level) = browser.level_of(model) {
                if browser.deselect(level, value) {
                    debug!("{} lost selected value {} at level {}", browser.id(), value, level);
                    self.pending_rebuilds.push((browser.id(), level));
                }
            }
        }
    }

    fn run_pending_rebuilds(&mut self) {
        if self.rebuilding {
            return;
        }
        while !self.pending_rebuilds.is_empty() {
            let mut pending = std::mem::take(&mut self.pending_rebuilds);
            pending.sort_unstable();
            // Rebuilding a level rebuilds everything below it
            pending.dedup_by_key(|(browser, _)| *browser);
            for (browser, level) in pending {
                if let Err(e) = self.rebuild_browser(browser, level) {
                    warn!("Failed to rebuild {} from level {}: {}", browser, level, e);
                }
            }
        }
    }

    // ===== Query models =====

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Create a model over the whole store and start its full query
    ///
    /// The model stays empty until [`DbSignal::QueryComplete`].
    pub fn create_query_model(&mut self, query: &Query, sort: SortOrder) -> Result<ModelId> {
        let id = ModelId(self.allocate_id());
        self.models.insert(id, QueryModel::new(id, query, None, sort));
        if let Err(e) = self.start_query(id) {
            self.models.remove(&id);
            return Err(e);
        }
        Ok(id)
    }

    /// Create a model narrowing `base`
    ///
    /// Populated synchronously from the base model's rows; afterwards it
    /// follows the base model's changes.
    pub fn create_child_model(
        &mut self,
        base: ModelId,
        query: &Query,
        sort: SortOrder,
    ) -> Result<ModelId> {
        let parent = self.models.get(&base).ok_or(DbError::ModelNotFound(base))?;
        let candidates = parent.rows().to_vec();

        let id = ModelId(self.allocate_id());
        let mut model = QueryModel::new(id, query, Some(base), sort);
        let updates = model.reevaluate(&candidates, now_secs());
        self.models.insert(id, model);
        if let Some(parent) = self.models.get_mut(&base) {
            parent.children.push(id);
        }
        self.publish(id, updates);
        debug!("Created {} over {}", id, base);
        Ok(id)
    }

    /// Rerun a model's query from scratch
    pub fn requery(&mut self, id: ModelId) -> Result<()> {
        let model = self.models.get_mut(&id).ok_or(DbError::ModelNotFound(id))?;
        match model.base() {
            None => self.start_query(id),
            Some(base) => {
                let removed = model.clear();
                self.publish(id, removed);
                let candidates = self
                    .models
                    .get(&base)
                    .map(|b| b.rows().to_vec())
                    .unwrap_or_default();
                let updates = match self.models.get_mut(&id) {
                    Some(model) => model.reevaluate(&candidates, now_secs()),
                    None => return Ok(()),
                };
                self.publish(id, updates);
                Ok(())
            }
        }
    }

    /// Cancel a running full query; true if one was running
    pub fn cancel_query(&mut self, id: ModelId) -> Result<bool> {
        let model = self.models.get_mut(&id).ok_or(DbError::ModelNotFound(id))?;
        Ok(model.cancel())
    }

    fn start_query(&mut self, id: ModelId) -> Result<()> {
        self.query_generation += 1;
        let generation = self.query_generation;

        let model = self.models.get_mut(&id).ok_or(DbError::ModelNotFound(id))?;
        let query = model.query().clone();
        let (cancel, removed) = model.begin_query(generation);
        self.publish(id, removed);

        self.acquire_read_lock();
        let entries = self.store.snapshot();
        let total = entries.len();
        let spawned = self.coordinator.spawn_worker("query", move |ctx| {
            let now = now_secs();
            let mut results = Vec::new();
            for (entry_id, entry) in &entries {
                if cancel.load(Ordering::Acquire) || ctx.is_exiting() {
                    ctx.send(Event::QueryFinished {
                        model: id,
                        generation,
                        results: None,
                    });
                    return;
                }
                if query.evaluate_at(entry, now) {
                    results.push(*entry_id);
                }
            }
            ctx.send(Event::QueryFinished {
                model: id,
                generation,
                results: Some(results),
            });
        });

        if let Err(e) = spawned {
            self.release_read_lock();
            if let Some(model) = self.models.get_mut(&id) {
                model.cancel();
            }
            return Err(e);
        }
        debug!("Started full query for {} over {} entries", id, total);
        Ok(())
    }

    fn on_query_finished(&mut self, id: ModelId, generation: u64, results: Option<Vec<EntryId>>) {
        self.release_read_lock();
        let Some(results) = results else {
            debug!("Full query for {} was cancelled", id);
            return;
        };

        let entries: Vec<(EntryId, Arc<Entry>)> = results
            .into_iter()
            .filter(|entry_id| self.store.is_inserted(*entry_id))
            .filter_map(|entry_id| self.store.entry(entry_id).ok().map(|e| (entry_id, e)))
            .collect();

        let Some(model) = self.models.get_mut(&id) else {
            trace!("Results for dropped model {} discarded", id);
            return;
        };
        let Some(updates) = model.install(generation, entries, now_secs()) else {
            trace!("Stale results for {} discarded", id);
            return;
        };
        debug!("Full query for {} complete", id);
        self.publish(id, updates);
        self.signals.emit(DbSignal::QueryComplete(id));
    }

    /// Destroy a model with its children and property models
    pub fn destroy_model(&mut self, id: ModelId) -> Result<()> {
        let mut model = self.models.remove(&id).ok_or(DbError::ModelNotFound(id))?;
        model.cancel();
        for update in model.clear() {
            self.release_row(update.delta.id());
        }
        for property_model in &model.property_models {
            self.property_models.remove(property_model);
        }
        for child in &model.children {
            if let Err(e) = self.destroy_model(*child) {
                trace!("Child model already gone: {}", e);
            }
        }
        if let Some(base) = model.base() {
            if let Some(parent) = self.models.get_mut(&base) {
                parent.children.retain(|c| *c != id);
            }
        }
        debug!("Destroyed {}", id);
        Ok(())
    }

    /// Replace a model's sort order and re-sort it
    pub fn set_sort(&mut self, id: ModelId, sort: SortOrder) -> Result<()> {
        let model = self.models.get_mut(&id).ok_or(DbError::ModelNotFound(id))?;
        model.set_sort(sort);
        if model.resort() {
            self.signals.emit(DbSignal::RowsReordered(id));
        }
        Ok(())
    }

    /// Re-sort rows moved out of order by member changes
    pub fn resort(&mut self, id: ModelId) -> Result<bool> {
        let model = self.models.get_mut(&id).ok_or(DbError::ModelNotFound(id))?;
        let changed = model.resort();
        if changed {
            self.signals.emit(DbSignal::RowsReordered(id));
        }
        Ok(changed)
    }

    /// Re-evaluate models whose queries depend on the current time
    pub fn refresh_time_relative(&mut self) {
        let now = now_secs();
        // Ids grow with creation, so bases refresh before their children
        let ids: Vec<ModelId> = self
            .models
            .values()
            .filter(|m| m.is_complete() && m.query().is_time_relative())
            .map(QueryModel::id)
            .collect();
        for id in ids {
            let base = match self.models.get(&id) {
                Some(model) => model.base(),
                None => continue,
            };
            let candidates = match base {
                Some(base) => self
                    .models
                    .get(&base)
                    .map(|b| b.rows().to_vec())
                    .unwrap_or_default(),
                None => self.store.snapshot(),
            };
            let updates = match self.models.get_mut(&id) {
                Some(model) => model.reevaluate(&candidates, now),
                None => continue,
            };
            if !updates.is_empty() {
                trace!("Refreshed time-relative {}", id);
            }
            self.publish(id, updates);
        }
    }

    pub fn model(&self, id: ModelId) -> Result<&QueryModel> {
        self.models.get(&id).ok_or(DbError::ModelNotFound(id))
    }

    // ===== Property models and browsers =====

    /// Group a model's rows by `prop`
    pub fn create_property_model(&mut self, model: ModelId, prop: PropType) -> Result<PropertyModelId> {
        let rows = self
            .models
            .get(&model)
            .ok_or(DbError::ModelNotFound(model))?
            .rows()
            .to_vec();

        let id = PropertyModelId(self.allocate_id());
        let mut property_model = PropertyModel::new(id, prop, model);
        let signals = property_model.populate(&rows);
        self.property_models.insert(id, property_model);
        if let Some(model) = self.models.get_mut(&model) {
            model.property_models.push(id);
        }
        for signal in signals {
            self.signals.emit(signal);
        }
        Ok(id)
    }

    pub fn destroy_property_model(&mut self, id: PropertyModelId) -> Result<()> {
        let property_model = self
            .property_models
            .remove(&id)
            .ok_or(DbError::PropertyModelNotFound(id))?;
        if let Some(model) = self.models.get_mut(&property_model.model()) {
            model.property_models.retain(|p| *p != id);
        }
        Ok(())
    }

    pub fn property_model(&self, id: PropertyModelId) -> Result<&PropertyModel> {
        self.property_models
            .get(&id)
            .ok_or(DbError::PropertyModelNotFound(id))
    }

    /// Chain property levels over `base`, e.g. genre → artist → album
    ///
    /// Every level starts with an empty selection, which selects everything.
    pub fn create_browser(&mut self, base: ModelId, props: &[PropType]) -> Result<BrowserId> {
        if !self.models.contains_key(&base) {
            return Err(DbError::ModelNotFound(base));
        }
        let id = BrowserId(self.allocate_id());
        let mut browser = Browser::new(id, base);
        let mut input = base;
        for &prop in props {
            let level = match self.build_level(input, prop) {
                Ok(level) => level,
                Err(e) => {
                    self.discard_levels(&browser);
                    return Err(e);
                }
            };
            input = level.output;
            browser.levels.push(level);
        }
        self.browsers.insert(id, browser);
        Ok(id)
    }

    /// Change the selection of one level and rebuild the levels below it
    pub fn browser_select(&mut self, id: BrowserId, level: usize, values: Vec<Value>) -> Result<()> {
        let browser = self
            .browsers
            .get_mut(&id)
            .ok_or(DbError::BrowserNotFound(id))?;
        let slot = browser
            .levels
            .get_mut(level)
            .ok_or(DbError::BrowserLevel { browser: id, level })?;
        for value in &values {
            slot.prop.check(value)?;
        }
        slot.selection = values;
        let outcome = self.rebuild_browser(id, level);
        self.run_pending_rebuilds();
        outcome
    }

    pub fn destroy_browser(&mut self, id: BrowserId) -> Result<()> {
        let browser = self.browsers.remove(&id).ok_or(DbError::BrowserNotFound(id))?;
        self.discard_levels(&browser);
        Ok(())
    }

    pub fn browser(&self, id: BrowserId) -> Result<&Browser> {
        self.browsers.get(&id).ok_or(DbError::BrowserNotFound(id))
    }

    fn discard_levels(&mut self, browser: &Browser) {
        if let Some(first) = browser.levels.first() {
            // Later levels hang off the first output
            let _ = self.destroy_model(first.output);
            let _ = self.destroy_property_model(first.property_model);
        }
    }

    fn build_level(&mut self, input: ModelId, prop: PropType) -> Result<BrowserLevel> {
        let property_model = self.create_property_model(input, prop)?;
        let output = match self.build_output(input, prop, &[]) {
            Ok(output) => output,
            Err(e) => {
                if let Err(e) = self.destroy_property_model(property_model) {
                    trace!("Partial level already gone: {}", e);
                }
                return Err(e);
            }
        };
        Ok(BrowserLevel {
            prop,
            input,
            property_model,
            selection: Vec::new(),
            output,
        })
    }

    fn build_output(&mut self, input: ModelId, prop: PropType, selection: &[Value]) -> Result<ModelId> {
        let sort = self.model(input)?.sort().clone();
        let mut query = Query::new();
        query.append_prop_multiple(prop, selection)?;
        self.create_child_model(input, &query, sort)
    }

    fn rebuild_browser(&mut self, id: BrowserId, from: usize) -> Result<()> {
        let outer = std::mem::replace(&mut self.rebuilding, true);
        let outcome = self.rebuild_levels(id, from);
        self.rebuilding = outer;
        outcome
    }

    fn rebuild_levels(&mut self, id: BrowserId, from: usize) -> Result<()> {
        let mut browser = self.browsers.remove(&id).ok_or(DbError::BrowserNotFound(id))?;
        let Some(first) = browser.levels.get(from) else {
            self.browsers.insert(id, browser);
            return Err(DbError::BrowserLevel {
                browser: id,
                level: from,
            });
        };

        // Outputs and property models below `from` all hang off this output
        let mut input = first.input;
        if let Err(e) = self.destroy_model(first.output) {
            trace!("Browser output already gone: {}", e);
        }

        let mut outcome = Ok(());
        for index in from..browser.levels.len() {
            let prop = browser.levels[index].prop;
            let rebuilt = if index == from {
                let selection = browser.levels[index].selection.clone();
                let property_model = browser.levels[index].property_model;
                self.build_output(input, prop, &selection)
                    .map(|output| BrowserLevel {
                        prop,
                        input,
                        property_model,
                        selection,
                        output,
                    })
            } else {
                self.build_level(input, prop)
            };
            match rebuilt {
                Ok(level) => {
                    input = level.output;
                    browser.levels[index] = level;
                    self.signals.emit(DbSignal::BrowserLevelRebuilt {
                        browser: id,
                        level: index,
                    });
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        self.browsers.insert(id, browser);
        outcome
    }

    // ===== I/O =====

    /// Pick up a file: stat it if known, read its tags otherwise
    pub fn add_uri(&mut self, uri: &str) -> Result<()> {
        match self.store.lookup_by_location(uri) {
            Some(id) => self.queue_stat(id),
            None => self.queue_load_metadata(uri),
        }
    }

    /// Check that an entry's file still exists
    pub fn queue_stat(&mut self, id: EntryId) -> Result<()> {
        let entry = self.store.entry(id)?;
        let mountpoint = entry.str_value(PropType::Mountpoint);
        let mountpoint = (!mountpoint.is_empty()).then(|| mountpoint.to_string());
        self.coordinator
            .queue(Action::stat(entry.location(), mountpoint))
    }

    /// Read the tags of a file, creating its entry if needed
    pub fn queue_load_metadata(&mut self, uri: &str) -> Result<()> {
        self.coordinator.queue(Action::load_metadata(uri))
    }

    /// Write an entry's tag fields back into its file
    ///
    /// Returns false without queueing anything if the entry's type does not
    /// allow writing tags.
    pub fn sync_tags(&mut self, id: EntryId) -> Result<bool> {
        if !self.store.can_sync_metadata(id)? {
            return Ok(false);
        }
        let entry = self.store.entry(id)?;
        let fields: Vec<(PropType, Value)> =
            TAG_FIELDS.iter().map(|&prop| (prop, entry.get(prop))).collect();
        self.coordinator
            .queue(Action::sync_tags(entry.location(), fields))?;
        Ok(true)
    }

    /// List a directory on a worker and pick up every file found
    pub fn scan_directory(&mut self, uri: &str) -> Result<()> {
        let file_io = Arc::clone(&self.file_io);
        let uri = uri.to_string();
        info!("Scanning {}", uri);
        self.coordinator.spawn_worker("scan", move |ctx| {
            if ctx.is_exiting() {
                return;
            }
            let result = file_io.list_files(&uri);
            ctx.send(Event::ScanResult { uri, result });
        })
    }

    /// Follow changes below a local directory
    pub fn watch_directory(&mut self, path: &Path) -> Result<()> {
        let monitor = self.monitor.get_or_insert_with(|| {
            DirectoryMonitor::new(&self.config.watcher, self.coordinator.event_sender())
        });
        monitor.watch(path)
    }

    pub fn unwatch_directory(&mut self, path: &Path) -> bool {
        self.monitor
            .as_mut()
            .map(|monitor| monitor.unwatch(path))
            .unwrap_or(false)
    }

    // ===== Persistence =====

    /// Write the store on a worker
    ///
    /// A save requested while one is running is performed once the running
    /// save completes.
    pub fn save(&mut self) -> Result<()> {
        let Some(storage) = self.storage.clone() else {
            debug!("No storage backend, skipping save");
            return Ok(());
        };
        if self.save_in_flight {
            self.save_requested = true;
            return Ok(());
        }

        let records = self.store.to_records();
        let count = records.len();
        self.store.set_dirty(false);
        self.save_in_flight = true;
        self.acquire_read_lock();

        let spawned = self.coordinator.spawn_worker("save", move |ctx| {
            ctx.send(Event::SaveComplete(storage.save(&records)));
        });
        if let Err(e) = spawned {
            self.save_in_flight = false;
            self.store.set_dirty(true);
            self.release_read_lock();
            return Err(e);
        }
        info!("Saving {} entries", count);
        Ok(())
    }

    /// Read the stored entries on a worker
    pub fn load(&mut self) -> Result<()> {
        let Some(storage) = self.storage.clone() else {
            debug!("No storage backend, nothing to load");
            return Ok(());
        };
        self.coordinator.spawn_worker("load", move |ctx| {
            ctx.send(Event::LoadComplete(storage.load()));
        })
    }

    fn storage_name(&self) -> String {
        self.config
            .storage
            .database_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    // ===== Event loop =====

    /// Apply queued events for up to the configured poll budget
    ///
    /// Only events queued when the pass starts are considered, so events
    /// deferred by the read lock are not spun on. Ends with a commit. Returns
    /// whether work is left.
    pub fn poll(&mut self) -> bool {
        let deadline = Instant::now() + self.config.poll_budget();

        while !self.deferred.is_empty() && !self.is_read_only() && Instant::now() < deadline {
            if let Some(event) = self.deferred.pop_front() {
                self.apply_event(event);
            }
        }

        let mut remaining = self.coordinator.queued_events();
        while remaining > 0 && Instant::now() < deadline {
            let Some(event) = self.coordinator.try_recv() else {
                break;
            };
            remaining -= 1;
            self.handle_event(event);
        }

        self.commit();
        self.coordinator.queued_events() > 0 || !self.deferred.is_empty()
    }

    /// Whether workers, queued actions or undelivered events remain
    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy() || !self.deferred.is_empty()
    }

    /// Poll until nothing is left to do or `timeout` passes
    ///
    /// Returns true if the database went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll();
            if !self.is_busy() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self.coordinator.queued_events() > 0 {
                continue;
            }
            let wait = (deadline - now).min(IDLE_WAIT_SLICE);
            if let Some(event) = self.coordinator.recv_timeout(wait) {
                self.handle_event(event);
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        // Deferred events go first so per-entry order survives the lock
        if event.is_mutating() && (self.is_read_only() || !self.deferred.is_empty()) {
            trace!("Deferring {} event", event.name());
            self.deferred.push_back(event);
            return;
        }
        self.apply_event(event);
    }

    fn apply_event(&mut self, event: Event) {
        trace!("Applying {} event", event.name());
        match event {
            Event::Stat {
                uri,
                result,
                mount_present,
            } => self.on_stat(&uri, result, mount_present),
            Event::MetadataLoaded { uri, stat, result } => self.on_metadata_loaded(&uri, stat, result),
            Event::TagsSynced { uri, result } => {
                if let Err(e) = result {
                    warn!("Failed to write tags of {}: {}", uri, e);
                    self.signals.emit(DbSignal::SaveError {
                        uri,
                        error: e.to_string(),
                    });
                }
            }
            Event::EntrySet { id, prop, value } => {
                if let Err(e) = self.store.set(id, prop, value, true) {
                    warn!("Queued change of {} on {} failed: {}", prop, id, e);
                }
            }
            Event::ScanResult { uri, result } => self.on_scan_result(uri, result),
            Event::FileChanged(change) => self.on_file_changed(change),
            Event::LoadComplete(result) => self.on_load_complete(result),
            Event::SaveComplete(result) => self.on_save_complete(result),
            Event::QueryFinished {
                model,
                generation,
                results,
            } => self.on_query_finished(model, generation, results),
            Event::ThreadExited => self.coordinator.thread_exited(),
        }
    }

    fn acquire_read_lock(&mut self) {
        if self.coordinator.read_lock().acquire() {
            debug!("Database is read-only");
            self.signals.emit(DbSignal::ReadOnlyChanged(true));
        }
    }

    fn release_read_lock(&mut self) {
        if self.coordinator.read_lock().release() {
            debug!("Database is writable again");
            self.signals.emit(DbSignal::ReadOnlyChanged(false));
        }
    }

    fn set_logged(&mut self, id: EntryId, prop: PropType, value: Value) {
        if let Err(e) = self.store.set(id, prop, value, true) {
            warn!("Failed to set {} on {}: {}", prop, id, e);
        }
    }

    fn on_stat(&mut self, uri: &str, result: std::result::Result<FileStat, SoulError>, mount_present: bool) {
        let Some(id) = self.store.lookup_by_location(uri) else {
            trace!("Stat result for unknown {}", uri);
            return;
        };
        let Ok(entry) = self.store.entry(id) else {
            return;
        };

        match result {
            Ok(stat) => {
                if entry.u64_value(PropType::Mtime) != stat.mtime {
                    debug!("{} changed on disk, rereading tags", uri);
                    if let Err(e) = self.queue_load_metadata(uri) {
                        warn!("Failed to queue tag reload of {}: {}", uri, e);
                    }
                }
                self.set_logged(id, PropType::LastSeen, Value::Timestamp(now_secs()));
                if entry.bool_value(PropType::Hidden) {
                    self.set_logged(id, PropType::Hidden, Value::Boolean(false));
                }
            }
            Err(e) if !mount_present => {
                info!("Mount point of {} is gone, hiding it: {}", uri, e);
                if !entry.bool_value(PropType::Hidden) {
                    self.set_logged(id, PropType::Hidden, Value::Boolean(true));
                }
            }
            Err(e) => {
                info!("{} is missing, removing it: {}", uri, e);
                if let Err(e) = self.delete(id) {
                    warn!("Failed to remove {}: {}", uri, e);
                }
            }
        }
    }

    fn on_metadata_loaded(
        &mut self,
        uri: &str,
        stat: Option<FileStat>,
        result: std::result::Result<MetadataLoad, SoulError>,
    ) {
        let existing = self.store.lookup_by_location(uri);
        let load = match result {
            Ok(load) => load,
            Err(e) => {
                warn!("Failed to read tags of {}: {}", uri, e);
                let unsupported = matches!(e, SoulError::UnsupportedFormat(_));
                self.signals.emit(DbSignal::LoadError {
                    uri: uri.to_string(),
                    error: e.to_string(),
                });
                if existing.is_none() && unsupported {
                    self.add_import_error(uri, &e);
                }
                return;
            }
        };

        // A file that failed before and now reads is a song again
        let existing = match existing {
            Some(id) if self.entry_type_of(id) == Some(EntryType::ImportError) => {
                if let Err(e) = self.delete(id) {
                    warn!("Failed to replace import error {}: {}", uri, e);
                    return;
                }
                None
            }
            other => other,
        };
        let (id, created) = match existing {
            Some(id) => (id, false),
            None => match self.store.allocate(EntryType::Song, uri) {
                Ok(id) => (id, true),
                Err(e) => {
                    warn!("Failed to create entry for {}: {}", uri, e);
                    return;
                }
            },
        };

        for (prop, value) in load.fields {
            if matches!(prop, PropType::Type | PropType::Location) || prop.is_derived() {
                continue;
            }
            if let Err(e) = prop.check(&value) {
                warn!("Ignoring tag {} of {}: {}", prop, uri, e);
                continue;
            }
            self.set_logged(id, prop, value);
        }

        let now = now_secs();
        self.set_logged(id, PropType::MediaType, Value::string(&load.mime));
        if let Some(stat) = stat {
            self.set_logged(id, PropType::Mtime, Value::Timestamp(stat.mtime));
            self.set_logged(id, PropType::FileSize, Value::ULong(stat.size));
        }
        self.set_logged(id, PropType::LastSeen, Value::Timestamp(now));

        if created {
            self.set_logged(id, PropType::FirstSeen, Value::Timestamp(now));
            match self.store.insert(id) {
                Ok(()) => debug!("Added {}", uri),
                Err(e) => warn!("Failed to insert {}: {}", uri, e),
            }
        }
    }

    fn add_import_error(&mut self, uri: &str, error: &SoulError) {
        let id = match self.store.allocate(EntryType::ImportError, uri) {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to record import error for {}: {}", uri, e);
                return;
            }
        };
        self.set_logged(id, PropType::PlaybackError, Value::string(error.to_string()));
        self.set_logged(id, PropType::FirstSeen, Value::Timestamp(now_secs()));
        if let Err(e) = self.store.insert(id) {
            warn!("Failed to insert import error for {}: {}", uri, e);
        }
    }

    fn entry_type_of(&self, id: EntryId) -> Option<EntryType> {
        self.store.entry(id).ok().map(|e| e.entry_type().clone())
    }

    fn on_scan_result(&mut self, uri: String, result: std::result::Result<Vec<String>, SoulError>) {
        match result {
            Ok(files) => {
                info!("Found {} files below {}", files.len(), uri);
                for file in files {
                    if let Err(e) = self.add_uri(&file) {
                        warn!("Failed to queue {}: {}", file, e);
                        if matches!(e, DbError::ShuttingDown) {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to scan {}: {}", uri, e);
                self.signals.emit(DbSignal::LoadError {
                    uri,
                    error: e.to_string(),
                });
            }
        }
    }

    fn on_file_changed(&mut self, change: WatcherEvent) {
        debug!("File change: {:?}", change);
        let (gone, present) = match change {
            WatcherEvent::Created(path) | WatcherEvent::Modified(path) => (None, Some(path)),
            WatcherEvent::Removed(path) => (Some(path), None),
            WatcherEvent::Renamed(from, to) => (Some(from), Some(to)),
        };

        // A vanished file goes through the stat error policy
        if let Some(uri) = gone.as_deref().and_then(path_to_uri) {
            if let Some(id) = self.store.lookup_by_location(&uri) {
                if let Err(e) = self.queue_stat(id) {
                    warn!("Failed to queue stat of {}: {}", uri, e);
                }
            }
        }
        if let Some(uri) = present.as_deref().and_then(path_to_uri) {
            if let Err(e) = self.add_uri(&uri) {
                warn!("Failed to queue {}: {}", uri, e);
            }
        }
    }

    fn on_load_complete(&mut self, result: std::result::Result<Vec<EntryRecord>, SoulError>) {
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load database: {}", e);
                let uri = self.storage_name();
                self.signals.emit(DbSignal::LoadError {
                    uri,
                    error: e.to_string(),
                });
                return;
            }
        };

        let mut loaded = 0;
        for record in records {
            if !self.store.types().contains(&record.entry_type) {
                warn!(
                    "Skipping {}: entry type {} is not registered",
                    record.location,
                    record.entry_type.name()
                );
                continue;
            }
            let id = match self.store.allocate(record.entry_type.clone(), &record.location) {
                Ok(id) => id,
                Err(DbError::DuplicateLocation { .. }) => {
                    debug!("Skipping stored duplicate {}", record.location);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping {}: {}", record.location, e);
                    continue;
                }
            };
            self.restore_properties(id, &record);
            match self.store.insert(id) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Failed to insert {}: {}", record.location, e),
            }
        }

        self.commit();
        self.store.set_dirty(false);
        info!("Loaded {} entries", loaded);
        self.signals.emit(DbSignal::LoadComplete { entries: loaded });
    }

    fn restore_properties(&mut self, id: EntryId, record: &EntryRecord) {
        for (name, text) in &record.properties {
            let prop = match PropType::from_name(name) {
                Ok(prop) => prop,
                Err(e) => {
                    warn!("Ignoring stored property of {}: {}", record.location, e);
                    continue;
                }
            };
            if matches!(prop, PropType::Type | PropType::Location) || !prop.is_persistent() {
                continue;
            }
            match Value::from_text(prop.kind(), text) {
                Ok(value) => {
                    if let Err(e) = self.store.set_nonotify(id, prop, value) {
                        warn!("Ignoring stored {} of {}: {}", prop, record.location, e);
                    }
                }
                Err(e) => warn!("Ignoring stored {} of {}: {}", prop, record.location, e),
            }
        }
    }

    fn on_save_complete(&mut self, result: std::result::Result<(), SoulError>) {
        self.release_read_lock();
        self.save_in_flight = false;
        match result {
            Ok(()) => {
                info!("Database saved");
                self.signals.emit(DbSignal::SaveComplete);
            }
            Err(e) => {
                error!("Failed to save database: {}", e);
                self.store.set_dirty(true);
                let uri = self.storage_name();
                self.signals.emit(DbSignal::SaveError {
                    uri,
                    error: e.to_string(),
                });
            }
        }
        if std::mem::take(&mut self.save_requested) {
            if let Err(e) = self.save() {
                warn!("Failed to start requested save: {}", e);
            }
        }
    }

    /// Stop the workers and write the store one last time if it is dirty
    ///
    /// Queued actions and mutating events still in the queue are dropped.
    /// Called by `Drop`; calling it twice is harmless.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        info!("Shutting down database");

        self.monitor = None;
        self.coordinator.shutdown();

        let mut discarded = 0usize;
        while let Some(event) = self.coordinator.try_recv() {
            match event {
                Event::SaveComplete(_) | Event::QueryFinished { .. } | Event::ThreadExited => {
                    self.apply_event(event);
                }
                other => {
                    trace!("Dropping {} event", other.name());
                    discarded += 1;
                }
            }
        }
        discarded += self.deferred.len();
        self.deferred.clear();
        if discarded > 0 {
            debug!("Dropped {} pending events", discarded);
        }

        self.commit();
        if !self.config.storage.save_on_shutdown || !self.store.is_dirty() {
            return;
        }
        if let Some(storage) = &self.storage {
            match storage.save(&self.store.to_records()) {
                Ok(()) => {
                    self.store.set_dirty(false);
                    info!("Database saved on shutdown");
                }
                Err(e) => error!("Failed to save database on shutdown: {}", e),
            }
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.shutdown();
    }
}
