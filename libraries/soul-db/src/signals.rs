//! Notifications delivered to the UI layer
//!
//! Every subscriber gets its own unbounded channel and sees every signal in
//! emission order. Dropped receivers are pruned on the next emission.

use crate::entry::{EntryChange, EntryId};
use crate::models::{BrowserId, ModelId, PropertyModelId, PropertyRow};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;

/// Something the UI may want to react to
#[derive(Debug, Clone, PartialEq)]
pub enum DbSignal {
    /// An entry became visible at commit
    EntryAdded(EntryId),
    /// An entry's batched changes were flushed
    EntryChanged {
        id: EntryId,
        changes: Arc<[EntryChange]>,
    },
    /// An entry was deleted
    EntryDeleted(EntryId),

    /// A load worker finished and its records are in the store
    LoadComplete { entries: usize },
    /// Reading tags or the stored database failed
    LoadError { uri: String, error: String },
    /// The store was written
    SaveComplete,
    /// Writing tags or the stored database failed
    SaveError { uri: String, error: String },
    /// The read lock was taken (true) or dropped (false)
    ReadOnlyChanged(bool),

    /// A full query finished and its results are visible
    QueryComplete(ModelId),
    /// A row appeared in a query model
    RowInserted { model: ModelId, index: usize, id: EntryId },
    /// A member of a query model changed
    RowChanged { model: ModelId, index: usize, id: EntryId },
    /// A row left a query model
    RowDeleted { model: ModelId, index: usize, id: EntryId },
    /// A query model was re-sorted
    RowsReordered(ModelId),

    /// A property model gained a row
    PropertyRowInserted { model: PropertyModelId, row: PropertyRow },
    /// A property model row's count changed
    PropertyRowChanged { model: PropertyModelId, row: PropertyRow, count: usize },
    /// A property model row is about to be removed
    PropertyPreRowDeletion { model: PropertyModelId, row: PropertyRow },
    /// A property model row was removed
    PropertyRowDeleted { model: PropertyModelId, row: PropertyRow },

    /// A browser level was rebuilt after a selection change
    BrowserLevelRebuilt { browser: BrowserId, level: usize },
}

/// Fan-out of signals to subscribers
#[derive(Default)]
pub struct SignalHub {
    subscribers: Vec<Sender<DbSignal>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> Receiver<DbSignal> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, signal: DbSignal) {
        match self.subscribers.as_slice() {
            [] => {}
            [only] => {
                if only.send(signal).is_err() {
                    self.subscribers.clear();
                }
            }
            _ => self.subscribers.retain(|s| s.send(signal.clone()).is_ok()),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
