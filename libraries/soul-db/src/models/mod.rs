//! Live views over the store
//!
//! A [`QueryModel`] is an ordered result set kept up to date from store
//! notifications (or from its base model's changes). A [`PropertyModel`]
//! groups a query model's rows by one property. A [`Browser`] chains
//! property models so that a selection at one level narrows the next.

mod browser;
mod property_model;
mod query_model;
mod sort;

pub use browser::{Browser, BrowserLevel};
pub use property_model::{PropertyModel, PropertyRow};
pub use query_model::QueryModel;
pub use sort::{SortKey, SortOrder};

pub(crate) use query_model::RowUpdate;

use crate::entry::{Entry, EntryChange, EntryId, EntryNotification};
use std::fmt;
use std::sync::Arc;

macro_rules! model_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

model_id!(
    /// Handle to a query model
    ModelId,
    "model"
);
model_id!(
    /// Handle to a property model
    PropertyModelId,
    "property-model"
);
model_id!(
    /// Handle to a property browser
    BrowserId,
    "browser"
);

/// A change to a model's membership, as seen by whatever is downstream
#[derive(Debug, Clone)]
pub enum ModelDelta {
    /// The entry became a member (or was added to the store)
    Inserted { id: EntryId, entry: Arc<Entry> },
    /// A member changed
    Changed {
        id: EntryId,
        entry: Arc<Entry>,
        changes: Arc<[EntryChange]>,
    },
    /// The entry stopped being a member (or was deleted)
    Removed { id: EntryId, entry: Arc<Entry> },
}

impl ModelDelta {
    pub fn id(&self) -> EntryId {
        match self {
            Self::Inserted { id, .. } | Self::Changed { id, .. } | Self::Removed { id, .. } => *id,
        }
    }

    pub fn entry(&self) -> &Arc<Entry> {
        match self {
            Self::Inserted { entry, .. } | Self::Changed { entry, .. } | Self::Removed { entry, .. } => {
                entry
            }
        }
    }
}

impl From<EntryNotification> for ModelDelta {
    fn from(notification: EntryNotification) -> Self {
        match notification {
            EntryNotification::Added { id, entry } => Self::Inserted { id, entry },
            EntryNotification::Changed { id, entry, changes } => Self::Changed { id, entry, changes },
            EntryNotification::Deleted { id, entry } => Self::Removed { id, entry },
        }
    }
}
