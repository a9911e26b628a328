mod entry_type;
mod metadata;
mod property;
mod value;

pub use entry_type::{
    EntryType, PODCAST_STATUS_COMPLETE, PODCAST_STATUS_ERROR, PODCAST_STATUS_PAUSED,
    PODCAST_STATUS_WAITING,
};
pub use metadata::{EntryRecord, FileStat, MetadataLoad};
pub use property::{
    date_to_day, date_to_year, year_bounds, MirrorRole, PropType, PropertyDescriptor, Slot,
    Storage, SEARCH_FIELDS,
};
pub use value::{PropKind, Value};
