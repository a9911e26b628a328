//! Row ordering for query models

use crate::entry::Entry;
use soul_core::types::PropType;
use std::cmp::Ordering;

/// One sort column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub prop: PropType,
    pub descending: bool,
}

/// Ordering of a query model's rows
///
/// String columns with a sort-key mirror compare by that mirror, so
/// "The Beatles" sorts under B. An empty order keeps arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortOrder {
    keys: Vec<SortKey>,
}

impl SortOrder {
    /// Arrival order
    pub fn unsorted() -> Self {
        Self::default()
    }

    /// Ascending by one property
    pub fn by(prop: PropType) -> Self {
        Self::unsorted().then_by(prop, false)
    }

    /// Add a column
    pub fn then_by(mut self, prop: PropType, descending: bool) -> Self {
        self.keys.push(SortKey { prop, descending });
        self
    }

    /// Artist, album, disc, track, title
    pub fn album_order() -> Self {
        Self::by(PropType::Artist)
            .then_by(PropType::Album, false)
            .then_by(PropType::DiscNumber, false)
            .then_by(PropType::TrackNumber, false)
            .then_by(PropType::Title, false)
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn is_unsorted(&self) -> bool {
        self.keys.is_empty()
    }

    /// Whether a change to `prop` can move a row
    pub fn depends_on(&self, prop: PropType) -> bool {
        self.keys.iter().any(|k| {
            k.prop == prop || k.prop.mirror_source() == Some(prop) || k.prop.sort_key_mirror() == Some(prop)
        })
    }

    pub fn compare(&self, a: &Entry, b: &Entry) -> Ordering {
        for key in &self.keys {
            let ordering = compare_column(key.prop, a, b);
            let ordering = if key.descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn compare_column(prop: PropType, a: &Entry, b: &Entry) -> Ordering {
    match prop.sort_key_mirror() {
        Some(mirror) => a.str_value(mirror).cmp(b.str_value(mirror)),
        None => a.get(prop).cmp(&b.get(prop)),
    }
}
