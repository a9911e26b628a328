//! Live ordered result set of a query

use super::{ModelDelta, ModelId, PropertyModelId, SortOrder};
use crate::entry::{Entry, EntryId};
use crate::query::Query;
use soul_core::types::PropType;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// A membership change at a row position
#[derive(Debug, Clone)]
pub(crate) struct RowUpdate {
    /// Row index at the time of the change (before removal for removals)
    pub index: usize,
    pub delta: ModelDelta,
}

enum State {
    Complete,
    /// A full query is running; deltas wait until its results are installed
    Running {
        generation: u64,
        cancel: Arc<AtomicBool>,
        buffered: Vec<ModelDelta>,
    },
}

/// Ordered, incrementally maintained result set of a query
///
/// Rows are inserted at their sorted position. Changes to a member never move
/// it; they only flag the model for [`QueryModel::needs_resort`].
pub struct QueryModel {
    id: ModelId,
    query: Query,
    base: Option<ModelId>,
    sort: SortOrder,
    rows: Vec<(EntryId, Arc<Entry>)>,
    members: HashSet<EntryId>,
    needs_resort: bool,
    state: State,
    total_duration: u64,
    total_file_size: u64,
    pub(crate) children: Vec<ModelId>,
    pub(crate) property_models: Vec<PropertyModelId>,
}

impl QueryModel {
    pub(crate) fn new(id: ModelId, query: &Query, base: Option<ModelId>, sort: SortOrder) -> Self {
        Self {
            id,
            query: query.preprocessed(),
            base,
            sort,
            rows: Vec::new(),
            members: HashSet::new(),
            needs_resort: false,
            state: State::Complete,
            total_duration: 0,
            total_file_size: 0,
            children: Vec::new(),
            property_models: Vec::new(),
        }
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    /// The prepared query the model filters by
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Model this one narrows, if any
    pub fn base(&self) -> Option<ModelId> {
        self.base
    }

    pub fn sort(&self) -> &SortOrder {
        &self.sort
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// False while a full query is running
    pub fn is_complete(&self) -> bool {
        matches!(self.state, State::Complete)
    }

    /// Whether member changes may have left rows out of order
    pub fn needs_resort(&self) -> bool {
        self.needs_resort
    }

    /// Sum of member durations in seconds
    pub fn total_duration(&self) -> u64 {
        self.total_duration
    }

    /// Sum of member file sizes in bytes
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    pub fn entry_at(&self, index: usize) -> Option<(EntryId, &Arc<Entry>)> {
        self.rows.get(index).map(|(id, entry)| (*id, entry))
    }

    pub fn index_of(&self, id: EntryId) -> Option<usize> {
        if !self.members.contains(&id) {
            return None;
        }
        self.rows.iter().position(|(row, _)| *row == id)
    }

    pub fn contains(&self, id: EntryId) -> bool {
        self.members.contains(&id)
    }

    /// Rows in order
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Arc<Entry>)> + '_ {
        self.rows.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn ids(&self) -> Vec<EntryId> {
        self.rows.iter().map(|(id, _)| *id).collect()
    }

    pub fn children(&self) -> &[ModelId] {
        &self.children
    }

    /// Property models grouping this model's rows
    pub fn property_models(&self) -> &[PropertyModelId] {
        &self.property_models
    }

    pub(crate) fn rows(&self) -> &[(EntryId, Arc<Entry>)] {
        &self.rows
    }

    /// Enter the running state for a new full query
    ///
    /// Any running query is cancelled and current rows are dropped.
    pub(crate) fn begin_query(&mut self, generation: u64) -> (Arc<AtomicBool>, Vec<RowUpdate>) {
        self.cancel();
        let removed = self.clear();
        let cancel = Arc::new(AtomicBool::new(false));
        self.state = State::Running {
            generation,
            cancel: Arc::clone(&cancel),
            buffered: Vec::new(),
        };
        (cancel, removed)
    }

    /// Cancel a running query; buffered deltas are dropped with it
    pub(crate) fn cancel(&mut self) -> bool {
        match std::mem::replace(&mut self.state, State::Complete) {
            State::Running { cancel, .. } => {
                cancel.store(true, AtomicOrdering::Release);
                true
            }
            State::Complete => false,
        }
    }

    /// Install the results of the running query, then replay buffered deltas
    ///
    /// Returns `None` if `generation` is not the running query.
    pub(crate) fn install(
        &mut self,
        generation: u64,
        entries: Vec<(EntryId, Arc<Entry>)>,
        now: u64,
    ) -> Option<Vec<RowUpdate>> {
        match &self.state {
            State::Running { generation: g, .. } if *g == generation => {}
            _ => return None,
        }
        let buffered = match std::mem::replace(&mut self.state, State::Complete) {
            State::Running { buffered, .. } => buffered,
            State::Complete => Vec::new(),
        };

        let mut rows = entries;
        rows.retain(|(id, _)| self.members.insert(*id));
        if !self.sort.is_unsorted() {
            let sort = &self.sort;
            rows.sort_by(|a, b| sort.compare(&a.1, &b.1));
        }
        for (_, entry) in &rows {
            self.add_totals(entry);
        }
        let mut updates: Vec<RowUpdate> = rows
            .iter()
            .enumerate()
            .map(|(index, (id, entry))| RowUpdate {
                index,
                delta: ModelDelta::Inserted {
                    id: *id,
                    entry: Arc::clone(entry),
                },
            })
            .collect();
        self.rows = rows;
        self.needs_resort = false;

        for delta in &buffered {
            updates.extend(self.apply(delta, now));
        }
        Some(updates)
    }

    /// Apply an upstream change
    pub(crate) fn apply(&mut self, delta: &ModelDelta, now: u64) -> Vec<RowUpdate> {
        if let State::Running { buffered, .. } = &mut self.state {
            buffered.push(delta.clone());
            return Vec::new();
        }

        match delta {
            ModelDelta::Inserted { id, entry } => {
                if !self.members.contains(id) && self.query.evaluate_at(entry, now) {
                    vec![self.insert_row(*id, Arc::clone(entry))]
                } else {
                    Vec::new()
                }
            }
            ModelDelta::Changed { id, entry, changes } => {
                let matches = self.query.evaluate_at(entry, now);
                match (self.members.contains(id), matches) {
                    (true, true) => {
                        let Some(index) = self.index_of(*id) else {
                            return Vec::new();
                        };
                        let old = std::mem::replace(&mut self.rows[index].1, Arc::clone(entry));
                        self.sub_totals(&old);
                        self.add_totals(entry);
                        if changes.iter().any(|c| self.sort.depends_on(c.prop)) {
                            self.needs_resort = true;
                        }
                        vec![RowUpdate {
                            index,
                            delta: delta.clone(),
                        }]
                    }
                    (true, false) => self.remove_row(*id, entry).into_iter().collect(),
                    (false, true) => vec![self.insert_row(*id, Arc::clone(entry))],
                    (false, false) => Vec::new(),
                }
            }
            ModelDelta::Removed { id, entry } => self.remove_row(*id, entry).into_iter().collect(),
        }
    }

    /// Re-check membership of current rows and `candidates`
    ///
    /// Used to populate a model from its base and to refresh queries that
    /// depend on the current time.
    pub(crate) fn reevaluate(
        &mut self,
        candidates: &[(EntryId, Arc<Entry>)],
        now: u64,
    ) -> Vec<RowUpdate> {
        if !self.is_complete() {
            return Vec::new();
        }
        let mut updates = Vec::new();

        let stale: Vec<(EntryId, Arc<Entry>)> = self
            .rows
            .iter()
            .filter(|(_, entry)| !self.query.evaluate_at(entry, now))
            .cloned()
            .collect();
        for (id, entry) in stale {
            updates.extend(self.remove_row(id, &entry));
        }

        for (id, entry) in candidates {
            if !self.members.contains(id) && self.query.evaluate_at(entry, now) {
                updates.push(self.insert_row(*id, Arc::clone(entry)));
            }
        }
        updates
    }

    pub(crate) fn set_sort(&mut self, sort: SortOrder) {
        self.sort = sort;
        self.needs_resort = true;
    }

    /// Re-sort the rows; true if the order changed
    pub(crate) fn resort(&mut self) -> bool {
        self.needs_resort = false;
        if self.sort.is_unsorted() {
            return false;
        }
        let before = self.ids();
        let sort = &self.sort;
        self.rows.sort_by(|a, b| sort.compare(&a.1, &b.1));
        self.rows.iter().map(|(id, _)| *id).ne(before)
    }

    /// Drop every row, last first, so each reported index is valid when applied in order
    pub(crate) fn clear(&mut self) -> Vec<RowUpdate> {
        self.members.clear();
        self.total_duration = 0;
        self.total_file_size = 0;
        let rows = std::mem::take(&mut self.rows);
        rows.into_iter()
            .enumerate()
            .rev()
            .map(|(index, (id, entry))| RowUpdate {
                index,
                delta: ModelDelta::Removed { id, entry },
            })
            .collect()
    }

    fn insert_row(&mut self, id: EntryId, entry: Arc<Entry>) -> RowUpdate {
        let index = if self.sort.is_unsorted() {
            self.rows.len()
        } else {
            let sort = &self.sort;
            self.rows
                .partition_point(|(_, e)| sort.compare(e, &entry) != Ordering::Greater)
        };
        self.add_totals(&entry);
        self.members.insert(id);
        self.rows.insert(index, (id, Arc::clone(&entry)));
        RowUpdate {
            index,
            delta: ModelDelta::Inserted { id, entry },
        }
    }

    fn remove_row(&mut self, id: EntryId, latest: &Arc<Entry>) -> Option<RowUpdate> {
        let index = self.index_of(id)?;
        let (_, old) = self.rows.remove(index);
        self.members.remove(&id);
        self.sub_totals(&old);
        Some(RowUpdate {
            index,
            delta: ModelDelta::Removed {
                id,
                entry: Arc::clone(latest),
            },
        })
    }

    fn add_totals(&mut self, entry: &Entry) {
        self.total_duration = self
            .total_duration
            .saturating_add(entry.u64_value(PropType::Duration));
        self.total_file_size = self
            .total_file_size
            .saturating_add(entry.u64_value(PropType::FileSize));
    }

    fn sub_totals(&mut self, entry: &Entry) {
        self.total_duration = self
            .total_duration
            .saturating_sub(entry.u64_value(PropType::Duration));
        self.total_file_size = self
            .total_file_size
            .saturating_sub(entry.u64_value(PropType::FileSize));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryChange;
    use crate::query::{QueryOp, Term};
    use soul_core::types::{EntryType, Value};

    fn song(index: u32, title: &str, genre: &str, duration: u64) -> (EntryId, Arc<Entry>) {
        let mut e = Entry::new(EntryType::Song, &format!("file:///{}.mp3", index));
        e.set_initial(PropType::Title, Value::from(title)).unwrap();
        e.set_initial(PropType::Genre, Value::from(genre)).unwrap();
        e.set_initial(PropType::Duration, Value::ULong(duration))
            .unwrap();
        (EntryId::new(index, 0), Arc::new(e))
    }

    fn rock_model() -> QueryModel {
        let query = Query::parse([Term::prop(QueryOp::Equals, PropType::Genre, "Rock")]).unwrap();
        QueryModel::new(ModelId(1), &query, None, SortOrder::by(PropType::Title))
    }

    fn inserted((id, entry): &(EntryId, Arc<Entry>)) -> ModelDelta {
        ModelDelta::Inserted {
            id: *id,
            entry: Arc::clone(entry),
        }
    }

    #[test]
    fn inserts_matching_entries_in_sorted_position() {
        let mut model = rock_model();
        model.apply(&inserted(&song(1, "Zebra", "Rock", 100)), 0);
        model.apply(&inserted(&song(2, "Apple", "Rock", 50)), 0);
        let skipped = model.apply(&inserted(&song(3, "Mango", "Jazz", 10)), 0);
        assert!(skipped.is_empty());

        assert_eq!(model.len(), 2);
        assert_eq!(model.entry_at(0).unwrap().0, EntryId::new(2, 0));
        assert_eq!(model.index_of(EntryId::new(1, 0)), Some(1));
        assert_eq!(model.total_duration(), 150);
    }

    #[test]
    fn change_updates_membership() {
        let mut model = rock_model();
        let (id, _) = song(1, "A", "Rock", 10);
        model.apply(&inserted(&song(1, "A", "Rock", 10)), 0);

        let (_, jazz) = song(1, "A", "Jazz", 10);
        let changes: Arc<[EntryChange]> = vec![EntryChange {
            prop: PropType::Genre,
            old: Value::from("Rock"),
            new: Value::from("Jazz"),
        }]
        .into();
        let updates = model.apply(
            &ModelDelta::Changed {
                id,
                entry: jazz,
                changes: Arc::clone(&changes),
            },
            0,
        );
        assert!(matches!(updates[0].delta, ModelDelta::Removed { .. }));
        assert!(model.is_empty());
        assert_eq!(model.total_duration(), 0);

        let (_, rock) = song(1, "A", "Rock", 10);
        let updates = model.apply(&ModelDelta::Changed { id, entry: rock, changes }, 0);
        assert!(matches!(updates[0].delta, ModelDelta::Inserted { .. }));
        assert_eq!(model.len(), 1);
    }

    #[test]
    fn sort_key_change_flags_resort_without_moving() {
        let mut model = rock_model();
        model.apply(&inserted(&song(1, "A", "Rock", 0)), 0);
        model.apply(&inserted(&song(2, "B", "Rock", 0)), 0);

        let (id, renamed) = song(1, "C", "Rock", 0);
        model.apply(
            &ModelDelta::Changed {
                id,
                entry: renamed,
                changes: vec![EntryChange {
                    prop: PropType::Title,
                    old: Value::from("A"),
                    new: Value::from("C"),
                }]
                .into(),
            },
            0,
        );
        assert!(model.needs_resort());
        assert_eq!(model.entry_at(0).unwrap().0, id);

        assert!(model.resort());
        assert!(!model.needs_resort());
        assert_eq!(model.entry_at(1).unwrap().0, id);
    }

    #[test]
    fn running_model_buffers_until_install() {
        let mut model = rock_model();
        let (cancel, removed) = model.begin_query(7);
        assert!(removed.is_empty());
        assert!(!cancel.load(AtomicOrdering::Acquire));

        let late = song(2, "Late", "Rock", 0);
        assert!(model.apply(&inserted(&late), 0).is_empty());
        assert!(model.is_empty());

        assert!(model.install(6, Vec::new(), 0).is_none());
        let updates = model.install(7, vec![song(1, "Early", "Rock", 0)], 0).unwrap();
        assert_eq!(updates.len(), 2);
        assert!(model.is_complete());
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn begin_query_cancels_previous_run() {
        let mut model = rock_model();
        let (first, _) = model.begin_query(1);
        let (second, _) = model.begin_query(2);
        assert!(first.load(AtomicOrdering::Acquire));
        assert!(!second.load(AtomicOrdering::Acquire));
        assert!(model.install(1, Vec::new(), 0).is_none());
    }

    #[test]
    fn clear_reports_valid_indexes() {
        let mut model = rock_model();
        for i in 0..3 {
            model.apply(&inserted(&song(i, &format!("{}", i), "Rock", 0)), 0);
        }
        let updates = model.clear();
        let indexes: Vec<usize> = updates.iter().map(|u| u.index).collect();
        assert_eq!(indexes, vec![2, 1, 0]);
        assert!(model.is_empty());
    }

    #[test]
    fn reevaluate_populates_from_candidates() {
        let mut model = rock_model();
        let candidates = vec![song(1, "A", "Rock", 0), song(2, "B", "Pop", 0)];
        let updates = model.reevaluate(&candidates, 0);
        assert_eq!(updates.len(), 1);
        assert!(model.contains(EntryId::new(1, 0)));
    }
}
