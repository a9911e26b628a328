//! Grouped counts of one property over a query model

use super::{ModelDelta, ModelId, PropertyModelId};
use crate::entry::{Entry, EntryId};
use crate::signals::DbSignal;
use soul_core::text;
use soul_core::types::{PropType, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// A row of a property model
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyRow {
    /// Every member of the bound model
    All,
    /// Members whose property has this value
    Value(Value),
}

/// Ordering key of a value row: collation text first, then the value itself
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RowKey {
    collate: String,
    value: Value,
}

impl RowKey {
    fn of(prop: PropType, entry: &Entry) -> Self {
        let value = entry.get(prop);
        let collate = match prop.sort_key_mirror() {
            Some(mirror) => entry.str_value(mirror).to_string(),
            None => value.as_str().map(text::sort_key).unwrap_or_default(),
        };
        Self { collate, value }
    }
}

/// Counts of each distinct value of one property among a model's rows
///
/// The "All" row counts every member and exists only while there are members,
/// so an empty model shows no rows at all.
pub struct PropertyModel {
    id: PropertyModelId,
    prop: PropType,
    model: ModelId,
    rows: BTreeMap<RowKey, usize>,
    counted: HashMap<EntryId, RowKey>,
    total: usize,
}

impl PropertyModel {
    pub(crate) fn new(id: PropertyModelId, prop: PropType, model: ModelId) -> Self {
        Self {
            id,
            prop,
            model,
            rows: BTreeMap::new(),
            counted: HashMap::new(),
            total: 0,
        }
    }

    pub fn id(&self) -> PropertyModelId {
        self.id
    }

    /// Grouped property
    pub fn prop(&self) -> PropType {
        self.prop
    }

    /// Query model the counts are taken from
    pub fn model(&self) -> ModelId {
        self.model
    }

    /// Count of the "All" row, `None` when the model has no rows
    pub fn all_count(&self) -> Option<usize> {
        (self.total > 0).then_some(self.total)
    }

    /// Number of members with `value`, 0 when there is no such row
    pub fn count(&self, value: &Value) -> usize {
        self.rows
            .iter()
            .find(|(key, _)| key.value == *value)
            .map(|(_, count)| *count)
            .unwrap_or(0)
    }

    /// Rows in display order, "All" first
    pub fn rows(&self) -> impl Iterator<Item = (PropertyRow, usize)> + '_ {
        self.all_count()
            .map(|count| (PropertyRow::All, count))
            .into_iter()
            .chain(
                self.rows
                    .iter()
                    .map(|(key, count)| (PropertyRow::Value(key.value.clone()), *count)),
            )
    }

    /// Distinct values, excluding "All"
    pub fn values(&self) -> Vec<Value> {
        self.rows.keys().map(|key| key.value.clone()).collect()
    }

    /// Number of rows including "All"
    pub fn len(&self) -> usize {
        if self.total > 0 {
            self.rows.len() + 1
        } else {
            0
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Sum of the value row counts
    pub fn total(&self) -> usize {
        self.total
    }

    /// Apply a change of the bound model
    pub(crate) fn apply(&mut self, delta: &ModelDelta) -> Vec<DbSignal> {
        let mut signals = Vec::new();
        match delta {
            ModelDelta::Inserted { id, entry } => self.add(*id, entry, &mut signals),
            ModelDelta::Removed { id, .. } => self.remove(*id, &mut signals),
            ModelDelta::Changed { id, entry, changes } => {
                let relevant = changes
                    .iter()
                    .any(|c| c.prop == self.prop || self.prop.mirror_source() == Some(c.prop));
                if !relevant {
                    return signals;
                }
                let new_key = RowKey::of(self.prop, entry);
                match self.counted.get(id).cloned() {
                    Some(old_key) if old_key == new_key => {}
                    Some(old_key) => {
                        self.decrement(&old_key, &mut signals);
                        self.increment(new_key.clone(), &mut signals);
                        self.counted.insert(*id, new_key);
                    }
                    None => {}
                }
            }
        }
        signals
    }

    /// Count every row of the bound model
    pub(crate) fn populate<'a>(
        &mut self,
        rows: impl IntoIterator<Item = &'a (EntryId, Arc<Entry>)>,
    ) -> Vec<DbSignal> {
        let mut signals = Vec::new();
        for (id, entry) in rows {
            self.add(*id, entry, &mut signals);
        }
        signals
    }

    fn add(&mut self, id: EntryId, entry: &Entry, signals: &mut Vec<DbSignal>) {
        if self.counted.contains_key(&id) {
            return;
        }
        let key = RowKey::of(self.prop, entry);
        self.counted.insert(id, key.clone());
        self.increment(key, signals);

        self.total += 1;
        signals.push(if self.total == 1 {
            DbSignal::PropertyRowInserted {
                model: self.id,
                row: PropertyRow::All,
            }
        } else {
            DbSignal::PropertyRowChanged {
                model: self.id,
                row: PropertyRow::All,
                count: self.total,
            }
        });
    }

    fn remove(&mut self, id: EntryId, signals: &mut Vec<DbSignal>) {
        let Some(key) = self.counted.remove(&id) else {
            return;
        };
        self.decrement(&key, signals);

        self.total = self.total.saturating_sub(1);
        if self.total == 0 {
            signals.push(DbSignal::PropertyPreRowDeletion {
                model: self.id,
                row: PropertyRow::All,
            });
            signals.push(DbSignal::PropertyRowDeleted {
                model: self.id,
                row: PropertyRow::All,
            });
        } else {
            signals.push(DbSignal::PropertyRowChanged {
                model: self.id,
                row: PropertyRow::All,
                count: self.total,
            });
        }
    }

    fn increment(&mut self, key: RowKey, signals: &mut Vec<DbSignal>) {
        let row = PropertyRow::Value(key.value.clone());
        let count = self.rows.entry(key).or_insert(0);
        *count += 1;
        signals.push(if *count == 1 {
            DbSignal::PropertyRowInserted { model: self.id, row }
        } else {
            DbSignal::PropertyRowChanged {
                model: self.id,
                row,
                count: *count,
            }
        });
    }

    fn decrement(&mut self, key: &RowKey, signals: &mut Vec<DbSignal>) {
        let Some(count) = self.rows.get_mut(key) else {
            return;
        };
        *count = count.saturating_sub(1);
        let row = PropertyRow::Value(key.value.clone());
        if *count == 0 {
            signals.push(DbSignal::PropertyPreRowDeletion {
                model: self.id,
                row: row.clone(),
            });
            self.rows.remove(key);
            signals.push(DbSignal::PropertyRowDeleted { model: self.id, row });
        } else {
            signals.push(DbSignal::PropertyRowChanged {
                model: self.id,
                row,
                count: *count,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryChange;
    use soul_core::types::EntryType;

    fn song(index: u32, artist: &str) -> (EntryId, Arc<Entry>) {
        let mut e = Entry::new(EntryType::Song, &format!("file:///{}.mp3", index));
        e.set_initial(PropType::Artist, Value::from(artist)).unwrap();
        (EntryId::new(index, 0), Arc::new(e))
    }

    fn artists() -> PropertyModel {
        PropertyModel::new(PropertyModelId(1), PropType::Artist, ModelId(1))
    }

    fn insert(model: &mut PropertyModel, (id, entry): (EntryId, Arc<Entry>)) -> Vec<DbSignal> {
        model.apply(&ModelDelta::Inserted { id, entry })
    }

    fn check_invariant(model: &PropertyModel) {
        let sum: usize = model.rows.values().sum();
        assert_eq!(sum, model.total());
        assert_eq!(model.all_count().unwrap_or(0), model.total());
    }

    #[test]
    fn counts_and_all_row() {
        let mut model = artists();
        insert(&mut model, song(1, "Björk"));
        insert(&mut model, song(2, "Björk"));
        insert(&mut model, song(3, "Air"));

        assert_eq!(model.count(&Value::from("Björk")), 2);
        assert_eq!(model.all_count(), Some(3));
        let rows: Vec<PropertyRow> = model.rows().map(|(row, _)| row).collect();
        assert_eq!(
            rows,
            vec![
                PropertyRow::All,
                PropertyRow::Value(Value::from("Air")),
                PropertyRow::Value(Value::from("Björk")),
            ]
        );
        check_invariant(&model);
    }

    #[test]
    fn last_removal_emits_pre_deletion_first() {
        let mut model = artists();
        let (id, entry) = song(1, "Air");
        insert(&mut model, (id, Arc::clone(&entry)));

        let signals = model.apply(&ModelDelta::Removed { id, entry });
        let value_row = PropertyRow::Value(Value::from("Air"));
        let pre = signals
            .iter()
            .position(|s| matches!(s, DbSignal::PropertyPreRowDeletion { row, .. } if *row == value_row))
            .unwrap();
        let deleted = signals
            .iter()
            .position(|s| matches!(s, DbSignal::PropertyRowDeleted { row, .. } if *row == value_row))
            .unwrap();
        assert!(pre < deleted);
        assert!(model.is_empty());
        assert_eq!(model.len(), 0);
        assert_eq!(model.rows().count(), 0);
    }

    #[test]
    fn change_moves_count_between_rows() {
        let mut model = artists();
        let (id, _) = song(1, "Air");
        insert(&mut model, song(1, "Air"));
        let (_, renamed) = song(1, "Beck");

        model.apply(&ModelDelta::Changed {
            id,
            entry: renamed,
            changes: vec![EntryChange {
                prop: PropType::Artist,
                old: Value::from("Air"),
                new: Value::from("Beck"),
            }]
            .into(),
        });
        assert_eq!(model.count(&Value::from("Air")), 0);
        assert_eq!(model.count(&Value::from("Beck")), 1);
        assert_eq!(model.all_count(), Some(1));
        check_invariant(&model);
    }

    #[test]
    fn unrelated_change_is_ignored() {
        let mut model = artists();
        let (id, entry) = song(1, "Air");
        insert(&mut model, (id, Arc::clone(&entry)));
        let signals = model.apply(&ModelDelta::Changed {
            id,
            entry,
            changes: vec![EntryChange {
                prop: PropType::PlayCount,
                old: Value::ULong(0),
                new: Value::ULong(1),
            }]
            .into(),
        });
        assert!(signals.is_empty());
    }

    #[test]
    fn year_rows_follow_date_changes() {
        let mut model = PropertyModel::new(PropertyModelId(2), PropType::Year, ModelId(1));
        let mut e = Entry::new(EntryType::Song, "file:///y.mp3");
        e.set_initial(
            PropType::Date,
            Value::ULong(soul_core::types::date_to_day(1999, 1, 1).unwrap()),
        )
        .unwrap();
        let id = EntryId::new(1, 0);
        model.apply(&ModelDelta::Inserted {
            id,
            entry: Arc::new(e.clone()),
        });
        assert_eq!(model.count(&Value::ULong(1999)), 1);

        e.set_initial(
            PropType::Date,
            Value::ULong(soul_core::types::date_to_day(2001, 1, 1).unwrap()),
        )
        .unwrap();
        model.apply(&ModelDelta::Changed {
            id,
            entry: Arc::new(e),
            changes: vec![EntryChange {
                prop: PropType::Date,
                old: Value::ULong(0),
                new: Value::ULong(0),
            }]
            .into(),
        });
        assert_eq!(model.count(&Value::ULong(1999)), 0);
        assert_eq!(model.count(&Value::ULong(2001)), 1);
    }
}
