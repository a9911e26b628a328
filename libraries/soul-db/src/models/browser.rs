//! Chained property browsers (genre → artist → album)
//!
//! Each level groups its input model by one property and narrows it by the
//! level's selection; the narrowed model is the next level's input. The
//! [`Database`](crate::Database) rebuilds the levels below a selection
//! change, since that needs the model tables.

use super::{BrowserId, ModelId, PropertyModelId};
use soul_core::types::{PropType, Value};

/// One level of a browser
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserLevel {
    pub prop: PropType,
    /// Model whose rows this level groups
    pub input: ModelId,
    /// Counts of `prop` over `input`
    pub property_model: PropertyModelId,
    /// Selected values; empty selects everything
    pub selection: Vec<Value>,
    /// `input` narrowed to the selection
    pub output: ModelId,
}

/// A chain of property levels over a base model
#[derive(Debug, Clone, PartialEq)]
pub struct Browser {
    id: BrowserId,
    base: ModelId,
    pub(crate) levels: Vec<BrowserLevel>,
}

impl Browser {
    pub(crate) fn new(id: BrowserId, base: ModelId) -> Self {
        Self {
            id,
            base,
            levels: Vec::new(),
        }
    }

    pub fn id(&self) -> BrowserId {
        self.id
    }

    /// Model the first level groups
    pub fn base(&self) -> ModelId {
        self.base
    }

    pub fn levels(&self) -> &[BrowserLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&BrowserLevel> {
        self.levels.get(index)
    }

    /// Model narrowed by every level's selection
    pub fn output(&self) -> ModelId {
        self.levels.last().map_or(self.base, |level| level.output)
    }

    /// Level whose property model is `model`
    pub(crate) fn level_of(&self, model: PropertyModelId) -> Option<usize> {
        self.levels.iter().position(|l| l.property_model == model)
    }

    /// Drop `value` from a level's selection; true if it was selected
    pub(crate) fn deselect(&mut self, level: usize, value: &Value) -> bool {
        let Some(level) = self.levels.get_mut(level) else {
            return false;
        };
        let before = level.selection.len();
        level.selection.retain(|v| v != value);
        level.selection.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn browser() -> Browser {
        let mut b = Browser::new(BrowserId(1), ModelId(1));
        b.levels.push(BrowserLevel {
            prop: PropType::Genre,
            input: ModelId(1),
            property_model: PropertyModelId(1),
            selection: vec![Value::from("Rock"), Value::from("Jazz")],
            output: ModelId(2),
        });
        b.levels.push(BrowserLevel {
            prop: PropType::Artist,
            input: ModelId(2),
            property_model: PropertyModelId(2),
            selection: Vec::new(),
            output: ModelId(3),
        });
        b
    }

    #[test]
    fn output_is_last_level() {
        assert_eq!(browser().output(), ModelId(3));
        assert_eq!(Browser::new(BrowserId(2), ModelId(9)).output(), ModelId(9));
    }

    #[test]
    fn deselect_reports_membership() {
        let mut b = browser();
        assert_eq!(b.level_of(PropertyModelId(2)), Some(1));
        assert!(b.deselect(0, &Value::from("Rock")));
        assert!(!b.deselect(0, &Value::from("Rock")));
        assert_eq!(b.levels()[0].selection, vec![Value::from("Jazz")]);
    }
}
