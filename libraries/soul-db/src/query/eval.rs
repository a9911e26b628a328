//! Query evaluation against a single entry

use super::{Criterion, Prepared, Query, QueryNode, QueryOp};
use crate::entry::Entry;
use soul_core::text;
use soul_core::types::{date_to_year, PropType, SEARCH_FIELDS};
use std::borrow::Cow;
use std::cmp::Ordering;

/// Current time in seconds since the Unix epoch
pub(crate) fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

impl Query {
    /// Whether `entry` matches, using the current time for relative criteria
    pub fn evaluate(&self, entry: &Entry) -> bool {
        self.evaluate_at(entry, now_secs())
    }

    /// Whether `entry` matches, with `now` as the reference time
    ///
    /// The empty query matches everything. Otherwise the query matches when
    /// any non-empty AND-group between disjunction markers matches.
    pub fn evaluate_at(&self, entry: &Entry, now: u64) -> bool {
        if self.nodes.is_empty() {
            return true;
        }
        self.nodes
            .split(|node| matches!(node, QueryNode::Disjunction))
            .any(|group| {
                !group.is_empty() && group.iter().all(|node| evaluate_node(node, entry, now))
            })
    }
}

fn evaluate_node(node: &QueryNode, entry: &Entry, now: u64) -> bool {
    match node {
        QueryNode::Criterion(c) => evaluate_criterion(c, entry, now),
        QueryNode::Subquery(q) => q.evaluate_at(entry, now),
        QueryNode::Disjunction => false,
    }
}

fn evaluate_criterion(c: &Criterion, entry: &Entry, now: u64) -> bool {
    match c.op {
        QueryOp::Equals => equals(c, entry),
        QueryOp::NotEqual => !equals(c, entry),
        QueryOp::Like => like(c, entry),
        QueryOp::NotLike => !like(c, entry),
        QueryOp::Prefix => folded_property(entry, c.prop).starts_with(&*needle(c)),
        QueryOp::Suffix => folded_property(entry, c.prop).ends_with(&*needle(c)),
        QueryOp::Greater => entry.get(c.prop).cmp(&c.value) != Ordering::Less,
        QueryOp::Less => entry.get(c.prop).cmp(&c.value) != Ordering::Greater,
        QueryOp::CurrentTimeWithin => entry.u64_value(c.prop) >= now.saturating_sub(operand(c)),
        QueryOp::CurrentTimeNotWithin => entry.u64_value(c.prop) < now.saturating_sub(operand(c)),
        QueryOp::YearEquals => year_of(c, entry) == operand(c),
        QueryOp::YearNotEqual => year_of(c, entry) != operand(c),
        QueryOp::YearGreater => year_of(c, entry) >= operand(c),
        QueryOp::YearLess => year_of(c, entry) <= operand(c),
    }
}

fn operand(c: &Criterion) -> u64 {
    c.value.as_u64().unwrap_or(0)
}

fn year_of(c: &Criterion, entry: &Entry) -> u64 {
    date_to_year(entry.u64_value(c.prop))
}

fn equals(c: &Criterion, entry: &Entry) -> bool {
    if c.prop.is_folded() || matches!(c.prepared, Some(Prepared::Folded(_))) {
        return folded_property(entry, c.prop) == needle(c);
    }
    entry.get(c.prop) == c.value
}

fn like(c: &Criterion, entry: &Entry) -> bool {
    if c.prop == PropType::SearchMatch {
        let words: Cow<'_, [String]> = match &c.prepared {
            Some(Prepared::Words(words)) => Cow::Borrowed(words.as_slice()),
            _ => Cow::Owned(text::search_words(c.value.as_str().unwrap_or_default())),
        };
        return words.iter().all(|word| {
            SEARCH_FIELDS
                .iter()
                .any(|field| entry.str_value(*field).contains(word.as_str()))
        });
    }
    folded_property(entry, c.prop).contains(&*needle(c))
}

/// Folded operand of a text criterion
fn needle(c: &Criterion) -> Cow<'_, str> {
    match &c.prepared {
        Some(Prepared::Folded(folded)) => Cow::Borrowed(folded.as_str()),
        _ => Cow::Owned(text::fold(c.value.as_str().unwrap_or_default())),
    }
}

/// Folded value of a string property, using the stored mirror when there is one
fn folded_property(entry: &Entry, prop: PropType) -> Cow<'_, str> {
    if prop.is_folded() {
        return Cow::Borrowed(entry.str_value(prop));
    }
    match prop.folded_mirror() {
        Some(mirror) => Cow::Borrowed(entry.str_value(mirror)),
        None => Cow::Owned(text::fold(entry.str_value(prop))),
    }
}
