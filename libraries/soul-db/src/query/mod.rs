//! Boolean queries over entry properties
//!
//! A [`Query`] is a flat list of nodes: criteria, nested subqueries and
//! disjunction markers. Adjacent terms are ANDed; a disjunction marker closes
//! the current AND-group and opens the next, so `[A, B, |, C]` reads as
//! `(A && B) || C`. Subqueries are evaluated on their own and combine like a
//! single term.
//!
//! Queries are plain values: `Clone` gives an independent deep copy that can
//! be moved to a worker thread.

mod eval;
mod preprocess;
mod serialize;

pub use serialize::SerializedNode;

pub(crate) use eval::now_secs;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use soul_core::types::{PropKind, PropType, Value};
use soul_core::SoulError;
use std::fmt;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryOp {
    /// Exact typed match
    Equals,
    /// Negated exact match
    NotEqual,
    /// Folded substring match; word containment on `SearchMatch`
    Like,
    /// Negated `Like`
    NotLike,
    /// Folded prefix match
    Prefix,
    /// Folded suffix match
    Suffix,
    /// Value is greater than or equal to the operand
    Greater,
    /// Value is less than or equal to the operand
    Less,
    /// Timestamp lies within the last N seconds
    CurrentTimeWithin,
    /// Timestamp is older than N seconds
    CurrentTimeNotWithin,
    /// Year of a day-number property equals the operand
    YearEquals,
    /// Year of a day-number property differs from the operand
    YearNotEqual,
    /// Year of a day-number property is at least the operand
    YearGreater,
    /// Year of a day-number property is at most the operand
    YearLess,
}

impl QueryOp {
    /// Every operator
    pub const ALL: [QueryOp; 14] = [
        QueryOp::Equals,
        QueryOp::NotEqual,
        QueryOp::Like,
        QueryOp::NotLike,
        QueryOp::Prefix,
        QueryOp::Suffix,
        QueryOp::Greater,
        QueryOp::Less,
        QueryOp::CurrentTimeWithin,
        QueryOp::CurrentTimeNotWithin,
        QueryOp::YearEquals,
        QueryOp::YearNotEqual,
        QueryOp::YearGreater,
        QueryOp::YearLess,
    ];

    /// Kind of operand this operator takes on `prop`
    pub fn operand_kind(self, prop: PropType) -> PropKind {
        match self {
            Self::CurrentTimeWithin
            | Self::CurrentTimeNotWithin
            | Self::YearEquals
            | Self::YearNotEqual
            | Self::YearGreater
            | Self::YearLess => PropKind::ULong,
            _ => prop.kind(),
        }
    }

    fn is_text(self) -> bool {
        matches!(self, Self::Like | Self::NotLike | Self::Prefix | Self::Suffix)
    }

    fn is_year(self) -> bool {
        matches!(
            self,
            Self::YearEquals | Self::YearNotEqual | Self::YearGreater | Self::YearLess
        )
    }

    fn is_relative_time(self) -> bool {
        matches!(self, Self::CurrentTimeWithin | Self::CurrentTimeNotWithin)
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Equals => "==",
            Self::NotEqual => "!=",
            Self::Like => "=~",
            Self::NotLike => "!~",
            Self::Prefix => "|<",
            Self::Suffix => ">|",
            Self::Greater => ">",
            Self::Less => "<",
            Self::CurrentTimeWithin => "<>",
            Self::CurrentTimeNotWithin => "><",
            Self::YearEquals => "y==",
            Self::YearNotEqual => "y!=",
            Self::YearGreater => "y>",
            Self::YearLess => "y<",
        }
    }
}

/// Operand prepared by [`Query::preprocess`]
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Prepared {
    /// Folded text
    Folded(String),
    /// Folded search words
    Words(Vec<String>),
}

/// A single comparison
#[derive(Debug, Clone, PartialEq)]
pub struct Criterion {
    pub op: QueryOp,
    pub prop: PropType,
    pub value: Value,
    pub(crate) prepared: Option<Prepared>,
}

impl Criterion {
    /// Build a criterion, checking the operand against the property
    pub fn new(op: QueryOp, prop: PropType, value: impl Into<Value>) -> Result<Self> {
        let value = value.into();
        let expected = op.operand_kind(prop);
        if value.kind() != expected {
            return Err(SoulError::TypeMismatch {
                property: prop.name(),
                expected,
                found: value.kind(),
            }
            .into());
        }
        if op.is_text() && prop.kind() != PropKind::String {
            return Err(SoulError::invalid_query(format!(
                "{:?} needs a string property, {} is {}",
                op,
                prop,
                prop.kind()
            ))
            .into());
        }
        if op.is_relative_time() && prop.kind() != PropKind::Timestamp {
            return Err(SoulError::invalid_query(format!(
                "{:?} needs a timestamp property, {} is {}",
                op,
                prop,
                prop.kind()
            ))
            .into());
        }
        if op.is_year() && prop.kind() != PropKind::ULong {
            return Err(SoulError::invalid_query(format!(
                "{:?} needs a day-number property, {} is {}",
                op,
                prop,
                prop.kind()
            ))
            .into());
        }
        if prop == PropType::SearchMatch && !matches!(op, QueryOp::Like | QueryOp::NotLike) {
            return Err(
                SoulError::invalid_query("search-match only supports like/not-like").into(),
            );
        }
        Ok(Self {
            op,
            prop,
            value,
            prepared: None,
        })
    }
}

/// One node of a query
#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    /// Comparison against a property
    Criterion(Criterion),
    /// Nested query combined like a single term
    Subquery(Query),
    /// Closes the current AND-group
    Disjunction,
}

/// Input element for [`Query::parse`]
#[derive(Debug, Clone)]
pub enum Term {
    /// `(operator, property, operand)`
    Prop(QueryOp, PropType, Value),
    /// Nested query
    Subquery(Query),
    /// OR marker
    Disjunction,
    /// Stops parsing; anything after it is ignored
    End,
}

impl Term {
    /// Shorthand for `Term::Prop`
    pub fn prop(op: QueryOp, prop: PropType, value: impl Into<Value>) -> Self {
        Self::Prop(op, prop, value.into())
    }
}

/// A boolean query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    nodes: Vec<QueryNode>,
    preprocessed: bool,
}

impl Query {
    /// The empty query, which matches every entry
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a query from terms, stopping at `Term::End`
    pub fn parse(terms: impl IntoIterator<Item = Term>) -> Result<Self> {
        let mut query = Self::new();
        for term in terms {
            if matches!(term, Term::End) {
                break;
            }
            query.append(term)?;
        }
        Ok(query)
    }

    /// Append one term
    pub fn append(&mut self, term: Term) -> Result<()> {
        let node = match term {
            Term::Prop(op, prop, value) => QueryNode::Criterion(Criterion::new(op, prop, value)?),
            Term::Subquery(query) => QueryNode::Subquery(query),
            Term::Disjunction => QueryNode::Disjunction,
            Term::End => return Ok(()),
        };
        self.nodes.push(node);
        self.preprocessed = false;
        Ok(())
    }

    /// Append a match on any of `values`
    ///
    /// One value becomes a plain `Equals`; several become an OR-subquery of
    /// `Equals` terms. No values appends nothing, but `prop` must still
    /// accept `Equals`.
    pub fn append_prop_multiple(&mut self, prop: PropType, values: &[Value]) -> Result<()> {
        match values {
            [] => Criterion::new(QueryOp::Equals, prop, Value::default_for(prop.kind())).map(drop),
            [single] => self.append(Term::Prop(QueryOp::Equals, prop, single.clone())),
            many => {
                let mut sub = Query::new();
                for (i, value) in many.iter().enumerate() {
                    if i > 0 {
                        sub.append(Term::Disjunction)?;
                    }
                    sub.append(Term::Prop(QueryOp::Equals, prop, value.clone()))?;
                }
                self.append(Term::Subquery(sub))
            }
        }
    }

    /// Append all nodes of `other`
    pub fn concatenate(&mut self, other: &Query) {
        self.nodes.extend(other.nodes.iter().cloned());
        self.preprocessed = false;
    }

    /// Nodes in order
    pub fn nodes(&self) -> &[QueryNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether [`Query::preprocess`] has been applied
    pub fn is_preprocessed(&self) -> bool {
        self.preprocessed
    }

    /// Whether results depend on the current time
    pub fn is_time_relative(&self) -> bool {
        self.nodes.iter().any(|node| match node {
            QueryNode::Criterion(c) => c.op.is_relative_time(),
            QueryNode::Subquery(q) => q.is_time_relative(),
            QueryNode::Disjunction => false,
        })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, node) in self.nodes.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match node {
                QueryNode::Criterion(c) => write!(f, "{} {} {}", c.prop, c.op.symbol(), c.value)?,
                QueryNode::Subquery(q) => write!(f, "({})", q)?,
                QueryNode::Disjunction => f.write_str("||")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;

    #[test]
    fn parse_stops_at_end_marker() {
        let query = Query::parse([
            Term::prop(QueryOp::Equals, PropType::Genre, "Rock"),
            Term::End,
            Term::prop(QueryOp::Equals, PropType::Genre, "Jazz"),
        ])
        .unwrap();
        assert_eq!(query.nodes().len(), 1);
    }

    #[test]
    fn parse_checks_operand_kinds() {
        let err = Query::parse([Term::prop(QueryOp::Equals, PropType::PlayCount, "three")])
            .unwrap_err();
        assert!(matches!(err, DbError::Core(SoulError::TypeMismatch { .. })));

        let err = Query::parse([Term::prop(QueryOp::Like, PropType::PlayCount, 3u64)])
            .unwrap_err();
        assert!(matches!(err, DbError::Core(SoulError::InvalidQuery(_))));

        assert!(Query::parse([Term::prop(
            QueryOp::CurrentTimeWithin,
            PropType::LastPlayed,
            3600u64
        )])
        .is_ok());
        assert!(Query::parse([Term::prop(QueryOp::YearEquals, PropType::Date, 1999u64)]).is_ok());
        assert!(Query::parse([Term::prop(QueryOp::YearEquals, PropType::Title, 1999u64)]).is_err());
    }

    #[test]
    fn append_prop_multiple_shapes() {
        let mut single = Query::new();
        single
            .append_prop_multiple(PropType::Artist, &[Value::from("A")])
            .unwrap();
        assert!(matches!(single.nodes(), [QueryNode::Criterion(_)]));

        let mut many = Query::new();
        many.append_prop_multiple(PropType::Artist, &[Value::from("A"), Value::from("B")])
            .unwrap();
        let [QueryNode::Subquery(sub)] = many.nodes() else {
            panic!("expected a subquery");
        };
        assert_eq!(sub.nodes().len(), 3);
        assert_eq!(sub.nodes()[1], QueryNode::Disjunction);

        let mut none = Query::new();
        none.append_prop_multiple(PropType::Artist, &[]).unwrap();
        assert!(none.is_empty());
        assert!(none.append_prop_multiple(PropType::SearchMatch, &[]).is_err());
    }

    #[test]
    fn concatenate_and_display() {
        let mut a = Query::parse([Term::prop(QueryOp::Like, PropType::Title, "foo")]).unwrap();
        let b = Query::parse([
            Term::Disjunction,
            Term::prop(QueryOp::Greater, PropType::Rating, 3.0),
        ])
        .unwrap();
        a.concatenate(&b);
        assert_eq!(a.to_string(), "title =~ \"foo\" || rating > 3");
    }

    #[test]
    fn time_relative_detection_recurses() {
        let inner = Query::parse([Term::prop(
            QueryOp::CurrentTimeNotWithin,
            PropType::LastPlayed,
            60u64,
        )])
        .unwrap();
        let outer = Query::parse([
            Term::prop(QueryOp::Equals, PropType::Hidden, false),
            Term::Subquery(inner),
        ])
        .unwrap();
        assert!(outer.is_time_relative());
        assert!(!Query::new().is_time_relative());
    }

    #[test]
    fn copies_are_independent() {
        let original = Query::parse([Term::prop(QueryOp::Equals, PropType::Genre, "Rock")]).unwrap();
        let mut copy = original.clone();
        copy.append(Term::prop(QueryOp::Equals, PropType::Artist, "X"))
            .unwrap();
        assert_eq!(original.nodes().len(), 1);
        assert_eq!(copy.nodes().len(), 2);
    }
}
