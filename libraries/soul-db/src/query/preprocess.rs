//! Query preparation
//!
//! Folding the operands once per query (instead of once per entry) and
//! turning year criteria into day-number ranges lets the evaluator compare
//! against the stored folded mirrors directly.

use super::{Criterion, Prepared, Query, QueryNode, QueryOp};
use soul_core::text;
use soul_core::types::{year_bounds, PropType, Value};

impl Query {
    /// Prepare the query for evaluation, recursively
    ///
    /// Evaluating an unprepared query gives the same answers, only slower.
    pub fn preprocess(&mut self) {
        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = nodes
            .into_iter()
            .map(|node| match node {
                QueryNode::Criterion(c) => prepare(c),
                QueryNode::Subquery(mut q) => {
                    q.preprocess();
                    QueryNode::Subquery(q)
                }
                QueryNode::Disjunction => QueryNode::Disjunction,
            })
            .collect();
        self.preprocessed = true;
    }

    /// Prepared copy of the query
    pub fn preprocessed(&self) -> Query {
        let mut copy = self.clone();
        copy.preprocess();
        copy
    }
}

fn prepare(mut c: Criterion) -> QueryNode {
    let operand = c.value.as_str().unwrap_or_default();
    match c.op {
        QueryOp::Like | QueryOp::NotLike if c.prop == PropType::SearchMatch => {
            c.prepared = Some(Prepared::Words(text::search_words(operand)));
        }
        QueryOp::Like | QueryOp::NotLike | QueryOp::Prefix | QueryOp::Suffix => {
            c.prepared = Some(Prepared::Folded(text::fold(operand)));
        }
        QueryOp::Equals | QueryOp::NotEqual if c.prop.is_folded() => {
            c.prepared = Some(Prepared::Folded(text::fold(operand)));
        }
        QueryOp::YearEquals
        | QueryOp::YearNotEqual
        | QueryOp::YearGreater
        | QueryOp::YearLess
            if c.prop == PropType::Date =>
        {
            if let Some(node) = rewrite_year(&c) {
                return node;
            }
        }
        _ => {}
    }
    QueryNode::Criterion(c)
}

fn day(op: QueryOp, day: u64) -> QueryNode {
    QueryNode::Criterion(Criterion {
        op,
        prop: PropType::Date,
        value: Value::ULong(day),
        prepared: None,
    })
}

/// Year criteria over `Date` become inclusive day ranges
fn rewrite_year(c: &Criterion) -> Option<QueryNode> {
    let (begin, end) = year_bounds(c.value.as_u64()?)?;
    let node = match c.op {
        QueryOp::YearEquals => QueryNode::Subquery(Query {
            nodes: vec![day(QueryOp::Greater, begin), day(QueryOp::Less, end)],
            preprocessed: true,
        }),
        QueryOp::YearNotEqual => QueryNode::Subquery(Query {
            nodes: vec![
                day(QueryOp::Less, begin.saturating_sub(1)),
                QueryNode::Disjunction,
                day(QueryOp::Greater, end + 1),
            ],
            preprocessed: true,
        }),
        QueryOp::YearGreater => day(QueryOp::Greater, begin),
        QueryOp::YearLess => day(QueryOp::Less, end),
        _ => return None,
    };
    Some(node)
}
