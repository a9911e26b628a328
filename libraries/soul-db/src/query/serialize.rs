//! Query serialization
//!
//! Queries are stored as a tree of named nodes. Leaves carry the property
//! name and the operand in the value text encoding, so a saved query stays
//! readable and does not depend on the property table order.

use super::{Criterion, Query, QueryNode, QueryOp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use soul_core::types::{PropType, Value};
use soul_core::SoulError;

const CONJUNCTION: &str = "conjunction";
const SUBQUERY: &str = "subquery";
const DISJUNCTION: &str = "disjunction";

/// One node of a serialized query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedNode {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SerializedNode>,
}

impl SerializedNode {
    fn branch(kind: &str, children: Vec<SerializedNode>) -> Self {
        Self {
            kind: kind.to_string(),
            prop: None,
            value: None,
            children,
        }
    }
}

fn op_name(op: QueryOp) -> &'static str {
    match op {
        QueryOp::Equals => "equals",
        QueryOp::NotEqual => "not-equal",
        QueryOp::Like => "like",
        QueryOp::NotLike => "not-like",
        QueryOp::Prefix => "prefix",
        QueryOp::Suffix => "suffix",
        QueryOp::Greater => "greater",
        QueryOp::Less => "less",
        QueryOp::CurrentTimeWithin => "current-time-within",
        QueryOp::CurrentTimeNotWithin => "current-time-not-within",
        QueryOp::YearEquals => "year-equals",
        QueryOp::YearNotEqual => "year-not-equal",
        QueryOp::YearGreater => "year-greater",
        QueryOp::YearLess => "year-less",
    }
}

fn op_from_name(name: &str) -> Option<QueryOp> {
    QueryOp::ALL.into_iter().find(|op| op_name(*op) == name)
}

fn serialize_nodes(nodes: &[QueryNode]) -> Vec<SerializedNode> {
    nodes
        .iter()
        .map(|node| match node {
            QueryNode::Criterion(c) => SerializedNode {
                kind: op_name(c.op).to_string(),
                prop: Some(c.prop.name().to_string()),
                value: Some(c.value.to_text()),
                children: Vec::new(),
            },
            QueryNode::Subquery(q) => SerializedNode::branch(SUBQUERY, serialize_nodes(&q.nodes)),
            QueryNode::Disjunction => SerializedNode::branch(DISJUNCTION, Vec::new()),
        })
        .collect()
}

fn deserialize_nodes(children: &[SerializedNode]) -> Result<Query> {
    let mut query = Query::new();
    for node in children {
        let parsed = match node.kind.as_str() {
            SUBQUERY => QueryNode::Subquery(deserialize_nodes(&node.children)?),
            DISJUNCTION => QueryNode::Disjunction,
            kind => {
                let op = op_from_name(kind).ok_or_else(|| {
                    SoulError::invalid_query(format!("unknown query node {}", kind))
                })?;
                let prop_name = node.prop.as_deref().ok_or_else(|| {
                    SoulError::invalid_query(format!("{} node without a property", kind))
                })?;
                let prop = PropType::from_name(prop_name)?;
                let text = node.value.as_deref().unwrap_or_default();
                let value = Value::from_text(op.operand_kind(prop), text)?;
                QueryNode::Criterion(Criterion::new(op, prop, value)?)
            }
        };
        query.nodes.push(parsed);
    }
    Ok(query)
}

impl Query {
    /// Tree form of the query
    pub fn serialize(&self) -> SerializedNode {
        SerializedNode::branch(CONJUNCTION, serialize_nodes(&self.nodes))
    }

    /// Rebuild a query from its tree form
    ///
    /// # Errors
    /// `InvalidQuery` for unknown node kinds, `UnknownProperty` and
    /// `InvalidValue` for leaves that do not decode
    pub fn deserialize(root: &SerializedNode) -> Result<Query> {
        if root.kind != CONJUNCTION {
            return Err(SoulError::invalid_query(format!(
                "query root must be a conjunction, found {}",
                root.kind
            ))
            .into());
        }
        deserialize_nodes(&root.children)
    }

    /// JSON text of the tree form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.serialize()).map_err(SoulError::from)?)
    }

    /// Parse the JSON produced by [`Query::to_json`]
    pub fn from_json(json: &str) -> Result<Query> {
        let root: SerializedNode = serde_json::from_str(json).map_err(SoulError::from)?;
        Self::deserialize(&root)
    }
}

#[cfg(test)]
mod tests {
    use super::super::Term;
    use super::*;
    use crate::error::DbError;
    use soul_core::types::EntryType;

    fn sample() -> Query {
        let sub = Query::parse([
            Term::prop(QueryOp::Like, PropType::Genre, "rock"),
            Term::Disjunction,
            Term::prop(QueryOp::Greater, PropType::Rating, 4.5),
        ])
        .unwrap();
        Query::parse([
            Term::prop(QueryOp::Equals, PropType::Type, EntryType::Song),
            Term::prop(QueryOp::Equals, PropType::Hidden, false),
            Term::prop(QueryOp::CurrentTimeWithin, PropType::LastPlayed, 86_400u64),
            Term::prop(QueryOp::YearEquals, PropType::Date, 1999u64),
            Term::Subquery(sub),
        ])
        .unwrap()
    }

    #[test]
    fn tree_shape() {
        let tree = sample().serialize();
        assert_eq!(tree.kind, "conjunction");
        assert_eq!(tree.children.len(), 5);
        assert_eq!(tree.children[0].kind, "equals");
        assert_eq!(tree.children[0].prop.as_deref(), Some("type"));
        assert_eq!(tree.children[0].value.as_deref(), Some("song"));
        assert_eq!(tree.children[3].kind, "year-equals");
        assert_eq!(tree.children[4].kind, "subquery");
        assert_eq!(tree.children[4].children[1].kind, "disjunction");
    }

    #[test]
    fn json_round_trip() {
        let query = sample();
        let json = query.to_json().unwrap();
        assert_eq!(Query::from_json(&json).unwrap(), query);
    }

    #[test]
    fn prepared_queries_serialize_their_original_operands() {
        let query = Query::parse([Term::prop(QueryOp::Like, PropType::Title, "CAFÉ")]).unwrap();
        let tree = query.preprocessed().serialize();
        assert_eq!(tree.children[0].value.as_deref(), Some("CAFÉ"));
    }

    #[test]
    fn bad_trees_are_rejected() {
        let unknown_op = SerializedNode {
            kind: "conjunction".into(),
            prop: None,
            value: None,
            children: vec![SerializedNode {
                kind: "roughly".into(),
                prop: Some("title".into()),
                value: Some("x".into()),
                children: Vec::new(),
            }],
        };
        assert!(matches!(
            Query::deserialize(&unknown_op),
            Err(DbError::Core(SoulError::InvalidQuery(_)))
        ));

        let bad_value = r#"{"kind":"conjunction","children":[{"kind":"equals","prop":"play-count","value":"lots"}]}"#;
        assert!(matches!(
            Query::from_json(bad_value),
            Err(DbError::Core(SoulError::InvalidValue { .. }))
        ));

        let bad_prop = r#"{"kind":"conjunction","children":[{"kind":"equals","prop":"colour","value":"red"}]}"#;
        assert!(matches!(
            Query::from_json(bad_prop),
            Err(DbError::Core(SoulError::UnknownProperty(_)))
        ));

        assert!(Query::from_json(r#"{"kind":"subquery"}"#).is_err());
    }
}
