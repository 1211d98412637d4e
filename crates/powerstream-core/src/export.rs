//! Canonical export: the AST as plain data, without node ids.

use serde::{Deserialize, Serialize};

use crate::ast::{AstNode, ConditionKind, Literal, Operator};

/// Client-facing shape of a parsed query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExportNode {
    And {
        lhs: Box<ExportNode>,
        rhs: Box<ExportNode>,
    },
    Or {
        lhs: Box<ExportNode>,
        rhs: Box<ExportNode>,
    },
    Expr {
        key: String,
        op: Operator,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Literal>,
    },
}

impl From<&AstNode> for ExportNode {
    fn from(node: &AstNode) -> Self {
        match node {
            AstNode::Expr(e) => Self::Expr {
                key: e.key.clone(),
                op: e.op,
                value: e.value.clone(),
            },
            AstNode::Condition(c) => {
                let lhs = Box::new(Self::from(c.lhs.as_ref()));
                let rhs = Box::new(Self::from(c.rhs.as_ref()));
                match c.kind {
                    ConditionKind::And => Self::And { lhs, rhs },
                    ConditionKind::Or => Self::Or { lhs, rhs },
                }
            }
        }
    }
}

/// Export `ast` as a JSON value.
pub fn export(ast: &AstNode) -> serde_json::Value {
    // ExportNode has only string keys and plain data; serialization cannot fail.
    serde_json::to_value(ExportNode::from(ast)).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parser::parse;

    #[test]
    fn strips_ids_and_keeps_structure() {
        let ast = parse("a exists OR b in ('x', 'y') AND c >= 5uscrt").unwrap();
        assert_eq!(
            export(&ast),
            json!({
                "type": "or",
                "lhs": { "type": "expr", "key": "a", "op": "exists" },
                "rhs": {
                    "type": "and",
                    "lhs": { "type": "expr", "key": "b", "op": "in", "value": ["x", "y"] },
                    "rhs": { "type": "expr", "key": "c", "op": ">=", "value": "5uscrt" },
                },
            })
        );
    }

    #[test]
    fn export_round_trips_through_serde() {
        let ast = parse("k not like 'a%'").unwrap();
        let node: ExportNode = serde_json::from_value(export(&ast)).unwrap();
        assert_eq!(node, ExportNode::from(&ast));
    }
}
