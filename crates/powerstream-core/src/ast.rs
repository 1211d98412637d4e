//! Abstract syntax tree for parsed event queries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-node identifier, assigned in parse order across both node kinds.
///
/// Only stable within one parse; used as a diagnostic key and as the alias
/// of the node's join in the relational filter.
pub type NodeId = u32;

// ─── Operators ────────────────────────────────────────────────────────────────

/// Comparison operator of an expression node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = "not exists")]
    NotExists,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "includes")]
    Includes,
    #[serde(rename = "not includes")]
    NotIncludes,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "not like")]
    NotLike,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not in")]
    NotIn,
}

impl Operator {
    /// Surface syntax of the operator, as written in a query.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Exists => "exists",
            Self::NotExists => "not exists",
            Self::Eq => "=",
            Self::Neq => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Lte => "<=",
            Self::Gte => ">=",
            Self::Includes => "includes",
            Self::NotIncludes => "not includes",
            Self::Like => "like",
            Self::NotLike => "not like",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }

    /// Short alias used in relation names (`eq`, `lte`, ...).
    pub fn alias(&self) -> &'static str {
        match self {
            Self::Exists | Self::NotExists => "exists",
            Self::Eq => "eq",
            Self::Neq => "neq",
            Self::Lt => "lt",
            Self::Gt => "gt",
            Self::Lte => "lte",
            Self::Gte => "gte",
            Self::Includes | Self::NotIncludes => "includes",
            Self::Like | Self::NotLike => "like",
            Self::In | Self::NotIn => "in",
        }
    }

    pub fn is_unary(&self) -> bool {
        matches!(self, Self::Exists | Self::NotExists)
    }

    /// Operators that require a quantity literal (`<`, `>`, `<=`, `>=`).
    pub fn is_inequality(&self) -> bool {
        matches!(self, Self::Lt | Self::Gt | Self::Lte | Self::Gte)
    }

    /// `in` / `not in`: the only operators that accept a literal set.
    pub fn takes_set(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// The `not exists` / `not ...` forms.
    ///
    /// `!=` is not a negation: it asks whether *some* value differs.
    pub fn is_negated(&self) -> bool {
        matches!(
            self,
            Self::NotExists | Self::NotIncludes | Self::NotLike | Self::NotIn
        )
    }

    /// The positive counterpart of a negated operator (identity otherwise).
    pub fn positive(&self) -> Operator {
        match self {
            Self::NotExists => Self::Exists,
            Self::NotIncludes => Self::Includes,
            Self::NotLike => Self::Like,
            Self::NotIn => Self::In,
            other => *other,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ─── Literal values ───────────────────────────────────────────────────────────

/// Right-hand side of an expression node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    /// A single string or quantity literal (quantities keep their source text).
    Scalar(String),
    /// A deduplicated literal set, in first-seen order (`in` / `not in` only).
    Set(Vec<String>),
}

impl Literal {
    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => Some(s),
            Self::Set(_) => None,
        }
    }

    pub fn as_set(&self) -> Option<&[String]> {
        match self {
            Self::Set(values) => Some(values),
            Self::Scalar(_) => None,
        }
    }
}

// ─── Nodes ────────────────────────────────────────────────────────────────────

/// A leaf test against one attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expr {
    pub id: NodeId,
    pub key: String,
    pub op: Operator,
    /// `None` for unary operators.
    pub value: Option<Literal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    And,
    Or,
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => f.write_str("AND"),
            Self::Or => f.write_str("OR"),
        }
    }
}

/// A binary AND/OR over two subtrees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub id: NodeId,
    pub kind: ConditionKind,
    pub lhs: Box<AstNode>,
    pub rhs: Box<AstNode>,
}

/// A parsed query: a strictly binary tree of conditions over expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstNode {
    Expr(Expr),
    Condition(Condition),
}

impl AstNode {
    pub fn id(&self) -> NodeId {
        match self {
            Self::Expr(e) => e.id,
            Self::Condition(c) => c.id,
        }
    }

    /// Every expression leaf, left to right.
    pub fn exprs(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                Self::Expr(e) => out.push(e),
                Self::Condition(c) => {
                    stack.push(&c.rhs);
                    stack.push(&c.lhs);
                }
            }
        }
        out
    }
}

impl fmt::Display for AstNode {
    /// Fully parenthesized rendering, mostly for diagnostics and tests.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr(e) => {
                write!(f, "{}", e.key)?;
                match (&e.value, e.op.is_unary()) {
                    (_, true) | (None, _) => write!(f, " {}", e.op),
                    (Some(Literal::Scalar(v)), false) => write!(f, " {} {:?}", e.op, v),
                    (Some(Literal::Set(vs)), false) => write!(f, " {} {:?}", e.op, vs),
                }
            }
            Self::Condition(c) => write!(f, "({} {} {})", c.lhs, c.kind, c.rhs),
        }
    }
}
