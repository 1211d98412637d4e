//! Relational backend: compiles an AST into a SQL filter over the archive.
//!
//! Every expression node becomes one join against a parameterized
//! `filter_event_*` relation aliased `x{id}`; the `where` clause combines
//! "this alias matched" terms with the AST's AND/OR structure.
//!
//! ```text
//! select distinct t.id from transactions t
//! inner join filter_event_text_eq($1,$2) x1 on x1.tx_id = t.id
//! inner join filter_event_quantity_gt($3,CAST($4 AS DECIMAL),$5) x3 on x3.tx_id = t.id
//! where (x1.tx_id IS NOT NULL AND x3.tx_id IS NOT NULL) order by t.id asc
//! ```

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::ast::{AstNode, ConditionKind, Expr, Literal, Operator};
use crate::error::CompileError;
use crate::quantity::Quantity;

/// Longest equality literal compared as raw text; longer ones go by digest.
pub const DEFAULT_MAX_VALUE_TEXT: usize = 8191;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationalOptions {
    pub max_value_text: usize,
}

impl Default for RelationalOptions {
    fn default() -> Self {
        Self {
            max_value_text: DEFAULT_MAX_VALUE_TEXT,
        }
    }
}

/// A positional bind parameter (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(Option<String>),
    TextArray(Vec<String>),
}

/// SQL text plus its bind parameters in first-use order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationalFilter {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Inner => "inner",
            Self::Left => "left",
        }
    }
}

struct Compiler {
    options: RelationalOptions,
    joins: Vec<String>,
    params: Vec<SqlParam>,
}

impl Compiler {
    fn param(&mut self, value: SqlParam) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn text(&mut self, value: impl Into<String>) -> String {
        self.param(SqlParam::Text(Some(value.into())))
    }

    /// `and_chain` is true while every ancestor so far is an AND condition.
    fn node(&mut self, node: &AstNode, and_chain: bool) -> Result<String, CompileError> {
        match node {
            AstNode::Condition(cond) => {
                let chain = and_chain && cond.kind == ConditionKind::And;
                let lhs = self.node(&cond.lhs, chain)?;
                let rhs = self.node(&cond.rhs, chain)?;
                Ok(format!("({lhs} {} {rhs})", cond.kind))
            }
            AstNode::Expr(expr) => self.expr(expr, and_chain),
        }
    }

    fn expr(&mut self, expr: &Expr, and_chain: bool) -> Result<String, CompileError> {
        let negated = expr.op.is_negated();
        let relation = self.relation(expr)?;

        let kind = if and_chain && !negated {
            JoinKind::Inner
        } else {
            JoinKind::Left
        };
        let alias = format!("x{}", expr.id);
        self.joins.push(format!(
            "{} join {relation} {alias} on {alias}.tx_id = t.id",
            kind.as_sql()
        ));

        Ok(if negated {
            format!("{alias}.tx_id IS NULL")
        } else {
            format!("{alias}.tx_id IS NOT NULL")
        })
    }

    /// The relation call for the positive form of `expr`'s operator.
    fn relation(&mut self, expr: &Expr) -> Result<String, CompileError> {
        let op = expr.op.positive();
        let mismatch = || CompileError::LiteralMismatch { op: op.to_string() };
        let scalar = expr.value.as_ref().and_then(Literal::as_scalar);

        let key = self.text(expr.key.as_str());
        Ok(match op {
            Operator::Exists => format!("filter_event_path_exists({key})"),
            Operator::Eq | Operator::Neq => {
                let literal = scalar.ok_or_else(mismatch)?;
                let (family, arg) = if literal.len() > self.options.max_value_text {
                    ("hash", value_digest(literal))
                } else {
                    ("text", literal.to_string())
                };
                let arg = self.text(arg);
                format!("filter_event_{family}_{}({key},{arg})", op.alias())
            }
            Operator::Lt | Operator::Gt | Operator::Lte | Operator::Gte => {
                let literal = scalar.ok_or_else(mismatch)?;
                let quantity =
                    Quantity::parse(literal).ok_or_else(|| CompileError::NotAQuantity {
                        op: op.to_string(),
                        value: literal.to_string(),
                    })?;
                let amount = self.text(quantity.amount.to_string());
                let unit = self.param(SqlParam::Text(quantity.unit));
                format!(
                    "filter_event_quantity_{}({key},CAST({amount} AS DECIMAL),{unit})",
                    op.alias()
                )
            }
            // substring and pattern tests read the full stored value, so
            // these literals are never replaced by a digest
            Operator::Includes => {
                let arg = self.text(scalar.ok_or_else(mismatch)?);
                format!("filter_event_text_includes({key},{arg})")
            }
            Operator::Like => {
                // backslash is a plain character in query patterns but the
                // default escape character of SQL LIKE
                let pattern = scalar.ok_or_else(mismatch)?.replace('\\', "\\\\");
                let arg = self.text(pattern);
                format!("filter_event_text_like({key},{arg})")
            }
            Operator::In => {
                let set = expr
                    .value
                    .as_ref()
                    .and_then(Literal::as_set)
                    .ok_or_else(mismatch)?;
                let (texts, hashes): (Vec<&String>, Vec<&String>) = set
                    .iter()
                    .partition(|v| v.len() <= self.options.max_value_text);
                let texts = texts.into_iter().cloned().collect();
                let hashes = hashes.into_iter().map(|v| value_digest(v)).collect();
                let texts = self.param(SqlParam::TextArray(texts));
                let hashes = self.param(SqlParam::TextArray(hashes));
                format!("filter_event_text_in({key},{texts},{hashes})")
            }
            Operator::NotExists | Operator::NotIncludes | Operator::NotLike | Operator::NotIn => {
                return Err(mismatch())
            }
        })
    }
}

/// Lowercase hex SHA-256 of a literal, as stored in the archive's hash column.
pub fn value_digest(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}

/// Compile `ast` into a relational filter.
pub fn compile(ast: &AstNode, options: RelationalOptions) -> Result<RelationalFilter, CompileError> {
    let mut compiler = Compiler {
        options,
        joins: Vec::new(),
        params: Vec::new(),
    };
    let body = compiler.node(ast, true)?;

    let mut sql = String::from("select distinct t.id from transactions t\n");
    for join in &compiler.joins {
        sql.push_str(join);
        sql.push('\n');
    }
    sql.push_str(&format!("where {body} order by t.id asc"));

    Ok(RelationalFilter {
        sql,
        params: compiler.params,
    })
}
