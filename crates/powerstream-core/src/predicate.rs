//! Predicate backend: compiles an AST into an in-memory boolean evaluator.
//!
//! Each node becomes a boxed closure; conditions compose their children.
//! Quantity extraction is memoized per `(path, unit)` inside one
//! [`EvalScope`], which lives for exactly one evaluation call.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use regex::Regex;

use crate::ast::{AstNode, ConditionKind, Expr, Literal, Operator};
use crate::error::CompileError;
use crate::event::AttributeMap;
use crate::quantity::{Amount, Quantity};

type Eval = Box<dyn Fn(&EvalScope<'_>) -> bool + Send + Sync>;

// ─── Attribute paths ──────────────────────────────────────────────────────────

/// A compiled attribute path. `*` matches any run of characters within one
/// dot-separated segment.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Exact(String),
    Wildcard { source: String, pattern: Regex },
}

impl KeyPattern {
    pub fn compile(key: &str) -> Result<Self, CompileError> {
        if !key.contains('*') {
            return Ok(Self::Exact(key.to_string()));
        }
        let body = key
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[^.]*");
        let pattern =
            Regex::new(&format!("^{body}$")).map_err(|e| CompileError::Pattern(e.to_string()))?;
        Ok(Self::Wildcard {
            source: key.to_string(),
            pattern,
        })
    }

    pub fn source(&self) -> &str {
        match self {
            Self::Exact(key) => key,
            Self::Wildcard { source, .. } => source,
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Wildcard { pattern, .. } => pattern.is_match(key),
        }
    }
}

// ─── Evaluation scope ─────────────────────────────────────────────────────────

/// State for a single evaluation of a predicate against one attribute map.
pub struct EvalScope<'a> {
    attributes: &'a AttributeMap,
    quantities: RefCell<HashMap<(String, Option<String>), Rc<[Amount]>>>,
}

impl<'a> EvalScope<'a> {
    pub fn new(attributes: &'a AttributeMap) -> Self {
        Self {
            attributes,
            quantities: RefCell::new(HashMap::new()),
        }
    }

    /// Returns `true` if `f` holds for at least one value under `key`.
    fn any_value(&self, key: &KeyPattern, mut f: impl FnMut(&str) -> bool) -> bool {
        match key {
            KeyPattern::Exact(k) => self
                .attributes
                .get(k)
                .is_some_and(|values| values.iter().any(|v| f(v))),
            KeyPattern::Wildcard { pattern, .. } => self
                .attributes
                .iter()
                .filter(|(k, _)| pattern.is_match(k))
                .any(|(_, values)| values.iter().any(|v| f(v))),
        }
    }

    /// All values under `key` that parse as quantities with exactly `unit`.
    fn quantities(&self, key: &KeyPattern, unit: Option<&str>) -> Rc<[Amount]> {
        let cache_key = (key.source().to_string(), unit.map(str::to_string));
        if let Some(hit) = self.quantities.borrow().get(&cache_key) {
            return Rc::clone(hit);
        }

        let mut amounts = Vec::new();
        self.any_value(key, |value| {
            if let Some(q) = Quantity::parse(value) {
                if q.unit() == unit {
                    amounts.push(q.amount);
                }
            }
            false
        });

        let amounts: Rc<[Amount]> = amounts.into();
        self.quantities
            .borrow_mut()
            .insert(cache_key, Rc::clone(&amounts));
        amounts
    }

    /// Number of memoized `(path, unit)` quantity lists.
    pub fn memoized(&self) -> usize {
        self.quantities.borrow().len()
    }
}

// ─── Predicate ────────────────────────────────────────────────────────────────

/// A compiled query, ready to be evaluated against attribute maps.
pub struct Predicate {
    eval: Eval,
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate").finish_non_exhaustive()
    }
}

impl Predicate {
    pub fn compile(ast: &AstNode) -> Result<Self, CompileError> {
        Ok(Self {
            eval: compile_node(ast)?,
        })
    }

    /// Evaluate against one event's attributes.
    pub fn matches(&self, attributes: &AttributeMap) -> bool {
        self.evaluate(&EvalScope::new(attributes))
    }

    /// Evaluate within a caller-supplied scope.
    pub fn evaluate(&self, scope: &EvalScope<'_>) -> bool {
        (self.eval)(scope)
    }
}

fn compile_node(node: &AstNode) -> Result<Eval, CompileError> {
    match node {
        AstNode::Expr(expr) => compile_expr(expr),
        AstNode::Condition(cond) => {
            let lhs = compile_node(&cond.lhs)?;
            let rhs = compile_node(&cond.rhs)?;
            let eval: Eval = match cond.kind {
                ConditionKind::And => Box::new(move |s: &EvalScope<'_>| lhs(s) && rhs(s)),
                ConditionKind::Or => Box::new(move |s: &EvalScope<'_>| lhs(s) || rhs(s)),
            };
            Ok(eval)
        }
    }
}

fn compile_expr(expr: &Expr) -> Result<Eval, CompileError> {
    let key = KeyPattern::compile(&expr.key)?;

    if expr.op.is_negated() {
        let positive = compile_expr(&Expr {
            op: expr.op.positive(),
            ..expr.clone()
        })?;
        return Ok(Box::new(move |s: &EvalScope<'_>| !positive(s)));
    }

    let mismatch = || CompileError::LiteralMismatch {
        op: expr.op.to_string(),
    };
    let scalar = || -> Result<String, CompileError> {
        expr.value
            .as_ref()
            .and_then(Literal::as_scalar)
            .map(str::to_string)
            .ok_or_else(mismatch)
    };

    let eval: Eval = match expr.op {
        Operator::Exists => Box::new(move |s: &EvalScope<'_>| s.any_value(&key, |_| true)),
        Operator::Eq => {
            let literal = scalar()?;
            Box::new(move |s: &EvalScope<'_>| s.any_value(&key, |v| v == literal))
        }
        Operator::Neq => {
            let literal = scalar()?;
            Box::new(move |s: &EvalScope<'_>| s.any_value(&key, |v| v != literal))
        }
        Operator::Includes => {
            let literal = scalar()?;
            Box::new(move |s: &EvalScope<'_>| s.any_value(&key, |v| v.contains(literal.as_str())))
        }
        Operator::Like => {
            let pattern = like_pattern(&scalar()?)?;
            Box::new(move |s: &EvalScope<'_>| s.any_value(&key, |v| pattern.is_match(v)))
        }
        Operator::In => {
            let set = expr
                .value
                .as_ref()
                .and_then(Literal::as_set)
                .ok_or_else(mismatch)?
                .to_vec();
            Box::new(move |s: &EvalScope<'_>| s.any_value(&key, |v| set.iter().any(|m| m == v)))
        }
        Operator::Lt | Operator::Gt | Operator::Lte | Operator::Gte => {
            let text = scalar()?;
            let Quantity { amount, unit } =
                Quantity::parse(&text).ok_or_else(|| CompileError::NotAQuantity {
                    op: expr.op.to_string(),
                    value: text.clone(),
                })?;
            let op = expr.op;
            Box::new(move |s: &EvalScope<'_>| {
                s.quantities(&key, unit.as_deref()).iter().any(|x| match op {
                    Operator::Lt => *x < amount,
                    Operator::Gt => *x > amount,
                    Operator::Lte => *x <= amount,
                    _ => *x >= amount,
                })
            })
        }
        // negated operators were rewritten above
        Operator::NotExists | Operator::NotIncludes | Operator::NotLike | Operator::NotIn => {
            return Err(mismatch())
        }
    };
    Ok(eval)
}

/// Translate a `%` / `_` wildcard pattern into an anchored regex.
pub fn like_pattern(pattern: &str) -> Result<Regex, CompileError> {
    let mut re = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| CompileError::Pattern(e.to_string()))
}
