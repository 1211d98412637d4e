//! A parsed query together with its compiled forms.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use crate::ast::AstNode;
use crate::error::{CompileError, ParseError};
use crate::export::export;
use crate::parser::{Parser, DEFAULT_MAX_EXPRESSIONS};
use crate::predicate::Predicate;
use crate::relational::{self, RelationalFilter, RelationalOptions};

/// Immutable result of parsing one query.
///
/// Identity (`Eq`/`Hash`) is the trimmed source text, not the AST: two
/// queries that differ only in spacing inside the text are distinct keys.
pub struct CompiledQuery {
    source: String,
    ast: AstNode,
    predicate: OnceLock<Predicate>,
}

impl CompiledQuery {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::parse_with(text, DEFAULT_MAX_EXPRESSIONS)
    }

    /// Parse with a custom cap on the number of expressions.
    pub fn parse_with(text: &str, max_expressions: usize) -> Result<Self, ParseError> {
        let source = text.trim();
        let ast = Parser::new(source)
            .with_max_expressions(max_expressions)
            .parse()?;
        Ok(Self {
            source: source.to_string(),
            ast,
            predicate: OnceLock::new(),
        })
    }

    /// The canonical (trimmed) query text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn ast(&self) -> &AstNode {
        &self.ast
    }

    /// The predicate form, compiled on first use.
    pub fn predicate(&self) -> Result<&Predicate, CompileError> {
        if let Some(predicate) = self.predicate.get() {
            return Ok(predicate);
        }
        let compiled = Predicate::compile(&self.ast)?;
        Ok(self.predicate.get_or_init(|| compiled))
    }

    pub fn relational(&self, options: RelationalOptions) -> Result<RelationalFilter, CompileError> {
        relational::compile(&self.ast, options)
    }

    /// The AST as plain data, without node ids.
    pub fn export(&self) -> serde_json::Value {
        export(&self.ast)
    }
}

impl PartialEq for CompiledQuery {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CompiledQuery {}

impl Hash for CompiledQuery {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("source", &self.source)
            .field("ast", &self.ast)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AttributeMap;

    #[test]
    fn identity_is_the_trimmed_source() {
        let a = CompiledQuery::parse("  x=1 ").unwrap();
        let b = CompiledQuery::parse("x=1").unwrap();
        let c = CompiledQuery::parse("x = 1").unwrap();
        assert_eq!(a.source(), "x=1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.ast().to_string(), c.ast().to_string());
    }

    #[test]
    fn predicate_is_compiled_once() {
        let q = CompiledQuery::parse("x=1").unwrap();
        let first = q.predicate().unwrap() as *const Predicate;
        let second = q.predicate().unwrap() as *const Predicate;
        assert_eq!(first, second);

        let mut attrs = AttributeMap::new();
        attrs.insert("x".into(), vec!["1".into()]);
        assert!(q.predicate().unwrap().matches(&attrs));
    }

    #[test]
    fn expression_cap_applies() {
        assert!(CompiledQuery::parse_with("a=1 OR b=2 OR c=3", 2).is_err());
        assert!(CompiledQuery::parse_with("a=1 OR b=2", 2).is_ok());
    }
}
