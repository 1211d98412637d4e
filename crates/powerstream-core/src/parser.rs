//! Event query parser.
//!
//! Grammar (EBNF; AND binds tighter than OR, both left-associative):
//!
//! ```text
//! query    = orGroup { ("OR" | "||") orGroup } ;
//! orGroup  = andGroup { ("AND" | "&&") andGroup } ;
//! andGroup = "(" query ")" | expr ;
//! expr     = path ( unary | operator value ) ;
//! unary    = "exists" | "not exists" ;
//! operator = "<" | ">" | "<=" | ">=" | "!=" | "=" | ["not"] ("includes" | "like" | "in") ;
//! value    = quantity | string | "(" { (quantity | string) [","] } ")" ;
//! path     = { IDENT | "." | "*" | ":" | "-" } | "`" { ANY - "`" } "`" ;
//! quantity = ["-" | "+"] DIGITS [UNIT] ;
//! string   = "'" .. "'" | '"' .. '"' | "`" .. "`" ;
//! ```
//!
//! The parser is a single pass over the input driven by two explicit stacks
//! (operands and pending operators/groups), so nesting depth never turns into
//! call-stack depth.

use crate::ast::{AstNode, Condition, ConditionKind, Expr, Literal, NodeId, Operator};
use crate::error::ParseError;
use crate::quantity::Quantity;

/// Default cap on the number of expressions in one query.
pub const DEFAULT_MAX_EXPRESSIONS: usize = 256;

/// Maximum length of an attribute path, in bytes.
pub const MAX_PATH_LEN: usize = 512;

/// Parse `query` (already trimmed) into an AST.
pub fn parse(query: &str) -> Result<AstNode, ParseError> {
    Parser::new(query).parse()
}

/// A pending entry on the operator stack.
enum Pending {
    /// An open parenthesis at the given offset.
    Group(usize),
    /// A continuation keyword whose rhs has not been reduced yet.
    Condition(ConditionKind, NodeId),
}

fn precedence(kind: ConditionKind) -> u8 {
    match kind {
        ConditionKind::Or => 1,
        ConditionKind::And => 2,
    }
}

pub struct Parser<'q> {
    src: &'q str,
    pos: usize,
    next_id: NodeId,
    expressions: usize,
    max_expressions: usize,
}

impl<'q> Parser<'q> {
    pub fn new(src: &'q str) -> Self {
        Self {
            src,
            pos: 0,
            next_id: 0,
            expressions: 0,
            max_expressions: DEFAULT_MAX_EXPRESSIONS,
        }
    }

    /// Override the expression cap.
    pub fn with_max_expressions(mut self, max: usize) -> Self {
        self.max_expressions = max;
        self
    }

    pub fn parse(mut self) -> Result<AstNode, ParseError> {
        let mut operands: Vec<AstNode> = Vec::new();
        let mut pending: Vec<Pending> = Vec::new();
        let mut expect_operand = true;

        loop {
            let spaced = self.skip_ws() > 0;

            if expect_operand {
                if self.at_end() {
                    let message = if operands.is_empty() && pending.is_empty() {
                        "Empty query"
                    } else if matches!(pending.last(), Some(Pending::Group(_))) {
                        "Expected expression after '('"
                    } else {
                        "Unterminated condition"
                    };
                    return Err(self.error(message));
                }

                if self.eat_byte(b'(') {
                    pending.push(Pending::Group(self.pos - 1));
                    continue;
                }

                let expr = self.expr()?;
                operands.push(AstNode::Expr(expr));
                expect_operand = false;
                continue;
            }

            if self.at_end() {
                break;
            }

            if self.peek() == Some(b')') {
                let at = self.pos;
                loop {
                    match pending.pop() {
                        Some(Pending::Condition(kind, id)) => reduce(&mut operands, kind, id),
                        Some(Pending::Group(_)) => break,
                        None => return Err(ParseError::new("Extraneous closing paren", at)),
                    }
                }
                self.pos += 1;
                continue;
            }

            let Some(kind) = self.continuation(spaced) else {
                return Err(self.error("Expected continuation"));
            };

            while let Some(Pending::Condition(top, id)) = pending.last() {
                if precedence(*top) < precedence(kind) {
                    break;
                }
                let (top, id) = (*top, *id);
                pending.pop();
                reduce(&mut operands, top, id);
            }

            let id = self.alloc_id();
            pending.push(Pending::Condition(kind, id));
            expect_operand = true;
        }

        while let Some(entry) = pending.pop() {
            match entry {
                Pending::Condition(kind, id) => reduce(&mut operands, kind, id),
                Pending::Group(at) => return Err(ParseError::new("Unclosed group", at)),
            }
        }

        match (operands.pop(), operands.is_empty()) {
            (Some(root), true) => Ok(root),
            _ => Err(self.error("Invalid query")),
        }
    }

    // ─── Expressions ─────────────────────────────────────────────────────────

    fn expr(&mut self) -> Result<Expr, ParseError> {
        let key = self.path()?;
        let op = self.operator()?;

        let value = if op.is_unary() {
            None
        } else {
            Some(self.value(op)?)
        };

        self.expressions += 1;
        if self.expressions > self.max_expressions {
            return Err(self.error(format!(
                "Query exceeds the maximum of {} expressions",
                self.max_expressions
            )));
        }

        Ok(Expr {
            id: self.alloc_id(),
            key,
            op,
            value,
        })
    }

    fn path(&mut self) -> Result<String, ParseError> {
        let start = self.pos;

        if self.eat_byte(b'`') {
            let rest = &self.src[self.pos..];
            let Some(len) = rest.find(|c| c == '`' || c == '\n') else {
                return Err(ParseError::new("Unterminated quoted path", start));
            };
            if !rest[len..].starts_with('`') || len == 0 || len > MAX_PATH_LEN {
                return Err(ParseError::new("Invalid quoted path", start));
            }
            let key = rest[..len].to_string();
            self.pos += len + 1;
            return Ok(key);
        }

        let len = self.src[start..]
            .bytes()
            .take_while(|b| is_path_byte(*b))
            .count();
        match len {
            0 => Err(self.error("Invalid query")),
            n if n > MAX_PATH_LEN => Err(ParseError::new("Attribute path too long", start)),
            n => {
                self.pos += n;
                Ok(self.src[start..start + n].to_string())
            }
        }
    }

    fn operator(&mut self) -> Result<Operator, ParseError> {
        let before_ws = self.pos;
        self.skip_ws();
        let had_ws = self.pos > before_ws;

        for (symbol, op) in [
            ("<=", Operator::Lte),
            (">=", Operator::Gte),
            ("!=", Operator::Neq),
            ("<", Operator::Lt),
            (">", Operator::Gt),
            ("=", Operator::Eq),
        ] {
            if self.eat_str(symbol) {
                self.skip_ws();
                return Ok(op);
            }
        }

        if !had_ws {
            return Err(self.error("Expected operator"));
        }

        let at = self.pos;
        let negated = self.word() == Some("not");
        if negated {
            self.pos += 3;
            if self.skip_ws() == 0 {
                return Err(self.error("Expected operator after 'not'"));
            }
        }

        let op = match (self.word(), negated) {
            (Some("exists"), false) => Operator::Exists,
            (Some("exists"), true) => Operator::NotExists,
            (Some("includes"), false) => Operator::Includes,
            (Some("includes"), true) => Operator::NotIncludes,
            (Some("like"), false) => Operator::Like,
            (Some("like"), true) => Operator::NotLike,
            (Some("in"), false) => Operator::In,
            (Some("in"), true) => Operator::NotIn,
            _ => return Err(ParseError::new("Expected operator", at)),
        };
        self.pos += op.alias().len();

        if !op.is_unary() {
            let spaced = self.skip_ws() > 0;
            let opens_value = matches!(self.peek(), Some(b'(' | b'\'' | b'"' | b'`'));
            if !spaced && !opens_value {
                return Err(self.error("Expected whitespace after operator"));
            }
        }

        Ok(op)
    }

    fn value(&mut self, op: Operator) -> Result<Literal, ParseError> {
        let start = self.pos;

        let literal = match self.peek() {
            Some(q @ (b'\'' | b'"' | b'`')) => {
                let text = self.string(q)?;
                if op.is_inequality() && Quantity::parse(&text).is_none() {
                    return Err(ParseError::new(
                        format!("Type error: invalid quantity for inequality operation {text:?}"),
                        start,
                    ));
                }
                Literal::Scalar(text)
            }
            Some(b'(') => {
                if !op.takes_set() {
                    return Err(self.error(
                        "Sets are only allowed when using the \"in\" or \"not in\" operators",
                    ));
                }
                self.pos += 1;
                Literal::Set(self.set()?)
            }
            Some(b) if b.is_ascii_digit() || b == b'-' || b == b'+' => {
                let text = self.quantity_token();
                if Quantity::parse(text).is_none() {
                    return Err(ParseError::new("Invalid value", start));
                }
                Literal::Scalar(text.to_string())
            }
            _ => return Err(self.error("Invalid value")),
        };

        // `in 'x'` is shorthand for a one-element set.
        Ok(match literal {
            Literal::Scalar(v) if op.takes_set() => Literal::Set(vec![v]),
            other => other,
        })
    }

    fn set(&mut self) -> Result<Vec<String>, ParseError> {
        let mut values: Vec<String> = Vec::new();
        loop {
            self.skip_ws();
            let at = self.pos;
            let item = match self.peek() {
                None => return Err(self.error("Expected set closing paren \")\"")),
                Some(b')') => {
                    self.pos += 1;
                    return Ok(values);
                }
                Some(q @ (b'\'' | b'"' | b'`')) => self.string(q)?,
                Some(b) if b.is_ascii_digit() || b == b'-' || b == b'+' => {
                    let text = self.quantity_token();
                    if Quantity::parse(text).is_none() {
                        return Err(ParseError::new("Invalid token inside of set", at));
                    }
                    text.to_string()
                }
                Some(_) => return Err(self.error("Invalid token inside of set")),
            };
            if !values.contains(&item) {
                values.push(item);
            }
            self.skip_ws();
            self.eat_byte(b',');
        }
    }

    /// Consume a delimited string literal starting at the delimiter.
    fn string(&mut self, delimiter: u8) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1;

        let mut out = String::new();
        let mut chars = self.src[self.pos..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => out.push(escaped),
                    None => break,
                },
                c if c as u32 == delimiter as u32 => {
                    self.pos += i + 1;
                    return Ok(out);
                }
                c => out.push(c),
            }
        }
        Err(ParseError::new("Unterminated string literal", start))
    }

    fn quantity_token(&mut self) -> &'q str {
        let src: &'q str = self.src;
        let start = self.pos;
        let bytes = src.as_bytes();
        let mut end = start;
        if matches!(bytes.get(end), Some(b'-' | b'+')) {
            end += 1;
        }
        while let Some(b) = bytes.get(end) {
            if b.is_ascii_alphanumeric() || *b == b'_' || *b == b'/' {
                end += 1;
            } else {
                break;
            }
        }
        self.pos = end;
        &src[start..end]
    }

    // ─── Continuations ───────────────────────────────────────────────────────

    /// `&&` and `||` may touch their operands; `AND` and `OR` need
    /// whitespace on both sides (`spaced` says whether any preceded them).
    fn continuation(&mut self, spaced: bool) -> Option<ConditionKind> {
        if self.eat_str("&&") {
            return Some(ConditionKind::And);
        }
        if self.eat_str("||") {
            return Some(ConditionKind::Or);
        }
        if !spaced {
            return None;
        }

        let word = self.word()?;
        let kind = match word.to_ascii_lowercase().as_str() {
            "and" => ConditionKind::And,
            "or" => ConditionKind::Or,
            _ => return None,
        };
        match self.src.as_bytes().get(self.pos + word.len()) {
            Some(b) if !b.is_ascii_whitespace() => None,
            _ => {
                self.pos += word.len();
                Some(kind)
            }
        }
    }

    // ─── Scanner primitives ──────────────────────────────────────────────────

    fn alloc_id(&mut self) -> NodeId {
        self.next_id += 1;
        self.next_id
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<u8> {
        self.src.as_bytes().get(self.pos).copied()
    }

    fn eat_byte(&mut self, b: u8) -> bool {
        if self.peek() == Some(b) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.src[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Skip whitespace, returning how many bytes were skipped.
    fn skip_ws(&mut self) -> usize {
        let n = self.src[self.pos..]
            .bytes()
            .take_while(u8::is_ascii_whitespace)
            .count();
        self.pos += n;
        n
    }

    /// The alphabetic word at the cursor, without consuming it.
    fn word(&self) -> Option<&'q str> {
        let src: &'q str = self.src;
        let rest = &src[self.pos..];
        let len = rest
            .bytes()
            .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
            .count();
        (len > 0).then(|| &rest[..len])
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.pos)
    }
}

fn is_path_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b':' | b'*' | b'-')
}

fn reduce(operands: &mut Vec<AstNode>, kind: ConditionKind, id: NodeId) {
    // The state machine only pushes a condition after an operand and only
    // reduces it after its rhs operand, so both pops succeed.
    if let (Some(rhs), Some(lhs)) = (operands.pop(), operands.pop()) {
        operands.push(AstNode::Condition(Condition {
            id,
            kind,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(q: &str) -> AstNode {
        parse(q).unwrap_or_else(|e| panic!("{}", e.render(q)))
    }

    fn expr(node: &AstNode) -> &Expr {
        match node {
            AstNode::Expr(e) => e,
            other => panic!("expected expr, got {other}"),
        }
    }

    #[test]
    fn parses_single_expression() {
        let ast = p("tx.height > 100");
        let e = expr(&ast);
        assert_eq!(e.key, "tx.height");
        assert_eq!(e.op, Operator::Gt);
        assert_eq!(e.value, Some(Literal::Scalar("100".into())));
        assert_eq!(e.id, 1);
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            p("a=1 AND b=2 OR c=3").to_string(),
            p("(a=1 AND b=2) OR c=3").to_string()
        );
        assert_eq!(
            p("a=1 OR b=2 AND c=3").to_string(),
            r#"(a = "1" OR (b = "2" AND c = "3"))"#
        );
    }

    #[test]
    fn conditions_are_left_associative() {
        assert_eq!(
            p("a=1 OR b=2 OR c=3").to_string(),
            r#"((a = "1" OR b = "2") OR c = "3")"#
        );
        assert_eq!(
            p("a=1 && b=2 && c=3").to_string(),
            r#"((a = "1" AND b = "2") AND c = "3")"#
        );
    }

    #[test]
    fn parentheses_override_precedence() {
        assert_eq!(
            p("a=1 AND (b=2 OR c=3)").to_string(),
            r#"(a = "1" AND (b = "2" OR c = "3"))"#
        );
        assert_eq!(p("((((a exists))))").to_string(), "a exists");
    }

    #[test]
    fn ids_follow_parse_order() {
        let ast = p("a=1 AND b=2 OR c=3");
        // a=1 (1), AND (2), b=2 (3), OR (4), c=3 (5)
        let AstNode::Condition(or) = &ast else { panic!() };
        assert_eq!(or.id, 4);
        assert_eq!(or.lhs.id(), 2);
        assert_eq!(or.rhs.id(), 5);
        let ids: Vec<NodeId> = ast.exprs().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn deep_nesting_does_not_recurse() {
        let depth = 50_000;
        let q = format!("{}a=1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(expr(&p(&q)).key, "a");
    }

    #[test]
    fn keyword_operators() {
        assert_eq!(expr(&p("a exists")).op, Operator::Exists);
        assert_eq!(expr(&p("a not   exists")).op, Operator::NotExists);
        assert_eq!(expr(&p("a includes 'x'")).op, Operator::Includes);
        assert_eq!(expr(&p("a not includes 'x'")).op, Operator::NotIncludes);
        assert_eq!(expr(&p("a like 'x%'")).op, Operator::Like);
        assert_eq!(expr(&p("a not like 'x%'")).op, Operator::NotLike);
        assert_eq!(expr(&p("a != 'x'")).op, Operator::Neq);
        assert_eq!(expr(&p("a<=5")).op, Operator::Lte);
        assert_eq!(expr(&p("a >= 5")).op, Operator::Gte);
    }

    #[test]
    fn sets_are_deduplicated_in_order() {
        let ast = p("message.sender in ('b', \"a\", 'b' 5uscrt,5uscrt)");
        let e = expr(&ast);
        assert_eq!(e.op, Operator::In);
        assert_eq!(
            e.value,
            Some(Literal::Set(vec!["b".into(), "a".into(), "5uscrt".into()]))
        );
        assert_eq!(expr(&p("a not in ()")).value, Some(Literal::Set(vec![])));
    }

    #[test]
    fn string_escapes() {
        let e = p(r"a = 'it\'s \\ here'");
        assert_eq!(expr(&e).value, Some(Literal::Scalar(r"it's \ here".into())));
        let e = p(r#"a = "say \"hi\"""#);
        assert_eq!(expr(&e).value, Some(Literal::Scalar(r#"say "hi""#.into())));
    }

    #[test]
    fn backtick_paths_are_unquoted() {
        let e = p("`weird key (with) spaces` exists");
        assert_eq!(expr(&e).key, "weird key (with) spaces");
    }

    #[test]
    fn wildcard_paths() {
        assert_eq!(expr(&p("wasm.*.action = 'x'")).key, "wasm.*.action");
    }

    #[test]
    fn continuation_keywords_are_case_insensitive() {
        assert!(matches!(p("a=1 and b=2"), AstNode::Condition(Condition { kind: ConditionKind::And, .. })));
        assert!(matches!(p("a=1 Or b=2"), AstNode::Condition(Condition { kind: ConditionKind::Or, .. })));
        assert!(matches!(p("a=1||b=2"), AstNode::Condition(Condition { kind: ConditionKind::Or, .. })));
    }

    #[test]
    fn word_keywords_need_surrounding_whitespace() {
        assert!(matches!(p("(a=1) AND (b=2)"), AstNode::Condition(Condition { kind: ConditionKind::And, .. })));
        assert!(matches!(p("a='x'&&(b='y')"), AstNode::Condition(Condition { kind: ConditionKind::And, .. })));
        assert!(parse("(a=1)AND b=2").is_err());
        assert!(parse("a=1 OR\tb=2").is_ok());
    }

    #[test]
    fn errors_carry_offsets() {
        let cases = [
            ("", 0, "Empty query"),
            ("a=1 AND", 7, "Unterminated condition"),
            ("a=1)", 3, "Extraneous closing paren"),
            ("(a=1", 0, "Unclosed group"),
            ("a=1 b=2", 4, "Expected continuation"),
            ("a='x'AND b='y'", 5, "Expected continuation"),
            ("a=1 AND(b=2)", 4, "Expected continuation"),
            ("a=1 ANDb=2", 4, "Expected continuation"),
            ("a = 'oops", 4, "Unterminated string literal"),
            ("a in ('x'", 9, "Expected set closing paren"),
            ("a = ('x')", 4, "Sets are only allowed"),
            ("a > 'abc'", 4, "Type error"),
            ("a > 5USCRT", 4, "Invalid value"),
            ("a ~ 1", 2, "Expected operator"),
            ("= 1", 0, "Invalid query"),
        ];
        for (q, offset, needle) in cases {
            let err = parse(q).expect_err(q);
            assert_eq!(err.offset, offset, "{q:?}: {err}");
            assert!(err.message.contains(needle), "{q:?}: {err}");
        }
    }

    #[test]
    fn expression_cap_is_enforced() {
        let q = vec!["a=1"; 5].join(" OR ");
        assert!(Parser::new(&q).with_max_expressions(5).parse().is_ok());
        let err = Parser::new(&q).with_max_expressions(4).parse().unwrap_err();
        assert!(err.message.contains("maximum"));
    }
}
