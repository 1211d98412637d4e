//! Error types for the query pipeline, the codec and the archive.

use thiserror::Error;

/// A grammar violation while parsing a query.
///
/// `offset` is the byte offset into the trimmed query text where parsing
/// failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parsing error at offset {offset}: {message}")]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
}

impl ParseError {
    pub fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }

    /// Render the error against the query it came from, with a caret under
    /// the failing byte.
    pub fn render(&self, query: &str) -> String {
        let query = query.trim();
        let column = query
            .get(..self.offset.min(query.len()))
            .map(|head| head.chars().count())
            .unwrap_or(self.offset);
        format!(
            "Parsing error: {}\n{}\n{}^",
            self.message,
            query,
            " ".repeat(column)
        )
    }
}

/// A malformed AST reached one of the compiler backends.
///
/// The parser is the only producer of ASTs and never emits these shapes, so
/// this is an internal error rather than a user-facing one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("Operator '{op}' requires a quantity literal, got {value:?}")]
    NotAQuantity { op: String, value: String },

    #[error("Operator '{op}' received the wrong kind of literal")]
    LiteralMismatch { op: String },

    #[error("Invalid like pattern: {0}")]
    Pattern(String),
}

/// Errors while decoding an archived transaction payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed payload: {0}")]
    Malformed(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors raised by an archive backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Archive connect failed: {0}")]
    Connect(String),

    #[error("Archive query failed: {0}")]
    Query(String),

    #[error("Failed to decode archive row: {0}")]
    Decode(String),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_places_caret_under_offset() {
        let err = ParseError::new("Invalid query", 6);
        let rendered = err.render("  a=1 AND ");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[1], "a=1 AND");
        assert_eq!(lines[2], "      ^");
    }
}
