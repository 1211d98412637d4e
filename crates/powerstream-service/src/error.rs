//! Service-level error taxonomy and its JSON-RPC mapping.

use serde_json::{json, Value};
use thiserror::Error;

use powerstream_core::error::{CodecError, CompileError, ParseError, StoreError};

pub const INVALID_PARAMS: i64 = -32602;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INTERNAL_ERROR: i64 = -32603;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Invalid params: {0}")]
    Params(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    /// Benign no-op, e.g. unsubscribing a query with no live registration.
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn params(message: impl Into<String>) -> Self {
        Self::Params(message.into())
    }

    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Parse(_) | Self::Params(_) | Self::Compile(_) => INVALID_PARAMS,
            Self::Store(StoreError::Compile(_)) => INVALID_PARAMS,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            _ => INTERNAL_ERROR,
        }
    }

    /// Extra diagnostic payload for the error object, if any.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::Parse(e) => Some(json!({ "offset": e.offset })),
            _ => None,
        }
    }

    /// Returns `true` for errors the caller should treat as success.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
