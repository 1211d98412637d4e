//! powerstream-core: the event query language and its compilers.
//!
//! # Architecture
//!
//! ```text
//! query text → Parser → AstNode ─┬── Predicate        (live filtering)
//!                                ├── RelationalFilter (archive search)
//!                                └── ExportNode       (what was parsed)
//! ```
//!
//! [`CompiledQuery`] bundles the trimmed source text (subscription identity),
//! the AST and the lazily compiled predicate. The [`Archive`] and
//! [`ResultCodec`] traits describe the stores the search path reads from.

pub mod archive;
pub mod ast;
pub mod codec;
pub mod error;
pub mod event;
pub mod export;
pub mod parser;
pub mod predicate;
pub mod quantity;
pub mod query;
pub mod relational;

pub use archive::{group_attributes, Archive, ArchivedTx, AttributeRow};
pub use ast::{AstNode, Condition, ConditionKind, Expr, Literal, NodeId, Operator};
pub use codec::{JsonResultCodec, ResultCodec};
pub use error::{CodecError, CompileError, ParseError, StoreError};
pub use event::{AbciEvent, AttributeMap, EventAttribute, TxEvent, TxResult};
pub use export::ExportNode;
pub use parser::{parse, Parser};
pub use predicate::{EvalScope, Predicate};
pub use quantity::{Amount, Quantity};
pub use query::CompiledQuery;
pub use relational::{RelationalFilter, RelationalOptions, SqlParam};
