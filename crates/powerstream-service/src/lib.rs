//! powerstream-service: live subscriptions and historical search over the
//! event query language.
//!
//! # Architecture
//!
//! ```text
//! upstream events ─▶ LiveFeed ─▶ SubscriptionRegistry::dispatch ─▶ session outboxes
//!                                         ▲
//! client ─▶ Router ─▶ Session ────────────┘ subscribe / unsubscribe
//!                        └──▶ SearchStreamer ─▶ Archive ─▶ batches ─▶ outbox
//! ```

pub mod config;
pub mod error;
pub mod feed;
pub mod registry;
pub mod router;
pub mod search;
pub mod session;
pub mod telemetry;

pub use config::{NodeInfo, PostgresConfig, ServiceConfig};
pub use error::ServiceError;
pub use feed::{FeedStats, LiveFeed};
pub use registry::{DispatchReport, EventMatcher, EventSink, SubscriptionId, SubscriptionRegistry};
pub use router::{Router, RpcError, RpcRequest, RpcResponse};
pub use search::{SearchStreamer, SearchSummary};
pub use session::{Outgoing, RequestId, ServiceContext, Session};
pub use telemetry::{init_tracing, LogConfig};
