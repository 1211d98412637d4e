//! Per-connection session: owned subscriptions, in-flight searches and the
//! outbox that carries pushes back to the client.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use powerstream_core::archive::Archive;
use powerstream_core::codec::ResultCodec;
use powerstream_core::event::TxEvent;
use powerstream_core::query::CompiledQuery;

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::registry::{EventSink, SubscriptionId, SubscriptionRegistry};
use crate::search::SearchStreamer;

/// Client request id: string, number, or null.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    String(String),
    #[default]
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Null => write!(f, "null"),
        }
    }
}

/// A push to the client, correlated with the request that started it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outgoing {
    pub id: RequestId,
    pub result: Value,
}

struct OutboxSink {
    id: RequestId,
    outbox: mpsc::UnboundedSender<Outgoing>,
}

impl EventSink for OutboxSink {
    fn emit(&self, event: TxEvent) -> Result<(), ServiceError> {
        let result = serde_json::to_value(event).map_err(|e| ServiceError::Internal(e.to_string()))?;
        self.outbox
            .send(Outgoing {
                id: self.id.clone(),
                result,
            })
            .map_err(|_| ServiceError::Internal("session outbox closed".into()))
    }
}

// ─── Shared context ───────────────────────────────────────────────────────────

/// State shared by every session of one service instance.
#[derive(Clone)]
pub struct ServiceContext {
    pub config: Arc<ServiceConfig>,
    pub registry: SubscriptionRegistry,
    pub archive: Arc<dyn Archive>,
    pub codec: Arc<dyn ResultCodec>,
}

impl ServiceContext {
    pub fn new(
        config: ServiceConfig,
        archive: Arc<dyn Archive>,
        codec: Arc<dyn ResultCodec>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry: SubscriptionRegistry::new(),
            archive,
            codec,
        }
    }

    fn streamer(&self) -> SearchStreamer {
        SearchStreamer::new(
            Arc::clone(&self.archive),
            Arc::clone(&self.codec),
            self.config.search_batch_size,
        )
        .with_relational_options(self.config.relational_options())
    }
}

// ─── Session ──────────────────────────────────────────────────────────────────

pub struct Session {
    ctx: ServiceContext,
    outbox: mpsc::UnboundedSender<Outgoing>,
    /// Registrations owned by this session, oldest first.
    owned: Vec<SubscriptionId>,
    /// Canonical query text → its registrations, oldest first.
    by_query: HashMap<String, VecDeque<SubscriptionId>>,
    searches: Vec<JoinHandle<()>>,
}

impl Session {
    /// Open a session; the receiver yields every push addressed to it.
    pub fn new(ctx: ServiceContext) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (outbox, rx) = mpsc::unbounded_channel();
        let session = Self {
            ctx,
            outbox,
            owned: Vec::new(),
            by_query: HashMap::new(),
            searches: Vec::new(),
        };
        (session, rx)
    }

    fn compile(&self, query: &str) -> Result<Arc<CompiledQuery>, ServiceError> {
        let compiled = CompiledQuery::parse_with(query, self.ctx.config.max_query_expressions)?;
        Ok(Arc::new(compiled))
    }

    /// Register a live subscription; matching events are pushed under `id`.
    pub fn subscribe(&mut self, id: RequestId, query: &str) -> Result<Value, ServiceError> {
        let compiled = self.compile(query)?;
        compiled.predicate()?;

        let source = compiled.source().to_string();
        let ast = compiled.export();
        let sink = Arc::new(OutboxSink {
            id,
            outbox: self.outbox.clone(),
        });
        let sub = self.ctx.registry.register(source.clone(), compiled, sink);

        self.owned.push(sub);
        self.by_query.entry(source).or_default().push_back(sub);
        Ok(json!({ "ast": ast }))
    }

    /// Remove the oldest registration under `query`'s canonical text.
    pub fn unsubscribe(&mut self, query: &str) -> Result<Value, ServiceError> {
        let compiled = self.compile(query)?;
        let source = compiled.source();

        let Some(queue) = self.by_query.get_mut(source) else {
            return Err(ServiceError::NotFound(source.to_string()));
        };
        let Some(sub) = queue.pop_front() else {
            return Err(ServiceError::NotFound(source.to_string()));
        };
        if queue.is_empty() {
            self.by_query.remove(source);
        }

        self.owned.retain(|owned| *owned != sub);
        self.ctx.registry.remove(sub);
        Ok(json!({}))
    }

    /// Remove every registration this session owns.
    pub fn unsubscribe_all(&mut self) -> usize {
        let count = self.owned.len();
        for sub in self.owned.drain(..) {
            self.ctx.registry.remove(sub);
        }
        self.by_query.clear();
        if count > 0 {
            debug!(count, "session subscriptions cleared");
        }
        count
    }

    pub fn parse_query(&self, query: &str) -> Result<Value, ServiceError> {
        Ok(json!({ "ast": self.compile(query)?.export() }))
    }

    /// Start a historical search; batches are pushed under `id`.
    pub fn search_txs(&mut self, id: RequestId, query: &str) -> Result<Value, ServiceError> {
        let compiled = self.compile(query)?;
        compiled.predicate()?;
        compiled.relational(self.ctx.config.relational_options())?;
        let ast = compiled.export();

        let streamer = self.ctx.streamer();
        let outbox = self.outbox.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = streamer.run(&compiled, &id, &outbox).await {
                error!(query = %compiled, error = %e, "search aborted");
            }
        });

        self.searches.retain(|h| !h.is_finished());
        self.searches.push(handle);
        Ok(json!({ "ast": ast }))
    }

    /// Known attribute paths, paginated.
    pub async fn attributes(&self, limit: usize, offset: usize) -> Result<Value, ServiceError> {
        let keys = self
            .ctx
            .archive
            .attribute_keys(&self.ctx.config.excluded_attribute_prefix, limit, offset)
            .await?;
        Ok(json!({ "keys": keys }))
    }

    pub fn power_stream_info(&self) -> Value {
        let node = &self.ctx.config.node;
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "node": {
                "network": node.network,
                "version": node.version,
            },
        })
    }

    /// Number of live registrations owned by this session.
    pub fn subscriptions(&self) -> usize {
        self.owned.len()
    }

    /// Number of searches still streaming.
    pub fn active_searches(&self) -> usize {
        self.searches.iter().filter(|h| !h.is_finished()).count()
    }

    /// Tear down the session: drop its subscriptions and abort its searches.
    pub fn close(&mut self) {
        self.unsubscribe_all();
        for handle in self.searches.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
