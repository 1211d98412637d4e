//! Historical search: runs a query against the archive and streams the
//! reconstructed matches in bounded batches.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};

use powerstream_core::archive::{group_attributes, Archive};
use powerstream_core::codec::ResultCodec;
use powerstream_core::event::TxEvent;
use powerstream_core::query::CompiledQuery;
use powerstream_core::relational::RelationalOptions;

use crate::error::ServiceError;
use crate::session::{Outgoing, RequestId};

/// Totals for one completed search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSummary {
    pub matched: usize,
    pub batches: usize,
}

#[derive(Clone)]
pub struct SearchStreamer {
    archive: Arc<dyn Archive>,
    codec: Arc<dyn ResultCodec>,
    batch_size: usize,
    relational: RelationalOptions,
}

impl SearchStreamer {
    pub fn new(archive: Arc<dyn Archive>, codec: Arc<dyn ResultCodec>, batch_size: usize) -> Self {
        Self {
            archive,
            codec,
            batch_size: batch_size.max(1),
            relational: RelationalOptions::default(),
        }
    }

    /// Compile the archive filter with `options` instead of the defaults.
    pub fn with_relational_options(mut self, options: RelationalOptions) -> Self {
        self.relational = options;
        self
    }

    /// Stream every match of `query` to `outbox` under request `id`.
    ///
    /// Pushes `{"batch": [...]}` once per batch, then `{"finished": true}`.
    /// An archive or codec error ends the stream without the finished push;
    /// batches already sent stand.
    pub async fn run(
        &self,
        query: &CompiledQuery,
        id: &RequestId,
        outbox: &mpsc::UnboundedSender<Outgoing>,
    ) -> Result<SearchSummary, ServiceError> {
        let ids = self.archive.matching_ids(query, self.relational).await?;
        info!(query = %query, matched = ids.len(), "search started");

        let mut summary = SearchSummary {
            matched: ids.len(),
            batches: 0,
        };

        for chunk in ids.chunks(self.batch_size) {
            let batch = self.reconstruct(query, chunk).await?;
            push(outbox, id, json!({ "batch": batch }))?;
            summary.batches += 1;
            debug!(query = %query, batch = summary.batches, size = chunk.len(), "search batch sent");

            tokio::task::yield_now().await;
        }

        push(outbox, id, json!({ "finished": true }))?;
        info!(query = %query, batches = summary.batches, "search finished");
        Ok(summary)
    }

    /// Rebuild full events for one batch of ids, in id order.
    async fn reconstruct(
        &self,
        query: &CompiledQuery,
        ids: &[i64],
    ) -> Result<Vec<TxEvent>, ServiceError> {
        let txs = self.archive.transactions(ids).await?;
        let mut attributes = group_attributes(self.archive.attributes_for(ids).await?);

        txs.into_iter()
            .map(|tx| -> Result<TxEvent, ServiceError> {
                let (index, result) = self.codec.decode_result(&tx.tx_data)?;
                let events = attributes.remove(&tx.id).unwrap_or_default();
                let mut event = TxEvent::new(tx.height, index, &tx.tx_bytes, result, events);
                event.query = Some(query.source().to_string());
                Ok(event)
            })
            .collect()
    }
}

fn push(
    outbox: &mpsc::UnboundedSender<Outgoing>,
    id: &RequestId,
    result: serde_json::Value,
) -> Result<(), ServiceError> {
    outbox
        .send(Outgoing {
            id: id.clone(),
            result,
        })
        .map_err(|_| ServiceError::Internal("session outbox closed".into()))
}
