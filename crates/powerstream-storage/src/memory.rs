//! In-memory archive backend.
//!
//! Keeps transactions and their decomposed attributes in RAM and answers
//! searches by running the predicate form of the query over every stored
//! transaction. Useful for development and tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use powerstream_core::archive::{Archive, ArchivedTx, AttributeRow};
use powerstream_core::codec::{JsonResultCodec, ResultCodec};
use powerstream_core::error::{CodecError, StoreError};
use powerstream_core::event::{AttributeMap, TxResult};
use powerstream_core::query::CompiledQuery;
use powerstream_core::relational::RelationalOptions;

#[derive(Default)]
struct Rows {
    next_id: i64,
    txs: BTreeMap<i64, ArchivedTx>,
    attributes: BTreeMap<i64, AttributeMap>,
}

/// In-memory transaction archive.
///
/// All data is lost when the process exits. Results are encoded with
/// [`JsonResultCodec`], so searches over this archive should decode with it.
#[derive(Default)]
pub struct InMemoryArchive {
    rows: Mutex<Rows>,
    transaction_lookups: AtomicUsize,
    attribute_lookups: AtomicUsize,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive one transaction, returning its id.
    pub fn insert(
        &self,
        height: i64,
        index: u32,
        tx_bytes: &[u8],
        result: &TxResult,
        attributes: AttributeMap,
    ) -> Result<i64, CodecError> {
        let tx_data = JsonResultCodec.encode_result(index, result)?;
        Ok(self.insert_raw(height, tx_bytes.to_vec(), tx_data, attributes))
    }

    /// Archive a transaction whose result payload is already encoded.
    pub fn insert_raw(
        &self,
        height: i64,
        tx_bytes: Vec<u8>,
        tx_data: Vec<u8>,
        attributes: AttributeMap,
    ) -> i64 {
        let mut rows = self.rows.lock().unwrap();
        rows.next_id += 1;
        let id = rows.next_id;
        rows.txs.insert(
            id,
            ArchivedTx {
                id,
                height,
                tx_bytes,
                tx_data,
            },
        );
        rows.attributes.insert(id, attributes);
        debug!(id, height, "archived transaction");
        id
    }

    /// Total number of archived transactions.
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().txs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `transactions` calls served so far.
    pub fn transaction_lookups(&self) -> usize {
        self.transaction_lookups.load(Ordering::Relaxed)
    }

    /// Number of `attributes_for` calls served so far.
    pub fn attribute_lookups(&self) -> usize {
        self.attribute_lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Archive for InMemoryArchive {
    /// Values are kept whole, so the hash threshold in `_options` has no
    /// effect on what matches here.
    async fn matching_ids(
        &self,
        query: &CompiledQuery,
        _options: RelationalOptions,
    ) -> Result<Vec<i64>, StoreError> {
        let predicate = query.predicate()?;
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .attributes
            .iter()
            .filter(|(_, attrs)| predicate.matches(attrs))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn transactions(&self, ids: &[i64]) -> Result<Vec<ArchivedTx>, StoreError> {
        self.transaction_lookups.fetch_add(1, Ordering::Relaxed);
        let rows = self.rows.lock().unwrap();
        let mut txs: Vec<ArchivedTx> = ids
            .iter()
            .filter_map(|id| rows.txs.get(id).cloned())
            .collect();
        txs.sort_by_key(|tx| tx.id);
        Ok(txs)
    }

    async fn attributes_for(&self, ids: &[i64]) -> Result<Vec<AttributeRow>, StoreError> {
        self.attribute_lookups.fetch_add(1, Ordering::Relaxed);
        let rows = self.rows.lock().unwrap();
        let mut out = Vec::new();
        for id in ids {
            let Some(attrs) = rows.attributes.get(id) else {
                continue;
            };
            for (path, values) in attrs {
                out.extend(values.iter().map(|value| AttributeRow {
                    tx_id: *id,
                    path: path.clone(),
                    value: value.clone(),
                }));
            }
        }
        Ok(out)
    }

    async fn attribute_keys(
        &self,
        exclude_prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, StoreError> {
        let rows = self.rows.lock().unwrap();
        let keys: BTreeSet<&String> = rows
            .attributes
            .values()
            .flat_map(|attrs| attrs.keys())
            .filter(|key| exclude_prefix.is_empty() || !key.starts_with(exclude_prefix))
            .collect();
        Ok(keys
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        let mut map = AttributeMap::new();
        for (k, v) in pairs {
            map.entry(k.to_string()).or_default().push(v.to_string());
        }
        map
    }

    fn seeded() -> InMemoryArchive {
        let archive = InMemoryArchive::new();
        for (height, amount) in [(90, "6000000uscrt"), (150, "6000000uscrt"), (160, "6000000uatom")] {
            archive
                .insert(
                    height,
                    0,
                    b"tx",
                    &TxResult::default(),
                    attrs(&[
                        ("tx.height", height.to_string().as_str()),
                        ("transfer.amount", amount),
                        ("tm.event", "Tx"),
                    ]),
                )
                .unwrap();
        }
        archive
    }

    #[tokio::test]
    async fn matching_ids_are_ascending() {
        let archive = seeded();
        let q = CompiledQuery::parse("tx.height>100 AND transfer.amount>=5000000uscrt").unwrap();
        assert_eq!(archive.matching_ids(&q, RelationalOptions::default()).await.unwrap(), vec![2]);

        let all = CompiledQuery::parse("tx.height exists").unwrap();
        assert_eq!(archive.matching_ids(&all, RelationalOptions::default()).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn grouped_lookups_are_counted_once_per_call() {
        let archive = seeded();
        let txs = archive.transactions(&[3, 1]).await.unwrap();
        assert_eq!(txs.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 3]);

        let rows = archive.attributes_for(&[1, 3]).await.unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(archive.transaction_lookups(), 1);
        assert_eq!(archive.attribute_lookups(), 1);
    }

    #[tokio::test]
    async fn attribute_keys_skip_prefix_and_paginate() {
        let archive = seeded();
        let keys = archive.attribute_keys("tm.", 10, 0).await.unwrap();
        assert_eq!(keys, vec!["transfer.amount", "tx.height"]);
        let page = archive.attribute_keys("tm.", 1, 1).await.unwrap();
        assert_eq!(page, vec!["tx.height"]);
        let everything = archive.attribute_keys("", 10, 0).await.unwrap();
        assert_eq!(everything.len(), 3);
    }
}
