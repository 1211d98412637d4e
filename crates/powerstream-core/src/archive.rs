//! Read surface of the transaction archive used by historical search.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::event::AttributeMap;
use crate::query::CompiledQuery;
use crate::relational::RelationalOptions;

/// One archived transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedTx {
    /// Archival ordinal; ascending ids follow insertion order.
    pub id: i64,
    pub height: i64,
    /// Raw transaction bytes.
    pub tx_bytes: Vec<u8>,
    /// Execution result, encoded with the archive's `ResultCodec`.
    pub tx_data: Vec<u8>,
}

/// One decomposed `(path, value)` attribute of an archived transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRow {
    pub tx_id: i64,
    pub path: String,
    pub value: String,
}

/// Regroup attribute rows into one attribute map per transaction.
///
/// Values keep the row order within each path.
pub fn group_attributes(rows: Vec<AttributeRow>) -> HashMap<i64, AttributeMap> {
    let mut grouped: HashMap<i64, AttributeMap> = HashMap::new();
    for row in rows {
        grouped
            .entry(row.tx_id)
            .or_default()
            .entry(row.path)
            .or_default()
            .push(row.value);
    }
    grouped
}

/// Query surface of a transaction archive.
///
/// Implementations include `InMemoryArchive` and `PostgresArchive` in
/// `powerstream-storage`.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Ids of every archived transaction matching `query`, ascending.
    ///
    /// Backends that compile the relational form must compile it with
    /// `options`, so that long literals are hashed the way the caller
    /// validated them.
    async fn matching_ids(
        &self,
        query: &CompiledQuery,
        options: RelationalOptions,
    ) -> Result<Vec<i64>, StoreError>;

    /// Transaction rows for `ids`, in ascending id order.
    async fn transactions(&self, ids: &[i64]) -> Result<Vec<ArchivedTx>, StoreError>;

    /// All attribute rows of the given transactions, in one lookup.
    async fn attributes_for(&self, ids: &[i64]) -> Result<Vec<AttributeRow>, StoreError>;

    /// Distinct attribute paths not starting with `exclude_prefix`, sorted.
    async fn attribute_keys(
        &self,
        exclude_prefix: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<String>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(tx_id: i64, path: &str, value: &str) -> AttributeRow {
        AttributeRow {
            tx_id,
            path: path.into(),
            value: value.into(),
        }
    }

    #[test]
    fn groups_rows_per_transaction() {
        let grouped = group_attributes(vec![
            row(1, "transfer.amount", "5uscrt"),
            row(2, "tx.height", "9"),
            row(1, "transfer.amount", "7uscrt"),
            row(1, "tx.height", "8"),
        ]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[&1]["transfer.amount"], vec!["5uscrt", "7uscrt"]);
        assert_eq!(grouped[&1]["tx.height"], vec!["8"]);
        assert_eq!(grouped[&2]["tx.height"], vec!["9"]);
    }
}
