//! Event record types shared by the live and archived paths.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Attribute path → every value recorded under it, in emission order.
pub type AttributeMap = BTreeMap<String, Vec<String>>;

/// Event type tag of a reconstructed transaction event.
pub const TX_EVENT_TYPE: &str = "tendermint/event/Tx";

// ─── Decoded execution result ─────────────────────────────────────────────────

/// One attribute of an ABCI event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub index: bool,
}

/// A typed event emitted while executing a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

/// The execution result of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub codespace: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub log: String,
    #[serde(default, with = "i64_string")]
    pub gas_wanted: i64,
    #[serde(default, with = "i64_string")]
    pub gas_used: i64,
    #[serde(default, with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(default)]
    pub events: Vec<AbciEvent>,
}

impl TxResult {
    /// Flatten the result's events into `{type}.{key}` attribute paths.
    pub fn attributes(&self) -> AttributeMap {
        let mut map = AttributeMap::new();
        for event in &self.events {
            for attr in &event.attributes {
                map.entry(format!("{}.{}", event.kind, attr.key))
                    .or_default()
                    .push(attr.value.clone());
            }
        }
        map
    }
}

// ─── Reconstructed event ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResultEnvelope {
    pub height: String,
    pub index: u32,
    /// Base64 of the raw transaction bytes.
    pub tx: String,
    pub result: TxResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEventValue {
    #[serde(rename = "TxResult")]
    pub tx_result: TxResultEnvelope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEventData {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: TxEventValue,
}

/// A fully reconstructed transaction event, as pushed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    pub data: TxEventData,
    pub events: AttributeMap,
    /// The query that selected this event, set per recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl TxEvent {
    pub fn new(height: i64, index: u32, tx: &[u8], result: TxResult, events: AttributeMap) -> Self {
        Self {
            data: TxEventData {
                kind: TX_EVENT_TYPE.to_string(),
                value: TxEventValue {
                    tx_result: TxResultEnvelope {
                        height: height.to_string(),
                        index,
                        tx: STANDARD.encode(tx),
                        result,
                    },
                },
            },
            events,
            query: None,
        }
    }

    /// A copy of this event addressed to `query`.
    pub fn for_query(&self, query: &str) -> Self {
        Self {
            query: Some(query.to_string()),
            ..self.clone()
        }
    }
}

// ─── serde helpers ────────────────────────────────────────────────────────────

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        STANDARD.decode(text).map_err(D::Error::custom)
    }
}

/// Gas figures travel as decimal strings, as the node reports them.
mod i64_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(i64),
    }

    pub fn serialize<S: Serializer>(value: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        match Repr::deserialize(d)? {
            Repr::Number(n) => Ok(n),
            Repr::Text(text) => text.parse().map_err(D::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn transfer_result() -> TxResult {
        TxResult {
            gas_wanted: 200_000,
            gas_used: 85_000,
            events: vec![
                AbciEvent {
                    kind: "transfer".into(),
                    attributes: vec![
                        EventAttribute { key: "amount".into(), value: "6000000uscrt".into(), index: true },
                        EventAttribute { key: "amount".into(), value: "10uscrt".into(), index: true },
                    ],
                },
                AbciEvent {
                    kind: "message".into(),
                    attributes: vec![EventAttribute {
                        key: "action".into(),
                        value: "send".into(),
                        index: false,
                    }],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn flattens_events_into_paths() {
        let attrs = transfer_result().attributes();
        assert_eq!(attrs["transfer.amount"], vec!["6000000uscrt", "10uscrt"]);
        assert_eq!(attrs["message.action"], vec!["send"]);
    }

    #[test]
    fn serializes_in_node_event_shape() {
        let event = TxEvent::new(150, 2, b"\x01\x02", transfer_result(), AttributeMap::new())
            .for_query("tx.height>100");
        let value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["data"]["type"], json!("tendermint/event/Tx"));
        let inner = &value["data"]["value"]["TxResult"];
        assert_eq!(inner["height"], json!("150"));
        assert_eq!(inner["index"], json!(2));
        assert_eq!(inner["tx"], json!("AQI="));
        assert_eq!(inner["result"]["gas_used"], json!("85000"));
        assert_eq!(value["query"], json!("tx.height>100"));

        let back: TxEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn gas_accepts_numbers_or_strings() {
        let r: TxResult = serde_json::from_value(json!({ "gas_wanted": 7, "gas_used": "3" })).unwrap();
        assert_eq!((r.gas_wanted, r.gas_used), (7, 3));
    }
}
