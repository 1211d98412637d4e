//! Codec contract for archived transaction results.

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::event::TxResult;

/// (De)serializes the archived execution result of one transaction.
///
/// The archive stores results as opaque bytes; the codec recovers the
/// transaction's index within its block together with the result.
pub trait ResultCodec: Send + Sync {
    fn encode_result(&self, index: u32, result: &TxResult) -> Result<Vec<u8>, CodecError>;

    fn decode_result(&self, bytes: &[u8]) -> Result<(u32, TxResult), CodecError>;
}

#[derive(Serialize, Deserialize)]
struct Stored<R> {
    index: u32,
    result: R,
}

/// A JSON codec, for development archives and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResultCodec;

impl ResultCodec for JsonResultCodec {
    fn encode_result(&self, index: u32, result: &TxResult) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(&Stored { index, result })?)
    }

    fn decode_result(&self, bytes: &[u8]) -> Result<(u32, TxResult), CodecError> {
        if bytes.is_empty() {
            return Err(CodecError::Malformed("empty payload".into()));
        }
        let stored: Stored<TxResult> = serde_json::from_slice(bytes)?;
        Ok((stored.index, stored.result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_recovers_index_and_result() {
        let result = TxResult {
            code: 5,
            log: "out of gas".into(),
            data: vec![9, 9],
            ..Default::default()
        };
        let bytes = JsonResultCodec.encode_result(3, &result).unwrap();
        let (index, decoded) = JsonResultCodec.decode_result(&bytes).unwrap();
        assert_eq!(index, 3);
        assert_eq!(decoded, result);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            JsonResultCodec.decode_result(b""),
            Err(CodecError::Malformed(_))
        ));
        assert!(matches!(
            JsonResultCodec.decode_result(b"\x00\x01"),
            Err(CodecError::Serde(_))
        ));
    }
}
