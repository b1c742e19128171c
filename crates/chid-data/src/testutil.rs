//! Shared test fixtures.

use crate::error::DataError;
use crate::tokenize::TextTokenizer;

/// Byte-level tokenizer: id = byte + 2, pad = 0, eod = 1.
pub struct ByteTokenizer;

impl TextTokenizer for ByteTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, DataError> {
        Ok(text.bytes().map(|b| b as u32 + 2).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, DataError> {
        let bytes: Vec<u8> = ids
            .iter()
            .filter(|&&id| id >= 2)
            .map(|&id| (id - 2) as u8)
            .collect();
        String::from_utf8(bytes).map_err(|err| DataError::tokenize(err.to_string()))
    }

    fn pad_id(&self) -> u32 {
        0
    }

    fn eod_id(&self) -> u32 {
        1
    }
}
