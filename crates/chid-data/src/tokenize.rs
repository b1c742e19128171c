//! Tokenizer adapter.
//!
//! The tokenizer itself is an external dependency; this module pins down
//! the slice of its surface the pipeline needs (encode, decode, and the two
//! special ids) behind a trait so datasets and tests are not coupled to a
//! particular backend.

use std::path::Path;

use tokenizers::Tokenizer;

use crate::error::DataError;

pub trait TextTokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, DataError>;
    fn decode(&self, ids: &[u32]) -> Result<String, DataError>;
    /// Pad sentinel written into every padded batch position.
    fn pad_id(&self) -> u32;
    /// End-of-document marker appended to every sample.
    fn eod_id(&self) -> u32;
}

/// Adapter over a HuggingFace `tokenizers` tokenizer file.
pub struct HfTokenizer {
    inner: Tokenizer,
    pad_id: u32,
    eod_id: u32,
}

impl HfTokenizer {
    /// Load a tokenizer json and resolve the named pad / end-of-document
    /// special tokens. Missing specials are a configuration error, not a
    /// silent fallback.
    pub fn from_file(
        path: impl AsRef<Path>,
        pad_token: &str,
        eod_token: &str,
    ) -> Result<Self, DataError> {
        let path = path.as_ref();
        let inner = Tokenizer::from_file(path).map_err(|err| {
            DataError::tokenize(format!(
                "failed to load tokenizer {}: {}",
                path.display(),
                err
            ))
        })?;

        let pad_id = lookup_special(&inner, pad_token)?;
        let eod_id = lookup_special(&inner, eod_token)?;

        Ok(Self {
            inner,
            pad_id,
            eod_id,
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

fn lookup_special(tokenizer: &Tokenizer, token: &str) -> Result<u32, DataError> {
    tokenizer.token_to_id(token).ok_or_else(|| {
        DataError::schema(vec![format!(
            "special token '{}' is not present in the tokenizer vocabulary",
            token
        )])
    })
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, DataError> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|err| DataError::tokenize(err.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, DataError> {
        self.inner
            .decode(ids, true)
            .map_err(|err| DataError::tokenize(err.to_string()))
    }

    fn pad_id(&self) -> u32 {
        self.pad_id
    }

    fn eod_id(&self) -> u32 {
        self.eod_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn word_level_fixture() -> tempfile::NamedTempFile {
        let json = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": { "type": "Whitespace" },
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": { "<unk>": 0, "<pad>": 1, "<eod>": 2, "hello": 3, "world": 4 },
    "unk_token": "<unk>"
  }
}"#;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn resolves_special_tokens_and_encodes() {
        let file = word_level_fixture();
        let tokenizer = HfTokenizer::from_file(file.path(), "<pad>", "<eod>").unwrap();

        assert_eq!(tokenizer.pad_id(), 1);
        assert_eq!(tokenizer.eod_id(), 2);
        assert_eq!(tokenizer.encode("hello world").unwrap(), vec![3, 4]);
    }

    #[test]
    fn missing_special_token_is_an_error() {
        let file = word_level_fixture();
        assert!(HfTokenizer::from_file(file.path(), "<pad>", "<missing>").is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(HfTokenizer::from_file("/nonexistent/tokenizer.json", "<pad>", "<eod>").is_err());
    }
}
