//! Error types emitted by the data pipeline.

use std::fmt;

#[derive(Debug)]
pub enum DataError {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// The raw file violates the parallel-array schema.
    Schema(Vec<String>),
    /// The tokenizer rejected a file or an input string.
    Tokenize(String),
    /// A sample produced a zero-length token sequence.
    EmptySample { sid: u32, cid: u32 },
}

impl DataError {
    pub fn schema(messages: Vec<String>) -> Self {
        Self::Schema(messages)
    }

    pub fn tokenize(message: impl Into<String>) -> Self {
        Self::Tokenize(message.into())
    }
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Io(err) => write!(f, "failed to read data file: {}", err),
            DataError::Json(err) => write!(f, "failed to parse data file: {}", err),
            DataError::Schema(messages) => {
                write!(f, "invalid data file: {}", messages.join("; "))
            }
            DataError::Tokenize(msg) => write!(f, "tokenization failed: {}", msg),
            DataError::EmptySample { sid, cid } => {
                write!(f, "sample sid={} cid={} tokenized to an empty sequence", sid, cid)
            }
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Io(err) => Some(err),
            DataError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(value: std::io::Error) -> Self {
        DataError::Io(value)
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        DataError::Json(value)
    }
}
