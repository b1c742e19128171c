//! Raw CHID input files.
//!
//! Each split is a single JSON object of parallel arrays:
//! `{"contents": [...], "sids": [...], "cids": [...], "labels": [...]}`.
//! `labels` maps a question id to the index of its correct candidate and is
//! absent (or empty) for the training split.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::DataError;

#[derive(Debug, Clone, Deserialize)]
pub struct RawDataset {
    pub contents: Vec<String>,
    pub sids: Vec<u32>,
    pub cids: Vec<u32>,
    #[serde(default)]
    pub labels: Vec<u32>,
}

impl RawDataset {
    /// Load and validate a split file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let contents = fs::read_to_string(path.as_ref())?;
        let raw: RawDataset = serde_json::from_str(&contents)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    pub fn has_labels(&self) -> bool {
        !self.labels.is_empty()
    }

    /// Keep only the leading `ratio` fraction of the samples, for
    /// fine-tuning on a subset of the corpus. `ratio` is expected to be
    /// in `(0, 1]`.
    pub fn truncate_to_ratio(&mut self, ratio: f64) {
        let keep = (ratio * self.contents.len() as f64) as usize;
        self.contents.truncate(keep);
        self.sids.truncate(keep);
        self.cids.truncate(keep);
    }

    pub fn validate(&self) -> Result<(), DataError> {
        let mut errors = Vec::new();

        if self.sids.len() != self.contents.len() {
            errors.push(format!(
                "sids has {} entries but contents has {}",
                self.sids.len(),
                self.contents.len()
            ));
        }
        if self.cids.len() != self.contents.len() {
            errors.push(format!(
                "cids has {} entries but contents has {}",
                self.cids.len(),
                self.contents.len()
            ));
        }

        for (index, content) in self.contents.iter().enumerate() {
            if content.trim().is_empty() {
                errors.push(format!("contents[{}] is empty", index));
            }
        }

        if !self.labels.is_empty() {
            if let Some(bad) = self
                .sids
                .iter()
                .find(|&&sid| sid as usize >= self.labels.len())
            {
                errors.push(format!(
                    "sid {} is out of range for {} labels",
                    bad,
                    self.labels.len()
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataError::schema(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_fixture(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_dev_split() {
        let file = write_fixture(
            r#"{"contents": ["a b", "a c"], "sids": [0, 0], "cids": [0, 1], "labels": [1]}"#,
        );
        let raw = RawDataset::from_path(file.path()).unwrap();
        assert_eq!(raw.len(), 2);
        assert!(raw.has_labels());
    }

    #[test]
    fn train_split_without_labels() {
        let file =
            write_fixture(r#"{"contents": ["a"], "sids": [0], "cids": [0], "labels": []}"#);
        let raw = RawDataset::from_path(file.path()).unwrap();
        assert!(!raw.has_labels());
    }

    #[test]
    fn rejects_mismatched_arrays() {
        let file = write_fixture(r#"{"contents": ["a", "b"], "sids": [0], "cids": [0, 1]}"#);
        let err = RawDataset::from_path(file.path()).unwrap_err();
        match err {
            DataError::Schema(messages) => {
                assert!(messages.iter().any(|m| m.contains("sids")));
            }
            other => panic!("expected schema error, got {}", other),
        }
    }

    #[test]
    fn rejects_empty_content() {
        let file = write_fixture(r#"{"contents": ["ok", "  "], "sids": [0, 1], "cids": [0, 0], "labels": [0, 0]}"#);
        assert!(RawDataset::from_path(file.path()).is_err());
    }

    #[test]
    fn rejects_sid_out_of_label_range() {
        let file = write_fixture(
            r#"{"contents": ["a", "b"], "sids": [0, 3], "cids": [0, 1], "labels": [1]}"#,
        );
        assert!(RawDataset::from_path(file.path()).is_err());
    }

    #[test]
    fn ratio_truncates_parallel_arrays() {
        let mut raw = RawDataset {
            contents: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            sids: vec![0, 1, 2, 3],
            cids: vec![0, 0, 0, 0],
            labels: Vec::new(),
        };
        raw.truncate_to_ratio(0.5);
        assert_eq!(raw.contents.len(), 2);
        assert_eq!(raw.sids, vec![0, 1]);
        assert_eq!(raw.cids.len(), 2);
    }
}
