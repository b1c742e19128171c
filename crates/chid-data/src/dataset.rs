//! In-memory cloze dataset.

use crate::error::DataError;
use crate::raw::RawDataset;
use crate::sample::{build_sample, Sample};
use crate::tokenize::TextTokenizer;

/// All samples of one split, tokenized once at startup and read-only after.
///
/// `max_size` is the longest sample length observed across the whole split
/// and stays fixed for the dataset's lifetime; the collator uses it as the
/// uniform pad target so every batch shares one shape.
pub struct ClozeDataset {
    samples: Vec<Sample>,
    sizes: Vec<usize>,
    max_size: usize,
    truth_labels: Option<Vec<u32>>,
}

impl ClozeDataset {
    /// Tokenize a validated raw split.
    ///
    /// Every process builds its own copy; there is no cross-process
    /// coordination and the redundant work is accepted for simplicity.
    pub fn from_raw(raw: &RawDataset, tokenizer: &dyn TextTokenizer) -> Result<Self, DataError> {
        let mut samples = Vec::with_capacity(raw.len());
        let mut sizes = Vec::with_capacity(raw.len());

        for ((content, &sid), &cid) in raw.contents.iter().zip(&raw.sids).zip(&raw.cids) {
            let sample = build_sample(tokenizer, content, sid, cid)?;
            sizes.push(sample.len());
            samples.push(sample);
        }

        if samples.is_empty() {
            return Err(DataError::schema(vec![
                "split contains no samples".to_string(),
            ]));
        }

        let max_size = sizes.iter().copied().max().unwrap_or(0);
        log_size_histogram(&sizes, max_size);

        let truth_labels = if raw.has_labels() {
            Some(raw.labels.clone())
        } else {
            None
        };

        Ok(Self {
            samples,
            sizes,
            max_size,
            truth_labels,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> &Sample {
        &self.samples[index]
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Ground-truth candidate index per question id; present for dev/test.
    pub fn truth_labels(&self) -> Option<&[u32]> {
        self.truth_labels.as_deref()
    }
}

fn log_size_histogram(sizes: &[usize], max_size: usize) {
    let over = |limit: usize| sizes.iter().filter(|&&s| s > limit).count();
    println!(
        "sequence sizes: n={} max={} over_256={} over_384={} over_512={}",
        sizes.len(),
        max_size,
        over(256),
        over(384),
        over(512)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::ByteTokenizer;

    fn raw(contents: &[&str], sids: &[u32], cids: &[u32], labels: &[u32]) -> RawDataset {
        RawDataset {
            contents: contents.iter().map(|s| s.to_string()).collect(),
            sids: sids.to_vec(),
            cids: cids.to_vec(),
            labels: labels.to_vec(),
        }
    }

    #[test]
    fn max_size_is_dataset_wide() {
        let raw = raw(
            &["ab", "abcdef", "abc"],
            &[0, 0, 1],
            &[0, 1, 0],
            &[1, 0],
        );
        let dataset = ClozeDataset::from_raw(&raw, &ByteTokenizer).unwrap();

        assert_eq!(dataset.len(), 3);
        // "abcdef" + eod, minus one dropped position.
        assert_eq!(dataset.max_size(), 6);
        assert_eq!(dataset.sizes(), &[2, 6, 3]);
        assert_eq!(dataset.truth_labels(), Some(&[1, 0][..]));
    }

    #[test]
    fn train_split_has_no_truth() {
        let raw = raw(&["abc"], &[0], &[0], &[]);
        let dataset = ClozeDataset::from_raw(&raw, &ByteTokenizer).unwrap();
        assert!(dataset.truth_labels().is_none());
    }

    #[test]
    fn empty_split_is_rejected() {
        let raw = raw(&[], &[], &[], &[]);
        assert!(ClozeDataset::from_raw(&raw, &ByteTokenizer).is_err());
    }
}
