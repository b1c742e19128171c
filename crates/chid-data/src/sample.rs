//! Sample construction.

use crate::error::DataError;
use crate::tokenize::TextTokenizer;

/// One candidate substitution, ready for batching.
///
/// `input_ids` is the tokenized content plus the end-of-document marker with
/// the final position dropped; `labels` is the same sequence shifted left by
/// one; `loss_mask` weighs every surviving position at 1.0. The three are
/// always the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub sid: u32,
    pub cid: u32,
    pub input_ids: Vec<u32>,
    pub loss_mask: Vec<f32>,
    pub labels: Vec<u32>,
}

impl Sample {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Build one sample from one raw content string.
///
/// Tokenizer failures propagate; an empty encoding is rejected rather than
/// producing a zero-length sample, which the loss normalization downstream
/// could not represent.
pub fn build_sample(
    tokenizer: &dyn TextTokenizer,
    content: &str,
    sid: u32,
    cid: u32,
) -> Result<Sample, DataError> {
    let mut ids = tokenizer.encode(content)?;
    if ids.is_empty() {
        return Err(DataError::EmptySample { sid, cid });
    }
    ids.push(tokenizer.eod_id());

    let length = ids.len() - 1;
    let input_ids = ids[..length].to_vec();
    let labels = ids[1..].to_vec();

    Ok(Sample {
        sid,
        cid,
        input_ids,
        loss_mask: vec![1.0; length],
        labels,
    })
}
