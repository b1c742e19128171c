//! Batch collation.
//!
//! Gathers a set of samples into fixed-shape tensors. Two behaviors are
//! deliberate and must not change: the attention mask is one shared
//! lower-triangular causal mask that does not exclude padding positions,
//! and position ids run `0..M-1` for every row regardless of sample
//! length.

use candle_core::{DType, Device, Tensor};
use chid_data::Sample;
use serde::{Deserialize, Serialize};

use crate::config::FinetuneError;

/// Tensors consumed by the model forward pass.
#[derive(Debug, Clone)]
pub struct ModelBatch {
    /// `I64[B, M]`, padded with the pad id.
    pub input_ids: Tensor,
    /// `[1, 1, M, M]` lower-triangular ones in the configured mask dtype.
    pub attention_mask: Tensor,
    /// `I64[B, M]`, `0..M-1` per row.
    pub position_ids: Tensor,
}

/// Side channel that never enters the model.
#[derive(Debug, Clone)]
pub struct SideBatch {
    pub sids: Vec<u32>,
    pub cids: Vec<u32>,
    /// `F32[B, M]`, 1.0 over real positions, 0.0 over padding.
    pub loss_mask: Tensor,
    /// `I64[B, M]`, padded with the pad id.
    pub labels: Tensor,
}

/// Uniform pad length target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadTarget {
    /// Pad every batch to the dataset-wide maximum length, so all batches
    /// of a split share one shape. Memory-wasteful but shape-stable.
    DatasetMax,
    /// Pad each batch to its own longest sample.
    BatchMax,
}

impl Default for PadTarget {
    fn default() -> Self {
        PadTarget::DatasetMax
    }
}

#[derive(Debug, Clone)]
pub struct BatchCollator {
    pad_id: u32,
    pad_to: PadTarget,
    mask_dtype: DType,
    device: Device,
}

impl BatchCollator {
    pub fn new(pad_id: u32, pad_to: PadTarget, mask_dtype: DType, device: Device) -> Self {
        Self {
            pad_id,
            pad_to,
            mask_dtype,
            device,
        }
    }

    /// Collate samples of one dataset into a batch.
    ///
    /// `dataset_max` is the split-wide maximum sample length; it is the pad
    /// target under [`PadTarget::DatasetMax`] and an upper bound otherwise.
    pub fn collate(
        &self,
        samples: &[&Sample],
        dataset_max: usize,
    ) -> Result<(ModelBatch, SideBatch), FinetuneError> {
        if samples.is_empty() {
            return Err(FinetuneError::runtime("cannot collate an empty batch"));
        }

        let batch_max = samples.iter().map(|s| s.len()).max().unwrap_or(0);
        let target = match self.pad_to {
            PadTarget::DatasetMax => dataset_max,
            PadTarget::BatchMax => batch_max,
        };
        if batch_max > target {
            return Err(FinetuneError::runtime(format!(
                "sample of length {} exceeds pad target {}",
                batch_max, target
            )));
        }

        let bs = samples.len();
        let pad = self.pad_id as i64;
        let mut input_ids = vec![pad; bs * target];
        let mut labels = vec![pad; bs * target];
        let mut loss_mask = vec![0f32; bs * target];
        let mut sids = Vec::with_capacity(bs);
        let mut cids = Vec::with_capacity(bs);

        for (row, sample) in samples.iter().enumerate() {
            let start = row * target;
            for (offset, &id) in sample.input_ids.iter().enumerate() {
                input_ids[start + offset] = id as i64;
            }
            for (offset, &id) in sample.labels.iter().enumerate() {
                labels[start + offset] = id as i64;
            }
            loss_mask[start..start + sample.len()].copy_from_slice(&sample.loss_mask);
            sids.push(sample.sid);
            cids.push(sample.cid);
        }

        let input_ids =
            Tensor::from_vec(input_ids, (bs, target), &self.device).map_err(to_runtime_error)?;
        let labels =
            Tensor::from_vec(labels, (bs, target), &self.device).map_err(to_runtime_error)?;
        let loss_mask =
            Tensor::from_vec(loss_mask, (bs, target), &self.device).map_err(to_runtime_error)?;

        let attention_mask = build_causal_mask(&self.device, target, self.mask_dtype)?;
        let position_ids = build_position_ids(&self.device, bs, target)?;

        Ok((
            ModelBatch {
                input_ids,
                attention_mask,
                position_ids,
            },
            SideBatch {
                sids,
                cids,
                loss_mask,
                labels,
            },
        ))
    }
}

/// Shared causal mask `[1, 1, max_size, max_size]`: 1.0 where key index
/// `j <= i`, 0.0 elsewhere. Padding positions are not masked out.
pub fn build_causal_mask(
    device: &Device,
    max_size: usize,
    dtype: DType,
) -> Result<Tensor, FinetuneError> {
    let mut data = vec![0f32; max_size * max_size];
    for i in 0..max_size {
        let row = i * max_size;
        for j in 0..=i {
            data[row + j] = 1.0;
        }
    }

    Tensor::from_vec(data, (1, 1, max_size, max_size), device)
        .and_then(|mask| mask.to_dtype(dtype))
        .map_err(to_runtime_error)
}

/// Absolute position ids `0..max_size-1`, repeated for every row.
pub fn build_position_ids(
    device: &Device,
    batch_size: usize,
    max_size: usize,
) -> Result<Tensor, FinetuneError> {
    let mut data = Vec::with_capacity(batch_size * max_size);
    for _ in 0..batch_size {
        data.extend(0..max_size as i64);
    }
    Tensor::from_vec(data, (batch_size, max_size), device).map_err(to_runtime_error)
}

pub(crate) fn to_runtime_error(err: candle_core::Error) -> FinetuneError {
    FinetuneError::runtime(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(sid: u32, cid: u32, ids: &[u32]) -> Sample {
        Sample {
            sid,
            cid,
            input_ids: ids.to_vec(),
            loss_mask: vec![1.0; ids.len()],
            labels: ids.iter().map(|&id| id + 1).collect(),
        }
    }

    fn collator(pad_to: PadTarget) -> BatchCollator {
        BatchCollator::new(0, pad_to, DType::F32, Device::Cpu)
    }

    #[test]
    fn shapes_follow_dataset_max() {
        let a = sample(0, 0, &[5, 6]);
        let b = sample(0, 1, &[7, 8, 9]);
        let (model, side) = collator(PadTarget::DatasetMax)
            .collate(&[&a, &b], 7)
            .unwrap();

        assert_eq!(model.input_ids.dims(), &[2, 7]);
        assert_eq!(model.attention_mask.dims(), &[1, 1, 7, 7]);
        assert_eq!(model.position_ids.dims(), &[2, 7]);
        assert_eq!(side.labels.dims(), &[2, 7]);
        assert_eq!(side.loss_mask.dims(), &[2, 7]);
        assert_eq!(side.sids, vec![0, 0]);
        assert_eq!(side.cids, vec![0, 1]);
    }

    #[test]
    fn rows_are_left_aligned_with_pad_tail() {
        let a = sample(1, 0, &[5, 6]);
        let (model, side) = collator(PadTarget::DatasetMax).collate(&[&a], 4).unwrap();

        let ids: Vec<i64> = model.input_ids.to_vec2::<i64>().unwrap().remove(0);
        assert_eq!(ids, vec![5, 6, 0, 0]);
        let labels: Vec<i64> = side.labels.to_vec2::<i64>().unwrap().remove(0);
        assert_eq!(labels, vec![6, 7, 0, 0]);
        let mask: Vec<f32> = side.loss_mask.to_vec2::<f32>().unwrap().remove(0);
        assert_eq!(mask, vec![1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn batch_max_padding_shrinks_to_longest_sample() {
        let a = sample(0, 0, &[5, 6]);
        let b = sample(0, 1, &[7, 8, 9]);
        let (model, _) = collator(PadTarget::BatchMax).collate(&[&a, &b], 100).unwrap();
        assert_eq!(model.input_ids.dims(), &[2, 3]);
    }

    #[test]
    fn causal_mask_is_lower_triangular_ones() {
        let mask = build_causal_mask(&Device::Cpu, 4, DType::F32).unwrap();
        let rows = mask
            .reshape((4, 4))
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        for (i, row) in rows.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                let expected = if j <= i { 1.0 } else { 0.0 };
                assert_eq!(value, expected, "mask[{}, {}]", i, j);
            }
        }
    }

    #[test]
    fn position_ids_are_absolute_per_row() {
        let pos = build_position_ids(&Device::Cpu, 2, 3).unwrap();
        assert_eq!(
            pos.to_vec2::<i64>().unwrap(),
            vec![vec![0, 1, 2], vec![0, 1, 2]]
        );
    }

    #[test]
    fn oversized_sample_is_rejected() {
        let a = sample(0, 0, &[1, 2, 3, 4]);
        assert!(collator(PadTarget::DatasetMax).collate(&[&a], 3).is_err());
    }

    #[test]
    fn empty_batch_is_rejected() {
        assert!(collator(PadTarget::DatasetMax).collate(&[], 3).is_err());
    }
}
