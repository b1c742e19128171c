//! Masked cross-entropy loss.

use candle_core::{DType, Tensor, D};
use candle_nn::ops;

use crate::collator::to_runtime_error;
use crate::config::FinetuneError;

/// Token-level cross entropy with a per-token weight mask.
///
/// The mask carries 1.0 over real positions and 0.0 over padding; losses
/// are normalized by the mask sum, never by the padded length.
#[derive(Debug, Clone, Default)]
pub struct MaskedCrossEntropy;

/// Scalar loss tensor plus its extracted value.
#[derive(Debug, Clone)]
pub struct MeanLoss {
    /// Scalar tensor, kept in the graph for the backward pass.
    pub loss: Tensor,
    pub value: f32,
    /// Number of positions the mask let through.
    pub tokens: usize,
}

impl MaskedCrossEntropy {
    pub fn new() -> Self {
        Self
    }

    /// Per-token negative log-likelihood, `F32[B, T]`.
    pub fn token_losses(&self, logits: &Tensor, labels: &Tensor) -> Result<Tensor, FinetuneError> {
        let (batch, time, vocab) = logits.dims3().map_err(|_| {
            FinetuneError::runtime("cross entropy expects [batch, time, vocab] logits")
        })?;
        if vocab == 0 {
            return Err(FinetuneError::runtime(
                "logits vocabulary dimension must be greater than zero",
            ));
        }
        let label_dims = labels.dims2().map_err(|_| {
            FinetuneError::runtime("cross entropy expects [batch, time] labels")
        })?;
        if label_dims != (batch, time) {
            return Err(FinetuneError::runtime(
                "label tensor must match logits batch/time dimensions",
            ));
        }

        let token_count = batch * time;
        let logits_flat = logits
            .to_dtype(DType::F32)
            .and_then(|l| l.reshape((token_count, vocab)))
            .map_err(to_runtime_error)?;
        let log_probs = ops::log_softmax(&logits_flat, D::Minus1).map_err(to_runtime_error)?;

        let labels_flat = labels
            .reshape((token_count,))
            .and_then(|l| l.to_dtype(DType::U32))
            .map_err(to_runtime_error)?;
        let label_indices = labels_flat.unsqueeze(1).map_err(to_runtime_error)?;

        log_probs
            .gather(&label_indices, 1)
            .and_then(|nll| nll.neg())
            .and_then(|nll| nll.squeeze(1))
            .and_then(|nll| nll.reshape((batch, time)))
            .map_err(to_runtime_error)
    }

    /// `sum(losses * mask) / sum(mask)` as a scalar for the backward pass.
    pub fn mean_loss(
        &self,
        token_losses: &Tensor,
        loss_mask: &Tensor,
    ) -> Result<MeanLoss, FinetuneError> {
        let weighted = (token_losses * loss_mask).map_err(to_runtime_error)?;
        let mask_sum = loss_mask
            .sum_all()
            .and_then(|s| s.to_vec0::<f32>())
            .map_err(to_runtime_error)?;
        if mask_sum <= 0.0 {
            return Err(FinetuneError::runtime(
                "loss mask sums to zero; no positions contribute to the loss",
            ));
        }

        let loss = weighted
            .sum_all()
            .and_then(|s| s.affine(1.0 / mask_sum as f64, 0.0))
            .map_err(to_runtime_error)?;
        let value = loss.to_vec0::<f32>().map_err(to_runtime_error)?;

        Ok(MeanLoss {
            loss,
            value,
            tokens: mask_sum.round() as usize,
        })
    }

    /// Row-wise `sum(losses * mask) / sum(mask)`, one scalar per sequence.
    pub fn per_sequence(
        &self,
        token_losses: &Tensor,
        loss_mask: &Tensor,
    ) -> Result<Vec<f32>, FinetuneError> {
        let weighted = (token_losses * loss_mask).map_err(to_runtime_error)?;
        let row_sums = weighted
            .sum(1)
            .and_then(|s| s.to_vec1::<f32>())
            .map_err(to_runtime_error)?;
        let mask_sums = loss_mask
            .sum(1)
            .and_then(|s| s.to_vec1::<f32>())
            .map_err(to_runtime_error)?;

        row_sums
            .iter()
            .zip(&mask_sums)
            .enumerate()
            .map(|(row, (&sum, &mask))| {
                if mask <= 0.0 {
                    Err(FinetuneError::runtime(format!(
                        "loss mask of batch row {} sums to zero",
                        row
                    )))
                } else {
                    Ok(sum / mask)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn logits_2x2x2(values: [[f32; 2]; 4]) -> Tensor {
        let flat: Vec<f32> = values.into_iter().flatten().collect();
        Tensor::from_vec(flat, (2, 2, 2), &Device::Cpu).unwrap()
    }

    #[test]
    fn token_losses_match_hand_computed_nll() {
        // Uniform logits: every token loss is ln(2).
        let logits = logits_2x2x2([[0.0, 0.0]; 4]);
        let labels = Tensor::from_vec(vec![0i64, 1, 1, 0], (2, 2), &Device::Cpu).unwrap();

        let losses = MaskedCrossEntropy::new()
            .token_losses(&logits, &labels)
            .unwrap();
        let rows = losses.to_vec2::<f32>().unwrap();
        for row in rows {
            for value in row {
                assert!((value - std::f32::consts::LN_2).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn mean_loss_normalizes_by_mask_sum() {
        let logits = logits_2x2x2([[0.0, 0.0]; 4]);
        let labels = Tensor::from_vec(vec![0i64, 0, 0, 0], (2, 2), &Device::Cpu).unwrap();
        let mask = Tensor::from_vec(vec![1f32, 0.0, 1.0, 0.0], (2, 2), &Device::Cpu).unwrap();

        let ce = MaskedCrossEntropy::new();
        let token_losses = ce.token_losses(&logits, &labels).unwrap();
        let mean = ce.mean_loss(&token_losses, &mask).unwrap();
        // Two masked-in positions, each ln(2).
        assert!((mean.value - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn per_sequence_divides_row_by_row() {
        let losses =
            Tensor::from_vec(vec![1f32, 3.0, 2.0, 2.0], (2, 2), &Device::Cpu).unwrap();
        let mask = Tensor::from_vec(vec![1f32, 1.0, 1.0, 0.0], (2, 2), &Device::Cpu).unwrap();

        let rows = MaskedCrossEntropy::new()
            .per_sequence(&losses, &mask)
            .unwrap();
        assert!((rows[0] - 2.0).abs() < 1e-6);
        assert!((rows[1] - 2.0).abs() < 1e-6);
    }

    #[test]
    fn zero_mask_is_an_error() {
        let losses = Tensor::from_vec(vec![1f32, 2.0], (1, 2), &Device::Cpu).unwrap();
        let mask = Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap();

        let ce = MaskedCrossEntropy::new();
        assert!(ce.mean_loss(&losses, &mask).is_err());
        assert!(ce.per_sequence(&losses, &mask).is_err());
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let logits = logits_2x2x2([[0.0, 0.0]; 4]);
        let labels = Tensor::from_vec(vec![0i64, 0, 0], (1, 3), &Device::Cpu).unwrap();
        assert!(MaskedCrossEntropy::new()
            .token_losses(&logits, &labels)
            .is_err());
    }
}
