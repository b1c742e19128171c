//! Model seam.
//!
//! The transformer itself lives in an external framework. The loops only
//! need a forward pass over one batch and the list of trainable variables
//! to hand the optimizer.

use candle_core::{Tensor, Var};

use crate::collator::ModelBatch;

pub trait CausalLm {
    /// Compute `[batch, time, vocab]` logits for one batch.
    fn forward(&self, batch: &ModelBatch) -> candle_core::Result<Tensor>;

    /// Variables the optimizer should update.
    fn trainable_variables(&self) -> Vec<Var>;
}
