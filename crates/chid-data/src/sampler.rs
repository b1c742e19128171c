//! Sharded batch sampling.
//!
//! Partitions one epoch's sample indices into equally sized per-shard
//! slices. A global batch is a contiguous window of the epoch order; shard
//! `r` owns the `r`-th contiguous sub-slice of each window. A trailing
//! window smaller than the global batch size is dropped, so every shard
//! sees the same number of steps and collective calls stay aligned.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::error::DataError;

/// Epoch ordering discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOrder {
    /// Fresh permutation per epoch, derived from `seed + epoch`. Training.
    Shuffled { seed: u64 },
    /// Identity order every epoch. Evaluation.
    Sequential,
}

#[derive(Debug, Clone)]
pub struct ShardedBatchSampler {
    dataset_len: usize,
    batch_size: usize,
    world_size: usize,
    rank: usize,
    order: IndexOrder,
}

impl ShardedBatchSampler {
    pub fn new(
        dataset_len: usize,
        batch_size: usize,
        world_size: usize,
        rank: usize,
        order: IndexOrder,
    ) -> Result<Self, DataError> {
        let mut errors = Vec::new();
        if batch_size == 0 {
            errors.push("batch_size must be greater than zero".to_string());
        }
        if world_size == 0 {
            errors.push("world_size must be greater than zero".to_string());
        }
        if world_size > 0 && rank >= world_size {
            errors.push(format!(
                "rank {} is out of range for world_size {}",
                rank, world_size
            ));
        }
        if !errors.is_empty() {
            return Err(DataError::schema(errors));
        }

        Ok(Self {
            dataset_len,
            batch_size,
            world_size,
            rank,
            order,
        })
    }

    /// Per-shard batch size. The global batch is `batch_size * world_size`.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn global_batch_size(&self) -> usize {
        self.batch_size * self.world_size
    }

    /// Steps per epoch after dropping the trailing incomplete global batch.
    pub fn steps_per_epoch(&self) -> usize {
        self.dataset_len / self.global_batch_size()
    }

    /// This shard's index slices for one epoch, in step order.
    pub fn shard_slices(&self, epoch: usize) -> Vec<Vec<usize>> {
        let order = self.epoch_order(epoch);
        let global = self.global_batch_size();
        let offset = self.rank * self.batch_size;

        (0..self.steps_per_epoch())
            .map(|step| {
                let window = &order[step * global..(step + 1) * global];
                window[offset..offset + self.batch_size].to_vec()
            })
            .collect()
    }

    fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset_len).collect();
        if let IndexOrder::Shuffled { seed } = self.order {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(len: usize, batch: usize, world: usize, rank: usize, order: IndexOrder) -> ShardedBatchSampler {
        ShardedBatchSampler::new(len, batch, world, rank, order).unwrap()
    }

    #[test]
    fn every_slice_has_batch_size_indices() {
        let s = sampler(23, 2, 3, 1, IndexOrder::Shuffled { seed: 9 });
        // global batch 6, 23 / 6 = 3 steps, 5 trailing indices dropped.
        let slices = s.shard_slices(0);
        assert_eq!(slices.len(), 3);
        assert!(slices.iter().all(|slice| slice.len() == 2));
    }

    #[test]
    fn union_is_truncated_permutation() {
        let len = 23;
        let (batch, world) = (2, 3);
        let order = IndexOrder::Shuffled { seed: 9 };

        let mut seen = Vec::new();
        for rank in 0..world {
            for slice in sampler(len, batch, world, rank, order).shard_slices(4) {
                seen.extend(slice);
            }
        }

        let global = batch * world;
        assert_eq!(seen.len(), (len / global) * global);
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), seen.len(), "an index was produced twice");
        assert!(seen.iter().all(|&i| i < len));
    }

    #[test]
    fn sequential_order_is_identity() {
        let s = sampler(8, 2, 2, 0, IndexOrder::Sequential);
        assert_eq!(s.shard_slices(0), vec![vec![0, 1], vec![4, 5]]);
        let s1 = sampler(8, 2, 2, 1, IndexOrder::Sequential);
        assert_eq!(s1.shard_slices(0), vec![vec![2, 3], vec![6, 7]]);
    }

    #[test]
    fn shuffle_is_deterministic_per_seed_and_epoch() {
        let order = IndexOrder::Shuffled { seed: 17 };
        let a = sampler(50, 4, 1, 0, order).shard_slices(2);
        let b = sampler(50, 4, 1, 0, order).shard_slices(2);
        let c = sampler(50, 4, 1, 0, order).shard_slices(3);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dataset_smaller_than_global_batch_yields_no_steps() {
        let s = sampler(5, 4, 2, 0, IndexOrder::Sequential);
        assert_eq!(s.steps_per_epoch(), 0);
        assert!(s.shard_slices(0).is_empty());
    }

    #[test]
    fn rejects_rank_out_of_range() {
        assert!(ShardedBatchSampler::new(10, 2, 2, 2, IndexOrder::Sequential).is_err());
    }
}
