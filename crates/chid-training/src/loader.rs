//! Batch loading.

use std::sync::Arc;

use futures::future::BoxFuture;

use chid_data::{ClozeDataset, Sample, ShardedBatchSampler};

use crate::collator::{BatchCollator, ModelBatch, SideBatch};
use crate::config::FinetuneError;

/// Result alias for loader fallible operations.
pub type Result<T> = std::result::Result<T, FinetuneError>;

/// One step's worth of tensors for this shard.
#[derive(Debug, Clone)]
pub struct ClozeBatch {
    pub model: ModelBatch,
    pub side: SideBatch,
    pub step: usize,
    pub epoch: usize,
}

/// Asynchronous-compatible loader abstraction.
pub trait DataLoader: Send {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<ClozeBatch>>>;
}

/// Blocking adapter around an async-friendly loader.
pub struct BlockingDataLoader<L>
where
    L: DataLoader,
{
    inner: L,
}

impl<L> BlockingDataLoader<L>
where
    L: DataLoader,
{
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    pub fn next_batch(&mut self) -> Result<Option<ClozeBatch>> {
        futures::executor::block_on(self.inner.next_batch())
    }

    pub fn inner_mut(&mut self) -> &mut L {
        &mut self.inner
    }

    pub fn into_inner(self) -> L {
        self.inner
    }
}

/// Loader over one shard's slice of a dataset epoch.
///
/// Drains the sampler's per-step index slices in order and collates each
/// slice into tensors. Yields `None` at the end of the epoch; the caller
/// advances with [`start_epoch`](ShardedClozeLoader::start_epoch).
pub struct ShardedClozeLoader {
    dataset: Arc<ClozeDataset>,
    sampler: ShardedBatchSampler,
    collator: BatchCollator,
    slices: Vec<Vec<usize>>,
    cursor: usize,
    epoch: usize,
}

impl ShardedClozeLoader {
    pub fn new(
        dataset: Arc<ClozeDataset>,
        sampler: ShardedBatchSampler,
        collator: BatchCollator,
    ) -> Self {
        let slices = sampler.shard_slices(0);
        Self {
            dataset,
            sampler,
            collator,
            slices,
            cursor: 0,
            epoch: 0,
        }
    }

    pub fn start_epoch(&mut self, epoch: usize) {
        self.slices = self.sampler.shard_slices(epoch);
        self.cursor = 0;
        self.epoch = epoch;
    }

    pub fn steps_per_epoch(&self) -> usize {
        self.sampler.steps_per_epoch()
    }

    pub fn dataset(&self) -> &ClozeDataset {
        &self.dataset
    }

    fn build_batch(&mut self) -> Result<Option<ClozeBatch>> {
        if self.cursor >= self.slices.len() {
            return Ok(None);
        }

        let indices = &self.slices[self.cursor];
        let samples: Vec<&Sample> = indices.iter().map(|&i| self.dataset.get(i)).collect();
        let (model, side) = self.collator.collate(&samples, self.dataset.max_size())?;

        let step = self.cursor;
        self.cursor += 1;

        Ok(Some(ClozeBatch {
            model,
            side,
            step,
            epoch: self.epoch,
        }))
    }
}

impl DataLoader for ShardedClozeLoader {
    fn next_batch(&mut self) -> BoxFuture<'_, Result<Option<ClozeBatch>>> {
        Box::pin(async move { self.build_batch() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use chid_data::{IndexOrder, RawDataset};

    use crate::collator::PadTarget;

    struct OneToOneTokenizer;

    impl chid_data::TextTokenizer for OneToOneTokenizer {
        fn encode(&self, text: &str) -> std::result::Result<Vec<u32>, chid_data::DataError> {
            Ok(text.bytes().map(|b| b as u32 + 2).collect())
        }

        fn decode(&self, _ids: &[u32]) -> std::result::Result<String, chid_data::DataError> {
            Ok(String::new())
        }

        fn pad_id(&self) -> u32 {
            0
        }

        fn eod_id(&self) -> u32 {
            1
        }
    }

    fn dataset(n: usize) -> Arc<ClozeDataset> {
        let raw = RawDataset {
            contents: (0..n).map(|i| format!("sample {}", i)).collect(),
            sids: (0..n as u32).collect(),
            cids: vec![0; n],
            labels: Vec::new(),
        };
        Arc::new(ClozeDataset::from_raw(&raw, &OneToOneTokenizer).unwrap())
    }

    #[test]
    fn drains_one_epoch_then_stops() {
        let dataset = dataset(10);
        let sampler =
            ShardedBatchSampler::new(dataset.len(), 2, 1, 0, IndexOrder::Sequential).unwrap();
        let collator = BatchCollator::new(0, PadTarget::DatasetMax, DType::F32, Device::Cpu);
        let mut loader =
            BlockingDataLoader::new(ShardedClozeLoader::new(dataset, sampler, collator));

        let mut steps = 0;
        while let Some(batch) = loader.next_batch().unwrap() {
            assert_eq!(batch.side.sids.len(), 2);
            assert_eq!(batch.step, steps);
            steps += 1;
        }
        assert_eq!(steps, 5);
        assert!(loader.next_batch().unwrap().is_none());

        loader.inner_mut().start_epoch(1);
        assert!(loader.next_batch().unwrap().is_some());
    }

    #[test]
    fn shards_see_disjoint_sids() {
        let dataset = dataset(8);
        let collator = BatchCollator::new(0, PadTarget::DatasetMax, DType::F32, Device::Cpu);

        let mut seen = Vec::new();
        for rank in 0..2 {
            let sampler =
                ShardedBatchSampler::new(dataset.len(), 2, 2, rank, IndexOrder::Sequential)
                    .unwrap();
            let mut loader = BlockingDataLoader::new(ShardedClozeLoader::new(
                Arc::clone(&dataset),
                sampler,
                collator.clone(),
            ));
            while let Some(batch) = loader.next_batch().unwrap() {
                seen.extend(batch.side.sids);
            }
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<u32>>());
    }
}
