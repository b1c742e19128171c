//! CHID cloze data handling crate.
//!
//! Takes the raw `{contents, sids, cids, labels}` JSON files through
//! tokenization into fixed-shape training samples, and partitions sample
//! indices across data-parallel shards.

pub mod dataset;
pub mod error;
pub mod raw;
pub mod sample;
pub mod sampler;
#[cfg(test)]
pub(crate) mod testutil;
pub mod tokenize;

pub use dataset::ClozeDataset;
pub use error::DataError;
pub use raw::RawDataset;
pub use sample::{build_sample, Sample};
pub use sampler::{IndexOrder, ShardedBatchSampler};
pub use tokenize::{HfTokenizer, TextTokenizer};
