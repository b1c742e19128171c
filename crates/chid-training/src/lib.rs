//! CHID cloze fine-tuning crate.
//!
//! Tensor-level half of the pipeline: batch collation, masked
//! cross-entropy, the collective and model seams, and the train/eval loops
//! with their evaluation aggregation.

pub mod collator;
pub mod collective;
pub mod config;
pub mod eval;
pub mod loader;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod trainer;

pub use collator::{BatchCollator, ModelBatch, PadTarget, SideBatch};
pub use collective::{Collective, SingleProcess, ThreadedCollective};
pub use config::{FinetuneConfig, FinetuneError, Precision};
pub use eval::{EvalAggregator, EvalReport};
pub use loader::{BlockingDataLoader, ClozeBatch, DataLoader, ShardedClozeLoader};
pub use logging::{Logger, LoggingSettings};
pub use loss::{MaskedCrossEntropy, MeanLoss};
pub use metrics::{StepSnapshot, TrainingMetrics};
pub use model::CausalLm;
pub use trainer::{select_device, Finetuner};
