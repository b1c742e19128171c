//! Fine-tuning driver.
//!
//! One `Finetuner` per shard. Each epoch runs a full training pass over the
//! shard's slice of the shuffled training split, then an evaluation pass
//! over its slice of the dev split, gathers per-candidate losses across the
//! group, and scores them. Collective calls are the only synchronization
//! points; every shard must run the same number of steps, which the
//! sampler's drop-last contract guarantees.

use std::sync::Arc;

use candle_core::{
    utils::{cuda_is_available, metal_is_available},
    Device,
};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};

use chid_data::{ClozeDataset, IndexOrder, ShardedBatchSampler};

use crate::{
    collator::{to_runtime_error, BatchCollator},
    collective::Collective,
    config::{FinetuneConfig, FinetuneError},
    eval::{EvalAggregator, EvalReport},
    loader::{BlockingDataLoader, ClozeBatch, ShardedClozeLoader},
    logging::{Logger, LoggingSettings},
    loss::MaskedCrossEntropy,
    metrics::TrainingMetrics,
    model::CausalLm,
};

pub struct Finetuner<M, C>
where
    M: CausalLm,
    C: Collective,
{
    model: M,
    collective: C,
    optimizer: AdamW,
    loss: MaskedCrossEntropy,
    aggregator: EvalAggregator,
    train_loader: BlockingDataLoader<ShardedClozeLoader>,
    dev_loader: BlockingDataLoader<ShardedClozeLoader>,
    truth_labels: Vec<u32>,
    epochs: usize,
    log_every: usize,
    metrics: TrainingMetrics,
    logger: Logger,
}

impl<M, C> Finetuner<M, C>
where
    M: CausalLm,
    C: Collective,
{
    pub fn new(
        config: &FinetuneConfig,
        device: Device,
        pad_id: u32,
        train: Arc<ClozeDataset>,
        dev: Arc<ClozeDataset>,
        model: M,
        collective: C,
    ) -> Result<Self, FinetuneError> {
        config.validate()?;

        if collective.world_size() != config.distributed.world_size
            || collective.rank() != config.distributed.rank
        {
            return Err(FinetuneError::initialization(format!(
                "collective reports rank {}/{} but the configuration says {}/{}",
                collective.rank(),
                collective.world_size(),
                config.distributed.rank,
                config.distributed.world_size
            )));
        }

        let truth_labels = dev
            .truth_labels()
            .ok_or_else(|| {
                FinetuneError::initialization("dev split carries no ground-truth labels")
            })?
            .to_vec();

        let variables = model.trainable_variables();
        if variables.is_empty() {
            return Err(FinetuneError::initialization(
                "model produced no trainable parameters",
            ));
        }
        let optimizer = AdamW::new(
            variables,
            ParamsAdamW {
                lr: config.optimizer.learning_rate,
                beta1: config.optimizer.beta1,
                beta2: config.optimizer.beta2,
                eps: config.optimizer.epsilon,
                weight_decay: config.optimizer.weight_decay,
            },
        )
        .map_err(to_runtime_error)?;

        let collator = BatchCollator::new(
            pad_id,
            config.batching.pad_to,
            config.runtime.precision.mask_dtype(),
            device.clone(),
        );

        let train_sampler = ShardedBatchSampler::new(
            train.len(),
            config.batching.batch_size,
            config.distributed.world_size,
            config.distributed.rank,
            IndexOrder::Shuffled {
                seed: config.runtime.seed,
            },
        )?;
        let dev_sampler = ShardedBatchSampler::new(
            dev.len(),
            config.batching.batch_size,
            config.distributed.world_size,
            config.distributed.rank,
            IndexOrder::Sequential,
        )?;

        if train_sampler.steps_per_epoch() == 0 {
            return Err(FinetuneError::initialization(
                "training split is smaller than one global batch",
            ));
        }

        let train_loader = BlockingDataLoader::new(ShardedClozeLoader::new(
            train,
            train_sampler,
            collator.clone(),
        ));
        let dev_loader =
            BlockingDataLoader::new(ShardedClozeLoader::new(dev, dev_sampler, collator));

        let logger = Logger::new(LoggingSettings::from_config(
            config.runtime.logging.enable_stdout && collective.rank() == 0,
            config
                .runtime
                .logging
                .metrics_file
                .clone()
                .filter(|_| collective.rank() == 0),
            config.runtime.logging.metrics_flush_every_n,
        ))?;

        Ok(Self {
            model,
            collective,
            optimizer,
            loss: MaskedCrossEntropy::new(),
            aggregator: EvalAggregator::new(),
            train_loader,
            dev_loader,
            truth_labels,
            epochs: config.runtime.epochs,
            log_every: config.runtime.log_every_n_steps.max(1),
            metrics: TrainingMetrics::new(),
            logger,
        })
    }

    /// Fine-tune for the configured number of epochs, evaluating after
    /// each. Returns one report per completed evaluation pass.
    pub fn run(&mut self) -> Result<Vec<EvalReport>, FinetuneError> {
        self.run_with_shutdown(|| false)
    }

    pub fn run_with_shutdown<F>(&mut self, mut should_stop: F) -> Result<Vec<EvalReport>, FinetuneError>
    where
        F: FnMut() -> bool,
    {
        let mut reports = Vec::with_capacity(self.epochs);

        for epoch in 0..self.epochs {
            self.train_epoch(epoch, &mut should_stop)?;
            if should_stop() {
                break;
            }
            reports.push(self.evaluate(epoch)?);
        }

        self.logger.flush();
        Ok(reports)
    }

    /// One full training pass over this shard's slice of the epoch.
    pub fn train_epoch<F>(&mut self, epoch: usize, should_stop: &mut F) -> Result<(), FinetuneError>
    where
        F: FnMut() -> bool,
    {
        self.train_loader.inner_mut().start_epoch(epoch);

        while let Some(batch) = self.train_loader.next_batch()? {
            if should_stop() {
                break;
            }
            self.train_step(epoch, &batch)?;
        }

        Ok(())
    }

    fn train_step(&mut self, epoch: usize, batch: &ClozeBatch) -> Result<(), FinetuneError> {
        let logits = self.model.forward(&batch.model).map_err(to_runtime_error)?;
        let token_losses = self.loss.token_losses(&logits, &batch.side.labels)?;
        let mean = self.loss.mean_loss(&token_losses, &batch.side.loss_mask)?;

        self.optimizer
            .backward_step(&mean.loss)
            .map_err(to_runtime_error)?;

        // Cross-shard average for reporting only; gradients are per-shard.
        let reported = self.collective.all_reduce_mean(mean.value as f64)?;
        let snapshot = self.metrics.record_step(mean.tokens as u64, reported);
        if batch.step % self.log_every == 0 {
            self.logger.log_training_step(epoch, batch.step, &snapshot);
        }

        Ok(())
    }

    /// One evaluation pass: per-sequence losses on this shard, an
    /// all-gather, then aggregation. Every shard computes the same report;
    /// only shard 0 logs it.
    pub fn evaluate(&mut self, epoch: usize) -> Result<EvalReport, FinetuneError> {
        let mut sids = Vec::new();
        let mut cids = Vec::new();
        let mut losses = Vec::new();

        self.dev_loader.inner_mut().start_epoch(0);
        while let Some(batch) = self.dev_loader.next_batch()? {
            let logits = self.model.forward(&batch.model).map_err(to_runtime_error)?;
            let token_losses = self.loss.token_losses(&logits, &batch.side.labels)?;
            let row_losses = self
                .loss
                .per_sequence(&token_losses, &batch.side.loss_mask)?;

            sids.extend_from_slice(&batch.side.sids);
            cids.extend_from_slice(&batch.side.cids);
            losses.extend(row_losses);
        }

        let all_sids = self.collective.all_gather_u32(&sids)?;
        let all_cids = self.collective.all_gather_u32(&cids)?;
        let all_losses = self.collective.all_gather_f32(&losses)?;

        let report = self
            .aggregator
            .aggregate(&all_sids, &all_cids, &all_losses, &self.truth_labels)?;

        // The logger was built rank-aware; only shard 0 emits output.
        self.logger.log_evaluation(epoch, &report);

        Ok(report)
    }

    pub fn model(&self) -> &M {
        &self.model
    }
}

/// Pick the best available device, preferring Metal, then CUDA, then CPU.
pub fn select_device(seed: u64) -> Device {
    let device = if metal_is_available() {
        match Device::new_metal(0) {
            Ok(device) => device,
            Err(err) => {
                eprintln!("failed to initialize metal device, falling back to CPU: {}", err);
                Device::Cpu
            }
        }
    } else if cuda_is_available() {
        match Device::cuda_if_available(0) {
            Ok(device) => device,
            Err(err) => {
                eprintln!("cuda reported available but initialization failed: {}", err);
                Device::Cpu
            }
        }
    } else {
        Device::Cpu
    };

    if let Err(err) = device.set_seed(seed) {
        eprintln!("warning: failed to seed device RNG: {}", err);
    }
    device
}
