//! Data-pipeline inspector.
//!
//! Loads the configured splits, drives the sharded loaders for one epoch
//! without a model, and prints dataset and batch statistics. The actual
//! fine-tuning loop is the library's `Finetuner`, which needs a `CausalLm`
//! from the surrounding framework.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use candle_core::Device;
use clap::Parser;

use chid_data::{ClozeDataset, HfTokenizer, IndexOrder, RawDataset, ShardedBatchSampler, TextTokenizer};
use chid_training::{
    config::{FinetuneConfig, FinetuneError},
    select_device, BatchCollator, BlockingDataLoader, ShardedClozeLoader,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect the CHID data pipeline", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "PATH", help = "Path to fine-tuning config file")]
    config: PathBuf,

    #[arg(long, help = "Override runtime.epochs")]
    epochs: Option<usize>,

    #[arg(long, help = "Override runtime.seed")]
    seed: Option<u64>,

    #[arg(long, help = "Override data.ratio")]
    ratio: Option<f64>,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("inspect failed: {}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<(), FinetuneError> {
    let args = Args::parse();

    let mut config = FinetuneConfig::load(&args.config)?;
    if let Some(epochs) = args.epochs {
        config.runtime.epochs = epochs;
    }
    if let Some(seed) = args.seed {
        config.runtime.seed = seed;
    }
    if let Some(ratio) = args.ratio {
        config.data.ratio = ratio;
    }
    config.validate()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::Relaxed);
    })
    .map_err(|err| FinetuneError::runtime(format!("failed to install signal handler: {}", err)))?;

    let tokenizer = HfTokenizer::from_file(
        &config.tokenizer.tokenizer_json,
        &config.tokenizer.pad_token,
        &config.tokenizer.eod_token,
    )?;
    println!(
        "tokenizer ready: vocab={} pad_id={} eod_id={}",
        tokenizer.vocab_size(),
        tokenizer.pad_id(),
        tokenizer.eod_id()
    );

    let device = select_device(config.runtime.seed);

    inspect_split(&config, &tokenizer, &device, Split::Train, &shutdown)?;
    inspect_split(&config, &tokenizer, &device, Split::Dev, &shutdown)?;

    Ok(())
}

#[derive(Clone, Copy)]
enum Split {
    Train,
    Dev,
}

impl Split {
    fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Dev => "dev",
        }
    }
}

fn inspect_split(
    config: &FinetuneConfig,
    tokenizer: &HfTokenizer,
    device: &Device,
    split: Split,
    shutdown: &AtomicBool,
) -> Result<(), FinetuneError> {
    let path = match split {
        Split::Train => &config.data.train,
        Split::Dev => &config.data.dev,
    };

    println!("loading {} split from {}", split.name(), path.display());
    let mut raw = RawDataset::from_path(path)?;
    if config.data.ratio < 1.0 {
        raw.truncate_to_ratio(config.data.ratio);
    }
    let dataset = Arc::new(ClozeDataset::from_raw(&raw, tokenizer)?);
    if let Some(truth) = dataset.truth_labels() {
        println!("{} split: {} samples over {} questions", split.name(), dataset.len(), truth.len());
    } else {
        println!("{} split: {} samples", split.name(), dataset.len());
    }

    let order = match split {
        Split::Train => IndexOrder::Shuffled {
            seed: config.runtime.seed,
        },
        Split::Dev => IndexOrder::Sequential,
    };
    let sampler = ShardedBatchSampler::new(
        dataset.len(),
        config.batching.batch_size,
        config.distributed.world_size,
        config.distributed.rank,
        order,
    )?;
    let dropped = dataset.len() - sampler.steps_per_epoch() * sampler.global_batch_size();
    println!(
        "{} sampler: {} steps/epoch, global batch {}, {} trailing sample(s) dropped",
        split.name(),
        sampler.steps_per_epoch(),
        sampler.global_batch_size(),
        dropped
    );

    let collator = BatchCollator::new(
        tokenizer.pad_id(),
        config.batching.pad_to,
        config.runtime.precision.mask_dtype(),
        device.clone(),
    );
    let mut loader =
        BlockingDataLoader::new(ShardedClozeLoader::new(dataset, sampler, collator));

    let mut steps = 0usize;
    let mut first_shape: Option<Vec<usize>> = None;
    while let Some(batch) = loader.next_batch()? {
        if shutdown.load(Ordering::Relaxed) {
            println!("interrupted; stopping after {} step(s)", steps);
            break;
        }
        if first_shape.is_none() {
            first_shape = Some(batch.model.input_ids.dims().to_vec());
            println!(
                "first {} batch: input_ids {:?}, attention_mask {:?}, position_ids {:?}",
                split.name(),
                batch.model.input_ids.dims(),
                batch.model.attention_mask.dims(),
                batch.model.position_ids.dims()
            );
        }
        steps += 1;
    }
    println!("{} loader produced {} batch(es)", split.name(), steps);

    Ok(())
}
