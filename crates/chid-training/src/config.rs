//! Fine-tuning configuration.
//!
//! One immutable struct, loaded from TOML or JSON, validated up front, and
//! passed by reference to every component constructor. There is no mutable
//! process-wide configuration state.

use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use candle_core::DType;
use chid_data::DataError;
use serde::{Deserialize, Serialize};

use crate::collator::PadTarget;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinetuneConfig {
    pub data: DataConfig,
    pub tokenizer: TokenizerConfig,
    #[serde(default)]
    pub batching: BatchingConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub distributed: DistributedConfig,
}

impl FinetuneConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FinetuneError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config: FinetuneConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") | Some("tml") | None => toml::from_str(&contents)?,
            Some(other) => {
                return Err(FinetuneError::ConfigFormat(format!(
                    "unsupported configuration extension '{}'",
                    other
                )));
            }
        };

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_base_path(base_dir);
        config.validate()?;

        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FinetuneError> {
        Self::from_path(path)
    }

    pub fn validate(&self) -> Result<(), FinetuneError> {
        let mut errors = Vec::new();

        if self.data.train.as_os_str().is_empty() {
            errors.push("data.train must not be empty".to_string());
        }
        if self.data.dev.as_os_str().is_empty() {
            errors.push("data.dev must not be empty".to_string());
        }
        if !(self.data.ratio > 0.0 && self.data.ratio <= 1.0) {
            errors.push("data.ratio must be in (0, 1]".to_string());
        }

        if self.tokenizer.tokenizer_json.as_os_str().is_empty() {
            errors.push("tokenizer.tokenizer_json must not be empty".to_string());
        }
        if self.tokenizer.pad_token.is_empty() {
            errors.push("tokenizer.pad_token must not be empty".to_string());
        }
        if self.tokenizer.eod_token.is_empty() {
            errors.push("tokenizer.eod_token must not be empty".to_string());
        }

        if self.batching.batch_size == 0 {
            errors.push("batching.batch_size must be greater than 0".to_string());
        }

        if self.optimizer.learning_rate <= 0.0 {
            errors.push("optimizer.learning_rate must be greater than 0".to_string());
        }
        if self.optimizer.weight_decay < 0.0 {
            errors.push("optimizer.weight_decay must be >= 0".to_string());
        }
        if !(0.0 < self.optimizer.beta1 && self.optimizer.beta1 < 1.0) {
            errors.push("optimizer.beta1 must be in (0, 1)".to_string());
        }
        if !(0.0 < self.optimizer.beta2 && self.optimizer.beta2 < 1.0) {
            errors.push("optimizer.beta2 must be in (0, 1)".to_string());
        }

        if self.runtime.epochs == 0 {
            errors.push("runtime.epochs must be greater than 0".to_string());
        }
        if self.runtime.log_every_n_steps == 0 {
            errors.push("runtime.log_every_n_steps must be greater than 0".to_string());
        }
        if self.runtime.logging.metrics_flush_every_n == 0 {
            errors.push("runtime.logging.metrics_flush_every_n must be greater than 0".to_string());
        }

        if self.distributed.world_size == 0 {
            errors.push("distributed.world_size must be greater than 0".to_string());
        }
        if self.distributed.world_size > 0 && self.distributed.rank >= self.distributed.world_size {
            errors.push(format!(
                "distributed.rank {} is out of range for world_size {}",
                self.distributed.rank, self.distributed.world_size
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FinetuneError::validation(errors))
        }
    }

    fn apply_base_path(&mut self, base: &Path) {
        absolutize_in_place(&mut self.data.train, base);
        absolutize_in_place(&mut self.data.dev, base);
        absolutize_in_place(&mut self.tokenizer.tokenizer_json, base);
        if let Some(path) = self.runtime.logging.metrics_file.as_mut() {
            absolutize_in_place(path, base);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub train: PathBuf,
    pub dev: PathBuf,
    /// Leading fraction of each split to keep.
    #[serde(default = "default_ratio")]
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    pub tokenizer_json: PathBuf,
    #[serde(default = "default_pad_token")]
    pub pad_token: String,
    #[serde(default = "default_eod_token")]
    pub eod_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Per-shard batch size; the global batch is `batch_size * world_size`.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub pad_to: PadTarget,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            pad_to: PadTarget::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_adam_eps")]
    pub epsilon: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_precision")]
    pub precision: Precision,
    #[serde(default = "default_log_every_n_steps")]
    pub log_every_n_steps: usize,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            epochs: default_epochs(),
            precision: default_precision(),
            log_every_n_steps: default_log_every_n_steps(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enable_stdout")]
    pub enable_stdout: bool,
    /// Optional JSONL metrics sink.
    #[serde(default)]
    pub metrics_file: Option<PathBuf>,
    #[serde(default = "default_metrics_flush_every_n")]
    pub metrics_flush_every_n: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable_stdout: default_enable_stdout(),
            metrics_file: None,
            metrics_flush_every_n: default_metrics_flush_every_n(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    #[serde(default = "default_world_size")]
    pub world_size: usize,
    #[serde(default)]
    pub rank: usize,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            world_size: default_world_size(),
            rank: 0,
        }
    }
}

/// Numeric precision for the attention mask tensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Fp32,
    Fp16,
    Bf16,
}

impl Precision {
    pub fn mask_dtype(self) -> DType {
        match self {
            Precision::Fp32 => DType::F32,
            Precision::Fp16 => DType::F16,
            Precision::Bf16 => DType::BF16,
        }
    }
}

impl Default for Precision {
    fn default() -> Self {
        Precision::Fp32
    }
}

fn absolutize_in_place(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

fn default_ratio() -> f64 {
    1.0
}

fn default_pad_token() -> String {
    "<pad>".to_string()
}

fn default_eod_token() -> String {
    "<eod>".to_string()
}

fn default_batch_size() -> usize {
    8
}

fn default_learning_rate() -> f64 {
    1e-5
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.95
}

fn default_adam_eps() -> f64 {
    1e-8
}

fn default_seed() -> u64 {
    42
}

fn default_epochs() -> usize {
    3
}

fn default_precision() -> Precision {
    Precision::Fp32
}

fn default_log_every_n_steps() -> usize {
    1
}

fn default_enable_stdout() -> bool {
    true
}

fn default_metrics_flush_every_n() -> usize {
    16
}

fn default_world_size() -> usize {
    1
}

#[derive(Debug)]
pub enum FinetuneError {
    Io(std::io::Error),
    ConfigFormat(String),
    Validation(Vec<String>),
    Initialization(String),
    Runtime(String),
    Data(DataError),
}

impl FinetuneError {
    pub fn initialization(message: impl Into<String>) -> Self {
        Self::Initialization(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }

    pub fn validation(messages: Vec<String>) -> Self {
        Self::Validation(messages)
    }
}

impl fmt::Display for FinetuneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinetuneError::Io(err) => write!(f, "failed to read config: {}", err),
            FinetuneError::ConfigFormat(err) => write!(f, "failed to parse config: {}", err),
            FinetuneError::Validation(messages) => {
                write!(f, "invalid configuration: {}", messages.join("; "))
            }
            FinetuneError::Initialization(msg) => {
                write!(f, "fine-tuner initialization failed: {}", msg)
            }
            FinetuneError::Runtime(msg) => write!(f, "fine-tuning failed: {}", msg),
            FinetuneError::Data(err) => write!(f, "data pipeline error: {}", err),
        }
    }
}

impl std::error::Error for FinetuneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FinetuneError::Io(err) => Some(err),
            FinetuneError::Data(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for FinetuneError {
    fn from(value: std::io::Error) -> Self {
        FinetuneError::Io(value)
    }
}

impl From<toml::de::Error> for FinetuneError {
    fn from(value: toml::de::Error) -> Self {
        FinetuneError::ConfigFormat(value.to_string())
    }
}

impl From<serde_json::Error> for FinetuneError {
    fn from(value: serde_json::Error) -> Self {
        FinetuneError::ConfigFormat(value.to_string())
    }
}

impl From<DataError> for FinetuneError {
    fn from(value: DataError) -> Self {
        FinetuneError::Data(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_toml() -> &'static str {
        r#"
[data]
train = "train.json"
dev = "dev.json"

[tokenizer]
tokenizer_json = "tokenizer.json"
"#
    }

    #[test]
    fn loads_minimal_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finetune.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(minimal_toml().as_bytes()).unwrap();

        let config = FinetuneConfig::load(&path).unwrap();
        assert_eq!(config.batching.batch_size, 8);
        assert_eq!(config.runtime.epochs, 3);
        assert_eq!(config.distributed.world_size, 1);
        assert_eq!(config.tokenizer.pad_token, "<pad>");
        // Relative paths are anchored at the config directory.
        assert!(config.data.train.starts_with(dir.path()));
    }

    #[test]
    fn validation_collects_all_errors() {
        let mut config: FinetuneConfig = toml::from_str(minimal_toml()).unwrap();
        config.batching.batch_size = 0;
        config.runtime.epochs = 0;
        config.distributed.rank = 5;

        match config.validate() {
            Err(FinetuneError::Validation(messages)) => {
                assert!(messages.len() >= 3, "got {:?}", messages);
            }
            other => panic!("expected validation error, got {:?}", other.err()),
        }
    }

    #[test]
    fn rejects_ratio_out_of_range() {
        let mut config: FinetuneConfig = toml::from_str(minimal_toml()).unwrap();
        config.data.ratio = 0.0;
        assert!(config.validate().is_err());
    }
}
