//! Training and evaluation logging.
//!
//! Stdout carries the two observable lines downstream tooling scrapes:
//! `train lm loss: <float>` per logged step and a bare accuracy float after
//! each evaluation pass. A JSONL metrics file can be enabled alongside for
//! structured consumers.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::config::FinetuneError;
use crate::eval::EvalReport;
use crate::metrics::StepSnapshot;

#[derive(Clone, Debug)]
pub struct LoggingSettings {
    pub enable_stdout: bool,
    pub metrics_file: Option<PathBuf>,
    pub metrics_flush_every_n: usize,
}

impl LoggingSettings {
    pub fn from_config(
        enable_stdout: bool,
        metrics_file: Option<PathBuf>,
        flush_every: usize,
    ) -> Self {
        Self {
            enable_stdout,
            metrics_file,
            metrics_flush_every_n: flush_every.max(1),
        }
    }
}

pub struct Logger {
    settings: LoggingSettings,
    metrics: Option<MetricsWriter>,
}

impl Logger {
    pub fn new(settings: LoggingSettings) -> Result<Self, FinetuneError> {
        let metrics = match settings.metrics_file.as_ref() {
            Some(path) => Some(MetricsWriter::create(
                path,
                settings.metrics_flush_every_n,
            )?),
            None => None,
        };
        Ok(Self { settings, metrics })
    }

    pub fn log_training_step(&mut self, epoch: usize, step: usize, snapshot: &StepSnapshot) {
        if self.settings.enable_stdout {
            println!("train lm loss: {}", snapshot.step_loss);
        }

        if let Some(writer) = self.metrics.as_mut() {
            let _ = writer.write_record(&MetricsRecord {
                kind: "train",
                epoch,
                step: Some(step),
                lm_loss: Some(snapshot.step_loss),
                lm_loss_ema: Some(snapshot.loss),
                tokens_per_sec: Some(snapshot.tokens_per_sec),
                accuracy: None,
                scored: None,
                missing: None,
            });
        }
    }

    pub fn log_evaluation(&mut self, epoch: usize, report: &EvalReport) {
        if self.settings.enable_stdout {
            println!("{}", report.accuracy);
        }

        if let Some(writer) = self.metrics.as_mut() {
            let _ = writer.write_record(&MetricsRecord {
                kind: "eval",
                epoch,
                step: None,
                lm_loss: None,
                lm_loss_ema: None,
                tokens_per_sec: None,
                accuracy: Some(report.accuracy),
                scored: Some(report.total),
                missing: Some(report.missing),
            });
        }
    }

    pub fn flush(&mut self) {
        if let Some(writer) = self.metrics.as_mut() {
            let _ = writer.flush();
        }
    }
}

#[derive(Serialize)]
struct MetricsRecord {
    kind: &'static str,
    epoch: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lm_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lm_loss_ema: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tokens_per_sec: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    scored: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    missing: Option<usize>,
}

struct MetricsWriter {
    writer: BufWriter<File>,
    flush_every: usize,
    pending: usize,
}

impl MetricsWriter {
    fn create(path: &Path, flush_every: usize) -> Result<Self, FinetuneError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| {
                    FinetuneError::runtime(format!(
                        "failed to create metrics directory {}: {}",
                        parent.display(),
                        err
                    ))
                })?;
            }
        }
        let file = File::create(path).map_err(|err| {
            FinetuneError::runtime(format!(
                "failed to create metrics file {}: {}",
                path.display(),
                err
            ))
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            flush_every: flush_every.max(1),
            pending: 0,
        })
    }

    fn write_record(&mut self, record: &MetricsRecord) -> Result<(), FinetuneError> {
        let mut line = serde_json::to_string(record)
            .map_err(|err| FinetuneError::runtime(format!("failed to encode metrics: {}", err)))?;
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .map_err(|err| FinetuneError::runtime(format!("failed to write metrics: {}", err)))?;

        self.pending += 1;
        if self.pending >= self.flush_every {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), FinetuneError> {
        self.writer
            .flush()
            .map_err(|err| FinetuneError::runtime(format!("failed to flush metrics: {}", err)))?;
        self.pending = 0;
        Ok(())
    }
}

impl Drop for MetricsWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
