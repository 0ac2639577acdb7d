//! Training-run telemetry.
//!
//! `TrainingLog` records what happened during a run and can dump it into a
//! run directory: one CSV per record kind plus the trainer configuration
//! and the trained model as JSON.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::network::{ClassCorrectness, Network};
use crate::network::sample::Sample;
use crate::train::events::{TrainingEvent, TrainingObserver};
use crate::train::train_config::CancelToken;
use crate::train::trainer::TrainerConfig;

/// Telemetry switches, as found in the trainer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Training samples drawn once per run to measure epoch loss and
    /// correctness.
    pub log_sample_count: usize,
    /// Keep one row per training sample. Off for large runs.
    #[serde(default)]
    pub record_samples: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord {
    pub epoch: usize,
    pub index: usize,
    pub loss: f64,
    pub learning_rate: f64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchRecord {
    pub epoch: usize,
    pub percent: f64,
    pub mean_loss: f64,
    pub learning_rate: f64,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Correctness on the log samples.
    pub correctness: f64,
    pub train_loss: f64,
    pub test_loss: Option<f64>,
    pub learning_rate: f64,
    pub elapsed_secs: f64,
}

/// Final per-class breakdown; `set` is `"train"` or `"test"`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRecord {
    pub set: &'static str,
    pub class: usize,
    pub correct: usize,
    pub total: usize,
}

pub struct TrainingLog {
    record_samples: bool,
    log_set: Vec<Sample>,
    test_set: Vec<Sample>,
    clock: Instant,
    pub samples: Vec<SampleRecord>,
    pub batches: Vec<BatchRecord>,
    pub epochs: Vec<EpochRecord>,
    pub classes: Vec<ClassRecord>,
    failure: Option<Error>,
}

impl TrainingLog {
    pub fn new(config: LoggingConfig, log_set: Vec<Sample>, test_set: Vec<Sample>) -> TrainingLog {
        TrainingLog {
            record_samples: config.record_samples,
            log_set,
            test_set,
            clock: Instant::now(),
            samples: Vec::new(),
            batches: Vec::new(),
            epochs: Vec::new(),
            classes: Vec::new(),
            failure: None,
        }
    }

    pub fn log_set(&self) -> &[Sample] {
        &self.log_set
    }

    /// Error raised while measuring an epoch, if any. The run was cancelled
    /// when it happened.
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    fn record_epoch(&mut self, epoch: usize, network: &Network) -> Result<()> {
        let test_loss = if self.test_set.is_empty() {
            None
        } else {
            Some(network.loss(&self.test_set)?)
        };
        self.epochs.push(EpochRecord {
            epoch,
            correctness: network.evaluate(&self.log_set)?,
            train_loss: network.loss(&self.log_set)?,
            test_loss,
            learning_rate: network.learning_rate,
            elapsed_secs: self.clock.elapsed().as_secs_f64(),
        });
        Ok(())
    }

    /// Records the per-class correctness of `network` on the full training
    /// set and on the test set.
    pub fn record_classes(&mut self, network: &Network, train_set: &[Sample]) -> Result<()> {
        self.classes.clear();
        let mut push = |set: &'static str, table: Vec<ClassCorrectness>| {
            for c in table {
                self.classes.push(ClassRecord {
                    set,
                    class: c.class,
                    correct: c.correct,
                    total: c.total,
                });
            }
        };
        push("train", network.class_correctness(train_set)?);
        if !self.test_set.is_empty() {
            push("test", network.class_correctness(&self.test_set)?);
        }
        Ok(())
    }

    /// Writes `run-<unix seconds>/` under `root` and returns its path.
    pub fn write_run(&self, root: &Path, network: &Network, config: &TrainerConfig) -> Result<PathBuf> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let dir = root.join(format!("run-{}", stamp));
        fs::create_dir_all(&dir)?;

        let mut w = csv_file(&dir, "samples.csv", "epoch,index,loss,learning_rate,elapsed_secs")?;
        for r in &self.samples {
            writeln!(w, "{},{},{},{},{}", r.epoch, r.index, r.loss, r.learning_rate, r.elapsed_secs)?;
        }
        w.flush()?;

        let mut w = csv_file(&dir, "batches.csv", "epoch,percent,mean_loss,learning_rate,elapsed_secs")?;
        for r in &self.batches {
            writeln!(w, "{},{},{},{},{}", r.epoch, r.percent, r.mean_loss, r.learning_rate, r.elapsed_secs)?;
        }
        w.flush()?;

        let mut w = csv_file(
            &dir,
            "epochs.csv",
            "epoch,correctness,train_loss,test_loss,learning_rate,elapsed_secs",
        )?;
        for r in &self.epochs {
            let test_loss = r.test_loss.map(|l| l.to_string()).unwrap_or_default();
            writeln!(
                w,
                "{},{},{},{},{},{}",
                r.epoch, r.correctness, r.train_loss, test_loss, r.learning_rate, r.elapsed_secs
            )?;
        }
        w.flush()?;

        let mut w = csv_file(&dir, "classes.csv", "set,class,correct,total")?;
        for r in &self.classes {
            writeln!(w, "{},{},{},{}", r.set, r.class, r.correct, r.total)?;
        }
        w.flush()?;

        let mut w = BufWriter::new(File::create(dir.join("trainer.json"))?);
        serde_json::to_writer_pretty(&mut w, config)?;
        w.flush()?;
        let mut w = BufWriter::new(File::create(dir.join("model.json"))?);
        serde_json::to_writer_pretty(&mut w, &network.to_document())?;
        w.flush()?;

        Ok(dir)
    }
}

fn csv_file(dir: &Path, name: &str, header: &str) -> Result<BufWriter<File>> {
    let mut w = BufWriter::new(File::create(dir.join(name))?);
    writeln!(w, "{}", header)?;
    Ok(w)
}

impl TrainingObserver for TrainingLog {
    fn on_event(&mut self, event: &TrainingEvent, network: &mut Network, cancel: &CancelToken) {
        let elapsed_secs = self.clock.elapsed().as_secs_f64();
        match *event {
            TrainingEvent::Sample { epoch, index, loss } if self.record_samples => {
                self.samples.push(SampleRecord {
                    epoch,
                    index,
                    loss,
                    learning_rate: network.learning_rate,
                    elapsed_secs,
                });
            }
            TrainingEvent::Batch {
                epoch,
                percent,
                mean_loss,
            } => self.batches.push(BatchRecord {
                epoch,
                percent,
                mean_loss,
                learning_rate: network.learning_rate,
                elapsed_secs,
            }),
            TrainingEvent::Epoch { epoch, .. } => {
                if let Err(e) = self.record_epoch(epoch, network) {
                    self.failure = Some(e);
                    cancel.cancel();
                }
            }
            _ => {}
        }
    }
}
