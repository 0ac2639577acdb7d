use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::network::Network;
use crate::network::sample::Sample;
use crate::network::shape::Shape;
use crate::train::events::{Observers, TrainingEvent, TrainingObserver};
use crate::train::loop_fn::{train_loop, TrainingSummary};
use crate::train::patience::{PatienceConfig, PatienceController};
use crate::train::progress::ProgressLogger;
use crate::train::telemetry::{LoggingConfig, TrainingLog};
use crate::train::train_config::{CancelToken, TrainConfig};

pub const DEFAULT_LR_DECAY: f64 = 0.9;

fn default_lr_decay() -> f64 {
    DEFAULT_LR_DECAY
}

/// Hyperparameters of one training run. Also written out as
/// `trainer.json` alongside the run telemetry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub initial_learning_rate: f64,
    pub min_learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    #[serde(default)]
    pub patience: Option<PatienceConfig>,
    /// Factor applied by the default learning-rate reduction.
    #[serde(default = "default_lr_decay")]
    pub lr_decay: f64,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
    #[serde(default)]
    pub verbose: bool,
    /// Seed for picking the log samples.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl TrainerConfig {
    pub fn new(initial_learning_rate: f64, min_learning_rate: f64, epochs: usize, batch_size: usize) -> Self {
        TrainerConfig {
            initial_learning_rate,
            min_learning_rate,
            epochs,
            batch_size,
            patience: None,
            lr_decay: DEFAULT_LR_DECAY,
            logging: None,
            verbose: false,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(Error::config("epochs and batch size must be positive"));
        }
        if !(self.min_learning_rate > 0.0 && self.min_learning_rate <= self.initial_learning_rate) {
            return Err(Error::config(format!(
                "learning rates must satisfy 0 < min ({}) <= initial ({})",
                self.min_learning_rate, self.initial_learning_rate
            )));
        }
        if !(self.lr_decay > 0.0 && self.lr_decay < 1.0) {
            return Err(Error::config(format!("lr_decay {} outside (0, 1)", self.lr_decay)));
        }
        if let Some(p) = self.patience {
            if !(0.0..=100.0).contains(&p.initial_ignore) {
                return Err(Error::config(format!("initial_ignore {} outside [0, 100]", p.initial_ignore)));
            }
            if !(p.patience > 0.0 && p.patience <= 1.0) {
                return Err(Error::config(format!("patience {} outside (0, 1]", p.patience)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    NotStarted,
    Running,
    Finished,
    Cancelled,
}

/// Runs one training session over a network: learning-rate control,
/// optional telemetry and progress output.
pub struct Trainer {
    network: Network,
    train_set: Vec<Sample>,
    test_set: Vec<Sample>,
    config: TrainerConfig,
    reduction: Box<dyn Fn(f64) -> f64 + Send>,
    progress_out: Option<Box<dyn Write + Send>>,
    state: TrainerState,
    cancel: CancelToken,
    log: Option<TrainingLog>,
    summary: Option<TrainingSummary>,
    rng: StdRng,
}

impl Trainer {
    pub fn new(network: Network, train_set: Vec<Sample>, config: TrainerConfig) -> Result<Trainer> {
        config.validate()?;
        if train_set.is_empty() {
            return Err(Error::config("training set is empty"));
        }
        check_samples(&network, &train_set)?;

        let decay = config.lr_decay;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Trainer {
            network,
            train_set,
            test_set: Vec::new(),
            config,
            reduction: Box::new(move |lr| lr * decay),
            progress_out: None,
            state: TrainerState::NotStarted,
            cancel: CancelToken::new(),
            log: None,
            summary: None,
            rng,
        })
    }

    /// Held-out samples for test loss and final test correctness.
    pub fn with_test_set(mut self, test_set: Vec<Sample>) -> Result<Trainer> {
        check_samples(&self.network, &test_set)?;
        self.test_set = test_set;
        Ok(self)
    }

    /// Replaces the default `lr * lr_decay` reduction. The result is still
    /// floored at the minimum learning rate.
    pub fn with_lr_reduction<F>(mut self, reduce: F) -> Trainer
    where
        F: Fn(f64) -> f64 + Send + 'static,
    {
        self.reduction = Box::new(reduce);
        self
    }

    /// Sends progress lines to `out` instead of stderr. Implies verbose.
    pub fn with_progress_output(mut self, out: Box<dyn Write + Send>) -> Trainer {
        self.config.verbose = true;
        self.progress_out = Some(out);
        self
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn log(&self) -> Option<&TrainingLog> {
        self.log.as_ref()
    }

    pub fn summary(&self) -> Option<TrainingSummary> {
        self.summary
    }

    /// Runs the whole session on the calling thread. A trainer runs once.
    pub fn train(&mut self) -> Result<TrainerState> {
        if self.state != TrainerState::NotStarted {
            return Err(Error::config("trainer has already run"));
        }
        self.state = TrainerState::Running;
        match self.run() {
            Ok(state) => {
                self.state = state;
                Ok(state)
            }
            Err(e) => {
                self.state = TrainerState::Cancelled;
                Err(e)
            }
        }
    }

    fn run(&mut self) -> Result<TrainerState> {
        self.network.learning_rate = self.config.initial_learning_rate;

        let min_lr = self.config.min_learning_rate;
        let reduction = std::mem::replace(&mut self.reduction, Box::new(|lr| lr));
        let mut patience = self.config.patience.map(|p| {
            PatienceController::new(p, self.train_set.len(), self.config.batch_size, min_lr, reduction)
        });
        let mut log = match self.config.logging {
            Some(l) => {
                let picked = self.pick_log_samples(l.log_sample_count);
                Some(TrainingLog::new(l, picked, self.test_set.clone()))
            }
            None => None,
        };
        let mut progress = if self.config.verbose {
            Some(match self.progress_out.take() {
                Some(out) => ProgressLogger::new(out),
                None => ProgressLogger::stderr(),
            })
        } else {
            None
        };
        let mut min_rate_guard = |e: &TrainingEvent, net: &mut Network, cancel: &CancelToken| {
            if matches!(e, TrainingEvent::Epoch { .. }) && net.learning_rate <= min_lr {
                cancel.cancel();
            }
        };

        let mut observers: Vec<&mut dyn TrainingObserver> = Vec::new();
        if let Some(p) = patience.as_mut() {
            observers.push(p);
        }
        if let Some(l) = log.as_mut() {
            observers.push(l);
        }
        if let Some(p) = progress.as_mut() {
            observers.push(p);
        }
        observers.push(&mut min_rate_guard);

        let loop_config = TrainConfig {
            cancel: self.cancel.clone(),
            ..TrainConfig::new(self.config.epochs, self.config.batch_size)
        };
        let summary = train_loop(&mut self.network, &self.train_set, &loop_config, &mut Observers(observers))?;
        self.summary = Some(summary);

        if !self.test_set.is_empty() {
            self.network.test_correctness = Some(self.network.evaluate(&self.test_set)?);
        }
        if let Some(mut log) = log {
            if let Some(e) = log.take_failure() {
                return Err(e);
            }
            log.record_classes(&self.network, &self.train_set)?;
            self.log = Some(log);
        }

        Ok(if summary.cancelled {
            TrainerState::Cancelled
        } else {
            TrainerState::Finished
        })
    }

    fn pick_log_samples(&mut self, count: usize) -> Vec<Sample> {
        let mut order: Vec<usize> = (0..self.train_set.len()).collect();
        order.shuffle(&mut self.rng);
        order.truncate(count);
        order.into_iter().map(|i| self.train_set[i].clone()).collect()
    }

    /// Runs `train` on a background thread.
    pub fn spawn(mut self) -> TrainingHandle {
        let cancel = self.cancel.clone();
        let join = thread::spawn(move || -> Result<Trainer> {
            self.train()?;
            Ok(self)
        });
        TrainingHandle { join, cancel }
    }

    /// Dumps the telemetry of a finished run under `root`.
    pub fn write_run(&self, root: &Path) -> Result<PathBuf> {
        let log = self
            .log
            .as_ref()
            .ok_or_else(|| Error::config("telemetry was not enabled for this run"))?;
        log.write_run(root, &self.network, &self.config)
    }
}

/// A trainer running on another thread.
pub struct TrainingHandle {
    join: JoinHandle<Result<Trainer>>,
    cancel: CancelToken,
}

impl TrainingHandle {
    /// Requests cancellation; the current batch is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Waits for the run and hands the trainer back. A panic on the
    /// training thread is propagated.
    pub fn join(self) -> Result<Trainer> {
        match self.join.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

fn check_samples(network: &Network, samples: &[Sample]) -> Result<()> {
    let classes = network.output_shape().rows;
    let input: Shape = network.input_shape();
    for (i, s) in samples.iter().enumerate() {
        input
            .check(&s.inputs)
            .map_err(|e| Error::shape(format!("sample {}: {}", i, e)))?;
        if s.target.shape() != (classes, 1) {
            return Err(Error::shape(format!(
                "sample {}: target is {}x{}, network has {} classes",
                i,
                s.target.rows(),
                s.target.cols(),
                classes
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activation::activation::ActivationFunction;
    use crate::layers::LayerTemplate;

    fn network() -> Network {
        Network::with_rng(
            Shape::vector(2),
            &[LayerTemplate::dense(2, ActivationFunction::Softmax)],
            StdRng::seed_from_u64(1),
        )
        .unwrap()
    }

    fn set() -> Vec<Sample> {
        vec![
            Sample::from_vector(vec![0.0, 0.0], 0, 2).unwrap(),
            Sample::from_vector(vec![1.0, 1.0], 1, 2).unwrap(),
        ]
    }

    #[test]
    fn config_validation() {
        assert!(TrainerConfig::new(0.1, 0.01, 1, 1).validate().is_ok());
        assert!(TrainerConfig::new(0.1, 0.01, 0, 1).validate().is_err());
        assert!(TrainerConfig::new(0.1, 0.01, 1, 0).validate().is_err());
        assert!(TrainerConfig::new(0.1, 0.2, 1, 1).validate().is_err());
        assert!(TrainerConfig::new(0.1, 0.0, 1, 1).validate().is_err());

        let mut c = TrainerConfig::new(0.1, 0.01, 1, 1);
        c.patience = Some(PatienceConfig {
            initial_ignore: 120.0,
            patience: 0.5,
        });
        assert!(c.validate().is_err());
        c.patience = Some(PatienceConfig {
            initial_ignore: 10.0,
            patience: 0.0,
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn config_json_uses_defaults() {
        let c: TrainerConfig = serde_json::from_str(
            r#"{"initial_learning_rate": 0.1, "min_learning_rate": 0.001, "epochs": 3, "batch_size": 8}"#,
        )
        .unwrap();
        assert_eq!(c, TrainerConfig::new(0.1, 0.001, 3, 8));
    }

    #[test]
    fn rejects_mismatched_samples() {
        let bad = vec![Sample::from_vector(vec![0.0, 0.0, 0.0], 0, 2).unwrap()];
        assert!(Trainer::new(network(), bad, TrainerConfig::new(0.1, 0.01, 1, 1)).is_err());
        let bad_target = vec![Sample::from_vector(vec![0.0, 0.0], 0, 3).unwrap()];
        assert!(Trainer::new(network(), bad_target, TrainerConfig::new(0.1, 0.01, 1, 1)).is_err());
        assert!(Trainer::new(network(), Vec::new(), TrainerConfig::new(0.1, 0.01, 1, 1)).is_err());
    }

    #[test]
    fn runs_once() {
        let mut t = Trainer::new(network(), set(), TrainerConfig::new(0.1, 0.01, 2, 1)).unwrap();
        assert_eq!(t.state(), TrainerState::NotStarted);
        assert_eq!(t.train().unwrap(), TrainerState::Finished);
        assert_eq!(t.summary().map(|s| s.epochs_completed), Some(2));
        assert!(t.train().is_err());
    }

    #[test]
    fn stops_once_learning_rate_hits_minimum() {
        let config = TrainerConfig::new(0.05, 0.05, 5, 1);
        let mut t = Trainer::new(network(), set(), config).unwrap();
        assert_eq!(t.train().unwrap(), TrainerState::Cancelled);
        assert_eq!(t.summary().map(|s| s.epochs_completed), Some(1));
    }
}
