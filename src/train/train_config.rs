use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::train::events::TrainingEvent;

/// Shared cooperative cancellation flag.
///
/// Clones share the same flag. Workers poll it before each sample; the
/// training loop checks it again after every batch join.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `epochs`: total number of full passes over the training data
/// - `batch_size`: samples per mini-batch; the last batch may be shorter
/// - `correctness_sample`: training samples used for the end-of-epoch
///   correctness estimate
/// - `progress_tx`: optional channel sender receiving every event. If the
///   receiver is dropped the loop cancels itself.
/// - `cancel`: cooperative stop flag, settable from any thread
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub correctness_sample: usize,
    pub progress_tx: Option<mpsc::Sender<TrainingEvent>>,
    pub cancel: CancelToken,
}

pub const DEFAULT_CORRECTNESS_SAMPLE: usize = 1000;

impl TrainConfig {
    /// Creates a minimal `TrainConfig` with no progress channel and a fresh
    /// cancellation token.
    pub fn new(epochs: usize, batch_size: usize) -> Self {
        TrainConfig {
            epochs,
            batch_size,
            correctness_sample: DEFAULT_CORRECTNESS_SAMPLE,
            progress_tx: None,
            cancel: CancelToken::new(),
        }
    }
}
