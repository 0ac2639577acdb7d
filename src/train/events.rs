use serde::{Deserialize, Serialize};

use crate::network::network::Network;
use crate::train::train_config::CancelToken;

/// Progress notifications emitted by `train_loop`.
///
/// Events are delivered synchronously to a [`TrainingObserver`] and, when a
/// `progress_tx` channel is configured in `TrainConfig`, sent over it as
/// well. Epochs are 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrainingEvent {
    /// One sample finished its forward and backward pass.
    Sample { epoch: usize, index: usize, loss: f64 },
    /// One mini-batch has been applied.
    Batch {
        epoch: usize,
        /// Share of the epoch processed so far, in `[0, 100]`.
        percent: f64,
        mean_loss: f64,
    },
    /// End of an epoch, with correctness estimated on up to
    /// `TrainConfig::correctness_sample` shuffled training samples.
    Epoch { epoch: usize, correctness: f64 },
    Finished { epochs_completed: usize, cancelled: bool },
}

/// Reacts to training events. Observers may change the network's learning
/// rate or request cancellation; both take effect from the next batch.
pub trait TrainingObserver {
    fn on_event(&mut self, event: &TrainingEvent, network: &mut Network, cancel: &CancelToken);
}

/// Observer that ignores everything.
pub struct NoopObserver;

impl TrainingObserver for NoopObserver {
    fn on_event(&mut self, _: &TrainingEvent, _: &mut Network, _: &CancelToken) {}
}

impl<F> TrainingObserver for F
where
    F: FnMut(&TrainingEvent, &mut Network, &CancelToken),
{
    fn on_event(&mut self, event: &TrainingEvent, network: &mut Network, cancel: &CancelToken) {
        self(event, network, cancel)
    }
}

/// Fans every event out to several observers, in order.
pub struct Observers<'a>(pub Vec<&'a mut dyn TrainingObserver>);

impl<'a> TrainingObserver for Observers<'a> {
    fn on_event(&mut self, event: &TrainingEvent, network: &mut Network, cancel: &CancelToken) {
        for observer in self.0.iter_mut() {
            observer.on_event(event, network, cancel);
        }
    }
}
