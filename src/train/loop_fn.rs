use std::sync::atomic::{AtomicUsize, Ordering};

use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::layers::gradients::merge_all;
use crate::layers::Gradients;
use crate::loss::cross_entropy::CrossEntropyLoss;
use crate::network::network::{output_column, Network};
use crate::network::sample::Sample;
use crate::train::events::{TrainingEvent, TrainingObserver};
use crate::train::train_config::{CancelToken, TrainConfig};

/// What a finished (or cancelled) `train_loop` call achieved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingSummary {
    pub epochs_completed: usize,
    pub cancelled: bool,
    /// Mean loss of the last applied batch, `None` if no batch was applied.
    pub last_batch_loss: Option<f64>,
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Trains `network` on `samples` with mini-batch SGD.
///
/// Each epoch shuffles the samples with the network's own random source and
/// cuts them into batches of `config.batch_size` (the last one may be
/// shorter). The samples of a batch run forward and backward in parallel,
/// each worker summing into its own gradient buffers; the buffers are then
/// reduced and applied once, sequentially.
///
/// # Early termination
/// Training stops when `config.cancel` is set (by the caller, by an observer,
/// by a worker that saw a non-finite loss) or when the `progress_tx`
/// receiver has been dropped. A batch interrupted by cancellation is
/// discarded, and a `Finished` event is always the last event emitted.
pub fn train_loop(
    network: &mut Network,
    samples: &[Sample],
    config: &TrainConfig,
    observer: &mut dyn TrainingObserver,
) -> Result<TrainingSummary> {
    if samples.is_empty() {
        return Err(Error::config("training set is empty"));
    }
    if config.batch_size == 0 {
        return Err(Error::config("batch size must be at least 1"));
    }

    let n = samples.len();
    let mut summary = TrainingSummary {
        epochs_completed: 0,
        cancelled: false,
        last_batch_loss: None,
    };

    'epochs: for epoch in 1..=config.epochs {
        if config.cancel.is_cancelled() {
            break;
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(network.rng_mut());

        for (b, batch) in order.chunks(config.batch_size).enumerate() {
            let offset = b * config.batch_size;
            let outcome = run_batch(network, samples, batch, offset, &config.cancel)?;

            for &(index, loss) in &outcome.losses {
                emit(TrainingEvent::Sample { epoch, index, loss }, network, config, observer);
            }
            if config.cancel.is_cancelled() {
                break 'epochs;
            }

            network.apply_gradients(&outcome.grads, batch.len())?;

            let mean_loss = outcome.losses.iter().map(|(_, l)| l).sum::<f64>() / batch.len() as f64;
            summary.last_batch_loss = Some(mean_loss);
            let percent = (offset + batch.len()) as f64 / n as f64 * 100.0;
            emit(TrainingEvent::Batch { epoch, percent, mean_loss }, network, config, observer);
        }

        let correctness = estimate_correctness(network, samples, config.correctness_sample)?;
        network.train_correctness = correctness;
        summary.epochs_completed = epoch;
        emit(TrainingEvent::Epoch { epoch, correctness }, network, config, observer);
    }

    // Only cancellation ends the loop before the last epoch.
    summary.cancelled = summary.epochs_completed < config.epochs;
    emit(
        TrainingEvent::Finished {
            epochs_completed: summary.epochs_completed,
            cancelled: summary.cancelled,
        },
        network,
        config,
        observer,
    );
    Ok(summary)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

struct BatchOutcome {
    grads: Vec<Gradients>,
    /// `(position in epoch, loss)`, sorted by position after the join.
    losses: Vec<(usize, f64)>,
}

fn run_batch(
    network: &Network,
    samples: &[Sample],
    batch: &[usize],
    offset: usize,
    cancel: &CancelToken,
) -> Result<BatchOutcome> {
    let identity = || BatchOutcome {
        grads: network.new_gradients(),
        losses: Vec::new(),
    };

    let mut outcome = batch
        .par_iter()
        .enumerate()
        .try_fold(identity, |mut acc, (j, &idx)| -> Result<BatchOutcome> {
            if cancel.is_cancelled() {
                return Ok(acc);
            }
            let sample = &samples[idx];
            let trace = network.feedforward(&sample.inputs)?;
            let predicted = CrossEntropyLoss::clamp(output_column(&trace)?);
            let loss = CrossEntropyLoss::loss(&predicted, &sample.target)?;
            acc.losses.push((offset + j, loss));
            if !loss.is_finite() {
                cancel.cancel();
                return Ok(acc);
            }
            network.backpropagate(&sample.inputs, &trace, &sample.target, &mut acc.grads)?;
            Ok(acc)
        })
        .try_reduce(identity, |mut a, b| {
            merge_all(&mut a.grads, &b.grads)?;
            a.losses.extend(b.losses);
            Ok(a)
        })?;

    outcome.losses.sort_by_key(|&(i, _)| i);
    Ok(outcome)
}

/// Correctness on up to `limit` training samples, drawn in a fresh shuffle.
fn estimate_correctness(network: &mut Network, samples: &[Sample], limit: usize) -> Result<f64> {
    let mut order: Vec<usize> = (0..samples.len()).collect();
    order.shuffle(network.rng_mut());
    order.truncate(limit.max(1));

    let net = &*network;
    let correct = AtomicUsize::new(0);
    order.par_iter().try_for_each(|&i| -> Result<()> {
        let s = &samples[i];
        if net.predict(&s.inputs)?.argmax()? == s.class()? {
            correct.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    })?;
    Ok(correct.load(Ordering::Relaxed) as f64 / order.len() as f64)
}

/// Delivers `event` to the observer and the progress channel. A dropped
/// receiver cancels the run.
fn emit(event: TrainingEvent, network: &mut Network, config: &TrainConfig, observer: &mut dyn TrainingObserver) {
    observer.on_event(&event, network, &config.cancel);
    if let Some(ref tx) = config.progress_tx {
        if tx.send(event).is_err() {
            config.cancel.cancel();
        }
    }
}
