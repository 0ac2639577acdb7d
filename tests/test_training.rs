// End-to-end training runs: convergence, cancellation, background runs and
// the adaptive learning rate.

use std::sync::{Arc, Mutex};

use convnet::network::shape::Shape;
use convnet::train::{
    train_loop, NoopObserver, PatienceConfig, PatienceController, TrainingEvent, TrainingObserver,
};
use convnet::{
    ActivationFunction, CancelToken, LayerTemplate, Network, Sample, TrainConfig, Trainer, TrainerConfig, TrainerState,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn mlp(seed: u64) -> Network {
    Network::with_rng(
        Shape::vector(4),
        &[
            LayerTemplate::dense(4, ActivationFunction::ReLU),
            LayerTemplate::dense(2, ActivationFunction::Softmax),
        ],
        StdRng::seed_from_u64(seed),
    )
    .unwrap()
}

// With this seed the initial hidden layer already separates the two inputs
// well enough for 50 epochs at a fixed rate to reach full correctness.
const CONVERGING_SEED: u64 = 3;

fn separable(per_class: usize) -> Vec<Sample> {
    let mut set = Vec::new();
    for _ in 0..per_class {
        set.push(Sample::from_vector(vec![0.0; 4], 0, 2).unwrap());
        set.push(Sample::from_vector(vec![1.0; 4], 1, 2).unwrap());
    }
    set
}

// ============================================================================
// Convergence
// ============================================================================

#[test]
fn mlp_separates_zero_and_one_inputs() {
    let mut config = TrainerConfig::new(0.1, 0.001, 50, 10);
    config.seed = Some(11);
    let mut trainer = Trainer::new(mlp(CONVERGING_SEED), separable(50), config)
        .unwrap()
        .with_test_set(separable(5))
        .unwrap();

    assert_eq!(trainer.train().unwrap(), TrainerState::Finished);
    let network = trainer.network();
    assert!(network.evaluate(&separable(10)).unwrap() >= 0.9);
    assert!(network.test_correctness.unwrap() >= 0.9);
    assert!(network.train_correctness >= 0.9);
    assert_eq!(network.learning_rate, 0.1);
}

#[test]
fn training_lowers_the_loss() {
    let mut network = mlp(CONVERGING_SEED);
    network.learning_rate = 0.1;
    let data = separable(20);
    let before = network.loss(&data).unwrap();
    train_loop(&mut network, &data, &TrainConfig::new(30, 5), &mut NoopObserver).unwrap();
    assert!(network.loss(&data).unwrap() < before);
}

// ============================================================================
// Cancellation
// ============================================================================

#[test]
fn nan_loss_cancels_the_run() {
    // No ReLU in front: max(NaN, 0) would hide the NaN input.
    let mut network = Network::with_rng(
        Shape::vector(4),
        &[LayerTemplate::dense(2, ActivationFunction::Softmax)],
        StdRng::seed_from_u64(1),
    )
    .unwrap();
    let mut data = separable(3);
    data.push(Sample::from_vector(vec![f64::NAN; 4], 0, 2).unwrap());
    let before = network.to_document().layers_data;

    let summary = train_loop(&mut network, &data, &TrainConfig::new(4, data.len()), &mut NoopObserver).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.epochs_completed, 0);
    assert_eq!(network.to_document().layers_data, before);
}

#[test]
fn background_run_can_be_cancelled() {
    let config = TrainerConfig::new(0.1, 0.001, 100_000, 4);
    let trainer = Trainer::new(mlp(2), separable(20), config).unwrap();
    let handle = trainer.spawn();
    handle.cancel();

    let trainer = handle.join().unwrap();
    assert_eq!(trainer.state(), TrainerState::Cancelled);
    assert!(trainer.summary().unwrap().epochs_completed < 100_000);
}

#[test]
fn background_run_finishes_and_returns_the_trainer() {
    let config = TrainerConfig::new(0.1, 0.001, 3, 4);
    let handle = Trainer::new(mlp(3), separable(4), config).unwrap().spawn();
    let trainer = handle.join().unwrap();
    assert_eq!(trainer.state(), TrainerState::Finished);
    assert_eq!(trainer.summary().unwrap().epochs_completed, 3);
}

#[test]
fn observers_see_ordered_events() {
    let seen: Arc<Mutex<Vec<TrainingEvent>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let mut observer = move |e: &TrainingEvent, _: &mut Network, _: &CancelToken| {
        if !matches!(e, TrainingEvent::Sample { .. }) {
            sink.lock().unwrap().push(e.clone());
        }
    };
    let mut network = mlp(4);
    train_loop(&mut network, &separable(4), &TrainConfig::new(2, 4), &mut observer).unwrap();

    let seen = seen.lock().unwrap();
    let epochs: Vec<usize> = seen
        .iter()
        .filter_map(|e| match e {
            TrainingEvent::Epoch { epoch, .. } => Some(*epoch),
            _ => None,
        })
        .collect();
    assert_eq!(epochs, vec![1, 2]);
    assert_eq!(seen.iter().filter(|e| matches!(e, TrainingEvent::Batch { .. })).count(), 4);
    assert!(matches!(seen.last(), Some(TrainingEvent::Finished { cancelled: false, .. })));
}

// ============================================================================
// Patience
// ============================================================================

#[test]
fn constant_loss_reduces_rate_once_per_window() {
    // 80 samples, batches of 8, patience 0.4 -> window of 4 batches
    let mut controller = PatienceController::new(
        PatienceConfig {
            initial_ignore: 0.0,
            patience: 0.4,
        },
        80,
        8,
        0.3,
        Box::new(|lr| lr * 0.9),
    );
    assert_eq!(controller.window_len(), 4);

    let mut network = mlp(5);
    network.learning_rate = 1.0;
    let cancel = CancelToken::new();
    let mut rates = Vec::new();
    for i in 0..60 {
        let event = TrainingEvent::Batch {
            epoch: 1 + i / 10,
            percent: ((i % 10) + 1) as f64 * 10.0,
            mean_loss: 0.5,
        };
        controller.on_event(&event, &mut network, &cancel);
        rates.push(network.learning_rate);
    }

    let changes: Vec<usize> = (1..rates.len()).filter(|&i| rates[i] != rates[i - 1]).collect();
    // 1.0 -> 0.9 -> 0.81 -> ... -> 0.3138..., then floored at 0.3
    assert_eq!(changes, vec![3, 7, 11, 15, 19, 23, 27, 31, 35, 39, 43, 47]);
    assert_eq!(rates[3], 0.9);
    assert!(rates.iter().all(|&r| r >= 0.3));
    assert_eq!(*rates.last().unwrap(), 0.3);
    assert!(!controller.is_armed());
}

#[test]
fn trainer_stops_when_patience_reaches_minimum() {
    let mut config = TrainerConfig::new(0.1, 0.05, 200, 1);
    config.patience = Some(PatienceConfig {
        initial_ignore: 0.0,
        patience: 0.5,
    });
    let data = vec![Sample::from_vector(vec![0.5; 4], 0, 2).unwrap(); 2];
    let mut trainer = Trainer::new(mlp(6), data, config)
        .unwrap()
        .with_lr_reduction(|lr| lr / 2.0);
    // window of one batch: the first batch already halves the rate down to
    // the minimum, and the epoch end then stops the run
    assert_eq!(trainer.train().unwrap(), TrainerState::Cancelled);
    assert_eq!(trainer.network().learning_rate, 0.05);
    assert_eq!(trainer.summary().unwrap().epochs_completed, 1);
}
