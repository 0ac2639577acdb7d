//! Adaptive learning rate.
//!
//! The controller keeps a trailing window of `(elapsed seconds, batch mean
//! loss)` points. Each time the window fills it fits a least-squares line
//! through them; a slope that is not negative means training has stalled,
//! so the learning rate is reduced and the window starts over.

use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::network::network::Network;
use crate::train::events::{TrainingEvent, TrainingObserver};
use crate::train::train_config::CancelToken;

/// Patience settings, as found in the trainer configuration.
///
/// - `initial_ignore`: cumulative percent of training (100 per epoch) to
///   skip before any point is collected.
/// - `patience`: fraction of the dataset, in batches, that forms one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatienceConfig {
    pub initial_ignore: f64,
    pub patience: f64,
}

/// Number of batch losses in one patience window.
pub fn window_size(dataset_size: usize, batch_size: usize, patience: f64) -> usize {
    let batches = dataset_size as f64 * patience / batch_size.max(1) as f64;
    (batches.floor() as usize).max(1)
}

/// Bounded sequence of points with a least-squares slope.
#[derive(Debug, Clone)]
pub struct TrendWindow {
    capacity: usize,
    points: VecDeque<(f64, f64)>,
}

impl TrendWindow {
    pub fn new(capacity: usize) -> TrendWindow {
        TrendWindow {
            capacity: capacity.max(1),
            points: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    /// Adds a point, dropping the oldest one once the window is full.
    pub fn push(&mut self, x: f64, y: f64) {
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((x, y));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.points.len() == self.capacity
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Slope of the fitted line. 0 when all `x` coincide (or fewer than two
    /// points).
    pub fn slope(&self) -> f64 {
        let n = self.points.len() as f64;
        if self.points.len() < 2 {
            return 0.0;
        }
        let mean_x = self.points.iter().map(|p| p.0).sum::<f64>() / n;
        let mean_y = self.points.iter().map(|p| p.1).sum::<f64>() / n;
        let (mut sxy, mut sxx) = (0.0, 0.0);
        for &(x, y) in &self.points {
            sxy += (x - mean_x) * (y - mean_y);
            sxx += (x - mean_x) * (x - mean_x);
        }
        if sxx == 0.0 {
            0.0
        } else {
            sxy / sxx
        }
    }
}

/// Lowers the learning rate when batch losses stop falling.
pub struct PatienceController {
    initial_ignore: f64,
    window: TrendWindow,
    min_learning_rate: f64,
    reduce: Box<dyn Fn(f64) -> f64 + Send>,
    armed: bool,
    clock: Instant,
}

impl PatienceController {
    pub fn new(
        config: PatienceConfig,
        dataset_size: usize,
        batch_size: usize,
        min_learning_rate: f64,
        reduce: Box<dyn Fn(f64) -> f64 + Send>,
    ) -> PatienceController {
        PatienceController {
            initial_ignore: config.initial_ignore,
            window: TrendWindow::new(window_size(dataset_size, batch_size, config.patience)),
            min_learning_rate,
            reduce,
            armed: true,
            clock: Instant::now(),
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.capacity
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Re-arms the controller and empties the window.
    pub fn reset(&mut self) {
        self.armed = true;
        self.window.clear();
        self.clock = Instant::now();
    }

    /// Feeds one batch result. Returns the new learning rate when a
    /// reduction is due.
    pub fn observe(
        &mut self,
        epoch: usize,
        percent: f64,
        mean_loss: f64,
        elapsed_secs: f64,
        learning_rate: f64,
    ) -> Option<f64> {
        if !self.armed {
            return None;
        }
        if learning_rate <= self.min_learning_rate {
            self.armed = false;
            self.window.clear();
            return None;
        }
        let progress = epoch.saturating_sub(1) as f64 * 100.0 + percent;
        if progress < self.initial_ignore {
            return None;
        }

        self.window.push(elapsed_secs, mean_loss);
        if !self.window.is_full() || self.window.slope() < 0.0 {
            return None;
        }
        self.window.clear();
        let reduced = (self.reduce)(learning_rate).max(self.min_learning_rate);
        if reduced <= self.min_learning_rate {
            self.armed = false;
        }
        Some(reduced)
    }
}

impl TrainingObserver for PatienceController {
    fn on_event(&mut self, event: &TrainingEvent, network: &mut Network, _: &CancelToken) {
        if let TrainingEvent::Batch {
            epoch,
            percent,
            mean_loss,
        } = *event
        {
            let elapsed = self.clock.elapsed().as_secs_f64();
            if let Some(lr) = self.observe(epoch, percent, mean_loss, elapsed, network.learning_rate) {
                network.learning_rate = lr;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(ignore: f64, min: f64) -> PatienceController {
        // 100 samples, batches of 10, 30% patience -> window of 3
        PatienceController::new(
            PatienceConfig {
                initial_ignore: ignore,
                patience: 0.3,
            },
            100,
            10,
            min,
            Box::new(|lr| lr * 0.5),
        )
    }

    #[test]
    fn window_size_rounds_down_with_floor_of_one() {
        assert_eq!(window_size(100, 10, 0.3), 3);
        assert_eq!(window_size(100, 10, 0.05), 1);
        assert_eq!(window_size(1000, 32, 0.5), 15);
    }

    #[test]
    fn slope_of_straight_lines() {
        let mut w = TrendWindow::new(4);
        for x in 0..4 {
            w.push(x as f64, 2.0 * x as f64 + 1.0);
        }
        assert!((w.slope() - 2.0).abs() < 1e-12);
        w.push(4.0, 0.0);
        assert_eq!(w.len(), 4);
        assert!(w.slope() < 0.0);

        let mut flat = TrendWindow::new(3);
        flat.push(1.0, 5.0);
        flat.push(1.0, 7.0);
        assert_eq!(flat.slope(), 0.0);
    }

    #[test]
    fn falling_loss_keeps_rate() {
        let mut c = controller(0.0, 0.01);
        for i in 0..10 {
            let r = c.observe(1, (i + 1) as f64 * 10.0, 1.0 - i as f64 * 0.05, i as f64, 0.5);
            assert_eq!(r, None);
        }
    }

    #[test]
    fn ignore_gate_spans_epochs() {
        let mut c = controller(150.0, 0.01);
        for i in 0..10 {
            assert_eq!(c.observe(1, (i + 1) as f64 * 10.0, 1.0, i as f64, 0.5), None);
        }
        assert_eq!(c.observe(2, 50.0, 1.0, 10.0, 0.5), None);
        assert_eq!(c.observe(2, 60.0, 1.0, 11.0, 0.5), None);
        assert_eq!(c.observe(2, 70.0, 1.0, 12.0, 0.5), Some(0.25));
    }

    #[test]
    fn disarms_at_minimum_until_reset() {
        let mut c = controller(0.0, 0.2);
        let mut lr = 0.5;
        let mut t = 0.0;
        for _ in 0..12 {
            t += 1.0;
            if let Some(next) = c.observe(1, 50.0, 1.0, t, lr) {
                lr = next;
            }
        }
        assert_eq!(lr, 0.2);
        assert!(!c.is_armed());
        assert_eq!(c.observe(1, 50.0, 1.0, t + 1.0, 0.5), None);
        c.reset();
        assert!(c.is_armed());
    }
}
