use std::io::{self, Write};

use crate::network::network::Network;
use crate::train::events::{TrainingEvent, TrainingObserver};
use crate::train::train_config::CancelToken;

/// Writes one human-readable line per batch, epoch and run end.
///
/// Output goes to stderr unless another writer is given. Write failures
/// are ignored; losing a progress line never stops training.
pub struct ProgressLogger {
    out: Box<dyn Write + Send>,
}

impl ProgressLogger {
    pub fn stderr() -> ProgressLogger {
        ProgressLogger::new(Box::new(io::stderr()))
    }

    pub fn new(out: Box<dyn Write + Send>) -> ProgressLogger {
        ProgressLogger { out }
    }

    fn line(event: &TrainingEvent, learning_rate: f64) -> Option<String> {
        match *event {
            TrainingEvent::Sample { .. } => None,
            TrainingEvent::Batch {
                epoch,
                percent,
                mean_loss,
            } => Some(format!(
                "Epoch {:>3} | {:>5.1}% | loss {:.6} | lr {:.6}",
                epoch, percent, mean_loss, learning_rate
            )),
            TrainingEvent::Epoch { epoch, correctness } => Some(format!(
                "Epoch {:>3} done | correctness {:.2}%",
                epoch,
                correctness * 100.0
            )),
            TrainingEvent::Finished {
                epochs_completed,
                cancelled,
            } => Some(format!(
                "Training {} after {} epoch(s)",
                if cancelled { "cancelled" } else { "finished" },
                epochs_completed
            )),
        }
    }
}

impl TrainingObserver for ProgressLogger {
    fn on_event(&mut self, event: &TrainingEvent, network: &mut Network, _: &CancelToken) {
        if let Some(line) = ProgressLogger::line(event, network.learning_rate) {
            let _ = writeln!(self.out, "{}", line);
        }
    }
}
