pub mod events;
pub mod loop_fn;
pub mod patience;
pub mod progress;
pub mod telemetry;
pub mod train_config;
pub mod trainer;

pub use events::{NoopObserver, Observers, TrainingEvent, TrainingObserver};
pub use loop_fn::{train_loop, TrainingSummary};
pub use patience::{PatienceConfig, PatienceController};
pub use progress::ProgressLogger;
pub use telemetry::{LoggingConfig, TrainingLog};
pub use train_config::{CancelToken, TrainConfig};
pub use trainer::{Trainer, TrainerConfig, TrainerState, TrainingHandle};
