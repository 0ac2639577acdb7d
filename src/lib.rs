pub mod error;
pub mod math;
pub mod activation;
pub mod layers;
pub mod network;
pub mod loss;
pub mod optim;
pub mod train;

// Convenience re-exports
pub use error::{Error, Result};
pub use math::matrix::Matrix;
pub use activation::activation::ActivationFunction;
pub use layers::{Layer, LayerTemplate};
pub use network::network::Network;
pub use network::sample::Sample;
pub use network::shape::Shape;
pub use network::spec::NetworkSpec;
pub use train::loop_fn::train_loop;
pub use train::train_config::{CancelToken, TrainConfig};
pub use train::trainer::{Trainer, TrainerConfig, TrainerState};
