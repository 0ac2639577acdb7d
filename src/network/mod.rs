pub mod model;
pub mod network;
pub mod sample;
pub mod shape;
pub mod spec;

pub use model::{LayerData, LayerHead, ModelDocument};
pub use network::{ClassCorrectness, Network};
pub use sample::Sample;
pub use shape::Shape;
pub use spec::NetworkSpec;
