use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::network::shape::Shape;

/// Declarative description of one layer, consumed once when the network is
/// built. Reshape layers are never described here; the network inserts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayerTemplate {
    FullyConnected {
        size: usize,
        activation: ActivationFunction,
    },
    Convolution {
        depth: usize,
        kernel_size: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        activation: ActivationFunction,
    },
    Pooling {
        size: usize,
        stride: usize,
    },
    Dropout {
        rate: f64,
    },
}

fn default_stride() -> usize {
    1
}

impl LayerTemplate {
    pub fn dense(size: usize, activation: ActivationFunction) -> Self {
        LayerTemplate::FullyConnected { size, activation }
    }

    pub fn conv(depth: usize, kernel_size: usize, activation: ActivationFunction) -> Self {
        LayerTemplate::Convolution {
            depth,
            kernel_size,
            stride: 1,
            activation,
        }
    }

    pub fn pool(size: usize, stride: usize) -> Self {
        LayerTemplate::Pooling { size, stride }
    }

    pub fn dropout(rate: f64) -> Self {
        LayerTemplate::Dropout { rate }
    }

    pub fn is_fully_connected(&self) -> bool {
        matches!(self, LayerTemplate::FullyConnected { .. })
    }

    pub fn is_spatial(&self) -> bool {
        matches!(self, LayerTemplate::Convolution { .. } | LayerTemplate::Pooling { .. })
    }

    /// Shape produced when this layer is fed `input`.
    pub fn output_shape(&self, input: Shape) -> Result<Shape> {
        match *self {
            LayerTemplate::FullyConnected { size, .. } => Ok(Shape::vector(size)),
            LayerTemplate::Convolution {
                depth, kernel_size, ..
            } => {
                if kernel_size == 0 || kernel_size > input.rows || kernel_size > input.cols {
                    return Err(Error::architecture(format!(
                        "kernel {} does not fit input {}x{}",
                        kernel_size, input.rows, input.cols
                    )));
                }
                Ok(Shape::new(
                    depth,
                    input.rows - kernel_size + 1,
                    input.cols - kernel_size + 1,
                ))
            }
            LayerTemplate::Pooling { size, stride } => {
                if size == 0 || stride == 0 || size > input.rows || size > input.cols {
                    return Err(Error::architecture(format!(
                        "pool {} (stride {}) does not fit input {}x{}",
                        size, stride, input.rows, input.cols
                    )));
                }
                Ok(Shape::new(
                    input.depth,
                    (input.rows - size) / stride + 1,
                    (input.cols - size) / stride + 1,
                ))
            }
            LayerTemplate::Dropout { .. } => Ok(input),
        }
    }
}
