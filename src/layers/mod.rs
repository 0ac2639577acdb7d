pub mod conv;
pub mod dense;
pub mod dropout;
pub mod gradients;
pub mod pool;
pub mod reshape;
pub mod template;

pub use conv::Conv;
pub use dense::Dense;
pub use dropout::Dropout;
pub use gradients::Gradients;
pub use pool::Pool;
pub use reshape::Reshape;
pub use template::LayerTemplate;

use rand::Rng;

use crate::error::Result;
use crate::math::matrix::Matrix;
use crate::network::shape::Shape;
use crate::optim::sgd::Sgd;

/// What a layer hands forward, and what it needs back during backprop.
///
/// `auxiliary` is the pre-activation for Convolution / FullyConnected, the
/// argmax map for Pooling, the masked output for Dropout and the flattened
/// column for Reshape.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerOutput {
    pub activated: Vec<Matrix>,
    pub auxiliary: Vec<Matrix>,
}

/// One stage of the network. The variant set is closed, so dispatch is a
/// plain `match`.
#[derive(Debug, Clone)]
pub enum Layer {
    FullyConnected(Dense),
    Convolution(Conv),
    Pooling(Pool),
    Dropout(Dropout),
    Reshape(Reshape),
}

impl Layer {
    pub fn kind(&self) -> &'static str {
        match self {
            Layer::FullyConnected(_) => "fully_connected",
            Layer::Convolution(_) => "convolution",
            Layer::Pooling(_) => "pooling",
            Layer::Dropout(_) => "dropout",
            Layer::Reshape(_) => "reshape",
        }
    }

    pub fn input_shape(&self) -> Shape {
        match self {
            Layer::FullyConnected(l) => Shape::vector(l.input_size()),
            Layer::Convolution(l) => l.input_shape(),
            Layer::Pooling(l) => l.input_shape(),
            Layer::Dropout(l) => l.shape(),
            Layer::Reshape(l) => l.input_shape(),
        }
    }

    pub fn output_shape(&self) -> Shape {
        match self {
            Layer::FullyConnected(l) => Shape::vector(l.size()),
            Layer::Convolution(l) => l.output_shape(),
            Layer::Pooling(l) => l.output_shape(),
            Layer::Dropout(l) => l.shape(),
            Layer::Reshape(l) => l.output_shape(),
        }
    }

    pub fn forward(&self, inputs: &[Matrix]) -> Result<LayerOutput> {
        match self {
            Layer::FullyConnected(l) => l.forward(inputs),
            Layer::Convolution(l) => l.forward(inputs),
            Layer::Pooling(l) => l.forward(inputs),
            Layer::Dropout(l) => l.forward(inputs),
            Layer::Reshape(l) => l.forward(inputs),
        }
    }

    /// Inference-time forward: identical to [`Layer::forward`] except that
    /// Dropout only scales its input.
    pub fn predict(&self, inputs: &[Matrix]) -> Result<Vec<Matrix>> {
        match self {
            Layer::Dropout(l) => l.scale_for_inference(inputs),
            _ => Ok(self.forward(inputs)?.activated),
        }
    }

    /// Propagates `error` (gradient w.r.t. this layer's activated output)
    /// back to this layer's input.
    ///
    /// `prev` is the input this layer saw in the forward pass and `aux` the
    /// auxiliary output it produced. Parameter gradients, already scaled by
    /// `learning_rate`, are added to `grads`, which must come from
    /// [`Layer::new_gradients`] on this same layer.
    pub fn backward(
        &self,
        error: &[Matrix],
        prev: &[Matrix],
        aux: &[Matrix],
        learning_rate: f64,
        grads: &mut Gradients,
    ) -> Result<Vec<Matrix>> {
        match self {
            Layer::FullyConnected(l) => l.backward(error, prev, aux, learning_rate, grads),
            Layer::Convolution(l) => l.backward(error, prev, aux, learning_rate, grads),
            Layer::Pooling(l) => l.backward(error, aux),
            Layer::Dropout(l) => l.backward(error),
            Layer::Reshape(l) => l.backward(error),
        }
    }

    pub fn new_gradients(&self) -> Gradients {
        match self {
            Layer::FullyConnected(l) => l.new_gradients(),
            Layer::Convolution(l) => l.new_gradients(),
            _ => Gradients::Empty,
        }
    }

    /// Folds a (possibly batch-summed) gradient buffer into the layer's
    /// accumulator.
    pub fn accumulate(&mut self, grads: &Gradients) -> Result<()> {
        match self {
            Layer::FullyConnected(l) => l.accumulate(grads),
            Layer::Convolution(l) => l.accumulate(grads),
            _ => Ok(()),
        }
    }

    /// Applies the accumulated gradient averaged over `batch_size`, with norm
    /// clipping, then resets the accumulator. Dropout draws its next mask.
    pub fn update_weights_and_biases<R: Rng + ?Sized>(
        &mut self,
        batch_size: usize,
        sgd: &Sgd,
        rng: &mut R,
    ) -> Result<()> {
        match self {
            Layer::FullyConnected(l) => l.update(batch_size, sgd),
            Layer::Convolution(l) => l.update(batch_size, sgd),
            Layer::Dropout(l) => {
                l.regenerate_mask(rng);
                Ok(())
            }
            Layer::Pooling(_) | Layer::Reshape(_) => Ok(()),
        }
    }

    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::FullyConnected(l) => l.parameter_count(),
            Layer::Convolution(l) => l.parameter_count(),
            _ => 0,
        }
    }
}
