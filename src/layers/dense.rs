use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::gradients::Gradients;
use crate::layers::LayerOutput;
use crate::math::matrix::Matrix;
use crate::optim::sgd::Sgd;

/// Fully-connected layer: `a = activation(W·x + b)` over a single column.
#[derive(Debug, Clone)]
pub struct Dense {
    input_size: usize,
    size: usize,
    activation: ActivationFunction,
    weights: Matrix, // size × input_size
    biases: Matrix,  // size × 1
    weights_acc: Matrix,
    biases_acc: Matrix,
}

impl Dense {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        size: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Result<Dense> {
        if input_size == 0 || size == 0 {
            return Err(Error::architecture("fully-connected layer needs a non-zero size"));
        }
        let weights = if activation.uses_he_init() {
            Matrix::he(size, input_size, input_size, rng)
        } else {
            Matrix::xavier(size, input_size, input_size, size, rng)
        };
        Dense::from_parts(weights, Matrix::zeros(size, 1), activation)
    }

    /// Rebuilds a layer from stored parameters without re-randomizing.
    pub fn from_parts(weights: Matrix, biases: Matrix, activation: ActivationFunction) -> Result<Dense> {
        if biases.rows() != weights.rows() || biases.cols() != 1 {
            return Err(Error::shape(format!(
                "biases {}x{} do not match weights {}x{}",
                biases.rows(),
                biases.cols(),
                weights.rows(),
                weights.cols()
            )));
        }
        Ok(Dense {
            input_size: weights.cols(),
            size: weights.rows(),
            activation,
            weights_acc: Matrix::zeros(weights.rows(), weights.cols()),
            biases_acc: Matrix::zeros(biases.rows(), 1),
            weights,
            biases,
        })
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
    }

    pub fn weights(&self) -> &Matrix {
        &self.weights
    }

    pub fn biases(&self) -> &Matrix {
        &self.biases
    }

    fn single_input<'a>(&self, inputs: &'a [Matrix]) -> Result<&'a Matrix> {
        match inputs {
            [x] if x.rows() == self.input_size && x.cols() == 1 => Ok(x),
            [x] => Err(Error::shape(format!(
                "fully-connected layer expects a {}x1 input, got {}x{}",
                self.input_size,
                x.rows(),
                x.cols()
            ))),
            _ => Err(Error::shape(format!(
                "fully-connected layer accepts exactly one channel, got {}",
                inputs.len()
            ))),
        }
    }

    /// Activated output plus the pre-activation `z` as auxiliary output.
    pub fn forward(&self, inputs: &[Matrix]) -> Result<LayerOutput> {
        let x = self.single_input(inputs)?;
        let z = self.weights.dot(x)?.add(&self.biases)?;
        let a = self.activation.apply(&z);
        Ok(LayerOutput {
            activated: vec![a],
            auxiliary: vec![z],
        })
    }

    /// Adds `lr · (act'(z) ⊙ error) · xᵀ` to the weight gradient and the
    /// scaled delta to the bias gradient; returns `Wᵀ · error`.
    ///
    /// The returned error skips this layer's activation derivative. At the
    /// Softmax output that makes it the exact cross-entropy gradient.
    pub fn backward(
        &self,
        error: &[Matrix],
        prev: &[Matrix],
        aux: &[Matrix],
        learning_rate: f64,
        grads: &mut Gradients,
    ) -> Result<Vec<Matrix>> {
        let x = self.single_input(prev)?;
        let (err, z) = match (error, aux) {
            ([e], [z]) => (e, z),
            _ => return Err(Error::shape("fully-connected backward expects one error and one pre-activation")),
        };

        let scaled = self.activation.derivative_matrix(z).hadamard(err)?.scale(learning_rate);

        match grads {
            Gradients::FullyConnected { weights, biases } => {
                weights.add_assign(&scaled.dot(&x.transpose())?)?;
                biases.add_assign(&scaled)?;
            }
            _ => return Err(Error::shape("fully-connected layer given foreign gradient buffer")),
        }

        Ok(vec![self.weights.transpose().dot(err)?])
    }

    pub fn new_gradients(&self) -> Gradients {
        Gradients::FullyConnected {
            weights: Matrix::zeros(self.weights.rows(), self.weights.cols()),
            biases: Matrix::zeros(self.biases.rows(), 1),
        }
    }

    pub fn accumulate(&mut self, grads: &Gradients) -> Result<()> {
        match grads {
            Gradients::FullyConnected { weights, biases } => {
                self.weights_acc.add_assign(weights)?;
                self.biases_acc.add_assign(biases)
            }
            _ => Err(Error::shape("fully-connected layer given foreign gradients")),
        }
    }

    pub fn update(&mut self, batch_size: usize, sgd: &Sgd) -> Result<()> {
        sgd.step(&mut self.weights, &mut self.weights_acc, batch_size)?;
        sgd.step(&mut self.biases, &mut self.biases_acc, batch_size)
    }

    pub fn parameter_count(&self) -> usize {
        self.size * self.input_size + self.size
    }
}
