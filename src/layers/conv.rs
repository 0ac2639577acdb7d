//! 2-D convolution layer (stride 1, no padding).

use rand::Rng;

use crate::activation::activation::ActivationFunction;
use crate::error::{Error, Result};
use crate::layers::gradients::Gradients;
use crate::layers::LayerOutput;
use crate::math::algebra::{convolve_full, cross_correlate_valid};
use crate::math::matrix::Matrix;
use crate::network::shape::Shape;
use crate::optim::sgd::Sgd;

/// Convolution with `depth` output planes. Each output plane owns one
/// `kernel_size`×`kernel_size` kernel per input channel and one bias.
#[derive(Debug, Clone)]
pub struct Conv {
    input_shape: Shape,
    depth: usize,
    kernel_size: usize,
    activation: ActivationFunction,
    kernels: Vec<Vec<Matrix>>, // [depth][input_shape.depth]
    biases: Matrix,            // depth × 1
    kernels_acc: Vec<Vec<Matrix>>,
    biases_acc: Matrix,
}

impl Conv {
    pub fn new<R: Rng + ?Sized>(
        input_shape: Shape,
        depth: usize,
        kernel_size: usize,
        stride: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Result<Conv> {
        if stride != 1 {
            return Err(Error::architecture(format!(
                "convolution supports stride 1 only, got {}",
                stride
            )));
        }
        if depth == 0 || kernel_size == 0 {
            return Err(Error::architecture("convolution needs a non-zero depth and kernel size"));
        }

        let area = kernel_size * kernel_size;
        let fan_in = input_shape.depth * area;
        let fan_out = depth * area;
        let kernels = (0..depth)
            .map(|_| {
                (0..input_shape.depth)
                    .map(|_| {
                        if activation.uses_he_init() {
                            Matrix::he(kernel_size, kernel_size, fan_in, rng)
                        } else {
                            Matrix::xavier(kernel_size, kernel_size, fan_in, fan_out, rng)
                        }
                    })
                    .collect()
            })
            .collect();

        Conv::from_parts(input_shape, kernels, Matrix::zeros(depth, 1), activation)
    }

    /// Rebuilds a layer from stored kernels and biases.
    pub fn from_parts(
        input_shape: Shape,
        kernels: Vec<Vec<Matrix>>,
        biases: Matrix,
        activation: ActivationFunction,
    ) -> Result<Conv> {
        let depth = kernels.len();
        let kernel_size = kernels
            .first()
            .and_then(|row| row.first())
            .map(|k| k.rows())
            .ok_or_else(|| Error::architecture("convolution has no kernels"))?;

        if kernel_size > input_shape.rows || kernel_size > input_shape.cols {
            return Err(Error::architecture(format!(
                "kernel {} does not fit input {}x{}",
                kernel_size, input_shape.rows, input_shape.cols
            )));
        }
        for row in &kernels {
            if row.len() != input_shape.depth {
                return Err(Error::shape(format!(
                    "expected {} kernels per output plane, got {}",
                    input_shape.depth,
                    row.len()
                )));
            }
            if row.iter().any(|k| k.shape() != (kernel_size, kernel_size)) {
                return Err(Error::shape("convolution kernels must all be the same square size"));
            }
        }
        if biases.shape() != (depth, 1) {
            return Err(Error::shape(format!(
                "expected {}x1 biases, got {}x{}",
                depth,
                biases.rows(),
                biases.cols()
            )));
        }

        let kernels_acc = kernels
            .iter()
            .map(|row| row.iter().map(|k| Matrix::zeros(k.rows(), k.cols())).collect())
            .collect();
        Ok(Conv {
            input_shape,
            depth,
            kernel_size,
            activation,
            kernels,
            biases,
            kernels_acc,
            biases_acc: Matrix::zeros(depth, 1),
        })
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(
            self.depth,
            self.input_shape.rows - self.kernel_size + 1,
            self.input_shape.cols - self.kernel_size + 1,
        )
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        1
    }

    pub fn activation(&self) -> ActivationFunction {
        self.activation
    }

    pub fn kernels(&self) -> &[Vec<Matrix>] {
        &self.kernels
    }

    pub fn biases(&self) -> &Matrix {
        &self.biases
    }

    pub fn forward(&self, inputs: &[Matrix]) -> Result<LayerOutput> {
        self.input_shape.check(inputs)?;
        let mut activated = Vec::with_capacity(self.depth);
        let mut pre = Vec::with_capacity(self.depth);

        for (o, row) in self.kernels.iter().enumerate() {
            let out = self.output_shape();
            let mut z = Matrix::zeros(out.rows, out.cols);
            for (input, kernel) in inputs.iter().zip(row.iter()) {
                z.add_assign(&cross_correlate_valid(input, kernel, 1)?)?;
            }
            let z = z.add_scalar(self.biases.at(o, 0));
            activated.push(self.activation.apply(&z));
            pre.push(z);
        }

        Ok(LayerOutput {
            activated,
            auxiliary: pre,
        })
    }

    pub fn backward(
        &self,
        error: &[Matrix],
        prev: &[Matrix],
        aux: &[Matrix],
        learning_rate: f64,
        grads: &mut Gradients,
    ) -> Result<Vec<Matrix>> {
        self.input_shape.check(prev)?;
        let out = self.output_shape();
        out.check(error)?;
        out.check(aux)?;

        let (kernel_grads, bias_grads) = match grads {
            Gradients::Convolution { kernels, biases } => (kernels, biases),
            _ => return Err(Error::shape("convolution layer given foreign gradient buffer")),
        };

        let mut propagated = self.input_shape.zeros();
        for o in 0..self.depth {
            let dz = error[o].hadamard(&self.activation.derivative_matrix(&aux[o]))?;
            for (i, input) in prev.iter().enumerate() {
                let dk = cross_correlate_valid(input, &dz, 1)?.scale(learning_rate);
                kernel_grads[o][i].add_assign(&dk)?;
                propagated[i].add_assign(&convolve_full(&dz, &self.kernels[o][i]))?;
            }
            *bias_grads.at_mut(o, 0) += learning_rate * dz.sum();
        }
        Ok(propagated)
    }

    pub fn new_gradients(&self) -> Gradients {
        Gradients::Convolution {
            kernels: self
                .kernels
                .iter()
                .map(|row| row.iter().map(|k| Matrix::zeros(k.rows(), k.cols())).collect())
                .collect(),
            biases: Matrix::zeros(self.depth, 1),
        }
    }

    pub fn accumulate(&mut self, grads: &Gradients) -> Result<()> {
        match grads {
            Gradients::Convolution { kernels, biases } => {
                for (acc_row, row) in self.kernels_acc.iter_mut().zip(kernels.iter()) {
                    for (acc, k) in acc_row.iter_mut().zip(row.iter()) {
                        acc.add_assign(k)?;
                    }
                }
                self.biases_acc.add_assign(biases)
            }
            _ => Err(Error::shape("convolution layer given foreign gradients")),
        }
    }

    pub fn update(&mut self, batch_size: usize, sgd: &Sgd) -> Result<()> {
        let mut params: Vec<Matrix> = self.kernels.drain(..).flatten().collect();
        let mut acc: Vec<Matrix> = self.kernels_acc.drain(..).flatten().collect();
        let result = sgd.step_group(&mut params, &mut acc, batch_size);

        let per_plane = self.input_shape.depth;
        self.kernels = regroup(params, per_plane);
        self.kernels_acc = regroup(acc, per_plane);
        result?;
        sgd.step(&mut self.biases, &mut self.biases_acc, batch_size)
    }

    pub fn parameter_count(&self) -> usize {
        self.depth * self.input_shape.depth * self.kernel_size * self.kernel_size + self.depth
    }
}

fn regroup(flat: Vec<Matrix>, per_row: usize) -> Vec<Vec<Matrix>> {
    let mut rows = Vec::with_capacity(flat.len() / per_row.max(1));
    let mut iter = flat.into_iter().peekable();
    while iter.peek().is_some() {
        rows.push(iter.by_ref().take(per_row).collect());
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn m(data: Vec<Vec<f64>>) -> Matrix {
        Matrix::from_data(data).unwrap()
    }

    #[test]
    fn rejects_stride_other_than_one() {
        let mut rng = StdRng::seed_from_u64(0);
        let err = Conv::new(Shape::new(1, 5, 5), 2, 3, 2, ActivationFunction::ReLU, &mut rng);
        assert!(matches!(err, Err(Error::InvalidArchitecture(_))));
    }

    #[test]
    fn forward_sums_input_channels_and_adds_bias() {
        let kernels = vec![vec![m(vec![vec![1.0]]), m(vec![vec![2.0]])]];
        let conv = Conv::from_parts(Shape::new(2, 2, 2), kernels, Matrix::column(vec![0.5]), ActivationFunction::ReLU)
            .unwrap();
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = m(vec![vec![-1.0, 0.0], vec![0.0, -3.0]]);
        let out = conv.forward(&[a, b]).unwrap();
        assert_eq!(out.auxiliary[0], m(vec![vec![-0.5, 2.5], vec![3.5, -1.5]]));
        assert_eq!(out.activated[0], m(vec![vec![0.0, 2.5], vec![3.5, 0.0]]));
    }

    #[test]
    fn backward_restores_input_shape() {
        let mut rng = StdRng::seed_from_u64(3);
        let conv = Conv::new(Shape::new(2, 6, 5), 3, 3, 1, ActivationFunction::Sigmoid, &mut rng).unwrap();
        let inputs = Shape::new(2, 6, 5).zeros();
        let out = conv.forward(&inputs).unwrap();
        assert_eq!(out.activated.len(), 3);
        assert_eq!(out.activated[0].shape(), (4, 3));

        let error = conv.output_shape().zeros().iter().map(|e| e.add_scalar(1.0)).collect::<Vec<_>>();
        let mut grads = conv.new_gradients();
        let back = conv.backward(&error, &inputs, &out.auxiliary, 0.1, &mut grads).unwrap();
        assert_eq!(back.len(), 2);
        assert!(back.iter().all(|b| b.shape() == (6, 5)));
    }

    #[test]
    fn kernel_gradient_matches_finite_difference() {
        // Loss = sum of the (identity-free) sigmoid outputs; compare the
        // accumulated kernel gradient with a numeric derivative.
        let mut rng = StdRng::seed_from_u64(11);
        let shape = Shape::new(1, 4, 4);
        let conv = Conv::new(shape, 1, 2, 1, ActivationFunction::Sigmoid, &mut rng).unwrap();
        let input = vec![Matrix::random_uniform(4, 4, 1.0, &mut rng)];
        let out = conv.forward(&input).unwrap();
        let ones = vec![out.activated[0].map(|_| 1.0)];
        let mut grads = conv.new_gradients();
        conv.backward(&ones, &input, &out.auxiliary, 1.0, &mut grads).unwrap();

        let analytic = match &grads {
            Gradients::Convolution { kernels, .. } => kernels[0][0].at(0, 1),
            _ => unreachable!(),
        };

        let h = 1e-6;
        let mut bumped = conv.kernels().to_vec();
        *bumped[0][0].at_mut(0, 1) += h;
        let plus = Conv::from_parts(shape, bumped, conv.biases().clone(), ActivationFunction::Sigmoid).unwrap();
        let numeric = (plus.forward(&input).unwrap().activated[0].sum() - out.activated[0].sum()) / h;
        assert!((analytic - numeric).abs() < 1e-4, "{} vs {}", analytic, numeric);
    }

    #[test]
    fn update_keeps_kernel_layout() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut conv = Conv::new(Shape::new(3, 5, 5), 2, 3, 1, ActivationFunction::ReLU, &mut rng).unwrap();
        let g = conv.new_gradients();
        conv.accumulate(&g).unwrap();
        let before = conv.kernels().to_vec();
        conv.update(4, &Sgd::default()).unwrap();
        assert_eq!(conv.kernels().len(), 2);
        assert!(conv.kernels().iter().all(|row| row.len() == 3));
        assert_eq!(conv.kernels(), before.as_slice());
        assert_eq!(conv.parameter_count(), 2 * 3 * 9 + 2);
    }
}
