use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Parameter gradients produced by one or more backward passes through a
/// single layer.
///
/// Each training worker owns one buffer per layer; buffers are summed after
/// the batch joins and folded into the layer's accumulator. Addition is
/// commutative, so the reduction order does not matter.
#[derive(Debug, Clone, PartialEq)]
pub enum Gradients {
    FullyConnected { weights: Matrix, biases: Matrix },
    Convolution { kernels: Vec<Vec<Matrix>>, biases: Matrix },
    /// Layers without learnable state.
    Empty,
}

impl Gradients {
    pub fn merge(&mut self, other: &Gradients) -> Result<()> {
        match (self, other) {
            (
                Gradients::FullyConnected { weights, biases },
                Gradients::FullyConnected {
                    weights: w,
                    biases: b,
                },
            ) => {
                weights.add_assign(w)?;
                biases.add_assign(b)
            }
            (
                Gradients::Convolution { kernels, biases },
                Gradients::Convolution {
                    kernels: k,
                    biases: b,
                },
            ) => {
                for (row, other_row) in kernels.iter_mut().zip(k.iter()) {
                    for (kernel, other) in row.iter_mut().zip(other_row.iter()) {
                        kernel.add_assign(other)?;
                    }
                }
                biases.add_assign(b)
            }
            (Gradients::Empty, Gradients::Empty) => Ok(()),
            _ => Err(Error::shape("cannot merge gradients of different layer kinds")),
        }
    }
}

/// Sums per-layer gradient buffers element-wise, layer by layer.
pub fn merge_all(into: &mut [Gradients], from: &[Gradients]) -> Result<()> {
    if into.len() != from.len() {
        return Err(Error::shape("gradient buffers cover a different number of layers"));
    }
    for (a, b) in into.iter_mut().zip(from.iter()) {
        a.merge(b)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_and_rejects_mixed_kinds() {
        let mut a = Gradients::FullyConnected {
            weights: Matrix::column(vec![1.0, 2.0]),
            biases: Matrix::column(vec![0.5]),
        };
        let b = a.clone();
        a.merge(&b).unwrap();
        assert_eq!(
            a,
            Gradients::FullyConnected {
                weights: Matrix::column(vec![2.0, 4.0]),
                biases: Matrix::column(vec![1.0]),
            }
        );
        assert!(a.merge(&Gradients::Empty).is_err());
    }
}
