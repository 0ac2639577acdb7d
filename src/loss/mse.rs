use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

pub struct MseLoss;

impl MseLoss {
    /// Scalar MSE: mean((predicted - expected)²)
    pub fn loss(predicted: &Matrix, expected: &Matrix) -> Result<f64> {
        let diff = predicted.sub(expected)?;
        let n = (diff.rows() * diff.cols()) as f64;
        if n == 0.0 {
            return Err(Error::shape("mean squared error of an empty matrix"));
        }
        Ok(diff.values().map(|d| d * d).sum::<f64>() / n)
    }

    /// Per-output gradient: predicted - expected
    pub fn derivative(predicted: &Matrix, expected: &Matrix) -> Result<Matrix> {
        predicted.sub(expected)
    }
}
