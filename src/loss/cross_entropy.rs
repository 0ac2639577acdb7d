use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Categorical cross-entropy for a Softmax output layer.
pub struct CrossEntropyLoss;

/// Floor applied to predictions before taking the log.
pub const PREDICTION_FLOOR: f64 = 1e-10;

impl CrossEntropyLoss {
    /// L = -Σ expected[i] · ln(predicted[i])
    ///
    /// `predicted` must already be floored away from zero, see
    /// [`CrossEntropyLoss::clamp`].
    pub fn loss(predicted: &Matrix, expected: &Matrix) -> Result<f64> {
        if !predicted.same_shape(expected) {
            return Err(Error::shape(format!(
                "prediction {}x{} vs target {}x{}",
                predicted.rows(),
                predicted.cols(),
                expected.rows(),
                expected.cols()
            )));
        }
        Ok(predicted
            .values()
            .zip(expected.values())
            .map(|(p, e)| -e * p.ln())
            .sum())
    }

    /// Floors every prediction at [`PREDICTION_FLOOR`]. NaN is kept so a
    /// diverged network still reports a non-finite loss.
    pub fn clamp(predicted: &Matrix) -> Matrix {
        predicted.map(|p| if p.is_nan() { p } else { p.max(PREDICTION_FLOOR) })
    }

    /// Error signal that seeds the backward pass: `expected - predicted`.
    ///
    /// This is the negated combined Softmax + cross-entropy gradient, so
    /// layers add their accumulated deltas rather than subtract them.
    pub fn error(predicted: &Matrix, expected: &Matrix) -> Result<Matrix> {
        expected.sub(predicted)
    }
}
