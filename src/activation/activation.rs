use serde::{Deserialize, Serialize};
use std::f64::consts::E;

use crate::math::matrix::Matrix;

/// Added to the softmax denominator so an all-underflow input never divides
/// by zero.
pub const SOFTMAX_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivationFunction {
    #[serde(rename = "relu")]
    ReLU,
    Sigmoid,
    /// Softmax is vector-valued; it is applied to a whole matrix by
    /// [`ActivationFunction::apply`], never element by element.
    Softmax,
}

impl ActivationFunction {
    /// Element-wise activation. Softmax has no element-wise form and is
    /// returned unchanged here.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => x.max(0.0),
            ActivationFunction::Sigmoid => sigmoid(x),
            ActivationFunction::Softmax => x,
        }
    }

    /// Element-wise derivative taken at the pre-activation value.
    ///
    /// ReLU deliberately reports 1 at exactly zero.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => {
                if x >= 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ActivationFunction::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            ActivationFunction::Softmax => 1.0,
        }
    }

    pub fn apply(&self, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Softmax => softmax(z),
            _ => z.map(|x| self.function(x)),
        }
    }

    /// Derivative of the activation over a whole pre-activation matrix.
    ///
    /// For Softmax this is the element-wise `s * (1 - s)` diagonal shortcut,
    /// not the full Jacobian. It is only consistent at an output layer whose
    /// incoming error is already the combined softmax/cross-entropy gradient.
    pub fn derivative_matrix(&self, z: &Matrix) -> Matrix {
        match self {
            ActivationFunction::Softmax => softmax(z).map(|s| s * (1.0 - s)),
            _ => z.map(|x| self.derivative(x)),
        }
    }

    /// He initialization for ReLU, Xavier for everything else.
    pub fn uses_he_init(&self) -> bool {
        matches!(self, ActivationFunction::ReLU)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ActivationFunction::ReLU => "relu",
            ActivationFunction::Sigmoid => "sigmoid",
            ActivationFunction::Softmax => "softmax",
        }
    }
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + E.powf(-x))
}

/// `e^x / (Σ e^x + ε)` over every cell of `z`.
///
/// The maximum is subtracted before exponentiating; this leaves the ratio
/// unchanged and keeps large logits from overflowing.
pub fn softmax(z: &Matrix) -> Matrix {
    let max = z.max();
    let shift = if max.is_finite() { max } else { 0.0 };
    let exps = z.map(|x| (x - shift).exp());
    let total = exps.sum() + SOFTMAX_EPSILON;
    exps.map(|x| x / total)
}
