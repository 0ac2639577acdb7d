use crate::error::Result;
use crate::math::matrix::Matrix;

/// Largest Frobenius norm a single parameter update may have.
pub const MAX_NORM: f64 = 0.5;

/// Plain SGD over pre-scaled gradient accumulators with norm clipping.
///
/// Accumulators already carry the learning rate (layers scale at
/// accumulation time) and point downhill, so a step is
/// `param += clip(accumulated / batch_size)`.
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    pub max_norm: f64,
}

impl Default for Sgd {
    fn default() -> Self {
        Sgd { max_norm: MAX_NORM }
    }
}

impl Sgd {
    pub fn new(max_norm: f64) -> Sgd {
        Sgd { max_norm }
    }

    /// Averages `accumulated` over the batch and clips it.
    pub fn delta(&self, accumulated: &Matrix, batch_size: usize) -> Matrix {
        let avg = accumulated.scale(1.0 / batch_size.max(1) as f64);
        clip_by_norm(avg, self.max_norm)
    }

    /// Applies one step to `param` and resets `accumulated` to zero.
    pub fn step(&self, param: &mut Matrix, accumulated: &mut Matrix, batch_size: usize) -> Result<()> {
        let delta = self.delta(accumulated, batch_size);
        param.add_assign(&delta)?;
        *accumulated = Matrix::zeros(accumulated.rows(), accumulated.cols());
        Ok(())
    }

    /// Same as [`Sgd::step`] but the norm is taken over the whole group, as
    /// for the kernels of one convolution layer.
    pub fn step_group(
        &self,
        params: &mut [Matrix],
        accumulated: &mut [Matrix],
        batch_size: usize,
    ) -> Result<()> {
        let inv = 1.0 / batch_size.max(1) as f64;
        let mut deltas: Vec<Matrix> = accumulated.iter().map(|a| a.scale(inv)).collect();
        let norm = deltas.iter().map(|d| d.values().map(|x| x * x).sum::<f64>()).sum::<f64>().sqrt();
        if norm > self.max_norm {
            let factor = self.max_norm / norm;
            deltas = deltas.iter().map(|d| d.scale(factor)).collect();
        }
        for ((param, delta), acc) in params.iter_mut().zip(deltas.iter()).zip(accumulated.iter_mut()) {
            param.add_assign(delta)?;
            *acc = Matrix::zeros(acc.rows(), acc.cols());
        }
        Ok(())
    }
}

/// Rescales `delta` down to `max_norm` when its Frobenius norm exceeds it.
pub fn clip_by_norm(delta: Matrix, max_norm: f64) -> Matrix {
    let norm = delta.norm();
    if norm > max_norm {
        delta.scale(max_norm / norm)
    } else {
        delta
    }
}
