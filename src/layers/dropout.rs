//! Inverted dropout with a mask that lives for a whole mini-batch.

use rand::Rng;

use crate::error::{Error, Result};
use crate::layers::LayerOutput;
use crate::math::matrix::Matrix;
use crate::network::shape::Shape;

pub const MAX_DROPOUT_RATE: f64 = 0.9;

/// Kept cells are scaled by `1 / (1 - rate)`, dropped cells are zero.
///
/// The mask is regenerated on every weight update, so every sample of a
/// mini-batch sees the same mask in both forward and backward passes.
#[derive(Debug, Clone)]
pub struct Dropout {
    shape: Shape,
    rate: f64,
    mask: Vec<Matrix>,
}

impl Dropout {
    pub fn new<R: Rng + ?Sized>(shape: Shape, rate: f64, rng: &mut R) -> Result<Dropout> {
        if !(0.0..=MAX_DROPOUT_RATE).contains(&rate) {
            return Err(Error::architecture(format!(
                "dropout rate must be within [0, {}], got {}",
                MAX_DROPOUT_RATE, rate
            )));
        }
        let mut layer = Dropout {
            shape,
            rate,
            mask: shape.zeros(),
        };
        layer.regenerate_mask(rng);
        Ok(layer)
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn mask(&self) -> &[Matrix] {
        &self.mask
    }

    pub fn regenerate_mask<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let keep = 1.0 / (1.0 - self.rate);
        let mut mask = self.shape.zeros();
        for channel in mask.iter_mut() {
            for r in 0..channel.rows() {
                for c in 0..channel.cols() {
                    *channel.at_mut(r, c) = if rng.gen::<f64>() < self.rate { 0.0 } else { keep };
                }
            }
        }
        self.mask = mask;
    }

    /// Training-time pass; the auxiliary output is the masked output.
    pub fn forward(&self, inputs: &[Matrix]) -> Result<LayerOutput> {
        let activated = self.apply_mask(inputs)?;
        Ok(LayerOutput {
            auxiliary: activated.clone(),
            activated,
        })
    }

    pub fn backward(&self, error: &[Matrix]) -> Result<Vec<Matrix>> {
        self.apply_mask(error)
    }

    /// Inference-time replacement for [`Dropout::forward`]: uniform scaling
    /// by `1 - rate`.
    pub fn scale_for_inference(&self, inputs: &[Matrix]) -> Result<Vec<Matrix>> {
        self.shape.check(inputs)?;
        Ok(inputs.iter().map(|m| m.scale(1.0 - self.rate)).collect())
    }

    fn apply_mask(&self, channels: &[Matrix]) -> Result<Vec<Matrix>> {
        self.shape.check(channels)?;
        channels
            .iter()
            .zip(self.mask.iter())
            .map(|(c, mask)| c.hadamard(mask))
            .collect()
    }
}
