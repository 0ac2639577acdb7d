use crate::error::Result;
use crate::layers::LayerOutput;
use crate::math::algebra::{flatten, unflatten};
use crate::math::matrix::Matrix;
use crate::network::shape::Shape;

/// Feature-map to classifier bridge: flattens every channel into one column.
/// Only the feature→classification direction exists.
#[derive(Debug, Clone)]
pub struct Reshape {
    input_shape: Shape,
}

impl Reshape {
    pub fn new(input_shape: Shape) -> Reshape {
        Reshape { input_shape }
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn output_shape(&self) -> Shape {
        Shape::vector(self.input_shape.len())
    }

    pub fn forward(&self, inputs: &[Matrix]) -> Result<LayerOutput> {
        self.input_shape.check(inputs)?;
        let flat = flatten(inputs)?;
        Ok(LayerOutput {
            activated: vec![flat.clone()],
            auxiliary: vec![flat],
        })
    }

    pub fn backward(&self, error: &[Matrix]) -> Result<Vec<Matrix>> {
        self.output_shape().check(error)?;
        let s = self.input_shape;
        unflatten(&error[0], s.depth, s.rows, s.cols)
    }
}
