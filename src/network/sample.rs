use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// One training or test example: input channels plus a one-hot target column.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub inputs: Vec<Matrix>,
    pub target: Matrix,
}

impl Sample {
    pub fn new(inputs: Vec<Matrix>, target: Matrix) -> Sample {
        Sample { inputs, target }
    }

    /// Single-channel, single-column input with a one-hot target for `class`
    /// out of `classes`.
    pub fn from_vector(values: Vec<f64>, class: usize, classes: usize) -> Result<Sample> {
        Ok(Sample {
            inputs: vec![Matrix::column(values)],
            target: one_hot(class, classes)?,
        })
    }

    /// Index of the expected class.
    pub fn class(&self) -> Result<usize> {
        self.target.argmax()
    }
}

pub fn one_hot(class: usize, classes: usize) -> Result<Matrix> {
    if class >= classes {
        return Err(Error::shape(format!("class {} out of range for {} classes", class, classes)));
    }
    let mut values = vec![0.0; classes];
    values[class] = 1.0;
    Ok(Matrix::column(values))
}
