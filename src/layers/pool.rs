use crate::error::{Error, Result};
use crate::layers::LayerOutput;
use crate::math::algebra::{max_pool, max_unpool};
use crate::math::matrix::Matrix;
use crate::network::shape::Shape;

/// Max-pooling applied to every channel independently. No learnable state.
#[derive(Debug, Clone)]
pub struct Pool {
    input_shape: Shape,
    size: usize,
    stride: usize,
}

impl Pool {
    pub fn new(input_shape: Shape, size: usize, stride: usize) -> Result<Pool> {
        if size == 0 || stride == 0 {
            return Err(Error::architecture("pool size and stride must be at least 1"));
        }
        if size > input_shape.rows || size > input_shape.cols {
            return Err(Error::architecture(format!(
                "pool window {} does not fit input {}x{}",
                size, input_shape.rows, input_shape.cols
            )));
        }
        Ok(Pool {
            input_shape,
            size,
            stride,
        })
    }

    pub fn input_shape(&self) -> Shape {
        self.input_shape
    }

    pub fn output_shape(&self) -> Shape {
        Shape::new(
            self.input_shape.depth,
            (self.input_shape.rows - self.size) / self.stride + 1,
            (self.input_shape.cols - self.size) / self.stride + 1,
        )
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Window maxima plus the argmax map of each channel.
    pub fn forward(&self, inputs: &[Matrix]) -> Result<LayerOutput> {
        self.input_shape.check(inputs)?;
        let (activated, auxiliary): (Vec<Matrix>, Vec<Matrix>) = inputs
            .iter()
            .map(|c| max_pool(c, self.size, self.stride))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        Ok(LayerOutput { activated, auxiliary })
    }

    /// Scatters each incoming gradient onto the cell that won its window.
    pub fn backward(&self, error: &[Matrix], aux: &[Matrix]) -> Result<Vec<Matrix>> {
        let out = self.output_shape();
        out.check(error)?;
        out.check(aux)?;
        error
            .iter()
            .zip(aux.iter())
            .map(|(e, argmax)| max_unpool(e, argmax, self.input_shape.rows, self.input_shape.cols))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_gradient_lands_on_argmax_only() {
        let pool = Pool::new(Shape::new(1, 2, 2), 2, 2).unwrap();
        let x = Matrix::from_data(vec![vec![0.1, 0.7], vec![0.3, -0.2]]).unwrap();
        let out = pool.forward(&[x]).unwrap();
        assert_eq!(out.activated[0], Matrix::column(vec![0.7]));

        let back = pool.backward(&[Matrix::column(vec![1.0])], &out.auxiliary).unwrap();
        assert_eq!(back[0], Matrix::from_data(vec![vec![0.0, 1.0], vec![0.0, 0.0]]).unwrap());
    }

    #[test]
    fn window_must_fit() {
        assert!(Pool::new(Shape::new(1, 2, 2), 3, 1).is_err());
        assert!(Pool::new(Shape::new(1, 4, 4), 2, 0).is_err());
    }
}
