pub mod algebra;
pub mod matrix;
pub mod transform;

pub use matrix::Matrix;
