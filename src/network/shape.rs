use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Tensor shape flowing between layers: `depth` channels of `rows`×`cols`.
///
/// Serialized as the string `"depth rows cols"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Shape {
    pub depth: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Shape {
    pub fn new(depth: usize, rows: usize, cols: usize) -> Shape {
        Shape { depth, rows, cols }
    }

    /// One single-column channel of `size` values.
    pub fn vector(size: usize) -> Shape {
        Shape::new(1, size, 1)
    }

    pub fn len(&self) -> usize {
        self.depth * self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_vector(&self) -> bool {
        self.depth == 1 && self.cols == 1
    }

    /// Fails unless `channels` has exactly this shape.
    pub fn check(&self, channels: &[Matrix]) -> Result<()> {
        if channels.len() != self.depth {
            return Err(Error::shape(format!(
                "expected {} channel(s), got {}",
                self.depth,
                channels.len()
            )));
        }
        for (i, c) in channels.iter().enumerate() {
            if c.rows() != self.rows || c.cols() != self.cols {
                return Err(Error::shape(format!(
                    "channel {} is {}x{}, expected {}x{}",
                    i,
                    c.rows(),
                    c.cols(),
                    self.rows,
                    self.cols
                )));
            }
        }
        Ok(())
    }

    pub fn zeros(&self) -> Vec<Matrix> {
        (0..self.depth).map(|_| Matrix::zeros(self.rows, self.cols)).collect()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.depth, self.rows, self.cols)
    }
}

impl FromStr for Shape {
    type Err = Error;

    fn from_str(s: &str) -> Result<Shape> {
        let parts = s
            .split_whitespace()
            .map(|p| p.parse::<usize>().map_err(|_| Error::parse(format!("bad shape component '{}'", p))))
            .collect::<Result<Vec<usize>>>()?;
        match parts.as_slice() {
            [depth, rows, cols] if *depth > 0 && *rows > 0 && *cols > 0 => Ok(Shape::new(*depth, *rows, *cols)),
            _ => Err(Error::parse(format!("shape must be 'depth rows cols', got '{}'", s))),
        }
    }
}

impl TryFrom<String> for Shape {
    type Error = Error;

    fn try_from(value: String) -> Result<Shape> {
        value.parse()
    }
}

impl From<Shape> for String {
    fn from(s: Shape) -> String {
        s.to_string()
    }
}
