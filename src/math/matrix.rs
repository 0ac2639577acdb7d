use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Dense 2-D matrix of `f64`.
///
/// Dimensions are fixed at construction; only the cell values are mutable.
/// On disk (and inside model JSON) a matrix is its text form: one line per
/// row, values separated by single spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<Vec<f64>>,
}

impl Matrix {
    pub fn zeros(rows: usize, cols: usize) -> Matrix {
        Matrix {
            rows,
            cols,
            data: vec![vec![0.0; cols]; rows],
        }
    }

    /// Single-column matrix holding `values` top to bottom.
    pub fn column(values: Vec<f64>) -> Matrix {
        Matrix {
            rows: values.len(),
            cols: 1,
            data: values.into_iter().map(|v| vec![v]).collect(),
        }
    }

    /// Builds a matrix from explicit rows. Fails on empty or ragged input.
    pub fn from_data(data: Vec<Vec<f64>>) -> Result<Matrix> {
        let cols = data.first().map(|r| r.len()).unwrap_or(0);
        if data.is_empty() || cols == 0 {
            return Err(Error::shape("matrix must have at least one row and one column"));
        }
        if let Some(bad) = data.iter().position(|r| r.len() != cols) {
            return Err(Error::shape(format!(
                "row {} has {} values, expected {}",
                bad,
                data[bad].len(),
                cols
            )));
        }
        Ok(Matrix {
            rows: data.len(),
            cols,
            data,
        })
    }

    /// Uniform samples in `[-limit, limit)`.
    pub fn random_uniform<R: Rng + ?Sized>(rows: usize, cols: usize, limit: f64, rng: &mut R) -> Matrix {
        let mut res = Matrix::zeros(rows, cols);
        for row in res.data.iter_mut() {
            for cell in row.iter_mut() {
                *cell = rng.gen::<f64>() * 2.0 * limit - limit;
            }
        }
        res
    }

    /// He initialization: uniform in ±sqrt(6 / fan_in).
    ///
    /// Used for ReLU-activated layers, where half of the activations are
    /// zeroed on average.
    pub fn he<R: Rng + ?Sized>(rows: usize, cols: usize, fan_in: usize, rng: &mut R) -> Matrix {
        let limit = (6.0 / fan_in.max(1) as f64).sqrt();
        Matrix::random_uniform(rows, cols, limit, rng)
    }

    /// Xavier (Glorot) initialization: uniform in ±sqrt(6 / (fan_in + fan_out)).
    ///
    /// Used for Sigmoid and Softmax layers.
    pub fn xavier<R: Rng + ?Sized>(
        rows: usize,
        cols: usize,
        fan_in: usize,
        fan_out: usize,
        rng: &mut R,
    ) -> Matrix {
        let limit = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        Matrix::random_uniform(rows, cols, limit, rng)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn same_shape(&self, other: &Matrix) -> bool {
        self.rows == other.rows && self.cols == other.cols
    }

    /// Row-major view of the cells.
    pub fn data(&self) -> &[Vec<f64>] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> Result<f64> {
        self.check_index(row, col)?;
        Ok(self.data[row][col])
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<()> {
        self.check_index(row, col)?;
        self.data[row][col] = value;
        Ok(())
    }

    fn check_index(&self, row: usize, col: usize) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(Error::OutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            });
        }
        Ok(())
    }

    /// Unchecked accessors for the numeric kernels, which derive every index
    /// from the shapes they have already validated.
    #[inline]
    pub(crate) fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row][col]
    }

    #[inline]
    pub(crate) fn at_mut(&mut self, row: usize, col: usize) -> &mut f64 {
        &mut self.data[row][col]
    }

    /// All cells in row-major order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().flat_map(|row| row.iter().copied())
    }

    pub fn map<F>(&self, functor: F) -> Matrix
    where
        F: Fn(f64) -> f64,
    {
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data: self
                .data
                .iter()
                .map(|row| row.iter().map(|&x| functor(x)).collect())
                .collect(),
        }
    }

    pub fn add_scalar(&self, value: f64) -> Matrix {
        self.map(|x| x + value)
    }

    pub fn scale(&self, factor: f64) -> Matrix {
        self.map(|x| x * factor)
    }

    pub fn add(&self, rhs: &Matrix) -> Result<Matrix> {
        self.zip_with(rhs, "add", |a, b| a + b)
    }

    pub fn sub(&self, rhs: &Matrix) -> Result<Matrix> {
        self.zip_with(rhs, "subtract", |a, b| a - b)
    }

    /// Element-wise (Hadamard) product.
    pub fn hadamard(&self, rhs: &Matrix) -> Result<Matrix> {
        self.zip_with(rhs, "multiply", |a, b| a * b)
    }

    /// In-place element-wise sum, used by gradient accumulators.
    pub fn add_assign(&mut self, rhs: &Matrix) -> Result<()> {
        self.require_same_shape(rhs, "add")?;
        for (row, other) in self.data.iter_mut().zip(rhs.data.iter()) {
            for (a, b) in row.iter_mut().zip(other.iter()) {
                *a += b;
            }
        }
        Ok(())
    }

    fn zip_with<F>(&self, rhs: &Matrix, op: &str, f: F) -> Result<Matrix>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.require_same_shape(rhs, op)?;
        let data = self
            .data
            .iter()
            .zip(rhs.data.iter())
            .map(|(row_a, row_b)| row_a.iter().zip(row_b.iter()).map(|(&a, &b)| f(a, b)).collect())
            .collect();
        Ok(Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        })
    }

    fn require_same_shape(&self, rhs: &Matrix, op: &str) -> Result<()> {
        if !self.same_shape(rhs) {
            return Err(Error::shape(format!(
                "cannot {} {}x{} and {}x{}",
                op, self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        Ok(())
    }

    /// Matrix product `self · rhs`.
    pub fn dot(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(Error::shape(format!(
                "cannot multiply {}x{} by {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }

        let mut res = Matrix::zeros(self.rows, rhs.cols);
        for i in 0..res.rows {
            for k in 0..self.cols {
                let a = self.data[i][k];
                if a == 0.0 {
                    continue;
                }
                for j in 0..res.cols {
                    res.data[i][j] += a * rhs.data[k][j];
                }
            }
        }
        Ok(res)
    }

    pub fn transpose(&self) -> Matrix {
        let mut res = Matrix::zeros(self.cols, self.rows);
        for i in 0..res.rows {
            for j in 0..res.cols {
                res.data[i][j] = self.data[j][i];
            }
        }
        res
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.values().map(|x| x * x).sum::<f64>().sqrt()
    }

    pub fn sum(&self) -> f64 {
        self.values().sum()
    }

    pub fn max(&self) -> f64 {
        self.values().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Row index of the largest value of a single-column matrix. Ties resolve
    /// to the first row.
    pub fn argmax(&self) -> Result<usize> {
        if self.cols != 1 {
            return Err(Error::shape(format!(
                "argmax needs a single column, matrix has {}",
                self.cols
            )));
        }
        let mut best = 0;
        for i in 1..self.rows {
            if self.data[i][0] > self.data[best][0] {
                best = i;
            }
        }
        Ok(best)
    }
}

impl fmt::Display for Matrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.data.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            for (j, v) in row.iter().enumerate() {
                if j > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{}", v)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Matrix {
    type Err = Error;

    fn from_str(s: &str) -> Result<Matrix> {
        let data = s
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(i, line)| {
                line.split_whitespace()
                    .map(|tok| {
                        tok.parse::<f64>()
                            .map_err(|_| Error::parse(format!("row {}: '{}' is not a number", i, tok)))
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<Vec<f64>>>>()?;

        Matrix::from_data(data).map_err(|e| Error::parse(e.to_string()))
    }
}

impl TryFrom<String> for Matrix {
    type Error = Error;

    fn try_from(value: String) -> Result<Matrix> {
        value.parse()
    }
}

impl From<Matrix> for String {
    fn from(m: Matrix) -> String {
        m.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn m(data: Vec<Vec<f64>>) -> Matrix {
        Matrix::from_data(data).unwrap()
    }

    #[test]
    fn element_access_is_bounds_checked() {
        let mut a = Matrix::zeros(2, 3);
        a.set(1, 2, 4.5).unwrap();
        assert_eq!(a.get(1, 2).unwrap(), 4.5);
        assert!(matches!(a.get(2, 0), Err(Error::OutOfRange { .. })));
        assert!(a.set(0, 3, 1.0).is_err());
    }

    #[test]
    fn dot_product() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let b = m(vec![vec![5.0], vec![6.0]]);
        let c = a.dot(&b).unwrap();
        assert_eq!(c, m(vec![vec![17.0], vec![39.0]]));
        assert!(b.dot(&a).is_err());
    }

    #[test]
    fn elementwise_ops_require_same_shape() {
        let a = m(vec![vec![1.0, 2.0]]);
        let b = m(vec![vec![3.0, 5.0]]);
        assert_eq!(a.add(&b).unwrap(), m(vec![vec![4.0, 7.0]]));
        assert_eq!(b.sub(&a).unwrap(), m(vec![vec![2.0, 3.0]]));
        assert_eq!(a.hadamard(&b).unwrap(), m(vec![vec![3.0, 10.0]]));
        assert!(a.add(&a.transpose()).is_err());
    }

    #[test]
    fn norm_max_argmax() {
        let a = m(vec![vec![3.0], vec![-4.0], vec![2.0]]);
        assert!((a.norm() - 29.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(a.max(), 3.0);
        assert_eq!(a.argmax().unwrap(), 0);
        assert!(Matrix::zeros(2, 2).argmax().is_err());
    }

    #[test]
    fn text_round_trip() {
        let a = m(vec![vec![0.1, -2.5, 3.0], vec![1e-9, 7.25, -0.0]]);
        let text = a.to_string();
        assert_eq!(text.lines().count(), 2);
        let back: Matrix = text.parse().unwrap();
        assert_eq!(a, back);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!("1 2\n3".parse::<Matrix>().is_err());
        assert!("1 x".parse::<Matrix>().is_err());
        assert!("".parse::<Matrix>().is_err());
    }

    #[test]
    fn empty_data_is_rejected() {
        assert!(matches!(Matrix::from_data(vec![]), Err(Error::DimensionMismatch(_))));
        assert!(Matrix::from_data(vec![vec![], vec![]]).is_err());
    }

    #[test]
    fn he_and_xavier_respect_limits() {
        let mut rng = StdRng::seed_from_u64(7);
        let he = Matrix::he(20, 6, 6, &mut rng);
        assert!(he.values().all(|x| x.abs() <= 1.0));
        let xavier = Matrix::xavier(20, 10, 10, 20, &mut rng);
        let limit = (6.0_f64 / 30.0).sqrt();
        assert!(xavier.values().all(|x| x.abs() <= limit));
    }
}
