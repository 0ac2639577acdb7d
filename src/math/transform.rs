//! Geometric resampling used by image-augmentation code before samples enter
//! the network. Both transforms use nearest-neighbour sampling and keep the
//! cell type as-is, so pixel intensities are never blended.

use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Nearest-neighbour resize to `rows`×`cols`.
pub fn resize(m: &Matrix, rows: usize, cols: usize) -> Result<Matrix> {
    if rows == 0 || cols == 0 {
        return Err(Error::shape("cannot resize to an empty matrix"));
    }
    if m.rows() == 0 || m.cols() == 0 {
        return Err(Error::shape("cannot resize an empty matrix"));
    }
    let row_ratio = m.rows() as f64 / rows as f64;
    let col_ratio = m.cols() as f64 / cols as f64;
    let mut out = Matrix::zeros(rows, cols);
    for i in 0..rows {
        let src_r = (((i as f64 + 0.5) * row_ratio) as usize).min(m.rows() - 1);
        for j in 0..cols {
            let src_c = (((j as f64 + 0.5) * col_ratio) as usize).min(m.cols() - 1);
            *out.at_mut(i, j) = m.at(src_r, src_c);
        }
    }
    Ok(out)
}

/// Scales the content by `factor` around the centre, keeping the original
/// dimensions. Cells that sample outside the source take `fill`.
pub fn scale(m: &Matrix, factor: f64, fill: f64) -> Result<Matrix> {
    if !(factor.is_finite() && factor > 0.0) {
        return Err(Error::config(format!("scale factor must be positive, got {}", factor)));
    }
    let (cy, cx) = centre(m);
    Ok(sample(m, fill, |y, x| (cy + (y - cy) / factor, cx + (x - cx) / factor)))
}

/// Rotates the content by `degrees` (counter-clockwise) around the centre,
/// keeping the original dimensions. Cells that sample outside take `fill`.
pub fn rotate(m: &Matrix, degrees: f64, fill: f64) -> Matrix {
    let theta = degrees * PI / 180.0;
    let (sin, cos) = theta.sin_cos();
    let (cy, cx) = centre(m);
    // Inverse mapping: rotate each destination cell back by -theta.
    sample(m, fill, |y, x| {
        let (dy, dx) = (y - cy, x - cx);
        (cy + dx * sin + dy * cos, cx + dx * cos - dy * sin)
    })
}

fn centre(m: &Matrix) -> (f64, f64) {
    ((m.rows() as f64 - 1.0) / 2.0, (m.cols() as f64 - 1.0) / 2.0)
}

fn sample<F>(m: &Matrix, fill: f64, source: F) -> Matrix
where
    F: Fn(f64, f64) -> (f64, f64),
{
    let mut out = Matrix::zeros(m.rows(), m.cols());
    for i in 0..m.rows() {
        for j in 0..m.cols() {
            let (sy, sx) = source(i as f64, j as f64);
            let (r, c) = (sy.round(), sx.round());
            *out.at_mut(i, j) = if r >= 0.0 && c >= 0.0 && (r as usize) < m.rows() && (c as usize) < m.cols() {
                m.at(r as usize, c as usize)
            } else {
                fill
            };
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(data: Vec<Vec<f64>>) -> Matrix {
        Matrix::from_data(data).unwrap()
    }

    #[test]
    fn resize_doubles_nearest() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        let big = resize(&a, 4, 4).unwrap();
        assert_eq!(big.at(0, 0), 1.0);
        assert_eq!(big.at(1, 1), 1.0);
        assert_eq!(big.at(3, 3), 4.0);
        assert_eq!(big.at(0, 3), 2.0);
    }

    #[test]
    fn empty_source_is_rejected() {
        assert!(matches!(resize(&Matrix::zeros(0, 3), 2, 2), Err(Error::DimensionMismatch(_))));
        assert!(resize(&Matrix::zeros(3, 0), 2, 2).is_err());
        assert!(resize(&m(vec![vec![1.0]]), 0, 2).is_err());
        assert_eq!(rotate(&Matrix::zeros(0, 3), 45.0, 0.0).shape(), (0, 3));
    }

    #[test]
    fn rotate_zero_and_half_turn() {
        let a = m(vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0, 9.0]]);
        assert_eq!(rotate(&a, 0.0, 0.0), a);
        assert_eq!(rotate(&a, 180.0, 0.0), crate::math::algebra::rotate180(&a));
    }

    #[test]
    fn quarter_turn_is_counter_clockwise() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        // top-right moves to top-left
        let r = rotate(&a, 90.0, 0.0);
        assert_eq!(r, m(vec![vec![2.0, 4.0], vec![1.0, 3.0]]));
    }

    #[test]
    fn unit_scale_is_identity() {
        let a = m(vec![vec![1.0, 2.0], vec![3.0, 4.0]]);
        assert_eq!(scale(&a, 1.0, 0.0).unwrap(), a);
        assert!(scale(&a, 0.0, 0.0).is_err());
    }
}
