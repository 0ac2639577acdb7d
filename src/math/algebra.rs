//! Sliding-window kernels and reshaping on top of [`Matrix`].
//!
//! Cross-correlation and convolution are related by a 180° rotation of the
//! kernel: `convolve_full(x, k) == cross_correlate_valid(pad(x, k-1), rotate180(k), 1)`.

use crate::error::{Error, Result};
use crate::math::matrix::Matrix;

/// Marks a pooling output cell whose window produced no maximum.
pub const NO_ARGMAX: f64 = -1.0;

/// "Valid" cross-correlation: the kernel slides over the input without
/// padding, producing `(in - kernel) / stride + 1` cells per axis.
pub fn cross_correlate_valid(input: &Matrix, kernel: &Matrix, stride: usize) -> Result<Matrix> {
    if stride == 0 {
        return Err(Error::config("stride must be at least 1"));
    }
    if kernel.rows() > input.rows() || kernel.cols() > input.cols() {
        return Err(Error::shape(format!(
            "kernel {}x{} larger than input {}x{}",
            kernel.rows(),
            kernel.cols(),
            input.rows(),
            input.cols()
        )));
    }

    let out_rows = (input.rows() - kernel.rows()) / stride + 1;
    let out_cols = (input.cols() - kernel.cols()) / stride + 1;
    let mut out = Matrix::zeros(out_rows, out_cols);

    for i in 0..out_rows {
        for j in 0..out_cols {
            let (top, left) = (i * stride, j * stride);
            let mut sum = 0.0;
            for a in 0..kernel.rows() {
                let r = top + a;
                if r >= input.rows() {
                    break;
                }
                for b in 0..kernel.cols() {
                    let c = left + b;
                    if c >= input.cols() {
                        break;
                    }
                    sum += input.at(r, c) * kernel.at(a, b);
                }
            }
            *out.at_mut(i, j) = sum;
        }
    }
    Ok(out)
}

/// "Full" convolution: every overlap of kernel and input, including partial
/// overlaps at the border, contributes. Output is `in + kernel - 1` per axis.
pub fn convolve_full(input: &Matrix, kernel: &Matrix) -> Matrix {
    let mut out = Matrix::zeros(
        input.rows() + kernel.rows() - 1,
        input.cols() + kernel.cols() - 1,
    );
    for i in 0..input.rows() {
        for j in 0..input.cols() {
            let x = input.at(i, j);
            if x == 0.0 {
                continue;
            }
            for a in 0..kernel.rows() {
                for b in 0..kernel.cols() {
                    *out.at_mut(i + a, j + b) += x * kernel.at(a, b);
                }
            }
        }
    }
    out
}

pub fn rotate180(m: &Matrix) -> Matrix {
    let (rows, cols) = m.shape();
    let mut out = Matrix::zeros(rows, cols);
    for i in 0..rows {
        for j in 0..cols {
            *out.at_mut(rows - 1 - i, cols - 1 - j) = m.at(i, j);
        }
    }
    out
}

/// Surrounds `m` with `amount` cells of `value` on every side.
pub fn pad(m: &Matrix, amount: usize, value: f64) -> Matrix {
    let mut out = Matrix::zeros(m.rows() + 2 * amount, m.cols() + 2 * amount);
    for i in 0..out.rows() {
        for j in 0..out.cols() {
            let inside = i >= amount && j >= amount && i - amount < m.rows() && j - amount < m.cols();
            *out.at_mut(i, j) = if inside { m.at(i - amount, j - amount) } else { value };
        }
    }
    out
}

/// Max-pooling over `size`×`size` windows advanced by `stride`.
///
/// Returns `(maxima, argmax)`. Each argmax cell holds the row-major linear
/// index (`row * input.cols() + col`) of the input cell that won its window,
/// or [`NO_ARGMAX`] when no value in the window compared greater than -inf.
pub fn max_pool(input: &Matrix, size: usize, stride: usize) -> Result<(Matrix, Matrix)> {
    if size == 0 || stride == 0 {
        return Err(Error::config("pool size and stride must be at least 1"));
    }
    if size > input.rows() || size > input.cols() {
        return Err(Error::shape(format!(
            "pool window {} larger than input {}x{}",
            size,
            input.rows(),
            input.cols()
        )));
    }

    let out_rows = (input.rows() - size) / stride + 1;
    let out_cols = (input.cols() - size) / stride + 1;
    let mut maxima = Matrix::zeros(out_rows, out_cols);
    let mut argmax = Matrix::zeros(out_rows, out_cols);

    for i in 0..out_rows {
        for j in 0..out_cols {
            let mut best = f64::NEG_INFINITY;
            let mut best_idx = NO_ARGMAX;
            for a in 0..size {
                for b in 0..size {
                    let (r, c) = (i * stride + a, j * stride + b);
                    let v = input.at(r, c);
                    if v > best {
                        best = v;
                        best_idx = (r * input.cols() + c) as f64;
                    }
                }
            }
            *maxima.at_mut(i, j) = if best_idx == NO_ARGMAX { 0.0 } else { best };
            *argmax.at_mut(i, j) = best_idx;
        }
    }
    Ok((maxima, argmax))
}

/// Routes each pooled gradient back to the input cell recorded in `argmax`.
/// Cells that did not win a window stay zero; sentinel entries are skipped.
pub fn max_unpool(grad: &Matrix, argmax: &Matrix, rows: usize, cols: usize) -> Result<Matrix> {
    if !grad.same_shape(argmax) {
        return Err(Error::shape(format!(
            "pool gradient {}x{} does not match argmax map {}x{}",
            grad.rows(),
            grad.cols(),
            argmax.rows(),
            argmax.cols()
        )));
    }
    let mut out = Matrix::zeros(rows, cols);
    for i in 0..grad.rows() {
        for j in 0..grad.cols() {
            let idx = argmax.at(i, j);
            if idx < 0.0 {
                continue;
            }
            let idx = idx as usize;
            let (r, c) = (idx / cols, idx % cols);
            if r >= rows {
                return Err(Error::OutOfRange { row: r, col: c, rows, cols });
            }
            *out.at_mut(r, c) += grad.at(i, j);
        }
    }
    Ok(out)
}

/// Concatenates same-shaped channels into one column, channel-major then
/// row-major.
pub fn flatten(channels: &[Matrix]) -> Result<Matrix> {
    let first = channels
        .first()
        .ok_or_else(|| Error::shape("cannot flatten an empty channel list"))?;
    if let Some(bad) = channels.iter().position(|c| !c.same_shape(first)) {
        return Err(Error::shape(format!(
            "channel {} is {}x{}, expected {}x{}",
            bad,
            channels[bad].rows(),
            channels[bad].cols(),
            first.rows(),
            first.cols()
        )));
    }
    Ok(Matrix::column(channels.iter().flat_map(|c| c.values()).collect()))
}

/// Exact inverse of [`flatten`].
pub fn unflatten(column: &Matrix, depth: usize, rows: usize, cols: usize) -> Result<Vec<Matrix>> {
    if rows == 0 || cols == 0 || column.cols() != 1 || column.rows() != depth * rows * cols {
        return Err(Error::shape(format!(
            "cannot unflatten {}x{} into {} channels of {}x{}",
            column.rows(),
            column.cols(),
            depth,
            rows,
            cols
        )));
    }
    let values: Vec<f64> = column.values().collect();
    values
        .chunks(rows * cols)
        .map(|chunk| Matrix::from_data(chunk.chunks(cols).map(|r| r.to_vec()).collect()))
        .collect()
}
