// Property checks for the Matrix primitive and the convolution / pooling
// helpers built on top of it.

use convnet::activation::activation::softmax;
use convnet::loss::CrossEntropyLoss;
use convnet::math::algebra::{convolve_full, cross_correlate_valid, flatten, max_pool, max_unpool, unflatten};
use convnet::{Error, Matrix};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn random(rows: usize, cols: usize, seed: u64) -> Matrix {
    Matrix::random_uniform(rows, cols, 2.0, &mut StdRng::seed_from_u64(seed))
}

// ============================================================================
// Basic algebra
// ============================================================================

#[test]
fn transpose_is_an_involution() {
    for (seed, (r, c)) in [(1, 1), (2, 5), (7, 3), (4, 4)].into_iter().enumerate() {
        let m = random(r, c, seed as u64);
        assert_eq!(m.transpose().transpose(), m);
    }
}

#[test]
fn dot_fails_exactly_when_inner_dimensions_differ() {
    let a = random(2, 3, 1);
    assert!(a.dot(&random(3, 4, 2)).is_ok());
    assert!(matches!(a.dot(&random(2, 4, 3)), Err(Error::DimensionMismatch(_))));
    assert!(a.dot(&random(4, 3, 4)).is_err());
}

#[test]
fn elementwise_ops_fail_on_shape_mismatch() {
    let a = random(2, 3, 1);
    let b = random(3, 2, 2);
    assert!(a.add(&b).is_err());
    assert!(a.sub(&b).is_err());
    assert!(a.hadamard(&b).is_err());
    assert!(a.add(&random(2, 3, 3)).is_ok());
}

#[test]
fn out_of_range_access_is_reported() {
    let mut m = Matrix::zeros(2, 2);
    assert!(matches!(m.get(2, 0), Err(Error::OutOfRange { row: 2, col: 0, .. })));
    assert!(m.set(0, 5, 1.0).is_err());
    m.set(1, 1, 3.0).unwrap();
    assert_eq!(m.get(1, 1).unwrap(), 3.0);
}

#[test]
fn argmax_requires_a_single_column() {
    assert_eq!(Matrix::column(vec![0.1, 0.7, 0.2]).argmax().unwrap(), 1);
    assert!(Matrix::zeros(2, 2).argmax().is_err());
}

#[test]
fn text_format_round_trips() {
    let m = Matrix::from_data(vec![vec![1.5, -2.0], vec![0.0, 3.25]]).unwrap();
    assert_eq!(m.to_string(), "1.5 -2\n0 3.25");
    assert_eq!(m.to_string().parse::<Matrix>().unwrap(), m);
    assert!("1 2\n3".parse::<Matrix>().is_err());
}

// ============================================================================
// Convolution, pooling, flattening
// ============================================================================

#[test]
fn flatten_then_unflatten_restores_channels() {
    let channels: Vec<Matrix> = (0..3).map(|i| random(4, 5, i)).collect();
    let column = flatten(&channels).unwrap();
    assert_eq!(column.shape(), (60, 1));
    assert_eq!(unflatten(&column, 3, 4, 5).unwrap(), channels);
}

#[test]
fn full_convolution_of_valid_output_restores_input_shape() {
    for (rows, cols, k) in [(5, 5, 3), (6, 4, 2), (7, 9, 4), (3, 3, 3)] {
        let input = random(rows, cols, 1);
        let kernel = random(k, k, 2);
        let out = cross_correlate_valid(&input, &kernel, 1).unwrap();
        assert_eq!(out.shape(), (rows - k + 1, cols - k + 1));
        assert_eq!(convolve_full(&out, &kernel).shape(), (rows, cols));
    }
}

#[test]
fn unpool_routes_gradient_to_the_unique_maximum() {
    let input = Matrix::from_data(vec![
        vec![1.0, 9.0, 2.0, 0.0],
        vec![3.0, 4.0, 8.0, 1.0],
        vec![0.0, 5.0, 1.0, 1.0],
        vec![7.0, 2.0, 3.0, 6.0],
    ])
    .unwrap();
    let (maxima, argmax) = max_pool(&input, 2, 2).unwrap();
    assert_eq!(maxima, Matrix::from_data(vec![vec![9.0, 8.0], vec![7.0, 6.0]]).unwrap());

    let ones = Matrix::from_data(vec![vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
    let back = max_unpool(&ones, &argmax, 4, 4).unwrap();
    for r in 0..4 {
        for c in 0..4 {
            let expected = if [(0, 1), (1, 2), (3, 0), (3, 3)].contains(&(r, c)) { 1.0 } else { 0.0 };
            assert_eq!(back.get(r, c).unwrap(), expected, "cell ({}, {})", r, c);
        }
    }
}

// ============================================================================
// Softmax and cross-entropy
// ============================================================================

#[test]
fn softmax_is_a_distribution() {
    for seed in 0..10 {
        let z = random(6, 1, seed).scale(50.0);
        let s = softmax(&z);
        assert!((s.sum() - 1.0).abs() < 1e-6);
        assert!(s.values().all(|v| v >= 0.0));
    }
}

#[test]
fn cross_entropy_grows_as_true_class_probability_falls() {
    let target = Matrix::column(vec![0.0, 1.0]);
    let perfect = CrossEntropyLoss::clamp(&Matrix::column(vec![0.0, 1.0]));
    assert!(CrossEntropyLoss::loss(&perfect, &target).unwrap() < 1e-6);

    let mut last = 0.0;
    for p in [0.99, 0.8, 0.5, 0.2, 0.01] {
        let predicted = CrossEntropyLoss::clamp(&Matrix::column(vec![1.0 - p, p]));
        let cost = CrossEntropyLoss::loss(&predicted, &target).unwrap();
        assert!(cost > last);
        last = cost;
    }
}
