//! Least-squares solver for per-group linear fits

use ndarray::{Array1, Array2};

/// Solve a symmetric positive-definite system via Cholesky decomposition.
/// Returns `None` when the matrix is not positive definite.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    let mut l = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Ordinary least squares over the normal equations, with a small ridge
/// retry when the Gram matrix is near-singular (collinear or short data).
///
/// Returns `(weights, intercept)`.
pub fn fit_least_squares(x: &Array2<f64>, y: &Array1<f64>) -> Option<(Array1<f64>, f64)> {
    let n = x.nrows();
    let d = x.ncols();
    if n == 0 || n != y.len() {
        return None;
    }
    if d == 0 {
        let mean = y.iter().sum::<f64>() / n as f64;
        return Some((Array1::zeros(0), mean));
    }

    // Design matrix with a trailing intercept column.
    let mut design = Array2::ones((n, d + 1));
    for r in 0..n {
        for c in 0..d {
            design[[r, c]] = x[[r, c]];
        }
    }

    let gram = design.t().dot(&design);
    let rhs = design.t().dot(y);

    let solution = cholesky_solve(&gram, &rhs).or_else(|| {
        let mut regularized = gram.clone();
        let ridge = 1e-8 * gram.diag().iter().map(|v| v.abs()).sum::<f64>() / (d + 1) as f64;
        for k in 0..=d {
            regularized[[k, k]] += ridge.max(1e-12);
        }
        cholesky_solve(&regularized, &rhs)
    })?;

    let weights = solution.slice(ndarray::s![..d]).to_owned();
    let intercept = solution[d];
    Some((weights, intercept))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_exact_linear_relationship() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![3.0, 5.0, 7.0, 9.0]; // y = 2x + 1
        let (w, b) = fit_least_squares(&x, &y).unwrap();
        assert!((w[0] - 2.0).abs() < 1e-8);
        assert!((b - 1.0).abs() < 1e-8);
    }

    #[test]
    fn test_no_features_yields_mean() {
        let x = Array2::zeros((3, 0));
        let y = array![1.0, 2.0, 3.0];
        let (w, b) = fit_least_squares(&x, &y).unwrap();
        assert_eq!(w.len(), 0);
        assert!((b - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_collinear_features_still_solve() {
        // Second column duplicates the first; ridge retry must kick in.
        let x = array![[1.0, 1.0], [2.0, 2.0], [3.0, 3.0], [4.0, 4.0]];
        let y = array![2.0, 4.0, 6.0, 8.0];
        let (w, b) = fit_least_squares(&x, &y).unwrap();
        let predicted = 5.0 * w[0] + 5.0 * w[1] + b;
        assert!((predicted - 10.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_input_rejected() {
        let x = Array2::zeros((0, 2));
        let y = Array1::zeros(0);
        assert!(fit_least_squares(&x, &y).is_none());
    }
}
