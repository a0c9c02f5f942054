//! Dense linear least squares via SVD.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};

/// Solution of `min ||A x - b||²`.
#[derive(Debug, Clone)]
pub struct LstsqSolution {
    pub x: DVector<f64>,
    /// Sum of squared residuals; only reported for full-rank, overdetermined
    /// systems.
    pub chisq: Option<f64>,
    pub rank: usize,
}

/// Minimum-norm least-squares solve.
///
/// Singular values below `max(m, n) · ε · σ_max` are treated as zero.
/// Non-finite inputs are rejected.
pub fn lstsq(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<LstsqSolution> {
    let (m, n) = a.shape();
    if b.len() != m {
        return Err(Error::LeastSquares(format!(
            "right-hand side has {} rows, matrix has {}",
            b.len(),
            m
        )));
    }
    if n == 0 {
        return Ok(LstsqSolution {
            x: DVector::zeros(0),
            chisq: None,
            rank: 0,
        });
    }
    if a.iter().chain(b.iter()).any(|v| !v.is_finite()) {
        return Err(Error::LeastSquares("non-finite value in input".to_string()));
    }

    let svd = a.clone().svd(true, true);
    let sigma_max = svd.singular_values.iter().copied().fold(0.0f64, f64::max);
    let eps = m.max(n) as f64 * f64::EPSILON * sigma_max;
    let rank = svd.singular_values.iter().filter(|&&s| s > eps).count();

    let x = svd
        .solve(b, eps)
        .map_err(|e| Error::LeastSquares(e.to_string()))?;

    let chisq = if rank == n && m > n {
        Some((a * &x - b).norm_squared())
    } else {
        None
    };

    Ok(LstsqSolution { x, chisq, rank })
}
