use crate::linalg::operator::diagonal;
use nalgebra_sparse::CsrMatrix;

/// Applies `z = M^-1 r`.
pub trait Preconditioner: Send + Sync {
    fn apply(&self, r: &[f64], z: &mut [f64]);
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Default)]
pub struct IdentityPreconditioner;

impl Preconditioner for IdentityPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.copy_from_slice(r);
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// Diagonal scaling; rows with a vanishing diagonal pass through unscaled.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner {
    inv_diag: Vec<f64>,
}

impl JacobiPreconditioner {
    pub fn from_matrix(matrix: &CsrMatrix<f64>) -> Self {
        Self::from_diagonal(&diagonal(matrix))
    }

    pub fn from_diagonal(diag: &[f64]) -> Self {
        let scale = diag.iter().map(|d| d.abs()).fold(0.0, f64::max);
        let threshold = 1e-14 * scale.max(f64::MIN_POSITIVE);
        JacobiPreconditioner {
            inv_diag: diag
                .iter()
                .map(|&d| if d.abs() > threshold { 1.0 / d } else { 1.0 })
                .collect(),
        }
    }
}

impl Preconditioner for JacobiPreconditioner {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        for ((zi, &ri), &d) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = ri * d;
        }
    }

    fn name(&self) -> &'static str {
        "jacobi"
    }
}
