use crate::error::{RiftError, RiftResult};
use crate::linalg::cg::SolverResult;
use crate::linalg::operator::LinearOperator;
use crate::linalg::vector_ops::norm2;
use crate::linalg::LinearSolve;
use nalgebra::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};

pub(crate) fn cholesky(matrix: &CsrMatrix<f64>) -> RiftResult<CscCholesky<f64>> {
    CscCholesky::factor(&CscMatrix::from(matrix)).map_err(|e| {
        RiftError::instability(format!(
            "sparse Cholesky factorization of a {}x{} system failed: {e:?}",
            matrix.nrows(),
            matrix.ncols()
        ))
    })
}

pub(crate) fn cholesky_solve(factor: &CscCholesky<f64>, b: &[f64], x: &mut [f64]) {
    let rhs = DMatrix::from_column_slice(b.len(), 1, b);
    let solution = factor.solve(&rhs);
    x.copy_from_slice(solution.as_slice());
}

/// Sparse Cholesky factorization, refactored on every `setup`.
#[derive(Default)]
pub struct DirectSolver {
    matrix: Option<CsrMatrix<f64>>,
    factor: Option<CscCholesky<f64>>,
}

impl DirectSolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolve for DirectSolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn setup(&mut self, matrix: &CsrMatrix<f64>) -> RiftResult<()> {
        self.factor = Some(cholesky(matrix)?);
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> RiftResult<SolverResult> {
        let (Some(matrix), Some(factor)) = (&self.matrix, &self.factor) else {
            return Err(RiftError::instability("direct solve requested before factorization"));
        };
        cholesky_solve(factor, b, x);

        let mut r = vec![0.0; b.len()];
        matrix.apply(x, &mut r);
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let residual = norm2(&r);
        if !residual.is_finite() {
            return Err(RiftError::instability("direct solve produced non-finite values"));
        }
        Ok(SolverResult::converged(1, residual, norm2(b)))
    }
}
