//! Preconditioned conjugate gradients for symmetric positive definite systems.

use crate::error::{RiftError, RiftResult};
use crate::linalg::operator::LinearOperator;
use crate::linalg::preconditioner::Preconditioner;
use crate::linalg::vector_ops::{axpy, dot, norm2, xpby};
use serde::{Deserialize, Serialize};

/// Relative residual below which iterating further only feeds round-off.
const STAGNATION_FLOOR: f64 = 1e-14;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub rtol: f64,
    pub atol: f64,
    /// Iterations performed even when the tolerance is met earlier.
    pub min_iterations: usize,
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            rtol: 1e-8,
            atol: 1e-300,
            min_iterations: 0,
            max_iterations: 1000,
        }
    }
}

impl SolverConfig {
    pub fn new(rtol: f64, max_iterations: usize) -> Self {
        SolverConfig {
            rtol,
            max_iterations,
            ..Default::default()
        }
    }

    pub fn with_min_iterations(mut self, min_iterations: usize) -> Self {
        self.min_iterations = min_iterations;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverStatus {
    Converged,
    MaxIterationsReached,
    /// `p^T A p` vanished; the operator is singular along the search direction.
    Breakdown,
}

#[derive(Debug, Clone)]
pub struct SolverResult {
    pub status: SolverStatus,
    pub iterations: usize,
    pub residual_norm: f64,
    pub initial_residual_norm: f64,
    pub relative_residual: f64,
}

impl SolverResult {
    pub fn converged(iterations: usize, residual_norm: f64, initial_residual_norm: f64) -> Self {
        SolverResult {
            status: SolverStatus::Converged,
            iterations,
            residual_norm,
            initial_residual_norm,
            relative_residual: relative(residual_norm, initial_residual_norm),
        }
    }

    pub fn is_converged(&self) -> bool {
        self.status == SolverStatus::Converged
    }

    /// Turns a non-converged result into a `ConvergenceFailure`.
    pub fn require_converged(self, solver: &'static str, tolerance: f64) -> RiftResult<Self> {
        if self.is_converged() {
            Ok(self)
        } else {
            Err(RiftError::ConvergenceFailure {
                solver,
                iterations: self.iterations,
                residual: self.relative_residual,
                tolerance,
            })
        }
    }
}

fn relative(norm: f64, reference: f64) -> f64 {
    if reference > 0.0 { norm / reference } else { 0.0 }
}

/// Solves `A x = b` starting from the incoming `x`.
pub fn pcg<A, P>(matrix: &A, b: &[f64], x: &mut [f64], precond: &P, config: &SolverConfig) -> RiftResult<SolverResult>
where
    A: LinearOperator + ?Sized,
    P: Preconditioner + ?Sized,
{
    let n = b.len();
    if matrix.dimension() != n || x.len() != n {
        return Err(RiftError::instability(format!(
            "system size mismatch: operator {}, rhs {}, solution {}",
            matrix.dimension(),
            n,
            x.len()
        )));
    }

    // reference norm is ||b|| so a good initial guess shows up as early convergence
    let b_norm = norm2(b);
    let mut r = vec![0.0; n];
    matrix.apply(x, &mut r);
    for (ri, &bi) in r.iter_mut().zip(b) {
        *ri = bi - *ri;
    }
    let initial_norm = norm2(&r);
    let reference = if b_norm > 0.0 { b_norm } else { initial_norm };

    if initial_norm <= config.atol || reference == 0.0 {
        return Ok(SolverResult::converged(0, initial_norm, reference));
    }

    let mut z = vec![0.0; n];
    precond.apply(&r, &mut z);
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz = dot(&r, &z);

    for iter in 0..config.max_iterations {
        matrix.apply(&p, &mut ap);
        let pap = dot(&p, &ap);
        if !pap.is_finite() {
            return Err(RiftError::instability("non-finite value in conjugate gradient iteration"));
        }
        if pap <= 0.0 {
            let res = norm2(&r);
            let rel = relative(res, reference);
            let status = if rel < config.rtol { SolverStatus::Converged } else { SolverStatus::Breakdown };
            return Ok(SolverResult {
                status,
                iterations: iter,
                residual_norm: res,
                initial_residual_norm: reference,
                relative_residual: rel,
            });
        }

        let alpha = rz / pap;
        axpy(alpha, &p, x);
        axpy(-alpha, &ap, &mut r);

        let res = norm2(&r);
        let rel = relative(res, reference);
        log::trace!("pcg[{}] iter {}: relative residual {:.3e}", precond.name(), iter + 1, rel);

        let met = res <= config.atol || rel < config.rtol;
        if (met && iter + 1 >= config.min_iterations) || rel < STAGNATION_FLOOR {
            return Ok(SolverResult::converged(iter + 1, res, reference));
        }

        precond.apply(&r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz;
        rz = rz_new;
        xpby(&z, beta, &mut p);
    }

    let res = norm2(&r);
    Ok(SolverResult {
        status: SolverStatus::MaxIterationsReached,
        iterations: config.max_iterations,
        residual_norm: res,
        initial_residual_norm: reference,
        relative_residual: relative(res, reference),
    })
}
