//! Sparse linear algebra: Krylov solvers, preconditioners and the two
//! interchangeable backends for the symmetric positive definite blocks.

pub mod cg;
pub mod direct;
pub mod multigrid;
pub mod operator;
pub mod preconditioner;
pub mod vector_ops;

pub use cg::{pcg, SolverConfig, SolverResult, SolverStatus};
pub use direct::DirectSolver;
pub use multigrid::{AggregationHierarchy, MultigridCgSolver};
pub use operator::{LinearOperator, TripletBuilder};
pub use preconditioner::{IdentityPreconditioner, JacobiPreconditioner, Preconditioner};

use crate::config::{BackendChoice, MultigridOptions};
use crate::error::RiftResult;
use nalgebra_sparse::CsrMatrix;

/// A solver for a fixed SPD matrix that may be applied to many right-hand sides.
pub trait LinearSolve: Send {
    fn name(&self) -> &'static str;

    /// Factorizes or builds the hierarchy for `matrix`.
    fn setup(&mut self, matrix: &CsrMatrix<f64>) -> RiftResult<()>;

    /// Solves with `x` as the initial guess where the backend is iterative.
    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> RiftResult<SolverResult>;
}

/// Resolves `Auto` by problem size: direct factorization below `direct_max_elements`.
pub fn select_backend(
    choice: BackendChoice,
    element_count: usize,
    direct_max_elements: usize,
    multigrid: &MultigridOptions,
    config: SolverConfig,
) -> Box<dyn LinearSolve> {
    let direct = match choice {
        BackendChoice::Direct => true,
        BackendChoice::Multigrid => false,
        BackendChoice::Auto => element_count < direct_max_elements,
    };
    if direct {
        Box::new(DirectSolver::new())
    } else {
        Box::new(MultigridCgSolver::new(multigrid.clone(), config))
    }
}
