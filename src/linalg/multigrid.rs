//! Smoothed-aggregation algebraic multigrid used as a CG preconditioner.
//!
//! Unknowns are grouped by strength of connection, the piecewise-constant
//! tentative prolongator is smoothed with one damped Jacobi step, and coarse
//! operators are Galerkin products `P^T A P`. The coarsest level is factored
//! directly. Rows without strong off-diagonal couplings (eliminated Dirichlet
//! rows) stay out of every aggregate and are resolved by the smoother alone.

use crate::config::MultigridOptions;
use crate::error::{RiftError, RiftResult};
use crate::linalg::cg::{pcg, SolverConfig, SolverResult};
use crate::linalg::direct::{cholesky, cholesky_solve};
use crate::linalg::operator::{diagonal, LinearOperator};
use crate::linalg::preconditioner::Preconditioner;
use crate::linalg::vector_ops::axpy;
use crate::linalg::LinearSolve;
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

const UNASSIGNED: usize = usize::MAX;

struct Level {
    a: CsrMatrix<f64>,
    inv_diag: Vec<f64>,
    /// Damped Jacobi weight scaled by the Gershgorin bound of `D^-1 A`.
    omega: f64,
    p: CsrMatrix<f64>,
    r: CsrMatrix<f64>,
}

pub struct AggregationHierarchy {
    levels: Vec<Level>,
    coarse: CscCholesky<f64>,
    sweeps: usize,
}

/// Assigns each strongly coupled unknown to an aggregate; returns the map and the aggregate count.
pub fn aggregate(a: &CsrMatrix<f64>, theta: f64) -> (Vec<usize>, usize) {
    let n = a.nrows();
    let diag = diagonal(a);
    let strong: Vec<Vec<usize>> = (0..n)
        .map(|i| {
            let row = a.row(i);
            row.col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, &v)| j != i && v.abs() >= theta * (diag[i] * diag[j]).abs().sqrt())
                .map(|(&j, _)| j)
                .collect()
        })
        .collect();

    let mut agg = vec![UNASSIGNED; n];
    let mut count = 0;

    // seeds whose whole neighbourhood is still free
    for i in 0..n {
        if agg[i] != UNASSIGNED || strong[i].is_empty() {
            continue;
        }
        if strong[i].iter().all(|&j| agg[j] == UNASSIGNED) {
            agg[i] = count;
            for &j in &strong[i] {
                agg[j] = count;
            }
            count += 1;
        }
    }

    // attach leftovers to a neighbouring aggregate
    let seeded = agg.clone();
    for i in 0..n {
        if agg[i] == UNASSIGNED {
            if let Some(&j) = strong[i].iter().find(|&&j| seeded[j] != UNASSIGNED) {
                agg[i] = seeded[j];
            }
        }
    }

    for i in 0..n {
        if agg[i] == UNASSIGNED && !strong[i].is_empty() {
            agg[i] = count;
            for &j in &strong[i] {
                if agg[j] == UNASSIGNED {
                    agg[j] = count;
                }
            }
            count += 1;
        }
    }

    (agg, count)
}

fn spectral_bound(a: &CsrMatrix<f64>, inv_diag: &[f64]) -> f64 {
    (0..a.nrows())
        .map(|i| a.row(i).values().iter().map(|v| v.abs()).sum::<f64>() * inv_diag[i].abs())
        .fold(1.0, f64::max)
}

fn smoothed_prolongator(a: &CsrMatrix<f64>, inv_diag: &[f64], rho: f64, agg: &[usize], count: usize) -> CsrMatrix<f64> {
    let mut tentative = CooMatrix::new(a.nrows(), count);
    for (i, &g) in agg.iter().enumerate() {
        if g != UNASSIGNED {
            tentative.push(i, g, 1.0);
        }
    }
    let tentative = CsrMatrix::from(&tentative);

    let omega = 4.0 / (3.0 * rho);
    let mut ap = a * &tentative;
    for (i, mut row) in ap.row_iter_mut().enumerate() {
        let scale = omega * inv_diag[i];
        for v in row.values_mut() {
            *v *= scale;
        }
    }
    &tentative - &ap
}

impl AggregationHierarchy {
    pub fn build(matrix: &CsrMatrix<f64>, options: &MultigridOptions) -> RiftResult<Self> {
        let mut levels = Vec::new();
        let mut current = matrix.clone();

        while current.nrows() > options.coarse_size && levels.len() + 1 < options.max_levels {
            let (agg, count) = aggregate(&current, options.strength_threshold);
            if count == 0 || count >= current.nrows() {
                break;
            }
            let inv_diag: Vec<f64> = diagonal(&current)
                .iter()
                .map(|&d| if d != 0.0 { 1.0 / d } else { 0.0 })
                .collect();
            let rho = spectral_bound(&current, &inv_diag);
            let p = smoothed_prolongator(&current, &inv_diag, rho, &agg, count);
            let r = p.transpose();
            let coarse = &(&r * &current) * &p;
            log::debug!("multigrid level {}: {} -> {} unknowns", levels.len(), current.nrows(), count);

            levels.push(Level {
                a: current,
                inv_diag,
                omega: options.jacobi_weight * 2.0 / rho,
                p,
                r,
            });
            current = coarse;
        }

        let coarse = cholesky(&current)?;
        Ok(AggregationHierarchy {
            levels,
            coarse,
            sweeps: options.smoothing_sweeps,
        })
    }

    pub fn level_count(&self) -> usize {
        self.levels.len() + 1
    }

    fn smooth(&self, level: &Level, b: &[f64], x: &mut [f64], scratch: &mut [f64]) {
        for _ in 0..self.sweeps {
            level.a.apply(x, scratch);
            for i in 0..x.len() {
                x[i] += level.omega * level.inv_diag[i] * (b[i] - scratch[i]);
            }
        }
    }

    fn cycle(&self, depth: usize, b: &[f64], x: &mut [f64]) {
        let Some(level) = self.levels.get(depth) else {
            cholesky_solve(&self.coarse, b, x);
            return;
        };

        let mut scratch = vec![0.0; b.len()];
        self.smooth(level, b, x, &mut scratch);

        level.a.apply(x, &mut scratch);
        for (s, &bi) in scratch.iter_mut().zip(b) {
            *s = bi - *s;
        }
        let mut coarse_b = vec![0.0; level.r.nrows()];
        level.r.apply(&scratch, &mut coarse_b);
        let mut coarse_x = vec![0.0; coarse_b.len()];
        self.cycle(depth + 1, &coarse_b, &mut coarse_x);
        level.p.apply(&coarse_x, &mut scratch);
        axpy(1.0, &scratch, x);

        self.smooth(level, b, x, &mut scratch);
    }
}

impl Preconditioner for AggregationHierarchy {
    fn apply(&self, r: &[f64], z: &mut [f64]) {
        z.fill(0.0);
        self.cycle(0, r, z);
    }

    fn name(&self) -> &'static str {
        "sa-amg"
    }
}

/// CG preconditioned by one symmetric V-cycle per iteration.
pub struct MultigridCgSolver {
    options: MultigridOptions,
    config: SolverConfig,
    matrix: Option<CsrMatrix<f64>>,
    hierarchy: Option<AggregationHierarchy>,
}

impl MultigridCgSolver {
    pub fn new(options: MultigridOptions, config: SolverConfig) -> Self {
        MultigridCgSolver {
            options,
            config,
            matrix: None,
            hierarchy: None,
        }
    }
}

impl LinearSolve for MultigridCgSolver {
    fn name(&self) -> &'static str {
        "multigrid-cg"
    }

    fn setup(&mut self, matrix: &CsrMatrix<f64>) -> RiftResult<()> {
        let hierarchy = AggregationHierarchy::build(matrix, &self.options)?;
        log::debug!("multigrid hierarchy with {} levels", hierarchy.level_count());
        self.hierarchy = Some(hierarchy);
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> RiftResult<SolverResult> {
        let (Some(matrix), Some(hierarchy)) = (&self.matrix, &self.hierarchy) else {
            return Err(RiftError::instability("multigrid solve requested before setup"));
        };
        pcg(matrix, b, x, hierarchy, &self.config)
    }
}
