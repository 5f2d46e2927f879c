//! Incompressible Stokes flow on the Q1-P0 mesh.
//!
//! Each Picard iteration assembles the velocity block for the current element
//! viscosities and solves the saddle-point system by conjugate gradients on
//! the pressure Schur complement `S = G^T K^-1 G`. Every application of `S`
//! is one velocity-block solve through the pluggable backend.

pub mod assembly;

pub use assembly::{ElementOperators, VelocitySystem};

use crate::comm::Communicator;
use crate::config::{FailurePolicy, SolverOptions};
use crate::error::{RiftError, RiftResult};
use crate::linalg::vector_ops::{axpy, dot, norm2, remove_mean, xpby};
use crate::linalg::{select_backend, LinearSolve, SolverConfig};
use crate::mesh::{DirichletMap, ElementProperties, Grid, MeshFields, VelocityBoundaries};
use assembly::{apply_divergence, apply_gradient, assemble_velocity_system, flux_scale};
use glam::DVec2;

/// Relative Schur residual treated as exact; iterating further feeds round-off.
const SCHUR_FLOOR: f64 = 1e-13;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LinearSolveReport {
    pub velocity_iterations: usize,
    pub schur_iterations: usize,
    /// Discrete divergence relative to that of the pressure-free velocity.
    pub schur_residual: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StokesReport {
    pub iterations: usize,
    pub residual: f64,
    pub tolerance: f64,
    pub converged: bool,
    pub schur_iterations: usize,
}

pub struct StokesSolver {
    grid: Grid,
    gravity: DVec2,
    operators: ElementOperators,
    dirichlet: DirichletMap,
    tractions: Vec<f64>,
    options: SolverOptions,
    remove_null_space: bool,
    backend: Box<dyn LinearSolve>,
    /// Velocity of the last pressure-free solve; initial guess for the next one.
    free_velocity: Vec<f64>,
    /// Last pressure before surface normalization.
    raw_pressure: Vec<f64>,
}

pub fn flatten_velocity(velocity: &[DVec2]) -> Vec<f64> {
    velocity.iter().flat_map(|v| [v.x, v.y]).collect()
}

pub fn unflatten_velocity(values: &[f64], velocity: &mut [DVec2]) {
    for (v, pair) in velocity.iter_mut().zip(values.chunks_exact(2)) {
        *v = DVec2::new(pair[0], pair[1]);
    }
}

impl StokesSolver {
    pub fn new(grid: &Grid, gravity: DVec2, boundaries: &VelocityBoundaries, options: &SolverOptions) -> RiftResult<Self> {
        boundaries.validate(grid)?;
        let velocity = &options.velocity;
        let config = SolverConfig::new(velocity.rtol, velocity.max_iterations).with_min_iterations(velocity.min_iterations);
        let backend = select_backend(
            options.backend,
            grid.element_count(),
            options.direct_solver_max_elements,
            &options.multigrid,
            config,
        );
        log::info!(
            "stokes: {} velocity dofs, {} pressure dofs, {} backend",
            2 * grid.node_count(),
            grid.element_count(),
            backend.name()
        );
        Ok(StokesSolver {
            grid: grid.clone(),
            gravity,
            operators: ElementOperators::new(grid, options.penalty),
            dirichlet: boundaries.dirichlet_map(grid),
            tractions: boundaries.traction_loads(grid),
            options: options.clone(),
            remove_null_space: options.remove_constant_pressure_null_space && boundaries.all_normal_prescribed(),
            backend,
            free_velocity: Vec::new(),
            raw_pressure: Vec::new(),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn enforce_dirichlet(&self, u: &mut [f64], values: bool) {
        for (ui, bc) in u.iter_mut().zip(&self.dirichlet) {
            if let Some(v) = bc {
                *ui = if values { *v } else { 0.0 };
            }
        }
    }

    fn velocity_solve(&mut self, b: &[f64], x: &mut [f64]) -> RiftResult<usize> {
        let result = self
            .backend
            .solve(b, x)?
            .require_converged("velocity block", self.options.velocity.rtol)?;
        Ok(result.iterations)
    }

    /// `z_e = r_e * eta_e (1 + penalty) / area`, the inverse of the scaled pressure mass.
    fn schur_precondition(&self, props: &ElementProperties, r: &[f64], z: &mut [f64]) {
        let scale = (1.0 + self.options.penalty) / self.operators.area;
        for ((zi, ri), eta) in z.iter_mut().zip(r).zip(&props.viscosity) {
            *zi = ri * eta * scale;
        }
    }

    /// One saddle-point solve for fixed element properties; writes velocity and pressure.
    pub fn solve_linear(&mut self, props: &ElementProperties, fields: &mut MeshFields) -> RiftResult<LinearSolveReport> {
        props.check(&self.grid)?;
        let grid = self.grid.clone();
        let n_u = 2 * grid.node_count();
        let n_p = grid.element_count();
        let mut report = LinearSolveReport::default();

        let system = assemble_velocity_system(&grid, &self.operators, props, self.gravity, &self.dirichlet, &self.tractions);
        self.backend.setup(&system.matrix)?;

        let mut u_free = if self.options.velocity.use_previous_guess && self.free_velocity.len() == n_u {
            self.free_velocity.clone()
        } else {
            vec![0.0; n_u]
        };
        report.velocity_iterations += self.velocity_solve(&system.rhs, &mut u_free)?;
        self.enforce_dirichlet(&mut u_free, true);

        let mut p = if !self.options.schur.use_previous_guess {
            vec![0.0; n_p]
        } else if self.raw_pressure.len() == n_p {
            self.raw_pressure.clone()
        } else {
            fields.pressure.clone()
        };
        if self.remove_null_space {
            remove_mean(&mut p);
        }

        // w_p tracks K^-1 G p so the final velocity needs no extra solve
        let mut w_p = vec![0.0; n_u];
        let mut scratch_u = vec![0.0; n_u];
        if p.iter().any(|&v| v != 0.0) {
            apply_gradient(&grid, &self.operators, &self.dirichlet, &p, &mut scratch_u);
            report.velocity_iterations += self.velocity_solve(&scratch_u, &mut w_p)?;
            self.enforce_dirichlet(&mut w_p, false);
        }

        let mut b = vec![0.0; n_p];
        apply_divergence(&grid, &self.operators, &u_free, &mut b);
        if self.remove_null_space {
            remove_mean(&mut b);
        }

        let mut current = u_free.clone();
        axpy(-1.0, &w_p, &mut current);
        let mut r = vec![0.0; n_p];
        apply_divergence(&grid, &self.operators, &current, &mut r);
        if self.remove_null_space {
            remove_mean(&mut r);
        }

        // divergence at round-off level of the element fluxes counts as zero
        let floor = SCHUR_FLOOR
            * flux_scale(&grid, &self.operators, &u_free).max(flux_scale(&grid, &self.operators, &current));
        let reference = match norm2(&b) {
            n if n > 0.0 => n,
            _ => norm2(&r),
        };
        let schur = self.options.schur.clone();
        let done = |r_norm: f64, iterations: usize| {
            r_norm <= floor || (r_norm <= schur.rtol * reference && iterations >= schur.min_iterations)
        };

        let mut z = vec![0.0; n_p];
        self.schur_precondition(props, &r, &mut z);
        let mut d = z.clone();
        let mut rz = dot(&r, &z);
        let mut q = vec![0.0; n_p];
        let mut w_d = vec![0.0; n_u];
        let mut iterations = 0;
        let mut converged = done(norm2(&r), 0);

        while !converged && iterations < schur.max_iterations {
            apply_gradient(&grid, &self.operators, &self.dirichlet, &d, &mut scratch_u);
            w_d.fill(0.0);
            report.velocity_iterations += self.velocity_solve(&scratch_u, &mut w_d)?;
            self.enforce_dirichlet(&mut w_d, false);
            apply_divergence(&grid, &self.operators, &w_d, &mut q);
            if self.remove_null_space {
                remove_mean(&mut q);
            }

            let dq = dot(&d, &q);
            if dq <= 0.0 || !dq.is_finite() {
                break;
            }
            let alpha = rz / dq;
            axpy(alpha, &d, &mut p);
            axpy(alpha, &w_d, &mut w_p);
            axpy(-alpha, &q, &mut r);
            iterations += 1;

            let r_norm = norm2(&r);
            log::trace!("schur cg {iterations}: residual {:.3e}", r_norm / reference.max(f64::MIN_POSITIVE));
            converged = done(r_norm, iterations);
            if converged {
                break;
            }

            self.schur_precondition(props, &r, &mut z);
            let rz_next = dot(&r, &z);
            let beta = rz_next / rz;
            rz = rz_next;
            xpby(&z, beta, &mut d);
        }

        let r_norm = norm2(&r);
        report.schur_iterations = iterations;
        report.schur_residual = if reference > 0.0 { r_norm / reference } else { 0.0 };
        if !(converged || r_norm <= floor || report.schur_residual <= schur.rtol) {
            return Err(RiftError::ConvergenceFailure {
                solver: "schur complement",
                iterations,
                residual: report.schur_residual,
                tolerance: schur.rtol,
            });
        }

        let mut u = u_free.clone();
        axpy(-1.0, &w_p, &mut u);
        self.enforce_dirichlet(&mut u, true);
        if self.remove_null_space {
            remove_mean(&mut p);
        }

        unflatten_velocity(&u, &mut fields.velocity);
        fields.pressure.copy_from_slice(&p);
        if self.options.surface_pressure_normalization {
            let surface = self.surface_pressure(&p);
            fields.pressure.iter_mut().for_each(|v| *v -= surface);
        }
        self.free_velocity = u_free;
        self.raw_pressure = p;

        if let Some(n) = u.iter().position(|v| !v.is_finite()) {
            return Err(RiftError::instability(format!("non-finite velocity in dof {n} after the Stokes solve")));
        }
        Ok(report)
    }

    /// Element pressure extrapolated linearly from the two top rows to the top wall.
    pub fn surface_pressure(&self, pressure: &[f64]) -> f64 {
        let g = &self.grid;
        let row_mean = |j: usize| -> f64 {
            (0..g.nx).map(|i| pressure[g.element_index(i, j)]).sum::<f64>() / g.nx as f64
        };
        let top = row_mean(g.ny - 1);
        if g.ny < 2 {
            return top;
        }
        1.5 * top - 0.5 * row_mean(g.ny - 2)
    }

    /// Picard iteration: `update` maps the current velocity and pressure to element properties.
    pub fn solve_nonlinear<F>(
        &mut self,
        fields: &mut MeshFields,
        first_step: bool,
        comm: &dyn Communicator,
        mut update: F,
    ) -> RiftResult<StokesReport>
    where
        F: FnMut(&MeshFields) -> RiftResult<ElementProperties>,
    {
        let tolerance = if first_step {
            self.options.initial_nonlinear_tolerance
        } else {
            self.options.nonlinear_tolerance
        };
        let min_iterations = self.options.nonlinear_min_iterations.max(1);
        let max_iterations = self.options.nonlinear_max_iterations;

        let mut report = StokesReport {
            iterations: 0,
            residual: f64::INFINITY,
            tolerance,
            converged: false,
            schur_iterations: 0,
        };
        let mut previous = flatten_velocity(&fields.velocity);

        while report.iterations < max_iterations {
            let props = update(fields)?;
            let linear = self.solve_linear(&props, fields)?;
            report.iterations += 1;
            report.schur_iterations += linear.schur_iterations;

            let current = flatten_velocity(&fields.velocity);
            let change: Vec<f64> = current.iter().zip(&previous).map(|(a, b)| a - b).collect();
            let norm = norm2(&current);
            let local = if norm > 0.0 { norm2(&change) / norm } else { 0.0 };
            // every rank must take the same branch
            report.residual = comm.all_reduce_max(local);
            previous = current;

            log::debug!(
                "picard {}: residual {:.3e} (tolerance {:.1e}), {} schur iterations",
                report.iterations,
                report.residual,
                tolerance,
                linear.schur_iterations
            );
            if report.iterations >= min_iterations && report.residual < tolerance {
                report.converged = true;
                break;
            }
        }

        if !report.converged {
            let failure = RiftError::ConvergenceFailure {
                solver: "picard",
                iterations: report.iterations,
                residual: report.residual,
                tolerance,
            };
            match self.options.nonlinear_failure_policy {
                FailurePolicy::Abort => return Err(failure),
                FailurePolicy::Warn => log::warn!("{failure}; continuing with the last iterate"),
            }
        }
        fields.check_finite()?;
        Ok(report)
    }
}
