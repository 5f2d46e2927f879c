//! Heat transport: semi-Lagrangian advection followed by an implicit
//! theta-scheme diffusion solve with radiogenic, shear and latent terms.
//!
//! Per element the balance is `(1 / beta) dT/dt = kappa lap(T) + q`, where
//! `beta = Cp / (Cp + L dF/dT)` absorbs latent heat across the melt interval
//! and `q` is the heating rate. The mass matrix is lumped.

use crate::config::{SolverOptions, ThermalOptions};
use crate::error::{RiftError, RiftResult};
use crate::comm::Communicator;
use crate::linalg::{select_backend, LinearSolve, SolverConfig, TripletBuilder};
use crate::material::{MaterialId, MaterialRegistry};
use crate::mesh::{ElementProperties, Grid, MeshFields, NodeSelector, TemperatureBoundaries, Wall};
use crate::shapes::Region;
use crate::swarm::{CellBuckets, ParticleSwarm};
use rayon::prelude::*;

#[derive(Clone, Debug, PartialEq)]
enum FixedSet {
    Region(Region),
    Materials(Vec<MaterialId>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ThermalReport {
    pub iterations: usize,
    pub fixed_nodes: usize,
    pub min_temperature: f64,
    pub max_temperature: f64,
}

pub struct ThermalSolver {
    grid: Grid,
    options: ThermalOptions,
    walls: Vec<(Wall, f64)>,
    sets: Vec<(FixedSet, f64)>,
    /// Unit-diffusivity element Laplacian.
    laplacian: [[f64; 4]; 4],
    backend: Box<dyn LinearSolve>,
}

impl ThermalSolver {
    pub fn new(
        grid: &Grid,
        boundaries: &TemperatureBoundaries,
        registry: &MaterialRegistry,
        options: &ThermalOptions,
        solver: &SolverOptions,
    ) -> RiftResult<Self> {
        boundaries.validate()?;
        let walls = Wall::ALL
            .iter()
            .filter_map(|&w| boundaries.wall(w).map(|t| (w, t)))
            .collect();
        let mut sets = Vec::with_capacity(boundaries.node_sets.len());
        for set in &boundaries.node_sets {
            let selector = match &set.selector {
                NodeSelector::Region { region } => FixedSet::Region(*region),
                NodeSelector::Materials { names } => FixedSet::Materials(
                    names.iter().map(|n| registry.require(n)).collect::<RiftResult<Vec<_>>>()?,
                ),
            };
            sets.push((selector, set.temperature));
        }

        let mut laplacian = [[0.0; 4]; 4];
        let w = grid.jacobian();
        for (xi, eta) in Grid::gauss_points() {
            let grads = grid.shape_gradients(xi, eta);
            for a in 0..4 {
                for b in 0..4 {
                    laplacian[a][b] += w * grads[a].dot(grads[b]);
                }
            }
        }

        let solve = &options.solve;
        let config = SolverConfig::new(solve.rtol, solve.max_iterations).with_min_iterations(solve.min_iterations);
        let backend = select_backend(
            solver.backend,
            grid.element_count(),
            solver.direct_solver_max_elements,
            &solver.multigrid,
            config,
        );
        Ok(ThermalSolver {
            grid: grid.clone(),
            options: options.clone(),
            walls,
            sets,
            laplacian,
            backend,
        })
    }

    /// Fixed temperature per node. Node sets override walls, later sets override earlier ones.
    ///
    /// Material selection uses the nearest particle over all ranks, so every
    /// rank holds the same fixed set as a single-rank run of the same swarm.
    pub fn fixed_temperatures(&self, swarm: &ParticleSwarm, comm: &dyn Communicator) -> RiftResult<Vec<Option<f64>>> {
        let grid = &self.grid;
        let mut fixed = vec![None; grid.node_count()];
        for &(wall, t) in &self.walls {
            for node in grid.wall_nodes(wall) {
                fixed[node] = Some(t);
            }
        }
        if self.sets.is_empty() {
            return Ok(fixed);
        }

        // a node takes the material of the nearest particle on any rank: each
        // rank finds its local nearest, and only the ranks holding the global
        // minimum distance vote
        let needs_particles = self.sets.iter().any(|(s, _)| matches!(s, FixedSet::Materials(_)));
        let nearest: Vec<Option<MaterialId>> = if needs_particles {
            let buckets = CellBuckets::build(grid, swarm);
            let local: Vec<Option<(f64, MaterialId)>> = (0..grid.node_count())
                .into_par_iter()
                .map(|n| {
                    let x = grid.node_position(n);
                    buckets
                        .nearest(grid, swarm, x)
                        .and_then(|i| swarm.get(i))
                        .map(|p| (p.position.distance(x), p.material))
                })
                .collect();
            let mut global: Vec<f64> = local.iter().map(|l| l.map_or(f64::INFINITY, |(d, _)| d)).collect();
            comm.all_reduce_min_slice(&mut global);
            local
                .iter()
                .zip(&global)
                .map(|(l, &d)| l.filter(|(own, _)| *own <= d).map(|(_, m)| m))
                .collect()
        } else {
            Vec::new()
        };

        for (set, t) in &self.sets {
            let mut selected: Vec<f64> = (0..grid.node_count())
                .map(|node| match set {
                    FixedSet::Region(region) => f64::from(u8::from(region.contains(grid.node_position(node)))),
                    FixedSet::Materials(ids) => {
                        f64::from(u8::from(nearest[node].is_some_and(|m| ids.contains(&m))))
                    }
                })
                .collect();
            if matches!(set, FixedSet::Materials(_)) {
                comm.all_reduce_sum_slice(&mut selected);
            }
            for (slot, flag) in fixed.iter_mut().zip(&selected) {
                if *flag > 0.5 {
                    *slot = Some(*t);
                }
            }
        }
        Ok(fixed)
    }

    /// Assembles `(M / beta) * mass_scale + theta_k * K` with eliminated Dirichlet
    /// rows and returns it with `K` applied to `current` and the load vector.
    fn assemble(
        &self,
        props: &ElementProperties,
        mass_scale: f64,
        theta_k: f64,
        fixed: &[Option<f64>],
    ) -> (nalgebra_sparse::CsrMatrix<f64>, Vec<f64>) {
        let grid = &self.grid;
        let n = grid.node_count();
        let mut builder = TripletBuilder::new(n, n);
        let mut lift = vec![0.0; n];
        let quarter = 0.25 * grid.element_area();
        let mut scale_sum = 0.0;

        for e in 0..grid.element_count() {
            let kappa = props.diffusivity[e];
            let mass = mass_scale * quarter / props.latent_factor[e];
            scale_sum += theta_k * kappa * self.laplacian[0][0] + mass;
            let nodes = grid.element_nodes(e);
            for (a, &row) in nodes.iter().enumerate() {
                if fixed[row].is_some() {
                    continue;
                }
                builder.add(row, row, mass);
                for (b, &col) in nodes.iter().enumerate() {
                    let k = theta_k * kappa * self.laplacian[a][b];
                    match fixed[col] {
                        Some(t) => lift[row] -= k * t,
                        None => builder.add(row, col, k),
                    }
                }
            }
        }

        let scale = scale_sum / grid.element_count() as f64;
        for (node, t) in fixed.iter().enumerate() {
            if let Some(t) = t {
                builder.add_diagonal(node, scale);
                lift[node] = scale * t;
            }
        }
        (builder.build(), lift)
    }

    /// `y = K_kappa x` without boundary elimination.
    fn apply_diffusion(&self, props: &ElementProperties, x: &[f64], y: &mut [f64]) {
        y.fill(0.0);
        for e in 0..self.grid.element_count() {
            let nodes = self.grid.element_nodes(e);
            let kappa = props.diffusivity[e];
            for (a, &row) in nodes.iter().enumerate() {
                y[row] += kappa * nodes.iter().enumerate().map(|(b, &col)| self.laplacian[a][b] * x[col]).sum::<f64>();
            }
        }
    }

    /// Lumped nodal load of the element heating rates, K/s * m^2.
    fn heating_load(&self, props: &ElementProperties) -> Vec<f64> {
        let mut load = vec![0.0; self.grid.node_count()];
        let quarter = 0.25 * self.grid.element_area();
        for e in 0..self.grid.element_count() {
            for node in self.grid.element_nodes(e) {
                load[node] += quarter * props.heating_rate[e];
            }
        }
        load
    }

    fn solve(&mut self, matrix: &nalgebra_sparse::CsrMatrix<f64>, rhs: &[f64], x: &mut [f64]) -> RiftResult<usize> {
        self.backend.setup(matrix)?;
        let result = self
            .backend
            .solve(rhs, x)?
            .require_converged("thermal", self.options.solve.rtol)?;
        Ok(result.iterations)
    }

    /// Steady conductive geotherm `K T = F`, or a linear profile between the
    /// fixed walls when steady-state initialization is off.
    pub fn initialize(
        &mut self,
        fields: &mut MeshFields,
        props: &ElementProperties,
        swarm: &ParticleSwarm,
        comm: &dyn Communicator,
    ) -> RiftResult<ThermalReport> {
        props.check(&self.grid)?;
        let fixed = self.fixed_temperatures(swarm, comm)?;
        self.linear_profile(fields);

        let mut iterations = 0;
        if self.options.steady_state_init {
            let (matrix, lift) = self.assemble(props, 0.0, 1.0, &fixed);
            let load = self.heating_load(props);
            let rhs: Vec<f64> = lift
                .iter()
                .zip(&load)
                .zip(&fixed)
                .map(|((l, f), bc)| if bc.is_some() { *l } else { l + f })
                .collect();
            let mut t = fields.temperature.clone();
            iterations = self.solve(&matrix, &rhs, &mut t)?;
            fields.temperature = t;
        }
        self.finish(fields, &fixed, iterations)
    }

    /// Linear profile between the bottom and top wall temperatures, or the
    /// single fixed value when only one of them is set.
    pub fn linear_profile(&self, fields: &mut MeshFields) {
        let grid = &self.grid;
        let top = self.wall_temperature(Wall::Top);
        let bottom = self.wall_temperature(Wall::Bottom);
        let fallback = self
            .walls
            .first()
            .map(|(_, t)| *t)
            .or_else(|| self.sets.first().map(|(_, t)| *t))
            .unwrap_or(0.0);
        for (n, t) in fields.temperature.iter_mut().enumerate() {
            let y = (grid.node_position(n).y - grid.min.y) / grid.height();
            *t = match (bottom, top) {
                (Some(b), Some(t)) => b + (t - b) * y,
                (Some(v), None) | (None, Some(v)) => v,
                (None, None) => fallback,
            };
        }
    }

    fn wall_temperature(&self, wall: Wall) -> Option<f64> {
        self.walls.iter().find(|(w, _)| *w == wall).map(|(_, t)| *t)
    }

    /// Departure-point temperatures for a step of `dt` through the current velocity.
    pub fn advect(&self, fields: &MeshFields, dt: f64) -> Vec<f64> {
        let grid = &self.grid;
        (0..grid.node_count())
            .into_par_iter()
            .map(|n| {
                let x = grid.node_position(n);
                let mid = grid.clamp_point(x - 0.5 * dt * fields.velocity[n]);
                let departure = grid.clamp_point(x - dt * fields.velocity_at(grid, mid));
                fields.temperature_at(grid, departure)
            })
            .collect()
    }

    /// Advances the temperature by `dt`.
    pub fn step(
        &mut self,
        fields: &mut MeshFields,
        props: &ElementProperties,
        dt: f64,
        swarm: &ParticleSwarm,
        comm: &dyn Communicator,
    ) -> RiftResult<ThermalReport> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(RiftError::instability(format!("thermal step with invalid dt {dt}")));
        }
        props.check(&self.grid)?;
        let fixed = self.fixed_temperatures(swarm, comm)?;
        let theta = self.options.theta;
        let advected = self.advect(fields, dt);

        let (matrix, lift) = self.assemble(props, 1.0, theta * dt, &fixed);
        let mut explicit = vec![0.0; advected.len()];
        self.apply_diffusion(props, &advected, &mut explicit);
        let load = self.heating_load(props);

        // lumped (M / beta) T* per node
        let mut mass = vec![0.0; advected.len()];
        let quarter = 0.25 * self.grid.element_area();
        for e in 0..self.grid.element_count() {
            for node in self.grid.element_nodes(e) {
                mass[node] += quarter / props.latent_factor[e];
            }
        }

        let rhs: Vec<f64> = (0..advected.len())
            .map(|n| match fixed[n] {
                Some(_) => lift[n],
                None => mass[n] * advected[n] - (1.0 - theta) * dt * explicit[n] + dt * load[n] + lift[n],
            })
            .collect();

        let mut t = advected;
        let iterations = self.solve(&matrix, &rhs, &mut t)?;
        fields.temperature = t;
        self.finish(fields, &fixed, iterations)
    }

    fn finish(&self, fields: &mut MeshFields, fixed: &[Option<f64>], iterations: usize) -> RiftResult<ThermalReport> {
        for (t, bc) in fields.temperature.iter_mut().zip(fixed) {
            if let Some(v) = bc {
                *t = *v;
            }
        }
        if let Some(n) = fields.temperature.iter().position(|t| !t.is_finite()) {
            return Err(RiftError::instability(format!("non-finite temperature at node {n}")));
        }
        let (min, max) = fields
            .temperature
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
        Ok(ThermalReport {
            iterations,
            fixed_nodes: fixed.iter().filter(|t| t.is_some()).count(),
            min_temperature: min,
            max_temperature: max,
        })
    }
}
