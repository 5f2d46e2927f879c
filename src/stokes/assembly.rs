//! Q1-P0 element operators and global assembly of the velocity block.
//!
//! All elements of the structured grid share one shape, so the unit-viscosity
//! stiffness and the divergence vector are integrated once and scaled per
//! element. Dirichlet components are eliminated while assembling: their rows
//! become scaled identity rows and their columns move to the right-hand side.

use crate::linalg::TripletBuilder;
use crate::mesh::{DirichletMap, ElementProperties, Grid};
use glam::DVec2;
use nalgebra_sparse::CsrMatrix;

#[derive(Clone, Debug, PartialEq)]
pub struct ElementOperators {
    /// `B^T D B` for unit viscosity plus the penalty term, dofs `[u0x, u0y, u1x, ...]`.
    pub stiffness: [[f64; 8]; 8],
    /// `g[2a + axis]`, the integral of `dN_a / dx_axis` over the element.
    pub divergence: [f64; 8],
    pub area: f64,
}

impl ElementOperators {
    pub fn new(grid: &Grid, penalty: f64) -> Self {
        let mut stiffness = [[0.0; 8]; 8];
        let mut divergence = [0.0; 8];
        let w = grid.jacobian();
        for (xi, eta) in Grid::gauss_points() {
            let grads = grid.shape_gradients(xi, eta);
            for a in 0..4 {
                let ga = grads[a];
                divergence[2 * a] += w * ga.x;
                divergence[2 * a + 1] += w * ga.y;
                for b in 0..4 {
                    let gb = grads[b];
                    stiffness[2 * a][2 * b] += w * (2.0 * ga.x * gb.x + ga.y * gb.y);
                    stiffness[2 * a][2 * b + 1] += w * ga.y * gb.x;
                    stiffness[2 * a + 1][2 * b] += w * ga.x * gb.y;
                    stiffness[2 * a + 1][2 * b + 1] += w * (2.0 * ga.y * gb.y + ga.x * gb.x);
                }
            }
        }

        // augmented Lagrangian: penalty * eta / area * g g^T
        let area = grid.element_area();
        for r in 0..8 {
            for c in 0..8 {
                stiffness[r][c] += penalty / area * divergence[r] * divergence[c];
            }
        }
        ElementOperators {
            stiffness,
            divergence,
            area,
        }
    }
}

pub fn element_dofs(grid: &Grid, element: usize) -> [usize; 8] {
    let nodes = grid.element_nodes(element);
    let mut dofs = [0; 8];
    for (a, node) in nodes.into_iter().enumerate() {
        dofs[2 * a] = 2 * node;
        dofs[2 * a + 1] = 2 * node + 1;
    }
    dofs
}

pub struct VelocitySystem {
    pub matrix: CsrMatrix<f64>,
    pub rhs: Vec<f64>,
}

/// Assembles `K u = f` with gravity loads, wall tractions and eliminated Dirichlet values.
pub fn assemble_velocity_system(
    grid: &Grid,
    operators: &ElementOperators,
    properties: &ElementProperties,
    gravity: DVec2,
    dirichlet: &DirichletMap,
    tractions: &[f64],
) -> VelocitySystem {
    let n = 2 * grid.node_count();
    let mut builder = TripletBuilder::new(n, n);
    let mut rhs = tractions.to_vec();
    let mut scale_sum = 0.0;

    for e in 0..grid.element_count() {
        let eta = properties.viscosity[e];
        scale_sum += eta;
        let dofs = element_dofs(grid, e);
        let body = properties.density[e] * operators.area * 0.25;
        for (r, &row) in dofs.iter().enumerate() {
            if dirichlet[row].is_some() {
                continue;
            }
            rhs[row] += body * if r % 2 == 0 { gravity.x } else { gravity.y };
            for (c, &col) in dofs.iter().enumerate() {
                let k = eta * operators.stiffness[r][c];
                match dirichlet[col] {
                    Some(value) => rhs[row] -= k * value,
                    None => builder.add(row, col, k),
                }
            }
        }
    }

    // identity rows carry the mean element diagonal so they do not spoil conditioning
    let scale = scale_sum / grid.element_count() as f64 * operators.stiffness[0][0];
    for (dof, bc) in dirichlet.iter().enumerate() {
        if let Some(value) = bc {
            builder.add_diagonal(dof, scale);
            rhs[dof] = scale * value;
        }
    }

    VelocitySystem {
        matrix: builder.build(),
        rhs,
    }
}

/// `out = G p` with `G = -g`; constrained rows stay zero.
pub fn apply_gradient(grid: &Grid, operators: &ElementOperators, dirichlet: &DirichletMap, p: &[f64], out: &mut [f64]) {
    out.fill(0.0);
    for (e, &pe) in p.iter().enumerate() {
        if pe == 0.0 {
            continue;
        }
        for (k, dof) in element_dofs(grid, e).into_iter().enumerate() {
            if dirichlet[dof].is_none() {
                out[dof] -= operators.divergence[k] * pe;
            }
        }
    }
}

/// `out = G^T u`, minus the integrated divergence of `u` in each element.
pub fn apply_divergence(grid: &Grid, operators: &ElementOperators, u: &[f64], out: &mut [f64]) {
    for (e, oe) in out.iter_mut().enumerate() {
        *oe = -element_dofs(grid, e)
            .into_iter()
            .enumerate()
            .map(|(k, dof)| operators.divergence[k] * u[dof])
            .sum::<f64>();
    }
}

/// Norm of the per-element sums `|g_k u_k|`, the scale against which a
/// discrete divergence is measured.
pub fn flux_scale(grid: &Grid, operators: &ElementOperators, u: &[f64]) -> f64 {
    (0..grid.element_count())
        .map(|e| {
            let a: f64 = element_dofs(grid, e)
                .into_iter()
                .enumerate()
                .map(|(k, dof)| (operators.divergence[k] * u[dof]).abs())
                .sum();
            a * a
        })
        .sum::<f64>()
        .sqrt()
}
