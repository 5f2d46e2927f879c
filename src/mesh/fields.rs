use crate::error::{RiftError, RiftResult};
use crate::mesh::grid::Grid;
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Symmetric 2D strain-rate tensor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StrainRate {
    pub xx: f64,
    pub yy: f64,
    pub xy: f64,
}

impl StrainRate {
    /// Second invariant `sqrt(0.5 * e:e)`.
    pub fn second_invariant(&self) -> f64 {
        (0.5 * (self.xx * self.xx + self.yy * self.yy) + self.xy * self.xy).sqrt()
    }
}

/// Eulerian unknowns: nodal velocity and temperature, element pressure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeshFields {
    pub velocity: Vec<DVec2>,
    pub pressure: Vec<f64>,
    pub temperature: Vec<f64>,
}

impl MeshFields {
    pub fn new(grid: &Grid) -> Self {
        MeshFields {
            velocity: vec![DVec2::ZERO; grid.node_count()],
            pressure: vec![0.0; grid.element_count()],
            temperature: vec![0.0; grid.node_count()],
        }
    }

    pub fn matches(&self, grid: &Grid) -> bool {
        self.velocity.len() == grid.node_count()
            && self.temperature.len() == grid.node_count()
            && self.pressure.len() == grid.element_count()
    }

    pub fn velocity_at(&self, grid: &Grid, p: DVec2) -> DVec2 {
        let (e, xi, eta) = locate_clamped(grid, p);
        let n = Grid::shape_functions(xi, eta);
        grid.element_nodes(e)
            .iter()
            .zip(n)
            .map(|(&node, w)| self.velocity[node] * w)
            .sum()
    }

    pub fn temperature_at(&self, grid: &Grid, p: DVec2) -> f64 {
        let (e, xi, eta) = locate_clamped(grid, p);
        interpolate_nodal(&self.temperature, grid, e, xi, eta)
    }

    pub fn pressure_at(&self, grid: &Grid, p: DVec2) -> f64 {
        let (e, _, _) = locate_clamped(grid, p);
        self.pressure[e]
    }

    pub fn strain_rate_at(&self, grid: &Grid, p: DVec2) -> StrainRate {
        let (e, xi, eta) = locate_clamped(grid, p);
        self.strain_rate_in(grid, e, xi, eta)
    }

    pub fn element_strain_rate(&self, grid: &Grid, element: usize) -> StrainRate {
        self.strain_rate_in(grid, element, 0.0, 0.0)
    }

    fn strain_rate_in(&self, grid: &Grid, element: usize, xi: f64, eta: f64) -> StrainRate {
        let grads = grid.shape_gradients(xi, eta);
        let mut du = DVec2::ZERO;
        let mut dv = DVec2::ZERO;
        for (&node, g) in grid.element_nodes(element).iter().zip(grads) {
            let v = self.velocity[node];
            du += g * v.x;
            dv += g * v.y;
        }
        StrainRate {
            xx: du.x,
            yy: dv.y,
            xy: 0.5 * (du.y + dv.x),
        }
    }

    pub fn max_speed(&self) -> f64 {
        self.velocity.iter().map(|v| v.length()).fold(0.0, f64::max)
    }

    pub fn has_flow(&self) -> bool {
        self.velocity.iter().any(|v| *v != DVec2::ZERO)
    }

    pub fn check_finite(&self) -> RiftResult<()> {
        if let Some(node) = self.velocity.iter().position(|v| !v.is_finite()) {
            return Err(RiftError::instability(format!("non-finite velocity at node {node}")));
        }
        if let Some(e) = self.pressure.iter().position(|p| !p.is_finite()) {
            return Err(RiftError::instability(format!("non-finite pressure in element {e}")));
        }
        if let Some(node) = self.temperature.iter().position(|t| !t.is_finite()) {
            return Err(RiftError::instability(format!("non-finite temperature at node {node}")));
        }
        Ok(())
    }
}

fn locate_clamped(grid: &Grid, p: DVec2) -> (usize, f64, f64) {
    // clamped points always lie inside the closed domain
    grid.locate(grid.clamp_point(p)).unwrap_or((0, -1.0, -1.0))
}

pub fn interpolate_nodal(values: &[f64], grid: &Grid, element: usize, xi: f64, eta: f64) -> f64 {
    let n = Grid::shape_functions(xi, eta);
    grid.element_nodes(element)
        .iter()
        .zip(n)
        .map(|(&node, w)| values[node] * w)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid() -> Grid {
        Grid::new(DVec2::ZERO, DVec2::new(10.0, 5.0), 10, 5).unwrap()
    }

    #[test]
    fn test_linear_fields_interpolate_exactly() {
        let g = grid();
        let mut fields = MeshFields::new(&g);
        for n in 0..g.node_count() {
            let p = g.node_position(n);
            fields.temperature[n] = 300.0 + 10.0 * p.y;
            fields.velocity[n] = DVec2::new(2.0 * p.x, -2.0 * p.y);
        }
        let p = DVec2::new(3.3, 1.7);
        assert_abs_diff_eq!(fields.temperature_at(&g, p), 317.0, epsilon = 1e-9);
        let v = fields.velocity_at(&g, p);
        assert_abs_diff_eq!(v.x, 6.6, epsilon = 1e-9);
        assert_abs_diff_eq!(v.y, -3.4, epsilon = 1e-9);
    }

    #[test]
    fn test_pure_shear_strain_rate() {
        let g = grid();
        let mut fields = MeshFields::new(&g);
        for n in 0..g.node_count() {
            let p = g.node_position(n);
            fields.velocity[n] = DVec2::new(1.0e-15 * p.x, -1.0e-15 * p.y);
        }
        let sr = fields.strain_rate_at(&g, DVec2::new(4.2, 2.2));
        assert_abs_diff_eq!(sr.xx, 1.0e-15, epsilon = 1e-27);
        assert_abs_diff_eq!(sr.yy, -1.0e-15, epsilon = 1e-27);
        assert_abs_diff_eq!(sr.xy, 0.0, epsilon = 1e-27);
        assert_abs_diff_eq!(sr.second_invariant(), 1.0e-15, epsilon = 1e-27);
    }

    #[test]
    fn test_simple_shear_invariant() {
        let sr = StrainRate { xx: 0.0, yy: 0.0, xy: 3.0 };
        assert_eq!(sr.second_invariant(), 3.0);
    }

    #[test]
    fn test_check_finite() {
        let g = grid();
        let mut fields = MeshFields::new(&g);
        assert!(fields.check_finite().is_ok());
        fields.pressure[3] = f64::NAN;
        assert!(matches!(fields.check_finite(), Err(RiftError::NumericalInstability(_))));
    }
}
