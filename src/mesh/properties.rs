use crate::error::{RiftError, RiftResult};
use crate::mesh::Grid;

/// Material response averaged onto elements; the coefficient field of one
/// mechanical and one thermal solve.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementProperties {
    /// Pa s
    pub viscosity: Vec<f64>,
    /// kg/m^3
    pub density: Vec<f64>,
    /// m^2/s
    pub diffusivity: Vec<f64>,
    /// `Cp / (Cp + L dF/dT)`; 1 outside the melt interval.
    pub latent_factor: Vec<f64>,
    /// Radiogenic plus shear heating divided by `rho Cp`, K/s.
    pub heating_rate: Vec<f64>,
}

impl ElementProperties {
    pub fn uniform(grid: &Grid, viscosity: f64, density: f64, diffusivity: f64) -> Self {
        let n = grid.element_count();
        ElementProperties {
            viscosity: vec![viscosity; n],
            density: vec![density; n],
            diffusivity: vec![diffusivity; n],
            latent_factor: vec![1.0; n],
            heating_rate: vec![0.0; n],
        }
    }

    pub fn len(&self) -> usize {
        self.viscosity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.viscosity.is_empty()
    }

    pub fn check(&self, grid: &Grid) -> RiftResult<()> {
        let n = grid.element_count();
        let columns = [
            ("viscosity", &self.viscosity),
            ("density", &self.density),
            ("diffusivity", &self.diffusivity),
            ("latent factor", &self.latent_factor),
            ("heating rate", &self.heating_rate),
        ];
        for (name, values) in columns {
            if values.len() != n {
                return Err(RiftError::instability(format!(
                    "element {name} has {} entries for {n} elements",
                    values.len()
                )));
            }
            if let Some(e) = values.iter().position(|v| !v.is_finite()) {
                return Err(RiftError::instability(format!("non-finite {name} in element {e}")));
            }
        }
        Ok(())
    }
}
