pub mod flow_laws;
pub mod laws;
pub mod registry;

pub use laws::{
    CreepLaw, DensityLaw, DruckerPrager, MeltCurve, MeltModifier, ViscosityLaw, WeightedViscosity,
};
pub use registry::MaterialRegistry;

use crate::shapes::Region;
use serde::{Deserialize, Serialize};

/// Index of a material in its registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(pub u16);

impl MaterialId {
    pub fn as_index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThermalProperties {
    /// m^2/s
    pub diffusivity: f64,
    /// J/(kg K)
    pub capacity: f64,
    /// W/m^3
    pub radiogenic_heat_production: f64,
}

/// A fully resolved, immutable material phase.
#[derive(Clone, Debug)]
pub struct Material {
    pub id: MaterialId,
    pub name: String,
    pub shape: Option<Region>,
    pub density: DensityLaw,
    pub viscosity: Vec<WeightedViscosity>,
    pub plasticity: Option<DruckerPrager>,
    pub stress_limiter: Option<f64>,
    pub melt: Option<MeltModifier>,
    pub thermal: ThermalProperties,
    pub temperature_limiter: Option<f64>,
}

impl Material {
    pub fn limit_temperature(&self, temperature: f64) -> f64 {
        match self.temperature_limiter {
            Some(limit) => temperature.min(limit),
            None => temperature,
        }
    }

    pub fn melt_fraction(&self, temperature: f64, pressure: f64) -> f64 {
        self.melt
            .as_ref()
            .map_or(0.0, |melt| melt.melt_fraction(temperature, pressure))
    }

    /// Heat capacity including latent heat absorbed across the melt interval.
    pub fn apparent_capacity(&self, temperature: f64, pressure: f64) -> f64 {
        let capacity = self.thermal.capacity;
        match &self.melt {
            Some(melt) => {
                capacity + melt.latent_heat_fusion * melt.melt_fraction_derivative(temperature, pressure)
            }
            None => capacity,
        }
    }
}
