//! Effective viscosity and buoyancy of a material at a local state.
//!
//! The evaluator is a pure function of its inputs. Callers keep the particle
//! history (plastic strain, melt fraction) up to date.

use crate::config::MaterialDefaults;
use crate::error::{RiftError, RiftResult};
use crate::material::Material;
use crate::math_utils::weighted_harmonic_mean;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RheologyState {
    /// K
    pub temperature: f64,
    /// Pa, compressive positive
    pub pressure: f64,
    /// 1/s
    pub strain_rate_ii: f64,
    pub plastic_strain: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RheologyResponse {
    /// Clamped effective viscosity, Pa s.
    pub viscosity: f64,
    /// Blended flow-law viscosity before plasticity, melt and clamping.
    pub viscous_viscosity: f64,
    pub yield_stress: Option<f64>,
    /// Plastic branch is active.
    pub is_yielding: bool,
    /// kg/m^3, including melt buoyancy.
    pub density: f64,
    pub melt_fraction: f64,
    pub melt_viscosity_factor: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RheologyEvaluator {
    pub min_viscosity: f64,
    pub max_viscosity: f64,
    pub min_strain_rate: f64,
}

impl RheologyEvaluator {
    pub fn new(defaults: &MaterialDefaults) -> Self {
        RheologyEvaluator {
            min_viscosity: defaults.min_viscosity,
            max_viscosity: defaults.max_viscosity,
            min_strain_rate: defaults.min_strain_rate,
        }
    }

    pub fn evaluate(&self, material: &Material, state: &RheologyState) -> RiftResult<RheologyResponse> {
        let strain_rate = state.strain_rate_ii.max(self.min_strain_rate);

        let viscous = weighted_harmonic_mean(material.viscosity.iter().map(|w| {
            (w.weight, w.law.viscosity(strain_rate, state.pressure, state.temperature))
        }))
        .unwrap_or(self.max_viscosity);

        // Drucker-Prager capped by the stress limiter; a limiter alone still bounds stress
        let yield_stress = match (&material.plasticity, material.stress_limiter) {
            (Some(dp), Some(limit)) => Some(dp.yield_stress(state.pressure, state.plastic_strain).min(limit)),
            (Some(dp), None) => Some(dp.yield_stress(state.pressure, state.plastic_strain)),
            (None, Some(limit)) => Some(limit),
            (None, None) => None,
        };

        let mut viscosity = viscous;
        let mut is_yielding = false;
        if let Some(tau_y) = yield_stress {
            let plastic = tau_y / (2.0 * strain_rate);
            if plastic < viscosity {
                viscosity = plastic;
                is_yielding = material.plasticity.is_some();
            }
        }

        let (melt_fraction, melt_viscosity_factor, density_factor) = match &material.melt {
            Some(melt) => {
                let f = melt.melt_fraction(state.temperature, state.pressure);
                (f, melt.viscosity_factor(f), melt.density_factor(f))
            }
            None => (0.0, 1.0, 1.0),
        };
        viscosity *= melt_viscosity_factor;

        if viscosity.is_nan() {
            return Err(RiftError::instability(format!(
                "viscosity of '{}' is NaN at T = {:.1} K, P = {:.3e} Pa, strain rate {:.3e} 1/s",
                material.name, state.temperature, state.pressure, state.strain_rate_ii
            )));
        }
        let viscosity = viscosity.clamp(self.min_viscosity, self.max_viscosity);

        let density = material.density.density(state.temperature) * density_factor;
        if !density.is_finite() || density <= 0.0 {
            return Err(RiftError::instability(format!(
                "density of '{}' is {density} at T = {:.1} K",
                material.name, state.temperature
            )));
        }

        Ok(RheologyResponse {
            viscosity,
            viscous_viscosity: viscous,
            yield_stress,
            is_yielding,
            density,
            melt_fraction,
            melt_viscosity_factor,
        })
    }
}
