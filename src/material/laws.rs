use crate::constants::{GAS_CONSTANT_J_PER_MOL_K, REFERENCE_DENSITY_TEMPERATURE_K};
use crate::math_utils::{clamped_ratio, cubic, lerp};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DensityLaw {
    Constant {
        density: f64,
    },
    /// `rho0 * (1 - alpha * (T - T0))`
    Linear {
        reference_density: f64,
        thermal_expansivity: f64,
        #[serde(default = "default_reference_temperature")]
        reference_temperature: f64,
    },
}

fn default_reference_temperature() -> f64 {
    REFERENCE_DENSITY_TEMPERATURE_K
}

impl DensityLaw {
    pub fn linear(reference_density: f64, thermal_expansivity: f64) -> Self {
        DensityLaw::Linear {
            reference_density,
            thermal_expansivity,
            reference_temperature: REFERENCE_DENSITY_TEMPERATURE_K,
        }
    }

    pub fn density(&self, temperature: f64) -> f64 {
        match *self {
            DensityLaw::Constant { density } => density,
            DensityLaw::Linear {
                reference_density,
                thermal_expansivity,
                reference_temperature,
            } => reference_density * (1.0 - thermal_expansivity * (temperature - reference_temperature)),
        }
    }

    pub fn reference_density(&self) -> f64 {
        match *self {
            DensityLaw::Constant { density } => density,
            DensityLaw::Linear { reference_density, .. } => reference_density,
        }
    }
}

/// Power-law creep in SI units.
///
/// `eta = 0.5 * f * A^(-1/n) * sr^((1-n)/n) * d^(m/n) * fH2O^(-r/n) * exp((Q + P V) / (n R T))`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreepLaw {
    pub name: String,
    /// Pa^-n s^-1
    pub pre_exponential_factor: f64,
    pub stress_exponent: f64,
    /// J/mol
    pub activation_energy: f64,
    /// m^3/mol
    #[serde(default)]
    pub activation_volume: f64,
    #[serde(default = "one")]
    pub grain_size: f64,
    #[serde(default)]
    pub grain_size_exponent: f64,
    #[serde(default = "one")]
    pub water_fugacity: f64,
    #[serde(default)]
    pub water_fugacity_exponent: f64,
    /// Scaling applied to the whole law, as in `0.01 * law`.
    #[serde(default = "one")]
    pub factor: f64,
}

fn one() -> f64 {
    1.0
}

impl CreepLaw {
    /// Dislocation creep with a pre-exponential factor quoted in MPa^-n s^-1.
    pub fn dislocation_mpa(
        name: &str,
        pre_exponential_mpa: f64,
        stress_exponent: f64,
        activation_energy: f64,
        activation_volume: f64,
    ) -> Self {
        CreepLaw {
            name: name.to_string(),
            pre_exponential_factor: pre_exponential_mpa * 1.0e6f64.powf(-stress_exponent),
            stress_exponent,
            activation_energy,
            activation_volume,
            grain_size: 1.0,
            grain_size_exponent: 0.0,
            water_fugacity: 1.0,
            water_fugacity_exponent: 0.0,
            factor: 1.0,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        CreepLaw {
            factor: self.factor * factor,
            ..self.clone()
        }
    }

    pub fn viscosity(&self, strain_rate_ii: f64, pressure: f64, temperature: f64) -> f64 {
        let n = self.stress_exponent;
        let arrhenius = ((self.activation_energy + pressure.max(0.0) * self.activation_volume)
            / (n * GAS_CONSTANT_J_PER_MOL_K * temperature))
            .exp();
        0.5 * self.factor
            * self.pre_exponential_factor.powf(-1.0 / n)
            * strain_rate_ii.powf((1.0 - n) / n)
            * self.grain_size.powf(self.grain_size_exponent / n)
            * self.water_fugacity.powf(-self.water_fugacity_exponent / n)
            * arrhenius
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViscosityLaw {
    Constant { viscosity: f64 },
    Creep(CreepLaw),
}

impl ViscosityLaw {
    pub fn viscosity(&self, strain_rate_ii: f64, pressure: f64, temperature: f64) -> f64 {
        match self {
            ViscosityLaw::Constant { viscosity } => *viscosity,
            ViscosityLaw::Creep(law) => law.viscosity(strain_rate_ii, pressure, temperature),
        }
    }
}

/// A flow law and its share in the composite harmonic blend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedViscosity {
    pub weight: f64,
    pub law: ViscosityLaw,
}

/// Drucker-Prager yield with linear strain softening between `epsilon1` and `epsilon2`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DruckerPrager {
    pub cohesion: f64,
    pub cohesion_after_softening: f64,
    pub friction_coefficient: f64,
    pub friction_after_softening: f64,
    pub epsilon1: f64,
    pub epsilon2: f64,
}

impl DruckerPrager {
    /// Softening progress in `[0, 1]`; strain is clamped to `[epsilon1, epsilon2]` first.
    pub fn softening(&self, plastic_strain: f64) -> f64 {
        let strain = plastic_strain.clamp(self.epsilon1, self.epsilon2);
        clamped_ratio(self.epsilon1, self.epsilon2, strain)
    }

    pub fn cohesion_at(&self, plastic_strain: f64) -> f64 {
        lerp(self.cohesion, self.cohesion_after_softening, self.softening(plastic_strain))
    }

    pub fn friction_at(&self, plastic_strain: f64) -> f64 {
        lerp(
            self.friction_coefficient,
            self.friction_after_softening,
            self.softening(plastic_strain),
        )
    }

    /// Tensile pressures do not lower the yield stress below the softened cohesion.
    pub fn yield_stress(&self, pressure: f64, plastic_strain: f64) -> f64 {
        self.cohesion_at(plastic_strain) + pressure.max(0.0) * self.friction_at(plastic_strain)
    }
}

/// Solidus or liquidus temperature as a cubic in pressure.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeltCurve {
    /// `[A1 (K), A2 (K/Pa), A3 (K/Pa^2), A4 (K/Pa^3)]`
    pub coefficients: [f64; 4],
}

impl MeltCurve {
    pub const fn new(a1: f64, a2: f64, a3: f64, a4: f64) -> Self {
        MeltCurve {
            coefficients: [a1, a2, a3, a4],
        }
    }

    pub fn temperature(&self, pressure: f64) -> f64 {
        cubic(self.coefficients, pressure)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeltModifier {
    pub solidus: MeltCurve,
    pub liquidus: MeltCurve,
    /// J/kg
    pub latent_heat_fusion: f64,
    pub melt_fraction_limit: f64,
    pub melt_expansion: f64,
    pub viscosity_change_x1: f64,
    pub viscosity_change_x2: f64,
    pub viscosity_change: f64,
}

impl MeltModifier {
    /// Equilibrium melt fraction, limited to `melt_fraction_limit`.
    pub fn melt_fraction(&self, temperature: f64, pressure: f64) -> f64 {
        let solidus = self.solidus.temperature(pressure);
        let liquidus = self.liquidus.temperature(pressure);
        let fraction = if temperature <= solidus {
            0.0
        } else if temperature >= liquidus || liquidus <= solidus {
            1.0
        } else {
            let t = (temperature - 0.5 * (solidus + liquidus)) / (liquidus - solidus);
            (0.5 + t + (t * t - 0.25) * (0.4256 + 2.988 * t)).clamp(0.0, 1.0)
        };
        fraction.min(self.melt_fraction_limit)
    }

    /// Central difference of the limited melt fraction in temperature.
    pub fn melt_fraction_derivative(&self, temperature: f64, pressure: f64) -> f64 {
        let dt = 0.5;
        let upper = self.melt_fraction(temperature + dt, pressure);
        let lower = self.melt_fraction(temperature - dt, pressure);
        ((upper - lower) / (2.0 * dt)).max(0.0)
    }

    /// 1 below X1, `viscosity_change` above X2, linear in between.
    pub fn viscosity_factor(&self, melt_fraction: f64) -> f64 {
        let ratio = clamped_ratio(self.viscosity_change_x1, self.viscosity_change_x2, melt_fraction);
        lerp(1.0, self.viscosity_change, ratio)
    }

    pub fn density_factor(&self, melt_fraction: f64) -> f64 {
        1.0 - self.melt_expansion * melt_fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use more_asserts::{assert_ge, assert_le};

    fn crust_dp() -> DruckerPrager {
        DruckerPrager {
            cohesion: 15.0e6,
            cohesion_after_softening: 1.5e6,
            friction_coefficient: 0.54,
            friction_after_softening: 0.011,
            epsilon1: 0.0,
            epsilon2: 0.25,
        }
    }

    fn crust_melt() -> MeltModifier {
        MeltModifier {
            solidus: MeltCurve::new(923.0, -1.2e-7, 1.2e-16, 0.0),
            liquidus: MeltCurve::new(1423.0, -1.2e-7, 1.6e-16, 0.0),
            latent_heat_fusion: 250.0e3,
            melt_fraction_limit: 0.3,
            melt_expansion: 0.13,
            viscosity_change_x1: 0.15,
            viscosity_change_x2: 0.30,
            viscosity_change: 1.0e-3,
        }
    }

    #[test]
    fn test_linear_density() {
        let law = DensityLaw::linear(3370.0, 2.8e-5);
        assert_eq!(law.density(273.15), 3370.0);
        assert_abs_diff_eq!(law.density(1273.15), 3370.0 * (1.0 - 2.8e-2), epsilon = 1e-9);
        assert_eq!(DensityLaw::Constant { density: 1.0 }.density(5000.0), 1.0);
    }

    #[test]
    fn test_softening_is_monotone_and_flat_outside_interval() {
        let dp = crust_dp();
        let mut previous = (f64::INFINITY, f64::INFINITY);
        for i in 0..=60 {
            let strain = -0.1 + i as f64 * 0.01;
            let c = dp.cohesion_at(strain);
            let mu = dp.friction_at(strain);
            assert_le!(c, previous.0);
            assert_le!(mu, previous.1);
            previous = (c, mu);
        }
        assert_eq!(dp.cohesion_at(-1.0), dp.cohesion);
        assert_eq!(dp.cohesion_at(0.25), dp.cohesion_after_softening);
        assert_eq!(dp.cohesion_at(10.0), dp.cohesion_after_softening);
        assert_eq!(dp.friction_at(0.3), dp.friction_after_softening);
        assert_abs_diff_eq!(dp.cohesion_at(0.125), 8.25e6, epsilon = 1e-6);
    }

    #[test]
    fn test_yield_stress_ignores_tension() {
        let dp = crust_dp();
        assert_eq!(dp.yield_stress(-50.0e6, 0.0), dp.cohesion);
        assert_abs_diff_eq!(dp.yield_stress(100.0e6, 0.0), 15.0e6 + 54.0e6, epsilon = 1e-6);
    }

    #[test]
    fn test_melt_fraction_bounds() {
        let melt = crust_melt();
        let pressure = 500.0e6;
        let mut previous = 0.0;
        for i in 0..200 {
            let t = 800.0 + i as f64 * 5.0;
            let f = melt.melt_fraction(t, pressure);
            assert_ge!(f, 0.0);
            assert_le!(f, melt.melt_fraction_limit);
            assert_ge!(f, previous);
            previous = f;
        }
        assert_eq!(melt.melt_fraction(700.0, pressure), 0.0);
        assert_eq!(melt.melt_fraction(2000.0, pressure), 0.3);
    }

    #[test]
    fn test_melt_fraction_midpoint() {
        let melt = MeltModifier {
            melt_fraction_limit: 1.0,
            ..crust_melt()
        };
        // halfway between solidus and liquidus at P = 0
        assert_abs_diff_eq!(melt.melt_fraction(1173.0, 0.0), 0.5 - 0.25 * 0.4256, epsilon = 1e-12);
    }

    #[test]
    fn test_viscosity_factor() {
        let melt = crust_melt();
        assert_eq!(melt.viscosity_factor(0.0), 1.0);
        assert_eq!(melt.viscosity_factor(0.15), 1.0);
        assert_eq!(melt.viscosity_factor(0.3), 1.0e-3);
        let mut previous = 1.0;
        for i in 1..=15 {
            let factor = melt.viscosity_factor(0.15 + i as f64 * 0.01);
            assert!(factor < previous, "factor must decrease inside (X1, X2]");
            previous = factor;
        }
    }

    #[test]
    fn test_creep_law_scales_and_weakens_with_temperature() {
        let law = CreepLaw::dislocation_mpa("wet quartz", 6.5e-8, 3.1, 135.0e3, 0.0);
        let cold = law.viscosity(1.0e-15, 0.0, 600.0);
        let hot = law.viscosity(1.0e-15, 0.0, 900.0);
        assert!(hot < cold);
        assert_abs_diff_eq!(law.scaled(0.01).viscosity(1.0e-15, 0.0, 600.0) / cold, 0.01, epsilon = 1e-12);
        assert!(cold > 1.0e21 && cold < 1.0e23, "cold quartz viscosity {cold:e}");
    }

    #[test]
    fn test_creep_law_is_shear_thinning() {
        let law = CreepLaw::dislocation_mpa("wet quartz", 6.5e-8, 3.1, 135.0e3, 0.0);
        assert!(law.viscosity(1.0e-13, 0.0, 700.0) < law.viscosity(1.0e-15, 0.0, 700.0));
    }
}
