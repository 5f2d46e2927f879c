use crate::config::{MaterialConfig, MaterialDefaults, MeltCurveSpec, ViscosityLawSpec};
use crate::error::{RiftError, RiftResult};
use crate::material::flow_laws::{flow_law, melt_curve};
use crate::material::{
    DensityLaw, Material, MaterialId, MeltCurve, MeltModifier, ThermalProperties, ViscosityLaw,
    WeightedViscosity,
};
use glam::DVec2;
use std::collections::HashMap;

/// Immutable, index-addressed table of material phases.
#[derive(Clone, Debug)]
pub struct MaterialRegistry {
    materials: Vec<Material>,
    by_name: HashMap<String, MaterialId>,
}

impl MaterialRegistry {
    /// Resolves named flow laws and melt curves, applies defaults and validates every phase.
    pub fn from_config(configs: &[MaterialConfig], defaults: &MaterialDefaults) -> RiftResult<Self> {
        if configs.is_empty() {
            return Err(RiftError::config("at least one material is required"));
        }
        if configs.len() > u16::MAX as usize {
            return Err(RiftError::config("too many materials"));
        }

        let mut materials = Vec::with_capacity(configs.len());
        let mut by_name = HashMap::new();
        for (index, cfg) in configs.iter().enumerate() {
            let id = MaterialId(index as u16);
            if by_name.insert(cfg.name.clone(), id).is_some() {
                return Err(RiftError::config(format!("duplicate material name '{}'", cfg.name)));
            }
            let material = resolve_material(id, cfg, defaults)?;
            validate_material(&material)?;
            materials.push(material);
        }

        Ok(MaterialRegistry { materials, by_name })
    }

    pub fn get(&self, id: MaterialId) -> &Material {
        &self.materials[id.as_index()]
    }

    pub fn id_of(&self, name: &str) -> Option<MaterialId> {
        self.by_name.get(name).copied()
    }

    pub fn require(&self, name: &str) -> RiftResult<MaterialId> {
        self.id_of(name)
            .ok_or_else(|| RiftError::config(format!("unknown material '{name}'")))
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Material> {
        self.materials.iter()
    }

    /// Material whose shape covers `point`; later registrations win.
    pub fn material_at(&self, point: DVec2) -> Option<MaterialId> {
        self.materials
            .iter()
            .rev()
            .find(|m| m.shape.is_some_and(|shape| shape.contains(point)))
            .map(|m| m.id)
    }
}

fn resolve_material(id: MaterialId, cfg: &MaterialConfig, defaults: &MaterialDefaults) -> RiftResult<Material> {
    let mut viscosity = Vec::with_capacity(cfg.viscosity.len());
    for spec in &cfg.viscosity {
        let law = match &spec.law {
            ViscosityLawSpec::Constant { viscosity } => ViscosityLaw::Constant { viscosity: *viscosity },
            ViscosityLawSpec::Named { name, factor } => {
                let law = flow_law(name).ok_or_else(|| {
                    RiftError::config(format!("material '{}': unknown flow law '{}'", cfg.name, name))
                })?;
                ViscosityLaw::Creep(law.scaled(*factor))
            }
            ViscosityLawSpec::Creep(law) => ViscosityLaw::Creep(law.clone()),
        };
        viscosity.push(WeightedViscosity { weight: spec.weight, law });
    }

    let melt = match &cfg.melt {
        Some(m) => Some(MeltModifier {
            solidus: resolve_curve(&cfg.name, &m.solidus)?,
            liquidus: resolve_curve(&cfg.name, &m.liquidus)?,
            latent_heat_fusion: m.latent_heat_fusion,
            melt_fraction_limit: m.melt_fraction_limit,
            melt_expansion: m.melt_expansion,
            viscosity_change_x1: m.viscosity_change_x1,
            viscosity_change_x2: m.viscosity_change_x2,
            viscosity_change: m.viscosity_change,
        }),
        None => None,
    };

    Ok(Material {
        id,
        name: cfg.name.clone(),
        shape: cfg.shape,
        density: cfg.density,
        viscosity,
        plasticity: cfg.plasticity,
        stress_limiter: cfg.stress_limiter,
        melt,
        thermal: ThermalProperties {
            diffusivity: cfg.diffusivity.unwrap_or(defaults.diffusivity),
            capacity: cfg.capacity.unwrap_or(defaults.capacity),
            radiogenic_heat_production: cfg.radiogenic_heat_production,
        },
        temperature_limiter: cfg.temperature_limiter,
    })
}

fn resolve_curve(material: &str, spec: &MeltCurveSpec) -> RiftResult<MeltCurve> {
    match spec {
        MeltCurveSpec::Named(name) => melt_curve(name).ok_or_else(|| {
            RiftError::config(format!("material '{material}': unknown melt curve '{name}'"))
        }),
        MeltCurveSpec::Curve(curve) => Ok(*curve),
    }
}

fn positive(material: &str, what: &str, value: f64) -> RiftResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(RiftError::config(format!("material '{material}': {what} must be positive, got {value}")))
    }
}

fn validate_material(m: &Material) -> RiftResult<()> {
    let name = m.name.as_str();

    if m.viscosity.is_empty() {
        return Err(RiftError::config(format!("material '{name}': no viscosity law")));
    }
    for weighted in &m.viscosity {
        positive(name, "viscosity blend weight", weighted.weight)?;
        match &weighted.law {
            ViscosityLaw::Constant { viscosity } => positive(name, "viscosity", *viscosity)?,
            ViscosityLaw::Creep(law) => {
                positive(name, "creep pre-exponential factor", law.pre_exponential_factor)?;
                positive(name, "creep stress exponent", law.stress_exponent)?;
                positive(name, "creep factor", law.factor)?;
                positive(name, "creep grain size", law.grain_size)?;
                positive(name, "creep water fugacity", law.water_fugacity)?;
            }
        }
    }

    match m.density {
        DensityLaw::Constant { density } => positive(name, "density", density)?,
        DensityLaw::Linear { reference_density, .. } => positive(name, "reference density", reference_density)?,
    }
    positive(name, "heat capacity", m.thermal.capacity)?;
    positive(name, "diffusivity", m.thermal.diffusivity)?;
    if m.thermal.radiogenic_heat_production < 0.0 {
        return Err(RiftError::config(format!("material '{name}': negative radiogenic heat production")));
    }

    if let Some(dp) = &m.plasticity {
        if dp.epsilon1 >= dp.epsilon2 {
            return Err(RiftError::config(format!(
                "material '{name}': softening interval requires epsilon1 < epsilon2 (got {} >= {})",
                dp.epsilon1, dp.epsilon2
            )));
        }
        if dp.cohesion < 0.0 || dp.cohesion_after_softening < 0.0 {
            return Err(RiftError::config(format!("material '{name}': negative cohesion")));
        }
        if dp.friction_coefficient < 0.0 || dp.friction_after_softening < 0.0 {
            return Err(RiftError::config(format!("material '{name}': negative friction coefficient")));
        }
    }
    if let Some(limit) = m.stress_limiter {
        positive(name, "stress limiter", limit)?;
    }
    if let Some(limit) = m.temperature_limiter {
        positive(name, "temperature limiter", limit)?;
    }

    if let Some(melt) = &m.melt {
        if !(0.0..=1.0).contains(&melt.melt_fraction_limit) {
            return Err(RiftError::config(format!("material '{name}': melt fraction limit outside [0, 1]")));
        }
        if melt.viscosity_change_x1 >= melt.viscosity_change_x2 {
            return Err(RiftError::config(format!(
                "material '{name}': viscosity change thresholds require X1 < X2"
            )));
        }
        positive(name, "melt viscosity change", melt.viscosity_change)?;
        if melt.latent_heat_fusion < 0.0 {
            return Err(RiftError::config(format!("material '{name}': negative latent heat")));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MaterialConfig, MeltModifierConfig, ViscositySpec};
    use crate::material::flow_laws::{MANTLE_LIQUIDUS, MANTLE_SOLIDUS, WET_QUARTZ_PATERSON_LUAN_1990};
    use crate::material::DruckerPrager;
    use crate::shapes::Region;

    fn layer(name: &str, top: f64, bottom: f64) -> MaterialConfig {
        MaterialConfig::new(name, DensityLaw::Constant { density: 2700.0 }, vec![ViscositySpec::constant(1.0e21)])
            .with_shape(Region::Layer { top, bottom })
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let registry = MaterialRegistry::from_config(
            &[layer("Air", 30.0e3, 0.0), layer("Crust", 0.0, -36.0e3)],
            &MaterialDefaults::default(),
        )
        .unwrap();
        let crust = registry.id_of("Crust").unwrap();
        assert_eq!(crust, MaterialId(1));
        assert_eq!(registry.get(crust).name, "Crust");
        assert_eq!(registry.get(crust).thermal.diffusivity, 9.0e-7);
        assert!(registry.require("Mantle").is_err());
    }

    #[test]
    fn test_later_shapes_win() {
        let registry = MaterialRegistry::from_config(
            &[layer("Air", 30.0e3, 0.0), layer("Crust", 0.0, -36.0e3)],
            &MaterialDefaults::default(),
        )
        .unwrap();
        // y = 0 is shared by both layers
        assert_eq!(registry.material_at(DVec2::new(0.0, 0.0)), Some(MaterialId(1)));
        assert_eq!(registry.material_at(DVec2::new(0.0, 10.0)), Some(MaterialId(0)));
        assert_eq!(registry.material_at(DVec2::new(0.0, -50.0e3)), None);
    }

    #[test]
    fn test_named_laws_resolve() {
        let cfg = MaterialConfig::new(
            "Crust",
            DensityLaw::linear(2700.0, 2.8e-5),
            vec![ViscositySpec::named(WET_QUARTZ_PATERSON_LUAN_1990, 0.25)],
        )
        .with_melt(MeltModifierConfig {
            solidus: MeltCurveSpec::Named(MANTLE_SOLIDUS.to_string()),
            liquidus: MeltCurveSpec::Named(MANTLE_LIQUIDUS.to_string()),
            latent_heat_fusion: 250.0e3,
            melt_fraction_limit: 0.03,
            melt_expansion: 0.13,
            viscosity_change_x1: 0.001,
            viscosity_change_x2: 0.03,
            viscosity_change: 1.0e-2,
        });
        let registry = MaterialRegistry::from_config(&[cfg], &MaterialDefaults::default()).unwrap();
        let m = registry.get(MaterialId(0));
        match &m.viscosity[0].law {
            ViscosityLaw::Creep(law) => assert_eq!(law.factor, 0.25),
            other => panic!("expected creep law, got {other:?}"),
        }
        assert!(m.melt.is_some());
    }

    #[test]
    fn test_rejects_non_positive_properties() {
        let defaults = MaterialDefaults::default();
        let bad_viscosity =
            MaterialConfig::new("A", DensityLaw::Constant { density: 1.0 }, vec![ViscositySpec::constant(0.0)]);
        assert!(matches!(
            MaterialRegistry::from_config(&[bad_viscosity], &defaults),
            Err(RiftError::Configuration(_))
        ));

        let bad_density =
            MaterialConfig::new("B", DensityLaw::Constant { density: -1.0 }, vec![ViscositySpec::constant(1.0e20)]);
        assert!(MaterialRegistry::from_config(&[bad_density], &defaults).is_err());

        let mut bad_capacity =
            MaterialConfig::new("C", DensityLaw::Constant { density: 1.0 }, vec![ViscositySpec::constant(1.0e20)]);
        bad_capacity.capacity = Some(0.0);
        assert!(MaterialRegistry::from_config(&[bad_capacity], &defaults).is_err());
    }

    #[test]
    fn test_rejects_inverted_softening_interval() {
        let cfg = MaterialConfig::new("D", DensityLaw::Constant { density: 2700.0 }, vec![ViscositySpec::constant(1.0e21)])
            .with_plasticity(DruckerPrager {
                cohesion: 5.0e6,
                cohesion_after_softening: 1.0e6,
                friction_coefficient: 0.54,
                friction_after_softening: 0.011,
                epsilon1: 0.15,
                epsilon2: 0.15,
            });
        let err = MaterialRegistry::from_config(&[cfg], &MaterialDefaults::default()).unwrap_err();
        assert!(err.to_string().contains("epsilon1 < epsilon2"));
    }

    #[test]
    fn test_rejects_duplicate_names_and_unknown_laws() {
        let defaults = MaterialDefaults::default();
        assert!(MaterialRegistry::from_config(&[layer("A", 1.0, 0.0), layer("A", 0.0, -1.0)], &defaults).is_err());
        let unknown = MaterialConfig::new(
            "E",
            DensityLaw::Constant { density: 2700.0 },
            vec![ViscositySpec::named("Cheese_Creep", 1.0)],
        );
        assert!(MaterialRegistry::from_config(&[unknown], &defaults).is_err());
    }
}
