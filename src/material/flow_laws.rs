use crate::material::laws::{CreepLaw, MeltCurve};
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const WET_QUARTZ_PATERSON_LUAN_1990: &str = "Wet_Quartz_Dislocation_Paterson_and_Luan_1990";
pub const WET_QUARTZ_GLEASON_TULLIS_1995: &str = "Wet_Quartz_Dislocation_Gleason_and_Tullis_1995";
pub const DRY_OLIVINE_KARATO_WU_1993: &str = "Dry_Olivine_Dislocation_Karato_and_Wu_1993";
pub const MANTLE_SOLIDUS: &str = "Mantle_Solidus";
pub const MANTLE_LIQUIDUS: &str = "Mantle_Liquidus";

/// Named dislocation creep laws, SI units.
pub static FLOW_LAWS: Lazy<HashMap<&'static str, CreepLaw>> = Lazy::new(|| {
    let mut m = HashMap::new();

    m.insert(
        WET_QUARTZ_PATERSON_LUAN_1990,
        CreepLaw::dislocation_mpa(WET_QUARTZ_PATERSON_LUAN_1990, 6.5e-8, 3.1, 135.0e3, 0.0),
    );
    m.insert(
        WET_QUARTZ_GLEASON_TULLIS_1995,
        CreepLaw::dislocation_mpa(WET_QUARTZ_GLEASON_TULLIS_1995, 1.1e-4, 4.0, 223.0e3, 0.0),
    );

    // quoted directly in Pa^-3.5 s^-1
    let mut olivine = CreepLaw::dislocation_mpa(DRY_OLIVINE_KARATO_WU_1993, 1.0, 3.5, 540.0e3, 15.0e-6);
    olivine.pre_exponential_factor = 2.4168e-15;
    m.insert(DRY_OLIVINE_KARATO_WU_1993, olivine);

    m
});

pub static SOLIDII: Lazy<HashMap<&'static str, MeltCurve>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(MANTLE_SOLIDUS, MeltCurve::new(1120.661, 132.899e-9, -5.1404654e-18, 0.0));
    m
});

pub static LIQUIDII: Lazy<HashMap<&'static str, MeltCurve>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(MANTLE_LIQUIDUS, MeltCurve::new(1736.2, 4.343e-8, -9.0e-18, 0.0));
    m
});

pub fn flow_law(name: &str) -> Option<&'static CreepLaw> {
    FLOW_LAWS.get(name)
}

/// Looks a curve up in the solidus table first, then the liquidus table.
pub fn melt_curve(name: &str) -> Option<MeltCurve> {
    SOLIDII.get(name).or_else(|| LIQUIDII.get(name)).copied()
}
