pub const TO_KELVIN: f64 = 273.15;
pub const GAS_CONSTANT_J_PER_MOL_K: f64 = 8.3145;
pub const SECONDS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0;
pub const MIO: f64 = 1_000_000.0;
pub const MPA: f64 = 1.0e6;
pub const KM: f64 = 1.0e3;

// global material defaults
pub const DEFAULT_DIFFUSIVITY_M2_PER_S: f64 = 9.0e-7;
pub const DEFAULT_CAPACITY_J_PER_KG_K: f64 = 1000.0;
pub const DEFAULT_MIN_VISCOSITY_PA_S: f64 = 1.0e18;
pub const DEFAULT_MAX_VISCOSITY_PA_S: f64 = 5.0e23;
pub const REFERENCE_DENSITY_TEMPERATURE_K: f64 = 273.15;

// strain-rate floor for viscosity evaluation, and the value used before the first solve
pub const MIN_STRAIN_RATE_PER_S: f64 = 1.0e-22;
pub const DEFAULT_STRAIN_RATE_PER_S: f64 = 1.0e-15;

// nonlinear solve
pub const INITIAL_NONLINEAR_TOLERANCE: f64 = 1.0e-3;
pub const NONLINEAR_TOLERANCE: f64 = 5.0e-4;
pub const NONLINEAR_MIN_ITERATIONS: usize = 1;
pub const NONLINEAR_MAX_ITERATIONS: usize = 100;

// inner solves
pub const VELOCITY_RTOL: f64 = 1.0e-8;
pub const SCHUR_RTOL: f64 = 1.0e-6;
pub const INNER_MIN_ITERATIONS: usize = 10;
pub const PENALTY: f64 = 1.0e5;
/// Element count below which the velocity block is factorized directly.
pub const DIRECT_SOLVER_MAX_ELEMENTS: usize = 1_000_000;

pub const COURANT_NUMBER: f64 = 0.1;

// population control
pub const SPLIT_THRESHOLD: f64 = 0.95;
pub const MERGE_THRESHOLD: f64 = 1.75;
pub const MAX_SPLITS_PER_STEP: usize = 100;

// taper sharpness for the post-solve strain damping
pub const STRAIN_TAPER_SHARPNESS: f64 = 20.0;
