//! Immutable model description.
//!
//! Everything a run needs is carried in [`ModelConfig`] and handed to each
//! component at construction. Defaults reproduce the narrow-rift inversion run.

use crate::constants::*;
use crate::error::{RiftError, RiftResult};
use crate::json_parser::JsonParser;
use crate::material::{CreepLaw, DensityLaw, DruckerPrager, MaterialRegistry, MeltCurve};
use crate::mesh::{Grid, TemperatureBoundaries, VelocityBoundaries};
use crate::shapes::Region;
use glam::DVec2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn one() -> f64 {
    1.0
}

fn yes() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub min: [f64; 2],
    pub max: [f64; 2],
    pub resolution: [usize; 2],
    #[serde(default = "default_gravity")]
    pub gravity: [f64; 2],
}

fn default_gravity() -> [f64; 2] {
    [0.0, -9.81]
}

impl DomainConfig {
    pub fn grid(&self) -> RiftResult<Grid> {
        Grid::new(
            DVec2::from(self.min),
            DVec2::from(self.max),
            self.resolution[0],
            self.resolution[1],
        )
    }

    pub fn gravity(&self) -> DVec2 {
        DVec2::from(self.gravity)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialDefaults {
    pub diffusivity: f64,
    pub capacity: f64,
    pub min_viscosity: f64,
    pub max_viscosity: f64,
    /// Strain rate assumed before any velocity has been solved.
    pub default_strain_rate: f64,
    pub min_strain_rate: f64,
}

impl Default for MaterialDefaults {
    fn default() -> Self {
        MaterialDefaults {
            diffusivity: DEFAULT_DIFFUSIVITY_M2_PER_S,
            capacity: DEFAULT_CAPACITY_J_PER_KG_K,
            min_viscosity: DEFAULT_MIN_VISCOSITY_PA_S,
            max_viscosity: DEFAULT_MAX_VISCOSITY_PA_S,
            default_strain_rate: DEFAULT_STRAIN_RATE_PER_S,
            min_strain_rate: MIN_STRAIN_RATE_PER_S,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViscosityLawSpec {
    Constant {
        viscosity: f64,
    },
    /// A law from the flow-law registry, scaled by `factor`.
    Named {
        name: String,
        #[serde(default = "one")]
        factor: f64,
    },
    Creep(CreepLaw),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViscositySpec {
    #[serde(default = "one")]
    pub weight: f64,
    pub law: ViscosityLawSpec,
}

impl ViscositySpec {
    pub fn constant(viscosity: f64) -> Self {
        ViscositySpec {
            weight: 1.0,
            law: ViscosityLawSpec::Constant { viscosity },
        }
    }

    pub fn named(name: &str, factor: f64) -> Self {
        ViscositySpec {
            weight: 1.0,
            law: ViscosityLawSpec::Named {
                name: name.to_string(),
                factor,
            },
        }
    }

    pub fn weighted(self, weight: f64) -> Self {
        ViscositySpec { weight, ..self }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeltCurveSpec {
    Named(String),
    Curve(MeltCurve),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeltModifierConfig {
    pub solidus: MeltCurveSpec,
    pub liquidus: MeltCurveSpec,
    pub latent_heat_fusion: f64,
    pub melt_fraction_limit: f64,
    pub melt_expansion: f64,
    pub viscosity_change_x1: f64,
    pub viscosity_change_x2: f64,
    pub viscosity_change: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub name: String,
    #[serde(default)]
    pub shape: Option<Region>,
    pub density: DensityLaw,
    pub viscosity: Vec<ViscositySpec>,
    #[serde(default)]
    pub plasticity: Option<DruckerPrager>,
    #[serde(default)]
    pub stress_limiter: Option<f64>,
    #[serde(default)]
    pub melt: Option<MeltModifierConfig>,
    #[serde(default)]
    pub diffusivity: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub radiogenic_heat_production: f64,
    #[serde(default)]
    pub temperature_limiter: Option<f64>,
}

impl MaterialConfig {
    pub fn new(name: &str, density: DensityLaw, viscosity: Vec<ViscositySpec>) -> Self {
        MaterialConfig {
            name: name.to_string(),
            shape: None,
            density,
            viscosity,
            plasticity: None,
            stress_limiter: None,
            melt: None,
            diffusivity: None,
            capacity: None,
            radiogenic_heat_production: 0.0,
            temperature_limiter: None,
        }
    }

    pub fn with_shape(mut self, shape: Region) -> Self {
        self.shape = Some(shape);
        self
    }

    pub fn with_plasticity(mut self, plasticity: DruckerPrager) -> Self {
        self.plasticity = Some(plasticity);
        self
    }

    pub fn with_stress_limiter(mut self, limit: f64) -> Self {
        self.stress_limiter = Some(limit);
        self
    }

    pub fn with_melt(mut self, melt: MeltModifierConfig) -> Self {
        self.melt = Some(melt);
        self
    }

    pub fn with_radiogenic_heat(mut self, production: f64) -> Self {
        self.radiogenic_heat_production = production;
        self
    }

    pub fn with_temperature_limiter(mut self, limit: f64) -> Self {
        self.temperature_limiter = Some(limit);
        self
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Elevation equal to the threshold counts as below it.
    #[default]
    Inclusive,
    Exclusive,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SedimentationConfig {
    pub open_materials: Vec<String>,
    pub deposit_material: String,
    pub threshold: f64,
    #[serde(default)]
    pub policy: ThresholdPolicy,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    Abort,
    /// Log the failure and keep the last iterate.
    #[default]
    Warn,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendChoice {
    /// Direct below `direct_solver_max_elements`, multigrid above.
    #[default]
    Auto,
    Direct,
    Multigrid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InnerSolveOptions {
    pub rtol: f64,
    pub min_iterations: usize,
    pub max_iterations: usize,
    #[serde(default = "yes")]
    pub use_previous_guess: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultigridOptions {
    pub smoothing_sweeps: usize,
    pub jacobi_weight: f64,
    pub strength_threshold: f64,
    /// Stop coarsening once a level has at most this many unknowns.
    pub coarse_size: usize,
    pub max_levels: usize,
}

impl Default for MultigridOptions {
    fn default() -> Self {
        MultigridOptions {
            smoothing_sweeps: 2,
            jacobi_weight: 2.0 / 3.0,
            strength_threshold: 0.08,
            coarse_size: 400,
            max_levels: 10,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub initial_nonlinear_tolerance: f64,
    pub nonlinear_tolerance: f64,
    pub nonlinear_min_iterations: usize,
    pub nonlinear_max_iterations: usize,
    pub nonlinear_failure_policy: FailurePolicy,
    pub velocity: InnerSolveOptions,
    pub schur: InnerSolveOptions,
    pub penalty: f64,
    pub remove_constant_pressure_null_space: bool,
    pub surface_pressure_normalization: bool,
    pub backend: BackendChoice,
    pub direct_solver_max_elements: usize,
    pub multigrid: MultigridOptions,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            initial_nonlinear_tolerance: INITIAL_NONLINEAR_TOLERANCE,
            nonlinear_tolerance: NONLINEAR_TOLERANCE,
            nonlinear_min_iterations: NONLINEAR_MIN_ITERATIONS,
            nonlinear_max_iterations: NONLINEAR_MAX_ITERATIONS,
            nonlinear_failure_policy: FailurePolicy::default(),
            velocity: InnerSolveOptions {
                rtol: VELOCITY_RTOL,
                min_iterations: INNER_MIN_ITERATIONS,
                max_iterations: 5000,
                use_previous_guess: true,
            },
            schur: InnerSolveOptions {
                rtol: SCHUR_RTOL,
                min_iterations: INNER_MIN_ITERATIONS,
                max_iterations: 1000,
                use_previous_guess: true,
            },
            penalty: PENALTY,
            remove_constant_pressure_null_space: true,
            surface_pressure_normalization: true,
            backend: BackendChoice::Auto,
            direct_solver_max_elements: DIRECT_SOLVER_MAX_ELEMENTS,
            multigrid: MultigridOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThermalOptions {
    pub shear_heating: bool,
    pub latent_heat: bool,
    /// 0.5 is Crank-Nicolson, 1.0 backward Euler.
    pub theta: f64,
    /// Start from the steady conductive geotherm instead of a linear profile.
    pub steady_state_init: bool,
    pub solve: InnerSolveOptions,
}

impl Default for ThermalOptions {
    fn default() -> Self {
        ThermalOptions {
            shear_heating: true,
            latent_heat: true,
            theta: 0.5,
            steady_state_init: true,
            solve: InnerSolveOptions {
                rtol: 1.0e-10,
                min_iterations: 1,
                max_iterations: 5000,
                use_previous_guess: true,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeStepOptions {
    pub courant: f64,
    /// Multiplies `h^2 / kappa_max` for the diffusive bound.
    pub diffusion_number: f64,
    pub max_dt: Option<f64>,
}

impl Default for TimeStepOptions {
    fn default() -> Self {
        TimeStepOptions {
            courant: COURANT_NUMBER,
            diffusion_number: 1.0,
            max_dt: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationOptions {
    /// Regular sub-grid of particles seeded in each cell.
    pub layout: [usize; 2],
    pub split_threshold: f64,
    pub merge_threshold: f64,
    pub max_splits: usize,
    /// Merging never takes a cell below this count.
    pub min_per_cell: usize,
    /// Split offsets as a fraction of the cell size.
    pub jitter: f64,
    pub enabled: bool,
}

impl Default for PopulationOptions {
    fn default() -> Self {
        PopulationOptions {
            layout: [4, 4],
            split_threshold: SPLIT_THRESHOLD,
            merge_threshold: MERGE_THRESHOLD,
            max_splits: MAX_SPLITS_PER_STEP,
            min_per_cell: 4,
            jitter: 0.1,
            enabled: true,
        }
    }
}

impl PopulationOptions {
    pub fn target_per_cell(&self) -> usize {
        self.layout[0] * self.layout[1]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DamageConfig {
    pub max_damage: f64,
    pub centre: [f64; 2],
    /// m, the distance over which the envelope falls by a factor e.
    pub width: f64,
    /// Vertical width is `width * vertical_width_factor`.
    pub vertical_width_factor: f64,
    /// Particles above this elevation start undamaged.
    #[serde(default)]
    pub exclude_above: Option<f64>,
}

impl Default for DamageConfig {
    fn default() -> Self {
        DamageConfig {
            max_damage: 0.25,
            centre: [360.0e3, -40.0e3],
            width: 75.0e3,
            vertical_width_factor: 100.0,
            exclude_above: Some(0.0),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrainTaperPolicy {
    Never,
    OnceAtInit,
    /// After every converged mechanical solve.
    #[default]
    EveryStep,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunControl {
    /// s
    pub end_time: f64,
    #[serde(default)]
    pub checkpoint_interval: Option<f64>,
    pub output_dir: PathBuf,
    /// `-1` resumes from the latest checkpoint in `restart_dir`.
    #[serde(default)]
    pub restart_step: Option<i64>,
    #[serde(default)]
    pub restart_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_steps: Option<u64>,
    #[serde(default)]
    pub wall_time_limit_s: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartTarget {
    Fresh,
    Latest,
    Step(u64),
}

impl RunControl {
    pub fn restart_target(&self) -> RiftResult<RestartTarget> {
        match self.restart_step {
            None => Ok(RestartTarget::Fresh),
            Some(-1) => Ok(RestartTarget::Latest),
            Some(step) if step >= 0 => Ok(RestartTarget::Step(step as u64)),
            Some(step) => Err(RiftError::config(format!("invalid restart step {step}"))),
        }
    }

    pub fn restart_dir(&self) -> &Path {
        self.restart_dir.as_deref().unwrap_or(&self.output_dir)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub domain: DomainConfig,
    #[serde(default)]
    pub defaults: MaterialDefaults,
    pub materials: Vec<MaterialConfig>,
    pub velocity_bcs: VelocityBoundaries,
    pub temperature_bcs: TemperatureBoundaries,
    #[serde(default)]
    pub surface_process: Option<SedimentationConfig>,
    #[serde(default)]
    pub solver: SolverOptions,
    #[serde(default)]
    pub thermal: ThermalOptions,
    #[serde(default)]
    pub time: TimeStepOptions,
    #[serde(default)]
    pub population: PopulationOptions,
    #[serde(default)]
    pub damage: Option<DamageConfig>,
    #[serde(default)]
    pub strain_taper: StrainTaperPolicy,
    pub run: RunControl,
    #[serde(default)]
    pub seed: u64,
}

impl ModelConfig {
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> RiftResult<Self> {
        let value = JsonParser::load_json(path)?;
        Self::from_value(value)
    }

    pub fn from_json_str(json: &str) -> RiftResult<Self> {
        let value = JsonParser::parse(json)?;
        Self::from_value(value)
    }

    pub fn grid(&self) -> RiftResult<Grid> {
        self.domain.grid()
    }

    pub fn gravity(&self) -> DVec2 {
        self.domain.gravity()
    }

    fn from_value(value: serde_json::Value) -> RiftResult<Self> {
        let config: ModelConfig = serde_json::from_value(value)
            .map_err(|e| RiftError::config(format!("invalid model description: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Every setup-time check; nothing is allocated for the solvers until this passes.
    pub fn validate(&self) -> RiftResult<MaterialRegistry> {
        let grid = self.domain.grid()?;
        if !self.domain.gravity().is_finite() {
            return Err(RiftError::config("gravity must be finite"));
        }

        let d = &self.defaults;
        if !(d.min_viscosity > 0.0 && d.min_viscosity <= d.max_viscosity) {
            return Err(RiftError::config(format!(
                "viscosity bounds must satisfy 0 < min <= max (got [{:e}, {:e}])",
                d.min_viscosity, d.max_viscosity
            )));
        }
        if !(d.default_strain_rate > 0.0 && d.min_strain_rate > 0.0) {
            return Err(RiftError::config("strain-rate floors must be positive"));
        }
        if !(d.diffusivity > 0.0 && d.capacity > 0.0) {
            return Err(RiftError::config("default diffusivity and capacity must be positive"));
        }

        let registry = MaterialRegistry::from_config(&self.materials, &self.defaults)?;

        self.velocity_bcs.validate(&grid)?;
        self.temperature_bcs.validate()?;
        for set in &self.temperature_bcs.node_sets {
            if let crate::mesh::NodeSelector::Materials { names } = &set.selector {
                for name in names {
                    registry.require(name)?;
                }
            }
        }

        if let Some(sp) = &self.surface_process {
            if sp.open_materials.is_empty() {
                return Err(RiftError::config("surface process needs at least one open material"));
            }
            for name in &sp.open_materials {
                registry.require(name)?;
            }
            registry.require(&sp.deposit_material)?;
            if sp.open_materials.contains(&sp.deposit_material) {
                return Err(RiftError::config("deposit material cannot also be an open material"));
            }
        }

        let s = &self.solver;
        if !(s.initial_nonlinear_tolerance > 0.0 && s.nonlinear_tolerance > 0.0) {
            return Err(RiftError::config("nonlinear tolerances must be positive"));
        }
        if s.nonlinear_max_iterations == 0 || s.nonlinear_min_iterations > s.nonlinear_max_iterations {
            return Err(RiftError::config("nonlinear iteration bounds must satisfy 1 <= min <= max"));
        }
        for (name, inner) in [("velocity", &s.velocity), ("schur", &s.schur), ("thermal", &self.thermal.solve)] {
            if !(inner.rtol > 0.0) || inner.max_iterations == 0 || inner.min_iterations > inner.max_iterations {
                return Err(RiftError::config(format!("{name} solve options are inconsistent")));
            }
        }
        if s.penalty < 0.0 {
            return Err(RiftError::config("penalty must be non-negative"));
        }

        if !(self.thermal.theta >= 0.5 && self.thermal.theta <= 1.0) {
            return Err(RiftError::config("thermal theta must lie in [0.5, 1] for unconditional stability"));
        }
        if !(self.time.courant > 0.0 && self.time.courant <= 1.0) {
            return Err(RiftError::config("Courant number must lie in (0, 1]"));
        }
        if !(self.time.diffusion_number > 0.0) {
            return Err(RiftError::config("diffusion number must be positive"));
        }

        let p = &self.population;
        if p.layout[0] == 0 || p.layout[1] == 0 {
            return Err(RiftError::config("particle layout must seed at least one particle per cell"));
        }
        if !(p.split_threshold > 0.0 && p.split_threshold <= 1.0) {
            return Err(RiftError::config("split threshold must lie in (0, 1]"));
        }
        if !(p.merge_threshold > 1.0) {
            return Err(RiftError::config("merge threshold must exceed 1"));
        }
        if p.min_per_cell == 0 || p.min_per_cell > p.target_per_cell() {
            return Err(RiftError::config("per-cell floor must lie in [1, target]"));
        }
        if !(0.0..0.5).contains(&p.jitter) {
            return Err(RiftError::config("split jitter must lie in [0, 0.5)"));
        }

        let r = &self.run;
        if !(r.end_time > 0.0) {
            return Err(RiftError::config("end time must be positive"));
        }
        if let Some(interval) = r.checkpoint_interval {
            if !(interval > 0.0) {
                return Err(RiftError::config("checkpoint interval must be positive"));
            }
        }
        r.restart_target()?;

        if let Some(damage) = &self.damage {
            if !(damage.width > 0.0 && damage.vertical_width_factor > 0.0 && damage.max_damage >= 0.0) {
                return Err(RiftError::config("damage seed needs positive widths and non-negative amplitude"));
            }
        }

        Ok(registry)
    }
}
