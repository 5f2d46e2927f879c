//! Narrow rift inversion model
//! A 720 km x 240 km section through layered continental lithosphere, shortened
//! at 1.1355 cm/yr from both sides over 8.01 Myr, with sticky air above a
//! sedimentation threshold at sea level.
//!
//! usage: narrow_rift [resolution divisor] [output dir] [end time, Myr] [max steps]

use litho_rift_rust::comm::SerialCommunicator;
use litho_rift_rust::config::{
    DamageConfig, DomainConfig, MaterialConfig, MaterialDefaults, MeltCurveSpec, MeltModifierConfig, ModelConfig,
    PopulationOptions, RunControl, SedimentationConfig, SolverOptions, StrainTaperPolicy, ThermalOptions,
    ThresholdPolicy, TimeStepOptions, ViscositySpec,
};
use litho_rift_rust::material::flow_laws::{
    DRY_OLIVINE_KARATO_WU_1993, MANTLE_LIQUIDUS, MANTLE_SOLIDUS, WET_QUARTZ_GLEASON_TULLIS_1995,
    WET_QUARTZ_PATERSON_LUAN_1990,
};
use litho_rift_rust::material::{DensityLaw, DruckerPrager, MeltCurve};
use litho_rift_rust::mesh::{
    BoundaryCondition, NodeSelector, NodeSetCondition, TemperatureBoundaries, VelocityBoundaries, WallConditions,
};
use litho_rift_rust::shapes::Region;
use litho_rift_rust::sim::{latest_checkpoint_step, RunOutcome, SimProps, Simulation};
use litho_rift_rust::sim_op::{CsvWriterOp, ProgressReporterOp};
use litho_rift_rust::temp_utils::{cm_per_year_to_m_per_s, km_to_m, mpa_to_pa, myr_to_seconds, seconds_to_myr, years_to_seconds};
use litho_rift_rust::{RiftError, RiftResult};
use std::path::PathBuf;

// full resolution is 750 m
const FULL_RESOLUTION: [usize; 2] = [960, 320];
const SURFACE_TEMP_K: f64 = 293.15;
const BASE_TEMP_K: f64 = 1603.15;
const PLATE_RATE_CM_PER_YEAR: f64 = 1.1355;
const BASAL_TRACTION_PA: f64 = 6.48174e9;
const CRUST_HEAT_W_PER_M3: f64 = 0.88e-6;
const EXPANSIVITY: f64 = 2.8e-5;

struct DemoArgs {
    divisor: usize,
    output_dir: PathBuf,
    end_time_myr: f64,
    max_steps: Option<u64>,
}

fn parse_args() -> RiftResult<DemoArgs> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let divisor = match args.first() {
        Some(s) => s.parse().map_err(|_| RiftError::config(format!("bad resolution divisor '{s}'")))?,
        None => 8,
    };
    if divisor == 0 || FULL_RESOLUTION[0] % divisor != 0 || FULL_RESOLUTION[1] % divisor != 0 {
        return Err(RiftError::config(format!("resolution divisor {divisor} must divide 960 and 320")));
    }
    let output_dir = args.get(1).map_or_else(|| PathBuf::from("Inversion_Narrow_Rift"), PathBuf::from);
    let end_time_myr = match args.get(2) {
        Some(s) => s.parse().map_err(|_| RiftError::config(format!("bad end time '{s}'")))?,
        None => 8.01,
    };
    let max_steps = match args.get(3) {
        Some(s) => Some(s.parse().map_err(|_| RiftError::config(format!("bad step limit '{s}'")))?),
        None => None,
    };
    Ok(DemoArgs {
        divisor,
        output_dir,
        end_time_myr,
        max_steps,
    })
}

fn layer(top_km: f64, bottom_km: f64) -> Region {
    Region::Layer {
        top: km_to_m(top_km),
        bottom: km_to_m(bottom_km),
    }
}

fn drucker_prager(cohesion: f64, softened: f64, friction: f64, friction_softened: f64, epsilon2: f64) -> DruckerPrager {
    DruckerPrager {
        cohesion: mpa_to_pa(cohesion),
        cohesion_after_softening: mpa_to_pa(softened),
        friction_coefficient: friction,
        friction_after_softening: friction_softened,
        epsilon1: 0.0,
        epsilon2,
    }
}

fn crust_melt() -> MeltModifierConfig {
    MeltModifierConfig {
        solidus: MeltCurveSpec::Curve(MeltCurve::new(923.0, -1.2e-7, 1.2e-16, 0.0)),
        liquidus: MeltCurveSpec::Curve(MeltCurve::new(1423.0, -1.2e-7, 1.6e-16, 0.0)),
        latent_heat_fusion: 250.0e3,
        melt_fraction_limit: 0.3,
        melt_expansion: 0.13,
        viscosity_change_x1: 0.15,
        viscosity_change_x2: 0.30,
        viscosity_change: 1.0e-3,
    }
}

fn mantle_melt() -> MeltModifierConfig {
    MeltModifierConfig {
        solidus: MeltCurveSpec::Named(MANTLE_SOLIDUS.to_string()),
        liquidus: MeltCurveSpec::Named(MANTLE_LIQUIDUS.to_string()),
        latent_heat_fusion: 250.0e3,
        melt_fraction_limit: 0.03,
        melt_expansion: 0.13,
        viscosity_change_x1: 0.001,
        viscosity_change_x2: 0.03,
        viscosity_change: 1.0e-2,
    }
}

fn materials() -> Vec<MaterialConfig> {
    let mut m = Vec::new();

    let mut air = MaterialConfig::new("Air", DensityLaw::Constant { density: 1.0 }, vec![ViscositySpec::constant(5.0e18)])
        .with_shape(layer(30.0, 0.0));
    air.diffusivity = Some(1.0e-5);
    air.capacity = Some(100.0);
    m.push(air);

    // deposited below sea level, never placed by shape
    m.push(
        MaterialConfig::new(
            "Sediment",
            DensityLaw::linear(2300.0, EXPANSIVITY),
            vec![ViscositySpec::named(WET_QUARTZ_GLEASON_TULLIS_1995, 1.0)],
        )
        .with_radiogenic_heat(0.88e-12)
        .with_plasticity(DruckerPrager {
            cohesion: mpa_to_pa(1.0),
            cohesion_after_softening: mpa_to_pa(0.1),
            friction_coefficient: 0.4,
            friction_after_softening: 0.01,
            epsilon1: 0.05,
            epsilon2: 0.15,
        })
        .with_stress_limiter(mpa_to_pa(100.0)),
    );

    m.push(
        MaterialConfig::new(
            "Sediment Layer 1",
            DensityLaw::linear(2600.0, EXPANSIVITY),
            vec![ViscositySpec::constant(5.0e19)],
        )
        .with_shape(layer(0.0, -1.0))
        .with_radiogenic_heat(CRUST_HEAT_W_PER_M3)
        .with_plasticity(drucker_prager(0.0, 0.0, 0.1, 0.01, 0.15))
        .with_stress_limiter(mpa_to_pa(100.0)),
    );
    for k in 2..=6 {
        let top = -(k as f64 - 1.0);
        m.push(
            MaterialConfig::new(
                &format!("Sediment Layer {k}"),
                DensityLaw::linear(2600.0, EXPANSIVITY),
                vec![ViscositySpec::named(WET_QUARTZ_PATERSON_LUAN_1990, 0.01)],
            )
            .with_shape(layer(top, top - 1.0))
            .with_radiogenic_heat(CRUST_HEAT_W_PER_M3)
            .with_plasticity(drucker_prager(5.0, 1.0, 0.54, 0.011, 0.15))
            .with_stress_limiter(mpa_to_pa(100.0)),
        );
    }

    // (layer, top km, bottom km, reference density, quartz factor)
    let crust = [
        (3, -6.0, -9.0, 2650.0, 0.75),
        (4, -9.0, -12.0, 2675.0, 0.25),
        (5, -12.0, -15.0, 2700.0, 1.0),
        (6, -15.0, -18.0, 2725.0, 1.0),
        (7, -18.0, -21.0, 2750.0, 2.0),
        (8, -21.0, -24.0, 2775.0, 2.0),
        (9, -24.0, -27.0, 2800.0, 3.0),
        (10, -27.0, -36.0, 2825.0, 3.0),
    ];
    for (k, top, bottom, density, factor) in crust {
        // the topmost crustal layer is weaker and softens over less strain
        let (plasticity, limiter) = if k == 3 {
            (drucker_prager(5.0, 1.0, 0.54, 0.011, 0.15), 125.0)
        } else {
            (drucker_prager(15.0, 1.5, 0.54, 0.011, 0.25), 150.0)
        };
        m.push(
            MaterialConfig::new(
                &format!("Continental Crust Layer{k}"),
                DensityLaw::linear(density, EXPANSIVITY),
                vec![ViscositySpec::named(WET_QUARTZ_PATERSON_LUAN_1990, factor)],
            )
            .with_shape(layer(top, bottom))
            .with_radiogenic_heat(CRUST_HEAT_W_PER_M3)
            .with_plasticity(plasticity)
            .with_stress_limiter(mpa_to_pa(limiter))
            .with_melt(crust_melt()),
        );
    }

    for (name, shape) in [("Upper Mantle", layer(-36.0, -110.0)), ("Asthenosphere", layer(-110.0, -210.0))] {
        m.push(
            MaterialConfig::new(
                name,
                DensityLaw::linear(3370.0, EXPANSIVITY),
                vec![ViscositySpec::named(DRY_OLIVINE_KARATO_WU_1993, 1.0)],
            )
            .with_shape(shape)
            .with_plasticity(drucker_prager(15.0, 1.5, 0.44, 0.011, 0.15))
            .with_stress_limiter(mpa_to_pa(250.0))
            .with_temperature_limiter(1603.0)
            .with_melt(mantle_melt()),
        );
    }
    m
}

fn narrow_rift_config(args: &DemoArgs) -> RiftResult<ModelConfig> {
    let rate = cm_per_year_to_m_per_s(PLATE_RATE_CM_PER_YEAR);
    let restart_step = latest_checkpoint_step(&args.output_dir)?.map(|_| -1);

    Ok(ModelConfig {
        name: "Narrow Rift".to_string(),
        domain: DomainConfig {
            min: [0.0, km_to_m(-210.0)],
            max: [km_to_m(720.0), km_to_m(30.0)],
            resolution: [FULL_RESOLUTION[0] / args.divisor, FULL_RESOLUTION[1] / args.divisor],
            gravity: [0.0, -9.81],
        },
        defaults: MaterialDefaults::default(),
        materials: materials(),
        velocity_bcs: VelocityBoundaries {
            left: WallConditions::new(BoundaryCondition::Velocity { value: rate }, BoundaryCondition::Velocity { value: 0.0 }),
            right: WallConditions::new(BoundaryCondition::Velocity { value: -rate }, BoundaryCondition::Velocity { value: 0.0 }),
            top: WallConditions::new(BoundaryCondition::Free, BoundaryCondition::Velocity { value: 0.0 }),
            // Airy-like support of the base
            bottom: WallConditions::new(BoundaryCondition::Free, BoundaryCondition::Traction { value: BASAL_TRACTION_PA }),
        },
        temperature_bcs: TemperatureBoundaries {
            top: Some(SURFACE_TEMP_K),
            bottom: Some(BASE_TEMP_K),
            node_sets: vec![NodeSetCondition {
                selector: NodeSelector::Region { region: layer(30.0, 0.0) },
                temperature: SURFACE_TEMP_K,
            }],
            ..Default::default()
        },
        surface_process: Some(SedimentationConfig {
            open_materials: vec!["Air".to_string()],
            deposit_material: "Sediment".to_string(),
            threshold: 0.0,
            policy: ThresholdPolicy::Inclusive,
        }),
        solver: SolverOptions::default(),
        thermal: ThermalOptions::default(),
        time: TimeStepOptions::default(),
        population: PopulationOptions::default(),
        damage: Some(DamageConfig::default()),
        strain_taper: StrainTaperPolicy::EveryStep,
        run: RunControl {
            end_time: myr_to_seconds(args.end_time_myr),
            checkpoint_interval: Some(years_to_seconds(100_000.0)),
            output_dir: args.output_dir.clone(),
            restart_step,
            restart_dir: None,
            max_steps: args.max_steps,
            wall_time_limit_s: None,
        },
        seed: 0,
    })
}

fn run_narrow_rift() -> RiftResult<()> {
    let args = parse_args()?;
    let config = narrow_rift_config(&args)?;
    println!(
        "Narrow rift at {} x {} elements, {} materials, output to {}",
        config.domain.resolution[0],
        config.domain.resolution[1],
        config.materials.len(),
        args.output_dir.display()
    );

    let mut sim = Simulation::new(SimProps {
        ops: vec![
            ProgressReporterOp::handle(10),
            CsvWriterOp::handle(args.output_dir.join("stats.csv")),
        ],
        comm: Box::new(SerialCommunicator),
        config,
    })?;

    match sim.run()? {
        RunOutcome::Completed { steps, time } => {
            println!("completed {steps} steps, {:.3} Myr", seconds_to_myr(time));
        }
        RunOutcome::Interrupted { step, reason, .. } => {
            println!("stopped at step {step}: {reason}; rerun to resume from the checkpoint");
        }
    }
    Ok(())
}

fn main() {
    // progress lines are logged at info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run_narrow_rift() {
        eprintln!("narrow rift failed: {e}");
        std::process::exit(1);
    }
}
