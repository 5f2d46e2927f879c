// Checkpoint/restart: resuming from step K and taking one step must land on
// the state an uninterrupted run holds at step K+1

use litho_rift_rust::comm::SerialCommunicator;
use litho_rift_rust::config::{
    DomainConfig, MaterialConfig, MaterialDefaults, ModelConfig, PopulationOptions, RunControl, SolverOptions,
    StrainTaperPolicy, ThermalOptions, TimeStepOptions, ViscositySpec,
};
use litho_rift_rust::material::DensityLaw;
use litho_rift_rust::mesh::{BoundaryCondition, TemperatureBoundaries, VelocityBoundaries, WallConditions};
use litho_rift_rust::shapes::Region;
use litho_rift_rust::sim::{latest_checkpoint_step, RunOutcome, SimProps, Simulation};
use litho_rift_rust::temp_utils::cm_per_year_to_m_per_s;
use approx::assert_relative_eq;
use more_asserts::assert_le;
use std::fs;
use std::path::PathBuf;

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("litho_rift_restart_{name}_{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn vel(value: f64) -> BoundaryCondition {
    BoundaryCondition::Velocity { value }
}

fn layered_extension(output_dir: PathBuf, max_steps: u64) -> ModelConfig {
    let rate = cm_per_year_to_m_per_s(0.5);
    ModelConfig {
        name: "restart".to_string(),
        domain: DomainConfig {
            min: [0.0, -20.0e3],
            max: [40.0e3, 0.0],
            resolution: [8, 4],
            gravity: [0.0, -9.81],
        },
        defaults: MaterialDefaults::default(),
        materials: vec![
            MaterialConfig::new("Mantle", DensityLaw::linear(3300.0, 2.8e-5), vec![ViscositySpec::constant(1.0e22)])
                .with_shape(Region::Layer { top: -10.0e3, bottom: -20.0e3 }),
            MaterialConfig::new("Crust", DensityLaw::linear(2700.0, 2.8e-5), vec![ViscositySpec::constant(1.0e21)])
                .with_shape(Region::Layer { top: 0.0, bottom: -10.0e3 })
                .with_radiogenic_heat(1.0e-6),
        ],
        velocity_bcs: VelocityBoundaries {
            left: WallConditions::new(vel(-rate), BoundaryCondition::Free),
            right: WallConditions::new(vel(rate), BoundaryCondition::Free),
            bottom: WallConditions::new(BoundaryCondition::Free, vel(0.0)),
            top: WallConditions::default(),
        },
        temperature_bcs: TemperatureBoundaries {
            top: Some(293.15),
            bottom: Some(700.0),
            ..Default::default()
        },
        surface_process: None,
        solver: SolverOptions::default(),
        thermal: ThermalOptions::default(),
        time: TimeStepOptions::default(),
        population: PopulationOptions::default(),
        damage: None,
        strain_taper: StrainTaperPolicy::Never,
        run: RunControl {
            end_time: 1.0e15,
            checkpoint_interval: None,
            output_dir,
            restart_step: None,
            restart_dir: None,
            max_steps: Some(max_steps),
            wall_time_limit_s: None,
        },
        seed: 11,
    }
}

fn run(config: ModelConfig) -> Simulation {
    let mut sim = Simulation::new(SimProps {
        config,
        ops: vec![],
        comm: Box::new(SerialCommunicator),
    })
    .unwrap();
    let outcome = sim.run().unwrap();
    assert!(matches!(outcome, RunOutcome::Interrupted { .. }), "step limit must interrupt the run");
    sim
}

fn max_abs_diff(a: impl Iterator<Item = f64>, b: impl Iterator<Item = f64>) -> f64 {
    a.zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

#[test]
fn test_restart_reproduces_uninterrupted_run() {
    println!("💾 Testing restart from the latest checkpoint");

    let first_dir = scratch("first");
    let resumed_dir = scratch("resumed");
    let straight_dir = scratch("straight");

    let first = run(layered_extension(first_dir.clone(), 1));
    assert_eq!(first.step, 1);
    assert_eq!(latest_checkpoint_step(&first_dir).unwrap(), Some(1));

    let mut resume = layered_extension(resumed_dir.clone(), 2);
    resume.run.restart_step = Some(-1);
    resume.run.restart_dir = Some(first_dir.clone());
    let resumed = run(resume);

    let straight = run(layered_extension(straight_dir.clone(), 2));

    println!("   resumed:  step {} t = {:.6e} s", resumed.step, resumed.time);
    println!("   straight: step {} t = {:.6e} s", straight.step, straight.time);
    assert_eq!(resumed.step, 2);
    assert_eq!(straight.step, 2);
    assert_relative_eq!(resumed.time, straight.time, max_relative = 1e-4);

    let speed = straight.fields.max_speed();
    let dv = max_abs_diff(
        resumed.fields.velocity.iter().flat_map(|v| [v.x, v.y]),
        straight.fields.velocity.iter().flat_map(|v| [v.x, v.y]),
    );
    println!("   velocity deviation {:.3e} of {:.3e} m/s", dv, speed);
    assert_le!(dv, 1.0e-4 * speed);

    let dt = max_abs_diff(
        resumed.fields.temperature.iter().copied(),
        straight.fields.temperature.iter().copied(),
    );
    println!("   temperature deviation {:.3e} K", dt);
    assert_le!(dt, 1.0e-3);

    let p_scale = straight.fields.pressure.iter().map(|p| p.abs()).fold(0.0, f64::max);
    let dp = max_abs_diff(resumed.fields.pressure.iter().copied(), straight.fields.pressure.iter().copied());
    assert_le!(dp, 1.0e-4 * p_scale);

    assert_eq!(resumed.swarm.len(), straight.swarm.len());
    let h = straight.grid.min_cell_size();
    let dx = max_abs_diff(
        resumed.swarm.iter().flat_map(|(_, p)| [p.position.x, p.position.y]),
        straight.swarm.iter().flat_map(|(_, p)| [p.position.x, p.position.y]),
    );
    println!("   particle position deviation {:.3e} m", dx);
    assert_le!(dx, 1.0e-4 * h);
    for ((_, a), (_, b)) in resumed.swarm.iter().zip(straight.swarm.iter()) {
        assert_eq!(a.material, b.material);
    }

    for dir in [first_dir, resumed_dir, straight_dir] {
        let _ = fs::remove_dir_all(dir);
    }
    println!("   ✅ Restart matches the uninterrupted run");
}
