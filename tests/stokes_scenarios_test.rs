// Mechanical scenarios: a column at rest under gravity, and pure shear of a
// strong plate with a weak zone

use litho_rift_rust::comm::SerialCommunicator;
use litho_rift_rust::config::{
    DomainConfig, MaterialConfig, MaterialDefaults, ModelConfig, PopulationOptions, RunControl, SolverOptions,
    StrainTaperPolicy, ThermalOptions, TimeStepOptions, ViscositySpec,
};
use litho_rift_rust::material::{DensityLaw, MaterialRegistry};
use litho_rift_rust::mesh::{BoundaryCondition, MeshFields, TemperatureBoundaries, VelocityBoundaries, WallConditions};
use litho_rift_rust::shapes::Region;
use litho_rift_rust::sim::{MaterialCoupling, SimProps, Simulation};
use litho_rift_rust::stokes::StokesSolver;
use litho_rift_rust::swarm::ParticleSwarm;
use litho_rift_rust::temp_utils::cm_per_year_to_m_per_s;
use glam::DVec2;
use more_asserts::{assert_gt, assert_lt};
use std::path::PathBuf;

const G: f64 = 9.81;

fn vel(value: f64) -> BoundaryCondition {
    BoundaryCondition::Velocity { value }
}

#[test]
fn test_column_at_rest_is_lithostatic() {
    println!("🪨 Testing a single-material column under gravity");

    let height = 100.0e3;
    let rho = 3300.0;
    let domain = DomainConfig {
        min: [0.0, 0.0],
        max: [20.0e3, height],
        resolution: [2, 20],
        gravity: [0.0, -G],
    };
    let grid = domain.grid().unwrap();
    let materials = vec![
        MaterialConfig::new("Mantle", DensityLaw::Constant { density: rho }, vec![ViscositySpec::constant(1.0e21)])
            .with_shape(Region::Layer { top: height, bottom: 0.0 }),
    ];
    let registry = MaterialRegistry::from_config(&materials, &MaterialDefaults::default()).unwrap();
    let swarm = ParticleSwarm::populate(&grid, &registry, [4, 4]).unwrap();

    // free-slip sides and base, stress-free top
    let walls = VelocityBoundaries {
        left: WallConditions::new(vel(0.0), BoundaryCondition::Free),
        right: WallConditions::new(vel(0.0), BoundaryCondition::Free),
        bottom: WallConditions::new(BoundaryCondition::Free, vel(0.0)),
        top: WallConditions::default(),
    };

    let mut fields = MeshFields::new(&grid);
    fields.temperature.fill(293.15);
    let coupling = MaterialCoupling::new(&MaterialDefaults::default(), &ThermalOptions::default());
    let (props, _) = coupling
        .element_properties(&grid, &fields, &registry, &swarm, &SerialCommunicator)
        .unwrap();

    let mut stokes = StokesSolver::new(&grid, domain.gravity(), &walls, &SolverOptions::default()).unwrap();
    println!("   Backend: {}", stokes.backend_name());
    stokes.solve_linear(&props, &mut fields).unwrap();

    let base = rho * G * height;
    let mut worst = 0.0f64;
    for e in 0..grid.element_count() {
        let depth = height - grid.element_centre(e).y;
        let expected = rho * G * depth;
        worst = worst.max((fields.pressure[e] - expected).abs());
    }
    println!("   Base pressure: {:.3e} Pa, worst deviation: {:.3e} Pa", base, worst);
    assert_lt!(worst, 1.0e-3 * base, "pressure must follow rho g h");

    let velocity_scale = rho * G * height * height / 1.0e21;
    println!("   Residual speed: {:.3e} m/s", fields.max_speed());
    assert_lt!(fields.max_speed(), 1.0e-4 * velocity_scale, "a column at rest must not flow");

    println!("   ✅ Pressure is lithostatic");
}

fn pure_shear_config(output_dir: PathBuf) -> ModelConfig {
    let rate = cm_per_year_to_m_per_s(1.0);
    ModelConfig {
        name: "weak zone".to_string(),
        domain: DomainConfig {
            min: [0.0, 0.0],
            max: [40.0e3, 10.0e3],
            resolution: [16, 4],
            gravity: [0.0, -G],
        },
        defaults: MaterialDefaults::default(),
        materials: vec![
            MaterialConfig::new("Strong", DensityLaw::Constant { density: 2700.0 }, vec![ViscositySpec::constant(1.0e23)])
                .with_shape(Region::Layer { top: 10.0e3, bottom: 0.0 }),
            MaterialConfig::new("Weak", DensityLaw::Constant { density: 2700.0 }, vec![ViscositySpec::constant(1.0e21)])
                .with_shape(Region::Box { min: [15.0e3, 0.0], max: [25.0e3, 10.0e3] }),
        ],
        velocity_bcs: VelocityBoundaries {
            left: WallConditions::new(vel(-rate), BoundaryCondition::Free),
            right: WallConditions::new(vel(rate), BoundaryCondition::Free),
            bottom: WallConditions::new(BoundaryCondition::Free, vel(0.0)),
            top: WallConditions::default(),
        },
        temperature_bcs: TemperatureBoundaries {
            top: Some(293.15),
            bottom: Some(600.0),
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
            max_steps: None,
            wall_time_limit_s: None,
        },
        seed: 7,
    }
}

fn mean_total_strain(swarm: &ParticleSwarm, material: litho_rift_rust::material::MaterialId) -> f64 {
    let (weighted, weight) = swarm
        .iter()
        .filter(|(_, p)| p.material == material)
        .fold((0.0, 0.0), |(s, w), (_, p)| (s + p.total_strain * p.weight, w + p.weight));
    weighted / weight
}

#[test]
fn test_pure_shear_localizes_in_weak_zone() {
    println!("↔️ Testing strain localization under imposed extension");

    let output_dir = std::env::temp_dir().join(format!("litho_rift_localize_{}", std::process::id()));
    let mut sim = Simulation::new(SimProps {
        config: pure_shear_config(output_dir),
        ops: vec![],
        comm: Box::new(SerialCommunicator),
    })
    .unwrap();

    for _ in 0..3 {
        let report = sim.advance().unwrap();
        assert!(report.stokes.converged, "linear rheology must converge");
        println!(
            "   step {}: dt = {:.3e} s ({}), picard {}",
            report.step, report.dt, report.limiter, report.stokes.iterations
        );
    }

    let weak = sim.registry.require("Weak").unwrap();
    let strong = sim.registry.require("Strong").unwrap();
    let weak_strain = mean_total_strain(&sim.swarm, weak);
    let strong_strain = mean_total_strain(&sim.swarm, strong);
    println!("   Mean strain weak: {:.4e}, strong: {:.4e}", weak_strain, strong_strain);

    assert_gt!(weak_strain, 0.0);
    assert_gt!(weak_strain, 5.0 * strong_strain, "extension must concentrate in the weak zone");

    // the plate is pulled apart around the weak zone
    let centre = DVec2::new(20.0e3, 5.0e3);
    let left = sim.fields.velocity_at(&sim.grid, centre - DVec2::new(10.0e3, 0.0));
    let right = sim.fields.velocity_at(&sim.grid, centre + DVec2::new(10.0e3, 0.0));
    assert_lt!(left.x, 0.0);
    assert_gt!(right.x, 0.0);

    println!("   ✅ Weak zone takes up the extension");
}
