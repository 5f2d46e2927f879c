// Particle scenarios: weight bookkeeping through advection and population
// control, and the surface threshold tie-break

use litho_rift_rust::comm::SerialCommunicator;
use litho_rift_rust::config::{
    MaterialConfig, MaterialDefaults, PopulationOptions, SedimentationConfig, ThresholdPolicy, ViscositySpec,
};
use litho_rift_rust::material::{DensityLaw, MaterialRegistry};
use litho_rift_rust::mesh::{Grid, MeshFields};
use litho_rift_rust::shapes::Region;
use litho_rift_rust::surface::{SedimentationThreshold, SurfaceProcess};
use litho_rift_rust::swarm::{control_population, CellBuckets, Particle, ParticleSwarm};
use approx::assert_relative_eq;
use glam::DVec2;
use more_asserts::{assert_ge, assert_le};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::f64::consts::PI;

fn two_layer_registry() -> MaterialRegistry {
    let materials = vec![
        MaterialConfig::new("Lower", DensityLaw::Constant { density: 3300.0 }, vec![ViscositySpec::constant(1.0e21)])
            .with_shape(Region::Layer { top: 0.5, bottom: 0.0 }),
        MaterialConfig::new("Upper", DensityLaw::Constant { density: 2700.0 }, vec![ViscositySpec::constant(1.0e21)])
            .with_shape(Region::Layer { top: 1.0, bottom: 0.5 }),
    ];
    MaterialRegistry::from_config(&materials, &MaterialDefaults::default()).unwrap()
}

/// Closed convection cell: no flow through any wall.
fn convection_cell(grid: &Grid) -> MeshFields {
    let mut fields = MeshFields::new(grid);
    for n in 0..grid.node_count() {
        let p = grid.node_position(n);
        fields.velocity[n] = DVec2::new(
            (PI * p.x).sin() * (PI * p.y).cos(),
            -(PI * p.x).cos() * (PI * p.y).sin(),
        );
    }
    fields
}

#[test]
fn test_advection_and_population_conserve_weight_per_material() {
    println!("🌀 Testing weight conservation through a convection cell");

    let grid = Grid::new(DVec2::ZERO, DVec2::ONE, 8, 8).unwrap();
    let registry = two_layer_registry();
    let lower = registry.require("Lower").unwrap();
    let upper = registry.require("Upper").unwrap();
    let mut swarm = ParticleSwarm::populate(&grid, &registry, [4, 4]).unwrap();
    let fields = convection_cell(&grid);

    let lower_weight = swarm.total_weight(Some(lower));
    let upper_weight = swarm.total_weight(Some(upper));
    assert_relative_eq!(lower_weight + upper_weight, 1.0, max_relative = 1e-12);

    // a tenth of a cell per step at the fastest point
    let dt = 0.1 * grid.min_cell_size();
    for _ in 0..40 {
        let report = swarm.advect(&grid, &fields, dt, &SerialCommunicator, None).unwrap();
        assert_eq!(report.removed, 0, "no particle may leave a closed cell");
    }
    println!("   After advection: {} particles", swarm.len());
    assert_relative_eq!(swarm.total_weight(Some(lower)), lower_weight, max_relative = 1e-12);
    assert_relative_eq!(swarm.total_weight(Some(upper)), upper_weight, max_relative = 1e-12);

    let options = PopulationOptions::default();
    let mut rng = StdRng::seed_from_u64(3);
    let report = control_population(&mut swarm, &grid, 0..grid.nx, &options, &mut rng);
    println!("   Population control: {} splits, {} merges", report.splits, report.merges);
    assert_le!(report.splits, options.max_splits);
    assert_relative_eq!(swarm.total_weight(Some(lower)), lower_weight, max_relative = 1e-12);
    assert_relative_eq!(swarm.total_weight(Some(upper)), upper_weight, max_relative = 1e-12);

    let buckets = CellBuckets::build(&grid, &swarm);
    for e in 0..grid.element_count() {
        assert_ge!(buckets.count(e), 1, "element {} was left empty", e);
    }
    println!("   ✅ Weight per material is conserved");
}

fn sedimentation_registry() -> MaterialRegistry {
    let rock = |name: &str, density: f64| {
        MaterialConfig::new(name, DensityLaw::Constant { density }, vec![ViscositySpec::constant(1.0e21)])
    };
    let materials = vec![
        rock("Air", 1.0).with_shape(Region::Layer { top: 10.0, bottom: 0.0 }),
        rock("Sediment", 2300.0),
        rock("Crust", 2700.0).with_shape(Region::Layer { top: 0.0, bottom: -10.0 }),
    ];
    MaterialRegistry::from_config(&materials, &MaterialDefaults::default()).unwrap()
}

fn sedimentation(policy: ThresholdPolicy, registry: &MaterialRegistry) -> SedimentationThreshold {
    let config = SedimentationConfig {
        open_materials: vec!["Air".to_string()],
        deposit_material: "Sediment".to_string(),
        threshold: 0.0,
        policy,
    };
    SedimentationThreshold::from_config(&config, registry).unwrap()
}

#[test]
fn test_particle_on_threshold_follows_policy() {
    println!("🏖️ Testing the sedimentation threshold tie-break");

    let registry = sedimentation_registry();
    let air = registry.require("Air").unwrap();
    let sediment = registry.require("Sediment").unwrap();
    let crust = registry.require("Crust").unwrap();

    let particles = || {
        ParticleSwarm::from_particles(vec![
            Particle::new(DVec2::new(1.0, 0.0), air, 1.0),
            Particle::new(DVec2::new(2.0, -0.5), air, 1.0),
            Particle::new(DVec2::new(3.0, 0.5), air, 1.0),
            Particle::new(DVec2::new(4.0, -0.5), crust, 1.0),
        ])
    };

    let inclusive = sedimentation(ThresholdPolicy::Inclusive, &registry);
    let mut swarm = particles();
    assert_eq!(inclusive.apply(&mut swarm), 2);
    let materials: Vec<_> = swarm.iter().map(|(_, p)| p.material).collect();
    assert_eq!(materials, vec![sediment, sediment, air, crust]);
    println!("   Inclusive: particle at the threshold is deposited");

    // deposit is never reopened
    assert_eq!(inclusive.apply(&mut swarm), 0);
    assert_eq!(swarm.get(0).unwrap().material, sediment);

    let exclusive = sedimentation(ThresholdPolicy::Exclusive, &registry);
    let mut swarm = particles();
    assert_eq!(exclusive.apply(&mut swarm), 1);
    let materials: Vec<_> = swarm.iter().map(|(_, p)| p.material).collect();
    assert_eq!(materials, vec![air, sediment, air, crust]);
    println!("   Exclusive: particle at the threshold stays open");

    // a description that omits the policy gets the inclusive rule
    let parsed: SedimentationConfig = serde_json::from_str(
        r#"{"open_materials": ["Air"], "deposit_material": "Sediment", "threshold": 0.0}"#,
    )
    .unwrap();
    assert_eq!(parsed.policy, ThresholdPolicy::Inclusive);

    println!("   ✅ Threshold policy is explicit and one-way");
}
