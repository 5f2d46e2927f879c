use crate::comm::{Communicator, DomainPartition};
use crate::config::{ModelConfig, RestartTarget, StrainTaperPolicy};
use crate::error::{RiftError, RiftResult};
use crate::material::MaterialRegistry;
use crate::mesh::{ElementProperties, Grid, MeshFields};
use crate::sim::checkpoint::{latest_checkpoint_step, read_checkpoint, write_checkpoint, Checkpoint};
use crate::sim::coupling::MaterialCoupling;
use crate::sim::timestep::{select_timestep, StepLimiter, StepWindow};
use crate::sim_op::{SimOp, SimOpHandle};
use crate::stokes::{StokesReport, StokesSolver};
use crate::surface::{SedimentationThreshold, SurfaceProcess};
use crate::swarm::{apply_strain_taper, control_population, seed_damage, AdvectionReport, ParticleSwarm, PopulationReport};
use crate::temp_utils::seconds_to_myr;
use crate::thermal::{ThermalReport, ThermalSolver};
use colored::Colorize;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Relative slack when comparing simulated time against end and checkpoint times.
const TIME_EPSILON: f64 = 1.0e-9;

#[derive(Debug, Clone)]
pub struct OpTiming {
    pub op_name: String,
    pub init_time: Duration,
    pub total_update_time: Duration,
    pub update_call_count: u32,
    pub after_time: Duration,
}

impl OpTiming {
    pub fn new(op_name: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            init_time: Duration::ZERO,
            total_update_time: Duration::ZERO,
            update_call_count: 0,
            after_time: Duration::ZERO,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.total_update_time += elapsed;
        self.update_call_count += 1;
    }

    pub fn avg_update_time(&self) -> Duration {
        if self.update_call_count > 0 {
            self.total_update_time / self.update_call_count
        } else {
            Duration::ZERO
        }
    }

    pub fn total_time(&self) -> Duration {
        self.init_time + self.total_update_time + self.after_time
    }
}

/// What one completed step did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepReport {
    /// Index of the step just completed, starting at 1.
    pub step: u64,
    /// Simulated time at the end of the step, s.
    pub time: f64,
    pub dt: f64,
    pub limiter: StepLimiter,
    pub stokes: StokesReport,
    pub thermal: ThermalReport,
    pub advection: AdvectionReport,
    pub population: PopulationReport,
    pub deposited: usize,
    /// Local particles on the plastic branch.
    pub yielding: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed { steps: u64, time: f64 },
    /// Stopped cooperatively at a step boundary after writing a checkpoint.
    Interrupted { step: u64, time: f64, reason: String },
}

pub struct SimProps {
    pub config: ModelConfig,
    pub ops: Vec<SimOpHandle>,
    pub comm: Box<dyn Communicator>,
}

/// Drives one model from a fresh or restarted state to its end time.
pub struct Simulation {
    pub config: ModelConfig,
    pub registry: MaterialRegistry,
    pub grid: Grid,
    pub fields: MeshFields,
    pub swarm: ParticleSwarm,
    pub properties: ElementProperties,
    /// Completed steps.
    pub step: u64,
    /// s
    pub time: f64,
    pub dt: f64,
    pub next_checkpoint: Option<f64>,
    pub last_report: Option<StepReport>,
    pub op_timings: Vec<OpTiming>,
    pub phase_timings: Vec<OpTiming>,
    coupling: MaterialCoupling,
    stokes: StokesSolver,
    thermal: ThermalSolver,
    surface: Option<Box<dyn SurfaceProcess>>,
    partition: Option<DomainPartition>,
    comm: Box<dyn Communicator>,
    ops: Vec<Box<dyn SimOp>>,
}

const PHASES: [&str; 6] = ["stokes", "thermal", "advection", "surface", "population", "checkpoint"];

impl Simulation {
    /// Validates the model and builds the initial state, either fresh or from
    /// the checkpoint the run control names.
    pub fn new(props: SimProps) -> RiftResult<Simulation> {
        let SimProps { config, ops, comm } = props;
        let registry = config.validate()?;
        let grid = config.grid()?;
        let partition = if comm.size() > 1 {
            Some(DomainPartition::new(&grid, comm.size())?)
        } else {
            None
        };

        let coupling = MaterialCoupling::new(&config.defaults, &config.thermal);
        let stokes = StokesSolver::new(&grid, config.gravity(), &config.velocity_bcs, &config.solver)?;
        let thermal = ThermalSolver::new(&grid, &config.temperature_bcs, &registry, &config.thermal, &config.solver)?;
        let surface = match &config.surface_process {
            Some(cfg) => Some(Box::new(SedimentationThreshold::from_config(cfg, &registry)?) as Box<dyn SurfaceProcess>),
            None => None,
        };

        let ops: Vec<Box<dyn SimOp>> = ops.into_iter().map(|handle| handle.op).collect();
        let op_timings = ops.iter().map(|op| OpTiming::new(op.name())).collect();
        let properties = ElementProperties::uniform(&grid, config.defaults.max_viscosity, 1.0, config.defaults.diffusivity);

        let mut sim = Simulation {
            fields: MeshFields::new(&grid),
            swarm: ParticleSwarm::new(),
            properties,
            step: 0,
            time: 0.0,
            dt: 0.0,
            next_checkpoint: config.run.checkpoint_interval,
            last_report: None,
            op_timings,
            phase_timings: PHASES.iter().map(|name| OpTiming::new(name)).collect(),
            coupling,
            stokes,
            thermal,
            surface,
            partition,
            comm,
            ops,
            config,
            registry,
            grid,
        };

        match sim.config.run.restart_target()? {
            RestartTarget::Fresh => sim.fresh_state()?,
            RestartTarget::Latest => {
                let dir = sim.config.run.restart_dir().to_path_buf();
                let step = latest_checkpoint_step(&dir)?.ok_or_else(|| {
                    RiftError::config(format!("no checkpoint to resume from in {}", dir.display()))
                })?;
                sim.restore(step)?;
            }
            RestartTarget::Step(step) => sim.restore(step)?,
        }
        Ok(sim)
    }

    pub fn comm(&self) -> &dyn Communicator {
        &*self.comm
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.run.output_dir.clone()
    }

    /// Populates the layout, seeds damage and builds the initial geotherm.
    fn fresh_state(&mut self) -> RiftResult<()> {
        let mut swarm = ParticleSwarm::populate(&self.grid, &self.registry, self.config.population.layout)?;
        if let Some(part) = &self.partition {
            let rank = self.comm.rank();
            let foreign: Vec<usize> = swarm
                .iter()
                .filter(|(_, p)| !part.owns(rank, p.position.x))
                .map(|(i, _)| i)
                .collect();
            for index in foreign {
                swarm.remove(index);
            }
            swarm.compact();
        }

        if let Some(damage) = &self.config.damage {
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(self.comm.rank() as u64));
            seed_damage(&mut swarm, damage, &mut rng);
        }
        if self.config.strain_taper == StrainTaperPolicy::OnceAtInit {
            apply_strain_taper(&mut swarm, &self.grid);
        }
        self.swarm = swarm;

        // material properties need a temperature; start from the wall profile
        self.thermal.linear_profile(&mut self.fields);
        let (props, _) =
            self.coupling
                .element_properties(&self.grid, &self.fields, &self.registry, &self.swarm, &*self.comm)?;
        let report = self.thermal.initialize(&mut self.fields, &props, &self.swarm, &*self.comm)?;
        self.swarm.interpolate_temperature(&self.grid, &self.fields, &self.registry);
        self.properties = props;

        log::info!(
            "{}: {} particles on rank {}, initial temperature {:.1}..{:.1} K",
            self.config.name,
            self.swarm.len(),
            self.comm.rank(),
            report.min_temperature,
            report.max_temperature
        );
        Ok(())
    }

    fn restore(&mut self, step: u64) -> RiftResult<()> {
        let dir = self.config.run.restart_dir().to_path_buf();
        let checkpoint = read_checkpoint(&dir, step, self.comm.rank(), self.comm.size())?;
        if !checkpoint.fields.matches(&self.grid) {
            return Err(RiftError::persistence(step, "checkpoint fields do not match the model mesh"));
        }
        self.swarm = ParticleSwarm::from_particles(checkpoint.particles);
        self.fields = checkpoint.fields;
        self.step = checkpoint.step;
        self.time = checkpoint.time;
        self.dt = checkpoint.dt;
        self.next_checkpoint = checkpoint.next_checkpoint;
        let (props, _) =
            self.coupling
                .element_properties(&self.grid, &self.fields, &self.registry, &self.swarm, &*self.comm)?;
        self.properties = props;
        log::info!(
            "resumed {} at step {} (t = {:.4} Myr) from {}",
            self.config.name,
            self.step,
            seconds_to_myr(self.time),
            dir.display()
        );
        Ok(())
    }

    fn timed<T>(&mut self, phase: usize, f: impl FnOnce(&mut Self) -> T) -> T {
        let start = Instant::now();
        let out = f(self);
        self.phase_timings[phase].record(start.elapsed());
        out
    }

    /// Advances the model by one step. Every rank calls this in lock-step.
    pub fn advance(&mut self) -> RiftResult<StepReport> {
        let first_step = self.step == 0;

        let stokes = self.timed(0, |sim| {
            let Simulation {
                grid,
                registry,
                swarm,
                coupling,
                comm,
                stokes,
                fields,
                ..
            } = sim;
            let comm: &dyn Communicator = comm.as_ref();
            let (grid, registry, swarm, coupling) = (&*grid, &*registry, &*swarm, &*coupling);
            stokes.solve_nonlinear(fields, first_step, comm, |f| {
                Ok(coupling.element_properties(grid, f, registry, swarm, comm)?.0)
            })
        })?;

        // response at the converged state drives the particle history and heat sources
        let (props, evaluations) =
            self.coupling
                .element_properties(&self.grid, &self.fields, &self.registry, &self.swarm, &*self.comm)?;
        if self.config.strain_taper == StrainTaperPolicy::EveryStep {
            apply_strain_taper(&mut self.swarm, &self.grid);
        }

        let window = StepWindow {
            time: self.time,
            end_time: self.config.run.end_time,
            next_checkpoint: self.next_checkpoint,
        };
        let step = select_timestep(&self.grid, &self.fields, &props, &self.config.time, window, &*self.comm)?;
        let dt = step.dt;

        let mut yielding = 0;
        for ev in &evaluations {
            let Some(p) = self.swarm.get_mut(ev.slot) else { continue };
            let increment = ev.strain_rate_ii * dt;
            if ev.response.is_yielding {
                p.plastic_strain += increment;
                yielding += 1;
            }
            p.total_strain += increment;
            p.melt_fraction = ev.response.melt_fraction;
        }

        let thermal = self.timed(1, |sim| {
            sim.thermal.step(&mut sim.fields, &props, dt, &sim.swarm, &*sim.comm)
        })?;

        let advection = self.timed(2, |sim| {
            let report = sim.swarm.advect(&sim.grid, &sim.fields, dt, &*sim.comm, sim.partition.as_ref())?;
            sim.swarm.interpolate_temperature(&sim.grid, &sim.fields, &sim.registry);
            Ok::<_, RiftError>(report)
        })?;

        let deposited = self.timed(3, |sim| match &sim.surface {
            Some(process) => process.apply(&mut sim.swarm),
            None => 0,
        });

        let population = self.timed(4, |sim| {
            let seed = sim.config.seed ^ sim.step ^ ((sim.comm.rank() as u64) << 48);
            let mut rng = StdRng::seed_from_u64(seed);
            let columns = sim
                .partition
                .as_ref()
                .map_or(0..sim.grid.nx, |part| part.owned_columns(sim.comm.rank()));
            let report = control_population(&mut sim.swarm, &sim.grid, columns, &sim.config.population, &mut rng);
            sim.swarm.compact();
            report
        });

        self.time += dt;
        self.step += 1;
        self.dt = dt;
        self.properties = props;

        let report = StepReport {
            step: self.step,
            time: self.time,
            dt,
            limiter: step.limiter,
            stokes,
            thermal,
            advection,
            population,
            deposited,
            yielding,
        };
        log::info!(
            "step {} t = {:.4} Myr dt = {:.3e} s ({}), picard {} ({:.2e}), T {:.0}..{:.0} K, {} particles",
            report.step,
            seconds_to_myr(report.time),
            dt,
            step.limiter,
            stokes.iterations,
            stokes.residual,
            thermal.min_temperature,
            thermal.max_temperature,
            self.swarm.len()
        );
        self.last_report = Some(report);
        Ok(report)
    }

    fn is_finished(&self) -> bool {
        let end = self.config.run.end_time;
        self.time >= end - TIME_EPSILON * end.abs().max(1.0)
    }

    fn checkpoint_due(&self) -> bool {
        self.next_checkpoint
            .is_some_and(|t| self.time >= t - TIME_EPSILON * t.abs().max(1.0))
    }

    /// Writes this rank's checkpoint between two barriers.
    pub fn write_checkpoint(&mut self) -> RiftResult<PathBuf> {
        let start = Instant::now();
        let checkpoint = Checkpoint {
            step: self.step,
            time: self.time,
            dt: self.dt,
            next_checkpoint: self.next_checkpoint,
            ranks: self.comm.size(),
            particles: self.swarm.to_vec(),
            fields: self.fields.clone(),
        };
        self.comm.barrier();
        let written = write_checkpoint(&self.config.run.output_dir, &checkpoint, self.comm.rank());
        self.comm.barrier();
        let path = written?;
        log::info!("checkpoint {} written to {}", self.step, path.display());
        self.phase_timings[5].record(start.elapsed());
        Ok(path)
    }

    fn interruption(&self, started: Instant) -> Option<String> {
        let run = &self.config.run;
        if let Some(max) = run.max_steps {
            if self.step >= max {
                return Some(format!("step limit {max} reached"));
            }
        }
        if let Some(limit) = run.wall_time_limit_s {
            // every rank must agree to stop at the same step
            let elapsed = self.comm.all_reduce_max(started.elapsed().as_secs_f64());
            if elapsed >= limit {
                return Some(format!("wall time limit of {limit:.0} s reached"));
            }
        }
        None
    }

    /// Runs to the end time, stopping early at a step boundary when a step or
    /// wall-time limit is reached.
    pub fn run(&mut self) -> RiftResult<RunOutcome> {
        let started = Instant::now();
        self.simulate_init();

        let outcome = loop {
            if self.is_finished() {
                break RunOutcome::Completed {
                    steps: self.step,
                    time: self.time,
                };
            }
            if let Some(reason) = self.interruption(started) {
                self.write_checkpoint()?;
                log::info!("run interrupted at step {}: {reason}", self.step);
                break RunOutcome::Interrupted {
                    step: self.step,
                    time: self.time,
                    reason,
                };
            }

            let step = self.step + 1;
            self.advance().map_err(|e| e.at_step(step))?;
            self.simulate_step();

            if self.checkpoint_due() {
                self.write_checkpoint()?;
                if let (Some(next), Some(interval)) = (self.next_checkpoint, self.config.run.checkpoint_interval) {
                    let mut next = next;
                    while next <= self.time + TIME_EPSILON * next.abs().max(1.0) {
                        next += interval;
                    }
                    self.next_checkpoint = Some(next);
                }
            }
        };

        self.simulate_end();
        if self.comm.is_root() {
            self.print_timing_report();
        }
        Ok(outcome)
    }

    fn simulate_init(&mut self) {
        let mut ops = std::mem::take(&mut self.ops);
        for (i, op) in ops.iter_mut().enumerate() {
            let start = Instant::now();
            op.init_sim(self);
            self.op_timings[i].init_time = start.elapsed();
        }
        self.ops = ops;
    }

    fn simulate_end(&mut self) {
        let mut ops = std::mem::take(&mut self.ops);
        for (i, op) in ops.iter_mut().enumerate() {
            let start = Instant::now();
            op.after_sim(self);
            self.op_timings[i].after_time = start.elapsed();
        }
        self.ops = ops;
    }

    fn simulate_step(&mut self) {
        let mut ops = std::mem::take(&mut self.ops);
        for (i, op) in ops.iter_mut().enumerate() {
            let start = Instant::now();
            op.update_sim(self);
            self.op_timings[i].record(start.elapsed());
        }
        self.ops = ops;
    }

    pub fn print_timing_report(&self) {
        println!("\n{}", "=== RUN TIMING REPORT ===".bold());
        println!("model: {}", self.config.name.cyan());
        println!("steps: {}   simulated: {:.4} Myr", self.step, seconds_to_myr(self.time));
        println!();

        let total: Duration = self
            .phase_timings
            .iter()
            .chain(&self.op_timings)
            .map(OpTiming::total_time)
            .sum();
        let share = |d: Duration| {
            if total.as_nanos() > 0 {
                d.as_secs_f64() / total.as_secs_f64() * 100.0
            } else {
                0.0
            }
        };

        println!("{}", "phases:".bold());
        for timing in &self.phase_timings {
            println!(
                "  {:<12} | total {:>10.2} ms | avg/step {:>9.2} ms | share {:>5.1}%",
                timing.op_name.green(),
                timing.total_time().as_secs_f64() * 1000.0,
                timing.avg_update_time().as_secs_f64() * 1000.0,
                share(timing.total_time())
            );
        }
        if !self.op_timings.is_empty() {
            println!("{}", "observers:".bold());
            for timing in &self.op_timings {
                println!(
                    "  {:<12} | total {:>10.2} ms | avg/step {:>9.2} ms | init {:>7.2} ms | after {:>7.2} ms | share {:>5.1}%",
                    timing.op_name.yellow(),
                    timing.total_time().as_secs_f64() * 1000.0,
                    timing.avg_update_time().as_secs_f64() * 1000.0,
                    timing.init_time.as_secs_f64() * 1000.0,
                    timing.after_time.as_secs_f64() * 1000.0,
                    share(timing.total_time())
                );
            }
        }
        println!();
        println!("total: {:.2} s", total.as_secs_f64());
        if self.step > 0 {
            println!("average per step: {:.2} ms", total.as_secs_f64() * 1000.0 / self.step as f64);
        }
        println!("{}", "=== END TIMING REPORT ===".bold());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SerialCommunicator;
    use crate::config::tests::box_config;
    use crate::mesh::{BoundaryCondition, VelocityBoundaries, WallConditions};
    use approx::assert_abs_diff_eq;
    use more_asserts::{assert_gt, assert_le};

    struct CountingOp {
        inits: usize,
        updates: usize,
        afters: usize,
    }

    impl SimOp for CountingOp {
        fn name(&self) -> &str {
            "counting"
        }

        fn init_sim(&mut self, _sim: &mut Simulation) {
            self.inits += 1;
        }

        fn update_sim(&mut self, sim: &mut Simulation) {
            self.updates += 1;
            assert_eq!(sim.last_report.map(|r| r.step), Some(sim.step));
        }

        fn after_sim(&mut self, sim: &mut Simulation) {
            self.afters += 1;
            assert_eq!(self.updates as u64, sim.step);
            assert_eq!(self.inits, 1);
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("litho_rift_sim_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    /// The test box under slow pure-shear extension with a free top.
    fn extending_box() -> ModelConfig {
        let mut config = box_config();
        let v = 1.0e-12;
        config.velocity_bcs = VelocityBoundaries {
            left: WallConditions::new(BoundaryCondition::Velocity { value: -v }, BoundaryCondition::Free),
            right: WallConditions::new(BoundaryCondition::Velocity { value: v }, BoundaryCondition::Free),
            bottom: WallConditions::new(BoundaryCondition::Free, BoundaryCondition::Velocity { value: 0.0 }),
            top: WallConditions::default(),
        };
        config
    }

    fn sim(config: ModelConfig, ops: Vec<SimOpHandle>) -> Simulation {
        Simulation::new(SimProps {
            config,
            ops,
            comm: Box::new(SerialCommunicator),
        })
        .unwrap()
    }

    #[test]
    fn test_fresh_state_starts_at_steady_geotherm() {
        let s = sim(box_config(), vec![]);
        assert_eq!(s.step, 0);
        assert_eq!(s.swarm.len(), 16 * 16);
        let top = s.grid.node_index(2, s.grid.ny);
        let bottom = s.grid.node_index(2, 0);
        assert_abs_diff_eq!(s.fields.temperature[top], 293.15);
        assert_abs_diff_eq!(s.fields.temperature[bottom], 600.0);
    }

    #[test]
    fn test_run_hits_end_time_and_calls_ops() {
        let mut config = extending_box();
        config.run.end_time = 3.0e11;
        config.time.max_dt = Some(1.0e11);
        config.run.output_dir = scratch("end_time");
        let mut s = sim(
            config,
            vec![SimOpHandle::new(Box::new(CountingOp {
                inits: 0,
                updates: 0,
                afters: 0,
            }))],
        );
        let outcome = s.run().unwrap();
        match outcome {
            RunOutcome::Completed { steps, time } => {
                assert_eq!(steps, 3);
                assert_abs_diff_eq!(time, 3.0e11, epsilon = 1.0);
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(s.op_timings[0].update_call_count, 3);
    }

    #[test]
    fn test_step_limit_interrupts_with_checkpoint() {
        let dir = scratch("interrupt");
        let mut config = extending_box();
        config.run.max_steps = Some(1);
        config.run.output_dir = dir.clone();
        let mut s = sim(config, vec![]);
        match s.run().unwrap() {
            RunOutcome::Interrupted { step, .. } => assert_eq!(step, 1),
            other => panic!("expected interruption, got {other:?}"),
        }
        assert_eq!(latest_checkpoint_step(&dir).unwrap(), Some(1));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_checkpoints_land_on_interval() {
        let dir = scratch("interval");
        let mut config = extending_box();
        config.run.end_time = 5.0e11;
        config.run.checkpoint_interval = Some(2.0e11);
        config.time.max_dt = Some(1.5e11);
        config.run.output_dir = dir.clone();
        let mut s = sim(config, vec![]);
        s.run().unwrap();
        // steps end at 1.5, 2.0, 3.5, 4.0, 5.0 (x 1e11 s)
        assert_eq!(s.step, 5);
        assert_eq!(latest_checkpoint_step(&dir).unwrap(), Some(4));
        let second = read_checkpoint(&dir, 4, 0, 1).unwrap();
        assert_abs_diff_eq!(second.time, 4.0e11, epsilon = 1.0);
        assert_eq!(second.next_checkpoint, Some(6.0e11));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_advance_reports_a_valid_step() {
        let mut s = sim(extending_box(), vec![]);
        let report = s.advance().unwrap();
        assert_eq!(report.step, 1);
        assert_gt!(report.dt, 0.0);
        assert_le!(report.dt, s.config.run.end_time);
        assert!(report.stokes.converged);
        assert_abs_diff_eq!(s.time, report.dt);
    }

    #[test]
    fn test_restart_without_checkpoint_is_config_error() {
        let mut config = box_config();
        config.run.restart_step = Some(-1);
        config.run.restart_dir = Some(scratch("no_checkpoint"));
        let err = Simulation::new(SimProps {
            config,
            ops: vec![],
            comm: Box::new(SerialCommunicator),
        });
        assert!(matches!(err, Err(RiftError::Configuration(_))));
    }
}
