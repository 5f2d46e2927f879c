use crate::sim::Simulation;
use crate::sim_op::{SimOp, SimOpHandle};
use crate::temp_utils::{m_per_s_to_cm_per_year, seconds_to_myr};

/// Progress Reporter Operator
///
/// Logs a one-line summary of the model state at info level every
/// `report_interval` steps on the root rank.
#[derive(Debug, Clone)]
pub struct ProgressReporterOp {
    pub name: String,
    pub report_interval: u64,
    pub show_strain: bool,
}

/// Local swarm strain statistics: (mean plastic strain, max plastic strain).
fn strain_summary(sim: &Simulation) -> (f64, f64) {
    let (sum, max, count) = sim
        .swarm
        .iter()
        .fold((0.0, 0.0f64, 0usize), |(s, m, c), (_, p)| (s + p.plastic_strain, m.max(p.plastic_strain), c + 1));
    if count == 0 { (0.0, 0.0) } else { (sum / count as f64, max) }
}

impl ProgressReporterOp {
    pub fn new(report_interval: u64) -> Self {
        Self {
            name: "ProgressReporterOp".to_string(),
            report_interval: report_interval.max(1),
            show_strain: true,
        }
    }

    pub fn handle(report_interval: u64) -> SimOpHandle {
        SimOpHandle::new(Box::new(Self::new(report_interval)))
    }

    pub fn should_report(&self, step: u64) -> bool {
        step % self.report_interval == 0
    }

    fn line(&self, sim: &Simulation) -> String {
        let speed = m_per_s_to_cm_per_year(sim.fields.max_speed());
        let (t_min, t_max) = sim
            .fields
            .temperature
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
        let mut line = format!(
            "step {:>5}: t = {:.4} Myr, max |v| = {:.3} cm/yr, T = {:.0}..{:.0} K, {} particles",
            sim.step,
            seconds_to_myr(sim.time),
            speed,
            t_min,
            t_max,
            sim.swarm.len()
        );
        if self.show_strain {
            let (mean, max) = strain_summary(sim);
            line.push_str(&format!(", plastic strain mean {mean:.3} max {max:.3}"));
        }
        line
    }
}

impl SimOp for ProgressReporterOp {
    fn name(&self) -> &str {
        &self.name
    }

    fn init_sim(&mut self, sim: &mut Simulation) {
        if sim.comm().is_root() {
            log::info!("starting {} at {}", sim.config.name, self.line(sim));
        }
    }

    fn update_sim(&mut self, sim: &mut Simulation) {
        if sim.comm().is_root() && self.should_report(sim.step) {
            log::info!("{}", self.line(sim));
        }
    }

    fn after_sim(&mut self, sim: &mut Simulation) {
        if sim.comm().is_root() {
            log::info!("finished {} at {}", sim.config.name, self.line(sim));
        }
    }
}
