use crate::sim::Simulation;
use crate::sim_op::{SimOp, SimOpHandle};
use crate::temp_utils::{m_per_s_to_cm_per_year, seconds_to_myr};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// CSV Writer Operator
///
/// Appends one row of model statistics per step. Only the root rank writes;
/// particle statistics are those of the root rank's partition.
pub struct CsvWriterOp {
    pub file_path: PathBuf,
    header_written: bool,
}

pub const CSV_HEADER: &str =
    "step,time_myr,dt_s,max_speed_cm_yr,min_temp_k,max_temp_k,mean_temp_k,particles,yielding,max_plastic_strain,picard_iterations,picard_residual,deposited";

/// Statistics for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct StepStats {
    pub step: u64,
    pub time_myr: f64,
    pub dt: f64,
    pub max_speed_cm_yr: f64,
    pub min_temp: f64,
    pub max_temp: f64,
    pub mean_temp: f64,
    pub particles: usize,
    pub yielding: usize,
    pub max_plastic_strain: f64,
    pub picard_iterations: usize,
    pub picard_residual: f64,
    pub deposited: usize,
}

impl StepStats {
    pub fn gather(sim: &Simulation) -> Self {
        let temps = &sim.fields.temperature;
        let (min_temp, max_temp) = temps
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| (lo.min(t), hi.max(t)));
        let mean_temp = if temps.is_empty() { 0.0 } else { temps.iter().sum::<f64>() / temps.len() as f64 };
        let max_plastic_strain = sim.swarm.iter().map(|(_, p)| p.plastic_strain).fold(0.0, f64::max);
        let report = sim.last_report;
        StepStats {
            step: sim.step,
            time_myr: seconds_to_myr(sim.time),
            dt: sim.dt,
            max_speed_cm_yr: m_per_s_to_cm_per_year(sim.fields.max_speed()),
            min_temp,
            max_temp,
            mean_temp,
            particles: sim.swarm.len(),
            yielding: report.map_or(0, |r| r.yielding),
            max_plastic_strain,
            picard_iterations: report.map_or(0, |r| r.stokes.iterations),
            picard_residual: report.map_or(0.0, |r| r.stokes.residual),
            deposited: report.map_or(0, |r| r.deposited),
        }
    }

    pub fn to_row(&self) -> String {
        format!(
            "{},{:.6},{:.6e},{:.6},{:.3},{:.3},{:.3},{},{},{:.6},{},{:.3e},{}",
            self.step,
            self.time_myr,
            self.dt,
            self.max_speed_cm_yr,
            self.min_temp,
            self.max_temp,
            self.mean_temp,
            self.particles,
            self.yielding,
            self.max_plastic_strain,
            self.picard_iterations,
            self.picard_residual,
            self.deposited
        )
    }
}

impl CsvWriterOp {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            header_written: false,
        }
    }

    pub fn handle(file_path: impl Into<PathBuf>) -> SimOpHandle {
        SimOpHandle::new(Box::new(Self::new(file_path)))
    }

    fn write_header(&mut self) -> Result<(), std::io::Error> {
        if self.header_written {
            return Ok(());
        }
        if let Some(dir) = self.file_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.file_path)?;
        writeln!(file, "{CSV_HEADER}")?;
        self.header_written = true;
        Ok(())
    }

    fn write_stats(&self, stats: &StepStats) -> Result<(), std::io::Error> {
        let mut file = OpenOptions::new().append(true).open(&self.file_path)?;
        writeln!(file, "{}", stats.to_row())
    }

    fn append(&mut self, sim: &Simulation) {
        if !sim.comm().is_root() {
            return;
        }
        let result = self.write_header().and_then(|_| self.write_stats(&StepStats::gather(sim)));
        if let Err(e) = result {
            log::warn!("failed to write statistics to {}: {e}", self.file_path.display());
        }
    }
}

impl SimOp for CsvWriterOp {
    fn name(&self) -> &str {
        "CsvWriterOp"
    }

    fn init_sim(&mut self, sim: &mut Simulation) {
        self.append(sim);
    }

    fn update_sim(&mut self, sim: &mut Simulation) {
        self.append(sim);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_matches_header() {
        let stats = StepStats {
            step: 3,
            time_myr: 0.25,
            dt: 3.15e11,
            max_speed_cm_yr: 1.1355,
            min_temp: 293.15,
            max_temp: 1603.15,
            mean_temp: 900.0,
            particles: 1024,
            yielding: 17,
            max_plastic_strain: 0.3,
            picard_iterations: 4,
            picard_residual: 2.0e-4,
            deposited: 0,
        };
        let row = stats.to_row();
        assert_eq!(row.split(',').count(), CSV_HEADER.split(',').count());
        assert!(row.starts_with("3,0.250000,"));
    }
}
