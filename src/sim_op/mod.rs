pub mod csv_writer_op;
pub mod progress_reporter_op;

pub use csv_writer_op::CsvWriterOp;
pub use progress_reporter_op::ProgressReporterOp;

use crate::sim::Simulation;

/// Observer hooked into the run loop.
pub trait SimOp {
    /// The name of this operator (for identification and timing)
    fn name(&self) -> &str;

    /// Called once before the first step, after the initial state exists
    fn init_sim(&mut self, _sim: &mut Simulation) {}

    /// Called after every completed step
    fn update_sim(&mut self, _sim: &mut Simulation) {}

    /// Called once when the run loop exits
    fn after_sim(&mut self, _sim: &mut Simulation) {}
}

pub struct SimOpHandle {
    pub op: Box<dyn SimOp>,
}

impl SimOpHandle {
    pub fn new(op: Box<dyn SimOp>) -> Self {
        SimOpHandle { op }
    }
}
