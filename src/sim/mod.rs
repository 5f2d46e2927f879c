//! Time integration of the coupled model: particle/mesh coupling, step-size
//! control, checkpoints and the run loop.

pub mod checkpoint;
pub mod coupling;
pub mod simulation;
pub mod timestep;

pub use checkpoint::{latest_checkpoint_step, read_checkpoint, write_checkpoint, Checkpoint};
pub use coupling::{MaterialCoupling, ParticleEvaluation};
pub use simulation::{OpTiming, RunOutcome, SimProps, Simulation, StepReport};
pub use timestep::{select_timestep, StepLimiter, StepWindow, TimeStep};
