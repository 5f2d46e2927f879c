use crate::comm::Communicator;
use crate::config::TimeStepOptions;
use crate::error::{RiftError, RiftResult};
use crate::mesh::{ElementProperties, Grid, MeshFields};
use std::fmt;

/// Which bound set the step size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepLimiter {
    Advection,
    Diffusion,
    MaxDt,
    /// Clipped to land on a checkpoint boundary.
    Checkpoint,
    EndTime,
}

impl fmt::Display for StepLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepLimiter::Advection => "advection",
            StepLimiter::Diffusion => "diffusion",
            StepLimiter::MaxDt => "max dt",
            StepLimiter::Checkpoint => "checkpoint",
            StepLimiter::EndTime => "end time",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeStep {
    /// s
    pub dt: f64,
    pub limiter: StepLimiter,
}

/// Where the run stands in simulated time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepWindow {
    pub time: f64,
    pub end_time: f64,
    pub next_checkpoint: Option<f64>,
}

/// Boundaries closer than this fraction of a step are snapped onto.
const SNAP_FRACTION: f64 = 1.0e-6;

/// `courant * h / max|v|`, or `None` while nothing moves.
pub fn advective_bound(grid: &Grid, fields: &MeshFields, courant: f64) -> Option<f64> {
    let speed = fields.max_speed();
    (speed > 0.0).then(|| courant * grid.min_cell_size() / speed)
}

/// `number * h^2 / kappa_max`.
pub fn diffusive_bound(grid: &Grid, props: &ElementProperties, number: f64) -> Option<f64> {
    let kappa = props.diffusivity.iter().copied().fold(0.0, f64::max);
    (kappa > 0.0).then(|| number * grid.min_cell_size().powi(2) / kappa)
}

/// Stable step for the current state, agreed on by every rank and clipped so
/// the next checkpoint time and the end time are hit exactly.
pub fn select_timestep(
    grid: &Grid,
    fields: &MeshFields,
    props: &ElementProperties,
    options: &TimeStepOptions,
    window: StepWindow,
    comm: &dyn Communicator,
) -> RiftResult<TimeStep> {
    let StepWindow {
        time,
        end_time,
        next_checkpoint,
    } = window;
    if time >= end_time {
        return Err(RiftError::instability(format!("no time left to step at t = {time} s")));
    }
    let candidates = [
        (advective_bound(grid, fields, options.courant), StepLimiter::Advection),
        (diffusive_bound(grid, props, options.diffusion_number), StepLimiter::Diffusion),
        (options.max_dt, StepLimiter::MaxDt),
    ];
    let local = candidates
        .iter()
        .filter_map(|&(dt, limiter)| dt.map(|dt| (dt, limiter)))
        .fold((f64::INFINITY, StepLimiter::EndTime), |best, c| if c.0 < best.0 { c } else { best });

    let dt = comm.all_reduce_min(local.0);
    let mut step = TimeStep {
        dt,
        limiter: if dt < local.0 { StepLimiter::Advection } else { local.1 },
    };

    for (boundary, limiter) in [(next_checkpoint, StepLimiter::Checkpoint), (Some(end_time), StepLimiter::EndTime)] {
        let Some(boundary) = boundary else { continue };
        let remaining = boundary - time;
        if remaining > 0.0 && (step.dt >= remaining || remaining - step.dt <= SNAP_FRACTION * step.dt) {
            step = TimeStep { dt: remaining, limiter };
        }
    }

    if !(step.dt.is_finite() && step.dt > 0.0) {
        return Err(RiftError::instability(format!(
            "time step {} s at t = {time} s (limited by {})",
            step.dt, step.limiter
        )));
    }
    Ok(step)
}
