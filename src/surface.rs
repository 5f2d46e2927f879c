//! Surface processes that reclassify particles after advection.

use crate::config::{SedimentationConfig, ThresholdPolicy};
use crate::error::RiftResult;
use crate::material::{MaterialId, MaterialRegistry};
use crate::swarm::ParticleSwarm;

pub trait SurfaceProcess: Send + Sync {
    fn name(&self) -> &str;

    /// Reclassifies particles in place and returns how many changed material.
    fn apply(&self, swarm: &mut ParticleSwarm) -> usize;
}

/// Open-phase particles at or below the threshold become deposit.
///
/// The transition is one-way: deposit is never an open material, so a second
/// pass over the same positions changes nothing.
#[derive(Clone, Debug, PartialEq)]
pub struct SedimentationThreshold {
    pub open: Vec<MaterialId>,
    pub deposit: MaterialId,
    /// m
    pub threshold: f64,
    pub policy: ThresholdPolicy,
}

impl SedimentationThreshold {
    pub fn from_config(config: &SedimentationConfig, registry: &MaterialRegistry) -> RiftResult<Self> {
        let open = config
            .open_materials
            .iter()
            .map(|name| registry.require(name))
            .collect::<RiftResult<Vec<_>>>()?;
        Ok(SedimentationThreshold {
            open,
            deposit: registry.require(&config.deposit_material)?,
            threshold: config.threshold,
            policy: config.policy,
        })
    }

    pub fn is_below(&self, elevation: f64) -> bool {
        match self.policy {
            ThresholdPolicy::Inclusive => elevation <= self.threshold,
            ThresholdPolicy::Exclusive => elevation < self.threshold,
        }
    }
}

impl SurfaceProcess for SedimentationThreshold {
    fn name(&self) -> &str {
        "sedimentation"
    }

    fn apply(&self, swarm: &mut ParticleSwarm) -> usize {
        let mut changed = 0;
        for p in swarm.iter_mut() {
            if self.open.contains(&p.material) && self.is_below(p.position.y) {
                p.material = self.deposit;
                changed += 1;
            }
        }
        if changed > 0 {
            log::debug!("{}: {changed} particles deposited", self.name());
        }
        changed
    }
}
