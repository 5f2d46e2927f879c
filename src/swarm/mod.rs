//! Lagrangian particles carrying material identity and deformation history.
//!
//! Particles live in an arena of slots with a free list, so indices stay stable
//! while a step splits and merges; `compact` closes the gaps once per step.

pub mod buckets;
pub mod damage;
pub mod population;

pub use buckets::CellBuckets;
pub use damage::{apply_strain_taper, seed_damage, strain_taper_factor};
pub use population::{control_population, PopulationReport};

use crate::comm::{Communicator, DomainPartition};
use crate::error::{RiftError, RiftResult};
use crate::material::{MaterialId, MaterialRegistry};
use crate::mesh::{Grid, MeshFields};
use glam::DVec2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: DVec2,
    pub material: MaterialId,
    /// Accumulated while yielding; drives strain softening.
    pub plastic_strain: f64,
    pub total_strain: f64,
    pub melt_fraction: f64,
    /// Last temperature interpolated from the mesh, K.
    pub temperature: f64,
    /// Area represented by the particle, m^2.
    pub weight: f64,
}

impl Particle {
    pub fn new(position: DVec2, material: MaterialId, weight: f64) -> Self {
        Particle {
            position,
            material,
            plastic_strain: 0.0,
            total_strain: 0.0,
            melt_fraction: 0.0,
            temperature: 0.0,
            weight,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AdvectionReport {
    /// Particles that left the domain and were dropped.
    pub removed: usize,
    pub emigrated: usize,
    pub immigrated: usize,
}

#[derive(Clone, Debug, Default)]
pub struct ParticleSwarm {
    slots: Vec<Option<Particle>>,
    free: Vec<usize>,
    live: usize,
}

impl ParticleSwarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_particles(particles: Vec<Particle>) -> Self {
        let live = particles.len();
        ParticleSwarm {
            slots: particles.into_iter().map(Some).collect(),
            free: Vec::new(),
            live,
        }
    }

    /// Regular `layout[0] x layout[1]` sub-grid in every cell, materials from the registry shapes.
    pub fn populate(grid: &Grid, registry: &MaterialRegistry, layout: [usize; 2]) -> RiftResult<Self> {
        let [lx, ly] = layout;
        let per_cell = lx * ly;
        let weight = grid.element_area() / per_cell as f64;
        let mut particles = Vec::with_capacity(grid.element_count() * per_cell);
        for e in 0..grid.element_count() {
            let (i, j) = grid.element_ij(e);
            for b in 0..ly {
                for a in 0..lx {
                    let position = DVec2::new(
                        grid.min.x + (i as f64 + (a as f64 + 0.5) / lx as f64) * grid.dx,
                        grid.min.y + (j as f64 + (b as f64 + 0.5) / ly as f64) * grid.dy,
                    );
                    let material = registry.material_at(position).ok_or_else(|| {
                        RiftError::config(format!(
                            "no material shape covers ({:.1}, {:.1})",
                            position.x, position.y
                        ))
                    })?;
                    particles.push(Particle::new(position, material, weight));
                }
            }
        }
        Ok(Self::from_particles(particles))
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of slots, live or free; valid indices are below this.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn insert(&mut self, particle: Particle) -> usize {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(particle);
                index
            }
            None => {
                self.slots.push(Some(particle));
                self.slots.len() - 1
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Particle> {
        let taken = self.slots.get_mut(index)?.take();
        if taken.is_some() {
            self.live -= 1;
            self.free.push(index);
        }
        taken
    }

    pub fn get(&self, index: usize) -> Option<&Particle> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Particle> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &Particle)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|p| (i, p)))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    pub fn par_iter_mut(&mut self) -> impl ParallelIterator<Item = &mut Particle> {
        self.slots.par_iter_mut().filter_map(|s| s.as_mut())
    }

    /// Slot view for parallel passes that produce one value per slot.
    pub fn slots(&self) -> &[Option<Particle>] {
        &self.slots
    }

    /// Drops free slots; indices handed out earlier become invalid.
    pub fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.free.clear();
    }

    pub fn to_vec(&self) -> Vec<Particle> {
        self.iter().map(|(_, p)| *p).collect()
    }

    pub fn total_weight(&self, material: Option<MaterialId>) -> f64 {
        self.iter()
            .filter(|(_, p)| material.is_none_or(|m| p.material == m))
            .map(|(_, p)| p.weight)
            .sum()
    }

    /// Midpoint RK2 through the nodal velocity field. Particles leaving the
    /// domain are dropped; those leaving this rank's slab are exchanged.
    pub fn advect(
        &mut self,
        grid: &Grid,
        fields: &MeshFields,
        dt: f64,
        comm: &dyn Communicator,
        partition: Option<&DomainPartition>,
    ) -> RiftResult<AdvectionReport> {
        self.par_iter_mut().for_each(|p| {
            let v1 = fields.velocity_at(grid, p.position);
            let mid = p.position + 0.5 * dt * v1;
            let v2 = fields.velocity_at(grid, mid);
            p.position += dt * v2;
        });

        let mut report = AdvectionReport::default();
        let mut outgoing: Vec<Vec<Particle>> = vec![Vec::new(); comm.size()];
        for index in 0..self.slots.len() {
            let Some(p) = self.slots[index] else { continue };
            if !p.position.is_finite() {
                return Err(RiftError::instability(format!("particle {index} advected to a non-finite position")));
            }
            if !grid.contains(p.position) {
                self.remove(index);
                report.removed += 1;
                continue;
            }
            if let Some(part) = partition {
                let owner = part.owner(p.position.x);
                if owner != comm.rank() {
                    if let Some(p) = self.remove(index) {
                        outgoing[owner].push(p);
                        report.emigrated += 1;
                    }
                }
            }
        }

        for p in comm.exchange_particles(outgoing)? {
            self.insert(p);
            report.immigrated += 1;
        }
        Ok(report)
    }

    /// Mesh temperature at each particle, capped by its material's limiter.
    pub fn interpolate_temperature(&mut self, grid: &Grid, fields: &MeshFields, registry: &MaterialRegistry) {
        self.par_iter_mut().for_each(|p| {
            let t = fields.temperature_at(grid, p.position);
            p.temperature = registry.get(p.material).limit_temperature(t);
        });
    }
}
