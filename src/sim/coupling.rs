//! Particle to mesh coupling: material response at every particle, averaged
//! onto the elements that the solvers read.

use crate::comm::Communicator;
use crate::config::{MaterialDefaults, ThermalOptions};
use crate::error::{RiftError, RiftResult};
use crate::material::MaterialRegistry;
use crate::mesh::{ElementProperties, Grid, MeshFields};
use crate::rheology::{RheologyEvaluator, RheologyResponse, RheologyState};
use crate::swarm::ParticleSwarm;
use rayon::prelude::*;

/// Response of one particle at the current fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParticleEvaluation {
    pub slot: usize,
    pub element: usize,
    pub weight: f64,
    /// 1/s, the value the response was evaluated at.
    pub strain_rate_ii: f64,
    pub response: RheologyResponse,
    pub diffusivity: f64,
    pub latent_factor: f64,
    /// K/s
    pub heating_rate: f64,
}

#[derive(Clone, Debug)]
pub struct MaterialCoupling {
    evaluator: RheologyEvaluator,
    default_strain_rate: f64,
    shear_heating: bool,
    latent_heat: bool,
}

const COLUMNS: usize = 6;

impl MaterialCoupling {
    pub fn new(defaults: &MaterialDefaults, thermal: &ThermalOptions) -> Self {
        MaterialCoupling {
            evaluator: RheologyEvaluator::new(defaults),
            default_strain_rate: defaults.default_strain_rate,
            shear_heating: thermal.shear_heating,
            latent_heat: thermal.latent_heat,
        }
    }

    /// Evaluates every local particle. Before the first velocity solve the
    /// strain rate is the configured default and no shear heating is produced.
    pub fn evaluate(
        &self,
        grid: &Grid,
        fields: &MeshFields,
        registry: &MaterialRegistry,
        swarm: &ParticleSwarm,
    ) -> RiftResult<Vec<ParticleEvaluation>> {
        let flowing = fields.has_flow();
        swarm
            .slots()
            .par_iter()
            .enumerate()
            .filter_map(|(slot, p)| p.as_ref().map(|p| (slot, p)))
            .filter_map(|(slot, p)| grid.cell_of(p.position).map(|element| (slot, element, p)))
            .map(|(slot, element, p)| {
                let material = registry.get(p.material);
                let temperature = material.limit_temperature(fields.temperature_at(grid, p.position));
                let pressure = fields.pressure_at(grid, p.position);
                let strain_rate_ii = if flowing {
                    fields.strain_rate_at(grid, p.position).second_invariant()
                } else {
                    self.default_strain_rate
                };
                let state = RheologyState {
                    temperature,
                    pressure,
                    strain_rate_ii,
                    plastic_strain: p.plastic_strain,
                };
                let response = self.evaluator.evaluate(material, &state)?;

                let thermal = &material.thermal;
                let latent_factor = if self.latent_heat {
                    thermal.capacity / material.apparent_capacity(temperature, pressure)
                } else {
                    1.0
                };
                let shear = if self.shear_heating && flowing {
                    4.0 * response.viscosity * strain_rate_ii * strain_rate_ii
                } else {
                    0.0
                };
                let heating_rate =
                    (thermal.radiogenic_heat_production + shear) / (response.density * thermal.capacity);

                Ok(ParticleEvaluation {
                    slot,
                    element,
                    weight: p.weight,
                    strain_rate_ii,
                    response,
                    diffusivity: thermal.diffusivity,
                    latent_factor,
                    heating_rate,
                })
            })
            .collect()
    }

    /// Weighted arithmetic mean per element across all ranks. Elements no rank
    /// has a particle in take the values of the nearest populated element.
    pub fn project(
        &self,
        grid: &Grid,
        evaluations: &[ParticleEvaluation],
        comm: &dyn Communicator,
    ) -> RiftResult<ElementProperties> {
        let n = grid.element_count();
        // columns: weight, viscosity, density, diffusivity, latent factor, heating
        let mut sums = vec![0.0; COLUMNS * n];
        for ev in evaluations {
            let w = ev.weight;
            let e = ev.element;
            sums[e] += w;
            sums[n + e] += w * ev.response.viscosity;
            sums[2 * n + e] += w * ev.response.density;
            sums[3 * n + e] += w * ev.diffusivity;
            sums[4 * n + e] += w * ev.latent_factor;
            sums[5 * n + e] += w * ev.heating_rate;
        }
        comm.all_reduce_sum_slice(&mut sums);

        let (weights, rest) = sums.split_at(n);
        let mean = |column: usize, e: usize| rest[(column - 1) * n + e] / weights[e];
        let populated: Vec<bool> = weights.iter().map(|&w| w > 0.0).collect();
        if !populated.iter().any(|&p| p) {
            return Err(RiftError::instability("no particles left to define element properties"));
        }

        let mut props = ElementProperties::uniform(grid, 0.0, 0.0, 0.0);
        let mut empty = 0;
        for e in 0..n {
            let source = if populated[e] {
                e
            } else {
                empty += 1;
                nearest_populated(grid, &populated, e).unwrap_or(e)
            };
            props.viscosity[e] = mean(1, source);
            props.density[e] = mean(2, source);
            props.diffusivity[e] = mean(3, source);
            props.latent_factor[e] = mean(4, source);
            props.heating_rate[e] = mean(5, source);
        }
        if empty > 0 {
            log::debug!("{empty} elements without particles took neighbouring properties");
        }
        props.check(grid)?;
        Ok(props)
    }

    pub fn element_properties(
        &self,
        grid: &Grid,
        fields: &MeshFields,
        registry: &MaterialRegistry,
        swarm: &ParticleSwarm,
        comm: &dyn Communicator,
    ) -> RiftResult<(ElementProperties, Vec<ParticleEvaluation>)> {
        let evaluations = self.evaluate(grid, fields, registry, swarm)?;
        let props = self.project(grid, &evaluations, comm)?;
        Ok((props, evaluations))
    }
}

/// Closest populated element by centre distance, ties to the lower index.
fn nearest_populated(grid: &Grid, populated: &[bool], element: usize) -> Option<usize> {
    let (ci, cj) = grid.element_ij(element);
    let centre = grid.element_centre(element);
    for ring in 1..=grid.nx.max(grid.ny) {
        let r = ring as isize;
        let mut best: Option<(f64, usize)> = None;
        for j in cj as isize - r..=cj as isize + r {
            for i in ci as isize - r..=ci as isize + r {
                let on_ring = (i - ci as isize).abs() == r || (j - cj as isize).abs() == r;
                if !on_ring || i < 0 || j < 0 || i >= grid.nx as isize || j >= grid.ny as isize {
                    continue;
                }
                let e = grid.element_index(i as usize, j as usize);
                if !populated[e] {
                    continue;
                }
                let d = grid.element_centre(e).distance_squared(centre);
                if best.is_none_or(|(bd, be)| d < bd || (d == bd && e < be)) {
                    best = Some((d, e));
                }
            }
        }
        if let Some((_, e)) = best {
            return Some(e);
        }
    }
    None
}
