//! Keeps the per-cell particle count inside the target band.
//!
//! Starved cells split their heaviest particles (and borrow a particle from the
//! nearest neighbour when empty) under a per-step, per-rank budget; crowded cells
//! merge their closest same-material pairs but never drop below the floor.
//! Splits and merges halve or sum weights, so total weight is preserved.
//! Only the cells in this rank's element columns are controlled; the rest of
//! the mesh belongs to other ranks.

use crate::config::PopulationOptions;
use crate::mesh::Grid;
use crate::swarm::{CellBuckets, Particle, ParticleSwarm};
use glam::DVec2;
use rand::Rng;
use std::ops::Range;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PopulationReport {
    pub splits: usize,
    pub merges: usize,
    /// Particles cloned into empty cells; counted in `splits` too.
    pub created: usize,
}

fn jittered(grid: &Grid, element: usize, origin: DVec2, jitter: f64, rng: &mut impl Rng) -> DVec2 {
    let (i, j) = grid.element_ij(element);
    let lo = DVec2::new(grid.min.x + i as f64 * grid.dx, grid.min.y + j as f64 * grid.dy);
    let hi = lo + DVec2::new(grid.dx, grid.dy);
    let offset = if jitter > 0.0 {
        DVec2::new(
            rng.random_range(-jitter..jitter) * grid.dx,
            rng.random_range(-jitter..jitter) * grid.dy,
        )
    } else {
        DVec2::ZERO
    };
    // stay strictly inside the cell so the clone is counted where it was made
    let margin = DVec2::new(grid.dx, grid.dy) * 1e-9;
    (origin + offset).clamp(lo + margin, hi - margin)
}

fn heaviest(swarm: &ParticleSwarm, indices: &[usize]) -> Option<usize> {
    indices
        .iter()
        .copied()
        .filter_map(|i| swarm.get(i).map(|p| (i, p.weight)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}

/// Halves `donor` and inserts the other half at `position`.
fn split_off(swarm: &mut ParticleSwarm, donor: usize, position: DVec2) -> Option<usize> {
    let p = swarm.get_mut(donor)?;
    p.weight *= 0.5;
    let clone = Particle { position, ..*p };
    Some(swarm.insert(clone))
}

fn closest_same_material_pair(swarm: &ParticleSwarm, indices: &[usize]) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize, f64)> = None;
    for (k, &a) in indices.iter().enumerate() {
        let Some(pa) = swarm.get(a) else { continue };
        for &b in &indices[k + 1..] {
            let Some(pb) = swarm.get(b) else { continue };
            if pa.material != pb.material {
                continue;
            }
            let d = pa.position.distance_squared(pb.position);
            if best.is_none_or(|(_, _, bd)| d < bd) {
                best = Some((a, b, d));
            }
        }
    }
    best.map(|(a, b, _)| (a, b))
}

/// Weight-averaged merge of `b` into `a`.
fn merge(swarm: &mut ParticleSwarm, a: usize, b: usize) -> bool {
    let Some(pb) = swarm.remove(b) else { return false };
    let Some(pa) = swarm.get_mut(a) else { return false };
    let w = pa.weight + pb.weight;
    let (wa, wb) = (pa.weight / w, pb.weight / w);
    pa.position = pa.position * wa + pb.position * wb;
    pa.plastic_strain = pa.plastic_strain * wa + pb.plastic_strain * wb;
    pa.total_strain = pa.total_strain * wa + pb.total_strain * wb;
    pa.melt_fraction = pa.melt_fraction * wa + pb.melt_fraction * wb;
    pa.temperature = pa.temperature * wa + pb.temperature * wb;
    pa.weight = w;
    true
}

/// `columns` are the element columns this rank owns; `0..grid.nx` on a single rank.
pub fn control_population(
    swarm: &mut ParticleSwarm,
    grid: &Grid,
    columns: Range<usize>,
    options: &PopulationOptions,
    rng: &mut impl Rng,
) -> PopulationReport {
    let mut report = PopulationReport::default();
    if !options.enabled {
        return report;
    }
    let target = options.target_per_cell();
    let split_below = options.split_threshold * target as f64;
    let split_goal = split_below.ceil() as usize;
    let merge_above = options.merge_threshold * target as f64;
    let merge_goal = target.max(options.min_per_cell);

    let mut buckets = CellBuckets::build(grid, swarm);
    let owned: Vec<usize> = (0..grid.element_count())
        .filter(|&e| columns.contains(&grid.element_ij(e).0))
        .collect();

    // empty cells borrow from their nearest neighbour before any refill
    for &e in &owned {
        if buckets.count(e) > 0 || split_goal == 0 {
            continue;
        }
        if report.splits >= options.max_splits {
            break;
        }
        let centre = grid.element_centre(e);
        let Some(donor) = buckets.nearest(grid, swarm, centre) else { break };
        let position = jittered(grid, e, centre, options.jitter, rng);
        if let Some(index) = split_off(swarm, donor, position) {
            buckets.push(e, index);
            report.splits += 1;
            report.created += 1;
        }
    }

    // neediest cells first so an exhausted budget goes where it matters most
    let mut starved: Vec<usize> = owned
        .iter()
        .copied()
        .filter(|&e| (buckets.count(e) as f64) < split_below)
        .collect();
    starved.sort_by_key(|&e| (buckets.count(e), e));

    'cells: for e in starved {
        while buckets.count(e) < split_goal {
            if report.splits >= options.max_splits {
                break 'cells;
            }
            let Some(donor) = heaviest(swarm, buckets.cell(e)) else { break };
            let origin = swarm.get(donor).map_or(grid.element_centre(e), |p| p.position);
            let position = jittered(grid, e, origin, options.jitter, rng);
            match split_off(swarm, donor, position) {
                Some(index) => {
                    buckets.push(e, index);
                    report.splits += 1;
                }
                None => break,
            }
        }
    }

    for &e in &owned {
        if (buckets.count(e) as f64) <= merge_above {
            continue;
        }
        while buckets.count(e) > merge_goal {
            let Some((a, b)) = closest_same_material_pair(swarm, buckets.cell(e)) else { break };
            if !merge(swarm, a, b) {
                break;
            }
            buckets.remove(e, b);
            report.merges += 1;
        }
    }

    swarm.compact();
    if report.splits > 0 || report.merges > 0 {
        log::debug!(
            "population control: {} splits ({} into empty cells), {} merges, {} particles",
            report.splits,
            report.created,
            report.merges,
            swarm.len()
        );
    }
    report
}
