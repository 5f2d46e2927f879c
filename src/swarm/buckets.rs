use crate::mesh::Grid;
use crate::swarm::ParticleSwarm;
use glam::DVec2;

/// Particle slot indices grouped by the cell that contains them.
#[derive(Clone, Debug)]
pub struct CellBuckets {
    cells: Vec<Vec<usize>>,
}

impl CellBuckets {
    pub fn build(grid: &Grid, swarm: &ParticleSwarm) -> Self {
        let mut cells = vec![Vec::new(); grid.element_count()];
        for (index, p) in swarm.iter() {
            if let Some(e) = grid.cell_of(p.position) {
                cells[e].push(index);
            }
        }
        CellBuckets { cells }
    }

    pub fn cell(&self, element: usize) -> &[usize] {
        &self.cells[element]
    }

    pub fn count(&self, element: usize) -> usize {
        self.cells[element].len()
    }

    pub fn push(&mut self, element: usize, index: usize) {
        self.cells[element].push(index);
    }

    pub fn remove(&mut self, element: usize, index: usize) {
        self.cells[element].retain(|&i| i != index);
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Closest particle to `point`, searched in growing rings of cells.
    pub fn nearest(&self, grid: &Grid, swarm: &ParticleSwarm, point: DVec2) -> Option<usize> {
        let (ci, cj) = grid.element_ij(grid.cell_of(grid.clamp_point(point))?);
        let h = grid.min_cell_size();
        let max_ring = grid.nx.max(grid.ny);
        let mut best: Option<(usize, f64)> = None;

        for ring in 0..=max_ring {
            // every cell in this ring is at least (ring - 1) cells away
            if let Some((_, d)) = best {
                if (ring as f64 - 1.0) * h > d {
                    break;
                }
            }
            let lo_i = ci as isize - ring as isize;
            let hi_i = ci as isize + ring as isize;
            let lo_j = cj as isize - ring as isize;
            let hi_j = cj as isize + ring as isize;
            for j in lo_j..=hi_j {
                for i in lo_i..=hi_i {
                    let on_ring = i == lo_i || i == hi_i || j == lo_j || j == hi_j;
                    if !on_ring || i < 0 || j < 0 || i >= grid.nx as isize || j >= grid.ny as isize {
                        continue;
                    }
                    for &index in self.cell(grid.element_index(i as usize, j as usize)) {
                        if let Some(p) = swarm.get(index) {
                            let d = p.position.distance(point);
                            if best.is_none_or(|(_, bd)| d < bd) {
                                best = Some((index, d));
                            }
                        }
                    }
                }
            }
        }
        best.map(|(index, _)| index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::MaterialId;
    use crate::swarm::Particle;

    #[test]
    fn test_nearest_searches_beyond_empty_cells() {
        let grid = Grid::new(DVec2::ZERO, DVec2::new(10.0, 10.0), 10, 10).unwrap();
        let mut swarm = ParticleSwarm::new();
        let far = swarm.insert(Particle::new(DVec2::new(9.5, 9.5), MaterialId(0), 1.0));
        let near = swarm.insert(Particle::new(DVec2::new(3.9, 0.5), MaterialId(1), 1.0));
        let buckets = CellBuckets::build(&grid, &swarm);

        assert_eq!(buckets.count(grid.element_index(3, 0)), 1);
        assert_eq!(buckets.nearest(&grid, &swarm, DVec2::new(0.5, 0.5)), Some(near));
        assert_eq!(buckets.nearest(&grid, &swarm, DVec2::new(8.0, 9.0)), Some(far));
        assert_eq!(CellBuckets::build(&grid, &ParticleSwarm::new()).nearest(&grid, &swarm, DVec2::ZERO), None);
    }

    #[test]
    fn test_ring_search_finds_true_nearest_across_rings() {
        let grid = Grid::new(DVec2::ZERO, DVec2::new(10.0, 10.0), 10, 10).unwrap();
        let mut swarm = ParticleSwarm::new();
        // diagonal neighbour is in ring 1 but farther than the particle two cells along x
        swarm.insert(Particle::new(DVec2::new(1.99, 1.99), MaterialId(0), 1.0));
        let straight = swarm.insert(Particle::new(DVec2::new(2.05, 0.5), MaterialId(0), 1.0));
        let buckets = CellBuckets::build(&grid, &swarm);
        assert_eq!(buckets.nearest(&grid, &swarm, DVec2::new(0.9, 0.5)), Some(straight));
    }
}
