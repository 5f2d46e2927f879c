use crate::error::{RiftError, RiftResult};
use glam::DVec2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Wall {
    Left,
    Right,
    Bottom,
    Top,
}

impl Wall {
    pub const ALL: [Wall; 4] = [Wall::Left, Wall::Right, Wall::Bottom, Wall::Top];

    pub fn name(self) -> &'static str {
        match self {
            Wall::Left => "left",
            Wall::Right => "right",
            Wall::Bottom => "bottom",
            Wall::Top => "top",
        }
    }
}

/// Reference-square corner signs, counter-clockwise from the lower left.
const CORNERS: [(f64, f64); 4] = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)];

/// Structured rectangular mesh of bilinear quadrilaterals.
///
/// Nodes are numbered row-major from the lower-left corner, `n = j * (nx + 1) + i`.
/// Elements follow the same convention with `e = j * nx + i`; each element doubles
/// as a particle cell.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
    pub min: DVec2,
    pub max: DVec2,
    pub nx: usize,
    pub ny: usize,
    pub dx: f64,
    pub dy: f64,
}

impl Grid {
    pub fn new(min: DVec2, max: DVec2, nx: usize, ny: usize) -> RiftResult<Self> {
        if nx == 0 || ny == 0 {
            return Err(RiftError::config(format!("resolution must be at least 1x1, got {nx}x{ny}")));
        }
        if !(max.x > min.x && max.y > min.y) {
            return Err(RiftError::config(format!("domain max {max} must exceed min {min}")));
        }
        Ok(Grid {
            min,
            max,
            nx,
            ny,
            dx: (max.x - min.x) / nx as f64,
            dy: (max.y - min.y) / ny as f64,
        })
    }

    pub fn node_count(&self) -> usize {
        (self.nx + 1) * (self.ny + 1)
    }

    pub fn element_count(&self) -> usize {
        self.nx * self.ny
    }

    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn element_area(&self) -> f64 {
        self.dx * self.dy
    }

    pub fn min_cell_size(&self) -> f64 {
        self.dx.min(self.dy)
    }

    pub fn node_index(&self, i: usize, j: usize) -> usize {
        j * (self.nx + 1) + i
    }

    pub fn node_ij(&self, node: usize) -> (usize, usize) {
        (node % (self.nx + 1), node / (self.nx + 1))
    }

    pub fn node_position(&self, node: usize) -> DVec2 {
        let (i, j) = self.node_ij(node);
        DVec2::new(self.min.x + i as f64 * self.dx, self.min.y + j as f64 * self.dy)
    }

    pub fn element_index(&self, i: usize, j: usize) -> usize {
        j * self.nx + i
    }

    pub fn element_ij(&self, element: usize) -> (usize, usize) {
        (element % self.nx, element / self.nx)
    }

    pub fn element_nodes(&self, element: usize) -> [usize; 4] {
        let (i, j) = self.element_ij(element);
        [
            self.node_index(i, j),
            self.node_index(i + 1, j),
            self.node_index(i + 1, j + 1),
            self.node_index(i, j + 1),
        ]
    }

    pub fn element_centre(&self, element: usize) -> DVec2 {
        let (i, j) = self.element_ij(element);
        DVec2::new(
            self.min.x + (i as f64 + 0.5) * self.dx,
            self.min.y + (j as f64 + 0.5) * self.dy,
        )
    }

    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }

    pub fn clamp_point(&self, p: DVec2) -> DVec2 {
        p.clamp(self.min, self.max)
    }

    /// Element containing `p` and the reference coordinates of `p` inside it.
    ///
    /// Points on the upper walls belong to the last row/column of elements.
    pub fn locate(&self, p: DVec2) -> Option<(usize, f64, f64)> {
        if !self.contains(p) {
            return None;
        }
        let fx = (p.x - self.min.x) / self.dx;
        let fy = (p.y - self.min.y) / self.dy;
        let i = (fx.floor() as usize).min(self.nx - 1);
        let j = (fy.floor() as usize).min(self.ny - 1);
        let xi = 2.0 * (fx - i as f64) - 1.0;
        let eta = 2.0 * (fy - j as f64) - 1.0;
        Some((self.element_index(i, j), xi, eta))
    }

    pub fn cell_of(&self, p: DVec2) -> Option<usize> {
        self.locate(p).map(|(e, _, _)| e)
    }

    pub fn shape_functions(xi: f64, eta: f64) -> [f64; 4] {
        CORNERS.map(|(a, b)| 0.25 * (1.0 + a * xi) * (1.0 + b * eta))
    }

    /// Physical gradients of the four shape functions.
    pub fn shape_gradients(&self, xi: f64, eta: f64) -> [DVec2; 4] {
        CORNERS.map(|(a, b)| {
            DVec2::new(
                0.25 * a * (1.0 + b * eta) * 2.0 / self.dx,
                0.25 * b * (1.0 + a * xi) * 2.0 / self.dy,
            )
        })
    }

    /// 2x2 Gauss points in reference coordinates; each carries weight 1.
    pub fn gauss_points() -> [(f64, f64); 4] {
        let g = 1.0 / 3.0f64.sqrt();
        CORNERS.map(|(a, b)| (a * g, b * g))
    }

    /// Jacobian determinant of the reference-to-physical map.
    pub fn jacobian(&self) -> f64 {
        0.25 * self.dx * self.dy
    }

    pub fn wall_nodes(&self, wall: Wall) -> Vec<usize> {
        match wall {
            Wall::Left => (0..=self.ny).map(|j| self.node_index(0, j)).collect(),
            Wall::Right => (0..=self.ny).map(|j| self.node_index(self.nx, j)).collect(),
            Wall::Bottom => (0..=self.nx).map(|i| self.node_index(i, 0)).collect(),
            Wall::Top => (0..=self.nx).map(|i| self.node_index(i, self.ny)).collect(),
        }
    }

    /// Consecutive node pairs along a wall and the edge length between them.
    pub fn wall_edges(&self, wall: Wall) -> Vec<([usize; 2], f64)> {
        let nodes = self.wall_nodes(wall);
        let length = match wall {
            Wall::Left | Wall::Right => self.dy,
            Wall::Bottom | Wall::Top => self.dx,
        };
        nodes.windows(2).map(|w| ([w[0], w[1]], length)).collect()
    }

}
