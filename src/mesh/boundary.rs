use crate::error::{RiftError, RiftResult};
use crate::mesh::grid::{Grid, Wall};
use crate::shapes::Region;
use serde::{Deserialize, Serialize};

/// Condition on one velocity component of one wall.
///
/// A wall component carries exactly one of these; the enum makes a second,
/// conflicting condition unrepresentable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryCondition {
    #[default]
    Free,
    /// m/s
    Velocity { value: f64 },
    /// Pa, applied as a force per unit wall length along the component axis.
    Traction { value: f64 },
}

impl BoundaryCondition {
    pub fn velocity(&self) -> Option<f64> {
        match *self {
            BoundaryCondition::Velocity { value } => Some(value),
            _ => None,
        }
    }

    pub fn traction(&self) -> Option<f64> {
        match *self {
            BoundaryCondition::Traction { value } => Some(value),
            _ => None,
        }
    }

    fn value(&self) -> f64 {
        match *self {
            BoundaryCondition::Free => 0.0,
            BoundaryCondition::Velocity { value } | BoundaryCondition::Traction { value } => value,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WallConditions {
    #[serde(default)]
    pub x: BoundaryCondition,
    #[serde(default)]
    pub y: BoundaryCondition,
}

impl WallConditions {
    pub fn new(x: BoundaryCondition, y: BoundaryCondition) -> Self {
        WallConditions { x, y }
    }

    pub fn component(&self, axis: usize) -> BoundaryCondition {
        if axis == 0 { self.x } else { self.y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityBoundaries {
    #[serde(default)]
    pub left: WallConditions,
    #[serde(default)]
    pub right: WallConditions,
    #[serde(default)]
    pub bottom: WallConditions,
    #[serde(default)]
    pub top: WallConditions,
}

/// Dirichlet values per velocity degree of freedom (`2 * node + axis`).
pub type DirichletMap = Vec<Option<f64>>;

impl VelocityBoundaries {
    pub fn wall(&self, wall: Wall) -> &WallConditions {
        match wall {
            Wall::Left => &self.left,
            Wall::Right => &self.right,
            Wall::Bottom => &self.bottom,
            Wall::Top => &self.top,
        }
    }

    /// Rejects walls that leave a rigid-body mode free or that prescribe a net
    /// volume change through a fully closed box.
    pub fn validate(&self, grid: &Grid) -> RiftResult<()> {
        for wall in Wall::ALL {
            let c = self.wall(wall);
            for (axis, bc) in [("x", c.x), ("y", c.y)] {
                if !bc.value().is_finite() {
                    return Err(RiftError::config(format!(
                        "{} wall {axis} component has a non-finite value",
                        wall.name()
                    )));
                }
            }
        }

        for (axis, name) in [(0, "x"), (1, "y")] {
            let constrained = Wall::ALL
                .iter()
                .any(|&w| self.wall(w).component(axis).velocity().is_some());
            if !constrained {
                return Err(RiftError::config(format!(
                    "no wall prescribes the {name} velocity; the solution is undetermined up to a rigid translation"
                )));
            }
        }

        if self.all_normal_prescribed() {
            let flux = (self.right.x.value() - self.left.x.value()) * grid.height()
                + (self.top.y.value() - self.bottom.y.value()) * grid.width();
            let scale = [self.left.x, self.right.x, self.bottom.y, self.top.y]
                .iter()
                .map(|bc| bc.value().abs())
                .fold(0.0, f64::max)
                * (grid.width() + grid.height());
            if flux.abs() > 1e-9 * scale.max(f64::MIN_POSITIVE) {
                return Err(RiftError::config(format!(
                    "all walls prescribe normal velocity but the net boundary flux is {flux:.3e} m^2/s; incompressible flow cannot satisfy it"
                )));
            }
        }
        Ok(())
    }

    /// True when every wall fixes its normal velocity, leaving pressure defined up to a constant.
    pub fn all_normal_prescribed(&self) -> bool {
        self.left.x.velocity().is_some()
            && self.right.x.velocity().is_some()
            && self.bottom.y.velocity().is_some()
            && self.top.y.velocity().is_some()
    }

    /// Side walls are applied last, so they take precedence at shared corners.
    pub fn dirichlet_map(&self, grid: &Grid) -> DirichletMap {
        let mut map = vec![None; 2 * grid.node_count()];
        for wall in [Wall::Bottom, Wall::Top, Wall::Left, Wall::Right] {
            let c = self.wall(wall);
            for node in grid.wall_nodes(wall) {
                for axis in 0..2 {
                    if let Some(v) = c.component(axis).velocity() {
                        map[2 * node + axis] = Some(v);
                    }
                }
            }
        }
        map
    }

    /// Consistent nodal forces from wall tractions.
    pub fn traction_loads(&self, grid: &Grid) -> Vec<f64> {
        let mut loads = vec![0.0; 2 * grid.node_count()];
        for wall in Wall::ALL {
            let c = self.wall(wall);
            for axis in 0..2 {
                if let Some(t) = c.component(axis).traction() {
                    for ([a, b], length) in grid.wall_edges(wall) {
                        loads[2 * a + axis] += 0.5 * t * length;
                        loads[2 * b + axis] += 0.5 * t * length;
                    }
                }
            }
        }
        loads
    }
}

/// Which nodes a fixed-temperature set covers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSelector {
    Region { region: Region },
    /// Nodes whose nearest particle belongs to one of these materials.
    Materials { names: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSetCondition {
    pub selector: NodeSelector,
    pub temperature: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TemperatureBoundaries {
    #[serde(default)]
    pub top: Option<f64>,
    #[serde(default)]
    pub bottom: Option<f64>,
    #[serde(default)]
    pub left: Option<f64>,
    #[serde(default)]
    pub right: Option<f64>,
    #[serde(default)]
    pub node_sets: Vec<NodeSetCondition>,
}

impl TemperatureBoundaries {
    pub fn wall(&self, wall: Wall) -> Option<f64> {
        match wall {
            Wall::Left => self.left,
            Wall::Right => self.right,
            Wall::Bottom => self.bottom,
            Wall::Top => self.top,
        }
    }

    pub fn validate(&self) -> RiftResult<()> {
        let walls = Wall::ALL.iter().filter_map(|&w| self.wall(w));
        let sets = self.node_sets.iter().map(|s| s.temperature);
        for t in walls.chain(sets) {
            if !(t.is_finite() && t > 0.0) {
                return Err(RiftError::config(format!("fixed temperature {t} K must be positive")));
            }
        }
        if Wall::ALL.iter().all(|&w| self.wall(w).is_none()) && self.node_sets.is_empty() {
            return Err(RiftError::config("temperature needs at least one fixed wall or node set"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec2;

    fn grid() -> Grid {
        Grid::new(DVec2::ZERO, DVec2::new(4.0, 2.0), 4, 2).unwrap()
    }

    fn vel(value: f64) -> BoundaryCondition {
        BoundaryCondition::Velocity { value }
    }

    fn rift_walls() -> VelocityBoundaries {
        VelocityBoundaries {
            left: WallConditions::new(vel(1.0), vel(0.0)),
            right: WallConditions::new(vel(-1.0), vel(0.0)),
            top: WallConditions::new(BoundaryCondition::Free, vel(0.0)),
            bottom: WallConditions::new(BoundaryCondition::Free, BoundaryCondition::Traction { value: 6.48174e9 }),
        }
    }

    #[test]
    fn test_rift_walls_validate() {
        assert!(rift_walls().validate(&grid()).is_ok());
        assert!(!rift_walls().all_normal_prescribed());
    }

    #[test]
    fn test_under_constrained_is_rejected() {
        let mut walls = rift_walls();
        walls.left.x = BoundaryCondition::Free;
        walls.right.x = BoundaryCondition::Traction { value: 0.0 };
        let err = walls.validate(&grid()).unwrap_err();
        assert!(err.to_string().contains("x velocity"));
    }

    #[test]
    fn test_closed_box_with_net_inflow_is_rejected() {
        let walls = VelocityBoundaries {
            left: WallConditions::new(vel(1.0), BoundaryCondition::Free),
            right: WallConditions::new(vel(0.0), BoundaryCondition::Free),
            bottom: WallConditions::new(BoundaryCondition::Free, vel(0.0)),
            top: WallConditions::new(BoundaryCondition::Free, vel(0.0)),
        };
        assert!(matches!(walls.validate(&grid()), Err(RiftError::Configuration(_))));

        let unbalanced = VelocityBoundaries {
            left: WallConditions::new(vel(-1.0), BoundaryCondition::Free),
            right: WallConditions::new(vel(1.0), BoundaryCondition::Free),
            bottom: WallConditions::new(BoundaryCondition::Free, vel(2.0)),
            top: WallConditions::new(BoundaryCondition::Free, vel(-2.0)),
        };
        // 4 m^2/s out through the sides, 16 m^2/s in through top and bottom
        let g = grid();
        assert!(unbalanced.validate(&g).is_err());
        let balanced = VelocityBoundaries {
            bottom: WallConditions::new(BoundaryCondition::Free, vel(0.5)),
            top: WallConditions::new(BoundaryCondition::Free, vel(-0.5)),
            ..unbalanced
        };
        assert!(balanced.validate(&g).is_ok());
        assert!(balanced.all_normal_prescribed());
    }

    #[test]
    fn test_side_walls_win_at_corners() {
        let g = grid();
        let walls = VelocityBoundaries {
            top: WallConditions::new(vel(5.0), vel(0.0)),
            ..rift_walls()
        };
        let map = walls.dirichlet_map(&g);
        let top_left = g.node_index(0, g.ny);
        assert_eq!(map[2 * top_left], Some(1.0));
        let top_middle = g.node_index(2, g.ny);
        assert_eq!(map[2 * top_middle], Some(5.0));
        assert_eq!(map[2 * top_middle + 1], Some(0.0));
        let interior = g.node_index(2, 1);
        assert_eq!(map[2 * interior], None);
    }

    #[test]
    fn test_traction_loads_sum_to_total_force() {
        let g = grid();
        let loads = rift_walls().traction_loads(&g);
        let total_y: f64 = (0..g.node_count()).map(|n| loads[2 * n + 1]).sum();
        assert!((total_y - 6.48174e9 * g.width()).abs() < 1.0);
        let total_x: f64 = (0..g.node_count()).map(|n| loads[2 * n]).sum();
        assert_eq!(total_x, 0.0);
    }

    #[test]
    fn test_temperature_boundaries_validate() {
        let ok = TemperatureBoundaries {
            top: Some(293.15),
            bottom: Some(1603.15),
            ..Default::default()
        };
        assert!(ok.validate().is_ok());
        assert!(TemperatureBoundaries::default().validate().is_err());
        let negative = TemperatureBoundaries {
            top: Some(-1.0),
            ..Default::default()
        };
        assert!(negative.validate().is_err());
    }
}
