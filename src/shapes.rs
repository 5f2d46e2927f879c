use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Geometric region used for initial material layout and temperature node sets.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Region {
    /// Horizontal band, `bottom <= y <= top`.
    Layer { top: f64, bottom: f64 },
    Box { min: [f64; 2], max: [f64; 2] },
}

impl Region {
    pub fn contains(&self, point: DVec2) -> bool {
        match *self {
            Region::Layer { top, bottom } => point.y >= bottom && point.y <= top,
            Region::Box { min, max } => {
                point.x >= min[0] && point.x <= max[0] && point.y >= min[1] && point.y <= max[1]
            }
        }
    }
}
