pub mod boundary;
pub mod fields;
pub mod grid;
pub mod properties;

pub use boundary::{
    BoundaryCondition, DirichletMap, NodeSelector, NodeSetCondition, TemperatureBoundaries,
    VelocityBoundaries, WallConditions,
};
pub use fields::{MeshFields, StrainRate};
pub use grid::{Grid, Wall};
pub use properties::ElementProperties;
