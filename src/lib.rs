pub mod comm;
pub mod config;
pub mod constants;
pub mod error;
pub mod json_parser;
pub mod linalg;
pub mod material;
pub mod math_utils;
pub mod mesh;
pub mod rheology;
pub mod shapes;
pub mod sim;
pub mod sim_op;
pub mod stokes;
pub mod surface;
pub mod swarm;
pub mod temp_utils;
pub mod thermal;

pub use error::{RiftError, RiftResult};
