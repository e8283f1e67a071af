#![forbid(unsafe_code)]

pub mod estimate;

pub use estimate::{estimate_normals, estimate_normals_with_viewpoint, Neighborhood};
