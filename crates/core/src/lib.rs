#![forbid(unsafe_code)]

pub mod cloud;
pub mod point;
pub mod representation;
pub mod signature;
pub mod traits;

pub use cloud::{Normals, PointCloud};
pub use point::{PointNormal, PointXYZ, PointXYZI};
pub use representation::{
    CustomRepresentation, FeatureRepresentation, PointRepresentation, PositionRepresentation,
};
pub use signature::{FeatureLayout, FieldInfo, FpfhSignature33, PpfSignature, VfhSignature308};
pub use traits::{HasIntensity, HasNormal, HasPosition};
