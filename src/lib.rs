//! Rigid 3D point-cloud registration.
//!
//! The workspace splits into focused crates re-exported here: containers and
//! point representations (`cloudreg-core`), nearest-neighbour indices
//! (`cloudreg-spatial`), normal estimation (`cloudreg-normals`), feature
//! descriptors (`cloudreg-features`), and the registration algorithms
//! themselves (`cloudreg-registration`): ICP and ICP-NL, SAC-IA coarse
//! alignment, pyramid feature-histogram matching, and PPF pose voting.

#![forbid(unsafe_code)]

pub use cloudreg_core::*;
pub use cloudreg_features::*;
pub use cloudreg_normals::*;
pub use cloudreg_registration::*;
pub use cloudreg_spatial::*;
