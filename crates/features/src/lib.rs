#![forbid(unsafe_code)]

pub mod fpfh;
pub mod ppf;

pub use fpfh::{compute_fpfh, pair_features};
pub use ppf::{canonical_frame, compute_ppf, in_plane_angle, ppf_pair_feature, PpfFeatureCloud};
