#![forbid(unsafe_code)]

pub mod align;
pub mod correspondence;
pub mod estimator;
pub mod icp;
pub mod ppf_registration;
pub mod ppf_search;
pub mod pyramid;
pub mod sac_ia;
pub mod transform;

pub use align::{align, AlignParams, AlignResult, AlignmentFailure};
pub use correspondence::{find_correspondences, Correspondence};
pub use estimator::{EstimationError, LmEstimator, SvdEstimator, TransformEstimator};
pub use icp::{icp_nonlinear, icp_point_to_point};
pub use ppf_registration::{ppf_register, PpfRegistrationError, PpfRegistrationParams};
pub use ppf_search::PpfHashMapSearch;
pub use pyramid::{PyramidError, PyramidFeatureHistogram};
pub use sac_ia::{sac_ia_align, sac_ia_align_seeded, SacIaParams};
pub use transform::{apply_transform, RigidTransform};
