use cloudreg_core::PointCloud;
use cloudreg_spatial::KdTree;

use crate::align::{align, AlignParams, AlignResult};
use crate::estimator::{LmEstimator, SvdEstimator};

/// Iterative Closest Point with the closed-form SVD rigid fit per iteration.
pub fn icp_point_to_point(
    source: &PointCloud,
    target: &PointCloud,
    params: &AlignParams,
) -> AlignResult {
    let tree = KdTree::build(target);
    align(source, target, &tree, &SvdEstimator, params)
}

/// Non-linear Iterative Closest Point: each iteration refits the current
/// correspondences with a Levenberg-Marquardt solve over a 6-parameter twist.
///
/// Convergence criteria and configuration match [`icp_point_to_point`]; the
/// two differ only in the per-iteration estimator.
pub fn icp_nonlinear(source: &PointCloud, target: &PointCloud, params: &AlignParams) -> AlignResult {
    let tree = KdTree::build(target);
    align(source, target, &tree, &LmEstimator::default(), params)
}
