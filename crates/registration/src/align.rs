use cloudreg_core::PointCloud;
use cloudreg_spatial::KdTree;

use crate::correspondence::find_correspondences;
use crate::estimator::TransformEstimator;
use crate::transform::{apply_transform, RigidTransform};

/// Configuration shared by every iterative alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignParams {
    pub max_iterations: usize,
    /// Alignment stops once the incremental transform's Frobenius distance
    /// to identity drops below this.
    pub transformation_epsilon: f32,
    pub max_correspondence_distance: f32,
    pub initial_transform: RigidTransform,
}

impl Default for AlignParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            transformation_epsilon: 1e-8,
            max_correspondence_distance: f32::INFINITY,
            initial_transform: RigidTransform::identity(),
        }
    }
}

/// Why an alignment gave up instead of converging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentFailure {
    /// Fewer than 3 correspondences survived the distance gate (or an input
    /// cloud was empty / features mismatched).
    NotEnoughCorrespondences,
    /// The transform estimator failed on this iteration's correspondences.
    NumericalFailure,
}

impl std::fmt::Display for AlignmentFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentFailure::NotEnoughCorrespondences => {
                write!(f, "not enough correspondences to estimate a transform")
            }
            AlignmentFailure::NumericalFailure => {
                write!(f, "transform estimation failed numerically")
            }
        }
    }
}

/// The outcome of an alignment. Failures are reported through the flag and
/// reason code; the transform always holds the last usable estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignResult {
    pub transform: RigidTransform,
    /// Mean squared distance of accepted correspondences under the final
    /// transform; lower is better. Infinite when nothing matched.
    pub fitness: f32,
    pub converged: bool,
    pub iterations: usize,
    pub failure: Option<AlignmentFailure>,
}

impl AlignResult {
    pub(crate) fn failed(transform: RigidTransform, failure: AlignmentFailure) -> Self {
        Self {
            transform,
            fitness: f32::INFINITY,
            converged: false,
            iterations: 0,
            failure: Some(failure),
        }
    }
}

/// The generic alignment loop: alternate correspondence search against
/// `target_tree` with rigid-fit estimation until the incremental transform
/// settles or the iteration budget runs out.
///
/// The loop never unwinds on bad data: too few correspondences or a failed
/// estimate terminate with the last transform preserved and a reason code.
pub fn align<E: TransformEstimator>(
    source: &PointCloud,
    target: &PointCloud,
    target_tree: &KdTree,
    estimator: &E,
    params: &AlignParams,
) -> AlignResult {
    assert!(
        params.transformation_epsilon >= 0.0,
        "transformation epsilon must be non-negative"
    );

    let mut current = params.initial_transform;

    if source.is_empty() || target_tree.is_empty() {
        return AlignResult::failed(current, AlignmentFailure::NotEnoughCorrespondences);
    }

    let mut iterations = 0;
    let mut failure = None;

    loop {
        let moved = apply_transform(source, &current);
        let correspondences =
            find_correspondences(&moved, target_tree, params.max_correspondence_distance);

        if correspondences.len() < 3 {
            failure = Some(AlignmentFailure::NotEnoughCorrespondences);
            break;
        }

        let delta = match estimator.estimate(&moved, target, &correspondences) {
            Ok(delta) => delta,
            Err(_) => {
                failure = Some(AlignmentFailure::NumericalFailure);
                break;
            }
        };

        current = current.compose(&delta);
        iterations += 1;

        if delta.deviation_from_identity() < params.transformation_epsilon
            || iterations >= params.max_iterations
        {
            break;
        }
    }

    AlignResult {
        transform: current,
        fitness: fitness_score(
            source,
            target_tree,
            &current,
            params.max_correspondence_distance,
        ),
        converged: failure.is_none(),
        iterations,
        failure,
    }
}

/// Mean squared distance of accepted correspondences under `transform`.
pub(crate) fn fitness_score(
    source: &PointCloud,
    target_tree: &KdTree,
    transform: &RigidTransform,
    max_distance: f32,
) -> f32 {
    let moved = apply_transform(source, transform);
    let correspondences = find_correspondences(&moved, target_tree, max_distance);
    if correspondences.is_empty() {
        return f32::INFINITY;
    }
    correspondences.iter().map(|c| c.distance_sq).sum::<f32>() / correspondences.len() as f32
}
