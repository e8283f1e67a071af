use cloudreg_core::{FeatureLayout, FeatureRepresentation, PointCloud, PointRepresentation};
use cloudreg_spatial::{FeatureKdTree, KdTree};
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::align::{fitness_score, AlignResult, AlignmentFailure};
use crate::correspondence::Correspondence;
use crate::estimator::{SvdEstimator, TransformEstimator};
use crate::transform::{apply_transform, RigidTransform};

/// Configuration for Sample Consensus Initial Alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SacIaParams {
    /// Minimum pairwise 3D distance between the sampled source points.
    pub min_sample_distance: f32,
    /// Distance cap used by the Huber scoring of candidate transforms.
    pub max_correspondence_distance: f32,
    pub max_iterations: usize,
    /// Number of source points sampled per iteration.
    pub num_samples: usize,
    /// Each sample picks uniformly among this many feature-space nearest
    /// target candidates, which keeps the search diverse instead of always
    /// committing to the arg-min.
    pub k_correspondences: usize,
}

impl Default for SacIaParams {
    fn default() -> Self {
        Self {
            min_sample_distance: 0.0,
            max_correspondence_distance: f32::INFINITY,
            max_iterations: 500,
            num_samples: 3,
            k_correspondences: 10,
        }
    }
}

/// SAC-IA with a thread-local random seed. For reproducible runs use
/// [`sac_ia_align_seeded`].
pub fn sac_ia_align<F, const D: usize>(
    source: &PointCloud,
    target: &PointCloud,
    source_features: &[F],
    target_features: &[F],
    params: &SacIaParams,
) -> AlignResult
where
    F: FeatureLayout,
{
    let seed = rand::thread_rng().next_u64();
    sac_ia_align_seeded::<F, D>(source, target, source_features, target_features, params, seed)
}

/// Coarse alignment by feature-sampled RANSAC.
///
/// Each iteration samples `num_samples` well-separated source points, matches
/// each to a random pick among its `k_correspondences` feature-space nearest
/// target points, fits a rigid transform by SVD, and scores it with a
/// truncated Huber loss over the whole transformed source. The lowest-loss
/// transform over `max_iterations` wins.
///
/// Deterministic for a fixed seed; the candidate pick is the only stochastic
/// input.
///
/// # Panics
///
/// Panics when the feature slices do not match their clouds, `num_samples`
/// is below 3, `k_correspondences` is zero, or a distance parameter is
/// negative. `D` must equal the feature layout's float count.
pub fn sac_ia_align_seeded<F, const D: usize>(
    source: &PointCloud,
    target: &PointCloud,
    source_features: &[F],
    target_features: &[F],
    params: &SacIaParams,
    seed: u64,
) -> AlignResult
where
    F: FeatureLayout,
{
    assert_eq!(
        source_features.len(),
        source.len(),
        "source features must match source cloud length"
    );
    assert_eq!(
        target_features.len(),
        target.len(),
        "target features must match target cloud length"
    );
    assert!(params.num_samples >= 3, "need at least 3 samples per draw");
    assert!(params.k_correspondences > 0, "k_correspondences must be positive");
    assert!(
        params.min_sample_distance >= 0.0,
        "min_sample_distance must be non-negative"
    );
    assert!(
        params.max_correspondence_distance > 0.0,
        "max_correspondence_distance must be positive"
    );

    if source.is_empty() || target.is_empty() || source.len() < params.num_samples {
        return AlignResult::failed(
            RigidTransform::identity(),
            AlignmentFailure::NotEnoughCorrespondences,
        );
    }

    let representation = FeatureRepresentation::<F>::default();
    let feature_tree = FeatureKdTree::<D>::build(target_features, &representation);
    let target_tree = KdTree::build(target);

    if feature_tree.is_empty() || target_tree.is_empty() {
        return AlignResult::failed(
            RigidTransform::identity(),
            AlignmentFailure::NotEnoughCorrespondences,
        );
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut query = [0.0f32; D];
    let mut best: Option<(f32, RigidTransform)> = None;

    for _ in 0..params.max_iterations {
        let samples = match sample_distant_indices(
            source,
            params.num_samples,
            params.min_sample_distance,
            &mut rng,
        ) {
            Some(s) => s,
            None => continue,
        };

        let mut correspondences = Vec::with_capacity(params.num_samples);
        for &si in &samples {
            representation.vectorize(&source_features[si], &mut query);
            if !query.iter().all(|v| v.is_finite()) {
                break;
            }
            let candidates = feature_tree.nearest_k(&query, params.k_correspondences);
            if candidates.is_empty() {
                break;
            }
            let (target_index, _) = candidates[rng.gen_range(0..candidates.len())];
            correspondences.push(Correspondence {
                source_index: si,
                target_index,
                distance_sq: 0.0,
            });
        }
        if correspondences.len() < params.num_samples {
            continue;
        }

        let candidate = match SvdEstimator.estimate(source, target, &correspondences) {
            Ok(t) => t,
            Err(_) => continue,
        };

        let loss = huber_alignment_loss(
            source,
            &target_tree,
            &candidate,
            params.max_correspondence_distance,
        );
        if best.as_ref().map_or(true, |(b, _)| loss < *b) {
            best = Some((loss, candidate));
        }
    }

    match best {
        Some((_, transform)) => AlignResult {
            transform,
            fitness: fitness_score(
                source,
                &target_tree,
                &transform,
                params.max_correspondence_distance,
            ),
            converged: true,
            iterations: params.max_iterations,
            failure: None,
        },
        None => AlignResult::failed(
            RigidTransform::identity(),
            AlignmentFailure::NotEnoughCorrespondences,
        ),
    }
}

/// Greedily draws `count` finite source indices whose pairwise distances are
/// all at least `min_distance`, giving up after a bounded number of tries.
fn sample_distant_indices(
    cloud: &PointCloud,
    count: usize,
    min_distance: f32,
    rng: &mut StdRng,
) -> Option<Vec<usize>> {
    let n = cloud.len();
    let min_sq = min_distance * min_distance;
    let budget = 100 * count;

    let mut chosen: Vec<usize> = Vec::with_capacity(count);
    let mut tries = 0;
    while chosen.len() < count {
        if tries >= budget {
            return None;
        }
        tries += 1;

        let idx = rng.gen_range(0..n);
        if chosen.contains(&idx) {
            continue;
        }
        let p = cloud.point(idx);
        if !p.iter().all(|v| v.is_finite()) {
            continue;
        }
        let far_enough = chosen.iter().all(|&c| {
            let q = cloud.point(c);
            let dx = p[0] - q[0];
            let dy = p[1] - q[1];
            let dz = p[2] - q[2];
            dx * dx + dy * dy + dz * dz >= min_sq
        });
        if far_enough {
            chosen.push(idx);
        }
    }
    Some(chosen)
}

/// Truncated Huber loss of the transformed source against the target.
///
/// Every finite source point contributes: its nearest-neighbour squared
/// distance is capped at `max_distance^2` (points with no neighbour in reach
/// pay the full cap), then passed through a Huber penalty with threshold
/// `(max_distance / 2)^2`.
fn huber_alignment_loss(
    source: &PointCloud,
    target_tree: &KdTree,
    transform: &RigidTransform,
    max_distance: f32,
) -> f32 {
    let moved = apply_transform(source, transform);
    let cap_sq = max_distance * max_distance;
    let threshold_sq = (max_distance * 0.5) * (max_distance * 0.5);

    let mut loss = 0.0f32;
    for i in 0..moved.len() {
        let p = moved.point(i);
        if !p.iter().all(|v| v.is_finite()) {
            continue;
        }
        let d_sq = match target_tree.nearest_one(&p) {
            Some((_, d)) => d.min(cap_sq),
            None => cap_sq,
        };
        loss += huber(d_sq, threshold_sq);
    }
    loss
}

fn huber(sq_dist: f32, threshold_sq: f32) -> f32 {
    if sq_dist <= threshold_sq {
        sq_dist
    } else {
        2.0 * (threshold_sq * sq_dist).sqrt() - threshold_sq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudreg_core::FpfhSignature33;
    use cloudreg_features::compute_fpfh;
    use cloudreg_normals::{estimate_normals, Neighborhood};

    /// Golden-angle spiral over a bumpy sphere: every neighborhood differs,
    /// so FPFH descriptors are discriminative.
    fn bumpy_sphere(n: usize) -> PointCloud {
        let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        let mut z = Vec::with_capacity(n);
        for i in 0..n {
            let t = (i as f32 + 0.5) / n as f32;
            let inclination = (1.0 - 2.0 * t).acos();
            let azimuth = golden * i as f32;
            // Bump pattern with azimuthal period 2*pi, so the surface has no
            // rotational self-symmetry to confuse the alignment.
            let r = 1.0
                + 0.1 * azimuth.sin() * (3.0 * inclination).cos()
                + 0.05 * (2.0 * azimuth + 1.0).sin() * inclination.sin();
            x.push(r * inclination.sin() * azimuth.cos());
            y.push(r * inclination.sin() * azimuth.sin());
            z.push(r * inclination.cos());
        }
        PointCloud::from_xyz(x, y, z)
    }

    fn fpfh_of(cloud: &PointCloud) -> Vec<FpfhSignature33> {
        let normals = estimate_normals(cloud, Neighborhood::Knn(12));
        compute_fpfh(cloud, &normals, 0.4)
    }

    fn rigid(angle_z: f32, translation: [f32; 3]) -> RigidTransform {
        let (s, c) = angle_z.sin_cos();
        RigidTransform {
            rotation: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
            translation,
        }
    }

    #[test]
    fn recovers_gross_misalignment() {
        // The classic coarse-alignment setup: a large offset plus a quarter
        // turn, far outside any ICP convergence basin.
        let target = bumpy_sphere(220);
        let target_normals = estimate_normals(&target, Neighborhood::Knn(12));
        let oriented_target = target.clone().with_normals(target_normals);

        let truth = rigid(std::f32::consts::FRAC_PI_2, [10.0, 0.0, 0.0]);
        // source = truth applied to target, so aligning source onto target
        // must recover the inverse of truth. Normals travel with the
        // transform; re-estimating them against a displaced viewpoint would
        // flip orientations and desynchronize the descriptors.
        let source = apply_transform(&oriented_target, &truth);

        let source_features =
            compute_fpfh(&source, source.normals.as_ref().unwrap(), 0.4);
        let target_features =
            compute_fpfh(&target, oriented_target.normals.as_ref().unwrap(), 0.4);

        let params = SacIaParams {
            min_sample_distance: 0.3,
            max_correspondence_distance: 0.5,
            max_iterations: 800,
            k_correspondences: 3,
            ..SacIaParams::default()
        };
        let result = sac_ia_align_seeded::<_, 33>(
            &source,
            &target,
            &source_features,
            &target_features,
            &params,
            7,
        );

        assert!(result.converged);
        assert!(
            result.fitness < 5e-3,
            "coarse alignment fitness too high: {}",
            result.fitness
        );

        let expected = truth.inverse();
        assert!(
            result.transform.translation_distance(&expected) < 0.5,
            "translation error {}",
            result.transform.translation_distance(&expected)
        );
        assert!(
            result.transform.rotation_angle_to(&expected) < 0.35,
            "rotation error {} rad",
            result.transform.rotation_angle_to(&expected)
        );
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let target = bumpy_sphere(120);
        let source = apply_transform(&target, &rigid(0.6, [2.0, -1.0, 0.5]));
        let source_features = fpfh_of(&source);
        let target_features = fpfh_of(&target);

        let params = SacIaParams {
            min_sample_distance: 0.3,
            max_correspondence_distance: 0.5,
            max_iterations: 100,
            ..SacIaParams::default()
        };
        let a = sac_ia_align_seeded::<_, 33>(
            &source,
            &target,
            &source_features,
            &target_features,
            &params,
            42,
        );
        let b = sac_ia_align_seeded::<_, 33>(
            &source,
            &target,
            &source_features,
            &target_features,
            &params,
            42,
        );
        assert_eq!(a.transform, b.transform);
        assert_eq!(a.fitness, b.fitness);
    }

    #[test]
    fn sample_spacing_is_honoured() {
        let cloud = bumpy_sphere(100);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let samples = sample_distant_indices(&cloud, 3, 0.5, &mut rng).unwrap();
            for a in 0..samples.len() {
                for b in (a + 1)..samples.len() {
                    let p = cloud.point(samples[a]);
                    let q = cloud.point(samples[b]);
                    let d = ((p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2) + (p[2] - q[2]).powi(2))
                        .sqrt();
                    assert!(d >= 0.5, "samples too close: {}", d);
                }
            }
        }
    }

    #[test]
    fn impossible_spacing_gives_up() {
        let cloud = bumpy_sphere(50);
        let mut rng = StdRng::seed_from_u64(1);
        // The cloud has diameter ~2.2; no three points are 100 apart.
        assert!(sample_distant_indices(&cloud, 3, 100.0, &mut rng).is_none());
    }

    #[test]
    fn empty_input_fails_cleanly() {
        let cloud = bumpy_sphere(50);
        let features = fpfh_of(&cloud);
        let result = sac_ia_align_seeded::<_, 33>(
            &PointCloud::new(),
            &cloud,
            &[],
            &features,
            &SacIaParams::default(),
            0,
        );
        assert!(!result.converged);
        assert_eq!(
            result.failure,
            Some(AlignmentFailure::NotEnoughCorrespondences)
        );
        assert!(result.transform.is_identity(0.0));
    }

    #[test]
    fn huber_is_quadratic_then_linear() {
        let t_sq = 4.0;
        assert_eq!(huber(1.0, t_sq), 1.0);
        assert_eq!(huber(4.0, t_sq), 4.0);
        // Beyond the threshold the slope in distance is constant.
        let h9 = huber(9.0, t_sq);
        assert!((h9 - (2.0 * 6.0 - 4.0)).abs() < 1e-6);
        assert!(h9 < 9.0, "tail must grow slower than squared distance");
    }

    #[test]
    #[should_panic]
    fn mismatched_features_panic() {
        let cloud = bumpy_sphere(10);
        let features = fpfh_of(&cloud);
        let _ = sac_ia_align_seeded::<_, 33>(
            &cloud,
            &cloud,
            &features[..5],
            &features,
            &SacIaParams::default(),
            0,
        );
    }
}
