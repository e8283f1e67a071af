use cloudreg_core::{PointCloud, PpfSignature};
use cloudreg_features::{canonical_frame, in_plane_angle, ppf_pair_feature};
use cloudreg_spatial::KdTree;
use nalgebra::{Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};

use crate::align::{fitness_score, AlignResult, AlignmentFailure};
use crate::ppf_search::PpfHashMapSearch;
use crate::transform::RigidTransform;

/// Configuration for PPF pose voting and clustering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PpfRegistrationParams {
    /// Every n-th scene point becomes a voting reference point.
    pub scene_reference_sampling_rate: usize,
    /// Two candidate poses agree when their translations are closer than
    /// this.
    pub position_clustering_threshold: f32,
    /// ... and their relative rotation angle (radians) is below this. Also
    /// the bin width of the in-plane rotation accumulator.
    pub rotation_clustering_threshold: f32,
}

impl Default for PpfRegistrationParams {
    fn default() -> Self {
        Self {
            scene_reference_sampling_rate: 5,
            position_clustering_threshold: 0.1,
            rotation_clustering_threshold: 20f32.to_radians(),
        }
    }
}

/// Input problems detected before voting starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PpfRegistrationError {
    /// A cloud is missing its normals channel.
    MissingNormals { cloud: &'static str },
}

impl std::fmt::Display for PpfRegistrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PpfRegistrationError::MissingNormals { cloud } => {
                write!(f, "{} cloud carries no normals channel", cloud)
            }
        }
    }
}

impl std::error::Error for PpfRegistrationError {}

/// Registers an oriented model cloud onto an oriented scene cloud by PPF
/// voting.
///
/// For every selected scene reference point, each other scene point forms a
/// pair feature that is looked up in the trained `search` table; every model
/// pair hit votes for (model reference index, in-plane rotation bin). The
/// peak of each reference's vote grid yields one candidate pose; candidates
/// are clustered by translation and rotation closeness and the heaviest
/// cluster's mean pose wins.
///
/// Returns the model-to-scene transform. When no reference point produces a
/// single vote the result is the identity with a failure flag.
///
/// # Panics
///
/// Panics when the sampling rate is zero or a clustering threshold is not a
/// positive finite float.
pub fn ppf_register(
    model: &PointCloud,
    scene: &PointCloud,
    search: &PpfHashMapSearch,
    params: &PpfRegistrationParams,
) -> Result<AlignResult, PpfRegistrationError> {
    assert!(
        params.scene_reference_sampling_rate > 0,
        "scene reference sampling rate must be positive"
    );
    assert!(
        params.position_clustering_threshold.is_finite()
            && params.position_clustering_threshold > 0.0,
        "position clustering threshold must be positive and finite"
    );
    assert!(
        params.rotation_clustering_threshold.is_finite()
            && params.rotation_clustering_threshold > 0.0,
        "rotation clustering threshold must be positive and finite"
    );

    let model_normals = model
        .normals
        .as_ref()
        .ok_or(PpfRegistrationError::MissingNormals { cloud: "model" })?;
    let scene_normals = scene
        .normals
        .as_ref()
        .ok_or(PpfRegistrationError::MissingNormals { cloud: "scene" })?;

    let n_model = search.model_size();
    if n_model == 0 || model.is_empty() || scene.is_empty() {
        return Ok(AlignResult::failed(
            RigidTransform::identity(),
            AlignmentFailure::NotEnoughCorrespondences,
        ));
    }

    let tau_r = params.rotation_clustering_threshold;
    let alpha_bins = (std::f32::consts::TAU / tau_r).ceil().max(1.0) as usize;

    let mut candidates: Vec<(RigidTransform, u32)> = Vec::new();
    let mut votes = vec![0u32; n_model * alpha_bins];
    // Sum of the actual in-plane angles behind each vote; the peak's mean is
    // used instead of the bin center, which avoids quantizing the pose.
    let mut alpha_sums = vec![0.0f32; n_model * alpha_bins];
    let mut references = 0usize;

    for r in (0..scene.len()).step_by(params.scene_reference_sampling_rate) {
        if !scene.is_finite_at(r) {
            continue;
        }
        references += 1;

        let reference = scene.point(r);
        let reference_normal = scene_normals.get(r);
        let frame_sg = canonical_frame(reference, reference_normal);

        votes.fill(0);
        alpha_sums.fill(0.0);

        for i in 0..scene.len() {
            if i == r || !scene.is_finite_at(i) {
                continue;
            }
            let feature = match ppf_pair_feature(
                reference,
                reference_normal,
                scene.point(i),
                scene_normals.get(i),
            ) {
                Some((f1, f2, f3, f4)) => PpfSignature {
                    f1,
                    f2,
                    f3,
                    f4,
                    alpha_m: 0.0,
                },
                None => continue,
            };

            let matches = search.query(&feature);
            if matches.is_empty() {
                continue;
            }

            let alpha_s = in_plane_angle(&frame_sg, scene.point(i));
            for &(mi, mj) in matches {
                let alpha = wrap_angle(alpha_s - search.alpha_m(mi as usize, mj as usize));
                let bin = (((alpha + std::f32::consts::PI) / tau_r) as usize).min(alpha_bins - 1);
                let slot = mi as usize * alpha_bins + bin;
                votes[slot] += 1;
                alpha_sums[slot] += alpha;
            }
        }

        let (peak_index, &peak_votes) = votes
            .iter()
            .enumerate()
            .max_by_key(|(_, &v)| v)
            .expect("vote grid is never empty");
        if peak_votes == 0 {
            continue;
        }

        let model_reference = peak_index / alpha_bins;
        if !model.is_finite_at(model_reference) {
            continue;
        }
        let alpha_star = alpha_sums[peak_index] / peak_votes as f32;

        let frame_mg = canonical_frame(
            model.point(model_reference),
            model_normals.get(model_reference),
        );
        let spin = Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(&Vector3::x_axis(), alpha_star),
        );
        let pose = frame_sg.inverse() * spin * frame_mg;
        candidates.push((RigidTransform::from_isometry(&pose), peak_votes));
    }

    if candidates.is_empty() {
        return Ok(AlignResult::failed(
            RigidTransform::identity(),
            AlignmentFailure::NotEnoughCorrespondences,
        ));
    }

    let transform = cluster_poses(
        candidates,
        params.position_clustering_threshold,
        params.rotation_clustering_threshold,
    );

    let scene_tree = KdTree::build(scene);
    Ok(AlignResult {
        transform,
        fitness: fitness_score(model, &scene_tree, &transform, f32::INFINITY),
        converged: true,
        iterations: references,
        failure: None,
    })
}

/// Greedy pose clustering: candidates join the first cluster (in descending
/// vote order) whose anchor agrees in translation and rotation; the heaviest
/// cluster is averaged into the result.
fn cluster_poses(
    mut candidates: Vec<(RigidTransform, u32)>,
    position_threshold: f32,
    rotation_threshold: f32,
) -> RigidTransform {
    candidates.sort_by(|a, b| b.1.cmp(&a.1));

    struct Cluster {
        anchor: RigidTransform,
        members: Vec<RigidTransform>,
        weight: u64,
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for (pose, vote_count) in candidates {
        match clusters.iter_mut().find(|c| {
            c.anchor.translation_distance(&pose) < position_threshold
                && c.anchor.rotation_angle_to(&pose) < rotation_threshold
        }) {
            Some(cluster) => {
                cluster.members.push(pose);
                cluster.weight += u64::from(vote_count);
            }
            None => clusters.push(Cluster {
                anchor: pose,
                members: vec![pose],
                weight: u64::from(vote_count),
            }),
        }
    }

    let heaviest = clusters
        .iter()
        .max_by_key(|c| c.weight)
        .expect("at least one cluster exists");
    average_poses(&heaviest.members)
}

/// Component-wise translation mean plus a hemisphere-aligned quaternion mean.
fn average_poses(poses: &[RigidTransform]) -> RigidTransform {
    let count = poses.len() as f32;

    let mut translation = [0.0f32; 3];
    for pose in poses {
        for axis in 0..3 {
            translation[axis] += pose.translation[axis];
        }
    }
    for t in &mut translation {
        *t /= count;
    }

    let first = poses[0].to_isometry().rotation;
    let mut accum = Quaternion::new(0.0f32, 0.0, 0.0, 0.0);
    for pose in poses {
        let mut q = pose.to_isometry().rotation.into_inner();
        if q.dot(&first.into_inner()) < 0.0 {
            q = -q;
        }
        accum += q;
    }
    let mean_rotation = UnitQuaternion::from_quaternion(accum);

    let iso = Isometry3::from_parts(
        Translation3::new(translation[0], translation[1], translation[2]),
        mean_rotation,
    );
    RigidTransform::from_isometry(&iso)
}

fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % std::f32::consts::TAU;
    if a <= -std::f32::consts::PI {
        a += std::f32::consts::TAU;
    } else if a > std::f32::consts::PI {
        a -= std::f32::consts::TAU;
    }
    a
}
