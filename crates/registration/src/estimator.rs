use cloudreg_core::PointCloud;
use nalgebra::{Matrix3, Matrix3x6, Matrix6, Rotation3, Vector3, Vector6, SVD};

use crate::correspondence::Correspondence;
use crate::transform::RigidTransform;

/// Why a rigid-fit estimate could not be produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    /// Fewer than 3 correspondences were supplied.
    NotEnoughCorrespondences { found: usize },
    /// The matched points do not constrain a unique rotation (collinear or
    /// coincident geometry).
    DegenerateGeometry,
    /// The iterative solver produced a non-finite update.
    Diverged,
}

impl std::fmt::Display for EstimationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimationError::NotEnoughCorrespondences { found } => {
                write!(f, "need at least 3 correspondences, found {}", found)
            }
            EstimationError::DegenerateGeometry => {
                write!(f, "correspondences do not constrain a unique rigid fit")
            }
            EstimationError::Diverged => write!(f, "solver produced a non-finite update"),
        }
    }
}

impl std::error::Error for EstimationError {}

/// Estimates the rigid transform that best maps matched source points onto
/// their target points.
pub trait TransformEstimator {
    fn estimate(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        correspondences: &[Correspondence],
    ) -> Result<RigidTransform, EstimationError>;
}

/// Closed-form point-to-point fit via SVD of the cross-covariance matrix.
///
/// `R = V * diag(1, 1, det(V U^T)) * U^T` (the determinant repair keeps the
/// result a proper rotation), `t = centroid_t - R * centroid_s`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SvdEstimator;

impl TransformEstimator for SvdEstimator {
    fn estimate(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        correspondences: &[Correspondence],
    ) -> Result<RigidTransform, EstimationError> {
        if correspondences.len() < 3 {
            return Err(EstimationError::NotEnoughCorrespondences {
                found: correspondences.len(),
            });
        }

        let n = correspondences.len() as f32;
        let mut src_centroid = Vector3::zeros();
        let mut tgt_centroid = Vector3::zeros();
        for c in correspondences {
            src_centroid += Vector3::from(source.point(c.source_index));
            tgt_centroid += Vector3::from(target.point(c.target_index));
        }
        src_centroid /= n;
        tgt_centroid /= n;

        let mut h = Matrix3::<f32>::zeros();
        for c in correspondences {
            let s = Vector3::from(source.point(c.source_index)) - src_centroid;
            let t = Vector3::from(target.point(c.target_index)) - tgt_centroid;
            h += s * t.transpose();
        }

        let svd = SVD::new(h, true, true);
        let u = svd.u.ok_or(EstimationError::DegenerateGeometry)?;
        let mut v_t = svd.v_t.ok_or(EstimationError::DegenerateGeometry)?;

        // A rank <= 1 covariance (coincident or collinear points) leaves the
        // rotation underdetermined.
        let mut sv = [
            svd.singular_values[0].abs(),
            svd.singular_values[1].abs(),
            svd.singular_values[2].abs(),
        ];
        sv.sort_unstable_by(|a, b| b.total_cmp(a));
        if !sv[0].is_finite() || sv[1] <= 1e-7 * sv[0].max(1e-12) {
            return Err(EstimationError::DegenerateGeometry);
        }

        let det = (v_t.transpose() * u.transpose()).determinant();
        if det < 0.0 {
            for c in 0..3 {
                v_t[(2, c)] = -v_t[(2, c)];
            }
        }

        let rotation = v_t.transpose() * u.transpose();
        let translation = tgt_centroid - rotation * src_centroid;

        let result = RigidTransform {
            rotation: [
                [rotation[(0, 0)], rotation[(0, 1)], rotation[(0, 2)]],
                [rotation[(1, 0)], rotation[(1, 1)], rotation[(1, 2)]],
                [rotation[(2, 0)], rotation[(2, 1)], rotation[(2, 2)]],
            ],
            translation: [translation.x, translation.y, translation.z],
        };

        if !result
            .rotation
            .iter()
            .flatten()
            .chain(result.translation.iter())
            .all(|v| v.is_finite())
        {
            return Err(EstimationError::Diverged);
        }

        Ok(result)
    }
}

/// Iterative point-to-point fit via Levenberg-Marquardt over a 6-parameter
/// twist (rotation vector + translation).
///
/// Each step solves the damped normal equations `(J^T J + lambda diag) d =
/// -J^T e` in f64 and applies the update through Rodrigues' formula. The
/// damping factor shrinks on accepted steps and grows on rejected ones.
#[derive(Debug, Clone, Copy)]
pub struct LmEstimator {
    pub max_iterations: usize,
    /// Terminate when the parameter update norm drops below this.
    pub parameter_epsilon: f64,
    pub initial_lambda: f64,
}

impl Default for LmEstimator {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            parameter_epsilon: 1e-10,
            initial_lambda: 1e-3,
        }
    }
}

impl TransformEstimator for LmEstimator {
    fn estimate(
        &self,
        source: &PointCloud,
        target: &PointCloud,
        correspondences: &[Correspondence],
    ) -> Result<RigidTransform, EstimationError> {
        if correspondences.len() < 3 {
            return Err(EstimationError::NotEnoughCorrespondences {
                found: correspondences.len(),
            });
        }

        let pairs: Vec<(Vector3<f64>, Vector3<f64>)> = correspondences
            .iter()
            .map(|c| {
                let s = source.point(c.source_index);
                let t = target.point(c.target_index);
                (
                    Vector3::new(s[0] as f64, s[1] as f64, s[2] as f64),
                    Vector3::new(t[0] as f64, t[1] as f64, t[2] as f64),
                )
            })
            .collect();

        let mut rotation = Matrix3::<f64>::identity();
        let mut translation = Vector3::<f64>::zeros();
        let mut error = squared_error(&pairs, &rotation, &translation);
        let mut lambda = self.initial_lambda;

        if !error.is_finite() {
            return Err(EstimationError::Diverged);
        }

        'outer: for _ in 0..self.max_iterations {
            let mut ata = Matrix6::<f64>::zeros();
            let mut atb = Vector6::<f64>::zeros();

            for (s, t) in &pairs {
                let p = rotation * s + translation;
                let e = p - t;

                // J = [ -[p]x | I ]: the residual under a left-multiplied
                // twist (omega, v) is (I + [omega]x) p + v - t.
                let mut jac = Matrix3x6::<f64>::zeros();
                jac.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-skew(&p)));
                jac.fixed_view_mut::<3, 3>(0, 3)
                    .copy_from(&Matrix3::identity());

                ata += jac.transpose() * jac;
                atb += jac.transpose() * e;
            }

            // Inner damping loop: grow lambda until a step reduces the error.
            let mut rejected = 0;
            loop {
                let mut damped = ata;
                for i in 0..6 {
                    damped[(i, i)] += lambda * ata[(i, i)].max(1e-12);
                }

                let delta = match damped.cholesky() {
                    Some(chol) => chol.solve(&(-atb)),
                    None => {
                        return Err(EstimationError::DegenerateGeometry);
                    }
                };

                if !delta.iter().all(|v| v.is_finite()) {
                    return Err(EstimationError::Diverged);
                }

                let omega = Vector3::new(delta[0], delta[1], delta[2]);
                let v = Vector3::new(delta[3], delta[4], delta[5]);
                let step = Rotation3::from_scaled_axis(omega).into_inner();

                let candidate_rotation = step * rotation;
                let candidate_translation = step * translation + v;
                let candidate_error = squared_error(&pairs, &candidate_rotation, &candidate_translation);

                if !candidate_error.is_finite() {
                    return Err(EstimationError::Diverged);
                }

                if candidate_error <= error {
                    rotation = candidate_rotation;
                    translation = candidate_translation;
                    error = candidate_error;
                    lambda = (lambda * 0.5).max(1e-12);
                    if delta.norm() < self.parameter_epsilon {
                        break 'outer;
                    }
                    break;
                }

                lambda *= 4.0;
                rejected += 1;
                if rejected >= 8 {
                    // Stalled: keep the best parameters found so far.
                    break 'outer;
                }
            }
        }

        let result = RigidTransform {
            rotation: [
                [
                    rotation[(0, 0)] as f32,
                    rotation[(0, 1)] as f32,
                    rotation[(0, 2)] as f32,
                ],
                [
                    rotation[(1, 0)] as f32,
                    rotation[(1, 1)] as f32,
                    rotation[(1, 2)] as f32,
                ],
                [
                    rotation[(2, 0)] as f32,
                    rotation[(2, 1)] as f32,
                    rotation[(2, 2)] as f32,
                ],
            ],
            translation: [
                translation.x as f32,
                translation.y as f32,
                translation.z as f32,
            ],
        };

        if !result
            .rotation
            .iter()
            .flatten()
            .chain(result.translation.iter())
            .all(|v| v.is_finite())
        {
            return Err(EstimationError::Diverged);
        }

        Ok(result)
    }
}

fn squared_error(
    pairs: &[(Vector3<f64>, Vector3<f64>)],
    rotation: &Matrix3<f64>,
    translation: &Vector3<f64>,
) -> f64 {
    pairs
        .iter()
        .map(|(s, t)| (rotation * s + translation - t).norm_squared())
        .sum()
}

fn skew(p: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -p.z, p.y, //
        p.z, 0.0, -p.x, //
        -p.y, p.x, 0.0,
    )
}
