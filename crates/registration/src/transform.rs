use cloudreg_core::{Normals, PointCloud};
use nalgebra::{Isometry3, Matrix3, Matrix4, Rotation3, Translation3, UnitQuaternion, Vector3};

/// A rigid motion: rotation (row-major 3x3, orthonormal with det +1) followed
/// by translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: [[f32; 3]; 3],
    pub translation: [f32; 3],
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    pub fn is_identity(&self, eps: f32) -> bool {
        let id = Self::identity();
        for r in 0..3 {
            for c in 0..3 {
                if (self.rotation[r][c] - id.rotation[r][c]).abs() > eps {
                    return false;
                }
            }
        }
        self.translation.iter().all(|t| t.abs() <= eps)
    }

    /// R * p + t
    pub fn apply_to_point(&self, p: &[f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Rotation only, for direction vectors (normals).
    pub fn apply_to_vector(&self, v: &[f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
            r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
            r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
        ]
    }

    /// Compose two transforms: apply `self` first, then `other`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        let r_self = mat3_from_rows(&self.rotation);
        let r_other = mat3_from_rows(&other.rotation);
        let t_self = Vector3::from(self.translation);
        let t_other = Vector3::from(other.translation);

        let r_new = r_other * r_self;
        let t_new = r_other * t_self + t_other;

        RigidTransform {
            rotation: mat3_to_rows(&r_new),
            translation: [t_new.x, t_new.y, t_new.z],
        }
    }

    pub fn inverse(&self) -> RigidTransform {
        // R^T, -R^T t
        let r = mat3_from_rows(&self.rotation).transpose();
        let t = -(r * Vector3::from(self.translation));
        RigidTransform {
            rotation: mat3_to_rows(&r),
            translation: [t.x, t.y, t.z],
        }
    }

    /// The homogeneous 4x4 matrix; the last row is exactly `(0, 0, 0, 1)`.
    pub fn to_matrix4(&self) -> Matrix4<f32> {
        let r = &self.rotation;
        let t = &self.translation;
        Matrix4::new(
            r[0][0], r[0][1], r[0][2], t[0], //
            r[1][0], r[1][1], r[1][2], t[1], //
            r[2][0], r[2][1], r[2][2], t[2], //
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Reads the rotational block and translation column of a homogeneous
    /// matrix. The caller guarantees the matrix is rigid.
    pub fn from_matrix4(m: &Matrix4<f32>) -> Self {
        Self {
            rotation: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
            translation: [m[(0, 3)], m[(1, 3)], m[(2, 3)]],
        }
    }

    pub fn to_isometry(&self) -> Isometry3<f32> {
        let rot = Rotation3::from_matrix_unchecked(mat3_from_rows(&self.rotation));
        Isometry3::from_parts(
            Translation3::from(Vector3::from(self.translation)),
            UnitQuaternion::from_rotation_matrix(&rot),
        )
    }

    pub fn from_isometry(iso: &Isometry3<f32>) -> Self {
        let m = iso.rotation.to_rotation_matrix();
        Self {
            rotation: mat3_to_rows(m.matrix()),
            translation: [iso.translation.x, iso.translation.y, iso.translation.z],
        }
    }

    /// Frobenius norm of `M - I` over the full 4x4, the convergence measure
    /// of the alignment loop.
    pub fn deviation_from_identity(&self) -> f32 {
        let mut sum = 0.0f32;
        for r in 0..3 {
            for c in 0..3 {
                let expected = if r == c { 1.0 } else { 0.0 };
                let d = self.rotation[r][c] - expected;
                sum += d * d;
            }
            sum += self.translation[r] * self.translation[r];
        }
        sum.sqrt()
    }

    /// Euclidean distance between the two translation vectors.
    pub fn translation_distance(&self, other: &RigidTransform) -> f32 {
        let dx = self.translation[0] - other.translation[0];
        let dy = self.translation[1] - other.translation[1];
        let dz = self.translation[2] - other.translation[2];
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Angle of the relative rotation between the two transforms, in radians.
    pub fn rotation_angle_to(&self, other: &RigidTransform) -> f32 {
        let qa = self.to_isometry().rotation;
        let qb = other.to_isometry().rotation;
        qa.angle_to(&qb)
    }
}

fn mat3_from_rows(a: &[[f32; 3]; 3]) -> Matrix3<f32> {
    Matrix3::new(
        a[0][0], a[0][1], a[0][2], //
        a[1][0], a[1][1], a[1][2], //
        a[2][0], a[2][1], a[2][2],
    )
}

fn mat3_to_rows(m: &Matrix3<f32>) -> [[f32; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

/// Applies a rigid transform to every point of a cloud, rotating the normal
/// channel along. The output has the same cardinality as the input;
/// non-finite points map to non-finite points.
pub fn apply_transform(cloud: &PointCloud, transform: &RigidTransform) -> PointCloud {
    let n = cloud.len();
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut z = Vec::with_capacity(n);

    for i in 0..n {
        let p = transform.apply_to_point(&cloud.point(i));
        x.push(p[0]);
        y.push(p[1]);
        z.push(p[2]);
    }

    let mut out = PointCloud::from_xyz(x, y, z);

    if let Some(normals) = &cloud.normals {
        let mut nx = Vec::with_capacity(n);
        let mut ny = Vec::with_capacity(n);
        let mut nz = Vec::with_capacity(n);
        for i in 0..n {
            let v = transform.apply_to_vector(&normals.get(i));
            nx.push(v[0]);
            ny.push(v[1]);
            nz.push(v[2]);
        }
        out = out.with_normals(Normals { nx, ny, nz });
    }

    if let Some(intensity) = &cloud.intensity {
        out.is_dense = out.is_dense && intensity.iter().all(|v| v.is_finite());
        out.intensity = Some(intensity.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rot_z(angle: f32) -> RigidTransform {
        let (s, c) = angle.sin_cos();
        RigidTransform {
            rotation: [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    #[test]
    fn apply_rotation_to_point() {
        let t = rot_z(std::f32::consts::FRAC_PI_2);
        let p = t.apply_to_point(&[1.0, 0.0, 0.0]);
        assert_relative_eq!(p[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(p[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn compose_applies_in_order() {
        let rot = rot_z(std::f32::consts::FRAC_PI_2);
        let shift = RigidTransform {
            rotation: RigidTransform::identity().rotation,
            translation: [1.0, 0.0, 0.0],
        };

        // Rotate then translate: (1, 0, 0) -> (0, 1, 0) -> (1, 1, 0).
        let composed = rot.compose(&shift);
        let p = composed.apply_to_point(&[1.0, 0.0, 0.0]);
        assert_relative_eq!(p[0], 1.0, epsilon = 1e-5);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn inverse_undoes_transform() {
        let t = rot_z(0.7).compose(&RigidTransform {
            rotation: RigidTransform::identity().rotation,
            translation: [3.0, -2.0, 5.0],
        });
        let round_trip = t.compose(&t.inverse());
        assert!(round_trip.is_identity(1e-5));
    }

    #[test]
    fn matrix4_last_row_is_exact() {
        let t = rot_z(0.3).compose(&RigidTransform {
            rotation: RigidTransform::identity().rotation,
            translation: [0.1, 0.2, 0.3],
        });
        let m = t.to_matrix4();
        assert_eq!(m[(3, 0)], 0.0);
        assert_eq!(m[(3, 1)], 0.0);
        assert_eq!(m[(3, 2)], 0.0);
        assert_eq!(m[(3, 3)], 1.0);

        let back = RigidTransform::from_matrix4(&m);
        assert!(back.compose(&t.inverse()).is_identity(1e-5));
    }

    #[test]
    fn isometry_round_trip() {
        let t = rot_z(1.2).compose(&RigidTransform {
            rotation: RigidTransform::identity().rotation,
            translation: [0.5, 0.6, -0.7],
        });
        let back = RigidTransform::from_isometry(&t.to_isometry());
        for r in 0..3 {
            for c in 0..3 {
                assert_relative_eq!(back.rotation[r][c], t.rotation[r][c], epsilon = 1e-5);
            }
            assert_relative_eq!(back.translation[r], t.translation[r], epsilon = 1e-5);
        }
    }

    #[test]
    fn deviation_from_identity_is_zero_for_identity() {
        assert_eq!(RigidTransform::identity().deviation_from_identity(), 0.0);
        assert!(rot_z(0.1).deviation_from_identity() > 0.0);
    }

    #[test]
    fn rotation_angle_between_transforms() {
        let a = rot_z(0.2);
        let b = rot_z(0.9);
        assert_relative_eq!(a.rotation_angle_to(&b), 0.7, epsilon = 1e-4);
        assert_relative_eq!(a.rotation_angle_to(&a), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn translation_distance_between_transforms() {
        let a = RigidTransform {
            rotation: RigidTransform::identity().rotation,
            translation: [1.0, 0.0, 0.0],
        };
        let b = RigidTransform {
            rotation: RigidTransform::identity().rotation,
            translation: [1.0, 3.0, 4.0],
        };
        assert_relative_eq!(a.translation_distance(&b), 5.0, epsilon = 1e-6);
    }

    #[test]
    fn apply_transform_rotates_normals_and_keeps_cardinality() {
        let cloud = PointCloud::from_xyz(
            vec![1.0, 0.0, f32::NAN],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.0, 0.0],
        )
        .with_normals(Normals {
            nx: vec![1.0, 0.0, 0.0],
            ny: vec![0.0, 1.0, 0.0],
            nz: vec![0.0, 0.0, 1.0],
        });

        let t = rot_z(std::f32::consts::FRAC_PI_2);
        let moved = apply_transform(&cloud, &t);

        assert_eq!(moved.len(), cloud.len());
        assert!(!moved.is_finite_at(2), "NaN point passes through");

        let n = moved.normals.as_ref().unwrap();
        assert_relative_eq!(n.nx[0], 0.0, epsilon = 1e-6);
        assert_relative_eq!(n.ny[0], 1.0, epsilon = 1e-6);
    }
}
