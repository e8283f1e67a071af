use cloudreg_core::{Normals, PointCloud, PpfSignature};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};
use rayon::prelude::*;

/// The point-pair features of every ordered pair of an oriented cloud.
///
/// Pair `(i, j)` lives at index `i * n + j`. Diagonal entries and pairs
/// involving a non-finite point or normal carry the NaN sentinel and are
/// skipped by [`iter_valid`](Self::iter_valid).
#[derive(Debug, Clone)]
pub struct PpfFeatureCloud {
    features: Vec<PpfSignature>,
    n: usize,
}

impl PpfFeatureCloud {
    /// The number of points in the originating cloud.
    pub fn model_size(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn pair(&self, i: usize, j: usize) -> &PpfSignature {
        &self.features[i * self.n + j]
    }

    /// Iterates every finite off-diagonal pair as `(i, j, feature)`.
    pub fn iter_valid(&self) -> impl Iterator<Item = (usize, usize, &PpfSignature)> {
        let n = self.n;
        self.features
            .iter()
            .enumerate()
            .filter(move |(idx, f)| idx / n != idx % n && f.is_finite())
            .map(move |(idx, f)| (idx / n, idx % n, f))
    }
}

/// Computes point-pair features for all ordered pairs of the cloud.
///
/// # Panics
///
/// Panics if `normals` does not match the cloud length.
pub fn compute_ppf(cloud: &PointCloud, normals: &Normals) -> PpfFeatureCloud {
    assert_eq!(
        normals.len(),
        cloud.len(),
        "normals channel must match cloud length"
    );

    let n = cloud.len();
    let valid: Vec<bool> = (0..n)
        .map(|i| cloud.point(i).iter().all(|v| v.is_finite()) && normals.is_finite_at(i))
        .collect();

    let rows: Vec<Vec<PpfSignature>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut row = vec![PpfSignature::NAN; n];
            if !valid[i] {
                return row;
            }
            let frame = canonical_frame(cloud.point(i), normals.get(i));
            for (j, slot) in row.iter_mut().enumerate() {
                if j == i || !valid[j] {
                    continue;
                }
                if let Some((f1, f2, f3, f4)) =
                    ppf_pair_feature(cloud.point(i), normals.get(i), cloud.point(j), normals.get(j))
                {
                    *slot = PpfSignature {
                        f1,
                        f2,
                        f3,
                        f4,
                        alpha_m: in_plane_angle(&frame, cloud.point(j)),
                    };
                }
            }
            row
        })
        .collect();

    PpfFeatureCloud {
        features: rows.into_iter().flatten().collect(),
        n,
    }
}

/// The raw point-pair feature of two oriented points: three angles in
/// `[0, pi]` and the pair distance. `None` for coincident points.
pub fn ppf_pair_feature(
    p1: [f32; 3],
    n1: [f32; 3],
    p2: [f32; 3],
    n2: [f32; 3],
) -> Option<(f32, f32, f32, f32)> {
    let d = Vector3::new(p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]);
    let f4 = d.norm();
    if !f4.is_finite() || f4 <= 0.0 {
        return None;
    }

    let n1 = Vector3::new(n1[0], n1[1], n1[2]);
    let n2 = Vector3::new(n2[0], n2[1], n2[2]);

    let f1 = angle_between(&n1, &d);
    let f2 = angle_between(&n2, &d);
    let f3 = angle_between(&n1, &n2);

    Some((f1, f2, f3, f4))
}

/// The rigid motion taking `point` to the origin and `normal` onto +X.
pub fn canonical_frame(point: [f32; 3], normal: [f32; 3]) -> Isometry3<f32> {
    let n = Vector3::new(normal[0], normal[1], normal[2]);
    let rotation = UnitQuaternion::rotation_between(&n, &Vector3::x()).unwrap_or_else(|| {
        // Anti-parallel normal: any half-turn through the x axis works.
        UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::PI)
    });
    let translation = rotation * Vector3::new(-point[0], -point[1], -point[2]);
    Isometry3::from_parts(Translation3::from(translation), rotation)
}

/// The angle of `point`, mapped through `frame`, around the +X axis
/// (measured from +Y toward +Z).
pub fn in_plane_angle(frame: &Isometry3<f32>, point: [f32; 3]) -> f32 {
    let q = frame * Point3::new(point[0], point[1], point[2]);
    q.z.atan2(q.y)
}

fn angle_between(a: &Vector3<f32>, b: &Vector3<f32>) -> f32 {
    a.cross(b).norm().atan2(a.dot(b))
}
