use cloudreg_core::{FpfhSignature33, Normals, PointCloud};
use cloudreg_spatial::KdTree;
use rayon::prelude::*;

const NR_BINS: usize = 11;

/// Computes a 33-bin Fast Point Feature Histogram per point.
///
/// Stage 1 builds the Simplified PFH of every point from the Darboux-frame
/// pair features against its radius neighborhood (3 angular features, 11 bins
/// each). Stage 2 weights each point's SPFH with its neighbours' SPFHs by
/// inverse squared distance and renormalizes every 11-bin block to sum 100.
///
/// Points that are non-finite, have a non-finite normal, or have no valid
/// neighbour inside `radius` receive the zero histogram; callers filter those.
///
/// # Panics
///
/// Panics if `normals` does not match the cloud length or `radius` is not a
/// positive finite float.
pub fn compute_fpfh(cloud: &PointCloud, normals: &Normals, radius: f32) -> Vec<FpfhSignature33> {
    assert_eq!(
        normals.len(),
        cloud.len(),
        "normals channel must match cloud length"
    );
    assert!(
        radius.is_finite() && radius > 0.0,
        "search radius must be positive and finite"
    );

    let n = cloud.len();
    if n == 0 {
        return Vec::new();
    }

    let tree = KdTree::build(cloud);
    let points: Vec<[f32; 3]> = (0..n).map(|i| cloud.point(i)).collect();
    let valid: Vec<bool> = (0..n)
        .map(|i| points[i].iter().all(|v| v.is_finite()) && normals.is_finite_at(i))
        .collect();

    // Neighborhoods are gathered once and reused by both stages.
    let neighborhoods: Vec<Vec<(usize, f32)>> = points
        .par_iter()
        .enumerate()
        .map(|(i, p)| {
            if !valid[i] {
                return Vec::new();
            }
            tree.radius_search(p, radius)
                .into_iter()
                .filter(|&(j, _)| valid[j])
                .collect()
        })
        .collect();

    let spfh: Vec<[f32; 33]> = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut hist = [0.0f32; 33];
            if !valid[i] {
                return hist;
            }

            let pair_count = neighborhoods[i].iter().filter(|&&(j, _)| j != i).count();
            if pair_count == 0 {
                return hist;
            }
            let incr = 100.0 / pair_count as f32;

            for &(j, _) in &neighborhoods[i] {
                if j == i {
                    continue;
                }
                if let Some((f1, f2, f3, _)) =
                    pair_features(points[i], normals.get(i), points[j], normals.get(j))
                {
                    hist[angle_bin(f1)] += incr;
                    hist[NR_BINS + unit_bin(f2)] += incr;
                    hist[2 * NR_BINS + unit_bin(f3)] += incr;
                }
            }
            hist
        })
        .collect();

    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut histogram = [0.0f32; 33];
            if !valid[i] {
                return FpfhSignature33 { histogram };
            }

            histogram = spfh[i];
            for &(j, d_sq) in &neighborhoods[i] {
                if j == i || d_sq <= 0.0 {
                    continue;
                }
                let weight = 1.0 / d_sq;
                for (out, s) in histogram.iter_mut().zip(&spfh[j]) {
                    *out += weight * s;
                }
            }

            for block in histogram.chunks_mut(NR_BINS) {
                let sum: f32 = block.iter().sum();
                if sum > 0.0 {
                    let scale = 100.0 / sum;
                    for v in block {
                        *v *= scale;
                    }
                }
            }

            FpfhSignature33 { histogram }
        })
        .collect()
}

/// Darboux-frame pair features between two oriented points.
///
/// Returns `(f1, f2, f3, f4)` where `f1 in [-pi, pi]` is the in-plane angle
/// of the target normal, `f2, f3 in [-1, 1]` are direction cosines, and `f4`
/// is the point distance. The point whose normal makes the smaller angle with
/// the connecting line acts as the frame source. `None` for coincident points
/// or a degenerate frame (normal parallel to the connecting line).
pub fn pair_features(
    p1: [f32; 3],
    n1: [f32; 3],
    p2: [f32; 3],
    n2: [f32; 3],
) -> Option<(f32, f32, f32, f32)> {
    let mut d = [p2[0] - p1[0], p2[1] - p1[1], p2[2] - p1[2]];
    let f4 = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
    if !f4.is_finite() || f4 <= 0.0 {
        return None;
    }

    let mut ns = n1;
    let mut nt = n2;
    let cos1 = dot(ns, d) / f4;
    let cos2 = dot(nt, d) / f4;

    let f3 = if cos1.abs() < cos2.abs() {
        std::mem::swap(&mut ns, &mut nt);
        d = [-d[0], -d[1], -d[2]];
        -cos2
    } else {
        cos1
    };

    // Darboux frame: u = ns, v = d x u (normalized), w = u x v.
    let mut v = cross(d, ns);
    let v_norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    if v_norm <= 0.0 || !v_norm.is_finite() {
        return None;
    }
    v = [v[0] / v_norm, v[1] / v_norm, v[2] / v_norm];
    let w = cross(ns, v);

    let f2 = dot(v, nt);
    let f1 = dot(w, nt).atan2(dot(ns, nt));

    Some((f1, f2, f3, f4))
}

fn angle_bin(f: f32) -> usize {
    let idx = ((f + std::f32::consts::PI) * (NR_BINS as f32 / std::f32::consts::TAU)).floor();
    (idx as isize).clamp(0, NR_BINS as isize - 1) as usize
}

fn unit_bin(f: f32) -> usize {
    let idx = ((f + 1.0) * (NR_BINS as f32 / 2.0)).floor();
    (idx as isize).clamp(0, NR_BINS as isize - 1) as usize
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudreg_normals::{estimate_normals, Neighborhood};

    /// Deterministic pseudo-random surface: a golden-angle spiral over a
    /// bumpy sphere, asymmetric enough that neighborhoods all differ.
    fn bumpy_sphere(n: usize) -> PointCloud {
        let golden = std::f32::consts::PI * (3.0 - 5.0f32.sqrt());
        let mut x = Vec::with_capacity(n);
        let mut y = Vec::with_capacity(n);
        let mut z = Vec::with_capacity(n);
        for i in 0..n {
            let t = (i as f32 + 0.5) / n as f32;
            let inclination = (1.0 - 2.0 * t).acos();
            let azimuth = golden * i as f32;
            let r = 1.0 + 0.08 * (4.0 * azimuth).sin() * (3.0 * inclination).cos();
            x.push(r * inclination.sin() * azimuth.cos());
            y.push(r * inclination.sin() * azimuth.sin());
            z.push(r * inclination.cos());
        }
        PointCloud::from_xyz(x, y, z)
    }

    #[test]
    fn pair_features_right_angle_case() {
        // Two points on the x axis, both normals +z: the connecting line is
        // orthogonal to both normals.
        let f = pair_features([0.0, 0.0, 0.0], [0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0])
            .unwrap();
        assert!((f.0 - 0.0).abs() < 1e-6, "f1 = {}", f.0);
        assert!((f.1 - 0.0).abs() < 1e-6, "f2 = {}", f.1);
        assert!((f.2 - 0.0).abs() < 1e-6, "f3 = {}", f.2);
        assert!((f.3 - 1.0).abs() < 1e-6, "f4 = {}", f.3);
    }

    #[test]
    fn pair_features_coincident_points_rejected() {
        assert!(
            pair_features([1.0, 2.0, 3.0], [0.0, 0.0, 1.0], [1.0, 2.0, 3.0], [0.0, 0.0, 1.0])
                .is_none()
        );
    }

    #[test]
    fn pair_features_degenerate_frame_rejected() {
        // Source normal parallel to the connecting line: no Darboux frame.
        assert!(
            pair_features([0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 0.0, 0.0])
                .is_none()
        );
    }

    #[test]
    fn histograms_have_unit_block_mass() {
        let cloud = bumpy_sphere(300);
        let normals = estimate_normals(&cloud, Neighborhood::Knn(12));
        let features = compute_fpfh(&cloud, &normals, 0.4);

        assert_eq!(features.len(), cloud.len());
        for f in &features {
            for block in f.histogram.chunks(11) {
                let sum: f32 = block.iter().sum();
                assert!(
                    (sum - 100.0).abs() < 1e-2 || sum == 0.0,
                    "block mass should be 100 (or 0 for degenerate), got {}",
                    sum
                );
            }
            assert!(f.histogram.iter().all(|v| *v >= 0.0));
        }
    }

    #[test]
    fn isolated_point_gets_zero_histogram() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, 0.05, 0.1, 100.0],
            vec![0.0, 0.04, 0.02, 0.0],
            vec![0.0, 0.01, 0.03, 0.0],
        );
        let normals = Normals {
            nx: vec![0.0; 4],
            ny: vec![0.0; 4],
            nz: vec![1.0; 4],
        };
        let features = compute_fpfh(&cloud, &normals, 0.5);
        assert!(features[3].histogram.iter().all(|v| *v == 0.0));
        assert!(features[0].histogram.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn nan_normal_gets_zero_histogram() {
        let cloud = bumpy_sphere(50);
        let mut normals = estimate_normals(&cloud, Neighborhood::Knn(8));
        normals.nx[10] = f32::NAN;
        let features = compute_fpfh(&cloud, &normals, 0.6);
        assert!(features[10].histogram.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn features_are_rotation_invariant() {
        let cloud = bumpy_sphere(200);
        let normals = estimate_normals(&cloud, Neighborhood::Knn(12));

        // Rotate cloud and normals by 40 degrees about z.
        let angle = 40.0f32.to_radians();
        let (s, c) = angle.sin_cos();
        let rot = |p: [f32; 3]| [c * p[0] - s * p[1], s * p[0] + c * p[1], p[2]];

        let mut rx = Vec::new();
        let mut ry = Vec::new();
        let mut rz = Vec::new();
        let mut rnx = Vec::new();
        let mut rny = Vec::new();
        let mut rnz = Vec::new();
        for i in 0..cloud.len() {
            let p = rot(cloud.point(i));
            let nr = rot(normals.get(i));
            rx.push(p[0]);
            ry.push(p[1]);
            rz.push(p[2]);
            rnx.push(nr[0]);
            rny.push(nr[1]);
            rnz.push(nr[2]);
        }
        let rotated = PointCloud::from_xyz(rx, ry, rz);
        let rotated_normals = Normals {
            nx: rnx,
            ny: rny,
            nz: rnz,
        };

        let original = compute_fpfh(&cloud, &normals, 0.4);
        let moved = compute_fpfh(&rotated, &rotated_normals, 0.4);

        // Bin-edge flips shuffle a little mass; the bulk must agree.
        let mut total_l1 = 0.0f32;
        for (a, b) in original.iter().zip(&moved) {
            for (x, y) in a.histogram.iter().zip(&b.histogram) {
                total_l1 += (x - y).abs();
            }
        }
        let mean_l1 = total_l1 / cloud.len() as f32;
        assert!(
            mean_l1 < 40.0,
            "mean per-point L1 difference too large: {}",
            mean_l1
        );
    }

    #[test]
    #[should_panic]
    fn mismatched_normals_panic() {
        let cloud = PointCloud::from_xyz(vec![0.0, 1.0], vec![0.0; 2], vec![0.0; 2]);
        let normals = Normals {
            nx: vec![0.0],
            ny: vec![0.0],
            nz: vec![1.0],
        };
        let _ = compute_fpfh(&cloud, &normals, 0.1);
    }

    #[test]
    #[should_panic]
    fn non_positive_radius_panics() {
        let cloud = PointCloud::from_xyz(vec![0.0], vec![0.0], vec![0.0]);
        let normals = Normals {
            nx: vec![0.0],
            ny: vec![0.0],
            nz: vec![1.0],
        };
        let _ = compute_fpfh(&cloud, &normals, 0.0);
    }
}
