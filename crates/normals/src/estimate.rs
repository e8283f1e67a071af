use cloudreg_core::{Normals, PointCloud};
use cloudreg_spatial::KdTree;
use rayon::prelude::*;

/// How the local neighborhood of a point is gathered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Neighborhood {
    /// The `k` nearest neighbours (the query point included).
    Knn(usize),
    /// All points within the given Euclidean radius.
    Radius(f32),
}

/// Estimates a surface normal per point via PCA of its neighborhood,
/// oriented to face the origin.
///
/// The normal is the eigenvector of the neighborhood covariance matrix with
/// the smallest eigenvalue. Points that are non-finite, or whose neighborhood
/// holds fewer than 3 points, receive a NaN normal so downstream feature
/// estimators can filter them.
///
/// The per-point computation is parallelized with rayon.
pub fn estimate_normals(cloud: &PointCloud, neighborhood: Neighborhood) -> Normals {
    estimate_normals_with_viewpoint(cloud, neighborhood, [0.0, 0.0, 0.0])
}

/// Same as [`estimate_normals`] but orients normals toward `viewpoint`.
pub fn estimate_normals_with_viewpoint(
    cloud: &PointCloud,
    neighborhood: Neighborhood,
    viewpoint: [f32; 3],
) -> Normals {
    let n = cloud.len();
    if n == 0 {
        return Normals {
            nx: Vec::new(),
            ny: Vec::new(),
            nz: Vec::new(),
        };
    }

    match neighborhood {
        Neighborhood::Knn(k) => assert!(k > 0, "neighborhood size must be positive"),
        Neighborhood::Radius(r) => {
            assert!(r.is_finite() && r > 0.0, "search radius must be positive and finite")
        }
    }

    let tree = KdTree::build(cloud);
    let points: Vec<[f32; 3]> = (0..n).map(|i| cloud.point(i)).collect();

    let normals_vec: Vec<[f32; 3]> = points
        .par_iter()
        .map(|point| {
            if !point.iter().all(|v| v.is_finite()) {
                return [f32::NAN; 3];
            }

            let neighbours: Vec<usize> = match neighborhood {
                Neighborhood::Knn(k) => {
                    tree.nearest_k(point, k).into_iter().map(|(i, _)| i).collect()
                }
                Neighborhood::Radius(r) => {
                    tree.radius_search(point, r).into_iter().map(|(i, _)| i).collect()
                }
            };

            if neighbours.len() < 3 {
                return [f32::NAN; 3];
            }

            let normal = neighborhood_normal(&points, &neighbours);
            orient_toward(normal, *point, viewpoint)
        })
        .collect();

    let mut nx = Vec::with_capacity(n);
    let mut ny = Vec::with_capacity(n);
    let mut nz = Vec::with_capacity(n);
    for normal in &normals_vec {
        nx.push(normal[0]);
        ny.push(normal[1]);
        nz.push(normal[2]);
    }

    Normals { nx, ny, nz }
}

/// Unit normal of a neighborhood: the smallest-eigenvalue eigenvector of the
/// 3x3 covariance of the member positions.
fn neighborhood_normal(points: &[[f32; 3]], neighbours: &[usize]) -> [f32; 3] {
    let count = neighbours.len() as f32;

    let mut centroid = [0.0f32; 3];
    for &idx in neighbours {
        centroid[0] += points[idx][0];
        centroid[1] += points[idx][1];
        centroid[2] += points[idx][2];
    }
    centroid[0] /= count;
    centroid[1] /= count;
    centroid[2] /= count;

    // Upper triangle of the symmetric covariance matrix.
    let mut cov = [0.0f32; 6];
    for &idx in neighbours {
        let dx = points[idx][0] - centroid[0];
        let dy = points[idx][1] - centroid[1];
        let dz = points[idx][2] - centroid[2];
        cov[0] += dx * dx;
        cov[1] += dx * dy;
        cov[2] += dx * dz;
        cov[3] += dy * dy;
        cov[4] += dy * dz;
        cov[5] += dz * dz;
    }

    let mut normal = smallest_eigenvector(cov);

    let len = (normal[0] * normal[0] + normal[1] * normal[1] + normal[2] * normal[2]).sqrt();
    if len > 1e-10 {
        normal[0] /= len;
        normal[1] /= len;
        normal[2] /= len;
    }
    normal
}

fn orient_toward(mut normal: [f32; 3], point: [f32; 3], viewpoint: [f32; 3]) -> [f32; 3] {
    let to_view = [
        viewpoint[0] - point[0],
        viewpoint[1] - point[1],
        viewpoint[2] - point[2],
    ];
    let dot = normal[0] * to_view[0] + normal[1] * to_view[1] + normal[2] * to_view[2];
    if dot < 0.0 {
        normal[0] = -normal[0];
        normal[1] = -normal[1];
        normal[2] = -normal[2];
    }
    normal
}

/// Eigenvector of the smallest eigenvalue of a symmetric 3x3 matrix, given as
/// the upper triangle `[a00, a01, a02, a11, a12, a22]`.
///
/// Eigenvalues come from Cardano's closed form on the shifted matrix; the
/// eigenvector is the cross product of two rows of `A - lambda*I`, which
/// spans the (rank <= 2) null space. Everything runs in f64: the covariance
/// entries can differ by many orders of magnitude on flat neighborhoods.
fn smallest_eigenvector(upper: [f32; 6]) -> [f32; 3] {
    let a00 = upper[0] as f64;
    let a01 = upper[1] as f64;
    let a02 = upper[2] as f64;
    let a11 = upper[3] as f64;
    let a12 = upper[4] as f64;
    let a22 = upper[5] as f64;

    let mean = (a00 + a11 + a22) / 3.0;
    let b00 = a00 - mean;
    let b11 = a11 - mean;
    let b22 = a22 - mean;

    // p = ||B||_F^2 / 6, q = det(B) / 2 for B = A - mean*I.
    let p = (b00 * b00 + b11 * b11 + b22 * b22 + 2.0 * (a01 * a01 + a02 * a02 + a12 * a12)) / 6.0;
    let q = (b00 * (b11 * b22 - a12 * a12) - a01 * (a01 * b22 - a12 * a02)
        + a02 * (a01 * a12 - b11 * a02))
        / 2.0;

    let p = p.max(0.0);
    if p < 1e-30 {
        // Scalar multiple of the identity; every direction is an eigenvector.
        return [0.0, 0.0, 1.0];
    }

    let phi = (q / (p * p.sqrt())).clamp(-1.0, 1.0).acos() / 3.0;
    let sqrt_p = p.sqrt();

    let eig_small = mean + 2.0 * sqrt_p * (phi + 2.0 * std::f64::consts::FRAC_PI_3).cos();
    let eig_large = mean + 2.0 * sqrt_p * phi.cos();
    let eig_mid = 3.0 * mean - eig_small - eig_large;

    let lambda = if eig_small.abs() <= eig_mid.abs() && eig_small.abs() <= eig_large.abs() {
        eig_small
    } else if eig_mid.abs() <= eig_large.abs() {
        eig_mid
    } else {
        eig_large
    };

    let r00 = a00 - lambda;
    let r11 = a11 - lambda;
    let r22 = a22 - lambda;

    // Cross products of row pairs of (A - lambda*I), first non-degenerate wins.
    let row_crosses = [
        [
            a01 * a12 - r11 * a02,
            a02 * a01 - a12 * r00,
            r00 * r11 - a01 * a01,
        ],
        [
            a01 * r22 - a12 * a02,
            a02 * a02 - r22 * r00,
            r00 * a12 - a01 * a02,
        ],
        [
            r11 * r22 - a12 * a12,
            a12 * a02 - r22 * a01,
            a01 * a12 - r11 * a02,
        ],
    ];

    for cross in row_crosses {
        let len_sq = cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2];
        if len_sq >= 1e-30 {
            let inv = 1.0 / len_sq.sqrt();
            return [
                (cross[0] * inv) as f32,
                (cross[1] * inv) as f32,
                (cross[2] * inv) as f32,
            ];
        }
    }

    [0.0, 0.0, 1.0]
}
