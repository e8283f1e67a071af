use cloudreg_core::PointCloud;
use cloudreg_spatial::KdTree;

/// A source-to-target index pair with the squared Euclidean distance
/// between the matched points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Correspondence {
    pub source_index: usize,
    pub target_index: usize,
    pub distance_sq: f32,
}

/// Matches each finite source point to its nearest target point, keeping
/// only pairs with `distance_sq <= max_distance^2`.
///
/// Every source index appears at most once and the output is ordered by
/// source index. Non-finite source points are skipped.
///
/// # Panics
///
/// Panics if `max_distance` is negative or NaN.
pub fn find_correspondences(
    source: &PointCloud,
    target_tree: &KdTree,
    max_distance: f32,
) -> Vec<Correspondence> {
    assert!(max_distance >= 0.0, "max correspondence distance must be non-negative");
    let max_sq = max_distance * max_distance;

    let mut correspondences = Vec::with_capacity(source.len());
    for i in 0..source.len() {
        let query = source.point(i);
        if !query.iter().all(|v| v.is_finite()) {
            continue;
        }
        if let Some((target_index, distance_sq)) = target_tree.nearest_one(&query) {
            if distance_sq <= max_sq {
                correspondences.push(Correspondence {
                    source_index: i,
                    target_index,
                    distance_sq,
                });
            }
        }
    }

    correspondences
}
