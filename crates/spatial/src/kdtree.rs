use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use std::num::NonZero;

use cloudreg_core::PointCloud;

/// A k-d tree over the 3D positions of a point cloud.
///
/// Built on kiddo's `ImmutableKdTree` (cache-optimized, built once, read-only
/// afterwards). Non-finite points are never inserted; results always refer to
/// indices of the original cloud. All reported distances are **squared**
/// Euclidean, and every query returns results sorted by ascending distance.
#[derive(Debug, Clone)]
pub struct KdTree {
    tree: ImmutableKdTree<f32, u32, 3, 32>,
    /// Maps tree item ids back to original cloud indices.
    index_map: Vec<u32>,
}

impl KdTree {
    /// Builds the index from a cloud, skipping non-finite points.
    pub fn build(cloud: &PointCloud) -> Self {
        let mut points = Vec::with_capacity(cloud.len());
        let mut index_map = Vec::with_capacity(cloud.len());

        for i in 0..cloud.len() {
            let p = cloud.point(i);
            if p.iter().all(|v| v.is_finite()) {
                points.push(p);
                index_map.push(i as u32);
            }
        }

        Self {
            tree: ImmutableKdTree::new_from_slice(&points),
            index_map,
        }
    }

    /// Number of indexed (finite) points.
    pub fn len(&self) -> usize {
        self.index_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_map.is_empty()
    }

    /// The `k` nearest neighbours of `query` as `(cloud index, squared
    /// distance)` pairs, ascending by distance.
    ///
    /// Returns empty if `k == 0`, the index is empty, or the query contains
    /// a non-finite component. If `k > len()`, all points are returned.
    pub fn nearest_k(&self, query: &[f32; 3], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.is_empty() || !query.iter().all(|v| v.is_finite()) {
            return Vec::new();
        }

        let nz_k = NonZero::new(k).unwrap();
        self.tree
            .nearest_n::<SquaredEuclidean>(query, nz_k)
            .into_iter()
            .map(|nn| (self.index_map[nn.item as usize] as usize, nn.distance))
            .collect()
    }

    /// The single nearest neighbour of `query`, or `None` for an empty index
    /// or non-finite query.
    pub fn nearest_one(&self, query: &[f32; 3]) -> Option<(usize, f32)> {
        if self.is_empty() || !query.iter().all(|v| v.is_finite()) {
            return None;
        }

        let nn = self.tree.nearest_one::<SquaredEuclidean>(query);
        Some((self.index_map[nn.item as usize] as usize, nn.distance))
    }

    /// All points within `radius` (Euclidean) of `query`, as `(cloud index,
    /// squared distance)` pairs sorted by ascending distance.
    ///
    /// The boundary is inclusive: points at exactly `radius` are returned.
    pub fn radius_search(&self, query: &[f32; 3], radius: f32) -> Vec<(usize, f32)> {
        if self.is_empty()
            || radius <= 0.0
            || !radius.is_finite()
            || !query.iter().all(|v| v.is_finite())
        {
            return Vec::new();
        }

        let radius_sq = radius * radius;

        // kiddo's `within_unsorted` uses strict `<`; widen the query by an
        // epsilon and post-filter with `<=` so exact-boundary points are kept.
        let query_radius_sq = radius_sq + f32::EPSILON * radius_sq.max(1.0);

        let mut hits: Vec<(usize, f32)> = self
            .tree
            .within_unsorted::<SquaredEuclidean>(query, query_radius_sq)
            .into_iter()
            .filter(|nn| nn.distance <= radius_sq)
            .map(|nn| (self.index_map[nn.item as usize] as usize, nn.distance))
            .collect();

        hits.sort_unstable_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::KdTree;
    use cloudreg_core::PointCloud;
    use proptest::prelude::*;

    #[test]
    fn nearest_k_returns_expected_neighbours() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, 1.0, 2.0, 10.0],
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0, 0.0],
        );
        let tree = KdTree::build(&cloud);
        let hits = tree.nearest_k(&[0.2, 0.0, 0.0], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert_eq!(hits[1].0, 1);
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn distances_are_squared() {
        let cloud = PointCloud::from_xyz(vec![3.0], vec![4.0], vec![0.0]);
        let tree = KdTree::build(&cloud);
        let (idx, d_sq) = tree.nearest_one(&[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(idx, 0);
        assert!((d_sq - 25.0).abs() < 1e-4, "expected 25, got {}", d_sq);
    }

    #[test]
    fn non_finite_points_are_skipped_but_indices_preserved() {
        let cloud = PointCloud::from_xyz(
            vec![0.0, f32::NAN, 5.0],
            vec![0.0, 0.0, 0.0],
            vec![0.0, 0.0, 0.0],
        );
        let tree = KdTree::build(&cloud);
        assert_eq!(tree.len(), 2);

        let (idx, _) = tree.nearest_one(&[5.1, 0.0, 0.0]).unwrap();
        assert_eq!(idx, 2, "index must refer to the original cloud");
    }

    #[test]
    fn nearest_k_empty_cloud() {
        let tree = KdTree::build(&PointCloud::new());
        assert!(tree.nearest_k(&[0.0, 0.0, 0.0], 5).is_empty());
        assert!(tree.nearest_one(&[0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn nearest_k_zero_k() {
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]);
        let tree = KdTree::build(&cloud);
        assert!(tree.nearest_k(&[0.0, 0.0, 0.0], 0).is_empty());
    }

    #[test]
    fn nan_query_returns_nothing() {
        let cloud = PointCloud::from_xyz(vec![1.0], vec![2.0], vec![3.0]);
        let tree = KdTree::build(&cloud);
        assert!(tree.nearest_k(&[f32::NAN, 0.0, 0.0], 1).is_empty());
        assert!(tree.nearest_one(&[f32::NAN, 0.0, 0.0]).is_none());
        assert!(tree.radius_search(&[f32::NAN, 0.0, 0.0], 1.0).is_empty());
    }

    #[test]
    fn radius_search_is_sorted_and_inclusive() {
        let cloud = PointCloud::from_xyz(vec![1.0, 0.5, 5.0], vec![0.0; 3], vec![0.0; 3]);
        let tree = KdTree::build(&cloud);
        let hits = tree.radius_search(&[0.0, 0.0, 0.0], 1.0);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1, "closest point first");
        assert_eq!(hits[1].0, 0, "exact-boundary point included");
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn radius_search_rejects_bad_radius() {
        let cloud = PointCloud::from_xyz(vec![0.0], vec![0.0], vec![0.0]);
        let tree = KdTree::build(&cloud);
        assert!(tree.radius_search(&[0.0, 0.0, 0.0], -1.0).is_empty());
        assert!(tree.radius_search(&[0.0, 0.0, 0.0], 0.0).is_empty());
        assert!(tree
            .radius_search(&[0.0, 0.0, 0.0], f32::INFINITY)
            .is_empty());
    }

    #[test]
    fn nearest_k_larger_than_cloud() {
        let cloud = PointCloud::from_xyz(vec![0.0, 1.0, 2.0], vec![0.0; 3], vec![0.0; 3]);
        let tree = KdTree::build(&cloud);
        assert_eq!(tree.nearest_k(&[0.0, 0.0, 0.0], 100).len(), 3);
    }

    proptest! {
        #[test]
        fn nearest_k_results_sorted_and_bounded(
            pts in prop::collection::vec(
                (-100.0f32..100.0, -100.0f32..100.0, -100.0f32..100.0),
                1..200
            ),
            k in 1usize..50,
        ) {
            let cloud = PointCloud::from_xyz(
                pts.iter().map(|p| p.0).collect(),
                pts.iter().map(|p| p.1).collect(),
                pts.iter().map(|p| p.2).collect(),
            );
            let tree = KdTree::build(&cloud);
            let hits = tree.nearest_k(&[0.0, 0.0, 0.0], k);
            prop_assert!(hits.len() <= k);
            prop_assert!(hits.len() <= pts.len());
            for w in hits.windows(2) {
                prop_assert!(w[0].1 <= w[1].1);
            }
        }

        #[test]
        fn radius_search_results_within_radius(
            pts in prop::collection::vec(
                (-100.0f32..100.0, -100.0f32..100.0, -100.0f32..100.0),
                1..200
            ),
            radius in 0.1f32..50.0,
        ) {
            let cloud = PointCloud::from_xyz(
                pts.iter().map(|p| p.0).collect(),
                pts.iter().map(|p| p.1).collect(),
                pts.iter().map(|p| p.2).collect(),
            );
            let tree = KdTree::build(&cloud);
            for (i, d_sq) in tree.radius_search(&[0.0, 0.0, 0.0], radius) {
                let p = cloud.point(i);
                let actual = p[0] * p[0] + p[1] * p[1] + p[2] * p[2];
                prop_assert!((actual - d_sq).abs() <= 1e-3 * actual.max(1.0));
                prop_assert!(d_sq.sqrt() <= radius + f32::EPSILON * 10.0);
            }
        }
    }
}
