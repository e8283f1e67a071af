use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use std::num::NonZero;

use cloudreg_core::PointRepresentation;

/// A k-d tree over `D`-dimensional feature vectors.
///
/// Features are projected through a [`PointRepresentation`] at build time
/// (rescale weights included), so queries run in the same vectorized space.
/// Items whose projection contains a non-finite component are skipped;
/// results refer to indices of the original feature slice. Distances are
/// squared Euclidean, ascending.
#[derive(Debug, Clone)]
pub struct FeatureKdTree<const D: usize> {
    tree: ImmutableKdTree<f32, u32, D, 32>,
    index_map: Vec<u32>,
}

impl<const D: usize> FeatureKdTree<D> {
    /// Builds the index from a feature slice.
    ///
    /// # Panics
    ///
    /// Panics when `representation.dims() != D`.
    pub fn build<R>(features: &[R::Item], representation: &R) -> Self
    where
        R: PointRepresentation,
    {
        assert_eq!(
            representation.dims(),
            D,
            "representation dims {} must equal tree dimensionality {}",
            representation.dims(),
            D
        );

        let mut vectors = Vec::with_capacity(features.len());
        let mut index_map = Vec::with_capacity(features.len());

        let mut buf = [0.0f32; D];
        for (i, feature) in features.iter().enumerate() {
            representation.vectorize(feature, &mut buf);
            if buf.iter().all(|v| v.is_finite()) {
                vectors.push(buf);
                index_map.push(i as u32);
            }
        }

        Self {
            tree: ImmutableKdTree::new_from_slice(&vectors),
            index_map,
        }
    }

    /// Number of indexed (valid) features.
    pub fn len(&self) -> usize {
        self.index_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index_map.is_empty()
    }

    /// The `k` nearest features to `query` as `(feature index, squared
    /// distance)` pairs, ascending by distance.
    pub fn nearest_k(&self, query: &[f32; D], k: usize) -> Vec<(usize, f32)> {
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
}

#[cfg(test)]
mod tests {
    use super::FeatureKdTree;
    use cloudreg_core::{FeatureRepresentation, FpfhSignature33, PpfSignature};

    fn ppf(f1: f32, f2: f32, f3: f32, f4: f32) -> PpfSignature {
        PpfSignature {
            f1,
            f2,
            f3,
            f4,
            alpha_m: 0.0,
        }
    }

    #[test]
    fn nearest_k_finds_closest_feature() {
        let features = vec![
            ppf(0.0, 0.0, 0.0, 0.0),
            ppf(1.0, 0.0, 0.0, 0.0),
            ppf(5.0, 5.0, 5.0, 5.0),
        ];
        let repr = FeatureRepresentation::<PpfSignature>::new();
        let tree = FeatureKdTree::<4>::build(&features, &repr);
        assert_eq!(tree.len(), 3);

        let hits = tree.nearest_k(&[0.9, 0.0, 0.0, 0.0], 2);
        assert_eq!(hits[0].0, 1);
        assert_eq!(hits[1].0, 0);
    }

    #[test]
    fn invalid_features_are_skipped() {
        let features = vec![
            ppf(0.0, 0.0, 0.0, 0.0),
            ppf(f32::NAN, 0.0, 0.0, 0.0),
            ppf(2.0, 0.0, 0.0, 0.0),
        ];
        let repr = FeatureRepresentation::<PpfSignature>::new();
        let tree = FeatureKdTree::<4>::build(&features, &repr);
        assert_eq!(tree.len(), 2);

        let hits = tree.nearest_k(&[2.0, 0.0, 0.0, 0.0], 1);
        assert_eq!(hits[0].0, 2, "index must refer to the original slice");
    }

    #[test]
    fn rescale_is_applied_at_build_time() {
        let features = vec![ppf(1.0, 0.0, 0.0, 0.0), ppf(0.0, 0.0, 0.0, 2.0)];
        let mut repr = FeatureRepresentation::<PpfSignature>::new();
        // Weight the first dimension heavily: (1,0,0,0) maps to (100,0,0,0).
        repr.set_rescale(&[100.0, 1.0, 1.0, 1.0]);
        let tree = FeatureKdTree::<4>::build(&features, &repr);

        let hits = tree.nearest_k(&[0.0, 0.0, 0.0, 0.0], 2);
        assert_eq!(hits[0].0, 1, "rescaled first feature must rank farther");
    }

    #[test]
    fn works_in_33_dimensions() {
        let mut a = FpfhSignature33::default();
        a.histogram[0] = 1.0;
        let mut b = FpfhSignature33::default();
        b.histogram[32] = 1.0;

        let repr = FeatureRepresentation::<FpfhSignature33>::new();
        let tree = FeatureKdTree::<33>::build(&[a, b], &repr);

        let mut query = [0.0f32; 33];
        query[32] = 0.9;
        let hits = tree.nearest_k(&query, 1);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    #[should_panic]
    fn dimensionality_mismatch_panics() {
        let repr = FeatureRepresentation::<PpfSignature>::new();
        let _ = FeatureKdTree::<3>::build(&[ppf(0.0, 0.0, 0.0, 0.0)], &repr);
    }
}
