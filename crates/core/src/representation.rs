use std::marker::PhantomData;

use crate::signature::FeatureLayout;
use crate::traits::HasPosition;

/// Maps a point (or feature descriptor) into a fixed-length float vector.
///
/// `project` writes the raw projection; `vectorize` additionally applies the
/// optional per-dimension rescale weights. Implementations with no rescale
/// support return an empty slice from `rescale`, in which case the two are
/// identical.
pub trait PointRepresentation {
    type Item;

    /// The dimensionality `k` of the projected vector.
    fn dims(&self) -> usize;

    /// Copies the raw projection of `item` into `out[..dims()]`.
    fn project(&self, item: &Self::Item, out: &mut [f32]);

    /// Per-dimension rescale weights; empty when unset.
    fn rescale(&self) -> &[f32] {
        &[]
    }

    /// True when every projected component is a finite float.
    fn is_valid(&self, item: &Self::Item) -> bool {
        let mut buf = vec![0.0f32; self.dims()];
        self.project(item, &mut buf);
        buf.iter().all(|v| v.is_finite())
    }

    /// Projects and then multiplies element-wise by the rescale weights.
    fn vectorize(&self, item: &Self::Item, out: &mut [f32]) {
        self.project(item, out);
        let alpha = self.rescale();
        if !alpha.is_empty() {
            for (v, a) in out.iter_mut().zip(alpha) {
                *v *= *a;
            }
        }
    }
}

fn validate_rescale(values: &[f32], dims: usize) {
    assert_eq!(
        values.len(),
        dims,
        "rescale length {} must equal dims() {}",
        values.len(),
        dims
    );
    assert!(
        values.iter().all(|v| v.is_finite() && *v > 0.0),
        "rescale values must be positive and finite"
    );
}

/// Default representation for positional point types: k = 3, projects the
/// position.
pub struct PositionRepresentation<P> {
    alpha: Vec<f32>,
    _marker: PhantomData<fn(&P)>,
}

impl<P> PositionRepresentation<P> {
    pub fn new() -> Self {
        Self {
            alpha: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// # Panics
    ///
    /// Panics unless `values` holds exactly 3 positive finite floats.
    pub fn set_rescale(&mut self, values: &[f32]) {
        validate_rescale(values, 3);
        self.alpha = values.to_vec();
    }
}

impl<P> Default for PositionRepresentation<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: HasPosition> PointRepresentation for PositionRepresentation<P> {
    type Item = P;

    fn dims(&self) -> usize {
        3
    }

    fn project(&self, item: &P, out: &mut [f32]) {
        out[..3].copy_from_slice(&item.position());
    }

    fn rescale(&self) -> &[f32] {
        &self.alpha
    }
}

/// Default representation for feature descriptors: enumerates every declared
/// field of the layout table in order; k = the total float count.
pub struct FeatureRepresentation<F> {
    alpha: Vec<f32>,
    _marker: PhantomData<fn(&F)>,
}

impl<F: FeatureLayout> FeatureRepresentation<F> {
    pub fn new() -> Self {
        Self {
            alpha: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// # Panics
    ///
    /// Panics unless `values` holds exactly `dims()` positive finite floats.
    pub fn set_rescale(&mut self, values: &[f32]) {
        validate_rescale(values, F::float_len());
        self.alpha = values.to_vec();
    }
}

impl<F: FeatureLayout> Default for FeatureRepresentation<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FeatureLayout> PointRepresentation for FeatureRepresentation<F> {
    type Item = F;

    fn dims(&self) -> usize {
        F::float_len()
    }

    fn project(&self, item: &F, out: &mut [f32]) {
        item.write_floats(out);
    }

    fn rescale(&self) -> &[f32] {
        &self.alpha
    }
}

/// Selects a contiguous subrange `[start_dim, start_dim + max_dim)` of a
/// descriptor's float layout; k = `min(total - start_dim, max_dim)`.
pub struct CustomRepresentation<F> {
    start_dim: usize,
    dims: usize,
    alpha: Vec<f32>,
    _marker: PhantomData<fn(&F)>,
}

impl<F: FeatureLayout> CustomRepresentation<F> {
    /// # Panics
    ///
    /// Panics when `start_dim` is at or past the end of the layout.
    pub fn new(max_dim: usize, start_dim: usize) -> Self {
        let total = F::float_len();
        assert!(
            start_dim < total,
            "start_dim {} out of range for a {}-float layout",
            start_dim,
            total
        );
        Self {
            start_dim,
            dims: (total - start_dim).min(max_dim),
            alpha: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// # Panics
    ///
    /// Panics unless `values` holds exactly `dims()` positive finite floats.
    pub fn set_rescale(&mut self, values: &[f32]) {
        validate_rescale(values, self.dims);
        self.alpha = values.to_vec();
    }
}

impl<F: FeatureLayout> PointRepresentation for CustomRepresentation<F> {
    type Item = F;

    fn dims(&self) -> usize {
        self.dims
    }

    fn project(&self, item: &F, out: &mut [f32]) {
        let mut full = vec![0.0f32; F::float_len()];
        item.write_floats(&mut full);
        out[..self.dims].copy_from_slice(&full[self.start_dim..self.start_dim + self.dims]);
    }

    fn rescale(&self) -> &[f32] {
        &self.alpha
    }
}
