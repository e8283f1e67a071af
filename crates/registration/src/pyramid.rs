use cloudreg_core::PointRepresentation;
use hashbrown::HashMap;

/// Errors raised by pyramid construction and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PyramidError {
    /// The per-dimension ranges do not match the representation's `dims()`.
    DimensionMismatch { expected: usize, found: usize },
    /// A range has `min >= max` or a non-finite bound.
    InvalidRange { dimension: usize },
    /// No finite feature was available to bin.
    EmptyInput,
    /// The two pyramids were built with different dimensionality or depth.
    IncompatiblePyramids,
}

impl std::fmt::Display for PyramidError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PyramidError::DimensionMismatch { expected, found } => {
                write!(f, "expected {} dimension ranges, found {}", expected, found)
            }
            PyramidError::InvalidRange { dimension } => {
                write!(f, "invalid range for dimension {}", dimension)
            }
            PyramidError::EmptyInput => write!(f, "no finite features to bin"),
            PyramidError::IncompatiblePyramids => {
                write!(f, "pyramids differ in dimensionality or depth")
            }
        }
    }
}

impl std::error::Error for PyramidError {}

/// A dyadic pyramid of sparse feature histograms.
///
/// Feature vectors are affinely rescaled so the target range of each
/// dimension maps onto `[0, span]`, then binned at every level; the level-`l`
/// cell edge is `2^l`. The number of levels is `ceil(log2(max span)) + 1`,
/// which makes the coarsest cells as wide as the whole target range.
#[derive(Debug, Clone)]
pub struct PyramidFeatureHistogram {
    dims: usize,
    levels: Vec<HashMap<Box<[i32]>, u32>>,
    count: usize,
}

impl PyramidFeatureHistogram {
    /// Bins `features` (projected through `representation`) into a new
    /// pyramid. Features with a non-finite projection are skipped.
    pub fn build<R: PointRepresentation>(
        features: &[R::Item],
        representation: &R,
        input_range: &[(f32, f32)],
        target_range: &[(f32, f32)],
    ) -> Result<Self, PyramidError> {
        let dims = representation.dims();
        if input_range.len() != dims {
            return Err(PyramidError::DimensionMismatch {
                expected: dims,
                found: input_range.len(),
            });
        }
        if target_range.len() != dims {
            return Err(PyramidError::DimensionMismatch {
                expected: dims,
                found: target_range.len(),
            });
        }
        for (d, range) in input_range.iter().chain(target_range.iter()).enumerate() {
            if !(range.0.is_finite() && range.1.is_finite() && range.0 < range.1) {
                return Err(PyramidError::InvalidRange { dimension: d % dims });
            }
        }

        let max_span = target_range
            .iter()
            .map(|(lo, hi)| hi - lo)
            .fold(0.0f32, f32::max);
        let nr_levels = max_span.log2().ceil().max(0.0) as usize + 1;

        let mut levels = vec![HashMap::new(); nr_levels];
        let mut count = 0usize;
        let mut buf = vec![0.0f32; dims];
        let mut scaled = vec![0.0f32; dims];

        for feature in features {
            representation.vectorize(feature, &mut buf);
            if !buf.iter().all(|v| v.is_finite()) {
                continue;
            }
            for d in 0..dims {
                let (in_lo, in_hi) = input_range[d];
                let (out_lo, out_hi) = target_range[d];
                scaled[d] = (buf[d] - in_lo) / (in_hi - in_lo) * (out_hi - out_lo);
            }

            for (level, cells) in levels.iter_mut().enumerate() {
                let edge = (1u32 << level) as f32;
                let key: Box<[i32]> = scaled.iter().map(|v| (v / edge).floor() as i32).collect();
                *cells.entry(key).or_insert(0) += 1;
            }
            count += 1;
        }

        if count == 0 {
            return Err(PyramidError::EmptyInput);
        }

        Ok(Self {
            dims,
            levels,
            count,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn nr_levels(&self) -> usize {
        self.levels.len()
    }

    /// Number of features binned.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Similarity of two pyramids in `[0, 1]`; 1 for identical distributions.
    ///
    /// At each level the histogram intersection counts co-located features;
    /// matches new to level `l` (not already matched at the finer level
    /// `l - 1`) are weighted `1 / 2^l`, and the weighted sum is normalized by
    /// the smaller feature count.
    pub fn compare(a: &Self, b: &Self) -> Result<f32, PyramidError> {
        if a.dims != b.dims || a.levels.len() != b.levels.len() {
            return Err(PyramidError::IncompatiblePyramids);
        }

        let mut similarity = 0.0f32;
        let mut previous_intersection = 0.0f32;
        for (level, (cells_a, cells_b)) in a.levels.iter().zip(&b.levels).enumerate() {
            let (small, large) = if cells_a.len() <= cells_b.len() {
                (cells_a, cells_b)
            } else {
                (cells_b, cells_a)
            };

            let mut intersection = 0.0f32;
            for (key, &count) in small {
                if let Some(&other) = large.get(key) {
                    intersection += count.min(other) as f32;
                }
            }

            let new_matches = intersection - previous_intersection;
            similarity += new_matches / (1u32 << level) as f32;
            previous_intersection = intersection;
        }

        Ok(similarity / a.count.min(b.count) as f32)
    }
}
