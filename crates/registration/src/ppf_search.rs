use cloudreg_core::PpfSignature;
use cloudreg_features::PpfFeatureCloud;
use hashbrown::HashMap;

/// Discretized lookup from a point-pair feature to the model pairs that
/// produced a matching feature.
///
/// Angles are binned by `angle_step`, the distance by `distance_step`; the
/// resulting integer 4-tuple keys a multiset of `(i, j)` model pair indices.
/// The table is mutated only by [`train`](Self::train) and is shared
/// read-only afterwards.
#[derive(Debug, Clone)]
pub struct PpfHashMapSearch {
    angle_step: f32,
    distance_step: f32,
    map: HashMap<(i32, i32, i32, i32), Vec<(u32, u32)>>,
    alpha_m: Vec<f32>,
    model_size: usize,
}

impl PpfHashMapSearch {
    /// # Panics
    ///
    /// Panics unless both discretization steps are positive finite floats.
    pub fn new(angle_step: f32, distance_step: f32) -> Self {
        assert!(
            angle_step.is_finite() && angle_step > 0.0,
            "angle discretization step must be positive and finite"
        );
        assert!(
            distance_step.is_finite() && distance_step > 0.0,
            "distance discretization step must be positive and finite"
        );
        Self {
            angle_step,
            distance_step,
            map: HashMap::new(),
            alpha_m: Vec::new(),
            model_size: 0,
        }
    }

    pub fn angle_step(&self) -> f32 {
        self.angle_step
    }

    pub fn distance_step(&self) -> f32 {
        self.distance_step
    }

    /// Number of points in the trained model cloud; 0 before training.
    pub fn model_size(&self) -> usize {
        self.model_size
    }

    /// (Re)builds the table from a model feature cloud, keeping the pair
    /// rotation angles for the voting stage.
    pub fn train(&mut self, features: &PpfFeatureCloud) {
        self.map.clear();
        self.model_size = features.model_size();
        self.alpha_m = vec![f32::NAN; features.len()];

        for (i, j, feature) in features.iter_valid() {
            self.alpha_m[i * self.model_size + j] = feature.alpha_m;
            if let Some(key) = self.key_for(feature) {
                self.map
                    .entry(key)
                    .or_default()
                    .push((i as u32, j as u32));
            }
        }
    }

    /// The model pairs whose discretized feature equals that of `feature`;
    /// empty when the key is absent or the feature is non-finite.
    pub fn query(&self, feature: &PpfSignature) -> &[(u32, u32)] {
        match self.key_for(feature) {
            Some(key) => self.map.get(&key).map_or(&[], |v| v.as_slice()),
            None => &[],
        }
    }

    /// The trained in-plane angle of model pair `(i, j)`.
    pub fn alpha_m(&self, i: usize, j: usize) -> f32 {
        self.alpha_m[i * self.model_size + j]
    }

    fn key_for(&self, feature: &PpfSignature) -> Option<(i32, i32, i32, i32)> {
        if !feature.is_finite() {
            return None;
        }
        Some((
            (feature.f1 / self.angle_step).floor() as i32,
            (feature.f2 / self.angle_step).floor() as i32,
            (feature.f3 / self.angle_step).floor() as i32,
            (feature.f4 / self.distance_step).floor() as i32,
        ))
    }
}
