/// An unordered (or row-organized) collection of 3D points in SoA layout.
///
/// Coordinates are stored as three parallel `Vec<f32>` columns so that hot
/// loops stream over contiguous memory. Optional per-point channels (normals,
/// intensity) are carried alongside and always share the cloud's length.
///
/// `width * height == len()` always holds; unorganized clouds have
/// `height == 1`. When `is_dense` is false the cloud may contain non-finite
/// points and every consumer is expected to filter them.
#[derive(Debug, Clone, PartialEq)]
pub struct PointCloud {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub normals: Option<Normals>,
    pub intensity: Option<Vec<f32>>,
    pub width: usize,
    pub height: usize,
    pub is_dense: bool,
}

/// Per-point surface normals in SoA layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Normals {
    pub nx: Vec<f32>,
    pub ny: Vec<f32>,
    pub nz: Vec<f32>,
}

impl Normals {
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.nx.len(), self.ny.len());
        debug_assert_eq!(self.nx.len(), self.nz.len());
        self.nx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nx.is_empty()
    }

    pub fn get(&self, i: usize) -> [f32; 3] {
        [self.nx[i], self.ny[i], self.nz[i]]
    }

    pub fn is_finite_at(&self, i: usize) -> bool {
        self.nx[i].is_finite() && self.ny[i].is_finite() && self.nz[i].is_finite()
    }
}

impl PointCloud {
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            normals: None,
            intensity: None,
            width: 0,
            height: 1,
            is_dense: true,
        }
    }

    pub fn from_xyz(x: Vec<f32>, y: Vec<f32>, z: Vec<f32>) -> Self {
        assert_eq!(x.len(), y.len(), "x and y must have same length");
        assert_eq!(x.len(), z.len(), "x and z must have same length");

        let is_dense = x
            .iter()
            .zip(&y)
            .zip(&z)
            .all(|((a, b), c)| a.is_finite() && b.is_finite() && c.is_finite());

        Self {
            width: x.len(),
            height: 1,
            is_dense,
            x,
            y,
            z,
            normals: None,
            intensity: None,
        }
    }

    pub fn from_array(data: &[f32], num_points: usize) -> Self {
        assert_eq!(
            data.len(),
            num_points * 3,
            "interleaved xyz input must have num_points * 3 floats"
        );

        let mut x = Vec::with_capacity(num_points);
        let mut y = Vec::with_capacity(num_points);
        let mut z = Vec::with_capacity(num_points);

        for chunk in data.chunks_exact(3).take(num_points) {
            x.push(chunk[0]);
            y.push(chunk[1]);
            z.push(chunk[2]);
        }

        Self::from_xyz(x, y, z)
    }

    /// Attaches a normals channel, updating `is_dense` accordingly.
    ///
    /// # Panics
    ///
    /// Panics if the channel length does not match the cloud length.
    pub fn with_normals(mut self, normals: Normals) -> Self {
        assert_eq!(
            normals.len(),
            self.len(),
            "normals channel must match cloud length"
        );
        self.is_dense = self.is_dense && (0..normals.len()).all(|i| normals.is_finite_at(i));
        self.normals = Some(normals);
        self
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.x.len(), self.y.len());
        debug_assert_eq!(self.x.len(), self.z.len());
        debug_assert_eq!(self.width * self.height, self.x.len());
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn point(&self, i: usize) -> [f32; 3] {
        [self.x[i], self.y[i], self.z[i]]
    }

    pub fn iter_points(&self) -> impl Iterator<Item = [f32; 3]> + '_ {
        self.x
            .iter()
            .zip(&self.y)
            .zip(&self.z)
            .map(|((x, y), z)| [*x, *y, *z])
    }

    /// True when every semantic field of point `i` (position plus any
    /// attached channels) is a finite float.
    pub fn is_finite_at(&self, i: usize) -> bool {
        if !(self.x[i].is_finite() && self.y[i].is_finite() && self.z[i].is_finite()) {
            return false;
        }
        if let Some(n) = &self.normals {
            if !n.is_finite_at(i) {
                return false;
            }
        }
        if let Some(it) = &self.intensity {
            if !it[i].is_finite() {
                return false;
            }
        }
        true
    }

    /// Indices of all finite points, in order. A dense cloud returns `0..len`.
    pub fn finite_indices(&self) -> Vec<usize> {
        if self.is_dense {
            return (0..self.len()).collect();
        }
        (0..self.len()).filter(|&i| self.is_finite_at(i)).collect()
    }

    /// Extracts the points at the given indices into a new unorganized cloud,
    /// carrying any attached channels along.
    ///
    /// # Panics
    ///
    /// Panics if any index is out of bounds.
    pub fn select(&self, indices: &[usize]) -> Self {
        let mut x = Vec::with_capacity(indices.len());
        let mut y = Vec::with_capacity(indices.len());
        let mut z = Vec::with_capacity(indices.len());

        for &idx in indices {
            assert!(idx < self.len(), "index out of bounds in select");
            x.push(self.x[idx]);
            y.push(self.y[idx]);
            z.push(self.z[idx]);
        }

        let normals = self.normals.as_ref().map(|n| Normals {
            nx: indices.iter().map(|&idx| n.nx[idx]).collect(),
            ny: indices.iter().map(|&idx| n.ny[idx]).collect(),
            nz: indices.iter().map(|&idx| n.nz[idx]).collect(),
        });

        let intensity = self
            .intensity
            .as_ref()
            .map(|it| indices.iter().map(|&idx| it[idx]).collect());

        let mut out = Self {
            width: x.len(),
            height: 1,
            is_dense: true,
            x,
            y,
            z,
            normals,
            intensity,
        };
        out.is_dense = (0..out.len()).all(|i| out.is_finite_at(i));
        out
    }

    /// Complement of [`select`](Self::select): keeps every point whose index
    /// is NOT in `indices`, preserving relative order.
    pub fn select_inverse(&self, indices: &[usize]) -> Self {
        let n = self.len();
        let mut exclude = vec![false; n];
        for &idx in indices {
            assert!(idx < n, "index out of bounds in select_inverse");
            exclude[idx] = true;
        }

        let kept: Vec<usize> = (0..n).filter(|&i| !exclude[i]).collect();
        self.select(&kept)
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}
