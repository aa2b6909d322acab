//! Marker particles for the PIC/FLIP solver and a linked-cell neighbour search.

use glam::DVec3;

/// A single marker particle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle3D {
    /// World position
    pub position: DVec3,
    /// Current velocity
    pub velocity: DVec3,
}

impl Particle3D {
    /// Create a new particle at the given position with initial velocity.
    pub fn new(position: DVec3, velocity: DVec3) -> Self {
        Self { position, velocity }
    }

    /// Create a stationary particle at the given position.
    pub fn at(position: DVec3) -> Self {
        Self::new(position, DVec3::ZERO)
    }
}

impl Default for Particle3D {
    fn default() -> Self {
        Self::new(DVec3::ZERO, DVec3::ZERO)
    }
}

/// Append-only particle store. Nothing in a simulation step removes particles.
#[derive(Clone, Debug)]
pub struct Particles3D {
    pub list: Vec<Particle3D>,
}

impl Particles3D {
    /// Create an empty particle collection.
    pub fn new() -> Self {
        Self { list: Vec::new() }
    }

    /// Add a particle with the given position and velocity.
    pub fn spawn(&mut self, position: DVec3, velocity: DVec3) {
        self.list.push(Particle3D::new(position, velocity));
    }

    /// Add a stationary particle.
    pub fn spawn_at(&mut self, position: DVec3) {
        self.list.push(Particle3D::at(position));
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Clear all particles.
    pub fn clear(&mut self) {
        self.list.clear();
    }

    /// Snapshot of every particle position, in store order.
    pub fn positions(&self) -> Vec<DVec3> {
        self.list.iter().map(|p| p.position).collect()
    }
}

impl Default for Particles3D {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Neighbour search ==========

/// Linked-cell list over a box. Points outside the box are binned into the
/// nearest boundary cell, so queries stay exact anywhere.
#[derive(Clone, Debug)]
pub struct PointGridSearcher {
    origin: DVec3,
    cell_size: f64,
    dims: [usize; 3],
    /// First point index of each cell, -1 if empty
    cell_head: Vec<i32>,
    /// Next point index in the same cell, -1 terminates
    next: Vec<i32>,
    points: Vec<DVec3>,
}

impl PointGridSearcher {
    /// Bins covering `lower..upper` with cubic cells of `cell_size`.
    pub fn new(lower: DVec3, upper: DVec3, cell_size: f64) -> Self {
        assert!(cell_size > 0.0, "cell_size must be positive, got {}", cell_size);
        let extent = (upper - lower).max(DVec3::ZERO);
        let dims = [
            ((extent.x / cell_size).ceil() as usize).max(1),
            ((extent.y / cell_size).ceil() as usize).max(1),
            ((extent.z / cell_size).ceil() as usize).max(1),
        ];
        Self {
            origin: lower,
            cell_size,
            dims,
            cell_head: vec![-1; dims[0] * dims[1] * dims[2]],
            next: Vec::new(),
            points: Vec::new(),
        }
    }

    fn cell_coord(&self, p: DVec3) -> [usize; 3] {
        let rel = (p - self.origin) / self.cell_size;
        let clamp = |v: f64, n: usize| (v.floor().max(0.0) as usize).min(n - 1);
        [
            clamp(rel.x, self.dims[0]),
            clamp(rel.y, self.dims[1]),
            clamp(rel.z, self.dims[2]),
        ]
    }

    #[inline]
    fn cell_index(&self, [i, j, k]: [usize; 3]) -> usize {
        (k * self.dims[1] + j) * self.dims[0] + i
    }

    /// Rebuild the cell lists for `points`. Earlier contents are discarded.
    pub fn build(&mut self, points: &[DVec3]) {
        self.cell_head.fill(-1);
        self.next.clear();
        self.next.resize(points.len(), -1);
        self.points.clear();
        self.points.extend_from_slice(points);

        for (idx, &p) in points.iter().enumerate() {
            let cell = self.cell_index(self.cell_coord(p));
            self.next[idx] = self.cell_head[cell];
            self.cell_head[cell] = idx as i32;
        }
    }

    /// Calls `f(index, position)` for every point within `radius` of `origin`.
    pub fn for_each_nearby_point(&self, origin: DVec3, radius: f64, mut f: impl FnMut(usize, DVec3)) {
        if self.points.is_empty() {
            return;
        }
        let lo = self.cell_coord(origin - DVec3::splat(radius));
        let hi = self.cell_coord(origin + DVec3::splat(radius));
        let radius_sq = radius * radius;

        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    let mut idx = self.cell_head[self.cell_index([i, j, k])];
                    while idx >= 0 {
                        let p = self.points[idx as usize];
                        if p.distance_squared(origin) <= radius_sq {
                            f(idx as usize, p);
                        }
                        idx = self.next[idx as usize];
                    }
                }
            }
        }
    }

    /// True if any point lies within `radius` of `origin`.
    pub fn has_nearby_point(&self, origin: DVec3, radius: f64) -> bool {
        let mut found = false;
        self.for_each_nearby_point(origin, radius, |_, _| found = true);
        found
    }

    pub fn number_of_points(&self) -> usize {
        self.points.len()
    }
}
