//! 3D MAC (Marker-and-Cell) staggered grid for incompressible fluid simulation.

use fdm::{Array3, Size3};
use glam::DVec3;

/// Axis-aligned box spanned by `lower` and `upper`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox3 {
    pub lower: DVec3,
    pub upper: DVec3,
}

impl BoundingBox3 {
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
        }
    }

    pub fn contains(&self, p: DVec3) -> bool {
        p.cmpge(self.lower).all() && p.cmple(self.upper).all()
    }

    pub fn extent(&self) -> DVec3 {
        self.upper - self.lower
    }

    /// Closest point of the box to `p`.
    pub fn clamp(&self, p: DVec3) -> DVec3 {
        p.clamp(self.lower, self.upper)
    }
}

// ========== Interpolation ==========

/// Lower sample index and fraction of `x` (in sample units) along an axis of
/// `n` samples, clamped to the sample range.
#[inline]
fn barycentric(x: f64, n: usize) -> (usize, f64) {
    if n <= 1 {
        return (0, 0.0);
    }
    let s = x.floor();
    if s.is_nan() || s < 0.0 {
        (0, 0.0)
    } else if s as usize > n - 2 {
        (n - 2, 1.0)
    } else {
        (s as usize, x - s)
    }
}

/// The eight samples and weights of a clamped trilinear lookup.
///
/// `data_origin` is the world position of sample (0, 0, 0). Weights always sum
/// to one; positions outside the data range take the value at the edge.
pub fn trilinear_weights(
    size: Size3,
    data_origin: DVec3,
    spacing: DVec3,
    pos: DVec3,
) -> [((usize, usize, usize), f64); 8] {
    let rel = (pos - data_origin) / spacing;
    let (i, fx) = barycentric(rel.x, size.x);
    let (j, fy) = barycentric(rel.y, size.y);
    let (k, fz) = barycentric(rel.z, size.z);
    let ip = (i + 1).min(size.x.saturating_sub(1));
    let jp = (j + 1).min(size.y.saturating_sub(1));
    let kp = (k + 1).min(size.z.saturating_sub(1));

    [
        ((i, j, k), (1.0 - fx) * (1.0 - fy) * (1.0 - fz)),
        ((ip, j, k), fx * (1.0 - fy) * (1.0 - fz)),
        ((i, jp, k), (1.0 - fx) * fy * (1.0 - fz)),
        ((ip, jp, k), fx * fy * (1.0 - fz)),
        ((i, j, kp), (1.0 - fx) * (1.0 - fy) * fz),
        ((ip, j, kp), fx * (1.0 - fy) * fz),
        ((i, jp, kp), (1.0 - fx) * fy * fz),
        ((ip, jp, kp), fx * fy * fz),
    ]
}

/// Clamped trilinear sample of a data array.
pub fn sample_array(data: &Array3<f64>, data_origin: DVec3, spacing: DVec3, pos: DVec3) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    trilinear_weights(data.size(), data_origin, spacing, pos)
        .iter()
        .map(|&(idx, w)| w * data[idx])
        .sum()
}

// ========== Grid ==========

/// 3D MAC grid with staggered velocities.
///
/// Velocity components are stored on cell faces:
/// - u (X-velocity) on YZ faces, size (nx+1, ny, nz)
/// - v (Y-velocity) on XZ faces, size (nx, ny+1, nz)
/// - w (Z-velocity) on XY faces, size (nx, ny, nz+1)
///
/// Pressure and divergence are stored at cell centers. A 2D domain is a grid
/// with `nz == 1`.
#[derive(Clone, Debug)]
pub struct Grid3D {
    resolution: Size3,
    grid_spacing: DVec3,
    origin: DVec3,

    u: Array3<f64>,
    v: Array3<f64>,
    w: Array3<f64>,

    /// Velocities saved right after the particle splat, for FLIP deltas
    u_old: Array3<f64>,
    v_old: Array3<f64>,
    w_old: Array3<f64>,

    pressure: Array3<f64>,
    divergence: Array3<f64>,
}

fn face_sizes(resolution: Size3) -> (Size3, Size3, Size3) {
    let Size3 { x, y, z } = resolution;
    (
        Size3::new(x + 1, y, z),
        Size3::new(x, y + 1, z),
        Size3::new(x, y, z + 1),
    )
}

fn assert_spacing(grid_spacing: DVec3) {
    assert!(
        grid_spacing.x > 0.0 && grid_spacing.y > 0.0 && grid_spacing.z > 0.0,
        "grid_spacing must be positive, got {}",
        grid_spacing
    );
}

impl Grid3D {
    /// Create a zero-velocity grid.
    pub fn new(resolution: Size3, grid_spacing: DVec3, origin: DVec3) -> Self {
        assert_spacing(grid_spacing);
        let (us, vs, ws) = face_sizes(resolution);
        Self {
            resolution,
            grid_spacing,
            origin,
            u: Array3::new(us),
            v: Array3::new(vs),
            w: Array3::new(ws),
            u_old: Array3::new(us),
            v_old: Array3::new(vs),
            w_old: Array3::new(ws),
            pressure: Array3::new(resolution),
            divergence: Array3::new(resolution),
        }
    }

    /// Cubic cells of size `cell_size` with the origin at zero.
    pub fn with_cell_size(nx: usize, ny: usize, nz: usize, cell_size: f64) -> Self {
        Self::new(Size3::new(nx, ny, nz), DVec3::splat(cell_size), DVec3::ZERO)
    }

    /// Reallocate every field for a new domain. All values are reset to zero.
    pub fn resize(&mut self, resolution: Size3, grid_spacing: DVec3, origin: DVec3) {
        *self = Self::new(resolution, grid_spacing, origin);
    }

    pub fn resolution(&self) -> Size3 {
        self.resolution
    }

    pub fn grid_spacing(&self) -> DVec3 {
        self.grid_spacing
    }

    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    /// True if any axis has zero cells.
    pub fn is_empty(&self) -> bool {
        self.resolution.is_empty()
    }

    pub fn bounding_box(&self) -> BoundingBox3 {
        let Size3 { x, y, z } = self.resolution;
        BoundingBox3::new(
            self.origin,
            self.origin + self.grid_spacing * DVec3::new(x as f64, y as f64, z as f64),
        )
    }

    // ========== Field accessors ==========

    pub fn u(&self) -> &Array3<f64> {
        &self.u
    }

    pub fn u_mut(&mut self) -> &mut Array3<f64> {
        &mut self.u
    }

    pub fn v(&self) -> &Array3<f64> {
        &self.v
    }

    pub fn v_mut(&mut self) -> &mut Array3<f64> {
        &mut self.v
    }

    pub fn w(&self) -> &Array3<f64> {
        &self.w
    }

    pub fn w_mut(&mut self) -> &mut Array3<f64> {
        &mut self.w
    }

    pub fn u_old(&self) -> &Array3<f64> {
        &self.u_old
    }

    pub fn v_old(&self) -> &Array3<f64> {
        &self.v_old
    }

    pub fn w_old(&self) -> &Array3<f64> {
        &self.w_old
    }

    pub fn pressure(&self) -> &Array3<f64> {
        &self.pressure
    }

    pub fn pressure_mut(&mut self) -> &mut Array3<f64> {
        &mut self.pressure
    }

    pub fn divergence(&self) -> &Array3<f64> {
        &self.divergence
    }

    /// Face arrays by axis (0 = u, 1 = v, 2 = w).
    pub fn face(&self, axis: usize) -> &Array3<f64> {
        match axis {
            0 => &self.u,
            1 => &self.v,
            _ => &self.w,
        }
    }

    pub fn face_mut(&mut self, axis: usize) -> &mut Array3<f64> {
        match axis {
            0 => &mut self.u,
            1 => &mut self.v,
            _ => &mut self.w,
        }
    }

    // ========== Positions ==========

    /// World position of u sample (0, 0, 0).
    pub fn u_origin(&self) -> DVec3 {
        self.origin + self.grid_spacing * DVec3::new(0.0, 0.5, 0.5)
    }

    pub fn v_origin(&self) -> DVec3 {
        self.origin + self.grid_spacing * DVec3::new(0.5, 0.0, 0.5)
    }

    pub fn w_origin(&self) -> DVec3 {
        self.origin + self.grid_spacing * DVec3::new(0.5, 0.5, 0.0)
    }

    pub fn cell_center_origin(&self) -> DVec3 {
        self.origin + 0.5 * self.grid_spacing
    }

    /// Sample origin of the face array for `axis`.
    pub fn face_origin(&self, axis: usize) -> DVec3 {
        match axis {
            0 => self.u_origin(),
            1 => self.v_origin(),
            _ => self.w_origin(),
        }
    }

    #[inline]
    fn position(&self, data_origin: DVec3, i: usize, j: usize, k: usize) -> DVec3 {
        data_origin + self.grid_spacing * DVec3::new(i as f64, j as f64, k as f64)
    }

    pub fn u_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.position(self.u_origin(), i, j, k)
    }

    pub fn v_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.position(self.v_origin(), i, j, k)
    }

    pub fn w_position(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.position(self.w_origin(), i, j, k)
    }

    pub fn face_position(&self, axis: usize, i: usize, j: usize, k: usize) -> DVec3 {
        self.position(self.face_origin(axis), i, j, k)
    }

    pub fn cell_center(&self, i: usize, j: usize, k: usize) -> DVec3 {
        self.position(self.cell_center_origin(), i, j, k)
    }

    // ========== Sampling ==========

    /// Trilinear velocity at a world position, clamped to the face ranges.
    pub fn sample(&self, pos: DVec3) -> DVec3 {
        let h = self.grid_spacing;
        DVec3::new(
            sample_array(&self.u, self.u_origin(), h, pos),
            sample_array(&self.v, self.v_origin(), h, pos),
            sample_array(&self.w, self.w_origin(), h, pos),
        )
    }

    /// Trilinear sample of `current - old`, the change since the last snapshot.
    pub fn sample_delta(&self, pos: DVec3) -> DVec3 {
        let h = self.grid_spacing;
        let delta = |now: &Array3<f64>, old: &Array3<f64>, origin: DVec3| -> f64 {
            if now.is_empty() {
                return 0.0;
            }
            trilinear_weights(now.size(), origin, h, pos)
                .iter()
                .map(|&(idx, w)| w * (now[idx] - old[idx]))
                .sum()
        };
        DVec3::new(
            delta(&self.u, &self.u_old, self.u_origin()),
            delta(&self.v, &self.v_old, self.v_origin()),
            delta(&self.w, &self.w_old, self.w_origin()),
        )
    }

    /// Net outflow of cell (i, j, k) per unit volume.
    pub fn divergence_at_cell_center(&self, i: usize, j: usize, k: usize) -> f64 {
        let h = self.grid_spacing;
        (self.u[(i + 1, j, k)] - self.u[(i, j, k)]) / h.x
            + (self.v[(i, j + 1, k)] - self.v[(i, j, k)]) / h.y
            + (self.w[(i, j, k + 1)] - self.w[(i, j, k)]) / h.z
    }

    /// Refresh the cell-centered divergence field from the face velocities.
    pub fn compute_divergence(&mut self) {
        let mut divergence = std::mem::take(&mut self.divergence);
        divergence.resize(self.resolution);
        let this = &*self;
        divergence.par_for_each_index_mut(|i, j, k, d| {
            *d = this.divergence_at_cell_center(i, j, k);
        });
        self.divergence = divergence;
    }

    /// Largest |divergence| over all cells.
    pub fn max_abs_divergence(&self) -> f64 {
        let size = self.resolution;
        fdm::parallel::max(size.len(), 0.0, |idx| {
            let (i, j, k) = size.coords(idx);
            self.divergence_at_cell_center(i, j, k).abs()
        })
    }

    /// Largest |component| over every face sample.
    pub fn max_abs_velocity_component(&self) -> f64 {
        [&self.u, &self.v, &self.w]
            .iter()
            .map(|field| {
                let data = field.as_slice();
                fdm::parallel::max(data.len(), 0.0, |idx| data[idx].abs())
            })
            .fold(0.0, f64::max)
    }

    // ========== Bulk updates ==========

    /// Set every face to the matching component of `velocity`.
    pub fn fill_velocity(&mut self, velocity: DVec3) {
        self.u.fill(velocity.x);
        self.v.fill(velocity.y);
        self.w.fill(velocity.z);
    }

    /// Copy u/v/w into the FLIP snapshot.
    pub fn save_old_velocities(&mut self) {
        self.u_old.clone_from(&self.u);
        self.v_old.clone_from(&self.v);
        self.w_old.clone_from(&self.w);
    }

    /// Add `acceleration * dt` to every face.
    pub fn add_uniform_acceleration(&mut self, acceleration: DVec3, dt: f64) {
        let a = acceleration * dt;
        for (field, da) in [(&mut self.u, a.x), (&mut self.v, a.y), (&mut self.w, a.z)] {
            if da.abs() > f64::MIN_POSITIVE {
                fdm::parallel::for_each_mut(field.as_mut_slice(), |_, x| *x += da);
            }
        }
    }
}
