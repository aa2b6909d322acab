//! Particle-grid transfers for PIC/FLIP.
//!
//! P2G: splat particle velocity onto the faces with trilinear weights.
//! G2P: add the interpolated grid change (FLIP), optionally blended toward
//! the interpolated grid velocity (PIC).

use fdm::Array3;
use glam::DVec3;
use rayon::prelude::*;

use crate::grid::{trilinear_weights, Grid3D};
use crate::particle::{Particles3D, PointGridSearcher};
use crate::scalar_grid::{extrapolate_in_place, CellCenteredScalarGrid3};

/// Pre-allocated buffers for P2G transfer, one set per face axis.
#[derive(Clone, Debug, Default)]
pub struct TransferBuffers {
    pub sum: [Array3<f64>; 3],
    pub weight: [Array3<f64>; 3],
    /// Faces that received any particle weight in the last splat
    pub valid: [Array3<bool>; 3],
}

impl TransferBuffers {
    /// Create buffers sized for the given grid.
    pub fn new(grid: &Grid3D) -> Self {
        let mut buffers = Self::default();
        buffers.reset(grid);
        buffers
    }

    /// Resize to the grid's face arrays and clear.
    pub fn reset(&mut self, grid: &Grid3D) {
        for axis in 0..3 {
            let size = grid.face(axis).size();
            self.sum[axis].resize(size);
            self.sum[axis].fill(0.0);
            self.weight[axis].resize(size);
            self.weight[axis].fill(0.0);
            self.valid[axis].resize(size);
            self.valid[axis].fill(false);
        }
    }
}

/// Transfer particle velocities to grid (P2G).
///
/// Faces without particle weight keep their current value. Particles outside
/// the grid bounding box are skipped. The result is saved as the FLIP
/// snapshot.
pub fn particles_to_grid(grid: &mut Grid3D, particles: &Particles3D, buffers: &mut TransferBuffers) {
    buffers.reset(grid);

    let bbox = grid.bounding_box();
    let h = grid.grid_spacing();

    for particle in &particles.list {
        if !bbox.contains(particle.position) {
            continue;
        }
        for axis in 0..3 {
            let size = grid.face(axis).size();
            if size.is_empty() {
                continue;
            }
            let weights = trilinear_weights(size, grid.face_origin(axis), h, particle.position);
            for (idx, w) in weights {
                buffers.sum[axis][idx] += w * particle.velocity[axis];
                buffers.weight[axis][idx] += w;
            }
        }
    }

    for axis in 0..3 {
        let TransferBuffers { sum, weight, valid } = &mut *buffers;
        let (sum, weight) = (&sum[axis], &weight[axis]);
        valid[axis].par_for_each_index_mut(|i, j, k, m| {
            *m = weight[(i, j, k)] > 0.0;
        });
        grid.face_mut(axis).par_for_each_index_mut(|i, j, k, value| {
            let w = weight[(i, j, k)];
            if w > 0.0 {
                *value = sum[(i, j, k)] / w;
            }
        });
    }

    grid.save_old_velocities();
}

/// Transfer grid velocities back to particles (G2P).
///
/// `pic_blending_factor` of 0 is pure FLIP, 1 is pure PIC. Particles outside
/// the grid bounding box keep their velocity.
pub fn grid_to_particles(grid: &Grid3D, particles: &mut Particles3D, pic_blending_factor: f64) {
    let bbox = grid.bounding_box();
    let pic = pic_blending_factor.clamp(0.0, 1.0);

    particles.list.par_iter_mut().for_each(|particle| {
        let pos = particle.position;
        if !bbox.contains(pos) {
            return;
        }
        let flip = particle.velocity + grid.sample_delta(pos);
        particle.velocity = if pic > 0.0 {
            flip.lerp(grid.sample(pos), pic)
        } else {
            flip
        };
    });
}

/// Fill faces the last splat did not reach from their valid neighbours.
pub fn extrapolate_velocity_into_air(grid: &mut Grid3D, buffers: &TransferBuffers, depth: usize) {
    for axis in 0..3 {
        let face = grid.face_mut(axis);
        if face.size() != buffers.valid[axis].size() {
            log::warn!("Transfer markers do not match the grid; skipping extrapolation");
            return;
        }
        extrapolate_in_place(face, &buffers.valid[axis], depth);
    }
}

// ========== Fluid surface ==========

/// Particle kernel radius for a grid spacing.
pub fn particle_radius(grid_spacing: DVec3) -> f64 {
    1.2 * grid_spacing.max_element() / std::f64::consts::SQRT_2
}

/// Signed distance to the particle blob: distance to the nearest particle
/// minus the particle radius, capped at twice the radius.
///
/// `searcher` is rebuilt from the current particle positions.
pub fn build_fluid_sdf(
    particles: &Particles3D,
    searcher: &mut PointGridSearcher,
    sdf: &mut CellCenteredScalarGrid3,
) {
    let radius = particle_radius(sdf.grid_spacing());
    let band = 2.0 * radius;

    searcher.build(&particles.positions());
    let searcher = &*searcher;
    sdf.fill(|pt| {
        let mut min_dist = band;
        searcher.for_each_nearby_point(pt, band, |_, x| {
            min_dist = min_dist.min(pt.distance(x));
        });
        min_dist - radius
    });
}

/// Carry the fluid SDF into collider cells so the surface meets the wall.
pub fn extrapolate_fluid_sdf_into_collider(
    fluid_sdf: &mut CellCenteredScalarGrid3,
    collider_sdf: &CellCenteredScalarGrid3,
    depth: usize,
) {
    let data = collider_sdf.data();
    if data.size() != fluid_sdf.resolution() {
        return;
    }
    let mut valid = Array3::with_value(data.size(), true);
    valid.par_for_each_index_mut(|i, j, k, m| {
        *m = !crate::collider::is_inside_sdf(data[(i, j, k)]);
    });
    extrapolate_in_place(fluid_sdf.data_mut(), &valid, depth);
}
