//! Particle advection through the grid velocity field.

use rayon::prelude::*;

use crate::boundary::DirectionFlags;
use crate::collider::SharedCollider;
use crate::grid::Grid3D;
use crate::particle::Particles3D;

/// Move particles along the grid velocity with midpoint (RK2) steps.
///
/// The path is split into `max(ceil(cfl), 1)` sub-steps so no sub-step
/// crosses more than a cell. Particles are then clamped to closed domain
/// faces, zeroing the velocity component into that face, and pushed out of
/// the collider. Particle velocities are only changed by those two
/// constraints.
pub fn move_particles(
    grid: &Grid3D,
    particles: &mut Particles3D,
    dt: f64,
    closed_domain_boundary_flags: DirectionFlags,
    collider: Option<&SharedCollider>,
    restitution: f64,
) {
    if grid.is_empty() || particles.is_empty() {
        return;
    }

    let bbox = grid.bounding_box();
    let min_h = grid.grid_spacing().min_element();
    let cfl = grid.max_abs_velocity_component() * dt / min_h;
    let sub_steps = (cfl.ceil() as usize).max(1);
    let sub_dt = dt / sub_steps as f64;
    let flags = closed_domain_boundary_flags;

    particles.list.par_iter_mut().for_each(|particle| {
        let mut pt = particle.position;
        for _ in 0..sub_steps {
            let vel0 = grid.sample(pt);
            let mid = pt + 0.5 * sub_dt * vel0;
            pt += sub_dt * grid.sample(mid);
        }

        let mut vel = particle.velocity;
        let walls = [
            (DirectionFlags::LEFT, DirectionFlags::RIGHT),
            (DirectionFlags::DOWN, DirectionFlags::UP),
            (DirectionFlags::BACK, DirectionFlags::FRONT),
        ];
        for (axis, (lower, upper)) in walls.into_iter().enumerate() {
            if flags.contains(lower) && pt[axis] <= bbox.lower[axis] {
                pt[axis] = bbox.lower[axis];
                vel[axis] = 0.0;
            }
            if flags.contains(upper) && pt[axis] >= bbox.upper[axis] {
                pt[axis] = bbox.upper[axis];
                vel[axis] = 0.0;
            }
        }

        if let Some(collider) = collider {
            collider.resolve_collision(0.0, restitution, &mut pt, &mut vel);
        }

        particle.position = pt;
        particle.velocity = vel;
    });
}
