//! Colliders: surfaces with rigid-body motion and a friction coefficient.

use std::fmt::Debug;
use std::sync::Arc;

use glam::DVec3;

use crate::surface::Surface;

/// True if a signed distance lies inside the solid.
#[inline]
pub fn is_inside_sdf(phi: f64) -> bool {
    phi < 0.0
}

/// Fraction of the segment between two samples that lies inside the solid.
pub fn fraction_inside_sdf(phi0: f64, phi1: f64) -> f64 {
    match (is_inside_sdf(phi0), is_inside_sdf(phi1)) {
        (true, true) => 1.0,
        (true, false) => phi0 / (phi0 - phi1),
        (false, true) => phi1 / (phi1 - phi0),
        (false, false) => 0.0,
    }
}

/// Fraction of a unit square inside the solid, from the signed distances at
/// its four corners.
///
/// Corners go counter-clockwise from the bottom left. Two inside corners on
/// a diagonal are disambiguated by the average of all four.
pub fn fraction_inside(
    phi_bottom_left: f64,
    phi_bottom_right: f64,
    phi_top_left: f64,
    phi_top_right: f64,
) -> f64 {
    let mut c = [phi_bottom_left, phi_bottom_right, phi_top_right, phi_top_left];
    let inside = c.iter().filter(|&&phi| is_inside_sdf(phi)).count();

    match inside {
        4 => 1.0,
        3 => {
            // Outside corner first; cut off the exterior triangle
            while is_inside_sdf(c[0]) {
                c.rotate_left(1);
            }
            let side0 = 1.0 - fraction_inside_sdf(c[0], c[3]);
            let side1 = 1.0 - fraction_inside_sdf(c[0], c[1]);
            1.0 - 0.5 * side0 * side1
        }
        2 => {
            while !is_inside_sdf(c[0]) || !(is_inside_sdf(c[1]) || is_inside_sdf(c[2])) {
                c.rotate_left(1);
            }
            if is_inside_sdf(c[1]) {
                // Adjacent: a trapezoid
                let left = fraction_inside_sdf(c[0], c[3]);
                let right = fraction_inside_sdf(c[1], c[2]);
                0.5 * (left + right)
            } else if is_inside_sdf(0.25 * c.iter().sum::<f64>()) {
                // Diagonal with a solid middle: two exterior triangles
                let side1 = 1.0 - fraction_inside_sdf(c[0], c[3]);
                let side3 = 1.0 - fraction_inside_sdf(c[2], c[3]);
                let side2 = 1.0 - fraction_inside_sdf(c[2], c[1]);
                let side0 = 1.0 - fraction_inside_sdf(c[0], c[1]);
                1.0 - 0.5 * (side1 * side3 + side0 * side2)
            } else {
                // Diagonal with an open middle: two interior triangles
                let side0 = fraction_inside_sdf(c[0], c[1]);
                let side1 = fraction_inside_sdf(c[0], c[3]);
                let side2 = fraction_inside_sdf(c[2], c[1]);
                let side3 = fraction_inside_sdf(c[2], c[3]);
                0.5 * (side0 * side1 + side2 * side3)
            }
        }
        1 => {
            while !is_inside_sdf(c[0]) {
                c.rotate_left(1);
            }
            let side0 = fraction_inside_sdf(c[0], c[3]);
            let side1 = fraction_inside_sdf(c[0], c[1]);
            0.5 * side0 * side1
        }
        _ => 0.0,
    }
}

/// Tangential part of `vel` against `normal`, damped by Coulomb friction
/// proportional to the approaching normal speed.
pub fn project_and_apply_friction(vel: DVec3, normal: DVec3, friction_coefficient: f64) -> DVec3 {
    let mut velt = vel - vel.dot(normal) * normal;
    if velt.length_squared() > 0.0 {
        let veln = (-vel.dot(normal)).max(0.0);
        velt *= (1.0 - friction_coefficient * veln / velt.length()).max(0.0);
    }
    velt
}

/// A moving solid the fluid cannot enter.
pub trait Collider: Send + Sync + Debug {
    fn surface(&self) -> &dyn Surface;

    /// Surface velocity at `point`.
    fn velocity_at(&self, point: DVec3) -> DVec3;

    fn friction_coefficient(&self) -> f64;

    fn closest_point(&self, p: DVec3) -> DVec3 {
        self.surface().closest_point(p)
    }

    fn closest_normal(&self, p: DVec3) -> DVec3 {
        self.surface().closest_normal(p)
    }

    fn closest_distance(&self, p: DVec3) -> f64 {
        self.surface().closest_distance(p)
    }

    fn is_inside(&self, p: DVec3) -> bool {
        self.surface().is_inside(p)
    }

    fn signed_distance(&self, p: DVec3) -> f64 {
        self.surface().signed_distance(p)
    }

    /// Push a point of `radius` out of the collider.
    ///
    /// A penetrating point (inside, or closer than `radius`) is moved to
    /// `closest + radius * normal`. If it is approaching, the normal part of
    /// its velocity relative to the collider is reflected and scaled by
    /// `restitution`, and the tangential part is damped by friction
    /// (Bridson et al. 2002).
    fn resolve_collision(&self, radius: f64, restitution: f64, position: &mut DVec3, velocity: &mut DVec3) {
        if self.surface().is_empty() {
            return;
        }

        let p = *position;
        let distance = self.closest_distance(p);
        if !(self.is_inside(p) || distance < radius) {
            return;
        }

        let normal = self.closest_normal(p);
        let target = self.closest_point(p) + radius * normal;
        let collider_vel = self.velocity_at(p);

        let relative = *velocity - collider_vel;
        let n_dot_rel = normal.dot(relative);
        let mut rel_n = n_dot_rel * normal;
        let mut rel_t = relative - rel_n;

        if n_dot_rel < 0.0 {
            let delta_rel_n = (-restitution - 1.0) * rel_n;
            rel_n *= -restitution;

            if rel_t.length_squared() > 0.0 {
                let scale = (1.0 - self.friction_coefficient() * delta_rel_n.length() / rel_t.length()).max(0.0);
                rel_t *= scale;
            }

            *velocity = rel_n + rel_t + collider_vel;
        }

        *position = target;
    }
}

/// Colliders are shared between the fluid solver and its boundary solver.
pub type SharedCollider = Arc<dyn Collider>;

/// Rigid body: `velocity_at(p) = linear + angular × (p - pivot)`.
#[derive(Clone, Debug)]
pub struct RigidBodyCollider<S: Surface> {
    pub surface: S,
    pub linear_velocity: DVec3,
    pub angular_velocity: DVec3,
    friction_coefficient: f64,
}

impl<S: Surface> RigidBodyCollider<S> {
    /// Static collider without friction.
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            linear_velocity: DVec3::ZERO,
            angular_velocity: DVec3::ZERO,
            friction_coefficient: 0.0,
        }
    }

    pub fn with_velocity(mut self, linear_velocity: DVec3, angular_velocity: DVec3) -> Self {
        self.linear_velocity = linear_velocity;
        self.angular_velocity = angular_velocity;
        self
    }

    pub fn with_friction(mut self, friction_coefficient: f64) -> Self {
        self.set_friction_coefficient(friction_coefficient);
        self
    }

    /// Negative values are clamped to zero.
    pub fn set_friction_coefficient(&mut self, friction_coefficient: f64) {
        self.friction_coefficient = friction_coefficient.max(0.0);
    }
}

impl<S: Surface> Collider for RigidBodyCollider<S> {
    fn surface(&self) -> &dyn Surface {
        &self.surface
    }

    fn velocity_at(&self, point: DVec3) -> DVec3 {
        let r = point - self.surface.translation();
        self.linear_velocity + self.angular_velocity.cross(r)
    }

    fn friction_coefficient(&self) -> f64 {
        self.friction_coefficient
    }
}
