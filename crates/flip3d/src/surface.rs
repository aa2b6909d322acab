//! Collider surfaces.
//!
//! Primitives that answer closest-point queries and signed distances for the
//! colliders:
//! - Plane: infinite half-space, solid on the side opposite the normal
//! - Sphere: solid ball
//! - Aabb: solid axis-aligned box
//!
//! Signed distances are negative inside the solid.

use std::fmt::Debug;

use glam::DVec3;

/// Closest-point geometry consumed by colliders.
pub trait Surface: Send + Sync + Debug {
    fn closest_point(&self, p: DVec3) -> DVec3;

    /// Outward unit normal at the closest point.
    fn closest_normal(&self, p: DVec3) -> DVec3;

    fn is_inside(&self, p: DVec3) -> bool;

    /// True for zero-extent geometry that cannot answer queries.
    fn is_empty(&self) -> bool;

    fn closest_distance(&self, p: DVec3) -> f64 {
        (p - self.closest_point(p)).length()
    }

    fn signed_distance(&self, p: DVec3) -> f64 {
        let d = self.closest_distance(p);
        if self.is_inside(p) {
            -d
        } else {
            d
        }
    }

    /// Reference point for rigid rotation.
    fn translation(&self) -> DVec3 {
        DVec3::ZERO
    }
}

// ========== Plane ==========

/// Half-space `dot(p - point, normal) < 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    pub point: DVec3,
    pub normal: DVec3,
}

impl Plane {
    /// The normal is normalised; a zero normal yields an empty plane.
    pub fn new(point: DVec3, normal: DVec3) -> Self {
        Self {
            point,
            normal: normal.normalize_or_zero(),
        }
    }

    /// Floor at height `y`, solid below.
    pub fn horizontal(y: f64) -> Self {
        Self::new(DVec3::new(0.0, y, 0.0), DVec3::Y)
    }

    fn height(&self, p: DVec3) -> f64 {
        (p - self.point).dot(self.normal)
    }
}

impl Surface for Plane {
    fn closest_point(&self, p: DVec3) -> DVec3 {
        p - self.height(p) * self.normal
    }

    fn closest_normal(&self, _p: DVec3) -> DVec3 {
        self.normal
    }

    fn is_inside(&self, p: DVec3) -> bool {
        self.height(p) < 0.0
    }

    fn is_empty(&self) -> bool {
        self.normal == DVec3::ZERO
    }

    fn closest_distance(&self, p: DVec3) -> f64 {
        self.height(p).abs()
    }

    fn signed_distance(&self, p: DVec3) -> f64 {
        self.height(p)
    }

    fn translation(&self) -> DVec3 {
        self.point
    }
}

// ========== Sphere ==========

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sphere {
    pub center: DVec3,
    pub radius: f64,
}

impl Sphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }
}

impl Surface for Sphere {
    fn closest_point(&self, p: DVec3) -> DVec3 {
        self.center + self.radius * self.closest_normal(p)
    }

    fn closest_normal(&self, p: DVec3) -> DVec3 {
        let n = (p - self.center).normalize_or_zero();
        if n == DVec3::ZERO {
            DVec3::Y
        } else {
            n
        }
    }

    fn is_inside(&self, p: DVec3) -> bool {
        p.distance_squared(self.center) < self.radius * self.radius
    }

    fn is_empty(&self) -> bool {
        !(self.radius > 0.0)
    }

    fn closest_distance(&self, p: DVec3) -> f64 {
        (p.distance(self.center) - self.radius).abs()
    }

    fn signed_distance(&self, p: DVec3) -> f64 {
        p.distance(self.center) - self.radius
    }

    fn translation(&self) -> DVec3 {
        self.center
    }
}

// ========== Box ==========

/// Solid axis-aligned box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub lower: DVec3,
    pub upper: DVec3,
}

impl Aabb {
    pub fn new(lower: DVec3, upper: DVec3) -> Self {
        Self {
            lower: lower.min(upper),
            upper: lower.max(upper),
        }
    }

    fn center(&self) -> DVec3 {
        0.5 * (self.lower + self.upper)
    }

    fn half_extent(&self) -> DVec3 {
        0.5 * (self.upper - self.lower)
    }

    /// Axis and side of the face nearest to an interior point.
    fn nearest_face(&self, p: DVec3) -> (usize, f64) {
        let q = p - self.center();
        let slack = self.half_extent() - q.abs();
        let axis = if slack.x <= slack.y && slack.x <= slack.z {
            0
        } else if slack.y <= slack.z {
            1
        } else {
            2
        };
        (axis, if q[axis] >= 0.0 { 1.0 } else { -1.0 })
    }
}

impl Surface for Aabb {
    fn closest_point(&self, p: DVec3) -> DVec3 {
        if self.is_inside(p) {
            let (axis, side) = self.nearest_face(p);
            let mut q = p;
            q[axis] = if side > 0.0 { self.upper[axis] } else { self.lower[axis] };
            q
        } else {
            p.clamp(self.lower, self.upper)
        }
    }

    fn closest_normal(&self, p: DVec3) -> DVec3 {
        if self.is_inside(p) {
            let (axis, side) = self.nearest_face(p);
            let mut n = DVec3::ZERO;
            n[axis] = side;
            return n;
        }
        let n = (p - p.clamp(self.lower, self.upper)).normalize_or_zero();
        if n == DVec3::ZERO {
            // On the surface: fall back to the face rule
            let (axis, side) = self.nearest_face(p);
            let mut n = DVec3::ZERO;
            n[axis] = side;
            n
        } else {
            n
        }
    }

    fn is_inside(&self, p: DVec3) -> bool {
        p.cmpgt(self.lower).all() && p.cmplt(self.upper).all()
    }

    fn is_empty(&self) -> bool {
        let e = self.upper - self.lower;
        !(e.x > 0.0 && e.y > 0.0 && e.z > 0.0)
    }

    fn translation(&self) -> DVec3 {
        self.center()
    }
}
