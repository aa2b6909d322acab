//! Boundary conditions for the face velocities.
//!
//! Two solvers share one contract:
//! - [`FractionalBoundaryConditionSolver`] weighs each face by how much of it
//!   lies inside the collider, extrapolates fluid velocity into the solid and
//!   keeps only the frictional tangential part there.
//! - [`BlockedBoundaryConditionSolver`] runs the fractional pass and then
//!   overwrites every face of a collider cell with the collider velocity, so
//!   the pressure solve sees a hard no-flux wall.
//!
//! Closed domain edges zero the normal velocity either way.

use std::fmt::Debug;
use std::ops::BitOr;

use fdm::{Array3, Size3};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::collider::{fraction_inside_sdf, is_inside_sdf, project_and_apply_friction, SharedCollider};
use crate::grid::Grid3D;
use crate::scalar_grid::{extrapolate_in_place, CellCenteredScalarGrid3, ScalarField3};

/// Set of domain faces.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DirectionFlags(pub u8);

impl DirectionFlags {
    pub const NONE: Self = Self(0);
    pub const LEFT: Self = Self(1 << 0);
    pub const RIGHT: Self = Self(1 << 1);
    pub const DOWN: Self = Self(1 << 2);
    pub const UP: Self = Self(1 << 3);
    pub const BACK: Self = Self(1 << 4);
    pub const FRONT: Self = Self(1 << 5);
    pub const ALL: Self = Self(0b11_1111);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for DirectionFlags {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for DirectionFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Cell classification of the blocked solver.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(u8)]
pub enum BoundaryMarker {
    #[default]
    Fluid = 0,
    Collider = 1,
}

/// Constrains face velocities to a collider and the domain walls.
pub trait BoundaryConditionSolver: Send + Sync + Debug {
    fn collider(&self) -> Option<&SharedCollider>;

    /// Store a new collider and rebuild every derived field for the grid shape.
    fn update_collider(
        &mut self,
        collider: Option<SharedCollider>,
        grid_size: Size3,
        grid_spacing: DVec3,
        grid_origin: DVec3,
    );

    /// Apply the boundary conditions to `grid` in place.
    fn constrain_velocity(&mut self, grid: &mut Grid3D, extrapolation_depth: usize);

    /// Signed distance to the collider sampled at cell centers. `f64::MAX`
    /// everywhere when there is no collider.
    fn collider_sdf(&self) -> &CellCenteredScalarGrid3;

    fn closed_domain_boundary_flags(&self) -> DirectionFlags;

    fn set_closed_domain_boundary_flags(&mut self, flags: DirectionFlags);
}

/// Zero the normal velocity on every closed domain face.
pub fn apply_domain_clamps(grid: &mut Grid3D, flags: DirectionFlags) {
    let u = grid.u_mut();
    let s = u.size();
    for k in 0..s.z {
        for j in 0..s.y {
            if flags.contains(DirectionFlags::LEFT) {
                u[(0, j, k)] = 0.0;
            }
            if flags.contains(DirectionFlags::RIGHT) && s.x > 0 {
                u[(s.x - 1, j, k)] = 0.0;
            }
        }
    }

    let v = grid.v_mut();
    let s = v.size();
    for k in 0..s.z {
        for i in 0..s.x {
            if flags.contains(DirectionFlags::DOWN) {
                v[(i, 0, k)] = 0.0;
            }
            if flags.contains(DirectionFlags::UP) && s.y > 0 {
                v[(i, s.y - 1, k)] = 0.0;
            }
        }
    }

    let w = grid.w_mut();
    let s = w.size();
    for j in 0..s.y {
        for i in 0..s.x {
            if flags.contains(DirectionFlags::BACK) {
                w[(i, j, 0)] = 0.0;
            }
            if flags.contains(DirectionFlags::FRONT) && s.z > 0 {
                w[(i, j, s.z - 1)] = 0.0;
            }
        }
    }
}

// ========== Fractional ==========

#[derive(Debug, Default)]
pub struct FractionalBoundaryConditionSolver {
    collider: Option<SharedCollider>,
    grid_size: Size3,
    grid_spacing: DVec3,
    grid_origin: DVec3,
    closed_domain_boundary_flags: DirectionFlags,
    collider_sdf: CellCenteredScalarGrid3,
}

impl FractionalBoundaryConditionSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grid_size(&self) -> Size3 {
        self.grid_size
    }

    /// True if the cached fields were built for a different grid.
    fn is_stale_for(&self, grid: &Grid3D) -> bool {
        self.collider_sdf.resolution() != grid.resolution()
            || self.collider_sdf.data().size() != grid.resolution()
            || self.grid_spacing != grid.grid_spacing()
            || self.grid_origin != grid.origin()
    }

    fn constrain_to_collider(&self, collider: &SharedCollider, grid: &mut Grid3D, extrapolation_depth: usize) {
        let sdf = &self.collider_sdf;
        let h = grid.grid_spacing();

        // Faces fully inside the solid take the collider velocity and are
        // refilled from the open faces around them.
        for axis in 0..3 {
            let origin = grid.face_origin(axis);
            let offset = 0.5 * h[axis] * DVec3::AXES[axis];
            let size = grid.face(axis).size();

            let mut valid = Array3::with_value(size, true);
            valid.par_for_each_index_mut(|i, j, k, m| {
                let pt = origin + h * DVec3::new(i as f64, j as f64, k as f64);
                let frac = fraction_inside_sdf(sdf.sample(pt - offset), sdf.sample(pt + offset));
                *m = 1.0 - frac.clamp(0.0, 1.0) > 0.0;
            });

            let face = grid.face_mut(axis);
            face.par_for_each_index_mut(|i, j, k, value| {
                if !valid[(i, j, k)] {
                    let pt = origin + h * DVec3::new(i as f64, j as f64, k as f64);
                    *value = collider.velocity_at(pt)[axis];
                }
            });
            extrapolate_in_place(face, &valid, extrapolation_depth);
        }

        // Inside the solid keep only the frictional tangential motion.
        let friction = collider.friction_coefficient();
        let constrained: Vec<Array3<f64>> = (0..3)
            .map(|axis| {
                let origin = grid.face_origin(axis);
                let mut temp = grid.face(axis).clone();
                let snapshot = &*grid;
                temp.par_for_each_index_mut(|i, j, k, value| {
                    let pt = origin + h * DVec3::new(i as f64, j as f64, k as f64);
                    if !is_inside_sdf(sdf.sample(pt)) {
                        return;
                    }
                    let collider_vel = collider.velocity_at(pt);
                    let g = sdf.gradient(pt);
                    *value = if g.length_squared() > 0.0 {
                        let relative = snapshot.sample(pt) - collider_vel;
                        let velt = project_and_apply_friction(relative, g.normalize(), friction);
                        (velt + collider_vel)[axis]
                    } else {
                        collider_vel[axis]
                    };
                });
                temp
            })
            .collect();

        for (axis, temp) in constrained.into_iter().enumerate() {
            *grid.face_mut(axis) = temp;
        }
    }
}

impl BoundaryConditionSolver for FractionalBoundaryConditionSolver {
    fn collider(&self) -> Option<&SharedCollider> {
        self.collider.as_ref()
    }

    fn update_collider(
        &mut self,
        collider: Option<SharedCollider>,
        grid_size: Size3,
        grid_spacing: DVec3,
        grid_origin: DVec3,
    ) {
        let collider = collider.filter(|c| {
            if c.surface().is_empty() {
                log::warn!("Collider surface is degenerate; ignoring it");
                false
            } else {
                true
            }
        });

        self.grid_size = grid_size;
        self.grid_spacing = grid_spacing;
        self.grid_origin = grid_origin;
        self.collider_sdf
            .resize(grid_size, grid_spacing, grid_origin, f64::MAX);

        if let Some(c) = &collider {
            let c = c.clone();
            self.collider_sdf.fill(move |pt| c.signed_distance(pt));
        }
        self.collider = collider;
    }

    fn constrain_velocity(&mut self, grid: &mut Grid3D, extrapolation_depth: usize) {
        if self.is_stale_for(grid) {
            self.update_collider(
                self.collider.clone(),
                grid.resolution(),
                grid.grid_spacing(),
                grid.origin(),
            );
        }

        if let Some(collider) = self.collider.clone() {
            self.constrain_to_collider(&collider, grid, extrapolation_depth);
        }
        apply_domain_clamps(grid, self.closed_domain_boundary_flags);
    }

    fn collider_sdf(&self) -> &CellCenteredScalarGrid3 {
        &self.collider_sdf
    }

    fn closed_domain_boundary_flags(&self) -> DirectionFlags {
        self.closed_domain_boundary_flags
    }

    fn set_closed_domain_boundary_flags(&mut self, flags: DirectionFlags) {
        self.closed_domain_boundary_flags = flags;
    }
}

// ========== Blocked ==========

#[derive(Debug, Default)]
pub struct BlockedBoundaryConditionSolver {
    fractional: FractionalBoundaryConditionSolver,
    marker: Array3<BoundaryMarker>,
}

impl BlockedBoundaryConditionSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell markers, rebuilt wholesale on every collider update.
    pub fn marker(&self) -> &Array3<BoundaryMarker> {
        &self.marker
    }

    fn rebuild_marker(&mut self) {
        let sdf = self.fractional.collider_sdf.data();
        self.marker.resize(sdf.size());
        self.marker.par_for_each_index_mut(|i, j, k, m| {
            *m = if is_inside_sdf(sdf[(i, j, k)]) {
                BoundaryMarker::Collider
            } else {
                BoundaryMarker::Fluid
            };
        });
    }
}

impl BoundaryConditionSolver for BlockedBoundaryConditionSolver {
    fn collider(&self) -> Option<&SharedCollider> {
        self.fractional.collider()
    }

    fn update_collider(
        &mut self,
        collider: Option<SharedCollider>,
        grid_size: Size3,
        grid_spacing: DVec3,
        grid_origin: DVec3,
    ) {
        self.fractional
            .update_collider(collider, grid_size, grid_spacing, grid_origin);
        self.rebuild_marker();
    }

    fn constrain_velocity(&mut self, grid: &mut Grid3D, extrapolation_depth: usize) {
        if self.fractional.is_stale_for(grid) || self.marker.size() != grid.resolution() {
            self.update_collider(
                self.fractional.collider.clone(),
                grid.resolution(),
                grid.grid_spacing(),
                grid.origin(),
            );
        }

        self.fractional.constrain_velocity(grid, extrapolation_depth);

        let Some(collider) = self.fractional.collider.clone() else {
            return;
        };

        // No-flux: every interior face of a collider cell moves with the collider.
        // Faces shared by two collider cells get written twice, with the same value.
        let size = grid.resolution();
        self.marker.for_each_index(|i, j, k| {
            if self.marker[(i, j, k)] != BoundaryMarker::Collider {
                return;
            }
            if i > 0 {
                let pt = grid.u_position(i, j, k);
                grid.u_mut()[(i, j, k)] = collider.velocity_at(pt).x;
            }
            if i + 1 < size.x {
                let pt = grid.u_position(i + 1, j, k);
                grid.u_mut()[(i + 1, j, k)] = collider.velocity_at(pt).x;
            }
            if j > 0 {
                let pt = grid.v_position(i, j, k);
                grid.v_mut()[(i, j, k)] = collider.velocity_at(pt).y;
            }
            if j + 1 < size.y {
                let pt = grid.v_position(i, j + 1, k);
                grid.v_mut()[(i, j + 1, k)] = collider.velocity_at(pt).y;
            }
            if k > 0 {
                let pt = grid.w_position(i, j, k);
                grid.w_mut()[(i, j, k)] = collider.velocity_at(pt).z;
            }
            if k + 1 < size.z {
                let pt = grid.w_position(i, j, k + 1);
                grid.w_mut()[(i, j, k + 1)] = collider.velocity_at(pt).z;
            }
        });
    }

    fn collider_sdf(&self) -> &CellCenteredScalarGrid3 {
        self.fractional.collider_sdf()
    }

    fn closed_domain_boundary_flags(&self) -> DirectionFlags {
        self.fractional.closed_domain_boundary_flags()
    }

    fn set_closed_domain_boundary_flags(&mut self, flags: DirectionFlags) {
        self.fractional.set_closed_domain_boundary_flags(flags);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::collider::RigidBodyCollider;
    use crate::surface::{Plane, Sphere};

    fn floor_grid() -> Grid3D {
        // Cells j < 4 lie below y = 0
        Grid3D::new(Size3::new(8, 8, 1), DVec3::splat(0.125), DVec3::new(0.0, -0.5, 0.0))
    }

    #[test]
    fn test_direction_flags() {
        let flags = DirectionFlags::LEFT | DirectionFlags::UP;
        assert!(flags.contains(DirectionFlags::LEFT));
        assert!(!flags.contains(DirectionFlags::RIGHT));
        assert!(DirectionFlags::default().contains(DirectionFlags::FRONT));
        assert!(DirectionFlags::NONE.is_empty());
    }

    #[test]
    fn test_domain_clamps_only_touch_closed_edges() {
        let mut grid = Grid3D::with_cell_size(4, 4, 4, 0.25);
        grid.fill_velocity(DVec3::ONE);
        apply_domain_clamps(&mut grid, DirectionFlags::LEFT | DirectionFlags::FRONT);

        assert_eq!(grid.u()[(0, 1, 1)], 0.0);
        assert_eq!(grid.u()[(4, 1, 1)], 1.0);
        assert_eq!(grid.w()[(1, 1, 4)], 0.0);
        assert_eq!(grid.w()[(1, 1, 0)], 1.0);
        assert_eq!(grid.v()[(1, 0, 1)], 1.0);
    }

    #[test]
    fn test_no_collider_only_clamps() {
        let mut solver = FractionalBoundaryConditionSolver::new();
        let mut grid = Grid3D::with_cell_size(4, 4, 4, 0.25);
        grid.fill_velocity(DVec3::new(1.0, 2.0, 3.0));
        solver.update_collider(None, grid.resolution(), grid.grid_spacing(), grid.origin());
        solver.constrain_velocity(&mut grid, 5);

        assert_eq!(grid.u()[(0, 0, 0)], 0.0);
        assert_eq!(grid.u()[(2, 1, 1)], 1.0);
        assert_eq!(grid.v()[(2, 2, 1)], 2.0);
        assert!(solver.collider_sdf().data().as_slice().iter().all(|&d| d == f64::MAX));
    }

    #[test]
    fn test_marker_matches_sdf_sign() {
        let mut solver = BlockedBoundaryConditionSolver::new();
        let grid = floor_grid();
        let collider: SharedCollider = Arc::new(RigidBodyCollider::new(Plane::horizontal(0.0)));
        solver.update_collider(Some(collider), grid.resolution(), grid.grid_spacing(), grid.origin());

        let sdf = solver.collider_sdf();
        solver.marker().for_each_index(|i, j, k| {
            let inside = is_inside_sdf(sdf.data()[(i, j, k)]);
            assert_eq!(solver.marker()[(i, j, k)] == BoundaryMarker::Collider, inside);
            assert_eq!(inside, j < 4);
        });
    }

    #[test]
    fn test_blocked_floor_stops_downward_flow() {
        let mut solver = BlockedBoundaryConditionSolver::new();
        solver.set_closed_domain_boundary_flags(DirectionFlags::NONE);
        let mut grid = floor_grid();
        grid.fill_velocity(DVec3::new(0.0, -1.0, 0.0));

        let collider: SharedCollider = Arc::new(RigidBodyCollider::new(Plane::horizontal(0.0)));
        solver.update_collider(Some(collider), grid.resolution(), grid.grid_spacing(), grid.origin());
        solver.constrain_velocity(&mut grid, 5);

        for i in 0..8 {
            // Interface at y = 0 and everything below
            for j in 1..=4 {
                assert_eq!(grid.v()[(i, j, 0)], 0.0, "v({}, {})", i, j);
            }
            // Open fluid above is untouched
            assert_eq!(grid.v()[(i, 6, 0)], -1.0);
        }
    }

    #[test]
    fn test_moving_collider_velocity_is_imposed() {
        let mut solver = BlockedBoundaryConditionSolver::new();
        solver.set_closed_domain_boundary_flags(DirectionFlags::NONE);
        let mut grid = Grid3D::with_cell_size(16, 16, 16, 1.0 / 16.0);

        let collider: SharedCollider = Arc::new(
            RigidBodyCollider::new(Sphere::new(DVec3::splat(0.5), 0.25))
                .with_velocity(DVec3::new(0.5, 0.0, 0.0), DVec3::ZERO),
        );
        solver.update_collider(Some(collider), grid.resolution(), grid.grid_spacing(), grid.origin());
        solver.constrain_velocity(&mut grid, 5);

        // Cell (8, 8, 8) is inside the sphere; both its u faces move with it
        assert_eq!(solver.marker()[(8, 8, 8)], BoundaryMarker::Collider);
        assert_eq!(grid.u()[(8, 8, 8)], 0.5);
        assert_eq!(grid.u()[(9, 8, 8)], 0.5);
        assert_eq!(grid.v()[(8, 8, 8)], 0.0);
    }

    #[test]
    fn test_degenerate_collider_is_ignored() {
        let mut solver = BlockedBoundaryConditionSolver::new();
        let grid = Grid3D::with_cell_size(4, 4, 4, 0.25);
        let collider: SharedCollider = Arc::new(RigidBodyCollider::new(Sphere::new(DVec3::ZERO, 0.0)));
        solver.update_collider(Some(collider), grid.resolution(), grid.grid_spacing(), grid.origin());

        assert!(solver.collider().is_none());
        assert!(solver.marker().as_slice().iter().all(|&m| m == BoundaryMarker::Fluid));
    }

    #[test]
    fn test_stale_solver_refreshes_for_new_grid() {
        let mut solver = BlockedBoundaryConditionSolver::new();
        let collider: SharedCollider = Arc::new(RigidBodyCollider::new(Plane::horizontal(0.0)));
        solver.update_collider(Some(collider), Size3::new(2, 2, 2), DVec3::ONE, DVec3::ZERO);

        let mut grid = floor_grid();
        solver.constrain_velocity(&mut grid, 2);
        assert_eq!(solver.marker().size(), grid.resolution());
        assert_eq!(solver.collider_sdf().resolution(), grid.resolution());
    }
}
