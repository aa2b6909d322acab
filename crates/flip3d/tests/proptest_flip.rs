//! Property-based tests for the FLIP building blocks using proptest
//!
//! These tests verify invariants hold across random inputs:
//! - Grid sampling never overshoots the face values it interpolates
//! - P2G then PIC G2P reproduces a uniform velocity exactly
//! - Closed domain walls keep every particle inside the grid
//! - Blocked boundaries leave no flow through solid cells
//! - The particle searcher finds exactly the points a brute-force scan does

use std::sync::Arc;

use flip3d::advection::move_particles;
use flip3d::transfer::{grid_to_particles, particles_to_grid, TransferBuffers};
use flip3d::{
    BlockedBoundaryConditionSolver, BoundaryConditionSolver, BoundaryMarker, DirectionFlags,
    Grid3D, Particles3D, PointGridSearcher, RigidBodyCollider, SharedCollider, Sphere,
};
use glam::DVec3;
use proptest::prelude::*;

/// Strategy for a velocity with bounded components
fn velocity() -> impl Strategy<Value = DVec3> {
    (-5.0f64..5.0, -5.0f64..5.0, -5.0f64..5.0).prop_map(|(x, y, z)| DVec3::new(x, y, z))
}

/// Strategy for a point in the unit cube
fn unit_point() -> impl Strategy<Value = DVec3> {
    (0.0f64..1.0, 0.0f64..1.0, 0.0f64..1.0).prop_map(|(x, y, z)| DVec3::new(x, y, z))
}

/// Strategy for a small grid over the unit cube with random face values
fn random_grid() -> impl Strategy<Value = Grid3D> {
    (2usize..6, 2usize..6, 1usize..4).prop_flat_map(|(nx, ny, nz)| {
        let faces = (nx + 1) * ny * nz + nx * (ny + 1) * nz + nx * ny * (nz + 1);
        prop::collection::vec(-3.0f64..3.0, faces).prop_map(move |values| {
            let spacing = DVec3::new(1.0 / nx as f64, 1.0 / ny as f64, 1.0 / nz as f64);
            let mut grid = Grid3D::new(fdm::Size3::new(nx, ny, nz), spacing, DVec3::ZERO);
            let mut values = values.into_iter();
            for axis in 0..3 {
                for value in grid.face_mut(axis).as_mut_slice() {
                    *value = values.next().unwrap_or(0.0);
                }
            }
            grid
        })
    })
}

/// Particles on a lattice covering every cell of the grid
fn filled(grid: &Grid3D, velocity: DVec3) -> Particles3D {
    let res = grid.resolution();
    let h = grid.grid_spacing();
    let mut particles = Particles3D::new();
    for k in 0..2 * res.z {
        for j in 0..2 * res.y {
            for i in 0..2 * res.x {
                let pos = grid.origin() + 0.5 * h * (DVec3::new(i as f64, j as f64, k as f64) + 0.5);
                particles.spawn(pos, velocity);
            }
        }
    }
    particles
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: trilinear sampling stays within the range of face values
    #[test]
    fn test_sample_is_bounded(grid in random_grid(), pos in unit_point()) {
        let sample = grid.sample(pos);
        for axis in 0..3 {
            let face = grid.face(axis).as_slice();
            let lo = face.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = face.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(sample[axis] >= lo - 1e-12 && sample[axis] <= hi + 1e-12);
        }
    }

    /// Property: a uniform particle velocity survives P2G followed by PIC G2P
    #[test]
    fn test_uniform_velocity_round_trip(v in velocity(), n in 2usize..6) {
        let mut grid = Grid3D::with_cell_size(n, n, n, 1.0 / n as f64);
        let mut particles = filled(&grid, v);
        let mut buffers = TransferBuffers::new(&grid);

        particles_to_grid(&mut grid, &particles, &mut buffers);
        for p in &mut particles.list {
            p.velocity = DVec3::ZERO;
        }
        grid_to_particles(&grid, &mut particles, 1.0);

        for p in &particles.list {
            prop_assert!((p.velocity - v).length() < 1e-9, "{} vs {}", p.velocity, v);
        }
    }

    /// Property: with every wall closed no particle leaves the grid
    #[test]
    fn test_closed_walls_contain_particles(
        grid in random_grid(),
        positions in prop::collection::vec(unit_point(), 1..20),
        dt in 0.01f64..1.0,
    ) {
        let mut particles = Particles3D::new();
        for p in positions {
            particles.spawn_at(p);
        }
        move_particles(&grid, &mut particles, dt, DirectionFlags::ALL, None, 0.0);

        let bbox = grid.bounding_box();
        for p in &particles.list {
            prop_assert!(bbox.contains(p.position), "escaped to {}", p.position);
        }
    }

    /// Property: after blocked boundary enforcement every solid cell face is at rest
    #[test]
    fn test_blocked_solid_cells_are_at_rest(
        grid in random_grid(),
        center in unit_point(),
        radius in 0.1f64..0.5,
    ) {
        let mut grid = grid;
        let sphere: SharedCollider = Arc::new(RigidBodyCollider::new(Sphere::new(center, radius)));
        let mut boundary = BlockedBoundaryConditionSolver::new();
        boundary.update_collider(Some(sphere), grid.resolution(), grid.grid_spacing(), grid.origin());
        boundary.constrain_velocity(&mut grid, 3);

        let marker = boundary.marker();
        let mut moving = Vec::new();
        marker.for_each_index(|i, j, k| {
            if marker[(i, j, k)] != BoundaryMarker::Collider {
                return;
            }
            let faces = [
                grid.u()[(i, j, k)],
                grid.u()[(i + 1, j, k)],
                grid.v()[(i, j, k)],
                grid.v()[(i, j + 1, k)],
                grid.w()[(i, j, k)],
                grid.w()[(i, j, k + 1)],
            ];
            if faces.iter().any(|&f| f != 0.0) {
                moving.push((i, j, k));
            }
        });
        prop_assert!(moving.is_empty(), "solid cells with flow: {:?}", moving);
    }

    /// Property: the searcher agrees with a brute-force distance scan
    #[test]
    fn test_searcher_matches_brute_force(
        points in prop::collection::vec(unit_point(), 0..40),
        origin in unit_point(),
        radius in 0.05f64..0.5,
    ) {
        let mut searcher = PointGridSearcher::new(DVec3::ZERO, DVec3::ONE, 0.2);
        searcher.build(&points);

        let mut found = Vec::new();
        searcher.for_each_nearby_point(origin, radius, |idx, _| found.push(idx));
        found.sort_unstable();

        let expected: Vec<usize> = points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.distance_squared(origin) <= radius * radius)
            .map(|(idx, _)| idx)
            .collect();
        prop_assert_eq!(found, expected);
    }
}
