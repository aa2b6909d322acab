//! 3D PIC/FLIP fluid simulation on a staggered MAC grid.
//!
//! Marker particles carry velocity; each step splats it onto the grid,
//! constrains it against a collider and the domain walls, optionally diffuses
//! it for viscosity, projects it divergence-free with a pressure solve from
//! the `fdm` crate, and reads the change back into the particles.
//!
//! # Example
//!
//! ```
//! use flip3d::{BoundingBox3, FlipSolver3D, FluidConfig, VolumeEmitter};
//! use glam::DVec3;
//!
//! let config = FluidConfig::with_resolution(8, 8, 8, 0.125);
//! let mut solver = FlipSolver3D::new(config);
//!
//! // Water column in one corner
//! let column = BoundingBox3::new(DVec3::splat(0.05), DVec3::new(0.45, 0.7, 0.45));
//! solver.set_emitter(Box::new(VolumeEmitter::new(column, 0.0625)));
//!
//! solver.advance(1.0 / 60.0);
//! assert_eq!(solver.frame(), 1);
//! assert!(!solver.particles.is_empty());
//! ```

pub mod advection;
pub mod boundary;
pub mod collider;
pub mod config;
pub mod diffusion;
pub mod emitter;
pub mod grid;
pub mod particle;
pub mod pressure;
pub mod scalar_grid;
pub mod serde_utils;
pub mod surface;
pub mod transfer;

pub use boundary::{
    BlockedBoundaryConditionSolver, BoundaryConditionSolver, BoundaryMarker, DirectionFlags,
    FractionalBoundaryConditionSolver,
};
pub use collider::{Collider, RigidBodyCollider, SharedCollider};
pub use config::{BoundaryKind, FluidConfig, PressureConfig, PressureSolverKind};
pub use diffusion::{BackwardEulerDiffusionSolver, DiffusionBoundary};
pub use emitter::{ParticleEmitter, VolumeEmitter};
pub use grid::{BoundingBox3, Grid3D};
pub use particle::{Particle3D, Particles3D, PointGridSearcher};
pub use pressure::{
    FractionalSinglePhasePressureSolver, PressureMarker, PressureSolver, SinglePhasePressureSolver,
};
pub use scalar_grid::{CellCenteredScalarGrid3, ConstantScalarField3, ScalarField3};
pub use surface::{Aabb, Plane, Sphere, Surface};

use std::time::Instant;

use fdm::SolverResult;
use glam::DVec3;

use transfer::TransferBuffers;

/// PIC/FLIP fluid solver.
pub struct FlipSolver3D {
    /// The MAC grid for pressure and velocity
    pub grid: Grid3D,
    /// All particles in the simulation
    pub particles: Particles3D,

    config: FluidConfig,
    boundary_solver: Box<dyn BoundaryConditionSolver>,
    pressure_solver: Box<dyn PressureSolver>,
    diffusion_solver: BackwardEulerDiffusionSolver,
    collider: Option<SharedCollider>,
    emitter: Option<Box<dyn ParticleEmitter>>,

    /// Negative inside the particle blob, sampled at cell centres
    fluid_sdf: CellCenteredScalarGrid3,
    transfer_buffers: TransferBuffers,
    searcher: PointGridSearcher,

    /// Current simulation frame
    frame: u64,
}

fn make_boundary_solver(kind: BoundaryKind) -> Box<dyn BoundaryConditionSolver> {
    match kind {
        BoundaryKind::Blocked => Box::new(BlockedBoundaryConditionSolver::new()),
        BoundaryKind::Fractional => Box::new(FractionalBoundaryConditionSolver::new()),
    }
}

fn make_searcher(grid: &Grid3D) -> PointGridSearcher {
    let bbox = grid.bounding_box();
    let radius = transfer::particle_radius(grid.grid_spacing());
    PointGridSearcher::new(bbox.lower, bbox.upper, 2.0 * radius)
}

impl FlipSolver3D {
    /// Create a solver for the configured domain with no particles.
    pub fn new(mut config: FluidConfig) -> Self {
        config.pic_blending_factor = config.pic_blending_factor.clamp(0.0, 1.0);

        let grid = Grid3D::new(config.resolution, config.grid_spacing, config.origin);
        let mut boundary_solver = make_boundary_solver(config.boundary);
        boundary_solver.set_closed_domain_boundary_flags(config.closed_domain_boundary_flags);
        boundary_solver.update_collider(None, grid.resolution(), grid.grid_spacing(), grid.origin());

        Self {
            particles: Particles3D::new(),
            pressure_solver: pressure::pressure_solver_for(config.boundary, config.pressure.clone()),
            diffusion_solver: BackwardEulerDiffusionSolver::new(config.viscosity_boundary),
            fluid_sdf: CellCenteredScalarGrid3::new(
                grid.resolution(),
                grid.grid_spacing(),
                grid.origin(),
                f64::MAX,
            ),
            transfer_buffers: TransferBuffers::new(&grid),
            searcher: make_searcher(&grid),
            grid,
            config,
            boundary_solver,
            collider: None,
            emitter: None,
            frame: 0,
        }
    }

    /// Load the configuration from JSON and build a solver from it.
    pub fn from_json(path: &std::path::Path) -> Result<Self, Box<dyn std::error::Error>> {
        let config = FluidConfig::load_json(path)?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &FluidConfig {
        &self.config
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn pic_blending_factor(&self) -> f64 {
        self.config.pic_blending_factor
    }

    /// 0 is pure FLIP, 1 is pure PIC. Clamped to [0, 1].
    pub fn set_pic_blending_factor(&mut self, factor: f64) {
        self.config.pic_blending_factor = factor.clamp(0.0, 1.0);
    }

    pub fn set_gravity(&mut self, gravity: DVec3) {
        self.config.gravity = gravity;
    }

    pub fn set_max_cfl(&mut self, max_cfl: f64) {
        self.config.max_cfl = max_cfl.max(f64::EPSILON);
    }

    pub fn closed_domain_boundary_flags(&self) -> DirectionFlags {
        self.config.closed_domain_boundary_flags
    }

    pub fn set_closed_domain_boundary_flags(&mut self, flags: DirectionFlags) {
        self.config.closed_domain_boundary_flags = flags;
        self.boundary_solver.set_closed_domain_boundary_flags(flags);
    }

    pub fn collider(&self) -> Option<&SharedCollider> {
        self.collider.as_ref()
    }

    /// The collider is re-sampled at the start of every sub-step, so a
    /// moving collider is picked up without further calls.
    pub fn set_collider(&mut self, collider: Option<SharedCollider>) {
        self.collider = collider;
        self.boundary_solver.update_collider(
            self.collider.clone(),
            self.grid.resolution(),
            self.grid.grid_spacing(),
            self.grid.origin(),
        );
    }

    pub fn viscosity_coefficient(&self) -> f64 {
        self.config.viscosity_coefficient
    }

    /// Negative values are clamped to 0, which turns viscosity off.
    pub fn set_viscosity_coefficient(&mut self, viscosity: f64) {
        self.config.viscosity_coefficient = viscosity.max(0.0);
    }

    pub fn set_emitter(&mut self, emitter: Box<dyn ParticleEmitter>) {
        self.emitter = Some(emitter);
    }

    pub fn boundary_solver(&self) -> &dyn BoundaryConditionSolver {
        self.boundary_solver.as_ref()
    }

    pub fn pressure_solver(&self) -> &dyn PressureSolver {
        self.pressure_solver.as_ref()
    }

    /// Swap the pressure solver. The boundary-condition solver is replaced
    /// with the kind the new solver pairs with, keeping the collider and the
    /// closed domain faces.
    pub fn set_pressure_solver(&mut self, solver: Box<dyn PressureSolver>) {
        let kind = solver.suggested_boundary_kind();
        self.config.pressure = solver.config().clone();
        self.pressure_solver = solver;

        if kind != self.config.boundary {
            self.config.boundary = kind;
            self.boundary_solver = make_boundary_solver(kind);
            self.boundary_solver
                .set_closed_domain_boundary_flags(self.config.closed_domain_boundary_flags);
            self.boundary_solver.update_collider(
                self.collider.clone(),
                self.grid.resolution(),
                self.grid.grid_spacing(),
                self.grid.origin(),
            );
        }
    }

    /// Outcome of the last pressure solve.
    pub fn last_pressure_result(&self) -> SolverResult<f64> {
        self.pressure_solver.last_result()
    }

    pub fn fluid_sdf(&self) -> &CellCenteredScalarGrid3 {
        &self.fluid_sdf
    }

    /// Move to a new domain. Grid fields are reset; particles are kept.
    pub fn resize_grid(&mut self, resolution: fdm::Size3, grid_spacing: DVec3, origin: DVec3) {
        self.grid.resize(resolution, grid_spacing, origin);
        self.config.resolution = resolution;
        self.config.grid_spacing = grid_spacing;
        self.config.origin = origin;
        self.fluid_sdf
            .resize(resolution, grid_spacing, origin, f64::MAX);
        self.transfer_buffers.reset(&self.grid);
        self.searcher = make_searcher(&self.grid);
        self.boundary_solver
            .update_collider(self.collider.clone(), resolution, grid_spacing, origin);
    }

    /// Grid CFL number for a step of `dt`, counting particle velocities too.
    pub fn cfl(&self, dt: f64) -> f64 {
        let particle_max = self
            .particles
            .list
            .iter()
            .map(|p| p.velocity.abs().max_element())
            .fold(0.0, f64::max);
        let max_vel = self.grid.max_abs_velocity_component().max(particle_max);
        max_vel * dt / self.grid.grid_spacing().min_element()
    }

    /// Sub-steps needed to keep each one within `max_cfl`.
    pub fn number_of_sub_steps(&self, dt: f64) -> usize {
        let n = (self.cfl(dt) / self.config.max_cfl).ceil();
        if n.is_finite() && n >= 1.0 {
            n as usize
        } else {
            1
        }
    }

    /// Advance the simulation by `dt`, sub-stepping to respect the CFL limit.
    pub fn advance(&mut self, dt: f64) {
        if self.grid.is_empty() {
            log::warn!("Empty grid; nothing to simulate");
            return;
        }

        let start = Instant::now();
        let sub_steps = self.number_of_sub_steps(dt);
        let sub_dt = dt / sub_steps as f64;
        for _ in 0..sub_steps {
            self.advance_sub_step(sub_dt);
        }
        self.frame += 1;

        log::debug!(
            "Frame {}: {} sub-steps, {} particles, {:.2?}",
            self.frame,
            sub_steps,
            self.particles.len(),
            start.elapsed()
        );
    }

    fn extrapolation_depth(&self) -> usize {
        (self.config.max_cfl.ceil() as usize).max(1)
    }

    fn apply_boundary_condition(&mut self) {
        let depth = self.extrapolation_depth();
        self.boundary_solver.constrain_velocity(&mut self.grid, depth);
    }

    fn advance_sub_step(&mut self, dt: f64) {
        let t0 = Instant::now();
        let depth = self.extrapolation_depth();

        // 1. Collider and emitter
        self.boundary_solver.update_collider(
            self.collider.clone(),
            self.grid.resolution(),
            self.grid.grid_spacing(),
            self.grid.origin(),
        );
        if let Some(emitter) = self.emitter.as_mut() {
            if emitter.is_enabled() {
                emitter.emit(&mut self.particles, dt);
            }
        }

        // 2. P2G saves the FLIP snapshot, so velocity removed by the boundary
        //    pass below reaches the particles as part of the delta
        transfer::particles_to_grid(&mut self.grid, &self.particles, &mut self.transfer_buffers);
        transfer::build_fluid_sdf(&self.particles, &mut self.searcher, &mut self.fluid_sdf);
        transfer::extrapolate_fluid_sdf_into_collider(
            &mut self.fluid_sdf,
            self.boundary_solver.collider_sdf(),
            depth,
        );
        transfer::extrapolate_velocity_into_air(&mut self.grid, &self.transfer_buffers, depth);
        self.apply_boundary_condition();
        let t1 = Instant::now();

        // 3. External forces
        self.grid.add_uniform_acceleration(self.config.gravity, dt);
        self.apply_boundary_condition();

        // 4. Viscosity
        if self.config.viscosity_coefficient > f64::EPSILON {
            let result = self.diffusion_solver.solve_face_centered(
                &mut self.grid,
                self.config.viscosity_coefficient,
                dt,
                self.boundary_solver.collider_sdf(),
                &self.fluid_sdf,
            );
            if !result.converged {
                log::warn!(
                    "Viscosity solve did not converge: residual {:e} after {} iterations",
                    result.residual,
                    result.iterations
                );
            }
            self.apply_boundary_condition();
        }

        // 5. Pressure projection
        let result = self.pressure_solver.project(
            &mut self.grid,
            self.boundary_solver.collider_sdf(),
            self.boundary_solver.collider(),
            &self.fluid_sdf,
        );
        if !result.converged {
            log::warn!(
                "Pressure solve did not converge: residual {:e} after {} iterations",
                result.residual,
                result.iterations
            );
        }
        self.apply_boundary_condition();
        let t2 = Instant::now();

        // 6. Extrapolate the projected field, then G2P
        transfer::extrapolate_velocity_into_air(&mut self.grid, &self.transfer_buffers, depth);
        self.apply_boundary_condition();
        transfer::grid_to_particles(&self.grid, &mut self.particles, self.config.pic_blending_factor);

        // 7. Advect particles
        advection::move_particles(
            &self.grid,
            &mut self.particles,
            dt,
            self.config.closed_domain_boundary_flags,
            self.boundary_solver.collider(),
            self.config.particle_restitution,
        );
        let t3 = Instant::now();

        log::debug!(
            "Sub-step dt={:.4}: transfer {:.2?}, forces and pressure {:.2?}, advect {:.2?}",
            dt,
            t1 - t0,
            t2 - t1,
            t3 - t2
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn block_of_particles(solver: &mut FlipSolver3D, lo: DVec3, hi: DVec3, spacing: f64) {
        let bbox = BoundingBox3::new(lo, hi);
        let mut emitter = VolumeEmitter::new(bbox, spacing);
        emitter.emit(&mut solver.particles, 0.0);
    }

    #[test]
    fn test_solver_creation() {
        let solver = FlipSolver3D::new(FluidConfig::with_resolution(16, 32, 8, 0.1));
        assert_eq!(solver.grid.resolution(), fdm::Size3::new(16, 32, 8));
        assert_eq!(solver.frame(), 0);
        assert!(solver.particles.is_empty());
        assert_eq!(solver.pic_blending_factor(), 0.0);
        assert_eq!(solver.closed_domain_boundary_flags(), DirectionFlags::ALL);
        assert_eq!(solver.config().pressure.solver, PressureSolverKind::Iccg);
    }

    #[test]
    fn test_pic_blending_factor_is_clamped() {
        let mut config = FluidConfig::with_resolution(4, 4, 4, 0.25);
        config.pic_blending_factor = 3.0;
        let mut solver = FlipSolver3D::new(config);
        assert_eq!(solver.pic_blending_factor(), 1.0);
        solver.set_pic_blending_factor(-0.5);
        assert_eq!(solver.pic_blending_factor(), 0.0);
    }

    #[test]
    fn test_sub_steps_follow_cfl() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(8, 8, 8, 0.125));
        assert_eq!(solver.number_of_sub_steps(0.125), 1);

        // |u| = 6 over h = 0.125 for dt = 0.125 is CFL 6, max CFL 5
        solver.grid.fill_velocity(DVec3::new(6.0, 0.0, 0.0));
        assert_eq!(solver.cfl(0.125), 6.0);
        assert_eq!(solver.number_of_sub_steps(0.125), 2);

        solver.set_max_cfl(1.0);
        assert_eq!(solver.number_of_sub_steps(0.125), 6);

        // A fast particle counts as well
        solver.particles.spawn(DVec3::splat(0.5), DVec3::new(0.0, -16.0, 0.0));
        assert_eq!(solver.cfl(0.125), 16.0);
    }

    #[test]
    fn test_empty_grid_advance_is_noop() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(0, 4, 4, 0.25));
        solver.particles.spawn_at(DVec3::ONE);
        solver.advance(0.01);
        assert_eq!(solver.frame(), 0);
        assert_eq!(solver.particles.list[0].position, DVec3::ONE);
    }

    #[test]
    fn test_particles_fall_and_stay_inside() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(8, 8, 8, 0.125));
        block_of_particles(
            &mut solver,
            DVec3::new(0.2, 0.5, 0.2),
            DVec3::new(0.6, 0.8, 0.6),
            0.0625,
        );
        let count = solver.particles.len();
        let avg_y = |s: &FlipSolver3D| {
            s.particles.list.iter().map(|p| p.position.y).sum::<f64>() / s.particles.len() as f64
        };
        let start_y = avg_y(&solver);

        for _ in 0..10 {
            solver.advance(1.0 / 60.0);
        }

        assert_eq!(solver.frame(), 10);
        assert_eq!(solver.particles.len(), count);
        assert!(avg_y(&solver) < start_y, "particles did not fall");
        let bbox = solver.grid.bounding_box();
        assert!(solver.particles.list.iter().all(|p| bbox.contains(p.position)));
    }

    #[test]
    fn test_resting_pool_stays_calm() {
        let mut config = FluidConfig::with_resolution(8, 8, 8, 0.125);
        config.pressure.max_iterations = 200;
        let mut solver = FlipSolver3D::new(config);
        block_of_particles(&mut solver, DVec3::splat(0.03), DVec3::new(0.97, 0.4, 0.97), 0.0625);

        for _ in 0..30 {
            solver.advance(1.0 / 120.0);
        }

        let max_vel = solver
            .particles
            .list
            .iter()
            .map(|p| p.velocity.length())
            .fold(0.0, f64::max);
        assert!(max_vel < 1.0, "velocities exploded: {}", max_vel);
    }

    #[test]
    fn test_closed_walls_stop_uniform_flow() {
        // A full box moving into its own walls can only come to rest
        let mut config = FluidConfig::with_resolution(4, 4, 4, 0.25);
        config.gravity = DVec3::ZERO;
        config.pic_blending_factor = 0.0;
        config.pressure.tolerance = 1e-10;
        let mut solver = FlipSolver3D::new(config);
        for i in 0..8 {
            for j in 0..8 {
                for k in 0..8 {
                    let position = DVec3::new(i as f64, j as f64, k as f64) * 0.125 + 0.0625;
                    solver.particles.spawn(position, DVec3::X);
                }
            }
        }

        solver.advance(0.01);

        assert_eq!(solver.particles.len(), 512);
        for p in &solver.particles.list {
            assert!(
                p.velocity.x.abs() < 1e-3,
                "particle at {:?} kept vx = {}",
                p.position,
                p.velocity.x
            );
        }
    }

    #[test]
    fn test_set_pressure_solver_swaps_boundary_kind() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(8, 8, 8, 0.125));
        assert_eq!(solver.config().boundary, BoundaryKind::Blocked);
        let floor: SharedCollider = Arc::new(RigidBodyCollider::new(Plane::horizontal(0.25)));
        solver.set_collider(Some(floor));
        solver.set_closed_domain_boundary_flags(DirectionFlags::DOWN);

        let mut pressure = PressureConfig::default();
        pressure.max_iterations = 50;
        solver.set_pressure_solver(Box::new(FractionalSinglePhasePressureSolver::new(pressure)));

        assert_eq!(solver.config().boundary, BoundaryKind::Fractional);
        assert_eq!(solver.config().pressure.max_iterations, 50);
        assert_eq!(
            solver.pressure_solver().suggested_boundary_kind(),
            BoundaryKind::Fractional
        );
        assert!(solver.boundary_solver().collider().is_some());
        assert_eq!(
            solver.boundary_solver().closed_domain_boundary_flags(),
            DirectionFlags::DOWN
        );
        assert!(solver.boundary_solver().collider_sdf().data()[(0, 0, 0)] < 0.0);

        block_of_particles(&mut solver, DVec3::new(0.1, 0.3, 0.1), DVec3::new(0.9, 0.6, 0.9), 0.0625);
        solver.advance(1.0 / 60.0);
        assert_eq!(solver.frame(), 1);
    }

    #[test]
    fn test_viscosity_setter_clamps() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(4, 4, 4, 0.25));
        assert_eq!(solver.viscosity_coefficient(), 0.0);
        solver.set_viscosity_coefficient(0.5);
        assert_eq!(solver.viscosity_coefficient(), 0.5);
        solver.set_viscosity_coefficient(-1.0);
        assert_eq!(solver.viscosity_coefficient(), 0.0);
    }

    #[test]
    fn test_collider_is_shared_with_boundary_solver() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(8, 8, 8, 0.125));
        let floor: SharedCollider = Arc::new(RigidBodyCollider::new(Plane::horizontal(0.25)));
        solver.set_collider(Some(floor));
        assert!(solver.collider().is_some());
        assert!(solver.boundary_solver().collider().is_some());
        assert!(solver.boundary_solver().collider_sdf().data()[(0, 0, 0)] < 0.0);

        solver.set_collider(None);
        assert!(solver.boundary_solver().collider().is_none());
    }

    #[test]
    fn test_resize_grid_keeps_particles() {
        let mut solver = FlipSolver3D::new(FluidConfig::with_resolution(8, 8, 8, 0.125));
        solver.particles.spawn_at(DVec3::splat(0.5));
        solver.resize_grid(fdm::Size3::new(4, 4, 4), DVec3::splat(0.25), DVec3::ZERO);
        assert_eq!(solver.grid.resolution(), fdm::Size3::new(4, 4, 4));
        assert_eq!(solver.fluid_sdf().resolution(), fdm::Size3::new(4, 4, 4));
        solver.advance(0.01);
        assert_eq!(solver.particles.len(), 1);
    }
}
