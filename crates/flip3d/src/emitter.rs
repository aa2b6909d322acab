//! Particle emitters.

use std::fmt::Debug;
use std::sync::Arc;

use glam::DVec3;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::grid::BoundingBox3;
use crate::particle::{Particles3D, PointGridSearcher};
use crate::surface::Surface;

/// Appends new particles to the store.
pub trait ParticleEmitter: Send + Sync + Debug {
    /// Emit for a step of length `dt`. Returns the number of new particles.
    fn emit(&mut self, particles: &mut Particles3D, dt: f64) -> usize;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Fills a box with jittered lattice particles.
///
/// An optional surface restricts emission to its inside. Lattice points
/// within half a `spacing` of an existing particle are skipped unless
/// overlapping is allowed.
#[derive(Clone, Debug)]
pub struct VolumeEmitter {
    pub bounds: BoundingBox3,
    pub spacing: f64,
    pub initial_velocity: DVec3,
    /// Fraction of `spacing` each particle may be displaced by, in [0, 1]
    pub jitter: f64,
    pub is_one_shot: bool,
    pub allow_overlapping: bool,
    pub max_number_of_particles: usize,
    pub surface: Option<Arc<dyn Surface>>,
    seed: u64,
    has_emitted: bool,
}

impl VolumeEmitter {
    pub fn new(bounds: BoundingBox3, spacing: f64) -> Self {
        assert!(spacing > 0.0, "spacing must be positive, got {}", spacing);
        Self {
            bounds,
            spacing,
            initial_velocity: DVec3::ZERO,
            jitter: 0.0,
            is_one_shot: true,
            allow_overlapping: false,
            max_number_of_particles: usize::MAX,
            surface: None,
            seed: 0,
            has_emitted: false,
        }
    }

    pub fn with_velocity(mut self, velocity: DVec3) -> Self {
        self.initial_velocity = velocity;
        self
    }

    pub fn with_jitter(mut self, jitter: f64, seed: u64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self.seed = seed;
        self
    }

    pub fn with_surface(mut self, surface: Arc<dyn Surface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn has_emitted(&self) -> bool {
        self.has_emitted
    }

    /// Allow a one-shot emitter to fire again.
    pub fn reset(&mut self) {
        self.has_emitted = false;
    }
}

impl ParticleEmitter for VolumeEmitter {
    fn emit(&mut self, particles: &mut Particles3D, _dt: f64) -> usize {
        if self.is_one_shot && self.has_emitted {
            return 0;
        }
        self.has_emitted = true;

        let extent = self.bounds.extent();
        let mut searcher = PointGridSearcher::new(
            self.bounds.lower - DVec3::splat(self.spacing),
            self.bounds.upper + DVec3::splat(self.spacing),
            self.spacing,
        );
        if !self.allow_overlapping {
            searcher.build(&particles.positions());
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let counts = (extent / self.spacing).floor().as_uvec3() + 1;
        let half_jitter = 0.5 * self.jitter * self.spacing;
        let before = particles.len();

        'lattice: for k in 0..counts.z {
            for j in 0..counts.y {
                for i in 0..counts.x {
                    if particles.len() >= self.max_number_of_particles {
                        break 'lattice;
                    }

                    let mut p = self.bounds.lower
                        + self.spacing * DVec3::new(i as f64, j as f64, k as f64);
                    if half_jitter > 0.0 {
                        p += DVec3::new(
                            rng.gen_range(-half_jitter..half_jitter),
                            rng.gen_range(-half_jitter..half_jitter),
                            rng.gen_range(-half_jitter..half_jitter),
                        );
                    }
                    p = self.bounds.clamp(p);

                    if let Some(surface) = &self.surface {
                        if !surface.is_inside(p) {
                            continue;
                        }
                    }
                    if !self.allow_overlapping && searcher.has_nearby_point(p, 0.5 * self.spacing) {
                        continue;
                    }

                    particles.spawn(p, self.initial_velocity);
                }
            }
        }

        let emitted = particles.len() - before;
        log::debug!("Volume emitter added {} particles", emitted);
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Sphere;

    fn unit_box() -> BoundingBox3 {
        BoundingBox3::new(DVec3::ZERO, DVec3::ONE)
    }

    #[test]
    fn test_lattice_fill() {
        let mut emitter = VolumeEmitter::new(unit_box(), 0.25);
        let mut particles = Particles3D::new();
        assert_eq!(emitter.emit(&mut particles, 0.1), 125);
        assert_eq!(particles.len(), 125);
        assert!(particles.list.iter().all(|p| unit_box().contains(p.position)));
    }

    #[test]
    fn test_one_shot_fires_once() {
        let mut emitter = VolumeEmitter::new(unit_box(), 0.5);
        let mut particles = Particles3D::new();
        emitter.emit(&mut particles, 0.1);
        assert_eq!(emitter.emit(&mut particles, 0.1), 0);
        assert!(emitter.has_emitted());

        emitter.reset();
        emitter.allow_overlapping = true;
        assert_eq!(emitter.emit(&mut particles, 0.1), 27);
    }

    #[test]
    fn test_existing_particles_block_overlap() {
        let mut particles = Particles3D::new();
        particles.spawn_at(DVec3::ZERO);
        let mut emitter = VolumeEmitter::new(unit_box(), 0.5);
        assert_eq!(emitter.emit(&mut particles, 0.1), 26);
    }

    #[test]
    fn test_jitter_is_seeded_and_bounded() {
        let emit = |seed| {
            let mut emitter = VolumeEmitter::new(unit_box(), 0.25).with_jitter(1.0, seed);
            emitter.allow_overlapping = true;
            let mut particles = Particles3D::new();
            emitter.emit(&mut particles, 0.1);
            particles.positions()
        };
        let a = emit(3);
        assert_eq!(a, emit(3));
        assert_ne!(a, emit(4));
        assert!(a.iter().all(|&p| unit_box().contains(p)));
    }

    #[test]
    fn test_surface_limits_emission() {
        let sphere = Arc::new(Sphere::new(DVec3::splat(0.5), 0.3));
        let mut emitter = VolumeEmitter::new(unit_box(), 0.1).with_surface(sphere.clone());
        let mut particles = Particles3D::new();
        let n = emitter.emit(&mut particles, 0.1);
        assert!(n > 0);
        assert!(particles.list.iter().all(|p| sphere.is_inside(p.position)));
    }

    #[test]
    fn test_particle_limit() {
        let mut emitter = VolumeEmitter::new(unit_box(), 0.1);
        emitter.max_number_of_particles = 50;
        let mut particles = Particles3D::new();
        assert_eq!(emitter.emit(&mut particles, 0.1), 50);
    }
}
