//! Solver configuration, loadable from JSON.

use std::path::Path;

use fdm::Size3;
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::boundary::DirectionFlags;
use crate::diffusion::DiffusionBoundary;
use crate::serde_utils::{deserialize_dvec3, serialize_dvec3};

/// Linear solver used for the pressure Poisson system.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum PressureSolverKind {
    /// Conjugate gradient without preconditioning
    Cg,
    /// Incomplete-Cholesky preconditioned CG
    #[default]
    Iccg,
    Jacobi,
    /// Gauss-Seidel with SOR, red-black ordered if requested
    GaussSeidel,
    /// Repeated multigrid V-cycles
    Multigrid,
    /// Multigrid-preconditioned CG
    Mgpcg,
}

impl PressureSolverKind {
    pub fn uses_multigrid(self) -> bool {
        matches!(self, Self::Multigrid | Self::Mgpcg)
    }
}

/// Collider treatment, shared by the boundary-condition and pressure solvers.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum BoundaryKind {
    /// Hard no-flux walls on collider cells, binary pressure markers
    #[default]
    Blocked,
    /// Distance-weighted faces, variational pressure with a ghost-fluid surface
    Fractional,
}

/// Pressure projection settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PressureConfig {
    #[serde(default)]
    pub solver: PressureSolverKind,
    /// CG iterations, relaxation sweeps, or V-cycles depending on the solver
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Relaxation solvers only evaluate the residual this often
    #[serde(default = "default_residual_check_interval")]
    pub residual_check_interval: usize,
    #[serde(default = "default_sor_factor")]
    pub sor_factor: f64,
    #[serde(default)]
    pub use_red_black_ordering: bool,
    #[serde(default = "default_max_number_of_levels")]
    pub max_number_of_levels: usize,
}

fn default_max_iterations() -> usize {
    100
}
fn default_tolerance() -> f64 {
    1e-6
}
fn default_residual_check_interval() -> usize {
    10
}
fn default_sor_factor() -> f64 {
    1.5
}
fn default_max_number_of_levels() -> usize {
    4
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            solver: PressureSolverKind::default(),
            max_iterations: default_max_iterations(),
            tolerance: default_tolerance(),
            residual_check_interval: default_residual_check_interval(),
            sor_factor: default_sor_factor(),
            use_red_black_ordering: false,
            max_number_of_levels: default_max_number_of_levels(),
        }
    }
}

impl PressureConfig {
    pub fn with_solver(solver: PressureSolverKind) -> Self {
        Self {
            solver,
            ..Default::default()
        }
    }
}

/// Full fluid solver configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FluidConfig {
    /// Grid cells per axis; use `z = 1` for a 2D run
    #[serde(default = "default_resolution")]
    pub resolution: Size3,
    #[serde(
        default = "default_grid_spacing",
        serialize_with = "serialize_dvec3",
        deserialize_with = "deserialize_dvec3"
    )]
    pub grid_spacing: DVec3,
    #[serde(
        default,
        serialize_with = "serialize_dvec3",
        deserialize_with = "deserialize_dvec3"
    )]
    pub origin: DVec3,
    #[serde(
        default = "default_gravity",
        serialize_with = "serialize_dvec3",
        deserialize_with = "deserialize_dvec3"
    )]
    pub gravity: DVec3,
    /// Sub-steps are taken so no sub-step exceeds this CFL number
    #[serde(default = "default_max_cfl")]
    pub max_cfl: f64,
    /// 0 = pure FLIP, 1 = pure PIC
    #[serde(default)]
    pub pic_blending_factor: f64,
    #[serde(default)]
    pub closed_domain_boundary_flags: DirectionFlags,
    #[serde(default)]
    pub boundary: BoundaryKind,
    /// Restitution for particles hitting the collider
    #[serde(default)]
    pub particle_restitution: f64,
    /// Kinematic viscosity; 0 skips the diffusion solve
    #[serde(default)]
    pub viscosity_coefficient: f64,
    #[serde(default)]
    pub viscosity_boundary: DiffusionBoundary,
    #[serde(default)]
    pub pressure: PressureConfig,
}

fn default_resolution() -> Size3 {
    Size3::new(32, 32, 32)
}
fn default_grid_spacing() -> DVec3 {
    DVec3::splat(1.0 / 32.0)
}
fn default_gravity() -> DVec3 {
    DVec3::new(0.0, -9.8, 0.0)
}
fn default_max_cfl() -> f64 {
    5.0
}

impl Default for FluidConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            grid_spacing: default_grid_spacing(),
            origin: DVec3::ZERO,
            gravity: default_gravity(),
            max_cfl: default_max_cfl(),
            pic_blending_factor: 0.0,
            closed_domain_boundary_flags: DirectionFlags::ALL,
            boundary: BoundaryKind::default(),
            particle_restitution: 0.0,
            viscosity_coefficient: 0.0,
            viscosity_boundary: DiffusionBoundary::default(),
            pressure: PressureConfig::default(),
        }
    }
}

impl FluidConfig {
    /// Cubic cells of `cell_size` with the domain starting at the origin.
    pub fn with_resolution(nx: usize, ny: usize, nz: usize, cell_size: f64) -> Self {
        Self {
            resolution: Size3::new(nx, ny, nz),
            grid_spacing: DVec3::splat(cell_size),
            ..Default::default()
        }
    }

    /// Save configuration to JSON file
    pub fn save_json(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from JSON file
    pub fn load_json(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FluidConfig::default();
        assert_eq!(config.gravity, DVec3::new(0.0, -9.8, 0.0));
        assert_eq!(config.max_cfl, 5.0);
        assert_eq!(config.pic_blending_factor, 0.0);
        assert_eq!(config.closed_domain_boundary_flags, DirectionFlags::ALL);
        assert_eq!(config.pressure.solver, PressureSolverKind::Iccg);
        assert_eq!(config.boundary, BoundaryKind::Blocked);
        assert_eq!(config.viscosity_coefficient, 0.0);
        assert_eq!(config.viscosity_boundary, DiffusionBoundary::Neumann);
    }

    #[test]
    fn test_json_roundtrip() {
        let mut config = FluidConfig::with_resolution(64, 32, 1, 1.0 / 32.0);
        config.pic_blending_factor = 0.05;
        config.pressure = PressureConfig::with_solver(PressureSolverKind::Mgpcg);
        config.closed_domain_boundary_flags = DirectionFlags::DOWN | DirectionFlags::LEFT;
        config.viscosity_coefficient = 0.01;
        config.viscosity_boundary = DiffusionBoundary::Dirichlet;

        let json = serde_json::to_string(&config).expect("serialize");
        let back: FluidConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: FluidConfig =
            serde_json::from_str(r#"{ "pic_blending_factor": 1.0, "pressure": { "solver": "Cg" } }"#)
                .expect("deserialize");
        assert_eq!(config.pic_blending_factor, 1.0);
        assert_eq!(config.pressure.solver, PressureSolverKind::Cg);
        assert_eq!(config.pressure.max_iterations, 100);
        assert_eq!(config.resolution, Size3::new(32, 32, 32));
        assert_eq!(config.gravity, DVec3::new(0.0, -9.8, 0.0));
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join(format!("flip3d_config_{}.json", std::process::id()));
        let config = FluidConfig::with_resolution(16, 8, 4, 0.1);
        config.save_json(&path).expect("save");
        let loaded = FluidConfig::load_json(&path).expect("load");
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
