//! Implicit (backward Euler) diffusion, used for viscosity.
//!
//! Each sample solves `(I - c L) f_new = f` with `c = dt * coefficient / h²`
//! over the fluid region, so any step size is stable. Samples are classified
//! like the pressure cells: collider, fluid or air. Air never couples.

use fdm::{FdmIccgSolver3, FdmLinearSystem3, FdmMatrixRow3, LinearSystemSolver, SolverResult};
use glam::DVec3;
use serde::{Deserialize, Serialize};

use crate::collider::is_inside_sdf;
use crate::grid::Grid3D;
use crate::pressure::PressureMarker;
use crate::scalar_grid::{CellCenteredScalarGrid3, ScalarField3};

/// How a fluid sample couples to a neighbouring collider sample.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum DiffusionBoundary {
    /// The collider value is held fixed and diffuses in (no-slip)
    Dirichlet,
    /// No flux through the collider (free-slip)
    #[default]
    Neumann,
}

pub struct BackwardEulerDiffusionSolver {
    boundary: DiffusionBoundary,
    solver: FdmIccgSolver3,
    system: FdmLinearSystem3,
    markers: fdm::Array3<PressureMarker>,
}

impl std::fmt::Debug for BackwardEulerDiffusionSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackwardEulerDiffusionSolver")
            .field("boundary", &self.boundary)
            .field("size", &self.system.size())
            .finish()
    }
}

impl Default for BackwardEulerDiffusionSolver {
    fn default() -> Self {
        Self::new(DiffusionBoundary::default())
    }
}

fn merge(a: SolverResult<f64>, b: SolverResult<f64>) -> SolverResult<f64> {
    SolverResult {
        converged: a.converged && b.converged,
        iterations: a.iterations.max(b.iterations),
        residual: a.residual.max(b.residual),
    }
}

impl BackwardEulerDiffusionSolver {
    pub fn new(boundary: DiffusionBoundary) -> Self {
        Self::with_params(boundary, 100, 1e-9)
    }

    pub fn with_params(boundary: DiffusionBoundary, max_iterations: usize, tolerance: f64) -> Self {
        Self {
            boundary,
            solver: FdmIccgSolver3::with_params(max_iterations, tolerance),
            system: FdmLinearSystem3::new(Default::default()),
            markers: fdm::Array3::default(),
        }
    }

    pub fn boundary(&self) -> DiffusionBoundary {
        self.boundary
    }

    /// Diffuse each face component of `grid` over `dt`.
    pub fn solve_face_centered(
        &mut self,
        grid: &mut Grid3D,
        coefficient: f64,
        dt: f64,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64> {
        let c = dt * coefficient / (grid.grid_spacing() * grid.grid_spacing());
        let mut result = SolverResult {
            converged: true,
            iterations: 0,
            residual: 0.0,
        };

        for axis in 0..3 {
            let snapshot = &*grid;
            self.build_markers(grid.face(axis).size(), boundary_sdf, fluid_sdf, |i, j, k| {
                snapshot.face_position(axis, i, j, k)
            });
            let face = grid.face(axis).clone();
            result = merge(result, self.solve_samples(&face, c));
            grid.face_mut(axis).clone_from(&self.system.x);
        }
        result
    }

    /// Diffuse a cell-centred scalar over `dt`.
    pub fn solve_scalar(
        &mut self,
        field: &mut CellCenteredScalarGrid3,
        coefficient: f64,
        dt: f64,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64> {
        let c = dt * coefficient / (field.grid_spacing() * field.grid_spacing());
        let snapshot = &*field;
        self.build_markers(field.data().size(), boundary_sdf, fluid_sdf, |i, j, k| {
            snapshot.data_position(i, j, k)
        });
        let data = field.data().clone();
        let result = self.solve_samples(&data, c);
        field.data_mut().clone_from(&self.system.x);
        result
    }

    fn build_markers<P>(
        &mut self,
        size: fdm::Size3,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
        position: P,
    ) where
        P: Fn(usize, usize, usize) -> DVec3 + Sync + Send,
    {
        self.markers.resize(size);
        self.markers.par_for_each_index_mut(|i, j, k, m| {
            let pt = position(i, j, k);
            *m = if is_inside_sdf(boundary_sdf.sample(pt)) {
                PressureMarker::Boundary
            } else if is_inside_sdf(fluid_sdf.sample(pt)) {
                PressureMarker::Fluid
            } else {
                PressureMarker::Air
            };
        });
    }

    fn solve_samples(&mut self, f: &fdm::Array3<f64>, c: DVec3) -> SolverResult<f64> {
        let size = f.size();
        let markers = &self.markers;
        let dirichlet = self.boundary == DiffusionBoundary::Dirichlet;
        // Dirichlet couples to collider neighbours as well as fluid ones
        let couples = |m: PressureMarker| {
            m == PressureMarker::Fluid || (dirichlet && m == PressureMarker::Boundary)
        };

        self.system.resize(size);
        self.system.a.par_for_each_index_mut(|i, j, k, row| {
            *row = FdmMatrixRow3 {
                center: 1.0,
                ..Default::default()
            };
            if markers[(i, j, k)] != PressureMarker::Fluid {
                return;
            }
            let neighbours = [
                (i + 1 < size.x).then(|| ((i + 1, j, k), c.x, 0)),
                (i > 0).then(|| ((i - 1, j, k), c.x, 3)),
                (j + 1 < size.y).then(|| ((i, j + 1, k), c.y, 1)),
                (j > 0).then(|| ((i, j - 1, k), c.y, 3)),
                (k + 1 < size.z).then(|| ((i, j, k + 1), c.z, 2)),
                (k > 0).then(|| ((i, j, k - 1), c.z, 3)),
            ];
            for (n, cn, slot) in neighbours.into_iter().flatten() {
                if couples(markers[n]) {
                    row.center += cn;
                }
                if markers[n] == PressureMarker::Fluid {
                    match slot {
                        0 => row.right -= cn,
                        1 => row.up -= cn,
                        2 => row.front -= cn,
                        _ => {}
                    }
                }
            }
        });

        self.system.x.clone_from(f);
        self.system.b.par_for_each_index_mut(|i, j, k, b| {
            *b = f[(i, j, k)];
            if !dirichlet || markers[(i, j, k)] != PressureMarker::Fluid {
                return;
            }
            let neighbours = [
                (i + 1 < size.x).then(|| ((i + 1, j, k), c.x)),
                (i > 0).then(|| ((i - 1, j, k), c.x)),
                (j + 1 < size.y).then(|| ((i, j + 1, k), c.y)),
                (j > 0).then(|| ((i, j - 1, k), c.y)),
                (k + 1 < size.z).then(|| ((i, j, k + 1), c.z)),
                (k > 0).then(|| ((i, j, k - 1), c.z)),
            ];
            for (n, cn) in neighbours.into_iter().flatten() {
                if markers[n] == PressureMarker::Boundary {
                    *b += cn * f[n];
                }
            }
        });

        self.solver.solve(&mut self.system)
    }
}
