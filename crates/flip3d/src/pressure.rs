//! Single-phase pressure projection.
//!
//! Two discretisations share the [`PressureSolver`] interface.
//!
//! [`SinglePhasePressureSolver`] classifies cells from two signed distance
//! fields sampled at cell centres: inside the collider is
//! [`PressureMarker::Boundary`], inside the fluid is [`PressureMarker::Fluid`],
//! the rest is [`PressureMarker::Air`]. Air is a p = 0 Dirichlet region and
//! boundary cells are no-flux walls.
//!
//! [`FractionalSinglePhasePressureSolver`] weights each face by its open area
//! outside the collider and places the free surface between cell centres
//! with a ghost-fluid pressure, so neither interface snaps to the grid.
//!
//! Both solve `A p = div(u)` with `A` the negative Laplacian over fluid
//! cells, so adding `grad p` to the faces cancels the divergence. For a fluid
//! cell the post-projection divergence equals the solver residual.

use fdm::mg::level_sizes;
use fdm::{
    Array3, FdmBlas3, FdmCgSolver3, FdmGaussSeidelSolver3, FdmIccgSolver3, FdmJacobiSolver3,
    FdmLinearSystem3, FdmMatrix3, FdmMatrixRow3, FdmMgLinearSystem3, FdmMgSolver3,
    FdmMgpcgSolver3, FdmVector3, LinearSystemSolver, MgLinearSystemSolver, MgParameters,
    RelaxMethod, SolverResult,
};
use glam::DVec3;

use crate::collider::{fraction_inside, fraction_inside_sdf, is_inside_sdf, SharedCollider};
use crate::config::{BoundaryKind, PressureConfig, PressureSolverKind};
use crate::grid::Grid3D;
use crate::scalar_grid::ScalarField3;

/// Projects grid velocity onto its divergence-free part.
pub trait PressureSolver: Send + std::fmt::Debug {
    /// Make `grid` divergence-free over the fluid region.
    ///
    /// `collider` supplies the solid velocity for discretisations that let
    /// flux through partially open faces.
    fn project(
        &mut self,
        grid: &mut Grid3D,
        boundary_sdf: &dyn ScalarField3,
        collider: Option<&SharedCollider>,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64>;

    fn config(&self) -> &PressureConfig;

    fn last_result(&self) -> SolverResult<f64>;

    /// Solution of the most recent solve at the grid resolution.
    fn pressure(&self) -> &FdmVector3;

    /// Boundary-condition strategy this discretisation is meant to run with.
    fn suggested_boundary_kind(&self) -> BoundaryKind;
}

/// Pressure solver for a boundary strategy.
pub fn pressure_solver_for(kind: BoundaryKind, config: PressureConfig) -> Box<dyn PressureSolver> {
    match kind {
        BoundaryKind::Blocked => Box::new(SinglePhasePressureSolver::new(config)),
        BoundaryKind::Fractional => Box::new(FractionalSinglePhasePressureSolver::new(config)),
    }
}

/// Cell classification for the pressure solve.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(u8)]
pub enum PressureMarker {
    Fluid = 0,
    #[default]
    Air = 1,
    Boundary = 2,
}

impl PressureMarker {
    /// Vote order; a tie goes to the later entry.
    const ALL: [PressureMarker; 3] = [Self::Fluid, Self::Air, Self::Boundary];
}

enum SystemSolver {
    Flat(Box<dyn LinearSystemSolver<FdmBlas3> + Send>),
    Multigrid(Box<dyn MgLinearSystemSolver<FdmBlas3> + Send>),
}

impl SystemSolver {
    fn from_config(config: &PressureConfig) -> Self {
        let max_iter = config.max_iterations;
        let tol = config.tolerance;
        match config.solver {
            PressureSolverKind::Cg => Self::Flat(Box::new(FdmCgSolver3::with_params(max_iter, tol))),
            PressureSolverKind::Iccg => {
                Self::Flat(Box::new(FdmIccgSolver3::with_params(max_iter, tol)))
            }
            PressureSolverKind::Jacobi => Self::Flat(Box::new(FdmJacobiSolver3::jacobi(
                max_iter,
                config.residual_check_interval,
                tol,
            ))),
            PressureSolverKind::GaussSeidel => {
                Self::Flat(Box::new(FdmGaussSeidelSolver3::gauss_seidel(
                    max_iter,
                    config.residual_check_interval,
                    tol,
                    config.sor_factor,
                    config.use_red_black_ordering,
                )))
            }
            PressureSolverKind::Multigrid => {
                let params = MgParameters {
                    max_number_of_levels: config.max_number_of_levels,
                    relax_method: if config.use_red_black_ordering {
                        RelaxMethod::RedBlackGaussSeidel
                    } else {
                        RelaxMethod::GaussSeidel
                    },
                    max_tolerance: tol,
                    sor_factor: config.sor_factor,
                    ..MgParameters::default()
                };
                Self::Multigrid(Box::new(FdmMgSolver3::new(params, max_iter)))
            }
            PressureSolverKind::Mgpcg => Self::Multigrid(Box::new(FdmMgpcgSolver3::with_levels(
                max_iter,
                config.max_number_of_levels,
                tol,
            ))),
        }
    }

    /// Levels the solver works on, 1 for flat solvers.
    fn max_levels(&self) -> usize {
        match self {
            Self::Flat(_) => 1,
            Self::Multigrid(s) => s.params().max_number_of_levels.max(1),
        }
    }

    fn empty_grid_result() -> SolverResult<f64> {
        log::warn!("Pressure solve skipped: grid has no cells");
        SolverResult {
            converged: true,
            iterations: 0,
            residual: 0.0,
        }
    }
}

fn unsolved() -> SolverResult<f64> {
    SolverResult {
        converged: false,
        iterations: 0,
        residual: f64::MAX,
    }
}

/// Projects the grid velocity onto its divergence-free part.
pub struct SinglePhasePressureSolver {
    config: PressureConfig,
    solver: SystemSolver,
    system: FdmLinearSystem3,
    mg_system: FdmMgLinearSystem3,
    /// Level 0 is the grid resolution; coarser levels only exist for multigrid
    markers: Vec<Array3<PressureMarker>>,
    last_result: SolverResult<f64>,
}

impl std::fmt::Debug for SinglePhasePressureSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinglePhasePressureSolver")
            .field("config", &self.config)
            .field("levels", &self.markers.len())
            .field("last_result", &self.last_result)
            .finish()
    }
}

impl Default for SinglePhasePressureSolver {
    fn default() -> Self {
        Self::new(PressureConfig::default())
    }
}

impl SinglePhasePressureSolver {
    pub fn new(config: PressureConfig) -> Self {
        Self {
            solver: SystemSolver::from_config(&config),
            config,
            system: FdmLinearSystem3::new(Default::default()),
            mg_system: FdmMgLinearSystem3::default(),
            markers: Vec::new(),
            last_result: unsolved(),
        }
    }

    pub fn config(&self) -> &PressureConfig {
        &self.config
    }

    /// Finest-level markers from the most recent solve.
    pub fn markers(&self) -> Option<&Array3<PressureMarker>> {
        self.markers.first()
    }

    /// Markers for every multigrid level, finest first.
    pub fn marker_levels(&self) -> &[Array3<PressureMarker>] {
        &self.markers
    }

    /// Solution of the most recent solve at the grid resolution.
    pub fn pressure(&self) -> &FdmVector3 {
        match self.solver {
            SystemSolver::Flat(_) => &self.system.x,
            SystemSolver::Multigrid(_) => self
                .mg_system
                .x
                .levels
                .first()
                .unwrap_or(&self.system.x),
        }
    }

    pub fn last_result(&self) -> SolverResult<f64> {
        self.last_result
    }

    /// Make `grid` divergence-free over its fluid cells.
    ///
    /// Faces with a boundary cell on either side are left untouched; the
    /// boundary-condition solver owns them. Grid pressure and divergence are
    /// refreshed from the solution.
    pub fn solve(
        &mut self,
        grid: &mut Grid3D,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64> {
        if grid.is_empty() {
            self.last_result = SystemSolver::empty_grid_result();
            return self.last_result;
        }

        let size = grid.resolution();
        let h = grid.grid_spacing();
        let levels = self.solver.max_levels();
        let sizes = level_sizes::<FdmBlas3>(size, levels);

        self.markers.resize_with(sizes.len(), Array3::default);
        build_markers(grid, boundary_sdf, fluid_sdf, &mut self.markers[0]);
        for l in 1..sizes.len() {
            let (finer, coarser) = self.markers.split_at_mut(l);
            coarsen_markers(&finer[l - 1], &mut coarser[0], sizes[l]);
        }

        let result = match &mut self.solver {
            SystemSolver::Flat(solver) => {
                self.system.resize(size);
                build_matrix(&self.markers[0], h, &mut self.system.a);
                build_rhs(&self.markers[0], grid, &mut self.system.b);
                self.system.x.fill(0.0);
                solver.solve(&mut self.system)
            }
            SystemSolver::Multigrid(solver) => {
                self.mg_system.resize_with_finest(size, levels);
                let mut level_h = h;
                for (a, markers) in self.mg_system.a.levels.iter_mut().zip(&self.markers) {
                    build_matrix(markers, level_h, a);
                    level_h *= 2.0;
                }
                build_rhs(&self.markers[0], grid, &mut self.mg_system.b.levels[0]);
                solver.solve(&mut self.mg_system)
            }
        };

        let x = match self.solver {
            SystemSolver::Flat(_) => &self.system.x,
            SystemSolver::Multigrid(_) => &self.mg_system.x.levels[0],
        };
        apply_pressure_gradient(&self.markers[0], x, grid);

        let markers = &self.markers[0];
        grid.pressure_mut().par_for_each_index_mut(|i, j, k, p| {
            *p = if markers[(i, j, k)] == PressureMarker::Fluid {
                x[(i, j, k)]
            } else {
                0.0
            };
        });
        grid.compute_divergence();

        log::debug!(
            "Pressure projection ({:?}): converged {} after {} iterations, residual {:e}",
            self.config.solver,
            result.converged,
            result.iterations,
            result.residual
        );
        self.last_result = result;
        result
    }
}

impl PressureSolver for SinglePhasePressureSolver {
    /// Collider faces are closed outright, so the collider velocity is left
    /// to the boundary-condition solver.
    fn project(
        &mut self,
        grid: &mut Grid3D,
        boundary_sdf: &dyn ScalarField3,
        _collider: Option<&SharedCollider>,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64> {
        self.solve(grid, boundary_sdf, fluid_sdf)
    }

    fn config(&self) -> &PressureConfig {
        &self.config
    }

    fn last_result(&self) -> SolverResult<f64> {
        self.last_result
    }

    fn pressure(&self) -> &FdmVector3 {
        SinglePhasePressureSolver::pressure(self)
    }

    fn suggested_boundary_kind(&self) -> BoundaryKind {
        BoundaryKind::Blocked
    }
}

// ========== System assembly ==========

fn build_markers(
    grid: &Grid3D,
    boundary_sdf: &dyn ScalarField3,
    fluid_sdf: &dyn ScalarField3,
    markers: &mut Array3<PressureMarker>,
) {
    markers.resize(grid.resolution());
    markers.par_for_each_index_mut(|i, j, k, m| {
        let pt = grid.cell_center(i, j, k);
        *m = if is_inside_sdf(boundary_sdf.sample(pt)) {
            PressureMarker::Boundary
        } else if is_inside_sdf(fluid_sdf.sample(pt)) {
            PressureMarker::Fluid
        } else {
            PressureMarker::Air
        };
    });
}

/// Clamped fine indices 2c-1 ..= 2c+2 under coarse index `c`.
fn fine_window(c: usize, n: usize) -> impl Iterator<Item = usize> {
    let last = n.saturating_sub(1);
    (0..4).map(move |d| (2 * c + d).saturating_sub(1).min(last))
}

/// Majority vote of the 4x4x4 fine window under each coarse cell.
fn coarsen_markers(
    finer: &Array3<PressureMarker>,
    coarser: &mut Array3<PressureMarker>,
    coarse_size: fdm::Size3,
) {
    let nf = finer.size();
    coarser.resize(coarse_size);
    coarser.par_for_each_index_mut(|i, j, k, m| {
        let mut counts = [0usize; 3];
        for kk in fine_window(k, nf.z) {
            for jj in fine_window(j, nf.y) {
                for ii in fine_window(i, nf.x) {
                    counts[finer[(ii, jj, kk)] as usize] += 1;
                }
            }
        }

        let mut best = PressureMarker::Fluid;
        let mut best_count = 0;
        for marker in PressureMarker::ALL {
            if counts[marker as usize] >= best_count {
                best = marker;
                best_count = counts[marker as usize];
            }
        }
        *m = best;
    });
}

fn build_matrix(markers: &Array3<PressureMarker>, h: DVec3, a: &mut FdmMatrix3) {
    let size = markers.size();
    let inv_h2 = DVec3::ONE / (h * h);
    a.resize(size);
    a.par_for_each_index_mut(|i, j, k, row| {
        *row = FdmMatrixRow3::default();
        if markers[(i, j, k)] != PressureMarker::Fluid {
            row.center = 1.0;
            return;
        }

        let mut center = 0.0;
        let mut right = 0.0;
        let mut up = 0.0;
        let mut front = 0.0;
        let mut visit = |n: (usize, usize, usize), scale: f64, positive: Option<&mut f64>| {
            if markers[n] == PressureMarker::Boundary {
                return;
            }
            center += scale;
            if markers[n] == PressureMarker::Fluid {
                if let Some(o) = positive {
                    *o -= scale;
                }
            }
        };

        if i + 1 < size.x {
            visit((i + 1, j, k), inv_h2.x, Some(&mut right));
        }
        if i > 0 {
            visit((i - 1, j, k), inv_h2.x, None);
        }
        if j + 1 < size.y {
            visit((i, j + 1, k), inv_h2.y, Some(&mut up));
        }
        if j > 0 {
            visit((i, j - 1, k), inv_h2.y, None);
        }
        if k + 1 < size.z {
            visit((i, j, k + 1), inv_h2.z, Some(&mut front));
        }
        if k > 0 {
            visit((i, j, k - 1), inv_h2.z, None);
        }

        *row = FdmMatrixRow3 {
            center,
            right,
            up,
            front,
        };
    });
}

fn build_rhs(markers: &Array3<PressureMarker>, grid: &Grid3D, b: &mut FdmVector3) {
    b.resize(markers.size());
    b.par_for_each_index_mut(|i, j, k, value| {
        *value = if markers[(i, j, k)] == PressureMarker::Fluid {
            grid.divergence_at_cell_center(i, j, k)
        } else {
            0.0
        };
    });
}

fn apply_pressure_gradient(markers: &Array3<PressureMarker>, x: &FdmVector3, grid: &mut Grid3D) {
    let h = grid.grid_spacing();
    let pressure = |c: (usize, usize, usize)| {
        if markers[c] == PressureMarker::Fluid {
            x[c]
        } else {
            0.0
        }
    };
    let is_open_pair = |lo: (usize, usize, usize), hi: (usize, usize, usize)| {
        let (a, b) = (markers[lo], markers[hi]);
        a != PressureMarker::Boundary
            && b != PressureMarker::Boundary
            && (a == PressureMarker::Fluid || b == PressureMarker::Fluid)
    };

    grid.u_mut().par_for_each_index_mut(|i, j, k, u| {
        if i == 0 || i >= markers.size().x {
            return;
        }
        let (lo, hi) = ((i - 1, j, k), (i, j, k));
        if is_open_pair(lo, hi) {
            *u += (pressure(hi) - pressure(lo)) / h.x;
        }
    });
    grid.v_mut().par_for_each_index_mut(|i, j, k, v| {
        if j == 0 || j >= markers.size().y {
            return;
        }
        let (lo, hi) = ((i, j - 1, k), (i, j, k));
        if is_open_pair(lo, hi) {
            *v += (pressure(hi) - pressure(lo)) / h.y;
        }
    });
    grid.w_mut().par_for_each_index_mut(|i, j, k, w| {
        if k == 0 || k >= markers.size().z {
            return;
        }
        let (lo, hi) = ((i, j, k - 1), (i, j, k));
        if is_open_pair(lo, hi) {
            *w += (pressure(hi) - pressure(lo)) / h.z;
        }
    });
}

// ========== Fractional ==========

/// Smallest open-area weight kept for a face that is open at all.
const MIN_FACE_WEIGHT: f64 = 0.01;

/// Smallest fluid fraction used when dividing by the free-surface distance.
const MIN_SURFACE_FRACTION: f64 = 0.01;

/// Geometry the fractional system is assembled from, one per multigrid level.
#[derive(Clone, Debug, Default)]
pub struct FractionalLevel {
    /// Fluid signed distance at cell centres
    pub fluid_sdf: Array3<f64>,
    /// Open area of each u, v and w face outside the collider, in [0, 1]
    pub weights: [Array3<f64>; 3],
}

fn cell_point(origin: DVec3, h: DVec3, i: usize, j: usize, k: usize) -> DVec3 {
    origin + h * (DVec3::new(i as f64, j as f64, k as f64) + 0.5)
}

fn face_point(origin: DVec3, h: DVec3, axis: usize, i: usize, j: usize, k: usize) -> DVec3 {
    let mut p = cell_point(origin, h, i, j, k);
    p[axis] -= 0.5 * h[axis];
    p
}

/// Open area of a face from the collider distance at its four corners.
fn face_weight(boundary_sdf: &dyn ScalarField3, pt: DVec3, h: DVec3, axis: usize) -> f64 {
    let a1 = (axis + 1) % 3;
    let a2 = (axis + 2) % 3;
    let e1 = 0.5 * h[a1] * DVec3::AXES[a1];
    let e2 = 0.5 * h[a2] * DVec3::AXES[a2];
    let frac = fraction_inside(
        boundary_sdf.sample(pt - e1 - e2),
        boundary_sdf.sample(pt + e1 - e2),
        boundary_sdf.sample(pt - e1 + e2),
        boundary_sdf.sample(pt + e1 + e2),
    );
    let weight = (1.0 - frac).clamp(0.0, 1.0);
    if weight > 0.0 && weight < MIN_FACE_WEIGHT {
        MIN_FACE_WEIGHT
    } else {
        weight
    }
}

impl FractionalLevel {
    /// Sample both fields on a grid of `size` cells of spacing `h`.
    pub fn build(
        &mut self,
        size: fdm::Size3,
        h: DVec3,
        origin: DVec3,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) {
        self.fluid_sdf.resize(size);
        self.fluid_sdf.par_for_each_index_mut(|i, j, k, phi| {
            *phi = fluid_sdf.sample(cell_point(origin, h, i, j, k));
        });

        for (axis, weights) in self.weights.iter_mut().enumerate() {
            let mut face_size = size;
            match axis {
                0 => face_size.x += 1,
                1 => face_size.y += 1,
                _ => face_size.z += 1,
            }
            weights.resize(face_size);
            weights.par_for_each_index_mut(|i, j, k, w| {
                *w = face_weight(boundary_sdf, face_point(origin, h, axis, i, j, k), h, axis);
            });
        }
    }

    pub fn size(&self) -> fdm::Size3 {
        self.fluid_sdf.size()
    }

    fn is_fluid(&self, c: (usize, usize, usize)) -> bool {
        is_inside_sdf(self.fluid_sdf[c])
    }

    /// Fluid fraction along the segment between two cell centres, bounded
    /// away from zero.
    fn theta(&self, c: (usize, usize, usize), n: (usize, usize, usize)) -> f64 {
        fraction_inside_sdf(self.fluid_sdf[c], self.fluid_sdf[n]).max(MIN_SURFACE_FRACTION)
    }

    /// Neighbours of a cell with the weight of the face between, as
    /// `(axis, positive side, neighbour, face weight)`.
    fn neighbours(
        &self,
        i: usize,
        j: usize,
        k: usize,
    ) -> impl Iterator<Item = (usize, bool, (usize, usize, usize), f64)> + '_ {
        let size = self.size();
        let [wu, wv, ww] = &self.weights;
        [
            (i + 1 < size.x).then(|| (0, true, (i + 1, j, k), wu[(i + 1, j, k)])),
            (i > 0).then(|| (0, false, (i - 1, j, k), wu[(i, j, k)])),
            (j + 1 < size.y).then(|| (1, true, (i, j + 1, k), wv[(i, j + 1, k)])),
            (j > 0).then(|| (1, false, (i, j - 1, k), wv[(i, j, k)])),
            (k + 1 < size.z).then(|| (2, true, (i, j, k + 1), ww[(i, j, k + 1)])),
            (k > 0).then(|| (2, false, (i, j, k - 1), ww[(i, j, k)])),
        ]
        .into_iter()
        .flatten()
    }

    /// A fluid cell with every face closed by the collider.
    fn is_sealed(&self, i: usize, j: usize, k: usize) -> bool {
        self.neighbours(i, j, k).all(|(_, _, _, w)| w <= 0.0)
    }
}

/// Variational Poisson matrix: face weights scale each coupling and a
/// neighbour across the free surface adds `w / (h² θ)` to the diagonal.
pub fn build_fractional_matrix(level: &FractionalLevel, h: DVec3, a: &mut FdmMatrix3) {
    let inv_h2 = DVec3::ONE / (h * h);
    a.resize(level.size());
    a.par_for_each_index_mut(|i, j, k, row| {
        *row = FdmMatrixRow3::default();
        let c = (i, j, k);
        if !level.is_fluid(c) {
            row.center = 1.0;
            return;
        }

        for (axis, positive, n, weight) in level.neighbours(i, j, k) {
            let term = weight * inv_h2[axis];
            if level.is_fluid(n) {
                row.center += term;
                if positive {
                    match axis {
                        0 => row.right -= term,
                        1 => row.up -= term,
                        _ => row.front -= term,
                    }
                }
            } else {
                row.center += term / level.theta(c, n);
            }
        }

        if row.center < f64::MIN_POSITIVE {
            row.center = 1.0;
        }
    });
}

/// Weighted divergence of `grid`, with the collider supplying the flux
/// through the closed part of each face.
pub fn build_fractional_rhs(
    level: &FractionalLevel,
    grid: &Grid3D,
    collider: Option<&SharedCollider>,
    b: &mut FdmVector3,
) {
    let size = level.size();
    let inv_h = DVec3::ONE / grid.grid_spacing();
    let [wu, wv, ww] = &level.weights;
    let (u, v, w) = (grid.u(), grid.v(), grid.w());

    b.resize(size);
    b.par_for_each_index_mut(|i, j, k, value| {
        *value = 0.0;
        if !level.is_fluid((i, j, k)) || level.is_sealed(i, j, k) {
            return;
        }

        // Faces on the domain edge carry their full flux
        let flux = |weight: f64, interior: bool, vel: f64| if interior { weight * vel } else { vel };
        let mut div = (flux(wu[(i + 1, j, k)], i + 1 < size.x, u[(i + 1, j, k)])
            - flux(wu[(i, j, k)], i > 0, u[(i, j, k)]))
            * inv_h.x
            + (flux(wv[(i, j + 1, k)], j + 1 < size.y, v[(i, j + 1, k)])
                - flux(wv[(i, j, k)], j > 0, v[(i, j, k)]))
                * inv_h.y
            + (flux(ww[(i, j, k + 1)], k + 1 < size.z, w[(i, j, k + 1)])
                - flux(ww[(i, j, k)], k > 0, w[(i, j, k)]))
                * inv_h.z;

        if let Some(collider) = collider {
            let solid = |weight: f64, pt: DVec3, axis: usize| {
                (1.0 - weight) * collider.velocity_at(pt)[axis]
            };
            div += (solid(wu[(i + 1, j, k)], grid.u_position(i + 1, j, k), 0)
                - solid(wu[(i, j, k)], grid.u_position(i, j, k), 0))
                * inv_h.x
                + (solid(wv[(i, j + 1, k)], grid.v_position(i, j + 1, k), 1)
                    - solid(wv[(i, j, k)], grid.v_position(i, j, k), 1))
                    * inv_h.y
                + (solid(ww[(i, j, k + 1)], grid.w_position(i, j, k + 1), 2)
                    - solid(ww[(i, j, k)], grid.w_position(i, j, k), 2))
                    * inv_h.z;
        }
        *value = div;
    });
}

fn apply_fractional_pressure_gradient(level: &FractionalLevel, x: &FdmVector3, grid: &mut Grid3D) {
    let h = grid.grid_spacing();
    let size = level.size();
    let pressure = |c: (usize, usize, usize)| if level.is_fluid(c) { x[c] } else { 0.0 };

    for axis in 0..3 {
        let weights = &level.weights[axis];
        grid.face_mut(axis).par_for_each_index_mut(|i, j, k, value| {
            let hi = (i, j, k);
            let lo = match axis {
                0 if i > 0 && i < size.x => (i - 1, j, k),
                1 if j > 0 && j < size.y => (i, j - 1, k),
                2 if k > 0 && k < size.z => (i, j, k - 1),
                _ => return,
            };
            if weights[hi] <= 0.0 || !(level.is_fluid(lo) || level.is_fluid(hi)) {
                return;
            }
            *value += (pressure(hi) - pressure(lo)) / (h[axis] * level.theta(lo, hi));
        });
    }
}

/// Projection with fractional collider faces and a ghost-fluid free surface.
pub struct FractionalSinglePhasePressureSolver {
    config: PressureConfig,
    solver: SystemSolver,
    system: FdmLinearSystem3,
    mg_system: FdmMgLinearSystem3,
    /// Finest first; coarser levels only exist for multigrid
    levels: Vec<FractionalLevel>,
    last_result: SolverResult<f64>,
}

impl std::fmt::Debug for FractionalSinglePhasePressureSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FractionalSinglePhasePressureSolver")
            .field("config", &self.config)
            .field("levels", &self.levels.len())
            .field("last_result", &self.last_result)
            .finish()
    }
}

impl Default for FractionalSinglePhasePressureSolver {
    fn default() -> Self {
        Self::new(PressureConfig::default())
    }
}

impl FractionalSinglePhasePressureSolver {
    pub fn new(config: PressureConfig) -> Self {
        Self {
            solver: SystemSolver::from_config(&config),
            config,
            system: FdmLinearSystem3::new(Default::default()),
            mg_system: FdmMgLinearSystem3::default(),
            levels: Vec::new(),
            last_result: unsolved(),
        }
    }

    /// Finest-level geometry from the most recent solve.
    pub fn level(&self) -> Option<&FractionalLevel> {
        self.levels.first()
    }

    /// Geometry for every multigrid level, finest first.
    pub fn levels(&self) -> &[FractionalLevel] {
        &self.levels
    }

    /// Make `grid` divergence-free over the fluid with a collider at rest.
    pub fn solve(
        &mut self,
        grid: &mut Grid3D,
        boundary_sdf: &dyn ScalarField3,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64> {
        self.project(grid, boundary_sdf, None, fluid_sdf)
    }
}

impl PressureSolver for FractionalSinglePhasePressureSolver {
    /// Faces with no open area are left untouched; the boundary-condition
    /// solver owns them.
    fn project(
        &mut self,
        grid: &mut Grid3D,
        boundary_sdf: &dyn ScalarField3,
        collider: Option<&SharedCollider>,
        fluid_sdf: &dyn ScalarField3,
    ) -> SolverResult<f64> {
        if grid.is_empty() {
            self.last_result = SystemSolver::empty_grid_result();
            return self.last_result;
        }

        let size = grid.resolution();
        let h = grid.grid_spacing();
        let sizes = level_sizes::<FdmBlas3>(size, self.solver.max_levels());

        // Coarse levels resample the fields on the coarse grid
        self.levels.resize_with(sizes.len(), FractionalLevel::default);
        let mut level_h = h;
        for (level, &level_size) in self.levels.iter_mut().zip(&sizes) {
            level.build(level_size, level_h, grid.origin(), boundary_sdf, fluid_sdf);
            level_h *= 2.0;
        }

        let result = match &mut self.solver {
            SystemSolver::Flat(solver) => {
                self.system.resize(size);
                build_fractional_matrix(&self.levels[0], h, &mut self.system.a);
                build_fractional_rhs(&self.levels[0], grid, collider, &mut self.system.b);
                self.system.x.fill(0.0);
                solver.solve(&mut self.system)
            }
            SystemSolver::Multigrid(solver) => {
                self.mg_system.resize_with_finest(size, sizes.len());
                let mut level_h = h;
                for (a, level) in self.mg_system.a.levels.iter_mut().zip(&self.levels) {
                    build_fractional_matrix(level, level_h, a);
                    level_h *= 2.0;
                }
                build_fractional_rhs(&self.levels[0], grid, collider, &mut self.mg_system.b.levels[0]);
                solver.solve(&mut self.mg_system)
            }
        };

        let x = match self.solver {
            SystemSolver::Flat(_) => &self.system.x,
            SystemSolver::Multigrid(_) => &self.mg_system.x.levels[0],
        };
        let level = &self.levels[0];
        apply_fractional_pressure_gradient(level, x, grid);

        grid.pressure_mut().par_for_each_index_mut(|i, j, k, p| {
            *p = if level.is_fluid((i, j, k)) { x[(i, j, k)] } else { 0.0 };
        });
        grid.compute_divergence();

        log::debug!(
            "Fractional pressure projection ({:?}): converged {} after {} iterations, residual {:e}",
            self.config.solver,
            result.converged,
            result.iterations,
            result.residual
        );
        self.last_result = result;
        result
    }

    fn config(&self) -> &PressureConfig {
        &self.config
    }

    fn last_result(&self) -> SolverResult<f64> {
        self.last_result
    }

    fn pressure(&self) -> &FdmVector3 {
        match self.solver {
            SystemSolver::Flat(_) => &self.system.x,
            SystemSolver::Multigrid(_) => self
                .mg_system
                .x
                .levels
                .first()
                .unwrap_or(&self.system.x),
        }
    }

    fn suggested_boundary_kind(&self) -> BoundaryKind {
        BoundaryKind::Fractional
    }
}

/// Largest |divergence| over fluid cells.
pub fn max_fluid_divergence(grid: &Grid3D, markers: &Array3<PressureMarker>) -> f64 {
    let mut max = 0.0f64;
    markers.for_each_index(|i, j, k| {
        if markers[(i, j, k)] == PressureMarker::Fluid {
            max = max.max(grid.divergence_at_cell_center(i, j, k).abs());
        }
    });
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scalar_grid::ConstantScalarField3;
    use fdm::Size3;

    /// Fluid below a horizontal level.
    struct FluidBelow(f64);

    impl ScalarField3 for FluidBelow {
        fn sample(&self, x: DVec3) -> f64 {
            x.y - self.0
        }
    }

    const NO_BOUNDARY: ConstantScalarField3 = ConstantScalarField3(f64::MAX);

    /// n x n x 1 box with a divergent field and zero edge faces.
    fn divergent_grid(n: usize) -> Grid3D {
        let mut grid = Grid3D::with_cell_size(n, n, 1, 1.0 / n as f64);
        let u_size = grid.u().size();
        let u_positions: Vec<DVec3> = (0..u_size.len())
            .map(|idx| {
                let (i, j, k) = u_size.coords(idx);
                grid.u_position(i, j, k)
            })
            .collect();
        for (idx, value) in grid.u_mut().as_mut_slice().iter_mut().enumerate() {
            let (i, _, _) = u_size.coords(idx);
            if i > 0 && i < n {
                let p = u_positions[idx];
                *value = (std::f64::consts::PI * p.x).sin() * (1.0 + p.y);
            }
        }
        let v = grid.v_mut();
        let s = v.size();
        v.par_for_each_index_mut(|_, j, _, value| {
            if j > 0 && j + 1 < s.y {
                *value = -1.0;
            }
        });
        grid
    }

    fn solve_with(
        kind: PressureSolverKind,
        max_iterations: usize,
        tolerance: f64,
    ) -> (Grid3D, SinglePhasePressureSolver) {
        let mut grid = divergent_grid(16);
        let config = PressureConfig {
            solver: kind,
            max_iterations,
            tolerance,
            max_number_of_levels: 3,
            ..PressureConfig::default()
        };
        let mut solver = SinglePhasePressureSolver::new(config);
        solver.solve(&mut grid, &NO_BOUNDARY, &FluidBelow(0.5));
        (grid, solver)
    }

    #[test]
    fn test_markers_follow_both_fields() {
        let mut grid = Grid3D::with_cell_size(4, 4, 1, 0.25);
        let mut solver = SinglePhasePressureSolver::default();
        solver.solve(&mut grid, &FluidBelow(0.25), &FluidBelow(0.75));

        let markers = solver.markers().expect("markers built");
        for i in 0..4 {
            assert_eq!(markers[(i, 0, 0)], PressureMarker::Boundary);
            assert_eq!(markers[(i, 1, 0)], PressureMarker::Fluid);
            assert_eq!(markers[(i, 2, 0)], PressureMarker::Fluid);
            assert_eq!(markers[(i, 3, 0)], PressureMarker::Air);
        }
    }

    #[test]
    fn test_matrix_rows() {
        let mut markers = Array3::with_value(Size3::new(3, 1, 1), PressureMarker::Fluid);
        markers[(2, 0, 0)] = PressureMarker::Air;
        let mut a = FdmMatrix3::default();
        build_matrix(&markers, DVec3::splat(0.5), &mut a);

        // 1/h^2 = 4
        assert_eq!(a[(0, 0, 0)].center, 4.0);
        assert_eq!(a[(0, 0, 0)].right, -4.0);
        assert_eq!(a[(1, 0, 0)].center, 8.0);
        assert_eq!(a[(1, 0, 0)].right, 0.0);
        assert_eq!(
            a[(2, 0, 0)],
            FdmMatrixRow3 {
                center: 1.0,
                ..Default::default()
            }
        );

        markers[(0, 0, 0)] = PressureMarker::Boundary;
        build_matrix(&markers, DVec3::splat(0.5), &mut a);
        assert_eq!(a[(1, 0, 0)].center, 4.0);
        assert_eq!(a[(0, 0, 0)].right, 0.0);
    }

    #[test]
    fn test_coarsening_is_majority_vote() {
        let fine = Array3::with_value(Size3::new(4, 4, 1), PressureMarker::Fluid);
        let mut coarse = Array3::default();
        coarsen_markers(&fine, &mut coarse, Size3::new(2, 2, 1));
        assert!(coarse.as_slice().iter().all(|&m| m == PressureMarker::Fluid));

        // Window [0, 0, 1, 1] splits evenly: the later marker wins.
        let mut fine = Array3::with_value(Size3::new(2, 1, 1), PressureMarker::Fluid);
        fine[(1, 0, 0)] = PressureMarker::Boundary;
        coarsen_markers(&fine, &mut coarse, Size3::new(1, 1, 1));
        assert_eq!(coarse[(0, 0, 0)], PressureMarker::Boundary);

        fine[(1, 0, 0)] = PressureMarker::Air;
        coarsen_markers(&fine, &mut coarse, Size3::new(1, 1, 1));
        assert_eq!(coarse[(0, 0, 0)], PressureMarker::Air);
    }

    #[test]
    fn test_iccg_projection_removes_divergence() {
        let before = divergent_grid(16).max_abs_divergence();
        let (grid, solver) = solve_with(PressureSolverKind::Iccg, 500, 1e-10);

        let markers = solver.markers().expect("markers built");
        let after = max_fluid_divergence(&grid, markers);
        assert!(before > 1.0);
        assert!(after < 1e-6, "max fluid divergence {}", after);
        assert!(solver.last_result().converged);
    }

    #[test]
    fn test_air_pressure_is_zero() {
        let (grid, solver) = solve_with(PressureSolverKind::Cg, 500, 1e-10);
        let markers = solver.markers().expect("markers built");
        markers.for_each_index(|i, j, k| {
            if markers[(i, j, k)] == PressureMarker::Air {
                assert_eq!(grid.pressure()[(i, j, k)], 0.0);
            }
        });
        assert!(max_fluid_divergence(&grid, markers) < 1e-6);
    }

    #[test]
    fn test_relaxation_solvers_remove_divergence() {
        for kind in [PressureSolverKind::Jacobi, PressureSolverKind::GaussSeidel] {
            let (grid, solver) = solve_with(kind, 50_000, 1e-8);
            let markers = solver.markers().expect("markers built");
            let after = max_fluid_divergence(&grid, markers);
            assert!(after <= 1e-8, "{:?}: max fluid divergence {}", kind, after);
        }
    }

    #[test]
    fn test_mgpcg_removes_divergence() {
        let (grid, solver) = solve_with(PressureSolverKind::Mgpcg, 200, 1e-10);
        assert_eq!(solver.marker_levels().len(), 3);
        let markers = solver.markers().expect("markers built");
        let after = max_fluid_divergence(&grid, markers);
        assert!(after < 1e-4, "max fluid divergence {}", after);
    }

    #[test]
    fn test_multigrid_reduces_divergence() {
        let before = divergent_grid(16).max_abs_divergence();
        let (grid, solver) = solve_with(PressureSolverKind::Multigrid, 50, 1e-10);
        let markers = solver.markers().expect("markers built");
        let after = max_fluid_divergence(&grid, markers);
        assert!(after < 0.1 * before, "before {} after {}", before, after);
    }

    #[test]
    fn test_boundary_faces_are_untouched() {
        let mut grid = divergent_grid(8);
        let v_before = grid.v().clone();
        let mut solver = SinglePhasePressureSolver::default();
        solver.solve(&mut grid, &FluidBelow(0.25), &FluidBelow(0.75));

        // Faces between the boundary rows j = 0, 1 and the first fluid row
        for i in 0..8 {
            assert_eq!(grid.v()[(i, 1, 0)], v_before[(i, 1, 0)]);
            assert_eq!(grid.v()[(i, 2, 0)], v_before[(i, 2, 0)]);
        }
    }

    #[test]
    fn test_fractional_weights_follow_collider() {
        let mut grid = Grid3D::with_cell_size(8, 8, 1, 0.125);
        let mut solver = FractionalSinglePhasePressureSolver::default();
        solver.solve(&mut grid, &FluidBelow(0.3), &ConstantScalarField3(-1.0));

        let level = solver.level().expect("weights built");
        let [u, v, _] = &level.weights;
        for i in 0..8 {
            // v at y = 0.25 is buried, y = 0.375 is clear
            assert_eq!(v[(i, 2, 0)], 0.0);
            assert_eq!(v[(i, 3, 0)], 1.0);
            // u faces at y = 0.3125 span 0.25..0.375: 0.4 of the face is solid
            assert!((u[(i, 2, 0)] - 0.6).abs() < 1e-12, "{}", u[(i, 2, 0)]);
            assert_eq!(u[(i, 5, 0)], 1.0);
        }
    }

    #[test]
    fn test_fractional_matrix_rows() {
        let mut level = FractionalLevel::default();
        level.fluid_sdf = Array3::new(Size3::new(2, 1, 1));
        level.fluid_sdf[(0, 0, 0)] = -0.1;
        level.fluid_sdf[(1, 0, 0)] = 0.3;
        level.weights = [
            Array3::with_value(Size3::new(3, 1, 1), 1.0),
            Array3::with_value(Size3::new(2, 2, 1), 1.0),
            Array3::with_value(Size3::new(2, 1, 2), 1.0),
        ];
        let mut a = FdmMatrix3::default();
        build_fractional_matrix(&level, DVec3::splat(0.5), &mut a);

        // Surface a quarter of the way to the air cell: 4 / 0.25
        assert!((a[(0, 0, 0)].center - 16.0).abs() < 1e-12);
        assert_eq!(a[(0, 0, 0)].right, 0.0);
        assert_eq!(a[(1, 0, 0)].center, 1.0);

        // Both cells fluid: plain Laplacian coupling scaled by the face weight
        level.fluid_sdf[(1, 0, 0)] = -0.3;
        level.weights[0][(1, 0, 0)] = 0.5;
        build_fractional_matrix(&level, DVec3::splat(0.5), &mut a);
        assert_eq!(a[(0, 0, 0)].center, 2.0);
        assert_eq!(a[(0, 0, 0)].right, -2.0);
        assert_eq!(a[(1, 0, 0)].center, 2.0);
    }

    #[test]
    fn test_sealed_fluid_cell_is_decoupled() {
        let mut level = FractionalLevel::default();
        level.fluid_sdf = Array3::with_value(Size3::new(3, 1, 1), -1.0);
        level.weights = [
            Array3::new(Size3::new(4, 1, 1)),
            Array3::new(Size3::new(3, 2, 1)),
            Array3::new(Size3::new(3, 1, 2)),
        ];
        let mut grid = Grid3D::with_cell_size(3, 1, 1, 1.0);
        grid.fill_velocity(DVec3::new(1.0, 2.0, 3.0));

        let mut a = FdmMatrix3::default();
        let mut b = FdmVector3::default();
        build_fractional_matrix(&level, grid.grid_spacing(), &mut a);
        build_fractional_rhs(&level, &grid, None, &mut b);
        for i in 0..3 {
            assert_eq!(a[(i, 0, 0)].center, 1.0);
            assert_eq!(b[(i, 0, 0)], 0.0);
        }
    }

    #[test]
    fn test_moving_collider_adds_flux() {
        let grid = Grid3D::with_cell_size(8, 8, 1, 0.125);
        let mut level = FractionalLevel::default();
        level.build(
            grid.resolution(),
            grid.grid_spacing(),
            grid.origin(),
            &FluidBelow(0.3),
            &ConstantScalarField3(-1.0),
        );
        let rising: SharedCollider = std::sync::Arc::new(
            crate::collider::RigidBodyCollider::new(crate::surface::Plane::horizontal(0.3))
                .with_velocity(DVec3::Y, DVec3::ZERO),
        );

        let mut b = FdmVector3::default();
        build_fractional_rhs(&level, &grid, None, &mut b);
        assert_eq!(b[(3, 2, 0)], 0.0);

        // The buried face below cell j = 2 pushes fluid in at speed 1
        build_fractional_rhs(&level, &grid, Some(&rising), &mut b);
        assert!((b[(3, 2, 0)] + 8.0).abs() < 1e-9, "{}", b[(3, 2, 0)]);
        assert!(b[(3, 5, 0)].abs() < 1e-12);
    }

    #[test]
    fn test_fractional_projection_removes_divergence() {
        let mut grid = divergent_grid(16);
        let config = PressureConfig {
            max_iterations: 500,
            tolerance: 1e-10,
            ..PressureConfig::default()
        };
        let mut solver = FractionalSinglePhasePressureSolver::new(config);
        let result = solver.solve(&mut grid, &NO_BOUNDARY, &FluidBelow(0.5));
        assert!(result.converged);

        let level = solver.level().expect("levels built");
        let mut fluid_cells = 0;
        level.fluid_sdf.for_each_index(|i, j, k| {
            if !is_inside_sdf(level.fluid_sdf[(i, j, k)]) {
                assert_eq!(grid.pressure()[(i, j, k)], 0.0);
                return;
            }
            fluid_cells += 1;
            let div = grid.divergence_at_cell_center(i, j, k);
            assert!(div.abs() < 1e-6, "divergence {} at {:?}", div, (i, j, k));
        });
        assert_eq!(fluid_cells, 16 * 8);
    }

    /// Still water with one step of gravity added: the projection cancels it.
    fn falling_pool() -> Grid3D {
        let mut grid = Grid3D::with_cell_size(4, 8, 1, 0.125);
        grid.v_mut()
            .par_for_each_index_mut(|_, j, _, v| *v = if j == 0 { 0.0 } else { -1.0 });
        grid
    }

    #[test]
    fn test_fractional_still_pool_comes_to_rest() {
        for (kind, tolerance) in [(PressureSolverKind::Iccg, 1e-6), (PressureSolverKind::Mgpcg, 1e-4)] {
            let mut grid = falling_pool();
            let config = PressureConfig {
                solver: kind,
                max_iterations: 200,
                tolerance: 1e-10,
                max_number_of_levels: 3,
                ..PressureConfig::default()
            };
            let mut solver = FractionalSinglePhasePressureSolver::new(config);
            // Surface between cell centres, 0.9 of the way to the first air cell
            solver.solve(&mut grid, &NO_BOUNDARY, &FluidBelow(0.55));

            for i in 0..4 {
                for j in 1..=4 {
                    let v = grid.v()[(i, j, 0)];
                    assert!(v.abs() < tolerance, "{:?}: v{:?} = {}", kind, (i, j), v);
                }
                // Air faces away from the surface are left alone
                assert_eq!(grid.v()[(i, 6, 0)], -1.0);
            }
        }
    }

    #[test]
    fn test_solvers_suggest_their_boundary_kind() {
        let blocked = pressure_solver_for(BoundaryKind::Blocked, PressureConfig::default());
        let fractional = pressure_solver_for(BoundaryKind::Fractional, PressureConfig::default());
        assert_eq!(blocked.suggested_boundary_kind(), BoundaryKind::Blocked);
        assert_eq!(fractional.suggested_boundary_kind(), BoundaryKind::Fractional);
        assert!(!fractional.last_result().converged);
    }

    #[test]
    fn test_empty_grid_is_noop() {
        let mut grid = Grid3D::with_cell_size(0, 4, 4, 1.0);
        let mut solver = SinglePhasePressureSolver::default();
        let result = solver.solve(&mut grid, &NO_BOUNDARY, &ConstantScalarField3(-1.0));
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert!(solver.markers().is_none());
    }
}
