//! Multigrid solvers: plain V-cycle iteration and multigrid-preconditioned CG.
//!
//! MGPCG follows McAdams, Sifakis and Teran, "A parallel multigrid Poisson
//! solver for fluids simulation on large grids" (SCA 2010): one V-cycle is
//! the preconditioner of a conjugate gradient iteration on the finest level.

use crate::blas::{Blas, Real, SolverResult};
use crate::fdm2::FdmBlas2;
use crate::fdm3::FdmBlas3;
use crate::mg::{mg_v_cycle, MgBlas, MgLinearSystem, MgMatrix, MgParameters, MgVector};
use crate::pcg::{pcg, PcgBuffers, Preconditioner};
use crate::relax::RelaxMethod;

/// Solver for a multigrid linear system.
pub trait MgLinearSystemSolver<B: MgBlas> {
    fn solve(&mut self, system: &mut MgLinearSystem<B>) -> SolverResult<B::Scalar>;

    /// Parameters used for every V-cycle.
    fn params(&self) -> &MgParameters<B::Scalar>;
}

fn failed<S: Real>() -> SolverResult<S> {
    SolverResult {
        converged: false,
        iterations: 0,
        residual: S::MAX,
    }
}

// ========== V-cycle iteration ==========

/// Repeats V-cycles until the finest residual is within tolerance.
///
/// The finest `x` is the initial guess. Coarser `b` levels are scratch.
#[derive(Clone, Debug)]
pub struct MgSolver<B: Blas> {
    params: MgParameters<B::Scalar>,
    max_cycles: usize,
    last_result: SolverResult<B::Scalar>,
}

impl<B: MgBlas> MgSolver<B> {
    pub fn new(params: MgParameters<B::Scalar>, max_cycles: usize) -> Self {
        Self {
            params,
            max_cycles: max_cycles.max(1),
            last_result: failed(),
        }
    }

    /// Gauss-Seidel smoothed solver with the stock sweep counts.
    pub fn with_levels(
        max_number_of_levels: usize,
        max_cycles: usize,
        tolerance: B::Scalar,
        use_red_black_ordering: bool,
    ) -> Self {
        let params = MgParameters {
            max_number_of_levels,
            max_tolerance: tolerance,
            relax_method: if use_red_black_ordering {
                RelaxMethod::RedBlackGaussSeidel
            } else {
                RelaxMethod::GaussSeidel
            },
            ..MgParameters::default()
        };
        Self::new(params, max_cycles)
    }

    pub fn max_cycles(&self) -> usize {
        self.max_cycles
    }

    pub fn last_result(&self) -> SolverResult<B::Scalar> {
        self.last_result
    }
}

impl<B: MgBlas> MgLinearSystemSolver<B> for MgSolver<B> {
    fn solve(&mut self, system: &mut MgLinearSystem<B>) -> SolverResult<B::Scalar> {
        if system.number_of_levels() == 0 {
            log::warn!("Multigrid solve called on an empty hierarchy");
            self.last_result = failed();
            return self.last_result;
        }

        let mut buffer = system.x.zeros_like();
        let tolerance = self.params.max_tolerance;

        let mut cycles = 0;
        let mut residual = B::Scalar::MAX;
        while cycles < self.max_cycles {
            let result = mg_v_cycle(
                &system.a,
                &self.params,
                &mut system.x,
                &mut system.b,
                &mut buffer,
            );
            cycles += 1;
            residual = result.last_residual_norm;
            log::debug!("V-cycle {}: residual {:?}", cycles, residual);
            if residual <= tolerance {
                break;
            }
        }

        log::info!(
            "Residual after solving MG: {:?} Number of V-cycles: {}",
            residual,
            cycles
        );

        self.last_result = SolverResult {
            converged: residual <= tolerance,
            iterations: cycles,
            residual,
        };
        self.last_result
    }

    fn params(&self) -> &MgParameters<B::Scalar> {
        &self.params
    }
}

// ========== MGPCG ==========

/// One V-cycle as an approximate inverse of the finest-level matrix.
pub struct MgPreconditioner<'a, B: Blas> {
    a: &'a MgMatrix<B>,
    params: MgParameters<B::Scalar>,
    x: MgVector<B>,
    b: MgVector<B>,
    buffer: MgVector<B>,
}

impl<'a, B: MgBlas> MgPreconditioner<'a, B> {
    /// Scratch hierarchies are shaped like `like`.
    pub fn new(a: &'a MgMatrix<B>, params: MgParameters<B::Scalar>, like: &MgVector<B>) -> Self {
        Self {
            a,
            params,
            x: like.zeros_like(),
            b: like.zeros_like(),
            buffer: like.zeros_like(),
        }
    }
}

impl<B: MgBlas> Preconditioner<B> for MgPreconditioner<'_, B> {
    const LABEL: &'static str = "MGPCG";

    // The hierarchy is fixed at construction.
    fn build(&mut self, _a: &B::Matrix) {}

    fn solve(&mut self, b: &B::Vector, x: &mut B::Vector) {
        B::set(b, &mut self.b.levels[0]);
        B::set_scalar(B::Scalar::ZERO, &mut self.x.levels[0]);
        mg_v_cycle(self.a, &self.params, &mut self.x, &mut self.b, &mut self.buffer);
        B::set(&self.x.levels[0], x);
    }
}

/// Conjugate gradient on the finest level, preconditioned by one V-cycle.
///
/// The finest `x` is reset to zero before every solve.
#[derive(Clone, Debug)]
pub struct MgpcgSolver<B: Blas> {
    params: MgParameters<B::Scalar>,
    max_cg_iterations: usize,
    last_result: SolverResult<B::Scalar>,
}

impl<B: MgBlas> MgpcgSolver<B> {
    pub fn new(params: MgParameters<B::Scalar>, max_cg_iterations: usize) -> Self {
        Self {
            params,
            max_cg_iterations,
            last_result: failed(),
        }
    }

    /// MGPCG with 30 coarsest and final sweeps, which the preconditioner
    /// needs to stay close to symmetric.
    pub fn with_levels(
        max_cg_iterations: usize,
        max_number_of_levels: usize,
        tolerance: B::Scalar,
    ) -> Self {
        let params = MgParameters {
            max_number_of_levels,
            number_of_coarsest_iter: 30,
            number_of_final_iter: 30,
            max_tolerance: tolerance,
            ..MgParameters::default()
        };
        Self::new(params, max_cg_iterations)
    }

    pub fn max_cg_iterations(&self) -> usize {
        self.max_cg_iterations
    }

    pub fn last_result(&self) -> SolverResult<B::Scalar> {
        self.last_result
    }
}

impl<B: MgBlas> MgLinearSystemSolver<B> for MgpcgSolver<B> {
    fn solve(&mut self, system: &mut MgLinearSystem<B>) -> SolverResult<B::Scalar> {
        if system.number_of_levels() == 0 {
            log::warn!("MGPCG solve called on an empty hierarchy");
            self.last_result = failed();
            return self.last_result;
        }

        let MgLinearSystem { a, x, b } = system;
        let mut buffers = PcgBuffers::like::<B>(&b.levels[0]);
        let mut precond = MgPreconditioner::new(a, self.params, x);

        B::set_scalar(B::Scalar::ZERO, &mut x.levels[0]);

        let result = pcg::<B, _>(
            &a.levels[0],
            &b.levels[0],
            self.max_cg_iterations,
            self.params.max_tolerance,
            &mut precond,
            &mut x.levels[0],
            &mut buffers,
        );

        log::info!(
            "Residual after solving MGPCG: {:?} Number of MGPCG iterations: {}",
            result.residual,
            result.iterations
        );

        self.last_result = result;
        result
    }

    fn params(&self) -> &MgParameters<B::Scalar> {
        &self.params
    }
}

pub type FdmMgSolver2 = MgSolver<FdmBlas2>;
pub type FdmMgSolver3 = MgSolver<FdmBlas3>;
pub type FdmMgpcgSolver2 = MgpcgSolver<FdmBlas2>;
pub type FdmMgpcgSolver3 = MgpcgSolver<FdmBlas3>;
