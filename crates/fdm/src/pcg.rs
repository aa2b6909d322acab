//! Preconditioned conjugate gradient, generic over any [`Blas`].

use crate::blas::{Blas, LinearSystem, LinearSystemSolver, Real, SolverResult};
use crate::fdm2::FdmBlas2;
use crate::fdm3::FdmBlas3;

/// Recompute the residual from scratch every this many iterations.
const RESIDUAL_RECOMPUTE_INTERVAL: usize = 50;

/// Approximate inverse of the system matrix.
pub trait Preconditioner<B: Blas> {
    /// Name used in solver log lines.
    const LABEL: &'static str = "PCG";

    /// Prepare for systems with matrix `a`.
    fn build(&mut self, a: &B::Matrix);

    /// x = M^-1 b
    fn solve(&mut self, b: &B::Vector, x: &mut B::Vector);
}

/// Identity preconditioner; turns PCG into plain CG.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullPreconditioner;

impl<B: Blas> Preconditioner<B> for NullPreconditioner {
    const LABEL: &'static str = "CG";

    fn build(&mut self, _a: &B::Matrix) {}

    fn solve(&mut self, b: &B::Vector, x: &mut B::Vector) {
        B::set(b, x);
    }
}

/// Scratch vectors for [`pcg`].
#[derive(Clone, Debug)]
pub struct PcgBuffers<V> {
    pub r: V,
    pub d: V,
    pub q: V,
    pub s: V,
}

impl<V> PcgBuffers<V> {
    /// Zeroed buffers shaped like `v`.
    pub fn like<B: Blas<Vector = V>>(v: &V) -> Self {
        Self {
            r: B::vector_like(v),
            d: B::vector_like(v),
            q: B::vector_like(v),
            s: B::vector_like(v),
        }
    }
}

/// Solve A x = b with preconditioned conjugate gradient.
///
/// `x` holds the initial guess on entry and the solution on exit. The
/// residual is recomputed exactly every 50 iterations, and also on the
/// iteration after the preconditioned residual grows, to limit drift.
///
/// Returns converged if the final residual is within `tolerance` or the loop
/// exited before `max_iterations`.
pub fn pcg<B, P>(
    a: &B::Matrix,
    b: &B::Vector,
    max_iterations: usize,
    tolerance: B::Scalar,
    m: &mut P,
    x: &mut B::Vector,
    buffers: &mut PcgBuffers<B::Vector>,
) -> SolverResult<B::Scalar>
where
    B: Blas,
    P: Preconditioner<B> + ?Sized,
{
    let PcgBuffers { r, d, q, s } = buffers;

    B::set_scalar(B::Scalar::ZERO, r);
    B::set_scalar(B::Scalar::ZERO, d);
    B::set_scalar(B::Scalar::ZERO, q);
    B::set_scalar(B::Scalar::ZERO, s);

    // r = b - Ax
    B::residual(a, x, b, r);

    // d = M^-1 r
    m.solve(r, d);

    // sigma_new = r.d
    let mut sigma_new = B::dot(r, d);

    let tolerance_sq = tolerance * tolerance;
    let mut iter = 0;
    let mut trigger = false;

    while sigma_new > tolerance_sq && iter < max_iterations {
        // q = Ad
        B::mvm(a, d, q);

        // alpha = sigma_new / d.q
        let alpha = sigma_new / B::dot(d, q);

        // x = x + alpha * d
        B::axpy_assign(alpha, d, x);

        if trigger || (iter % RESIDUAL_RECOMPUTE_INTERVAL == 0 && iter > 0) {
            // r = b - Ax
            B::residual(a, x, b, r);
            trigger = false;
        } else {
            // r = r - alpha * q
            B::axpy_assign(-alpha, q, r);
        }

        // s = M^-1 r
        m.solve(r, s);

        let sigma_old = sigma_new;

        // sigma_new = r.s
        sigma_new = B::dot(r, s);

        if sigma_new > sigma_old {
            trigger = true;
        }

        // d = s + beta * d
        let beta = sigma_new / sigma_old;
        B::xpay_assign(s, beta, d);

        iter += 1;
    }

    let residual = sigma_new.abs().sqrt();
    SolverResult {
        converged: residual <= tolerance || iter < max_iterations,
        iterations: iter,
        residual,
    }
}

/// Flat-system solver running [`pcg`] with preconditioner `P`.
///
/// The solution vector is reset to zero before every solve.
#[derive(Clone, Debug)]
pub struct PcgSolver<B: Blas, P> {
    max_iterations: usize,
    tolerance: B::Scalar,
    preconditioner: P,
    last_result: SolverResult<B::Scalar>,
}

impl<B: Blas, P: Preconditioner<B>> PcgSolver<B, P> {
    pub fn new(max_iterations: usize, tolerance: B::Scalar, preconditioner: P) -> Self {
        Self {
            max_iterations,
            tolerance,
            preconditioner,
            last_result: SolverResult {
                converged: false,
                iterations: 0,
                residual: B::Scalar::MAX,
            },
        }
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn tolerance(&self) -> B::Scalar {
        self.tolerance
    }

    /// Outcome of the most recent solve.
    pub fn last_result(&self) -> SolverResult<B::Scalar> {
        self.last_result
    }
}

impl<B: Blas, P: Preconditioner<B> + Default> PcgSolver<B, P> {
    pub fn with_params(max_iterations: usize, tolerance: B::Scalar) -> Self {
        Self::new(max_iterations, tolerance, P::default())
    }
}

impl<B: Blas, P: Preconditioner<B>> LinearSystemSolver<B> for PcgSolver<B, P> {
    fn solve(&mut self, system: &mut LinearSystem<B>) -> SolverResult<B::Scalar> {
        let mut buffers = PcgBuffers::like::<B>(&system.b);

        B::set_scalar(B::Scalar::ZERO, &mut system.x);
        self.preconditioner.build(&system.a);

        let result = pcg::<B, P>(
            &system.a,
            &system.b,
            self.max_iterations,
            self.tolerance,
            &mut self.preconditioner,
            &mut system.x,
            &mut buffers,
        );

        log::info!(
            "Residual after solving {}: {:?} Number of {} iterations: {}",
            P::LABEL,
            result.residual,
            P::LABEL,
            result.iterations
        );

        self.last_result = result;
        result
    }
}

/// 2D conjugate gradient solver.
pub type FdmCgSolver2 = PcgSolver<FdmBlas2, NullPreconditioner>;
/// 3D conjugate gradient solver.
pub type FdmCgSolver3 = PcgSolver<FdmBlas3, NullPreconditioner>;
