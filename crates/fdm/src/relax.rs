//! Stationary relaxation sweeps (Jacobi, Gauss-Seidel, red-black Gauss-Seidel).
//!
//! These are both standalone solvers ([`RelaxSolver`]) and the smoothers used
//! by the multigrid V-cycle.

use serde::{Deserialize, Serialize};

use crate::blas::{Blas, LinearSystem, LinearSystemSolver, Real, SolverResult};
use crate::fdm2::{off_diagonal_product2, FdmBlas2, FdmMatrix2, FdmVector2};
use crate::fdm3::{off_diagonal_product3, FdmBlas3, FdmMatrix3, FdmVector3};
use crate::parallel;

/// Relaxation strategy.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum RelaxMethod {
    /// Lexicographic Gauss-Seidel with successive over-relaxation.
    #[default]
    GaussSeidel,
    /// Gauss-Seidel over two interleaved colors; each color updates in parallel.
    RedBlackGaussSeidel,
    /// Jacobi through a scratch buffer; fully parallel.
    Jacobi,
}

/// A [`Blas`] that knows how to relax its own systems.
pub trait RelaxBlas: Blas {
    /// Run one sweep of `method` on A x = b.
    ///
    /// `buffer` has the shape of `x` and its contents are clobbered.
    /// `sor_factor` is ignored by Jacobi.
    fn relax(
        method: RelaxMethod,
        a: &Self::Matrix,
        b: &Self::Vector,
        sor_factor: Self::Scalar,
        x: &mut Self::Vector,
        buffer: &mut Self::Vector,
    );
}

#[inline]
fn sor_update(x: f64, b: f64, off_diagonal: f64, center: f64, sor_factor: f64) -> f64 {
    if center == 0.0 {
        return x;
    }
    (1.0 - sor_factor) * x + sor_factor * (b - off_diagonal) / center
}

#[inline]
fn jacobi_update(x: f64, b: f64, off_diagonal: f64, center: f64) -> f64 {
    if center == 0.0 {
        x
    } else {
        (b - off_diagonal) / center
    }
}

// ========== 3D sweeps ==========

fn gauss_seidel3(a: &FdmMatrix3, b: &FdmVector3, sor_factor: f64, x: &mut FdmVector3) {
    let size = a.size();
    for k in 0..size.z {
        for j in 0..size.y {
            for i in 0..size.x {
                let off = off_diagonal_product3(a, x, i, j, k);
                x[(i, j, k)] = sor_update(x[(i, j, k)], b[(i, j, k)], off, a[(i, j, k)].center, sor_factor);
            }
        }
    }
}

fn red_black_gauss_seidel3(
    a: &FdmMatrix3,
    b: &FdmVector3,
    sor_factor: f64,
    x: &mut FdmVector3,
    buffer: &mut FdmVector3,
) {
    let size = a.size();
    for color in 0..2 {
        {
            let src = &*x;
            parallel::for_each_mut(buffer.as_mut_slice(), |idx, out| {
                let (i, j, k) = size.coords(idx);
                *out = if (i + j + k) % 2 == color {
                    let off = off_diagonal_product3(a, src, i, j, k);
                    sor_update(src[(i, j, k)], b[(i, j, k)], off, a[(i, j, k)].center, sor_factor)
                } else {
                    src[(i, j, k)]
                };
            });
        }
        x.swap(buffer);
    }
}

fn jacobi3(a: &FdmMatrix3, b: &FdmVector3, x: &mut FdmVector3, buffer: &mut FdmVector3) {
    let size = a.size();
    {
        let src = &*x;
        parallel::for_each_mut(buffer.as_mut_slice(), |idx, out| {
            let (i, j, k) = size.coords(idx);
            let off = off_diagonal_product3(a, src, i, j, k);
            *out = jacobi_update(src[(i, j, k)], b[(i, j, k)], off, a[(i, j, k)].center);
        });
    }
    x.swap(buffer);
}

impl RelaxBlas for FdmBlas3 {
    fn relax(
        method: RelaxMethod,
        a: &FdmMatrix3,
        b: &FdmVector3,
        sor_factor: f64,
        x: &mut FdmVector3,
        buffer: &mut FdmVector3,
    ) {
        let size = a.size();
        assert!(
            size == b.size() && size == x.size() && size == buffer.size(),
            "shape mismatch in relax: {:?}",
            size
        );
        match method {
            RelaxMethod::GaussSeidel => gauss_seidel3(a, b, sor_factor, x),
            RelaxMethod::RedBlackGaussSeidel => red_black_gauss_seidel3(a, b, sor_factor, x, buffer),
            RelaxMethod::Jacobi => jacobi3(a, b, x, buffer),
        }
    }
}

// ========== 2D sweeps ==========

fn gauss_seidel2(a: &FdmMatrix2, b: &FdmVector2, sor_factor: f64, x: &mut FdmVector2) {
    let size = a.size();
    for j in 0..size.y {
        for i in 0..size.x {
            let off = off_diagonal_product2(a, x, i, j);
            x[(i, j)] = sor_update(x[(i, j)], b[(i, j)], off, a[(i, j)].center, sor_factor);
        }
    }
}

fn red_black_gauss_seidel2(
    a: &FdmMatrix2,
    b: &FdmVector2,
    sor_factor: f64,
    x: &mut FdmVector2,
    buffer: &mut FdmVector2,
) {
    let size = a.size();
    for color in 0..2 {
        {
            let src = &*x;
            parallel::for_each_mut(buffer.as_mut_slice(), |idx, out| {
                let (i, j) = size.coords(idx);
                *out = if (i + j) % 2 == color {
                    let off = off_diagonal_product2(a, src, i, j);
                    sor_update(src[(i, j)], b[(i, j)], off, a[(i, j)].center, sor_factor)
                } else {
                    src[(i, j)]
                };
            });
        }
        x.swap(buffer);
    }
}

fn jacobi2(a: &FdmMatrix2, b: &FdmVector2, x: &mut FdmVector2, buffer: &mut FdmVector2) {
    let size = a.size();
    {
        let src = &*x;
        parallel::for_each_mut(buffer.as_mut_slice(), |idx, out| {
            let (i, j) = size.coords(idx);
            let off = off_diagonal_product2(a, src, i, j);
            *out = jacobi_update(src[(i, j)], b[(i, j)], off, a[(i, j)].center);
        });
    }
    x.swap(buffer);
}

impl RelaxBlas for FdmBlas2 {
    fn relax(
        method: RelaxMethod,
        a: &FdmMatrix2,
        b: &FdmVector2,
        sor_factor: f64,
        x: &mut FdmVector2,
        buffer: &mut FdmVector2,
    ) {
        let size = a.size();
        assert!(
            size == b.size() && size == x.size() && size == buffer.size(),
            "shape mismatch in relax: {:?}",
            size
        );
        match method {
            RelaxMethod::GaussSeidel => gauss_seidel2(a, b, sor_factor, x),
            RelaxMethod::RedBlackGaussSeidel => red_black_gauss_seidel2(a, b, sor_factor, x, buffer),
            RelaxMethod::Jacobi => jacobi2(a, b, x, buffer),
        }
    }
}

// ========== Standalone solver ==========

/// Iterates a relaxation sweep until the residual drops below tolerance.
///
/// The residual is only evaluated every `residual_check_interval` sweeps.
/// Unlike the PCG solvers, the current contents of `x` are the initial guess.
#[derive(Clone, Debug)]
pub struct RelaxSolver<B: Blas> {
    method: RelaxMethod,
    max_iterations: usize,
    residual_check_interval: usize,
    tolerance: B::Scalar,
    sor_factor: B::Scalar,
    last_result: SolverResult<B::Scalar>,
}

impl<B: RelaxBlas> RelaxSolver<B> {
    pub fn new(
        method: RelaxMethod,
        max_iterations: usize,
        residual_check_interval: usize,
        tolerance: B::Scalar,
        sor_factor: B::Scalar,
    ) -> Self {
        Self {
            method,
            max_iterations,
            residual_check_interval: residual_check_interval.max(1),
            tolerance,
            sor_factor,
            last_result: SolverResult {
                converged: false,
                iterations: 0,
                residual: B::Scalar::MAX,
            },
        }
    }

    /// Jacobi solver.
    pub fn jacobi(max_iterations: usize, residual_check_interval: usize, tolerance: B::Scalar) -> Self {
        Self::new(
            RelaxMethod::Jacobi,
            max_iterations,
            residual_check_interval,
            tolerance,
            B::Scalar::ONE,
        )
    }

    /// Gauss-Seidel solver with SOR, optionally red-black ordered.
    pub fn gauss_seidel(
        max_iterations: usize,
        residual_check_interval: usize,
        tolerance: B::Scalar,
        sor_factor: B::Scalar,
        use_red_black_ordering: bool,
    ) -> Self {
        let method = if use_red_black_ordering {
            RelaxMethod::RedBlackGaussSeidel
        } else {
            RelaxMethod::GaussSeidel
        };
        Self::new(method, max_iterations, residual_check_interval, tolerance, sor_factor)
    }

    pub fn method(&self) -> RelaxMethod {
        self.method
    }

    pub fn sor_factor(&self) -> B::Scalar {
        self.sor_factor
    }

    pub fn last_result(&self) -> SolverResult<B::Scalar> {
        self.last_result
    }
}

impl<B: RelaxBlas> LinearSystemSolver<B> for RelaxSolver<B> {
    fn solve(&mut self, system: &mut LinearSystem<B>) -> SolverResult<B::Scalar> {
        let mut buffer = B::vector_like(&system.x);
        let mut residual = B::vector_like(&system.x);

        let mut iterations = 0;
        while iterations < self.max_iterations {
            B::relax(
                self.method,
                &system.a,
                &system.b,
                self.sor_factor,
                &mut system.x,
                &mut buffer,
            );
            iterations += 1;

            if iterations % self.residual_check_interval == 0 {
                B::residual(&system.a, &system.x, &system.b, &mut residual);
                if B::l2_norm(&residual) < self.tolerance {
                    break;
                }
            }
        }

        B::residual(&system.a, &system.x, &system.b, &mut residual);
        let norm = B::l2_norm(&residual);

        log::info!(
            "Residual after solving {:?}: {:?} Number of iterations: {}",
            self.method,
            norm,
            iterations
        );

        self.last_result = SolverResult {
            converged: norm <= self.tolerance,
            iterations,
            residual: norm,
        };
        self.last_result
    }
}

pub type FdmJacobiSolver2 = RelaxSolver<FdmBlas2>;
pub type FdmJacobiSolver3 = RelaxSolver<FdmBlas3>;
/// Gauss-Seidel solvers share the relaxation driver; the ordering is a field.
pub type FdmGaussSeidelSolver2 = RelaxSolver<FdmBlas2>;
pub type FdmGaussSeidelSolver3 = RelaxSolver<FdmBlas3>;
