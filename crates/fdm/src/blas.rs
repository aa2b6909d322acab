//! Generic BLAS-style operator set shared by every iterative solver.
//!
//! A [`Blas`] implementation ties together a scalar type, a dense vector type
//! and a stencil matrix type. PCG and multigrid are written only against this
//! trait, so the same algorithm code drives 2D and 3D systems.

use std::fmt::Debug;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

/// Floating-point scalar used by the solvers.
pub trait Real:
    Copy
    + Send
    + Sync
    + Debug
    + PartialOrd
    + Sum
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign
{
    const ZERO: Self;
    const ONE: Self;
    const MAX: Self;

    fn sqrt(self) -> Self;
    fn abs(self) -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;
}

macro_rules! impl_real {
    ($t:ty) => {
        impl Real for $t {
            const ZERO: Self = 0.0;
            const ONE: Self = 1.0;
            const MAX: Self = <$t>::MAX;

            #[inline]
            fn sqrt(self) -> Self {
                <$t>::sqrt(self)
            }

            #[inline]
            fn abs(self) -> Self {
                <$t>::abs(self)
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
        }
    };
}

impl_real!(f32);
impl_real!(f64);

/// Vector/matrix operations over a (scalar, vector, matrix) triple.
///
/// Every array-shaped operation is a per-index computation with no
/// cross-index dependency, so implementations dispatch through
/// [`crate::parallel`]. Inputs are read-only; only `result` (or the
/// explicitly mutable operand) is written. Operands of different shapes are a
/// caller bug and panic.
pub trait Blas {
    type Scalar: Real;
    type Vector: Clone + Debug;
    type Matrix: Clone + Debug;

    /// result = s
    fn set_scalar(s: Self::Scalar, result: &mut Self::Vector);

    /// result = v
    fn set(v: &Self::Vector, result: &mut Self::Vector);

    /// Zero vector with the same shape as `v`.
    fn vector_like(v: &Self::Vector) -> Self::Vector;

    /// a · b
    fn dot(a: &Self::Vector, b: &Self::Vector) -> Self::Scalar;

    /// result = a * x + y
    fn axpy(a: Self::Scalar, x: &Self::Vector, y: &Self::Vector, result: &mut Self::Vector);

    /// y = a * x + y
    fn axpy_assign(a: Self::Scalar, x: &Self::Vector, y: &mut Self::Vector);

    /// y = x + a * y
    fn xpay_assign(x: &Self::Vector, a: Self::Scalar, y: &mut Self::Vector);

    /// result = m * v
    fn mvm(m: &Self::Matrix, v: &Self::Vector, result: &mut Self::Vector);

    /// result = b - a * x
    fn residual(a: &Self::Matrix, x: &Self::Vector, b: &Self::Vector, result: &mut Self::Vector);

    /// sqrt(v · v)
    fn l2_norm(v: &Self::Vector) -> Self::Scalar {
        Self::dot(v, v).sqrt()
    }

    /// max |v_i|
    fn l_inf_norm(v: &Self::Vector) -> Self::Scalar;
}

/// A x = b over a [`Blas`] triple.
#[derive(Clone, Debug)]
pub struct LinearSystem<B: Blas> {
    /// System matrix.
    pub a: B::Matrix,
    /// Solution vector.
    pub x: B::Vector,
    /// Right-hand side.
    pub b: B::Vector,
}

/// Outcome of an iterative solve.
///
/// Non-convergence is reported here rather than as an error; callers decide
/// whether an approximate answer is acceptable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SolverResult<S> {
    /// Residual within tolerance, or the solver stopped before its budget.
    pub converged: bool,
    /// Iterations actually performed.
    pub iterations: usize,
    /// Residual norm at exit.
    pub residual: S,
}

/// Solver for a flat (single-level) linear system.
pub trait LinearSystemSolver<B: Blas> {
    fn solve(&mut self, system: &mut LinearSystem<B>) -> SolverResult<B::Scalar>;
}
