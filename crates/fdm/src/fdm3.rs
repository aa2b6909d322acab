//! 3D finite-difference stencil systems.
//!
//! The matrix stores one [`FdmMatrixRow3`] per cell: the diagonal and the
//! coefficients coupling the cell with its +x, +y and +z neighbors. The
//! matrix is symmetric, so the -x coupling of cell (i, j, k) is the `right`
//! coefficient of cell (i - 1, j, k). Couplings past the domain edge are
//! implicitly zero.

use serde::{Deserialize, Serialize};

use crate::array::{Array3, Size3};
use crate::blas::{Blas, LinearSystem};
use crate::parallel;

/// One row of the 7-point stencil matrix.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct FdmMatrixRow3 {
    /// Diagonal component of the matrix (row, row).
    pub center: f64,
    /// Off-diagonal element where column refers to (i+1, j, k) grid point.
    pub right: f64,
    /// Off-diagonal element where column refers to (i, j+1, k) grid point.
    pub up: f64,
    /// Off-diagonal element where column refers to (i, j, k+1) grid point.
    pub front: f64,
}

pub type FdmVector3 = Array3<f64>;
pub type FdmMatrix3 = Array3<FdmMatrixRow3>;
pub type FdmLinearSystem3 = LinearSystem<FdmBlas3>;

impl LinearSystem<FdmBlas3> {
    /// Zero system of the given resolution.
    pub fn new(size: Size3) -> Self {
        Self {
            a: FdmMatrix3::new(size),
            x: FdmVector3::new(size),
            b: FdmVector3::new(size),
        }
    }

    pub fn size(&self) -> Size3 {
        self.a.size()
    }

    /// Reallocate all three operands for a new resolution.
    pub fn resize(&mut self, size: Size3) {
        self.a.resize(size);
        self.x.resize(size);
        self.b.resize(size);
    }

    /// Release all storage.
    pub fn clear(&mut self) {
        *self = Self::new(Size3::default());
    }
}

/// (A * v) at cell (i, j, k).
#[inline]
pub(crate) fn stencil_product3(
    m: &FdmMatrix3,
    v: &FdmVector3,
    i: usize,
    j: usize,
    k: usize,
) -> f64 {
    off_diagonal_product3(m, v, i, j, k) + m[(i, j, k)].center * v[(i, j, k)]
}

/// Sum of the off-diagonal terms of row (i, j, k) applied to `v`.
#[inline]
pub(crate) fn off_diagonal_product3(
    m: &FdmMatrix3,
    v: &FdmVector3,
    i: usize,
    j: usize,
    k: usize,
) -> f64 {
    let size = m.size();
    let row = &m[(i, j, k)];
    let mut sum = 0.0;

    if i > 0 {
        sum += m[(i - 1, j, k)].right * v[(i - 1, j, k)];
    }
    if i + 1 < size.x {
        sum += row.right * v[(i + 1, j, k)];
    }
    if j > 0 {
        sum += m[(i, j - 1, k)].up * v[(i, j - 1, k)];
    }
    if j + 1 < size.y {
        sum += row.up * v[(i, j + 1, k)];
    }
    if k > 0 {
        sum += m[(i, j, k - 1)].front * v[(i, j, k - 1)];
    }
    if k + 1 < size.z {
        sum += row.front * v[(i, j, k + 1)];
    }

    sum
}

fn assert_same_size(a: Size3, b: Size3) {
    assert!(a == b, "shape mismatch: {:?} vs {:?}", a, b);
}

/// [`Blas`] over 3D stencil matrices and dense grids of `f64`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FdmBlas3;

impl Blas for FdmBlas3 {
    type Scalar = f64;
    type Vector = FdmVector3;
    type Matrix = FdmMatrix3;

    fn set_scalar(s: f64, result: &mut FdmVector3) {
        parallel::for_each_mut(result.as_mut_slice(), |_, r| *r = s);
    }

    fn set(v: &FdmVector3, result: &mut FdmVector3) {
        assert_same_size(v.size(), result.size());
        let src = v.as_slice();
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| *r = src[idx]);
    }

    fn vector_like(v: &FdmVector3) -> FdmVector3 {
        FdmVector3::new(v.size())
    }

    fn dot(a: &FdmVector3, b: &FdmVector3) -> f64 {
        assert_same_size(a.size(), b.size());
        let (a, b) = (a.as_slice(), b.as_slice());
        parallel::sum(a.len(), |idx| a[idx] * b[idx])
    }

    fn axpy(a: f64, x: &FdmVector3, y: &FdmVector3, result: &mut FdmVector3) {
        assert_same_size(x.size(), y.size());
        assert_same_size(x.size(), result.size());
        let (x, y) = (x.as_slice(), y.as_slice());
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| *r = a * x[idx] + y[idx]);
    }

    fn axpy_assign(a: f64, x: &FdmVector3, y: &mut FdmVector3) {
        assert_same_size(x.size(), y.size());
        let x = x.as_slice();
        parallel::for_each_mut(y.as_mut_slice(), |idx, r| *r += a * x[idx]);
    }

    fn xpay_assign(x: &FdmVector3, a: f64, y: &mut FdmVector3) {
        assert_same_size(x.size(), y.size());
        let x = x.as_slice();
        parallel::for_each_mut(y.as_mut_slice(), |idx, r| *r = x[idx] + a * *r);
    }

    fn mvm(m: &FdmMatrix3, v: &FdmVector3, result: &mut FdmVector3) {
        assert_same_size(m.size(), v.size());
        assert_same_size(m.size(), result.size());
        let size = m.size();
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| {
            let (i, j, k) = size.coords(idx);
            *r = stencil_product3(m, v, i, j, k);
        });
    }

    fn residual(a: &FdmMatrix3, x: &FdmVector3, b: &FdmVector3, result: &mut FdmVector3) {
        assert_same_size(a.size(), x.size());
        assert_same_size(a.size(), b.size());
        assert_same_size(a.size(), result.size());
        let size = a.size();
        let rhs = b.as_slice();
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| {
            let (i, j, k) = size.coords(idx);
            *r = rhs[idx] - stencil_product3(a, x, i, j, k);
        });
    }

    fn l_inf_norm(v: &FdmVector3) -> f64 {
        let v = v.as_slice();
        parallel::max(v.len(), 0.0, |idx| v[idx].abs())
    }
}
