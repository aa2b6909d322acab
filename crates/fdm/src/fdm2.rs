//! 2D finite-difference stencil systems.

use serde::{Deserialize, Serialize};

use crate::array::{Array2, Size2};
use crate::blas::{Blas, LinearSystem};
use crate::parallel;

/// One row of the 5-point stencil matrix.
#[derive(Clone, Copy, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct FdmMatrixRow2 {
    /// Diagonal component of the matrix (row, row).
    pub center: f64,
    /// Off-diagonal element where column refers to (i+1, j) grid point.
    pub right: f64,
    /// Off-diagonal element where column refers to (i, j+1) grid point.
    pub up: f64,
}

pub type FdmVector2 = Array2<f64>;
pub type FdmMatrix2 = Array2<FdmMatrixRow2>;
pub type FdmLinearSystem2 = LinearSystem<FdmBlas2>;

impl LinearSystem<FdmBlas2> {
    pub fn new(size: Size2) -> Self {
        Self {
            a: FdmMatrix2::new(size),
            x: FdmVector2::new(size),
            b: FdmVector2::new(size),
        }
    }

    pub fn size(&self) -> Size2 {
        self.a.size()
    }

    pub fn resize(&mut self, size: Size2) {
        self.a.resize(size);
        self.x.resize(size);
        self.b.resize(size);
    }

    pub fn clear(&mut self) {
        *self = Self::new(Size2::default());
    }
}

#[inline]
pub(crate) fn stencil_product2(m: &FdmMatrix2, v: &FdmVector2, i: usize, j: usize) -> f64 {
    off_diagonal_product2(m, v, i, j) + m[(i, j)].center * v[(i, j)]
}

#[inline]
pub(crate) fn off_diagonal_product2(m: &FdmMatrix2, v: &FdmVector2, i: usize, j: usize) -> f64 {
    let size = m.size();
    let row = &m[(i, j)];
    let mut sum = 0.0;

    if i > 0 {
        sum += m[(i - 1, j)].right * v[(i - 1, j)];
    }
    if i + 1 < size.x {
        sum += row.right * v[(i + 1, j)];
    }
    if j > 0 {
        sum += m[(i, j - 1)].up * v[(i, j - 1)];
    }
    if j + 1 < size.y {
        sum += row.up * v[(i, j + 1)];
    }

    sum
}

fn assert_same_size(a: Size2, b: Size2) {
    assert!(a == b, "shape mismatch: {:?} vs {:?}", a, b);
}

/// [`Blas`] over 2D stencil matrices and dense grids of `f64`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FdmBlas2;

impl Blas for FdmBlas2 {
    type Scalar = f64;
    type Vector = FdmVector2;
    type Matrix = FdmMatrix2;

    fn set_scalar(s: f64, result: &mut FdmVector2) {
        parallel::for_each_mut(result.as_mut_slice(), |_, r| *r = s);
    }

    fn set(v: &FdmVector2, result: &mut FdmVector2) {
        assert_same_size(v.size(), result.size());
        let src = v.as_slice();
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| *r = src[idx]);
    }

    fn vector_like(v: &FdmVector2) -> FdmVector2 {
        FdmVector2::new(v.size())
    }

    fn dot(a: &FdmVector2, b: &FdmVector2) -> f64 {
        assert_same_size(a.size(), b.size());
        let (a, b) = (a.as_slice(), b.as_slice());
        parallel::sum(a.len(), |idx| a[idx] * b[idx])
    }

    fn axpy(a: f64, x: &FdmVector2, y: &FdmVector2, result: &mut FdmVector2) {
        assert_same_size(x.size(), y.size());
        assert_same_size(x.size(), result.size());
        let (x, y) = (x.as_slice(), y.as_slice());
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| *r = a * x[idx] + y[idx]);
    }

    fn axpy_assign(a: f64, x: &FdmVector2, y: &mut FdmVector2) {
        assert_same_size(x.size(), y.size());
        let x = x.as_slice();
        parallel::for_each_mut(y.as_mut_slice(), |idx, r| *r += a * x[idx]);
    }

    fn xpay_assign(x: &FdmVector2, a: f64, y: &mut FdmVector2) {
        assert_same_size(x.size(), y.size());
        let x = x.as_slice();
        parallel::for_each_mut(y.as_mut_slice(), |idx, r| *r = x[idx] + a * *r);
    }

    fn mvm(m: &FdmMatrix2, v: &FdmVector2, result: &mut FdmVector2) {
        assert_same_size(m.size(), v.size());
        assert_same_size(m.size(), result.size());
        let size = m.size();
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| {
            let (i, j) = size.coords(idx);
            *r = stencil_product2(m, v, i, j);
        });
    }

    fn residual(a: &FdmMatrix2, x: &FdmVector2, b: &FdmVector2, result: &mut FdmVector2) {
        assert_same_size(a.size(), x.size());
        assert_same_size(a.size(), b.size());
        assert_same_size(a.size(), result.size());
        let size = a.size();
        let rhs = b.as_slice();
        parallel::for_each_mut(result.as_mut_slice(), |idx, r| {
            let (i, j) = size.coords(idx);
            *r = rhs[idx] - stencil_product2(a, x, i, j);
        });
    }

    fn l_inf_norm(v: &FdmVector2) -> f64 {
        let v = v.as_slice();
        parallel::max(v.len(), 0.0, |idx| v[idx].abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mvm_matches_dense_product() {
        let size = Size2::new(3, 2);
        let mut m = FdmMatrix2::new(size);
        m.par_for_each_index_mut(|i, j, row| {
            row.center = 4.0 + i as f64;
            row.right = if i + 1 < size.x { -1.0 - j as f64 } else { 0.0 };
            row.up = if j + 1 < size.y { -0.5 } else { 0.0 };
        });

        let mut v = FdmVector2::new(size);
        v.par_for_each_index_mut(|i, j, x| *x = 1.0 + i as f64 + 10.0 * j as f64);

        // Dense reference built from the symmetric stencil
        let n = size.len();
        let mut dense = vec![vec![0.0; n]; n];
        m.for_each_index(|i, j| {
            let row = size.index(i, j);
            dense[row][row] = m[(i, j)].center;
            if i + 1 < size.x {
                let col = size.index(i + 1, j);
                dense[row][col] = m[(i, j)].right;
                dense[col][row] = m[(i, j)].right;
            }
            if j + 1 < size.y {
                let col = size.index(i, j + 1);
                dense[row][col] = m[(i, j)].up;
                dense[col][row] = m[(i, j)].up;
            }
        });

        let mut result = FdmVector2::new(size);
        FdmBlas2::mvm(&m, &v, &mut result);

        for row in 0..n {
            let expected: f64 = (0..n).map(|col| dense[row][col] * v.as_slice()[col]).sum();
            assert!(
                (result.as_slice()[row] - expected).abs() < 1e-12,
                "row {}: got {}, expected {}",
                row,
                result.as_slice()[row],
                expected
            );
        }
    }

    #[test]
    fn test_set_and_fill() {
        let size = Size2::new(4, 4);
        let mut a = FdmVector2::new(size);
        FdmBlas2::set_scalar(2.5, &mut a);
        let mut b = FdmVector2::new(size);
        FdmBlas2::set(&a, &mut b);
        assert_eq!(a, b);
        assert_eq!(FdmBlas2::l_inf_norm(&b), 2.5);
    }
}
