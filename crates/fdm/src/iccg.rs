//! Incomplete-Cholesky preconditioned conjugate gradient (ICCG).
//!
//! IC(0) keeps the sparsity pattern of the stencil: the factor is
//! A ~ (D^-1 + L) D (D^-1 + L^T), where L is the strictly lower stencil part and
//! D a diagonal computed in one forward sweep. Applying M^-1 is a forward
//! substitution followed by a backward substitution in reverse sweep order.
//! Both sweeps carry a dependency on the previous index, so they run
//! sequentially regardless of the execution policy.

use crate::fdm2::{FdmBlas2, FdmMatrix2, FdmVector2};
use crate::fdm3::{FdmBlas3, FdmMatrix3, FdmVector3};
use crate::pcg::{PcgSolver, Preconditioner};

#[inline]
fn inverse_or_zero(denom: f64) -> f64 {
    if denom.abs() > 0.0 {
        1.0 / denom
    } else {
        0.0
    }
}

/// IC(0) preconditioner for 3D stencil matrices.
#[derive(Clone, Debug, Default)]
pub struct IncompleteCholesky3 {
    a: FdmMatrix3,
    d: FdmVector3,
    y: FdmVector3,
}

impl IncompleteCholesky3 {
    /// Diagonal of the factorization.
    pub fn diagonal(&self) -> &FdmVector3 {
        &self.d
    }
}

impl Preconditioner<FdmBlas3> for IncompleteCholesky3 {
    const LABEL: &'static str = "ICCG";

    fn build(&mut self, a: &FdmMatrix3) {
        let size = a.size();
        self.a = a.clone();
        self.d = FdmVector3::new(size);
        self.y = FdmVector3::new(size);

        let d = &mut self.d;
        a.for_each_index(|i, j, k| {
            let mut denom = a[(i, j, k)].center;
            if i > 0 {
                let r = a[(i - 1, j, k)].right;
                denom -= r * r * d[(i - 1, j, k)];
            }
            if j > 0 {
                let u = a[(i, j - 1, k)].up;
                denom -= u * u * d[(i, j - 1, k)];
            }
            if k > 0 {
                let f = a[(i, j, k - 1)].front;
                denom -= f * f * d[(i, j, k - 1)];
            }
            d[(i, j, k)] = inverse_or_zero(denom);
        });
    }

    fn solve(&mut self, b: &FdmVector3, x: &mut FdmVector3) {
        let size = b.size();
        assert!(
            size == self.a.size() && size == x.size(),
            "shape mismatch: preconditioner built for {:?}, got {:?}",
            self.a.size(),
            size
        );
        let (a, d, y) = (&self.a, &self.d, &mut self.y);

        // Forward substitution: (D^-1 + L) y = b
        b.for_each_index(|i, j, k| {
            let mut sum = b[(i, j, k)];
            if i > 0 {
                sum -= a[(i - 1, j, k)].right * y[(i - 1, j, k)];
            }
            if j > 0 {
                sum -= a[(i, j - 1, k)].up * y[(i, j - 1, k)];
            }
            if k > 0 {
                sum -= a[(i, j, k - 1)].front * y[(i, j, k - 1)];
            }
            y[(i, j, k)] = sum * d[(i, j, k)];
        });

        // Backward substitution: (I + D L^T) x = y
        for k in (0..size.z).rev() {
            for j in (0..size.y).rev() {
                for i in (0..size.x).rev() {
                    let row = a[(i, j, k)];
                    let mut upper = 0.0;
                    if i + 1 < size.x {
                        upper += row.right * x[(i + 1, j, k)];
                    }
                    if j + 1 < size.y {
                        upper += row.up * x[(i, j + 1, k)];
                    }
                    if k + 1 < size.z {
                        upper += row.front * x[(i, j, k + 1)];
                    }
                    x[(i, j, k)] = y[(i, j, k)] - d[(i, j, k)] * upper;
                }
            }
        }
    }
}

/// IC(0) preconditioner for 2D stencil matrices.
#[derive(Clone, Debug, Default)]
pub struct IncompleteCholesky2 {
    a: FdmMatrix2,
    d: FdmVector2,
    y: FdmVector2,
}

impl Preconditioner<FdmBlas2> for IncompleteCholesky2 {
    const LABEL: &'static str = "ICCG";

    fn build(&mut self, a: &FdmMatrix2) {
        let size = a.size();
        self.a = a.clone();
        self.d = FdmVector2::new(size);
        self.y = FdmVector2::new(size);

        let d = &mut self.d;
        a.for_each_index(|i, j| {
            let mut denom = a[(i, j)].center;
            if i > 0 {
                let r = a[(i - 1, j)].right;
                denom -= r * r * d[(i - 1, j)];
            }
            if j > 0 {
                let u = a[(i, j - 1)].up;
                denom -= u * u * d[(i, j - 1)];
            }
            d[(i, j)] = inverse_or_zero(denom);
        });
    }

    fn solve(&mut self, b: &FdmVector2, x: &mut FdmVector2) {
        let size = b.size();
        assert!(
            size == self.a.size() && size == x.size(),
            "shape mismatch: preconditioner built for {:?}, got {:?}",
            self.a.size(),
            size
        );
        let (a, d, y) = (&self.a, &self.d, &mut self.y);

        b.for_each_index(|i, j| {
            let mut sum = b[(i, j)];
            if i > 0 {
                sum -= a[(i - 1, j)].right * y[(i - 1, j)];
            }
            if j > 0 {
                sum -= a[(i, j - 1)].up * y[(i, j - 1)];
            }
            y[(i, j)] = sum * d[(i, j)];
        });

        for j in (0..size.y).rev() {
            for i in (0..size.x).rev() {
                let row = a[(i, j)];
                let mut upper = 0.0;
                if i + 1 < size.x {
                    upper += row.right * x[(i + 1, j)];
                }
                if j + 1 < size.y {
                    upper += row.up * x[(i, j + 1)];
                }
                x[(i, j)] = y[(i, j)] - d[(i, j)] * upper;
            }
        }
    }
}

/// 2D ICCG solver.
pub type FdmIccgSolver2 = PcgSolver<FdmBlas2, IncompleteCholesky2>;
/// 3D ICCG solver.
pub type FdmIccgSolver3 = PcgSolver<FdmBlas3, IncompleteCholesky3>;
