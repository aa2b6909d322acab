//! Finite-difference linear systems and the iterative solvers that drive them.
//!
//! The solvers (PCG, relaxation, multigrid, MGPCG) are written once against
//! the [`blas::Blas`] operator set and instantiated for 2D and 3D stencil
//! systems through [`FdmBlas2`] and [`FdmBlas3`].
//!
//! ```
//! use fdm::{FdmBlas3, FdmIccgSolver3, FdmLinearSystem3, LinearSystemSolver, Size3};
//! use fdm::blas::Blas;
//!
//! let size = Size3::new(4, 4, 4);
//! let mut system = FdmLinearSystem3::new(size);
//! system.a.par_for_each_index_mut(|i, j, k, row| {
//!     row.center = 6.0;
//!     row.right = if i + 1 < size.x { -1.0 } else { 0.0 };
//!     row.up = if j + 1 < size.y { -1.0 } else { 0.0 };
//!     row.front = if k + 1 < size.z { -1.0 } else { 0.0 };
//! });
//! system.b.fill(1.0);
//!
//! let mut solver = FdmIccgSolver3::with_params(100, 1e-9);
//! let result = solver.solve(&mut system);
//! assert!(result.converged);
//!
//! let mut r = FdmBlas3::vector_like(&system.b);
//! FdmBlas3::residual(&system.a, &system.x, &system.b, &mut r);
//! assert!(FdmBlas3::l2_norm(&r) < 1e-8);
//! ```

pub mod array;
pub mod blas;
pub mod fdm2;
pub mod fdm3;
pub mod iccg;
pub mod mg;
pub mod mg_solver;
pub mod mg_utils;
pub mod parallel;
pub mod pcg;
pub mod relax;

pub use array::{Array2, Array3, Size2, Size3};
pub use blas::{Blas, LinearSystem, LinearSystemSolver, Real, SolverResult};
pub use fdm2::{FdmBlas2, FdmLinearSystem2, FdmMatrix2, FdmMatrixRow2, FdmVector2};
pub use fdm3::{FdmBlas3, FdmLinearSystem3, FdmMatrix3, FdmMatrixRow3, FdmVector3};
pub use iccg::{FdmIccgSolver2, FdmIccgSolver3, IncompleteCholesky2, IncompleteCholesky3};
pub use mg::{
    mg_v_cycle, CorrectMethod, MgBlas, MgLinearSystem, MgMatrix, MgParameters, MgResult,
    MgVector, RestrictMethod,
};
pub use mg_solver::{
    FdmMgSolver2, FdmMgSolver3, FdmMgpcgSolver2, FdmMgpcgSolver3, MgLinearSystemSolver,
    MgPreconditioner, MgSolver, MgpcgSolver,
};
pub use parallel::ExecutionPolicy;
pub use pcg::{pcg, FdmCgSolver2, FdmCgSolver3, NullPreconditioner, PcgSolver, Preconditioner};
pub use relax::{
    FdmGaussSeidelSolver2, FdmGaussSeidelSolver3, FdmJacobiSolver2, FdmJacobiSolver3, RelaxBlas,
    RelaxMethod, RelaxSolver,
};

/// 2D multigrid system of stencil matrices.
pub type FdmMgLinearSystem2 = MgLinearSystem<FdmBlas2>;
/// 3D multigrid system of stencil matrices.
pub type FdmMgLinearSystem3 = MgLinearSystem<FdmBlas3>;
