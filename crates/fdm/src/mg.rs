//! Geometric multigrid V-cycle, generic over any [`MgBlas`].
//!
//! The level hierarchy is a flat arena: `levels[0]` is the finest grid and
//! each following entry is roughly half the resolution of the previous one.
//! Level transitions are plain index arithmetic.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::blas::{Blas, Real};
use crate::relax::{RelaxBlas, RelaxMethod};

/// How a fine-level residual is transferred to the next coarser level.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum RestrictMethod {
    /// Separable [1/8, 3/8, 3/8, 1/8] averaging kernel.
    #[default]
    FullWeighting,
    /// Take the fine sample at the coarse sample's lower corner.
    Injection,
}

/// How a coarse-level correction is added back to the finer level.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum CorrectMethod {
    /// Separable 3/4, 1/4 (bi/trilinear) interpolation.
    #[default]
    Linear,
    /// Piecewise-constant interpolation.
    Injection,
}

/// A [`Blas`] that can build and traverse a multigrid hierarchy.
pub trait MgBlas: RelaxBlas {
    type Size: Copy + PartialEq + Debug;

    fn vector_size(v: &Self::Vector) -> Self::Size;

    fn new_vector(size: Self::Size) -> Self::Vector;

    fn new_matrix(size: Self::Size) -> Self::Matrix;

    /// Resolution of the next coarser level, or `None` once halving would
    /// leave nothing worth solving.
    fn coarsen(size: Self::Size) -> Option<Self::Size>;

    /// Overwrite `coarser` with the restriction of `finer`.
    fn restrict(method: RestrictMethod, finer: &Self::Vector, coarser: &mut Self::Vector);

    /// Add the interpolation of `coarser` to `finer`.
    fn correct(method: CorrectMethod, coarser: &Self::Vector, finer: &mut Self::Vector);
}

/// Multigrid input parameter set.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct MgParameters<S> {
    /// Max number of multigrid levels.
    pub max_number_of_levels: usize,
    /// Relaxation sweeps before restricting.
    pub number_of_restriction_iter: usize,
    /// Relaxation sweeps after correcting an intermediate level.
    pub number_of_correction_iter: usize,
    /// Relaxation sweeps on the coarsest level.
    pub number_of_coarsest_iter: usize,
    /// Relaxation sweeps after correcting the finest level.
    pub number_of_final_iter: usize,
    pub relax_method: RelaxMethod,
    pub restrict_method: RestrictMethod,
    pub correct_method: CorrectMethod,
    /// Residual tolerance at the finest level; halved at each coarser level.
    pub max_tolerance: S,
    pub sor_factor: S,
}

impl<S: Real> Default for MgParameters<S> {
    fn default() -> Self {
        Self {
            max_number_of_levels: 1,
            number_of_restriction_iter: 5,
            number_of_correction_iter: 5,
            number_of_coarsest_iter: 20,
            number_of_final_iter: 20,
            relax_method: RelaxMethod::GaussSeidel,
            restrict_method: RestrictMethod::FullWeighting,
            correct_method: CorrectMethod::Linear,
            max_tolerance: S::from_f64(1e-9),
            sor_factor: S::from_f64(1.5),
        }
    }
}

/// Multigrid matrix hierarchy.
pub struct MgMatrix<B: Blas> {
    pub levels: Vec<B::Matrix>,
}

/// Multigrid vector hierarchy.
pub struct MgVector<B: Blas> {
    pub levels: Vec<B::Vector>,
}

// Manual impls: a derive would put the bounds on `B` instead of its vectors.
impl<B: Blas> Clone for MgMatrix<B> {
    fn clone(&self) -> Self {
        Self {
            levels: self.levels.clone(),
        }
    }
}

impl<B: Blas> Clone for MgVector<B> {
    fn clone(&self) -> Self {
        Self {
            levels: self.levels.clone(),
        }
    }
}

impl<B: Blas> Debug for MgMatrix<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MgMatrix").field("levels", &self.levels.len()).finish()
    }
}

impl<B: Blas> Debug for MgVector<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MgVector").field("levels", &self.levels.len()).finish()
    }
}

impl<B: Blas> Default for MgMatrix<B> {
    fn default() -> Self {
        Self { levels: Vec::new() }
    }
}

impl<B: Blas> Default for MgVector<B> {
    fn default() -> Self {
        Self { levels: Vec::new() }
    }
}

impl<B: Blas> MgMatrix<B> {
    pub fn finest(&self) -> &B::Matrix {
        &self.levels[0]
    }
}

impl<B: Blas> MgVector<B> {
    pub fn finest(&self) -> &B::Vector {
        &self.levels[0]
    }

    pub fn finest_mut(&mut self) -> &mut B::Vector {
        &mut self.levels[0]
    }

    /// Zeroed hierarchy with the same level shapes.
    pub fn zeros_like(&self) -> Self {
        Self {
            levels: self.levels.iter().map(B::vector_like).collect(),
        }
    }
}

/// Resolutions of every level, finest first.
pub fn level_sizes<B: MgBlas>(finest: B::Size, max_number_of_levels: usize) -> Vec<B::Size> {
    let mut sizes = vec![finest];
    while sizes.len() < max_number_of_levels.max(1) {
        match B::coarsen(sizes[sizes.len() - 1]) {
            Some(size) => sizes.push(size),
            None => break,
        }
    }
    sizes
}

/// Multigrid linear system: one A, x, b per level.
pub struct MgLinearSystem<B: Blas> {
    pub a: MgMatrix<B>,
    pub x: MgVector<B>,
    pub b: MgVector<B>,
}

impl<B: Blas> Default for MgLinearSystem<B> {
    fn default() -> Self {
        Self {
            a: MgMatrix::default(),
            x: MgVector::default(),
            b: MgVector::default(),
        }
    }
}

impl<B: Blas> Clone for MgLinearSystem<B> {
    fn clone(&self) -> Self {
        Self {
            a: self.a.clone(),
            x: self.x.clone(),
            b: self.b.clone(),
        }
    }
}

impl<B: MgBlas> MgLinearSystem<B> {
    pub fn number_of_levels(&self) -> usize {
        self.a.levels.len()
    }

    pub fn clear(&mut self) {
        self.a.levels.clear();
        self.x.levels.clear();
        self.b.levels.clear();
    }

    /// Reallocate every level for a new finest resolution.
    ///
    /// Levels are zeroed. The hierarchy stops at `max_number_of_levels` or when
    /// the resolution cannot be halved any further.
    pub fn resize_with_finest(&mut self, finest: B::Size, max_number_of_levels: usize) {
        let sizes = level_sizes::<B>(finest, max_number_of_levels);
        self.a.levels = sizes.iter().map(|&s| B::new_matrix(s)).collect();
        self.x.levels = sizes.iter().map(|&s| B::new_vector(s)).collect();
        self.b.levels = sizes.iter().map(|&s| B::new_vector(s)).collect();
    }
}

/// Multigrid result.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct MgResult<S> {
    /// L2 norm of the residual at the level the cycle was entered from.
    pub last_residual_norm: S,
}

/// Run one V-cycle on the whole hierarchy.
///
/// `b` is overwritten below the finest level with restricted residuals and
/// `buffer` is scratch with the same level shapes as `x`.
pub fn mg_v_cycle<B: MgBlas>(
    a: &MgMatrix<B>,
    params: &MgParameters<B::Scalar>,
    x: &mut MgVector<B>,
    b: &mut MgVector<B>,
    buffer: &mut MgVector<B>,
) -> MgResult<B::Scalar> {
    let levels = a.levels.len();
    assert!(levels > 0, "multigrid hierarchy is empty");
    assert!(
        x.levels.len() == levels && b.levels.len() == levels && buffer.levels.len() == levels,
        "multigrid hierarchy depth mismatch: A {}, x {}, b {}, buffer {}",
        levels,
        x.levels.len(),
        b.levels.len(),
        buffer.levels.len()
    );

    v_cycle_at(a, params, 0, params.max_tolerance, x, b, buffer)
}

fn relax_level<B: MgBlas>(
    a: &MgMatrix<B>,
    params: &MgParameters<B::Scalar>,
    level: usize,
    iterations: usize,
    x: &mut MgVector<B>,
    b: &MgVector<B>,
    buffer: &mut MgVector<B>,
) {
    for _ in 0..iterations {
        B::relax(
            params.relax_method,
            &a.levels[level],
            &b.levels[level],
            params.sor_factor,
            &mut x.levels[level],
            &mut buffer.levels[level],
        );
    }
}

fn residual_norm<B: MgBlas>(
    a: &MgMatrix<B>,
    level: usize,
    x: &MgVector<B>,
    b: &MgVector<B>,
    buffer: &mut MgVector<B>,
) -> B::Scalar {
    B::residual(
        &a.levels[level],
        &x.levels[level],
        &b.levels[level],
        &mut buffer.levels[level],
    );
    B::l2_norm(&buffer.levels[level])
}

fn v_cycle_at<B: MgBlas>(
    a: &MgMatrix<B>,
    params: &MgParameters<B::Scalar>,
    level: usize,
    tolerance: B::Scalar,
    x: &mut MgVector<B>,
    b: &mut MgVector<B>,
    buffer: &mut MgVector<B>,
) -> MgResult<B::Scalar> {
    // 1. Pre-smooth
    relax_level(a, params, level, params.number_of_restriction_iter, x, b, buffer);

    if level + 1 < a.levels.len() {
        // 2. Restrict the residual to the next level's RHS
        B::residual(
            &a.levels[level],
            &x.levels[level],
            &b.levels[level],
            &mut buffer.levels[level],
        );
        B::restrict(
            params.restrict_method,
            &buffer.levels[level],
            &mut b.levels[level + 1],
        );
        B::set_scalar(B::Scalar::ZERO, &mut x.levels[level + 1]);

        // 3. Solve the error equation one level down
        let half = B::Scalar::from_f64(0.5);
        v_cycle_at(a, params, level + 1, tolerance * half, x, b, buffer);

        // 4. Correct and post-smooth
        {
            let (finer, coarser) = x.levels.split_at_mut(level + 1);
            B::correct(params.correct_method, &coarser[0], &mut finer[level]);
        }
        let iterations = if level == 0 {
            params.number_of_final_iter
        } else {
            params.number_of_correction_iter
        };
        relax_level(a, params, level, iterations, x, b, buffer);
    } else {
        // Coarsest level: relax until within tolerance or out of sweeps
        for _ in 0..params.number_of_coarsest_iter {
            relax_level(a, params, level, 1, x, b, buffer);
            if residual_norm(a, level, x, b, buffer) <= tolerance {
                break;
            }
        }
    }

    MgResult {
        last_residual_norm: residual_norm(a, level, x, b, buffer),
    }
}
