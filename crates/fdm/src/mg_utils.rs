//! Restriction and correction between FDM grid levels.
//!
//! Both operators are separable: each axis gets a table of (index, weight)
//! taps and the 2D/3D kernels are tensor products of those tables. Tap indices
//! are clamped into range, so an axis of size 1 passes through unchanged.

use crate::array::{Size2, Size3};
use crate::fdm2::{FdmBlas2, FdmMatrix2, FdmVector2};
use crate::fdm3::{FdmBlas3, FdmMatrix3, FdmVector3};
use crate::mg::{CorrectMethod, MgBlas, RestrictMethod};
use crate::parallel;

type Taps = Vec<Vec<(usize, f64)>>;

/// Coarse resolution along one axis.
#[inline]
fn coarsen_axis(n: usize) -> usize {
    ((n + 1) / 2).max(1)
}

fn restrict_taps(method: RestrictMethod, n_fine: usize, n_coarse: usize) -> Taps {
    let last = n_fine.saturating_sub(1);
    (0..n_coarse)
        .map(|c| match method {
            RestrictMethod::FullWeighting => {
                let base = 2 * c;
                vec![
                    (base.saturating_sub(1).min(last), 0.125),
                    (base.min(last), 0.375),
                    ((base + 1).min(last), 0.375),
                    ((base + 2).min(last), 0.125),
                ]
            }
            RestrictMethod::Injection => vec![((2 * c).min(last), 1.0)],
        })
        .collect()
}

fn correct_taps(method: CorrectMethod, n_fine: usize, n_coarse: usize) -> Taps {
    let last = n_coarse.saturating_sub(1);
    (0..n_fine)
        .map(|f| {
            let c = (f / 2).min(last);
            match method {
                CorrectMethod::Linear if f % 2 == 0 => {
                    vec![(c.saturating_sub(1), 0.25), (c, 0.75)]
                }
                CorrectMethod::Linear => vec![(c, 0.75), ((c + 1).min(last), 0.25)],
                CorrectMethod::Injection => vec![(c, 1.0)],
            }
        })
        .collect()
}

// ========== 3D ==========

fn apply_taps3(src: &FdmVector3, tx: &Taps, ty: &Taps, tz: &Taps, (i, j, k): (usize, usize, usize)) -> f64 {
    let mut sum = 0.0;
    for &(kk, wz) in &tz[k] {
        for &(jj, wy) in &ty[j] {
            for &(ii, wx) in &tx[i] {
                sum += wx * wy * wz * src[(ii, jj, kk)];
            }
        }
    }
    sum
}

/// coarser = R(finer)
pub fn restrict3(method: RestrictMethod, finer: &FdmVector3, coarser: &mut FdmVector3) {
    let (nf, nc) = (finer.size(), coarser.size());
    assert!(
        nc.x == coarsen_axis(nf.x) && nc.y == coarsen_axis(nf.y) && nc.z == coarsen_axis(nf.z),
        "restrict: {:?} does not coarsen to {:?}",
        nf,
        nc
    );

    let tx = restrict_taps(method, nf.x, nc.x);
    let ty = restrict_taps(method, nf.y, nc.y);
    let tz = restrict_taps(method, nf.z, nc.z);

    parallel::for_each_mut(coarser.as_mut_slice(), |idx, out| {
        *out = apply_taps3(finer, &tx, &ty, &tz, nc.coords(idx));
    });
}

/// finer += P(coarser)
pub fn correct3(method: CorrectMethod, coarser: &FdmVector3, finer: &mut FdmVector3) {
    let (nf, nc) = (finer.size(), coarser.size());
    assert!(
        nc.x == coarsen_axis(nf.x) && nc.y == coarsen_axis(nf.y) && nc.z == coarsen_axis(nf.z),
        "correct: {:?} does not coarsen to {:?}",
        nf,
        nc
    );

    let tx = correct_taps(method, nf.x, nc.x);
    let ty = correct_taps(method, nf.y, nc.y);
    let tz = correct_taps(method, nf.z, nc.z);

    parallel::for_each_mut(finer.as_mut_slice(), |idx, out| {
        *out += apply_taps3(coarser, &tx, &ty, &tz, nf.coords(idx));
    });
}

impl MgBlas for FdmBlas3 {
    type Size = Size3;

    fn vector_size(v: &FdmVector3) -> Size3 {
        v.size()
    }

    fn new_vector(size: Size3) -> FdmVector3 {
        FdmVector3::new(size)
    }

    fn new_matrix(size: Size3) -> FdmMatrix3 {
        FdmMatrix3::new(size)
    }

    fn coarsen(size: Size3) -> Option<Size3> {
        if size.x.max(size.y).max(size.z) <= 2 {
            return None;
        }
        Some(Size3::new(
            coarsen_axis(size.x),
            coarsen_axis(size.y),
            coarsen_axis(size.z),
        ))
    }

    fn restrict(method: RestrictMethod, finer: &FdmVector3, coarser: &mut FdmVector3) {
        restrict3(method, finer, coarser);
    }

    fn correct(method: CorrectMethod, coarser: &FdmVector3, finer: &mut FdmVector3) {
        correct3(method, coarser, finer);
    }
}

// ========== 2D ==========

fn apply_taps2(src: &FdmVector2, tx: &Taps, ty: &Taps, (i, j): (usize, usize)) -> f64 {
    let mut sum = 0.0;
    for &(jj, wy) in &ty[j] {
        for &(ii, wx) in &tx[i] {
            sum += wx * wy * src[(ii, jj)];
        }
    }
    sum
}

pub fn restrict2(method: RestrictMethod, finer: &FdmVector2, coarser: &mut FdmVector2) {
    let (nf, nc) = (finer.size(), coarser.size());
    assert!(
        nc.x == coarsen_axis(nf.x) && nc.y == coarsen_axis(nf.y),
        "restrict: {:?} does not coarsen to {:?}",
        nf,
        nc
    );

    let tx = restrict_taps(method, nf.x, nc.x);
    let ty = restrict_taps(method, nf.y, nc.y);

    parallel::for_each_mut(coarser.as_mut_slice(), |idx, out| {
        *out = apply_taps2(finer, &tx, &ty, nc.coords(idx));
    });
}

pub fn correct2(method: CorrectMethod, coarser: &FdmVector2, finer: &mut FdmVector2) {
    let (nf, nc) = (finer.size(), coarser.size());
    assert!(
        nc.x == coarsen_axis(nf.x) && nc.y == coarsen_axis(nf.y),
        "correct: {:?} does not coarsen to {:?}",
        nf,
        nc
    );

    let tx = correct_taps(method, nf.x, nc.x);
    let ty = correct_taps(method, nf.y, nc.y);

    parallel::for_each_mut(finer.as_mut_slice(), |idx, out| {
        *out += apply_taps2(coarser, &tx, &ty, nf.coords(idx));
    });
}

impl MgBlas for FdmBlas2 {
    type Size = Size2;

    fn vector_size(v: &FdmVector2) -> Size2 {
        v.size()
    }

    fn new_vector(size: Size2) -> FdmVector2 {
        FdmVector2::new(size)
    }

    fn new_matrix(size: Size2) -> FdmMatrix2 {
        FdmMatrix2::new(size)
    }

    fn coarsen(size: Size2) -> Option<Size2> {
        if size.x.max(size.y) <= 2 {
            return None;
        }
        Some(Size2::new(coarsen_axis(size.x), coarsen_axis(size.y)))
    }

    fn restrict(method: RestrictMethod, finer: &FdmVector2, coarser: &mut FdmVector2) {
        restrict2(method, finer, coarser);
    }

    fn correct(method: CorrectMethod, coarser: &FdmVector2, finer: &mut FdmVector2) {
        correct2(method, coarser, finer);
    }
}
