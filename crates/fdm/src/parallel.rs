//! Process-wide execution backend for data-parallel loops.
//!
//! Every array-shaped operation in this crate goes through the primitives in
//! this module. The backend is selected once (usually at startup) with
//! [`set_execution_policy`]; callers never branch on it themselves.
//!
//! ```
//! use fdm::parallel::{self, ExecutionPolicy};
//!
//! parallel::set_execution_policy(ExecutionPolicy::Serial);
//! let mut data = vec![0.0f64; 8];
//! parallel::for_each_mut(&mut data, |i, x| *x = i as f64);
//! assert_eq!(parallel::sum(data.len(), |i| data[i]), 28.0);
//! parallel::set_execution_policy(ExecutionPolicy::Parallel);
//! ```

use std::iter::Sum;
use std::sync::atomic::{AtomicU8, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// How index-range computations are dispatched.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum ExecutionPolicy {
    /// Plain sequential loops on the calling thread.
    Serial,
    /// Work-stealing dispatch onto the rayon thread pool.
    #[default]
    Parallel,
}

static POLICY: AtomicU8 = AtomicU8::new(1);

/// Select the backend used by every subsequent parallel primitive.
pub fn set_execution_policy(policy: ExecutionPolicy) {
    let raw = match policy {
        ExecutionPolicy::Serial => 0,
        ExecutionPolicy::Parallel => 1,
    };
    POLICY.store(raw, Ordering::Relaxed);
}

/// Currently selected backend.
pub fn execution_policy() -> ExecutionPolicy {
    match POLICY.load(Ordering::Relaxed) {
        0 => ExecutionPolicy::Serial,
        _ => ExecutionPolicy::Parallel,
    }
}

/// Run `f(index, &mut item)` for every element of `data`.
///
/// The closure must only write through the item it is handed; reading shared
/// state is fine.
pub fn for_each_mut<T, F>(data: &mut [T], f: F)
where
    T: Send,
    F: Fn(usize, &mut T) + Sync + Send,
{
    match execution_policy() {
        ExecutionPolicy::Serial => data.iter_mut().enumerate().for_each(|(i, x)| f(i, x)),
        ExecutionPolicy::Parallel => data
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, x)| f(i, x)),
    }
}

/// Sum `f(index)` over `0..len`.
///
/// Parallel reductions are not bit-reproducible across runs.
pub fn sum<S, F>(len: usize, f: F) -> S
where
    S: Send + Sum<S>,
    F: Fn(usize) -> S + Sync + Send,
{
    match execution_policy() {
        ExecutionPolicy::Serial => (0..len).map(f).sum(),
        ExecutionPolicy::Parallel => (0..len).into_par_iter().map(f).sum(),
    }
}

/// Maximum of `f(index)` over `0..len`, or `identity` for an empty range.
pub fn max<S, F>(len: usize, identity: S, f: F) -> S
where
    S: Copy + PartialOrd + Send + Sync,
    F: Fn(usize) -> S + Sync + Send,
{
    let pick = |a: S, b: S| if b > a { b } else { a };
    match execution_policy() {
        ExecutionPolicy::Serial => (0..len).map(f).fold(identity, pick),
        ExecutionPolicy::Parallel => (0..len)
            .into_par_iter()
            .map(f)
            .reduce(|| identity, pick),
    }
}
