//! Vector arithmetic primitives over [`DistributedVector`]s
//!
//! Maps touch only the owned segment. Reductions sum the owned segment on the
//! device lanes (in `f64`), then combine the per-device partials so that every
//! worker sees the same scalar.

use crate::device::ExecutionContext;
use crate::error::Result;
use crate::vector::DistributedVector;
use rayon::prelude::*;

/// Set every owned entry to `value`
pub fn fill(ctx: &ExecutionContext<'_>, v: &mut DistributedVector<f32>, value: f32) {
    let local = v.local_mut();
    ctx.install(|| local.par_iter_mut().for_each(|x| *x = value));
}

/// Multiply every owned entry by `factor`
pub fn scale(ctx: &ExecutionContext<'_>, v: &mut DistributedVector<f32>, factor: f32) {
    let local = v.local_mut();
    ctx.install(|| local.par_iter_mut().for_each(|x| *x *= factor));
}

/// Add `scalar` to every owned entry
pub fn add_scalar(ctx: &ExecutionContext<'_>, v: &mut DistributedVector<f32>, scalar: f32) {
    let local = v.local_mut();
    ctx.install(|| local.par_iter_mut().for_each(|x| *x += scalar));
}

/// Global dot product (collective)
///
/// # Errors
///
/// Returns [`crate::SnmgError::CollectiveFailure`] if a peer left the group
pub fn dot(
    ctx: &ExecutionContext<'_>,
    a: &DistributedVector<f32>,
    b: &DistributedVector<f32>,
) -> Result<f64> {
    let (a, b) = (a.local(), b.local());
    let partial = ctx.install(|| {
        a.par_iter()
            .zip(b.par_iter())
            .map(|(&x, &y)| f64::from(x) * f64::from(y))
            .sum::<f64>()
    });
    ctx.reduce_scalar(partial)
}

/// Global L1 norm (collective)
///
/// # Errors
///
/// See [`dot`]
pub fn norm1(ctx: &ExecutionContext<'_>, v: &DistributedVector<f32>) -> Result<f64> {
    let local = v.local();
    let partial = ctx.install(|| local.par_iter().map(|&x| f64::from(x).abs()).sum::<f64>());
    ctx.reduce_scalar(partial)
}

/// Global L2 norm (collective)
///
/// # Errors
///
/// See [`dot`]
pub fn norm2(ctx: &ExecutionContext<'_>, v: &DistributedVector<f32>) -> Result<f64> {
    let local = v.local();
    let partial = ctx.install(|| {
        local
            .par_iter()
            .map(|&x| f64::from(x) * f64::from(x))
            .sum::<f64>()
    });
    Ok(ctx.reduce_scalar(partial)?.sqrt())
}
