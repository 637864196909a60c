use std::ops::Range;

use ndarray::{ArrayD, Axis, IxDyn};
use rand::Rng;

use crate::error::{Error, Result};

/// Resolve a possibly negative axis against a tensor rank.
pub fn resolve_axis(axis: isize, ndim: usize) -> Result<usize> {
    let resolved = if axis < 0 {
        ndim as isize + axis
    } else {
        axis
    };
    if resolved < 0 || resolved >= ndim as isize {
        return Err(Error::InvalidParameter(format!(
            "channel_axis {axis} is out of bounds for a tensor of rank {ndim}"
        )));
    }
    Ok(resolved as usize)
}

pub fn random_tensor(shape: &[usize], range: Range<f32>) -> ArrayD<f32> {
    let mut rng = rand::rng();
    ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.random_range(range.clone()))
}

/// Smallest and largest element, `None` for an empty tensor.
pub fn min_and_max(tensor: &ArrayD<f32>) -> Option<(f32, f32)> {
    if tensor.is_empty() {
        return None;
    }
    Some(tensor.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
        (lo.min(x), hi.max(x))
    }))
}

/// Per-channel minimum and maximum along `axis`.
pub fn per_channel_min_max(tensor: &ArrayD<f32>, axis: isize) -> Result<(Vec<f64>, Vec<f64>)> {
    let axis = resolve_axis(axis, tensor.ndim())?;
    let channels = tensor.len_of(Axis(axis));
    let mut mins = Vec::with_capacity(channels);
    let mut maxs = Vec::with_capacity(channels);

    for channel in tensor.axis_iter(Axis(axis)) {
        let (lo, hi) = channel
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &x| {
                (lo.min(x), hi.max(x))
            });
        if lo > hi {
            return Err(Error::InvalidParameter(
                "cannot compute a range over an empty channel".to_string(),
            ));
        }
        mins.push(lo as f64);
        maxs.push(hi as f64);
    }

    Ok((mins, maxs))
}

/// Per-channel maximum absolute value along `axis`.
pub fn per_channel_max_abs(tensor: &ArrayD<f32>, axis: isize) -> Result<Vec<f64>> {
    let (mins, maxs) = per_channel_min_max(tensor, axis)?;
    Ok(mins
        .iter()
        .zip(&maxs)
        .map(|(lo, hi)| lo.abs().max(hi.abs()))
        .collect())
}

pub fn mean_squared_error(a: &ArrayD<f32>, b: &ArrayD<f32>) -> Result<f32> {
    if a.shape() != b.shape() {
        return Err(Error::InvalidParameter(format!(
            "shape mismatch: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    if a.is_empty() {
        return Ok(0.0);
    }
    let n = a.len() as f32;
    Ok(a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y).powi(2))
        .sum::<f32>()
        / n)
}
