use crate::error::{Error, Result};

/// Move one end of `[min, max]` onto zero if the range does not already
/// contain it. Expects `min <= max`.
#[inline]
pub fn fix_range_pair(min: f64, max: f64) -> (f64, f64) {
    if min > 0.0 {
        (0.0, max)
    } else if max < 0.0 {
        (min, 0.0)
    } else {
        (min, max)
    }
}

/// Elementwise range fixing so that `min' <= 0 <= max'`.
///
/// Ranges already containing zero come back unchanged; an all-positive range
/// gets `min' = 0` and an all-negative one gets `max' = 0`. With zero inside
/// the range it maps to an exact integer code.
pub fn fix_range_to_include_zero(
    min_range: &[f64],
    max_range: &[f64],
) -> Result<(Vec<f64>, Vec<f64>)> {
    if min_range.len() != max_range.len() {
        return Err(Error::InvalidParameter(format!(
            "min_range and max_range differ in length: {} vs {}",
            min_range.len(),
            max_range.len()
        )));
    }
    if let Some((min, max)) = min_range
        .iter()
        .zip(max_range)
        .find(|(min, max)| min > max)
    {
        return Err(Error::InvalidParameter(format!(
            "min_range {min} exceeds max_range {max}"
        )));
    }

    Ok(min_range
        .iter()
        .zip(max_range)
        .map(|(&min, &max)| fix_range_pair(min, max))
        .unzip())
}
