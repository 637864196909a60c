use ndarray::{ArrayD, Axis};

use super::QuantizedDomain;
use crate::error::{Error, Result};

/// Quantize a single value onto the integer grid and map it back.
///
/// Rounds half to even, as integer inference runtimes do.
#[inline]
pub fn fake_quantize_value(x: f32, scale: f32, zero_point: i32, domain: QuantizedDomain) -> f32 {
    let q = ((x / scale).round_ties_even() + zero_point as f32)
        .clamp(domain.min as f32, domain.max as f32);
    (q - zero_point as f32) * scale
}

pub fn fake_quantize_per_tensor_affine(
    input: &ArrayD<f32>,
    scale: f32,
    zero_point: i32,
    domain: QuantizedDomain,
) -> ArrayD<f32> {
    input.mapv(|x| fake_quantize_value(x, scale, zero_point, domain))
}

/// Channel `c` along `axis` uses `scales[c]` and `zero_points[c]` only.
pub fn fake_quantize_per_channel_affine(
    input: &ArrayD<f32>,
    scales: &[f32],
    zero_points: &[i32],
    axis: usize,
    domain: QuantizedDomain,
) -> Result<ArrayD<f32>> {
    if axis >= input.ndim() {
        return Err(Error::InvalidParameter(format!(
            "axis {axis} is out of bounds for a tensor of rank {}",
            input.ndim()
        )));
    }
    let channels = input.len_of(Axis(axis));
    if scales.len() != channels || zero_points.len() != channels {
        return Err(Error::InvalidParameter(format!(
            "expected {channels} scales and zero points, got {} and {}",
            scales.len(),
            zero_points.len()
        )));
    }

    let mut output = input.clone();
    for ((mut channel, &scale), &zero_point) in output
        .axis_iter_mut(Axis(axis))
        .zip(scales)
        .zip(zero_points)
    {
        channel.mapv_inplace(|x| fake_quantize_value(x, scale, zero_point, domain));
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array3};

    use super::*;

    const UINT8: QuantizedDomain = QuantizedDomain { min: 0, max: 255 };
    const INT8: QuantizedDomain = QuantizedDomain { min: -128, max: 127 };

    #[test]
    fn clips_to_domain() {
        let scale = 2.0f32 / 127.0;
        assert_abs_diff_eq!(fake_quantize_value(2.5, scale, 0, INT8), 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            fake_quantize_value(-5.0, scale, 0, INT8),
            -128.0 * scale,
            epsilon = 1e-6
        );
    }

    #[test]
    fn zero_is_exact() {
        let scale = 4.0f32 / 255.0;
        for zero_point in [0, 17, 64, 255] {
            assert_eq!(fake_quantize_value(0.0, scale, zero_point, UINT8), 0.0);
        }
    }

    #[test]
    fn output_lies_on_grid() {
        let scale = 0.25f32;
        let input = array![0.1f32, 0.13, -0.37, 0.9].into_dyn();
        let output = fake_quantize_per_tensor_affine(&input, scale, 8, UINT8);
        assert_eq!(output, array![0.0f32, 0.25, -0.25, 1.0].into_dyn());
    }

    #[test]
    fn each_channel_uses_its_own_parameters() {
        let input = Array3::<f32>::from_elem((3, 2, 2), 1.0).into_dyn();
        let scales = [1.0f32, 0.3, 2.0];
        let output = fake_quantize_per_channel_affine(&input, &scales, &[0, 0, 0], 0, INT8).unwrap();

        for (c, channel) in output.axis_iter(Axis(0)).enumerate() {
            let expected = fake_quantize_value(1.0, scales[c], 0, INT8);
            assert!(channel.iter().all(|&x| x == expected));
        }
        assert_abs_diff_eq!(output[[1, 0, 0]], 0.9, epsilon = 1e-6);
        // 0.5 rounds to the even code 0
        assert_eq!(output[[2, 1, 1]], 0.0);
    }

    #[test]
    fn per_channel_along_last_axis() {
        let input = array![[1.0f32, 1.0], [1.0, 1.0]].into_dyn();
        let output = fake_quantize_per_channel_affine(&input, &[1.0, 0.3], &[0, 0], 1, INT8).unwrap();
        assert_eq!(output[[0, 0]], 1.0);
        assert_abs_diff_eq!(output[[0, 1]], 0.9, epsilon = 1e-6);
        assert_abs_diff_eq!(output[[1, 1]], 0.9, epsilon = 1e-6);
    }

    #[test]
    fn rejects_mismatched_channel_count() {
        let input = Array3::<f32>::zeros((3, 2, 2)).into_dyn();
        assert!(fake_quantize_per_channel_affine(&input, &[1.0, 1.0], &[0, 0], 0, INT8).is_err());
        assert!(fake_quantize_per_channel_affine(&input, &[1.0; 3], &[0; 3], 3, INT8).is_err());
    }
}
