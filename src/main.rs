// Plot MSE of fake-quantized weights against bit width
use fake_quant::quantization::symmetric::{WeightsPotQuantizer, WeightsSymmetricQuantizer};
use fake_quant::quantization::uniform::WeightsUniformQuantizer;
use fake_quant::tensors::{mean_squared_error, per_channel_max_abs, per_channel_min_max, random_tensor};
use fake_quant::InferableQuantizer;

use plotters::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CHANNEL_AXIS: isize = 0;
const ITERATIONS_PER_WIDTH: usize = 20;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let series = [
        ("Uniform", RED),
        ("Symmetric", BLUE),
        ("Power of two", GREEN),
    ];
    let mut curves = Vec::with_capacity(series.len());
    for (name, _) in &series {
        let mse = mse_as_bits_increase(name, 2..=8)?;
        info!(quantizer = name, ?mse, "measured");
        curves.push(mse);
    }

    let root = BitMapBackend::new("mse-bits.png", (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let y_max = curves
        .iter()
        .flatten()
        .map(|(_, y)| *y)
        .fold(0.0, f32::max)
        * 1.1; // Add 10% padding

    let mut chart = ChartBuilder::on(&root)
        .caption("MSE vs. Bit Width", ("sans-serif", 40).into_font())
        .margin(30)
        .x_label_area_size(50)
        .y_label_area_size(75)
        .build_cartesian_2d(2f32..8f32, (1e-7f32..y_max.max(1e-6)).log_scale())?;

    chart
        .configure_mesh()
        .x_desc("Bits")
        .y_desc("Mean Squared Error (MSE)")
        .light_line_style(&WHITE.mix(0.8))
        .draw()?;

    for ((name, color), mse) in series.iter().zip(&curves) {
        let color = *color;
        chart
            .draw_series(LineSeries::new(mse.iter().cloned(), &color))?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x - 5, y), (x + 5, y)], &color));

        chart.draw_series(
            mse.iter()
                .map(|(x, y)| Circle::new((*x, *y), 3, color.filled())),
        )?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    info!("wrote mse-bits.png");

    Ok(())
}

/// Smallest power of two greater than or equal to `value`; 1 for empty channels.
fn power_of_two_ceil(value: f64) -> f64 {
    if !(value.is_finite() && value > 0.0) {
        return 1.0;
    }
    2f64.powf(value.log2().ceil())
}

/// Calibrate a per-channel quantizer from `weights` for the named scheme.
fn calibrate(
    name: &str,
    weights: &ndarray::ArrayD<f32>,
    num_bits: u32,
) -> fake_quant::Result<Box<dyn InferableQuantizer>> {
    let quantizer: Box<dyn InferableQuantizer> = match name {
        "Uniform" => {
            let (mins, maxs) = per_channel_min_max(weights, CHANNEL_AXIS)?;
            Box::new(WeightsUniformQuantizer::new(
                num_bits,
                mins,
                maxs,
                true,
                Some(CHANNEL_AXIS),
            )?)
        }
        "Symmetric" => {
            let thresholds = per_channel_max_abs(weights, CHANNEL_AXIS)?;
            Box::new(WeightsSymmetricQuantizer::new(
                num_bits,
                thresholds,
                true,
                Some(CHANNEL_AXIS),
            )?)
        }
        _ => {
            let thresholds = per_channel_max_abs(weights, CHANNEL_AXIS)?
                .into_iter()
                .map(power_of_two_ceil)
                .collect();
            Box::new(WeightsPotQuantizer::new(
                num_bits,
                thresholds,
                true,
                Some(CHANNEL_AXIS),
            )?)
        }
    };
    Ok(quantizer)
}

fn mse_as_bits_increase(
    name: &str,
    bits: std::ops::RangeInclusive<u32>,
) -> fake_quant::Result<Vec<(f32, f32)>> {
    let mut mses = Vec::new();

    for num_bits in bits {
        let mut sum = 0.0;

        for _ in 0..ITERATIONS_PER_WIDTH {
            let weights = random_tensor(&[16, 3, 3, 3], -1.0..1.0);
            let quantizer = calibrate(name, &weights, num_bits)?;
            let quantized = quantizer.apply(&weights)?;
            sum += mean_squared_error(&weights, &quantized)?;
        }

        mses.push((num_bits as f32, sum / ITERATIONS_PER_WIDTH as f32));
    }

    Ok(mses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_of_two_ceil_rounds_up() {
        assert_eq!(power_of_two_ceil(3.0), 4.0);
        assert_eq!(power_of_two_ceil(4.0), 4.0);
        assert_eq!(power_of_two_ceil(0.3), 0.5);
        assert_eq!(power_of_two_ceil(0.0), 1.0);
    }
}
