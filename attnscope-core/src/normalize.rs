//! Min-max scaling of attention rows.
//!
//! A row whose values are all equal has no range to scale against; it maps
//! to all zeros instead of producing NaN.

use crate::tensor::WeightTensor;

/// Scale `row` into `[0, 1]` relative to its own minimum and maximum.
pub fn scale_row(row: &[f32]) -> Vec<f32> {
    let Some((min, max)) = min_max(row) else {
        return Vec::new();
    };
    let range = max - min;
    if range == 0.0 || !range.is_finite() {
        return vec![0.0; row.len()];
    }
    row.iter().map(|v| (v - min) / range).collect()
}

/// Minimum and maximum of a row, or `None` when it is empty.
pub fn min_max(row: &[f32]) -> Option<(f32, f32)> {
    let first = *row.first()?;
    Some(
        row.iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

/// Whether `scale_row` would take the zero-range branch for this row.
pub fn is_degenerate(row: &[f32]) -> bool {
    match min_max(row) {
        Some((min, max)) => max - min == 0.0,
        None => true,
    }
}

/// Scale every row of `tensor` in place. Returns the number of degenerate rows.
pub fn scale_tensor(tensor: &mut WeightTensor) -> usize {
    let mut degenerate = 0;
    for layer in &mut tensor.layers {
        for head in &mut layer.heads {
            for row in &mut head.rows {
                if is_degenerate(row) {
                    degenerate += 1;
                }
                *row = scale_row(row);
            }
        }
    }
    if degenerate > 0 {
        tracing::debug!(degenerate, "Scaled rows with zero range to all-zero");
    }
    degenerate
}
