//! Numeric helpers shared by pruning and post-processing.

/// Row-wise softmax over a row-major `rows x cols` buffer, in place.
///
/// Each row is shifted by its maximum before exponentiation so large logits
/// do not overflow.
pub(crate) fn softmax_rows(data: &mut [f32], cols: usize) {
    if cols == 0 {
        return;
    }
    for row in data.chunks_mut(cols) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for value in row.iter_mut() {
            *value = (*value - max).exp();
            sum += *value;
        }
        if sum > 0.0 && sum.is_finite() {
            for value in row.iter_mut() {
                *value /= sum;
            }
        }
    }
}

/// Percentile with linear interpolation between closest ranks.
///
/// `values` is sorted in place. Returns `None` for an empty slice.
pub(crate) fn percentile(values: &mut [f32], q: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let rank = (q as f64 / 100.0) * (values.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    let lo_v = values[lo] as f64;
    let hi_v = values[hi] as f64;
    Some((lo_v + (hi_v - lo_v) * frac) as f32)
}

/// Population standard deviation (`ddof = 0`).
pub(crate) fn std_dev(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    var.sqrt() as f32
}
