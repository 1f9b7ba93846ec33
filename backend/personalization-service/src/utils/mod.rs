// Numeric helpers shared by taggers and recipe operations

/// Euclidean norm of a sequence of weights
pub fn l2_norm<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    values.into_iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Numerically stable `ln(sum(exp(x)))`
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// Softmax over a slice; empty input gives empty output
pub fn softmax(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let lse = log_sum_exp(values);
    values.iter().map(|v| (v - lse).exp()).collect()
}
