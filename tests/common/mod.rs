use ndarray::{Array2, array};

/// Max absolute error introduced by storing probabilities at `bit_depth`.
pub fn epsilon(bit_depth: u8) -> f64 {
    let max_val = if bit_depth == 32 {
        u32::MAX as f64
    } else {
        ((1u64 << bit_depth) - 1) as f64
    };
    1.0 / max_val
}

/// Element-wise closeness with NaN treated as equal to NaN.
pub fn probs_close(original: &Array2<f64>, parsed: &Array2<f64>, bit_depth: u8) -> bool {
    if original.dim() != parsed.dim() {
        return false;
    }
    let eps = epsilon(bit_depth);
    original
        .iter()
        .zip(parsed.iter())
        .all(|(a, b)| (a.is_nan() && b.is_nan()) || (a - b).abs() <= eps)
}

/// The standard three-sample diploid genotype matrix used across tests,
/// with the last sample missing.
pub fn diploid_genotypes() -> Array2<f64> {
    array![
        [0.1, 0.8, 0.1],
        [0.5, 0.25, 0.25],
        [f64::NAN, f64::NAN, f64::NAN],
    ]
}

pub fn sample_ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
