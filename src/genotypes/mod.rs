pub(crate) mod layout1;
pub(crate) mod layout2;

use itertools::Itertools;
use ndarray::Array2;

/// Decoded genotype data for one variant: one probability row per sample,
/// NaN-padded to the widest sample and all-NaN for missing samples.
#[derive(Debug, Clone)]
pub struct GenotypeBlock {
    pub probabilities: Array2<f64>,
    pub ploidy: Vec<u8>,
    pub phased: bool,
    pub bit_depth: u8,
}

/// Number of unordered genotypes for `ploidy` copies drawn from `n_alleles`
/// alleles: C(ploidy + n_alleles - 1, n_alleles - 1). Saturates rather than
/// wrapping so corrupt counts are caught by the length checks downstream.
pub(crate) fn n_genotypes(ploidy: u8, n_alleles: u16) -> u64 {
    if n_alleles == 0 {
        return 0;
    }
    let n = ploidy as u128 + n_alleles as u128 - 1;
    let k = (ploidy as u128).min(n_alleles as u128 - 1);
    let mut result: u128 = 1;
    for i in 1..=k {
        result = result * (n - k + i) / i;
        if result > u64::MAX as u128 {
            return u64::MAX;
        }
    }
    result as u64
}

/// Scales a probability simplex to integers summing to `max_val` using the
/// largest-remainder rule, ties broken by original index. Re-rounding a row
/// that was produced by integer division reproduces the integers exactly.
pub(crate) fn round_simplex(row: &[f64], max_val: u64) -> Vec<u32> {
    let m = max_val as f64;
    let mut base = Vec::with_capacity(row.len());
    let mut remainder = Vec::with_capacity(row.len());
    for &p in row {
        let scaled = (p * m).clamp(0.0, m);
        let floor = scaled.floor();
        base.push(floor as u64);
        remainder.push(scaled - floor);
    }

    let total: i128 = base.iter().map(|&b| b as i128).sum();
    let shortfall = max_val as i128 - total;

    // the sort is stable, so equal remainders keep lower indices first
    if shortfall > 0 {
        let order = (0..row.len()).sorted_by(|&a, &b| {
            remainder[b]
                .partial_cmp(&remainder[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for idx in order.take((shortfall as usize).min(row.len())) {
            base[idx] += 1;
        }
    } else if shortfall < 0 {
        let order = (0..row.len()).sorted_by(|&a, &b| {
            remainder[a]
                .partial_cmp(&remainder[b])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut excess = (-shortfall) as usize;
        for idx in order {
            if excess == 0 {
                break;
            }
            if base[idx] > 0 {
                base[idx] -= 1;
                excess -= 1;
            }
        }
    }

    base.into_iter().map(|b| b as u32).collect()
}
