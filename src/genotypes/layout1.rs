use ndarray::{Array2, ArrayView2};

use crate::error::{BgenError, Result};
use crate::genotypes::GenotypeBlock;

/// Layout 1 stores probabilities as u16 values scaled by 32768.
const SCALE: f64 = 32768.0;

pub(crate) const BYTES_PER_SAMPLE: usize = 6;

/// Decodes a layout-1 block: three u16 probabilities per sample, diploid,
/// unphased, two alleles. An all-zero triplet marks a missing sample.
pub(crate) fn decode(inner: &[u8], n_samples: u32) -> Result<GenotypeBlock> {
    let n = n_samples as usize;
    if inner.len() != n * BYTES_PER_SAMPLE {
        return Err(BgenError::DecompressedLength {
            expected: n * BYTES_PER_SAMPLE,
            found: inner.len(),
        });
    }

    let mut probabilities = Array2::from_elem((n, 3), f64::NAN);
    for (i, chunk) in inner.chunks_exact(BYTES_PER_SAMPLE).enumerate() {
        let aa = u16::from_le_bytes([chunk[0], chunk[1]]);
        let ab = u16::from_le_bytes([chunk[2], chunk[3]]);
        let bb = u16::from_le_bytes([chunk[4], chunk[5]]);
        if aa == 0 && ab == 0 && bb == 0 {
            continue;
        }
        let mut row = probabilities.row_mut(i);
        row[0] = aa as f64 / SCALE;
        row[1] = ab as f64 / SCALE;
        row[2] = bb as f64 / SCALE;
    }

    Ok(GenotypeBlock {
        probabilities,
        ploidy: vec![2; n],
        phased: false,
        bit_depth: 16,
    })
}

/// Encodes an `n_samples x 3` probability matrix. NaN rows become the
/// all-zero missing triplet.
pub(crate) fn encode(probs: &ArrayView2<f64>) -> Result<Vec<u8>> {
    if probs.ncols() != 3 {
        return Err(BgenError::ProbabilityWidth {
            sample: 0,
            expected: 3,
            width: probs.ncols(),
        });
    }

    let mut out = Vec::with_capacity(probs.nrows() * BYTES_PER_SAMPLE);
    for (sample, row) in probs.rows().into_iter().enumerate() {
        if row.iter().any(|v| v.is_nan()) {
            out.extend_from_slice(&[0u8; BYTES_PER_SAMPLE]);
            continue;
        }
        for &p in row {
            if !(0.0..=1.0).contains(&p) {
                return Err(BgenError::ProbabilityRange { sample, value: p });
            }
            out.extend_from_slice(&(((p * SCALE).round() as u16).to_le_bytes()));
        }
    }
    Ok(out)
}
