use ndarray::{Array2, ArrayView2};

use crate::bits;
use crate::error::{BgenError, Result};
use crate::genotypes::{GenotypeBlock, n_genotypes, round_simplex};

const MISSING_BIT: u8 = 0x80;
const PLOIDY_MASK: u8 = 0x3f;

fn max_value(bit_depth: u8) -> u64 {
    if bit_depth == 32 {
        u32::MAX as u64
    } else {
        (1u64 << bit_depth) - 1
    }
}

/// Slice cursor over the decompressed inner block.
struct Cursor<'a> {
    data: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() < n {
            return Err(BgenError::Truncated {
                expected: n,
                found: self.data.len(),
            });
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Stored (explicit) probability count for one sample.
fn stored_count(ploidy: u8, n_alleles: u16, phased: bool) -> u64 {
    if phased {
        ploidy as u64 * (n_alleles as u64 - 1)
    } else {
        n_genotypes(ploidy, n_alleles).saturating_sub(1)
    }
}

/// Decodes a decompressed layout-2 inner block into per-sample probability
/// rows. Rows are NaN-padded to the width of the highest-ploidy sample and
/// missing samples decode to all-NaN rows.
pub(crate) fn decode(
    inner: &[u8],
    header_n_samples: u32,
    descriptor_n_alleles: u16,
) -> Result<GenotypeBlock> {
    let mut cur = Cursor { data: inner };

    let n_samples = cur.u32()?;
    if n_samples != header_n_samples {
        return Err(BgenError::BlockSampleCount {
            expected: header_n_samples,
            found: n_samples,
        });
    }
    let n_alleles = cur.u16()?;
    if n_alleles != descriptor_n_alleles || n_alleles == 0 {
        return Err(BgenError::BlockAlleleCount {
            expected: descriptor_n_alleles,
            found: n_alleles,
        });
    }

    let min_ploidy = cur.u8()? & PLOIDY_MASK;
    let max_ploidy = cur.u8()? & PLOIDY_MASK;
    let ploidy_bytes = cur.take(n_samples as usize)?;

    let phased = match cur.u8()? {
        0 => false,
        1 => true,
        value => return Err(BgenError::BadPhasedFlag { value }),
    };
    let bit_depth = cur.u8()?;
    bits::check_bit_depth(bit_depth)?;
    let data = cur.data;

    let n = n_samples as usize;
    let k = n_alleles as usize;
    let max_val = max_value(bit_depth);

    for &byte in ploidy_bytes {
        if byte & PLOIDY_MASK > max_ploidy {
            return Err(BgenError::PloidyOutOfRange {
                ploidy: byte & PLOIDY_MASK,
            });
        }
    }
    let total: u128 = ploidy_bytes
        .iter()
        .map(|&b| stored_count(b & PLOIDY_MASK, n_alleles, phased) as u128)
        .sum();
    let needed = (total * bit_depth as u128).div_ceil(8);
    if needed > data.len() as u128 {
        return Err(BgenError::Truncated {
            expected: needed as usize,
            found: data.len(),
        });
    }

    let width = if phased {
        max_ploidy as usize * k
    } else {
        n_genotypes(max_ploidy, n_alleles) as usize
    };
    let mut probabilities = Array2::from_elem((n, width), f64::NAN);
    let ploidy: Vec<u8> = ploidy_bytes.iter().map(|&b| b & PLOIDY_MASK).collect();

    // Uniform diploid unphased biallelic blocks at byte-aligned depths are
    // the overwhelmingly common case: fixed two-value lanes per sample.
    if !phased
        && n_alleles == 2
        && min_ploidy == 2
        && max_ploidy == 2
        && matches!(bit_depth, 8 | 16 | 32)
        && ploidy_bytes.iter().all(|&b| b & PLOIDY_MASK == 2)
    {
        decode_diploid_lanes(data, ploidy_bytes, bit_depth, max_val, &mut probabilities);
    } else {
        let values = bits::unpack(data, bit_depth, total as usize)?;
        let mut idx = 0usize;
        for (i, &byte) in ploidy_bytes.iter().enumerate() {
            let z = (byte & PLOIDY_MASK) as usize;
            let c = stored_count(byte & PLOIDY_MASK, n_alleles, phased) as usize;
            let stored = &values[idx..idx + c];
            idx += c;
            if byte & MISSING_BIT != 0 {
                continue;
            }
            let mut row = probabilities.row_mut(i);
            if phased {
                for h in 0..z {
                    let hap = &stored[h * (k - 1)..(h + 1) * (k - 1)];
                    let mut sum = 0.0;
                    for (j, &v) in hap.iter().enumerate() {
                        let p = v as f64 / max_val as f64;
                        row[h * k + j] = p;
                        sum += p;
                    }
                    row[h * k + k - 1] = (1.0 - sum).max(0.0);
                }
            } else {
                let mut sum = 0.0;
                for (j, &v) in stored.iter().enumerate() {
                    let p = v as f64 / max_val as f64;
                    row[j] = p;
                    sum += p;
                }
                row[c] = (1.0 - sum).max(0.0);
            }
        }
    }

    Ok(GenotypeBlock {
        probabilities,
        ploidy,
        phased,
        bit_depth,
    })
}

fn decode_diploid_lanes(
    data: &[u8],
    ploidy_bytes: &[u8],
    bit_depth: u8,
    max_val: u64,
    probabilities: &mut Array2<f64>,
) {
    let value_bytes = bit_depth as usize / 8;
    let lane = 2 * value_bytes;
    let read = |offset: usize| -> u64 {
        let mut v = 0u64;
        for (b, &byte) in data[offset..offset + value_bytes].iter().enumerate() {
            v |= (byte as u64) << (8 * b);
        }
        v
    };

    for (i, &byte) in ploidy_bytes.iter().enumerate() {
        if byte & MISSING_BIT != 0 {
            continue;
        }
        let aa = read(i * lane) as f64 / max_val as f64;
        let ab = read(i * lane + value_bytes) as f64 / max_val as f64;
        let mut row = probabilities.row_mut(i);
        row[0] = aa;
        row[1] = ab;
        row[2] = (1.0 - aa - ab).max(0.0);
    }
}

/// Encodes per-sample probability rows into a layout-2 inner block. The
/// matrix may be wider than a given sample needs; the padding cells must be
/// NaN and any NaN inside a sample's active region marks it missing.
pub(crate) fn encode(
    probs: &ArrayView2<f64>,
    ploidy: &[u8],
    phased: bool,
    bit_depth: u8,
    n_alleles: u16,
) -> Result<Vec<u8>> {
    bits::check_bit_depth(bit_depth)?;
    for &z in ploidy {
        if z & !PLOIDY_MASK != 0 {
            return Err(BgenError::PloidyOutOfRange { ploidy: z });
        }
    }

    let n = probs.nrows();
    let k = n_alleles as usize;
    let max_val = max_value(bit_depth);
    let min_ploidy = ploidy.iter().copied().min().unwrap_or(0);
    let max_ploidy = ploidy.iter().copied().max().unwrap_or(0);

    let mut ploidy_bytes = Vec::with_capacity(n);
    let mut values: Vec<u32> = Vec::new();
    for (sample, (row, &z)) in probs.rows().into_iter().zip(ploidy).enumerate() {
        let active_len = if phased {
            z as usize * k
        } else {
            n_genotypes(z, n_alleles) as usize
        };
        if active_len > probs.ncols() {
            return Err(BgenError::ProbabilityWidth {
                sample,
                expected: active_len,
                width: probs.ncols(),
            });
        }
        let active: Vec<f64> = row.iter().take(active_len).copied().collect();
        let c = stored_count(z, n_alleles, phased) as usize;

        if active.iter().any(|v| v.is_nan()) {
            ploidy_bytes.push(z | MISSING_BIT);
            values.extend(std::iter::repeat_n(0u32, c));
            continue;
        }
        for &p in &active {
            if !(-1e-9..=1.0 + 1e-9).contains(&p) {
                return Err(BgenError::ProbabilityRange { sample, value: p });
            }
        }

        ploidy_bytes.push(z);
        if phased {
            for hap in active.chunks_exact(k) {
                let rounded = round_simplex(hap, max_val);
                values.extend_from_slice(&rounded[..k - 1]);
            }
        } else {
            let rounded = round_simplex(&active, max_val);
            values.extend_from_slice(&rounded[..c]);
        }
    }

    let packed = bits::pack(&values, bit_depth)?;
    let mut inner = Vec::with_capacity(10 + n + packed.len());
    inner.extend_from_slice(&(n as u32).to_le_bytes());
    inner.extend_from_slice(&n_alleles.to_le_bytes());
    inner.push(min_ploidy);
    inner.push(max_ploidy);
    inner.extend_from_slice(&ploidy_bytes);
    inner.push(phased as u8);
    inner.push(bit_depth);
    inner.extend_from_slice(&packed);
    Ok(inner)
}
