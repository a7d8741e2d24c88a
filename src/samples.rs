use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{BgenError, Result};
use crate::header::Header;
use crate::source::ByteSource;

/// Parses the sample identifier block that follows the header when flag
/// bit 31 is set.
pub(crate) fn read_samples_block(source: &mut ByteSource, header: &Header) -> Result<Vec<String>> {
    let declared = source.read_u32()?;
    let expected = header.offset - header.header_length;
    if declared != expected {
        return Err(BgenError::SampleBlockLength { declared, expected });
    }

    let n = source.read_u32()?;
    if n != header.n_samples {
        return Err(BgenError::SampleCountMismatch {
            expected: header.n_samples,
            found: n,
        });
    }

    let mut samples = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let len = source.read_u16()?;
        let mut bytes = vec![0u8; len as usize];
        source.read_exact(&mut bytes)?;
        samples.push(String::from_utf8_lossy(&bytes).into_owned());
    }
    Ok(samples)
}

/// Serialises the sample block: total length, count, then length-prefixed
/// identifiers.
pub(crate) fn samples_block_bytes(samples: &[String]) -> Vec<u8> {
    let total = 8 + samples.iter().map(|s| 2 + s.len()).sum::<usize>();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(samples.len() as u32).to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&(sample.len() as u16).to_le_bytes());
        out.extend_from_slice(sample.as_bytes());
    }
    out
}

/// Reads sample identifiers from a companion `.sample` file: two header
/// lines, then one sample per line. The id sits in the first column, or the
/// second when the first column is just the 1-based line ordinal.
pub(crate) fn read_sample_file(path: &impl AsRef<Path>, n_samples: u32) -> Result<Vec<String>> {
    let f = File::open(path).map_err(|e| BgenError::ReadWithPath {
        source: e,
        path: path.as_ref().to_path_buf(),
    })?;

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (line_idx, line) in BufReader::new(f).lines().enumerate() {
        let line = line.map_err(|e| BgenError::ReadWithPath {
            source: e,
            path: path.as_ref().to_path_buf(),
        })?;
        // line 1 holds column names, line 2 column types
        if line_idx < 2 {
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        rows.push(line.split_whitespace().map(str::to_string).collect());
    }

    if rows.len() != n_samples as usize {
        return Err(BgenError::SampleCountMismatch {
            expected: n_samples,
            found: rows.len() as u32,
        });
    }

    let ordinal_first = !rows.is_empty()
        && rows
            .iter()
            .enumerate()
            .all(|(i, row)| row.len() > 1 && row[0] == (i + 1).to_string());
    let column = usize::from(ordinal_first);
    Ok(rows.into_iter().map(|mut row| row.swap_remove(column)).collect())
}

/// Fallback ids when neither the file nor a `.sample` companion carries any.
pub(crate) fn numeric_sample_ids(n_samples: u32) -> Vec<String> {
    (0..n_samples).map(|i| i.to_string()).collect()
}
