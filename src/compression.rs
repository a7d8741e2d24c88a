use std::io::Read;

use crate::error::{BgenError, Result};

/// Genotype-block compression scheme, from the low two bits of the header
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zlib,
    Zstd,
}

impl Compression {
    pub(crate) fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Zlib),
            2 => Ok(Compression::Zstd),
            _ => Err(BgenError::UnsupportedCompression { code }),
        }
    }

    pub(crate) fn code(self) -> u32 {
        match self {
            Compression::None => 0,
            Compression::Zlib => 1,
            Compression::Zstd => 2,
        }
    }
}

/// Inflates a genotype payload to exactly `expected_len` bytes. The length
/// is always known up front: layout 2 records it next to the payload and
/// layout 1 stores six bytes per sample.
pub(crate) fn decompress(
    data: &[u8],
    method: Compression,
    expected_len: usize,
) -> Result<Vec<u8>> {
    let out = match method {
        Compression::None => data.to_vec(),
        Compression::Zlib => {
            let mut out = Vec::with_capacity(expected_len);
            flate2::read::ZlibDecoder::new(data)
                .read_to_end(&mut out)
                .map_err(|e| BgenError::Decompression {
                    codec: "zlib",
                    source: e,
                })?;
            out
        }
        Compression::Zstd => {
            zstd::bulk::decompress(data, expected_len).map_err(|e| BgenError::Decompression {
                codec: "zstd",
                source: e,
            })?
        }
    };
    if out.len() != expected_len {
        return Err(BgenError::DecompressedLength {
            expected: expected_len,
            found: out.len(),
        });
    }
    Ok(out)
}

pub(crate) fn compress(data: &[u8], method: Compression) -> Result<Vec<u8>> {
    match method {
        Compression::None => Ok(data.to_vec()),
        Compression::Zlib => {
            let mut out = Vec::new();
            flate2::read::ZlibEncoder::new(data, flate2::Compression::default())
                .read_to_end(&mut out)
                .map_err(|e| BgenError::Decompression {
                    codec: "zlib",
                    source: e,
                })?;
            Ok(out)
        }
        Compression::Zstd => zstd::bulk::compress(data, zstd::DEFAULT_COMPRESSION_LEVEL)
            .map_err(|e| BgenError::Decompression {
                codec: "zstd",
                source: e,
            }),
    }
}
