use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;
use ndarray::Array2;

use crate::bits;
use crate::compression::{self, Compression};
use crate::error::{BgenError, Result};
use crate::genotypes::{layout1, layout2};
use crate::header::{FIXED_HEADER_LEN, Header, Layout};
use crate::samples::samples_block_bytes;
use crate::variant::{Descriptor, Variant};

/// Offset of the header's variant-count word, rewritten at close.
const N_VARIANTS_OFFSET: u64 = 8;

/// Per-variant encoding choices for [`BgenWriter::add_variant_with`].
#[derive(Debug, Clone)]
pub struct GenotypeEncoding {
    /// Per-sample ploidy; `None` means diploid throughout.
    pub ploidy: Option<Vec<u8>>,
    pub phased: bool,
    pub bit_depth: u8,
}

impl Default for GenotypeEncoding {
    fn default() -> Self {
        GenotypeEncoding {
            ploidy: None,
            phased: false,
            bit_depth: 8,
        }
    }
}

/// Append-only writer for bgen files. Variants are encoded and written as
/// they arrive; closing rewrites the header's variant count.
pub struct BgenWriter {
    out: BufWriter<File>,
    path: PathBuf,
    n_samples: u32,
    compression: Compression,
    layout: Layout,
    n_variants: u32,
    closed: bool,
}

impl BgenWriter {
    /// Creates a bgen file with the default encoding: layout 2, zstd
    /// compression, no metadata. `samples` may be empty to omit the sample
    /// identifier block.
    pub fn create(path: impl AsRef<Path>, n_samples: u32, samples: &[String]) -> Result<Self> {
        Self::create_with(
            path,
            n_samples,
            samples,
            Compression::Zstd,
            Layout::Two,
            "",
        )
    }

    pub fn create_with(
        path: impl AsRef<Path>,
        n_samples: u32,
        samples: &[String],
        compression: Compression,
        layout: Layout,
        metadata: &str,
    ) -> Result<Self> {
        if layout == Layout::One && compression == Compression::Zstd {
            return Err(BgenError::IncompatibleOptions);
        }
        if !samples.is_empty() && samples.len() != n_samples as usize {
            return Err(BgenError::SampleCountMismatch {
                expected: n_samples,
                found: samples.len() as u32,
            });
        }

        let path = path.as_ref().to_path_buf();
        let file = File::create(&path).map_err(|e| BgenError::Write {
            source: e,
            path: path.clone(),
        })?;
        let out = BufWriter::new(file);

        let has_sample_ids = !samples.is_empty();
        let samples_block = has_sample_ids.then(|| samples_block_bytes(samples));
        let header_length = FIXED_HEADER_LEN + metadata.len() as u32;
        let header = Header {
            offset: header_length + samples_block.as_ref().map_or(0, |b| b.len() as u32),
            header_length,
            n_variants: 0,
            n_samples,
            metadata: metadata.to_string(),
            compression,
            layout,
            has_sample_ids,
        };

        let mut writer = BgenWriter {
            out,
            path,
            n_samples,
            compression,
            layout,
            n_variants: 0,
            closed: false,
        };
        writer.write_all(&header.to_bytes())?;
        if let Some(block) = samples_block {
            writer.write_all(&block)?;
        }
        debug!(
            "created bgen: layout {}, {} samples",
            layout.code(),
            n_samples
        );
        Ok(writer)
    }

    /// Appends one variant with default encoding choices (diploid,
    /// unphased, 8 bits per probability).
    pub fn add_variant(
        &mut self,
        varid: &str,
        rsid: &str,
        chrom: &str,
        pos: u32,
        alleles: &[&str],
        probs: &Array2<f64>,
    ) -> Result<()> {
        self.add_variant_with(varid, rsid, chrom, pos, alleles, probs, &GenotypeEncoding::default())
    }

    /// Appends one variant, encoding `probs` at the requested ploidy,
    /// phasing and bit depth.
    pub fn add_variant_with(
        &mut self,
        varid: &str,
        rsid: &str,
        chrom: &str,
        pos: u32,
        alleles: &[&str],
        probs: &Array2<f64>,
        encoding: &GenotypeEncoding,
    ) -> Result<()> {
        self.ensure_open()?;
        bits::check_bit_depth(encoding.bit_depth)?;
        if alleles.is_empty() {
            return Err(BgenError::NoAlleles);
        }
        if probs.nrows() != self.n_samples as usize {
            return Err(BgenError::ProbabilityShape {
                n_rows: probs.nrows(),
                n_samples: self.n_samples,
            });
        }
        let ploidy = match &encoding.ploidy {
            Some(p) => {
                if p.len() != self.n_samples as usize {
                    return Err(BgenError::SampleCountMismatch {
                        expected: self.n_samples,
                        found: p.len() as u32,
                    });
                }
                p.clone()
            }
            None => vec![2; self.n_samples as usize],
        };

        let descriptor = Descriptor {
            varid: varid.to_string(),
            rsid: rsid.to_string(),
            chrom: chrom.to_string(),
            pos,
            alleles: alleles.iter().map(|a| a.to_string()).collect(),
        };

        let inner = match self.layout {
            Layout::One => {
                if encoding.phased || alleles.len() != 2 || ploidy.iter().any(|&z| z != 2) {
                    return Err(BgenError::Layout1Genotypes);
                }
                layout1::encode(&probs.view())?
            }
            Layout::Two => layout2::encode(
                &probs.view(),
                &ploidy,
                encoding.phased,
                encoding.bit_depth,
                alleles.len() as u16,
            )?,
        };

        let record = descriptor.to_bytes(self.layout, self.n_samples)?;
        self.write_all(&record)?;
        self.write_genotype_block(&inner)?;
        self.n_variants += 1;
        Ok(())
    }

    /// Copies a variant's raw record bytes straight from its reader,
    /// skipping the decode and re-encode round trip.
    pub fn add_variant_direct(&mut self, variant: &Variant) -> Result<()> {
        self.ensure_open()?;
        let (record, source_samples) = variant.raw_record()?;
        if source_samples != self.n_samples {
            return Err(BgenError::SampleCountMismatch {
                expected: self.n_samples,
                found: source_samples,
            });
        }
        self.write_all(&record)?;
        self.n_variants += 1;
        Ok(())
    }

    fn write_genotype_block(&mut self, inner: &[u8]) -> Result<()> {
        match (self.layout, self.compression) {
            (Layout::One, Compression::None) => self.write_all(inner),
            (Layout::One, _) => {
                let compressed = compression::compress(inner, self.compression)?;
                self.write_all(&(compressed.len() as u32).to_le_bytes())?;
                self.write_all(&compressed)
            }
            (Layout::Two, Compression::None) => {
                self.write_all(&(inner.len() as u32).to_le_bytes())?;
                self.write_all(inner)
            }
            (Layout::Two, _) => {
                let compressed = compression::compress(inner, self.compression)?;
                self.write_all(&(compressed.len() as u32 + 4).to_le_bytes())?;
                self.write_all(&(inner.len() as u32).to_le_bytes())?;
                self.write_all(&compressed)
            }
        }
    }

    /// Rewrites the header's variant count and flushes. Safe to call more
    /// than once; the writer also closes itself on drop.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.out
            .seek(SeekFrom::Start(N_VARIANTS_OFFSET))
            .and_then(|_| self.out.write_all(&self.n_variants.to_le_bytes()))
            .and_then(|_| self.out.flush())
            .map_err(|e| BgenError::Write {
                source: e,
                path: self.path.clone(),
            })?;
        self.closed = true;
        debug!("closed bgen writer after {} variants", self.n_variants);
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(BgenError::WriterClosed);
        }
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes).map_err(|e| BgenError::Write {
            source: e,
            path: self.path.clone(),
        })
    }
}

impl Drop for BgenWriter {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
