use std::cell::RefCell;
use std::rc::Weak;

use ndarray::{Array1, Array2};

use crate::compression::Compression;
use crate::error::{BgenError, Result};
use crate::genotypes::GenotypeBlock;
use crate::genotypes::layout1;
use crate::header::Layout;
use crate::reader::ReaderState;
use crate::source::ByteSource;

/// Textual descriptor preceding each genotype block.
#[derive(Debug, Clone)]
pub(crate) struct Descriptor {
    pub varid: String,
    pub rsid: String,
    pub chrom: String,
    pub pos: u32,
    pub alleles: Vec<String>,
}

/// Where a variant's genotype payload sits in the file.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GenotypeSpan {
    pub data_offset: u64,
    pub data_len: u64,
    pub decompressed_len: usize,
    pub next_offset: u64,
}

fn read_str16(source: &mut ByteSource) -> Result<String> {
    let len = source.read_u16()?;
    let mut bytes = vec![0u8; len as usize];
    source.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_str32(source: &mut ByteSource) -> Result<String> {
    let len = source.read_u32()?;
    let mut bytes = vec![0u8; len as usize];
    source.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn push_str16(out: &mut Vec<u8>, field: &'static str, s: &str) -> Result<()> {
    if s.len() > u16::MAX as usize {
        return Err(BgenError::FieldTooLong {
            field,
            len: s.len(),
        });
    }
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

impl Descriptor {
    /// Parses the descriptor at the source's current position, plus the
    /// genotype-block length fields that follow it. A clean end-of-file at
    /// the first field means no more variants.
    pub(crate) fn read(
        source: &mut ByteSource,
        layout: Layout,
        compression: Compression,
        n_samples: u32,
    ) -> Result<Option<(Descriptor, GenotypeSpan)>> {
        let varid = match layout {
            Layout::One => {
                let mut buf = [0u8; 4];
                if !source.read_or_eof(&mut buf)? {
                    return Ok(None);
                }
                let declared = u32::from_le_bytes(buf);
                if declared != n_samples {
                    return Err(BgenError::SampleCountMismatch {
                        expected: n_samples,
                        found: declared,
                    });
                }
                read_str16(source)?
            }
            Layout::Two => {
                let mut buf = [0u8; 2];
                if !source.read_or_eof(&mut buf)? {
                    return Ok(None);
                }
                let len = u16::from_le_bytes(buf);
                let mut bytes = vec![0u8; len as usize];
                source.read_exact(&mut bytes)?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
        };

        let rsid = read_str16(source)?;
        let chrom = read_str16(source)?;
        let pos = source.read_u32()?;

        let n_alleles = match layout {
            Layout::One => 2,
            Layout::Two => source.read_u16()?,
        };
        let mut alleles = Vec::with_capacity(n_alleles as usize);
        for _ in 0..n_alleles {
            alleles.push(read_str32(source)?);
        }

        let span = match layout {
            Layout::One => {
                let uncompressed = n_samples as usize * layout1::BYTES_PER_SAMPLE;
                let data_len = match compression {
                    Compression::None => uncompressed as u64,
                    _ => source.read_u32()? as u64,
                };
                let data_offset = source.position();
                GenotypeSpan {
                    data_offset,
                    data_len,
                    decompressed_len: uncompressed,
                    next_offset: data_offset + data_len,
                }
            }
            Layout::Two => {
                let block_len = source.read_u32()?;
                let (data_len, decompressed_len) = match compression {
                    Compression::None => (block_len as u64, block_len as usize),
                    _ => {
                        if block_len < 4 {
                            return Err(BgenError::Truncated {
                                expected: 4,
                                found: block_len as usize,
                            });
                        }
                        let decompressed = source.read_u32()?;
                        (block_len as u64 - 4, decompressed as usize)
                    }
                };
                let data_offset = source.position();
                GenotypeSpan {
                    data_offset,
                    data_len,
                    decompressed_len,
                    next_offset: data_offset + data_len,
                }
            }
        };

        let descriptor = Descriptor {
            varid,
            rsid,
            chrom,
            pos,
            alleles,
        };
        Ok(Some((descriptor, span)))
    }

    /// Serialises the descriptor; layout 1 leads with the sample count.
    pub(crate) fn to_bytes(&self, layout: Layout, n_samples: u32) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        if layout == Layout::One {
            out.extend_from_slice(&n_samples.to_le_bytes());
        }
        push_str16(&mut out, "varid", &self.varid)?;
        push_str16(&mut out, "rsid", &self.rsid)?;
        push_str16(&mut out, "chrom", &self.chrom)?;
        out.extend_from_slice(&self.pos.to_le_bytes());
        if layout == Layout::Two {
            if self.alleles.len() > u16::MAX as usize {
                return Err(BgenError::FieldTooLong {
                    field: "alleles",
                    len: self.alleles.len(),
                });
            }
            out.extend_from_slice(&(self.alleles.len() as u16).to_le_bytes());
        }
        for allele in &self.alleles {
            out.extend_from_slice(&(allele.len() as u32).to_le_bytes());
            out.extend_from_slice(allele.as_bytes());
        }
        Ok(out)
    }
}

/// One variant from a bgen file. Descriptor fields are parsed eagerly;
/// genotype probabilities are pulled from the source and cached on first
/// access, so a `Variant` stays usable after its reader closes for anything
/// already materialised.
#[derive(Debug, Clone)]
pub struct Variant {
    pub varid: String,
    pub rsid: String,
    pub chrom: String,
    pub pos: u32,
    pub alleles: Vec<String>,
    /// Offset of the variant record (descriptor start) in the file.
    pub fileoffset: u64,
    /// Offset of the record that follows this one.
    pub next_variant_offset: u64,
    state: Weak<RefCell<ReaderState>>,
    span: GenotypeSpan,
    genotypes: Option<GenotypeBlock>,
}

impl Variant {
    pub(crate) fn new(
        descriptor: Descriptor,
        fileoffset: u64,
        span: GenotypeSpan,
        state: Weak<RefCell<ReaderState>>,
    ) -> Self {
        Variant {
            varid: descriptor.varid,
            rsid: descriptor.rsid,
            chrom: descriptor.chrom,
            pos: descriptor.pos,
            alleles: descriptor.alleles,
            fileoffset,
            next_variant_offset: span.next_offset,
            state,
            span,
            genotypes: None,
        }
    }

    pub fn n_alleles(&self) -> usize {
        self.alleles.len()
    }

    /// The `n_samples x width` probability matrix, decoding it on first use.
    pub fn probabilities(&mut self) -> Result<&Array2<f64>> {
        Ok(&self.materialise()?.probabilities)
    }

    /// Per-sample ploidy, from the genotype block.
    pub fn ploidy(&mut self) -> Result<&[u8]> {
        Ok(&self.materialise()?.ploidy)
    }

    pub fn phased(&mut self) -> Result<bool> {
        Ok(self.materialise()?.phased)
    }

    pub fn bit_depth(&mut self) -> Result<u8> {
        Ok(self.materialise()?.bit_depth)
    }

    /// Expected number of copies of the non-reference allele per sample.
    pub fn alt_dosage(&mut self) -> Result<Array1<f64>> {
        self.check_biallelic()?;
        let (_, alt) = allele_dosages(self.materialise()?);
        Ok(alt)
    }

    /// Dosage of whichever allele is rarer across the cohort, ties going to
    /// the non-reference allele.
    pub fn minor_allele_dosage(&mut self) -> Result<Array1<f64>> {
        self.check_biallelic()?;
        let (reference, alt) = allele_dosages(self.materialise()?);
        let ref_total: f64 = reference.iter().filter(|v| !v.is_nan()).sum();
        let alt_total: f64 = alt.iter().filter(|v| !v.is_nan()).sum();
        Ok(if ref_total >= alt_total { alt } else { reference })
    }

    fn check_biallelic(&self) -> Result<()> {
        if self.alleles.len() != 2 {
            return Err(BgenError::NotBiallelic {
                n_alleles: self.alleles.len(),
            });
        }
        Ok(())
    }

    fn materialise(&mut self) -> Result<&GenotypeBlock> {
        if self.genotypes.is_none() {
            let state = self.state.upgrade().ok_or(BgenError::ReaderClosed)?;
            let block = state
                .borrow_mut()
                .read_genotypes(&self.span, self.alleles.len() as u16)?;
            self.genotypes = Some(block);
        }
        Ok(self.genotypes.as_ref().unwrap())
    }

    /// Raw record bytes (descriptor plus genotype block) and the sample
    /// count of the originating file, for direct copy-through writes.
    pub(crate) fn raw_record(&self) -> Result<(Vec<u8>, u32)> {
        let state = self.state.upgrade().ok_or(BgenError::ReaderClosed)?;
        let mut state = state.borrow_mut();
        state.source.seek_to(self.fileoffset)?;
        let mut bytes = vec![0u8; (self.next_variant_offset - self.fileoffset) as usize];
        state.source.read_exact(&mut bytes)?;
        Ok((bytes, state.n_samples))
    }
}

/// Reference- and alt-allele dosages for a biallelic variant, honouring
/// per-sample ploidy and phasing. Missing samples stay NaN.
fn allele_dosages(block: &GenotypeBlock) -> (Array1<f64>, Array1<f64>) {
    let n = block.probabilities.nrows();
    let mut reference = Array1::from_elem(n, f64::NAN);
    let mut alt = Array1::from_elem(n, f64::NAN);

    for (i, row) in block.probabilities.rows().into_iter().enumerate() {
        let z = block.ploidy[i] as usize;
        if row.iter().take(if block.phased { z * 2 } else { z + 1 }).any(|v| v.is_nan()) {
            continue;
        }
        if block.phased {
            // haplotype-major rows: two probabilities per copy
            let mut a = 0.0;
            let mut r = 0.0;
            for h in 0..z {
                r += row[h * 2];
                a += row[h * 2 + 1];
            }
            reference[i] = r;
            alt[i] = a;
        } else {
            // genotype j carries j alt copies
            let mut a = 0.0;
            let mut r = 0.0;
            for j in 0..=z {
                a += j as f64 * row[j];
                r += (z - j) as f64 * row[j];
            }
            reference[i] = r;
            alt[i] = a;
        }
    }
    (reference, alt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn block(probs: Array2<f64>, ploidy: Vec<u8>, phased: bool) -> GenotypeBlock {
        GenotypeBlock {
            probabilities: probs,
            ploidy,
            phased,
            bit_depth: 8,
        }
    }

    #[test]
    fn unphased_diploid_dosage() {
        let b = block(
            array![[0.1, 0.8, 0.1], [0.0, 0.0, 1.0], [f64::NAN, f64::NAN, f64::NAN]],
            vec![2, 2, 2],
            false,
        );
        let (reference, alt) = allele_dosages(&b);
        assert!((alt[0] - 1.0).abs() < 1e-12);
        assert!((reference[0] - 1.0).abs() < 1e-12);
        assert_eq!(alt[1], 2.0);
        assert!(alt[2].is_nan());
    }

    #[test]
    fn haploid_dosage_is_single_probability() {
        let b = block(array![[0.25, 0.75, f64::NAN]], vec![1], false);
        let (reference, alt) = allele_dosages(&b);
        assert_eq!(alt[0], 0.75);
        assert_eq!(reference[0], 0.25);
    }

    #[test]
    fn phased_dosage_sums_haplotypes() {
        let b = block(
            array![[0.1, 0.9, 0.5, 0.5], [0.2, 0.8, f64::NAN, f64::NAN]],
            vec![2, 1],
            true,
        );
        let (reference, alt) = allele_dosages(&b);
        assert!((alt[0] - 1.4).abs() < 1e-12);
        assert!((reference[0] - 0.6).abs() < 1e-12);
        assert!((alt[1] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn descriptor_bytes_round_trip() {
        let descriptor = Descriptor {
            varid: "var1".to_string(),
            rsid: "rs1".to_string(),
            chrom: "chr1".to_string(),
            pos: 1234,
            alleles: vec!["A".to_string(), "GT".to_string()],
        };
        let mut bytes = descriptor.to_bytes(Layout::Two, 3).unwrap();
        // genotype-block length fields expected by the parser
        bytes.extend_from_slice(&10u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 10]);

        let mut source = ByteSource::from_seekable(std::io::Cursor::new(bytes));
        let (parsed, span) = Descriptor::read(&mut source, Layout::Two, Compression::None, 3)
            .unwrap()
            .unwrap();
        assert_eq!(parsed.varid, "var1");
        assert_eq!(parsed.rsid, "rs1");
        assert_eq!(parsed.chrom, "chr1");
        assert_eq!(parsed.pos, 1234);
        assert_eq!(parsed.alleles, vec!["A", "GT"]);
        assert_eq!(span.data_len, 10);
        assert_eq!(span.next_offset, span.data_offset + 10);
    }

    #[test]
    fn layout1_descriptor_validates_sample_count() {
        let descriptor = Descriptor {
            varid: "v".to_string(),
            rsid: "r".to_string(),
            chrom: "1".to_string(),
            pos: 5,
            alleles: vec!["A".to_string(), "C".to_string()],
        };
        let bytes = descriptor.to_bytes(Layout::One, 7).unwrap();
        let mut source = ByteSource::from_seekable(std::io::Cursor::new(bytes));
        assert!(matches!(
            Descriptor::read(&mut source, Layout::One, Compression::None, 9),
            Err(BgenError::SampleCountMismatch { expected: 9, found: 7 })
        ));
    }

    #[test]
    fn clean_eof_yields_no_descriptor() {
        let mut source = ByteSource::from_seekable(std::io::Cursor::new(Vec::new()));
        assert!(
            Descriptor::read(&mut source, Layout::Two, Compression::None, 1)
                .unwrap()
                .is_none()
        );
    }
}
