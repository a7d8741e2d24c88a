use std::cell::RefCell;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;
use ndarray::Axis;

use crate::compression::{self, Compression};
use crate::error::{BgenError, Result};
use crate::genotypes::{GenotypeBlock, layout1, layout2};
use crate::header::{Header, Layout};
use crate::index::Index;
use crate::samples;
use crate::source::ByteSource;
use crate::variant::{Descriptor, GenotypeSpan, Variant};

/// Cursor value after an iteration error; stops further reads.
const POISONED: u64 = u64::MAX;

/// State shared between a reader and the variants it has handed out.
/// Variants hold a weak reference, so closing the reader drops the source
/// and later materialisation attempts fail rather than dangle.
pub(crate) struct ReaderState {
    pub(crate) source: ByteSource,
    pub(crate) layout: Layout,
    pub(crate) compression: Compression,
    pub(crate) n_samples: u32,
    keep: Option<Vec<bool>>,
}

impl ReaderState {
    /// Reads, decompresses and decodes one genotype block, dropping masked
    /// sample rows.
    pub(crate) fn read_genotypes(
        &mut self,
        span: &GenotypeSpan,
        n_alleles: u16,
    ) -> Result<GenotypeBlock> {
        self.source.seek_to(span.data_offset)?;
        let mut raw = vec![0u8; span.data_len as usize];
        self.source.read_exact(&mut raw)?;
        let inner = compression::decompress(&raw, self.compression, span.decompressed_len)?;

        let mut block = match self.layout {
            Layout::One => layout1::decode(&inner, self.n_samples)?,
            Layout::Two => layout2::decode(&inner, self.n_samples, n_alleles)?,
        };

        if let Some(keep) = &self.keep {
            let rows: Vec<usize> = keep
                .iter()
                .enumerate()
                .filter_map(|(i, &k)| k.then_some(i))
                .collect();
            block.probabilities = block.probabilities.select(Axis(0), &rows);
            block.ploidy = rows.iter().map(|&i| block.ploidy[i]).collect();
        }
        Ok(block)
    }
}

/// Reader over a bgen file or stream.
///
/// Iterating yields `Result<Variant>` in file order until end-of-file, which
/// tolerates headers that declare zero variants. Random access and
/// index-backed lookups need a seekable source and a sibling `.bgi` file
/// respectively.
pub struct BgenReader {
    state: Option<Rc<RefCell<ReaderState>>>,
    header: Header,
    samples: Vec<String>,
    index: Option<Index>,
    cursor: u64,
}

impl BgenReader {
    /// Opens a bgen file, picking up a sibling `<path>.bgi` index when one
    /// exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_inner(path.as_ref(), None)
    }

    /// Opens a bgen file whose sample identifiers live in a companion
    /// `.sample` file. Internal sample ids take priority when present.
    pub fn open_with_sample(
        path: impl AsRef<Path>,
        sample_path: impl AsRef<Path>,
    ) -> Result<Self> {
        Self::open_inner(path.as_ref(), Some(sample_path.as_ref()))
    }

    /// Opens from any random-access byte stream.
    pub fn from_seekable(stream: impl Read + Seek + 'static) -> Result<Self> {
        Self::with_source(ByteSource::from_seekable(stream), None, None)
    }

    /// Opens from a forward-only stream. Sequential iteration works;
    /// random access fails with `NotSeekable`.
    pub fn from_stream(stream: impl Read + 'static) -> Result<Self> {
        Self::with_source(ByteSource::from_stream(stream), None, None)
    }

    fn open_inner(path: &Path, sample_path: Option<&Path>) -> Result<Self> {
        let source = ByteSource::open(&path)?;
        let index_path = PathBuf::from(format!("{}.bgi", path.display()));
        let index = if index_path.exists() {
            debug!("opening bgen index: {}", index_path.display());
            Some(Index::open(&index_path)?)
        } else {
            None
        };
        Self::with_source(source, sample_path, index)
    }

    fn with_source(
        mut source: ByteSource,
        sample_path: Option<&Path>,
        index: Option<Index>,
    ) -> Result<Self> {
        let header = Header::read(&mut source)?;
        let samples = if header.has_sample_ids {
            samples::read_samples_block(&mut source, &header)?
        } else if let Some(sample_path) = sample_path {
            samples::read_sample_file(&sample_path, header.n_samples)?
        } else {
            samples::numeric_sample_ids(header.n_samples)
        };
        debug!(
            "opened bgen: layout {}, {} samples, {} variants declared",
            header.layout.code(),
            header.n_samples,
            header.n_variants
        );

        let cursor = header.first_variant_offset();
        let state = ReaderState {
            source,
            layout: header.layout,
            compression: header.compression,
            n_samples: header.n_samples,
            keep: None,
        };
        Ok(BgenReader {
            state: Some(Rc::new(RefCell::new(state))),
            header,
            samples,
            index,
            cursor,
        })
    }

    fn ensure_open(&self) -> Result<&Rc<RefCell<ReaderState>>> {
        self.state.as_ref().ok_or(BgenError::ReaderClosed)
    }

    /// Header snapshot from open time.
    pub fn header(&self) -> Result<&Header> {
        self.ensure_open()?;
        Ok(&self.header)
    }

    /// Sample identifiers, with any dropped samples removed.
    pub fn samples(&self) -> Result<&[String]> {
        self.ensure_open()?;
        Ok(&self.samples)
    }

    /// Variant count declared by the header; zero means unknown.
    pub fn n_variants(&self) -> Result<u32> {
        self.ensure_open()?;
        Ok(self.header.n_variants)
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    /// Masks samples (`true` = drop). Later probability materialisations
    /// return only the remaining rows, and `samples()` shrinks to match.
    pub fn drop_samples(&mut self, drop: &[bool]) -> Result<()> {
        let rc = self.ensure_open()?.clone();
        if drop.len() != self.samples.len() {
            return Err(BgenError::SampleCountMismatch {
                expected: self.samples.len() as u32,
                found: drop.len() as u32,
            });
        }

        let mut state = rc.borrow_mut();
        let n_samples = state.n_samples as usize;
        let keep = state.keep.get_or_insert_with(|| vec![true; n_samples]);
        let mut dropped = drop.iter();
        for flag in keep.iter_mut().filter(|flag| **flag) {
            if *dropped.next().unwrap() {
                *flag = false;
            }
        }

        self.samples = self
            .samples
            .drain(..)
            .zip(drop)
            .filter_map(|(sample, &d)| (!d).then_some(sample))
            .collect();
        Ok(())
    }

    /// Resets the iteration cursor to the first variant record.
    pub fn rewind(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.cursor = self.header.first_variant_offset();
        Ok(())
    }

    /// Reads the variant record starting at `offset` and repositions the
    /// iteration cursor past it.
    pub fn at_offset(&mut self, offset: u64) -> Result<Variant> {
        let rc = self.ensure_open()?.clone();
        if !rc.borrow().source.is_seekable() {
            return Err(BgenError::NotSeekable);
        }
        let variant = self.read_variant_at(offset)?;
        self.cursor = variant.next_variant_offset;
        Ok(variant)
    }

    /// Index-backed lookup of the single variant with this rsid.
    pub fn with_rsid(&mut self, rsid: &str) -> Result<Variant> {
        let offset = self
            .index
            .as_ref()
            .ok_or(BgenError::NoIndex)?
            .offset_by_rsid(rsid)?;
        self.at_offset(offset)
    }

    /// Index-backed lookup of the single variant at this position.
    pub fn at_position(&mut self, pos: u32) -> Result<Variant> {
        let offset = self
            .index
            .as_ref()
            .ok_or(BgenError::NoIndex)?
            .offset_by_pos(pos)?;
        self.at_offset(offset)
    }

    /// Index-backed lookup by 0-based ordinal.
    pub fn nth_variant(&mut self, n: usize) -> Result<Variant> {
        let offset = self
            .index
            .as_ref()
            .ok_or(BgenError::NoIndex)?
            .offset_by_index(n)?;
        self.at_offset(offset)
    }

    /// All variants on a chromosome, in index order.
    pub fn fetch(&mut self, chrom: &str) -> Result<Fetch<'_>> {
        self.fetch_impl(chrom, None, None)
    }

    /// Variants on a chromosome at or after `start`.
    pub fn fetch_from(&mut self, chrom: &str, start: u32) -> Result<Fetch<'_>> {
        self.fetch_impl(chrom, Some(start), None)
    }

    /// Variants on a chromosome with `start <= position <= stop`.
    pub fn fetch_range(&mut self, chrom: &str, start: u32, stop: u32) -> Result<Fetch<'_>> {
        self.fetch_impl(chrom, Some(start), Some(stop))
    }

    fn fetch_impl(
        &mut self,
        chrom: &str,
        start: Option<u32>,
        stop: Option<u32>,
    ) -> Result<Fetch<'_>> {
        self.ensure_open()?;
        let offsets = self
            .index
            .as_ref()
            .ok_or(BgenError::NoIndex)?
            .fetch(chrom, start, stop)?;
        Ok(Fetch {
            reader: self,
            offsets: offsets.into_iter(),
        })
    }

    pub fn varids(&mut self) -> Result<Vec<String>> {
        self.collect_descriptors(|d| d.varid.clone())
    }

    pub fn rsids(&mut self) -> Result<Vec<String>> {
        self.collect_descriptors(|d| d.rsid.clone())
    }

    pub fn chroms(&mut self) -> Result<Vec<String>> {
        self.collect_descriptors(|d| d.chrom.clone())
    }

    pub fn positions(&mut self) -> Result<Vec<u32>> {
        self.collect_descriptors(|d| d.pos)
    }

    /// Walks every descriptor without touching genotype data or the
    /// iteration cursor.
    fn collect_descriptors<T>(&mut self, f: impl Fn(&Descriptor) -> T) -> Result<Vec<T>> {
        let rc = self.ensure_open()?.clone();
        let mut state = rc.borrow_mut();
        if !state.source.is_seekable() {
            return Err(BgenError::NotSeekable);
        }

        let (layout, compression, n_samples) =
            (state.layout, state.compression, state.n_samples);
        let mut offset = self.header.first_variant_offset();
        let mut out = Vec::new();
        loop {
            state.source.seek_to(offset)?;
            match Descriptor::read(&mut state.source, layout, compression, n_samples)? {
                None => break,
                Some((descriptor, span)) => {
                    out.push(f(&descriptor));
                    offset = span.next_offset;
                }
            }
        }
        Ok(out)
    }

    fn read_variant_at(&mut self, offset: u64) -> Result<Variant> {
        self.next_variant_at(offset)?.ok_or(BgenError::Truncated {
            expected: 1,
            found: 0,
        })
    }

    fn next_variant_at(&mut self, offset: u64) -> Result<Option<Variant>> {
        let rc = self.ensure_open()?.clone();
        let weak = Rc::downgrade(&rc);
        let mut state = rc.borrow_mut();
        state.source.seek_to(offset)?;
        let (layout, compression, n_samples) =
            (state.layout, state.compression, state.n_samples);
        Ok(
            Descriptor::read(&mut state.source, layout, compression, n_samples)?
                .map(|(descriptor, span)| Variant::new(descriptor, offset, span, weak)),
        )
    }

    /// Releases the underlying source. Variants keep working for data they
    /// already materialised; anything else fails with `ReaderClosed`.
    pub fn close(&mut self) {
        if self.state.take().is_some() {
            debug!("closed bgen reader");
        }
        self.index = None;
    }
}

impl Iterator for BgenReader {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == POISONED {
            return None;
        }
        if self.state.is_none() {
            self.cursor = POISONED;
            return Some(Err(BgenError::ReaderClosed));
        }
        match self.next_variant_at(self.cursor) {
            Ok(Some(variant)) => {
                self.cursor = variant.next_variant_offset;
                Some(Ok(variant))
            }
            Ok(None) => None,
            Err(e) => {
                // Poison iterator to prevent further reads
                self.cursor = POISONED;
                Some(Err(e))
            }
        }
    }
}

/// Lazy sequence of variants produced by an index fetch.
pub struct Fetch<'a> {
    reader: &'a mut BgenReader,
    offsets: std::vec::IntoIter<u64>,
}

impl Iterator for Fetch<'_> {
    type Item = Result<Variant>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.offsets.next()?;
        Some(self.reader.read_variant_at(offset))
    }
}
