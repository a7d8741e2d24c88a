use thiserror::Error;

#[derive(Debug, Error)]
pub enum BgenError {
    #[error("could not read {path}")]
    ReadWithPath {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("could not read bgen data")]
    ReadWithoutPath {
        #[source]
        source: std::io::Error,
    },

    #[error("could not write to {path}")]
    Write {
        #[source]
        source: std::io::Error,
        path: std::path::PathBuf,
    },

    #[error("bad magic number (expected \"bgen\" or four zero bytes, found {found:?})")]
    BadMagic { found: [u8; 4] },

    #[error("unsupported layout {layout} (only layouts 1 and 2 are defined)")]
    UnsupportedLayout { layout: u8 },

    #[error("unsupported compression code {code} in header flags")]
    UnsupportedCompression { code: u32 },

    #[error("zstd compression cannot be combined with layout 1")]
    IncompatibleOptions,

    #[error("file truncated (needed {expected} more bytes, found {found})")]
    Truncated { expected: usize, found: usize },

    #[error("corrupt {codec} block")]
    Decompression {
        codec: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("decompressed genotype block is {found} bytes, expected {expected}")]
    DecompressedLength { expected: usize, found: usize },

    #[error("bit depth must be in 1..=32 (got {bit_depth})")]
    BitDepthOutOfRange { bit_depth: u8 },

    #[error("value {value} does not fit in {bit_depth} bits")]
    ValueTooWide { value: u32, bit_depth: u8 },

    #[error("ploidy {ploidy} is outside the supported range")]
    PloidyOutOfRange { ploidy: u8 },

    #[error("a variant needs at least one allele")]
    NoAlleles,

    #[error("phased flag must be 0 or 1 (got {value})")]
    BadPhasedFlag { value: u8 },

    #[error("genotype matrix has {n_rows} rows for {n_samples} samples")]
    ProbabilityShape { n_rows: usize, n_samples: u32 },

    #[error("sample {sample} needs {expected} probabilities but the row holds {width}")]
    ProbabilityWidth {
        sample: usize,
        expected: usize,
        width: usize,
    },

    #[error("probability {value} for sample {sample} is outside [0, 1]")]
    ProbabilityRange { sample: usize, value: f64 },

    #[error("descriptor field {field} is {len} bytes, above the format maximum")]
    FieldTooLong { field: &'static str, len: usize },

    #[error("expected {expected} samples, found {found}")]
    SampleCountMismatch { expected: u32, found: u32 },

    #[error("samples block declares {declared} bytes but the header leaves {expected}")]
    SampleBlockLength { declared: u32, expected: u32 },

    #[error("genotype block is for {found} samples, header says {expected}")]
    BlockSampleCount { expected: u32, found: u32 },

    #[error("genotype block holds {found} alleles, descriptor says {expected}")]
    BlockAlleleCount { expected: u16, found: u16 },

    #[error("dosage requires a biallelic variant (this one has {n_alleles} alleles)")]
    NotBiallelic { n_alleles: usize },

    #[error("layout 1 blocks are diploid, unphased and biallelic")]
    Layout1Genotypes,

    #[error("no .bgi index is open for this file")]
    NoIndex,

    #[error("cannot find variant match for {query}")]
    NotFound { query: String },

    #[error("multiple variant matches for {query}")]
    Ambiguous { query: String },

    #[error("random access requires a seekable source")]
    NotSeekable,

    #[error("the reader for this file has been closed")]
    ReaderClosed,

    #[error("the writer for this file has been closed")]
    WriterClosed,

    #[error("could not query .bgi index")]
    Index(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, BgenError>;
