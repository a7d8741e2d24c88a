//! Read and write BGEN genotype probability files.
//!
//! BGEN is a compact binary container for per-sample genotype probability
//! distributions: a header, an optional sample identifier block, then a
//! sequence of variant records whose probability payloads may be zlib- or
//! zstd-compressed. Both layout 1 (v1.1) and layout 2 (v1.2/v1.3) blocks
//! are supported, along with the companion `.bgi` SQLite index for offset
//! lookups by rsid, position or region.
//!
//! ```no_run
//! use bgen::BgenReader;
//!
//! # fn main() -> bgen::Result<()> {
//! let mut bfile = BgenReader::open("cohort.bgen")?;
//! for variant in &mut bfile {
//!     let mut variant = variant?;
//!     let dose = variant.minor_allele_dosage()?;
//!     println!("{}\t{:.3}", variant.rsid, dose.sum());
//! }
//! # Ok(())
//! # }
//! ```

pub mod bits;
mod compression;
mod error;
mod genotypes;
mod header;
mod index;
mod reader;
mod samples;
mod source;
mod variant;
mod writer;

pub use compression::Compression;
pub use error::{BgenError, Result};
pub use genotypes::GenotypeBlock;
pub use header::{Header, Layout};
pub use index::Index;
pub use reader::{BgenReader, Fetch};
pub use variant::Variant;
pub use writer::{BgenWriter, GenotypeEncoding};
