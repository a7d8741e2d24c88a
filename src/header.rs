use crate::compression::Compression;
use crate::error::{BgenError, Result};
use crate::source::ByteSource;

pub(crate) const MAGIC: [u8; 4] = *b"bgen";
pub(crate) const FIXED_HEADER_LEN: u32 = 20;

/// Block format carried in header flag bits 2..6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    One,
    Two,
}

impl Layout {
    pub(crate) fn from_code(code: u8) -> Result<Self> {
        match code {
            1 => Ok(Layout::One),
            2 => Ok(Layout::Two),
            _ => Err(BgenError::UnsupportedLayout { layout: code }),
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Layout::One => 1,
            Layout::Two => 2,
        }
    }
}

/// Parsed file header. `offset` counts from byte 4, so the first variant
/// record starts at `offset + 4`.
#[derive(Debug, Clone)]
pub struct Header {
    pub offset: u32,
    pub header_length: u32,
    pub n_variants: u32,
    pub n_samples: u32,
    pub metadata: String,
    pub compression: Compression,
    pub layout: Layout,
    pub has_sample_ids: bool,
}

impl Header {
    pub(crate) fn read(source: &mut ByteSource) -> Result<Self> {
        let offset = source.read_u32()?;
        let header_length = source.read_u32()?;
        if header_length < FIXED_HEADER_LEN {
            return Err(BgenError::Truncated {
                expected: FIXED_HEADER_LEN as usize,
                found: header_length as usize,
            });
        }
        let n_variants = source.read_u32()?;
        let n_samples = source.read_u32()?;

        let mut magic = [0u8; 4];
        source.read_exact(&mut magic)?;
        if magic != MAGIC && magic != [0u8; 4] {
            return Err(BgenError::BadMagic { found: magic });
        }

        let mut metadata = vec![0u8; (header_length - FIXED_HEADER_LEN) as usize];
        source.read_exact(&mut metadata)?;
        let metadata = String::from_utf8_lossy(&metadata).into_owned();

        let flags = source.read_u32()?;
        let compression = Compression::from_code(flags & 0b11)?;
        let layout = Layout::from_code(((flags >> 2) & 0b1111) as u8)?;
        if layout == Layout::One && compression == Compression::Zstd {
            return Err(BgenError::IncompatibleOptions);
        }
        let has_sample_ids = flags >> 31 == 1;

        Ok(Header {
            offset,
            header_length,
            n_variants,
            n_samples,
            metadata,
            compression,
            layout,
            has_sample_ids,
        })
    }

    /// Serialises the header block, including the leading offset word.
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.header_length as usize);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.header_length.to_le_bytes());
        out.extend_from_slice(&self.n_variants.to_le_bytes());
        out.extend_from_slice(&self.n_samples.to_le_bytes());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(self.metadata.as_bytes());

        let mut flags = self.compression.code();
        flags |= (self.layout.code() as u32) << 2;
        if self.has_sample_ids {
            flags |= 1 << 31;
        }
        out.extend_from_slice(&flags.to_le_bytes());
        out
    }

    pub(crate) fn first_variant_offset(&self) -> u64 {
        self.offset as u64 + 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(header: &Header) -> Header {
        let bytes = header.to_bytes();
        let mut source = ByteSource::from_seekable(std::io::Cursor::new(bytes));
        Header::read(&mut source).unwrap()
    }

    #[test]
    fn header_round_trips() {
        let header = Header {
            offset: 37,
            header_length: 20,
            n_variants: 12,
            n_samples: 3,
            metadata: String::new(),
            compression: Compression::Zstd,
            layout: Layout::Two,
            has_sample_ids: true,
        };
        let parsed = round_trip(&header);
        assert_eq!(parsed.offset, 37);
        assert_eq!(parsed.n_variants, 12);
        assert_eq!(parsed.n_samples, 3);
        assert_eq!(parsed.compression, Compression::Zstd);
        assert_eq!(parsed.layout, Layout::Two);
        assert!(parsed.has_sample_ids);
    }

    #[test]
    fn metadata_length_goes_into_header_length() {
        let header = Header {
            offset: 24,
            header_length: 24,
            n_variants: 0,
            n_samples: 4,
            metadata: "1234".to_string(),
            compression: Compression::None,
            layout: Layout::One,
            has_sample_ids: false,
        };
        let parsed = round_trip(&header);
        assert_eq!(parsed.header_length, 24);
        assert_eq!(parsed.metadata, "1234");
        assert!(!parsed.has_sample_ids);
    }

    #[test]
    fn newlines_in_metadata_survive() {
        let header = Header {
            offset: 24,
            header_length: 24,
            n_variants: 0,
            n_samples: 1,
            metadata: "a\nbc".to_string(),
            compression: Compression::Zlib,
            layout: Layout::Two,
            has_sample_ids: false,
        };
        assert_eq!(round_trip(&header).metadata, "a\nbc");
    }

    #[test]
    fn bad_magic_is_rejected() {
        let header = Header {
            offset: 20,
            header_length: 20,
            n_variants: 0,
            n_samples: 1,
            metadata: String::new(),
            compression: Compression::None,
            layout: Layout::Two,
            has_sample_ids: false,
        };
        let mut bytes = header.to_bytes();
        bytes[16..20].copy_from_slice(b"nope");
        let mut source = ByteSource::from_seekable(std::io::Cursor::new(bytes));
        assert!(matches!(
            Header::read(&mut source),
            Err(BgenError::BadMagic { found }) if &found == b"nope"
        ));
    }

    #[test]
    fn zero_magic_is_accepted() {
        let header = Header {
            offset: 20,
            header_length: 20,
            n_variants: 0,
            n_samples: 1,
            metadata: String::new(),
            compression: Compression::None,
            layout: Layout::Two,
            has_sample_ids: false,
        };
        let mut bytes = header.to_bytes();
        bytes[16..20].copy_from_slice(&[0u8; 4]);
        let mut source = ByteSource::from_seekable(std::io::Cursor::new(bytes));
        assert!(Header::read(&mut source).is_ok());
    }

    #[test]
    fn unknown_layout_is_rejected() {
        let header = Header {
            offset: 20,
            header_length: 20,
            n_variants: 0,
            n_samples: 1,
            metadata: String::new(),
            compression: Compression::None,
            layout: Layout::Two,
            has_sample_ids: false,
        };
        let mut bytes = header.to_bytes();
        let flags = 3u32 << 2; // layout 3
        bytes[20..24].copy_from_slice(&flags.to_le_bytes());
        let mut source = ByteSource::from_seekable(std::io::Cursor::new(bytes));
        assert!(matches!(
            Header::read(&mut source),
            Err(BgenError::UnsupportedLayout { layout: 3 })
        ));
    }
}
