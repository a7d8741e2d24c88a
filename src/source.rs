use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{BgenError, Result};

/// Random-access capability required for offset-based variant lookups.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

const SKIP_CHUNK: usize = 8192;

/// Byte source behind a reader: either a random-access stream or a
/// forward-only one. Positions are tracked explicitly so both kinds can
/// report where the next variant record starts.
pub(crate) enum ByteSource {
    Seekable {
        reader: BufReader<Box<dyn ReadSeek>>,
        position: u64,
    },
    Streamed {
        reader: Box<dyn Read>,
        position: u64,
    },
}

impl ByteSource {
    pub(crate) fn open(path: &impl AsRef<Path>) -> Result<Self> {
        let f = File::open(path).map_err(|e| BgenError::ReadWithPath {
            source: e,
            path: path.as_ref().to_path_buf(),
        })?;
        Ok(Self::from_seekable(f))
    }

    pub(crate) fn from_seekable(inner: impl Read + Seek + 'static) -> Self {
        ByteSource::Seekable {
            reader: BufReader::new(Box::new(inner)),
            position: 0,
        }
    }

    pub(crate) fn from_stream(inner: impl Read + 'static) -> Self {
        ByteSource::Streamed {
            reader: Box::new(inner),
            position: 0,
        }
    }

    pub(crate) fn is_seekable(&self) -> bool {
        matches!(self, ByteSource::Seekable { .. })
    }

    pub(crate) fn position(&self) -> u64 {
        match self {
            ByteSource::Seekable { position, .. } => *position,
            ByteSource::Streamed { position, .. } => *position,
        }
    }

    /// Fills `buf` completely or fails with `Truncated`.
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.read_or_eof(buf)? {
            return Err(BgenError::Truncated {
                expected: buf.len(),
                found: 0,
            });
        }
        Ok(())
    }

    /// Like `read_exact`, but a clean end-of-file before the first byte
    /// returns `Ok(false)`. A partial fill is still `Truncated`.
    pub(crate) fn read_or_eof(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .reader()
                .read(&mut buf[filled..])
                .map_err(|e| BgenError::ReadWithoutPath { source: e })?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                return Err(BgenError::Truncated {
                    expected: buf.len(),
                    found: filled,
                });
            }
            filled += n;
            self.advance(n as u64);
        }
        Ok(true)
    }

    /// Repositions the source. Forward-only streams can skip ahead by
    /// discarding bytes; moving backwards needs a seekable source.
    pub(crate) fn seek_to(&mut self, target: u64) -> Result<()> {
        match self {
            ByteSource::Seekable { reader, position } => {
                if target != *position {
                    reader
                        .seek(SeekFrom::Start(target))
                        .map_err(|e| BgenError::ReadWithoutPath { source: e })?;
                    *position = target;
                }
                Ok(())
            }
            ByteSource::Streamed { reader, position } => {
                if target < *position {
                    return Err(BgenError::NotSeekable);
                }
                let mut remaining = target - *position;
                let mut scratch = [0u8; SKIP_CHUNK];
                while remaining > 0 {
                    let want = remaining.min(SKIP_CHUNK as u64) as usize;
                    let n = reader
                        .read(&mut scratch[..want])
                        .map_err(|e| BgenError::ReadWithoutPath { source: e })?;
                    if n == 0 {
                        return Err(BgenError::Truncated {
                            expected: remaining as usize,
                            found: 0,
                        });
                    }
                    *position += n as u64;
                    remaining -= n as u64;
                }
                Ok(())
            }
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn reader(&mut self) -> &mut dyn Read {
        match self {
            ByteSource::Seekable { reader, .. } => reader,
            ByteSource::Streamed { reader, .. } => reader,
        }
    }

    fn advance(&mut self, n: u64) {
        match self {
            ByteSource::Seekable { position, .. } => *position += n,
            ByteSource::Streamed { position, .. } => *position += n,
        }
    }
}
