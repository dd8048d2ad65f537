//! Accumulating storage for message bodies.
//!
//! A [`BodySink`] starts out as an in-memory buffer. Once the stored body
//! would grow past the configured swap threshold, the bytes collected so far
//! are moved into an anonymous temporary file and every later append goes to
//! that file. Both strategies expose the same capability set: append, read,
//! seek/rewind.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use bytes::{Bytes, BytesMut};
use tracing::trace;

/// Body storage that spills from memory to a temporary file past a size threshold.
///
/// Appends always go to the end of the body; reads use their own cursor,
/// which [`rewind`](Seek::rewind) moves back to the start.
#[derive(Debug)]
pub struct BodySink {
    storage: Storage,
    swap_threshold: usize,
    len: u64,
}

#[derive(Debug)]
enum Storage {
    Memory { buf: BytesMut, pos: usize },
    Spilled { file: File, pos: u64 },
}

impl BodySink {
    /// Creates an empty in-memory sink that spills once it would exceed `swap_threshold` bytes.
    pub fn new(swap_threshold: usize) -> Self {
        Self { storage: Storage::Memory { buf: BytesMut::new(), pos: 0 }, swap_threshold, len: 0 }
    }

    /// An empty body that never spills.
    pub fn empty() -> Self {
        Self::new(usize::MAX)
    }

    /// Wraps already collected bytes.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        let len = bytes.len() as u64;
        Self { storage: Storage::Memory { buf: BytesMut::from(bytes), pos: 0 }, swap_threshold: usize::MAX, len }
    }

    /// Appends `data` to the end of the body.
    pub fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let must_spill = match &self.storage {
            Storage::Memory { buf, .. } => buf.len().saturating_add(data.len()) > self.swap_threshold,
            Storage::Spilled { .. } => false,
        };
        if must_spill {
            self.spill()?;
        }

        match &mut self.storage {
            Storage::Memory { buf, .. } => buf.extend_from_slice(data),
            Storage::Spilled { file, .. } => {
                file.seek(SeekFrom::End(0))?;
                file.write_all(data)?;
            }
        }

        self.len += data.len() as u64;
        Ok(())
    }

    fn spill(&mut self) -> io::Result<()> {
        let mut file = tempfile::tempfile()?;
        let pos = match &self.storage {
            Storage::Memory { buf, pos } => {
                file.write_all(buf)?;
                *pos as u64
            }
            Storage::Spilled { .. } => return Ok(()),
        };

        trace!(len = self.len, threshold = self.swap_threshold, "body sink spilled to temporary file");
        self.storage = Storage::Spilled { file, pos };
        Ok(())
    }

    /// Total number of body bytes stored.
    #[inline]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true once the body has moved to secondary storage.
    #[inline]
    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::Spilled { .. })
    }

    /// Reads the whole body without moving the read cursor.
    pub fn to_bytes(&mut self) -> io::Result<Bytes> {
        match &mut self.storage {
            Storage::Memory { buf, .. } => Ok(Bytes::copy_from_slice(buf)),
            Storage::Spilled { file, .. } => read_file(file, self.len),
        }
    }

    /// Consumes the sink and returns the whole body, independent of the read cursor.
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self.storage {
            Storage::Memory { buf, .. } => Ok(buf.freeze()),
            Storage::Spilled { mut file, .. } => read_file(&mut file, self.len),
        }
    }
}

fn read_file(file: &mut File, len: u64) -> io::Result<Bytes> {
    let mut bytes = Vec::with_capacity(usize::try_from(len).unwrap_or(0));
    file.seek(SeekFrom::Start(0))?;
    file.read_to_end(&mut bytes)?;
    Ok(Bytes::from(bytes))
}

impl BodySink {
    /// Returns the in-memory contents, or `None` once spilled.
    pub fn as_memory(&self) -> Option<&[u8]> {
        match &self.storage {
            Storage::Memory { buf, .. } => Some(buf),
            Storage::Spilled { .. } => None,
        }
    }
}

impl Default for BodySink {
    fn default() -> Self {
        Self::empty()
    }
}

impl Read for BodySink {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        match &mut self.storage {
            Storage::Memory { buf, pos } => {
                let remaining = &buf[(*pos).min(buf.len())..];
                let n = remaining.len().min(out.len());
                out[..n].copy_from_slice(&remaining[..n]);
                *pos += n;
                Ok(n)
            }
            Storage::Spilled { file, pos } => {
                file.seek(SeekFrom::Start(*pos))?;
                let n = file.read(out)?;
                *pos += n as u64;
                Ok(n)
            }
        }
    }
}

impl Seek for BodySink {
    fn seek(&mut self, target: SeekFrom) -> io::Result<u64> {
        let current = match &self.storage {
            Storage::Memory { pos, .. } => *pos as u64,
            Storage::Spilled { pos, .. } => *pos,
        };

        let next = match target {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => current.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "invalid seek to a negative position"))?;

        match &mut self.storage {
            Storage::Memory { pos, .. } => {
                *pos = usize::try_from(next).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            }
            Storage::Spilled { pos, .. } => *pos = next,
        }
        Ok(next)
    }
}
