//! Chunking — deterministic, ordered split of a byte stream.
//!
//! Every chunk is exactly `chunk_size` bytes except the last one, which
//! may be shorter. The same input and chunk size always produce the same
//! sequence.

use std::fs;
use std::io::{ErrorKind, Read};
use std::path::Path;

use bytes::Bytes;
use memmap2::Mmap;

use crate::error::{Error, Result};

/// A contiguous, ordered slice of the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Ordinal position, 0-based.
    pub index: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(index: u64, data: Bytes) -> Self {
        Self { index, data }
    }

    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Split a stream into chunks of `chunk_size` bytes.
pub fn split<R: Read>(mut reader: R, chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(Error::InvalidChunkSize);
    }

    let mut chunks = Vec::new();
    loop {
        let mut buf = vec![0u8; chunk_size];
        let filled = read_full(&mut reader, &mut buf)?;
        if filled == 0 {
            break;
        }
        buf.truncate(filled);
        chunks.push(Chunk::new(chunks.len() as u64, Bytes::from(buf)));
        if filled < chunk_size {
            break;
        }
    }
    Ok(chunks)
}

/// Split a file on disk. The file is memory-mapped rather than read into
/// an intermediate buffer.
pub fn split_file(path: &Path, chunk_size: usize) -> Result<Vec<Chunk>> {
    if chunk_size == 0 {
        return Err(Error::InvalidChunkSize);
    }

    let file = fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(Vec::new());
    }

    // Safety: the file is opened read-only and the map is dropped before return
    let mmap = unsafe { Mmap::map(&file)? };

    Ok(mmap
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, data)| Chunk::new(i as u64, Bytes::copy_from_slice(data)))
        .collect())
}

/// Concatenate chunks in index order.
pub fn reassemble(chunks: &[Chunk]) -> Vec<u8> {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.index);

    let total = ordered.iter().map(|c| c.size_bytes()).sum();
    let mut out = Vec::with_capacity(total);
    for chunk in ordered {
        out.extend_from_slice(&chunk.data);
    }
    out
}

/// Read until `buf` is full or the reader hits EOF. Returns bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(filled)
}
