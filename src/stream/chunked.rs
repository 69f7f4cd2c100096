//! Single-pass chunk iterator with an explicit checksum finalize step.
//!
//! Consumption drives production: each `next()` reads at most one chunk from
//! the source.  The running CRC32 is only released by [`ChunkedRead::finalize`]
//! and only if the iterator ran to exhaustion without error.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::iter::FusedIterator;
use std::path::Path;

use crc32fast::Hasher;

use crate::error::{ContainerError, Field, Result};

enum Source<'a> {
    Memory(&'a [u8]),
    /// `remaining == None` reads to end-of-file.
    File { file: File, remaining: Option<u64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Active,
    Exhausted,
    Failed,
}

pub struct ChunkedRead<'a> {
    source:     Source<'a>,
    field:      Field,
    /// Absolute position of the next byte, for truncation reports.
    position:   u64,
    chunk_size: usize,
    hasher:     Option<Hasher>,
    bytes_read: u64,
    state:      State,
}

impl<'a> ChunkedRead<'a> {
    pub(crate) fn memory(data: &'a [u8], field: Field, chunk_size: usize, compute_checksum: bool) -> Self {
        Self::with_source(Source::Memory(data), field, 0, chunk_size, compute_checksum)
    }

    /// Open `path` and position it at `offset`.  The handle lives exactly as
    /// long as the iterator.
    pub(crate) fn file_range(
        path:             &Path,
        offset:           u64,
        length:           Option<u64>,
        field:            Field,
        chunk_size:       usize,
        compute_checksum: bool,
    ) -> Result<Self> {
        let mut file = File::open(path)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset))?;
        }
        Ok(Self::with_source(
            Source::File { file, remaining: length },
            field,
            offset,
            chunk_size,
            compute_checksum,
        ))
    }

    fn with_source(
        source:           Source<'a>,
        field:            Field,
        position:         u64,
        chunk_size:       usize,
        compute_checksum: bool,
    ) -> Self {
        Self {
            source,
            field,
            position,
            chunk_size: chunk_size.max(1),
            hasher:     compute_checksum.then(Hasher::new),
            bytes_read: 0,
            state:      State::Active,
        }
    }

    /// Bytes yielded so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn is_exhausted(&self) -> bool {
        self.state == State::Exhausted
    }

    /// Second phase of the read: the CRC32 of every byte yielded.
    ///
    /// `None` if checksumming was disabled, the iterator was abandoned before
    /// its end, or a chunk failed.
    pub fn finalize(self) -> Option<u32> {
        match (self.state, self.hasher) {
            (State::Exhausted, Some(hasher)) => Some(hasher.finalize()),
            _ => None,
        }
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let chunk_size = self.chunk_size;
        match &mut self.source {
            Source::Memory(data) => {
                if data.is_empty() {
                    return Ok(None);
                }
                let rest: &'a [u8] = *data;
                let (head, tail) = rest.split_at(chunk_size.min(rest.len()));
                *data = tail;
                Ok(Some(head.to_vec()))
            }
            Source::File { file, remaining } => {
                let want = match *remaining {
                    Some(0) => return Ok(None),
                    Some(r) => r.min(chunk_size as u64),
                    None    => chunk_size as u64,
                };
                let mut chunk = Vec::with_capacity(want as usize);
                file.by_ref().take(want).read_to_end(&mut chunk)?;
                let got = chunk.len() as u64;

                match remaining {
                    Some(r) => {
                        if got < want {
                            return Err(ContainerError::Truncated {
                                field:    self.field,
                                position: self.position + got,
                            });
                        }
                        *r -= got;
                    }
                    None if got == 0 => return Ok(None),
                    None => {}
                }
                self.position += got;
                Ok(Some(chunk))
            }
        }
    }
}

impl Iterator for ChunkedRead<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != State::Active {
            return None;
        }
        match self.next_chunk() {
            Ok(Some(chunk)) => {
                if let Some(hasher) = self.hasher.as_mut() {
                    hasher.update(&chunk);
                }
                self.bytes_read += chunk.len() as u64;
                Some(Ok(chunk))
            }
            Ok(None) => {
                self.state = State::Exhausted;
                None
            }
            Err(e) => {
                self.state = State::Failed;
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for ChunkedRead<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use uuid::Uuid;

    fn field() -> Field {
        Field::StreamContent(Uuid::nil())
    }

    fn temp_with(bytes: &[u8]) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(bytes).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn memory_chunks_cover_buffer() {
        let data = b"abcdefghij";
        let chunks: Vec<Vec<u8>> = ChunkedRead::memory(data, field(), 3, false)
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks, vec![b"abc".to_vec(), b"def".to_vec(), b"ghi".to_vec(), b"j".to_vec()]);
    }

    #[test]
    fn checksum_released_only_after_exhaustion() {
        let data = b"hello world";
        let mut reader = ChunkedRead::memory(data, field(), 4, true);
        assert!(reader.next().is_some());
        assert_eq!(reader.finalize(), None);

        let mut reader = ChunkedRead::memory(data, field(), 4, true);
        for chunk in reader.by_ref() {
            chunk.unwrap();
        }
        assert!(reader.is_exhausted());
        assert_eq!(reader.bytes_read(), data.len() as u64);
        assert_eq!(reader.finalize(), Some(crc32fast::hash(data)));
    }

    #[test]
    fn checksum_disabled_yields_none() {
        let mut reader = ChunkedRead::memory(b"xyz", field(), 8, false);
        for chunk in reader.by_ref() {
            chunk.unwrap();
        }
        assert_eq!(reader.finalize(), None);
    }

    #[test]
    fn file_range_reads_window() {
        let file = temp_with(b"0123456789");
        let bytes: Vec<u8> = ChunkedRead::file_range(file.path(), 2, Some(5), field(), 2, false)
            .unwrap()
            .map(|c| c.unwrap())
            .flatten()
            .collect();
        assert_eq!(bytes, b"23456");
    }

    #[test]
    fn open_range_reads_to_eof() {
        let file = temp_with(b"0123456789");
        let chunks: Vec<Vec<u8>> = ChunkedRead::file_range(file.path(), 7, None, field(), 2, false)
            .unwrap()
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks, vec![b"78".to_vec(), b"9".to_vec()]);
    }

    #[test]
    fn short_file_is_truncation() {
        let file = temp_with(b"0123");
        let mut reader = ChunkedRead::file_range(file.path(), 1, Some(10), field(), 64, true).unwrap();
        match reader.next() {
            Some(Err(ContainerError::Truncated { position, .. })) => assert_eq!(position, 4),
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(reader.next().is_none());
        assert_eq!(reader.finalize(), None);
    }

    #[test]
    fn zero_chunk_size_is_clamped() {
        let chunks: Vec<_> = ChunkedRead::memory(b"ab", field(), 0, false).collect();
        assert_eq!(chunks.len(), 2);
    }
}
